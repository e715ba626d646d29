//! ChanServ: channel registration and access lists.

use super::{notice, require_account, ServiceKind};
use crate::db::DbError;
use crate::state::Rookery;
use munin_proto::{Message, Source};
use std::sync::Arc;
use tracing::info;

const KIND: ServiceKind = ServiceKind::ChanServ;

pub async fn handle(rookery: &Arc<Rookery>, uid: &str, command: &str, args: &[&str]) {
    match command {
        "REGISTER" => register(rookery, uid, args).await,
        "DROP" => drop_channel(rookery, uid, args).await,
        "OP" => set_status(rookery, uid, args, true).await,
        "DEOP" => set_status(rookery, uid, args, false).await,
        "ACCESS" => access(rookery, uid, args).await,
        "INFO" => info_cmd(rookery, uid, args).await,
        "HELP" => {
            notice(
                rookery,
                KIND,
                uid,
                "Commands: REGISTER <#channel>, DROP <#channel>, OP <#channel> [nick], \
                 DEOP <#channel> [nick], ACCESS <#channel> {ADD|DEL|LIST} [account] [level], \
                 INFO <#channel>",
            );
        }
        other => {
            notice(rookery, KIND, uid, &format!("Unknown command: {other}. Try HELP."));
        }
    }
}

async fn register(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(account) = require_account(rookery, KIND, uid) else {
        return;
    };
    let Some(name) = args.first() else {
        notice(rookery, KIND, uid, "Syntax: REGISTER <#channel>");
        return;
    };

    // Must be a channel op to claim it.
    let is_op = rookery
        .channel(name)
        .map(|c| c.lock().member_modes(uid).is_some_and(|m| m.is_op()))
        .unwrap_or(false);
    if !is_op {
        notice(rookery, KIND, uid, "You must be a channel operator to register it.");
        return;
    }

    match rookery.db.channels().register(name, &account).await {
        Ok(_) => {
            if let Some(channel) = rookery.channel(name) {
                channel.lock().registered = true;
            }
            info!(channel = %name, founder = %account, "channel registered");
            notice(
                rookery,
                KIND,
                uid,
                &format!("Channel {name} registered to {account}."),
            );
        }
        Err(DbError::ChannelExists(_)) => {
            notice(rookery, KIND, uid, "That channel is already registered.");
        }
        Err(e) => {
            tracing::warn!(error = %e, "channel registration failed");
            notice(rookery, KIND, uid, "Registration failed, try again later.");
        }
    }
}

async fn drop_channel(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(account) = require_account(rookery, KIND, uid) else {
        return;
    };
    let Some(name) = args.first() else {
        notice(rookery, KIND, uid, "Syntax: DROP <#channel>");
        return;
    };
    match rookery.db.channels().access_for(name, &account).await {
        Ok(Some(level)) if level == "founder" => {}
        _ => {
            notice(rookery, KIND, uid, "Only the founder may drop a channel.");
            return;
        }
    }
    if rookery.db.channels().drop_channel(name).await.is_ok() {
        if let Some(channel) = rookery.channel(name) {
            let mut chan = channel.lock();
            chan.registered = false;
            if chan.members.is_empty() {
                drop(chan);
                rookery.destroy_channel(name);
            }
        }
        info!(channel = %name, by = %account, "channel dropped");
        notice(rookery, KIND, uid, &format!("Channel {name} dropped."));
    }
}

/// OP/DEOP through ChanServ, gated on the persisted access list.
async fn set_status(rookery: &Arc<Rookery>, uid: &str, args: &[&str], op: bool) {
    let Some(account) = require_account(rookery, KIND, uid) else {
        return;
    };
    let Some(name) = args.first() else {
        notice(rookery, KIND, uid, "Syntax: OP <#channel> [nick]");
        return;
    };

    let allowed = matches!(
        rookery.db.channels().access_for(name, &account).await,
        Ok(Some(ref level)) if level == "founder" || level == "op"
    );
    if !allowed {
        notice(rookery, KIND, uid, "Access denied.");
        return;
    }

    let target_nick = args.get(1).map(|s| s.to_string()).or_else(|| rookery.user_nick(uid));
    let Some(target_nick) = target_nick else { return };
    let Some(target_uid) = rookery.uid_by_nick(&target_nick) else {
        notice(rookery, KIND, uid, "No such nick.");
        return;
    };

    let Some(channel) = rookery.channel(name) else {
        notice(rookery, KIND, uid, "That channel is empty.");
        return;
    };
    let applied = {
        let mut chan = channel.lock();
        match chan.members.get_mut(&target_uid) {
            Some(member) => {
                member.op = op;
                true
            }
            None => false,
        }
    };
    if !applied {
        notice(rookery, KIND, uid, "They aren't on that channel.");
        return;
    }

    let mode = if op { "+o" } else { "-o" };
    let change = Message::new(
        "MODE",
        vec![name.to_string(), mode.to_string(), target_nick.clone()],
    )
    .with_source(Source::user("ChanServ", "services", rookery.info.name.clone()));
    rookery.send_channel(name, &change, None);

    let ts = channel.lock().created_ts;
    rookery.broadcast_servers(
        &Message::new(
            "TMODE",
            vec![ts.to_string(), name.to_string(), mode.to_string(), target_uid],
        )
        .with_source(Source::server(&rookery.uid_gen.service_uid('C'))),
        None,
    );
}

async fn access(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(account) = require_account(rookery, KIND, uid) else {
        return;
    };
    let (Some(name), Some(action)) = (args.first(), args.get(1).map(|s| s.to_ascii_uppercase()))
    else {
        notice(rookery, KIND, uid, "Syntax: ACCESS <#channel> {ADD|DEL|LIST} [account] [level]");
        return;
    };

    let is_founder = matches!(
        rookery.db.channels().access_for(name, &account).await,
        Ok(Some(ref level)) if level == "founder"
    );

    match action.as_str() {
        "LIST" => match rookery.db.channels().access_list(name).await {
            Ok(entries) => {
                notice(rookery, KIND, uid, &format!("Access list for {name}:"));
                for entry in entries {
                    notice(
                        rookery,
                        KIND,
                        uid,
                        &format!("  {} ({})", entry.account, entry.level),
                    );
                }
            }
            Err(_) => notice(rookery, KIND, uid, "That channel is not registered."),
        },
        "ADD" if is_founder => {
            let (Some(target), level) = (args.get(2), args.get(3).copied().unwrap_or("op")) else {
                notice(rookery, KIND, uid, "Syntax: ACCESS <#channel> ADD <account> [level]");
                return;
            };
            if rookery.db.channels().set_access(name, target, level).await.is_ok() {
                notice(rookery, KIND, uid, &format!("{target} added with level {level}."));
            }
        }
        "DEL" if is_founder => {
            let Some(target) = args.get(2) else {
                notice(rookery, KIND, uid, "Syntax: ACCESS <#channel> DEL <account>");
                return;
            };
            if rookery.db.channels().remove_access(name, target).await.is_ok() {
                notice(rookery, KIND, uid, &format!("{target} removed."));
            }
        }
        "ADD" | "DEL" => notice(rookery, KIND, uid, "Only the founder may edit the access list."),
        _ => notice(rookery, KIND, uid, "Unknown ACCESS action."),
    }
}

async fn info_cmd(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(name) = args.first() else {
        notice(rookery, KIND, uid, "Syntax: INFO <#channel>");
        return;
    };
    match rookery.db.channels().find(name).await {
        Ok(Some(channel)) => {
            notice(rookery, KIND, uid, &format!("Information for {}:", channel.name));
            notice(rookery, KIND, uid, &format!("  Founder: {}", channel.founder));
            let registered = chrono::DateTime::from_timestamp(channel.registered_at, 0)
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            notice(rookery, KIND, uid, &format!("  Registered: {registered}"));
        }
        _ => notice(rookery, KIND, uid, "That channel is not registered."),
    }
}
