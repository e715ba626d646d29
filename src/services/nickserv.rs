//! NickServ: account registration and identification.

use super::{notice, require_account, ServiceKind};
use crate::db::DbError;
use crate::state::Rookery;
use munin_proto::{Message, Source};
use std::sync::Arc;
use tracing::info;

const KIND: ServiceKind = ServiceKind::NickServ;

pub async fn handle(rookery: &Arc<Rookery>, uid: &str, command: &str, args: &[&str]) {
    match command {
        "REGISTER" => register(rookery, uid, args).await,
        "IDENTIFY" => identify(rookery, uid, args).await,
        "GROUP" => group(rookery, uid, args).await,
        "DROP" => drop_account(rookery, uid).await,
        "GHOST" => ghost(rookery, uid, args).await,
        "INFO" => info_cmd(rookery, uid, args).await,
        "CERT" => cert(rookery, uid, args).await,
        "HELP" => {
            notice(
                rookery,
                KIND,
                uid,
                "Commands: REGISTER <password> [email], IDENTIFY [account] <password>, \
                 GROUP, DROP, GHOST <nick>, INFO [account], CERT {ADD|LIST}",
            );
        }
        other => {
            notice(rookery, KIND, uid, &format!("Unknown command: {other}. Try HELP."));
        }
    }
}

async fn register(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(password) = args.first() else {
        notice(rookery, KIND, uid, "Syntax: REGISTER <password> [email]");
        return;
    };
    let Some(nick) = rookery.user_nick(uid) else {
        return;
    };
    if password.len() < 8 {
        notice(rookery, KIND, uid, "Password must be at least 8 characters.");
        return;
    }

    match rookery
        .db
        .accounts()
        .create(&nick, password, args.get(1).copied())
        .await
    {
        Ok(account) => {
            info!(account = %account.name, "account registered");
            set_session_account(rookery, uid, &account.name);
            notice(
                rookery,
                KIND,
                uid,
                &format!("Account {} registered. You are now identified.", account.name),
            );
        }
        Err(DbError::AccountExists(_)) => {
            notice(rookery, KIND, uid, "That account is already registered.");
        }
        Err(e) => {
            tracing::warn!(error = %e, "account registration failed");
            notice(rookery, KIND, uid, "Registration failed, try again later.");
        }
    }
}

async fn identify(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    crate::metrics::AUTH_ATTEMPTS.inc();
    let (account_name, password) = match args {
        [password] => match rookery.user_nick(uid) {
            Some(nick) => (nick, password.to_string()),
            None => return,
        },
        [account, password, ..] => (account.to_string(), password.to_string()),
        _ => {
            notice(rookery, KIND, uid, "Syntax: IDENTIFY [account] <password>");
            return;
        }
    };

    match rookery.db.accounts().identify(&account_name, &password).await {
        Ok(account) => {
            set_session_account(rookery, uid, &account.name);
            notice(
                rookery,
                KIND,
                uid,
                &format!("You are now identified as {}.", account.name),
            );
        }
        Err(_) => {
            notice(rookery, KIND, uid, "Invalid credentials.");
        }
    }
}

async fn group(rookery: &Arc<Rookery>, uid: &str, _args: &[&str]) {
    let Some(account_name) = require_account(rookery, KIND, uid) else {
        return;
    };
    let Some(nick) = rookery.user_nick(uid) else {
        return;
    };
    let account = match rookery.db.accounts().find_by_name(&account_name).await {
        Ok(Some(account)) => account,
        _ => return,
    };
    match rookery.db.accounts().register_nick(account.id, &nick).await {
        Ok(()) => {
            notice(rookery, KIND, uid, &format!("Nick {nick} added to your account."));
        }
        Err(DbError::NicknameRegistered(_)) => {
            notice(rookery, KIND, uid, "That nick is already registered.");
        }
        Err(e) => {
            tracing::warn!(error = %e, "GROUP failed");
            notice(rookery, KIND, uid, "Could not group that nick.");
        }
    }
}

async fn drop_account(rookery: &Arc<Rookery>, uid: &str) {
    let Some(account_name) = require_account(rookery, KIND, uid) else {
        return;
    };
    let account = match rookery.db.accounts().find_by_name(&account_name).await {
        Ok(Some(account)) => account,
        _ => return,
    };
    if rookery.db.accounts().delete(account.id).await.is_ok() {
        if let Some(session) = rookery.sessions.get(uid) {
            session.value().write().account = None;
        }
        info!(account = %account_name, "account dropped");
        notice(rookery, KIND, uid, "Your account has been dropped.");
    }
}

/// Disconnect a session squatting one of your registered nicks.
async fn ghost(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(account_name) = require_account(rookery, KIND, uid) else {
        return;
    };
    let Some(target_nick) = args.first() else {
        notice(rookery, KIND, uid, "Syntax: GHOST <nick>");
        return;
    };

    let owner = rookery
        .db
        .accounts()
        .account_for_nick(target_nick)
        .await
        .ok()
        .flatten();
    let owns = owner.is_some_and(|a| a.name.eq_ignore_ascii_case(&account_name));
    if !owns {
        notice(rookery, KIND, uid, "That nick is not registered to your account.");
        return;
    }

    let Some(target_uid) = rookery.uid_by_nick(target_nick) else {
        notice(rookery, KIND, uid, "That nick is not online.");
        return;
    };
    if target_uid == uid {
        notice(rookery, KIND, uid, "You cannot ghost yourself.");
        return;
    }

    info!(nick = %target_nick, by = %account_name, "GHOST");
    if rookery.is_local_uid(&target_uid) {
        rookery.kill_connection(&target_uid, "GHOST command used");
    } else {
        rookery.broadcast_servers(
            &Message::new(
                "KILL",
                vec![target_uid.clone(), "Killed (GHOST command used)".to_string()],
            )
            .with_source(Source::server(&rookery.info.sid)),
            None,
        );
        rookery.remove_remote_user(&target_uid, "Killed (GHOST command used)");
    }
    notice(rookery, KIND, uid, &format!("{target_nick} has been ghosted."));
}

async fn info_cmd(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let name = match args.first() {
        Some(name) => name.to_string(),
        None => match rookery.user_account(uid) {
            Some(account) => account,
            None => {
                notice(rookery, KIND, uid, "Syntax: INFO <account>");
                return;
            }
        },
    };
    match rookery.db.accounts().find_by_name(&name).await {
        Ok(Some(account)) => {
            notice(rookery, KIND, uid, &format!("Information for {}:", account.name));
            let registered = chrono::DateTime::from_timestamp(account.registered_at, 0)
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            notice(rookery, KIND, uid, &format!("  Registered: {registered}"));
            if let Ok(nicks) = rookery.db.accounts().nicks_for(account.id).await {
                notice(rookery, KIND, uid, &format!("  Nicks: {}", nicks.join(" ")));
            }
            if account.is_suspended {
                notice(rookery, KIND, uid, "  This account is suspended.");
            }
        }
        _ => {
            // Do not reveal which accounts exist beyond this generic line.
            notice(rookery, KIND, uid, "No such account.");
        }
    }
}

async fn cert(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(account_name) = require_account(rookery, KIND, uid) else {
        return;
    };
    let account = match rookery.db.accounts().find_by_name(&account_name).await {
        Ok(Some(account)) => account,
        _ => return,
    };
    match args.first().map(|s| s.to_ascii_uppercase()).as_deref() {
        Some("ADD") => {
            let fingerprint = rookery
                .sessions
                .get(uid)
                .and_then(|s| s.value().read().cert_fingerprint.clone());
            let Some(fingerprint) = fingerprint else {
                notice(rookery, KIND, uid, "You are not using a client certificate.");
                return;
            };
            if rookery.db.accounts().add_certfp(account.id, &fingerprint).await.is_ok() {
                notice(
                    rookery,
                    KIND,
                    uid,
                    &format!("Certificate fingerprint {fingerprint} added."),
                );
            }
        }
        Some("LIST") => {
            if let Ok(fingerprints) = rookery.db.accounts().certfps_for(account.id).await {
                if fingerprints.is_empty() {
                    notice(rookery, KIND, uid, "No certificate fingerprints on file.");
                } else {
                    for fp in fingerprints {
                        notice(rookery, KIND, uid, &format!("  {fp}"));
                    }
                }
            }
        }
        _ => notice(rookery, KIND, uid, "Syntax: CERT {ADD|LIST}"),
    }
}

/// Set the account on the session and announce it (account-notify, S2S
/// ENCAP LOGIN).
fn set_session_account(rookery: &Arc<Rookery>, uid: &str, account: &str) {
    let source = if let Some(session) = rookery.sessions.get(uid) {
        let mut s = session.value().write();
        s.account = Some(account.to_string());
        s.source()
    } else {
        return;
    };
    let change = Message::new("ACCOUNT", vec![account.to_string()]).with_source(source);
    rookery.send_common_peers(uid, &change, false);
    rookery.broadcast_servers(
        &Message::new(
            "ENCAP",
            vec!["*".to_string(), "LOGIN".to_string(), account.to_string()],
        )
        .with_source(Source::server(uid)),
        None,
    );
}
