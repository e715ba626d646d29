//! MemoServ: offline messages between accounts.

use super::{notice, require_account, ServiceKind};
use crate::state::Rookery;
use std::sync::Arc;

const KIND: ServiceKind = ServiceKind::MemoServ;

pub async fn handle(rookery: &Arc<Rookery>, uid: &str, command: &str, args: &[&str]) {
    match command {
        "SEND" => send(rookery, uid, args).await,
        "LIST" => list(rookery, uid).await,
        "READ" => read(rookery, uid, args).await,
        "DEL" => del(rookery, uid, args).await,
        "HELP" => {
            notice(
                rookery,
                KIND,
                uid,
                "Commands: SEND <account> <text>, LIST, READ <id>, DEL <id>",
            );
        }
        other => {
            notice(rookery, KIND, uid, &format!("Unknown command: {other}. Try HELP."));
        }
    }
}

async fn send(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(from) = require_account(rookery, KIND, uid) else {
        return;
    };
    let (Some(to), text) = (args.first(), args[1.min(args.len())..].join(" ")) else {
        notice(rookery, KIND, uid, "Syntax: SEND <account> <text>");
        return;
    };
    if text.is_empty() {
        notice(rookery, KIND, uid, "Syntax: SEND <account> <text>");
        return;
    }

    // The recipient must be a registered account (or a grouped nick).
    let recipient = match rookery.db.accounts().find_by_name(to).await {
        Ok(Some(account)) => Some(account.name),
        _ => rookery
            .db
            .accounts()
            .account_for_nick(to)
            .await
            .ok()
            .flatten()
            .map(|a| a.name),
    };
    let Some(recipient) = recipient else {
        notice(rookery, KIND, uid, "No such account.");
        return;
    };

    match rookery.db.memos().send(&recipient, &from, &text).await {
        Ok(_) => {
            notice(rookery, KIND, uid, &format!("Memo sent to {recipient}."));
            // Nudge the recipient if they are online and identified.
            let online = rookery.sessions.iter().find_map(|entry| {
                let s = entry.value().read();
                s.account
                    .as_deref()
                    .filter(|a| a.eq_ignore_ascii_case(&recipient))
                    .map(|_| entry.key().clone())
            });
            if let Some(target_uid) = online {
                notice(
                    rookery,
                    KIND,
                    &target_uid,
                    &format!("You have a new memo from {from}. Use /msg MemoServ LIST."),
                );
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "memo send failed");
            notice(rookery, KIND, uid, "Could not send the memo, try again later.");
        }
    }
}

async fn list(rookery: &Arc<Rookery>, uid: &str) {
    let Some(account) = require_account(rookery, KIND, uid) else {
        return;
    };
    match rookery.db.memos().list_for(&account).await {
        Ok(memos) if memos.is_empty() => {
            notice(rookery, KIND, uid, "You have no memos.");
        }
        Ok(memos) => {
            notice(rookery, KIND, uid, &format!("You have {} memo(s):", memos.len()));
            for memo in memos {
                let status = if memo.is_read { " " } else { "*" };
                let sent = chrono::DateTime::from_timestamp(memo.sent_at, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                notice(
                    rookery,
                    KIND,
                    uid,
                    &format!("{status} {} from {} at {sent}", memo.id, memo.from_account),
                );
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "memo list failed");
        }
    }
}

async fn read(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(account) = require_account(rookery, KIND, uid) else {
        return;
    };
    let Some(id) = args.first().and_then(|a| a.parse::<i64>().ok()) else {
        notice(rookery, KIND, uid, "Syntax: READ <id>");
        return;
    };
    match rookery.db.memos().read(&account, id).await {
        Ok(Some(memo)) => {
            notice(
                rookery,
                KIND,
                uid,
                &format!("Memo {} from {}: {}", memo.id, memo.from_account, memo.text),
            );
        }
        _ => notice(rookery, KIND, uid, "No such memo."),
    }
}

async fn del(rookery: &Arc<Rookery>, uid: &str, args: &[&str]) {
    let Some(account) = require_account(rookery, KIND, uid) else {
        return;
    };
    let Some(id) = args.first().and_then(|a| a.parse::<i64>().ok()) else {
        notice(rookery, KIND, uid, "Syntax: DEL <id>");
        return;
    };
    match rookery.db.memos().delete(&account, id).await {
        Ok(1..) => notice(rookery, KIND, uid, &format!("Memo {id} deleted.")),
        _ => notice(rookery, KIND, uid, "No such memo."),
    }
}
