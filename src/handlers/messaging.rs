//! PRIVMSG and NOTICE.
//!
//! One shared path: validate target, attach msgid/server-time/account
//! tags, fan out locally (tag-filtered per recipient), forward one copy
//! per interested S2S link, and append channel traffic to history.
//! NOTICE differs only in never generating error replies.

use super::core::{Context, Handler};
use super::helpers::{deliver_tagged, new_msgid, server_time_now};
use crate::db::StoredMessage;
use crate::error::{HandlerError, HandlerResult};
use async_trait::async_trait;
use chrono::Utc;
use munin_proto::{Capability, Message, Response, Source};
use std::time::Instant;

pub struct PrivmsgHandler;

#[async_trait]
impl Handler for PrivmsgHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        handle_message(ctx, msg, "PRIVMSG").await
    }
}

pub struct NoticeHandler;

#[async_trait]
impl Handler for NoticeHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        handle_message(ctx, msg, "NOTICE").await
    }
}

async fn handle_message(ctx: &mut Context<'_>, msg: &Message, kind: &str) -> HandlerResult {
    let is_notice = kind == "NOTICE";

    let Some(raw_targets) = msg.param(0) else {
        if is_notice {
            return Ok(());
        }
        return ctx
            .send_numeric(
                Response::ERR_NORECIPIENT,
                vec![format!("No recipient given ({kind})")],
            )
            .await;
    };
    let Some(text) = msg.param(1).filter(|t| !t.is_empty()).map(str::to_string) else {
        if is_notice {
            return Ok(());
        }
        return Err(HandlerError::NoTextToSend);
    };

    let max_targets = ctx.rookery.config().limits.max_targets;
    let targets: Vec<String> = raw_targets.split(',').map(str::to_string).collect();
    if targets.len() > max_targets {
        if is_notice {
            return Ok(());
        }
        return ctx
            .send_numeric(
                Response::ERR_TOOMANYTARGETS,
                vec![raw_targets.to_string(), "Too many targets".to_string()],
            )
            .await;
    }

    if let Some(session) = ctx.session() {
        session.write().idle_since = Instant::now();
    }

    for target in targets {
        if target.starts_with('#') {
            message_channel(ctx, &target, &text, kind, is_notice).await?;
        } else {
            message_user(ctx, &target, &text, kind, is_notice).await?;
        }
    }
    Ok(())
}

/// Build the wire message with its server tags attached.
fn tagged(
    source: Source,
    kind: &str,
    target: &str,
    text: &str,
    msgid: &str,
    account: Option<&str>,
) -> Message {
    let mut msg = Message::new(kind, vec![target.to_string(), text.to_string()])
        .with_source(source)
        .with_tag("time", Some(server_time_now()))
        .with_tag("msgid", Some(msgid.to_string()));
    if let Some(account) = account {
        msg = msg.with_tag("account", Some(account.to_string()));
    }
    msg
}

async fn message_channel(
    ctx: &mut Context<'_>,
    target: &str,
    text: &str,
    kind: &str,
    is_notice: bool,
) -> HandlerResult {
    let Some(channel) = ctx.rookery.channel(target) else {
        if is_notice {
            return Ok(());
        }
        return ctx
            .send_numeric(
                Response::ERR_NOSUCHCHANNEL,
                vec![target.to_string(), "No such channel".to_string()],
            )
            .await;
    };

    // Speak permission: external senders need -n, moderated channels need
    // voice, a matching ban silences members.
    let (display, members, allowed) = {
        let chan = channel.lock();
        let member = chan.member_modes(&ctx.uid);
        let hostmask = ctx
            .session()
            .map(|s| s.read().hostmask())
            .unwrap_or_default();
        let allowed = match member {
            None => !chan.modes.no_external,
            Some(m) => {
                let voiced = m.voice || m.is_at_least_halfop();
                let banned = chan.bans.iter().any(|b| munin_proto::mask_match(&b.mask, &hostmask))
                    && !chan.excepts.iter().any(|e| munin_proto::mask_match(&e.mask, &hostmask));
                (!chan.modes.moderated || voiced) && (!banned || voiced)
            }
        };
        (
            chan.name.clone(),
            chan.members.keys().cloned().collect::<Vec<_>>(),
            allowed,
        )
    };

    if !allowed {
        if is_notice {
            return Ok(());
        }
        return ctx
            .send_numeric(
                Response::ERR_CANNOTSENDTOCHAN,
                vec![display, "Cannot send to channel".to_string()],
            )
            .await;
    }

    let (source, account, echo) = {
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let s = session.read();
        (
            s.source(),
            s.account.clone(),
            s.has_cap(Capability::EchoMessage),
        )
    };
    let msgid = new_msgid();
    let wire = tagged(source, kind, &display, text, &msgid, account.as_deref());

    for member in &members {
        if member == &ctx.uid {
            continue;
        }
        if ctx.rookery.is_local_uid(member) {
            deliver_tagged(ctx.rookery, member, &wire);
        }
    }
    if echo {
        deliver_tagged(ctx.rookery, &ctx.uid, &wire);
    }

    // One copy per link that has members behind it (split horizon is the
    // S2S dispatcher's concern for relayed traffic; locally originated
    // traffic goes to every interested link).
    let forward = Message::new(kind, vec![display.clone(), text.to_string()])
        .with_source(Source::server(&ctx.uid));
    let link_sids: Vec<String> = ctx.rookery.links.iter().map(|e| e.key().clone()).collect();
    for sid in link_sids {
        if ctx.rookery.channel_has_members_behind(&display, &sid) {
            ctx.rookery.send_server(&sid, forward.clone());
        }
    }

    let stored = StoredMessage {
        msg_id: msgid,
        target: munin_proto::irc_to_lower(&display),
        sender_uid: ctx.uid.clone(),
        sender_account: account,
        text: text.to_string(),
        tags: None,
        ts: Utc::now().timestamp(),
    };
    if let Err(e) = ctx.rookery.db.history().append(&stored).await {
        let chan_name = &display;
        tracing::warn!(channel = %chan_name, error = %e, "failed to append history");
    }
    Ok(())
}

async fn message_user(
    ctx: &mut Context<'_>,
    target: &str,
    text: &str,
    kind: &str,
    is_notice: bool,
) -> HandlerResult {
    let Some(target_uid) = ctx.rookery.uid_by_nick(target) else {
        if is_notice {
            return Ok(());
        }
        return ctx
            .send_numeric(
                Response::ERR_NOSUCHNICK,
                vec![target.to_string(), "No such nick/channel".to_string()],
            )
            .await;
    };

    // Services intercept their own traffic.
    let service = ctx
        .rookery
        .remotes
        .get(&target_uid)
        .filter(|r| r.is_service)
        .map(|r| r.nick.clone());
    if let Some(service_nick) = service {
        if !is_notice {
            crate::services::handle_service_message(ctx.rookery, &ctx.uid, &service_nick, text)
                .await;
        }
        return Ok(());
    }

    let (source, account, echo) = {
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let s = session.read();
        (
            s.source(),
            s.account.clone(),
            s.has_cap(Capability::EchoMessage),
        )
    };
    let msgid = new_msgid();

    if ctx.rookery.is_local_uid(&target_uid) {
        let target_nick = ctx.rookery.user_nick(&target_uid).unwrap_or_default();
        let wire = tagged(source, kind, &target_nick, text, &msgid, account.as_deref());
        deliver_tagged(ctx.rookery, &target_uid, &wire);
        if echo {
            deliver_tagged(ctx.rookery, &ctx.uid, &wire);
        }

        // Away auto-reply for direct messages.
        if !is_notice {
            let away = ctx
                .rookery
                .sessions
                .get(&target_uid)
                .and_then(|s| s.value().read().away.clone());
            if let Some(away) = away {
                ctx.send_numeric(Response::RPL_AWAY, vec![target_nick, away])
                    .await?;
            }
        }
    } else {
        // Remote delivery: one copy toward the origin server.
        ctx.rookery.send_server(
            &target_uid[..3],
            Message::new(kind, vec![target_uid.clone(), text.to_string()])
                .with_source(Source::server(&ctx.uid)),
        );
        if echo {
            let wire = tagged(source, kind, target, text, &msgid, account.as_deref());
            deliver_tagged(ctx.rookery, &ctx.uid, &wire);
        }
    }
    Ok(())
}
