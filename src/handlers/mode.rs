//! MODE: user modes and channel modes, including the b/e/I lists.

use super::core::{Context, Handler};
use super::helpers::require_params;
use crate::error::{HandlerError, HandlerResult};
use crate::state::ListEntry;
use async_trait::async_trait;
use chrono::Utc;
use munin_proto::{irc_eq, Message, Response, Source};

pub struct ModeHandler;

#[async_trait]
impl Handler for ModeHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        if msg.params[0].starts_with('#') {
            channel_mode(ctx, msg).await
        } else {
            user_mode(ctx, msg).await
        }
    }
}

async fn user_mode(ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
    let target = &msg.params[0];
    let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
    let own_nick = session.read().nick_or_star();
    if !irc_eq(target, &own_nick) {
        return ctx
            .send_numeric(
                Response::ERR_USERSDONTMATCH,
                vec!["Can't change mode for other users".to_string()],
            )
            .await;
    }

    let Some(changes) = msg.param(1) else {
        let modes = session.read().modes.to_mode_string();
        return ctx.send_numeric(Response::RPL_UMODEIS, vec![modes]).await;
    };

    let mut adding = true;
    let mut applied = String::new();
    let mut unknown = false;
    {
        let mut s = session.write();
        for c in changes.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                letter => {
                    if s.modes.apply(letter, adding) {
                        applied.push(if adding { '+' } else { '-' });
                        applied.push(letter);
                    } else {
                        unknown = true;
                    }
                }
            }
        }
    }

    if unknown {
        ctx.send_numeric(
            Response::ERR_UMODEUNKNOWNFLAG,
            vec!["Unknown MODE flag".to_string()],
        )
        .await?;
    }
    if !applied.is_empty() {
        let change = Message::new("MODE", vec![own_nick, applied.clone()])
            .with_source(ctx.source());
        ctx.send(change).await?;
        ctx.rookery.broadcast_servers(
            &Message::new("MODE", vec![ctx.uid.clone(), applied])
                .with_source(Source::server(&ctx.uid)),
            None,
        );
    }
    Ok(())
}

/// One parsed channel-mode change.
struct Applied {
    adding: bool,
    letter: char,
    param: Option<String>,
}

async fn channel_mode(ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
    let name = msg.params[0].clone();
    let Some(channel) = ctx.rookery.channel(&name) else {
        return ctx
            .send_numeric(
                Response::ERR_NOSUCHCHANNEL,
                vec![name, "No such channel".to_string()],
            )
            .await;
    };

    // Bare MODE #chan: current modes + creation time.
    let Some(changes) = msg.param(1).map(str::to_string) else {
        let (modes, ts) = {
            let chan = channel.lock();
            (
                chan.modes.to_mode_string(chan.members.contains_key(&ctx.uid)),
                chan.created_ts,
            )
        };
        let mut params = vec![name.clone()];
        params.extend(modes.split(' ').map(str::to_string));
        ctx.send_numeric(Response::RPL_CHANNELMODEIS, params).await?;
        return ctx
            .send_numeric(Response::RPL_CREATIONTIME, vec![name, ts.to_string()])
            .await;
    };

    // List queries: +b / +e / +I with no argument.
    if msg.params.len() == 2 {
        if let Some(list_char) = match changes.as_str() {
            "+b" | "b" => Some('b'),
            "+e" | "e" => Some('e'),
            "+I" | "I" => Some('I'),
            _ => None,
        } {
            return send_mode_list(ctx, &name, &channel, list_char).await;
        }
    }

    // Everything else mutates and needs channel privileges.
    let actor = channel.lock().member_modes(&ctx.uid);
    let Some(actor) = actor else {
        return ctx
            .send_numeric(
                Response::ERR_NOTONCHANNEL,
                vec![name, "You're not on that channel".to_string()],
            )
            .await;
    };
    if !actor.is_at_least_halfop() {
        return ctx
            .send_numeric(
                Response::ERR_CHANOPRIVSNEEDED,
                vec![name, "You're not channel operator".to_string()],
            )
            .await;
    }

    let mut args = msg.params[2..].iter().cloned();
    let mut adding = true;
    let mut applied: Vec<Applied> = Vec::new();
    let set_by = ctx.nick_or_star();
    let now = Utc::now().timestamp();

    {
        let mut chan = channel.lock();
        for letter in changes.chars() {
            match letter {
                '+' => adding = true,
                '-' => adding = false,
                'i' => {
                    chan.modes.invite_only = adding;
                    applied.push(Applied { adding, letter, param: None });
                }
                'm' => {
                    chan.modes.moderated = adding;
                    applied.push(Applied { adding, letter, param: None });
                }
                'n' => {
                    chan.modes.no_external = adding;
                    applied.push(Applied { adding, letter, param: None });
                }
                'p' => {
                    chan.modes.private = adding;
                    applied.push(Applied { adding, letter, param: None });
                }
                'r' => {
                    chan.modes.registered_only = adding;
                    applied.push(Applied { adding, letter, param: None });
                }
                's' => {
                    chan.modes.secret = adding;
                    applied.push(Applied { adding, letter, param: None });
                }
                't' => {
                    chan.modes.topic_lock = adding;
                    applied.push(Applied { adding, letter, param: None });
                }
                'k' => {
                    if adding {
                        if let Some(key) = args.next() {
                            chan.modes.key = Some(key.clone());
                            applied.push(Applied { adding, letter, param: Some(key) });
                        }
                    } else {
                        chan.modes.key = None;
                        applied.push(Applied { adding, letter, param: Some("*".into()) });
                    }
                }
                'l' => {
                    if adding {
                        if let Some(limit) = args.next() {
                            if let Ok(n) = limit.parse::<u32>() {
                                chan.modes.limit = Some(n);
                                applied.push(Applied { adding, letter, param: Some(limit) });
                            }
                        }
                    } else {
                        chan.modes.limit = None;
                        applied.push(Applied { adding, letter, param: None });
                    }
                }
                'b' | 'e' | 'I' => {
                    let Some(mask) = args.next() else { continue };
                    let list = match letter {
                        'b' => &mut chan.bans,
                        'e' => &mut chan.excepts,
                        _ => &mut chan.invex,
                    };
                    if adding {
                        if !list.iter().any(|e| e.mask == mask) {
                            list.push(ListEntry {
                                mask: mask.clone(),
                                set_by: set_by.clone(),
                                set_at: now,
                            });
                        }
                    } else {
                        list.retain(|e| e.mask != mask);
                    }
                    applied.push(Applied { adding, letter, param: Some(mask) });
                }
                'o' | 'h' | 'v' => {
                    // Granting op/halfop needs op; voice needs halfop+.
                    if letter != 'v' && !actor.is_op() {
                        continue;
                    }
                    let Some(nick) = args.next() else { continue };
                    let Some(target_uid) = ctx.rookery.uid_by_nick(&nick) else {
                        continue;
                    };
                    let Some(member) = chan.members.get_mut(&target_uid) else {
                        continue;
                    };
                    match letter {
                        'o' => member.op = adding,
                        'h' => member.halfop = adding,
                        _ => member.voice = adding,
                    }
                    applied.push(Applied { adding, letter, param: Some(nick) });
                }
                unknown => {
                    drop(chan);
                    ctx.send_numeric(
                        Response::ERR_UNKNOWNMODE,
                        vec![
                            unknown.to_string(),
                            format!("is unknown mode char to me for {name}"),
                        ],
                    )
                    .await?;
                    chan = channel.lock();
                }
            }
        }
    }

    if applied.is_empty() {
        return Ok(());
    }

    // Collapse the applied changes back into one MODE line.
    let mut letters = String::new();
    let mut params: Vec<String> = Vec::new();
    let mut last_sign: Option<bool> = None;
    for change in &applied {
        if last_sign != Some(change.adding) {
            letters.push(if change.adding { '+' } else { '-' });
            last_sign = Some(change.adding);
        }
        letters.push(change.letter);
        if let Some(p) = &change.param {
            params.push(p.clone());
        }
    }

    let mut out_params = vec![name.clone(), letters.clone()];
    out_params.extend(params.clone());
    let mode_msg = Message::new("MODE", out_params).with_source(ctx.source());
    ctx.rookery.send_channel(&name, &mode_msg, None);

    // Registered channels persist their simple modes.
    let (registered, ts, mode_string) = {
        let chan = channel.lock();
        (chan.registered, chan.created_ts, chan.modes.to_mode_string(true))
    };
    if registered {
        if let Err(e) = ctx.rookery.db.channels().save_modes(&name, &mode_string).await {
            tracing::warn!(channel = %name, error = %e, "failed to persist modes");
        }
    }

    // TMODE carries the TS so peers can reject stale mode changes.
    let mut tmode = vec![ts.to_string(), name, letters];
    tmode.extend(params);
    ctx.rookery.broadcast_servers(
        &Message::new("TMODE", tmode).with_source(Source::server(&ctx.uid)),
        None,
    );
    Ok(())
}

async fn send_mode_list(
    ctx: &Context<'_>,
    name: &str,
    channel: &std::sync::Arc<parking_lot::Mutex<crate::state::Channel>>,
    list_char: char,
) -> HandlerResult {
    let entries = {
        let chan = channel.lock();
        match list_char {
            'b' => chan.bans.clone(),
            'e' => chan.excepts.clone(),
            _ => chan.invex.clone(),
        }
    };
    let (item, end, end_text) = match list_char {
        'b' => (Response::RPL_BANLIST, Response::RPL_ENDOFBANLIST, "End of channel ban list"),
        'e' => (
            Response::RPL_EXCEPTLIST,
            Response::RPL_ENDOFEXCEPTLIST,
            "End of channel exception list",
        ),
        _ => (
            Response::RPL_INVITELIST,
            Response::RPL_ENDOFINVITELIST,
            "End of channel invite list",
        ),
    };
    for entry in entries {
        ctx.send_numeric(
            item,
            vec![
                name.to_string(),
                entry.mask,
                entry.set_by,
                entry.set_at.to_string(),
            ],
        )
        .await?;
    }
    ctx.send_numeric(end, vec![name.to_string(), end_text.to_string()])
        .await
}
