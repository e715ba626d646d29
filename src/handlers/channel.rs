//! Channel membership commands.

use super::core::{Context, Handler};
use super::helpers::require_params;
use crate::error::{HandlerError, HandlerResult};
use crate::state::{JoinDenied, MemberModes, Topic};
use async_trait::async_trait;
use chrono::Utc;
use munin_proto::{irc_to_lower, is_valid_channel_name, Capability, Message, Response, Source};

pub struct JoinHandler;

#[async_trait]
impl Handler for JoinHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;

        if msg.params[0] == "0" {
            return part_all(ctx).await;
        }

        let keys: Vec<&str> = msg
            .param(1)
            .map(|k| k.split(',').collect())
            .unwrap_or_default();

        let channel_names: Vec<String> = msg.params[0].split(',').map(str::to_string).collect();
        for (i, name) in channel_names.iter().enumerate() {
            join_one(ctx, name, keys.get(i).copied()).await?;
        }
        Ok(())
    }
}

async fn join_one(ctx: &mut Context<'_>, name: &str, key: Option<&str>) -> HandlerResult {
    let config = ctx.rookery.config();
    if !is_valid_channel_name(name) || name.len() > config.limits.max_channel_length {
        return ctx
            .send_numeric(
                Response::ERR_BADCHANMASK,
                vec![name.to_string(), "Bad channel mask".to_string()],
            )
            .await;
    }

    let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
    let (hostmask, account, channel_count, already_in) = {
        let s = session.read();
        (
            s.hostmask(),
            s.account.clone(),
            s.channels.len(),
            s.channels.contains(&irc_to_lower(name)),
        )
    };
    if already_in {
        return Ok(());
    }
    if channel_count >= config.limits.max_channels {
        return ctx
            .send_numeric(
                Response::ERR_TOOMANYCHANNELS,
                vec![name.to_string(), "You have joined too many channels".to_string()],
            )
            .await;
    }

    // Registration state must be read before taking the channel lock.
    let registration = ctx.rookery.db.channels().find(name).await.ok().flatten();

    let (channel, created) = ctx.rookery.channel_or_create(name);
    let (display_name, member_modes, ts) = {
        let mut chan = channel.lock();
        if created {
            if let Some(reg) = &registration {
                chan.registered = true;
                if let Some(topic) = &reg.topic {
                    chan.topic = Some(Topic {
                        text: topic.clone(),
                        set_by: ctx.rookery.info.name.clone(),
                        set_at: reg.registered_at,
                    });
                }
                if let Some(modes) = &reg.modes {
                    chan.modes = crate::state::ChannelModes::from_sjoin(modes, &[]);
                }
            }
        }

        if let Err(denied) = chan.check_join(&ctx.uid, &hostmask, key, account.as_deref()) {
            let (response, text) = match denied {
                JoinDenied::Banned => (Response::ERR_BANNEDFROMCHAN, "Cannot join channel (+b)"),
                JoinDenied::InviteOnly => (Response::ERR_INVITEONLYCHAN, "Cannot join channel (+i)"),
                JoinDenied::BadKey => (Response::ERR_BADCHANNELKEY, "Cannot join channel (+k)"),
                JoinDenied::Full => (Response::ERR_CHANNELISFULL, "Cannot join channel (+l)"),
                JoinDenied::RegisteredOnly => {
                    (Response::ERR_NEEDREGGEDNICK, "Cannot join channel (+r)")
                }
            };
            drop(chan);
            if created {
                ctx.rookery.destroy_channel(name);
            }
            return ctx
                .send_numeric(response, vec![name.to_string(), text.to_string()])
                .await;
        }

        let member_modes = MemberModes {
            op: created,
            ..MemberModes::default()
        };
        chan.add_member(ctx.uid.clone(), member_modes);
        (chan.name.clone(), member_modes, chan.created_ts)
    };

    session.write().channels.insert(irc_to_lower(name));

    broadcast_join(ctx, &display_name, account.as_deref());

    // Topic and names, as after a manual TOPIC/NAMES.
    send_topic_numerics(ctx, &display_name, &channel).await?;
    send_names(ctx, &display_name).await?;

    // Introduce the join to the network as a single-member SJOIN.
    let prefixed = format!("{}{}", member_modes.all_prefixes(), ctx.uid);
    ctx.rookery.broadcast_servers(
        &Message::new(
            "SJOIN",
            vec![ts.to_string(), display_name, "+".to_string(), prefixed],
        )
        .with_source(Source::server(&ctx.rookery.info.sid)),
        None,
    );
    Ok(())
}

/// JOIN visibility: `extended-join` holders see account and realname.
fn broadcast_join(ctx: &Context<'_>, channel_name: &str, account: Option<&str>) {
    let (source, realname) = {
        let Some(session) = ctx.session() else { return };
        let s = session.read();
        (s.source(), s.realname.clone().unwrap_or_default())
    };
    let plain = Message::new("JOIN", vec![channel_name.to_string()]).with_source(source.clone());
    let extended = Message::new(
        "JOIN",
        vec![
            channel_name.to_string(),
            account.unwrap_or("*").to_string(),
            realname,
        ],
    )
    .with_source(source);

    let Some(channel) = ctx.rookery.channel(channel_name) else {
        return;
    };
    let members: Vec<String> = channel.lock().members.keys().cloned().collect();
    for member in members {
        if !ctx.rookery.is_local_uid(&member) {
            continue;
        }
        let wants_extended = ctx
            .rookery
            .sessions
            .get(&member)
            .map(|s| s.value().read().has_cap(Capability::ExtendedJoin))
            .unwrap_or(false);
        let msg = if wants_extended { &extended } else { &plain };
        ctx.rookery.send(&member, msg.clone());
    }
}

async fn part_all(ctx: &mut Context<'_>) -> HandlerResult {
    let names: Vec<String> = {
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let s = session.read();
        s.channels.iter().cloned().collect()
    };
    for name in names {
        part_one(ctx, &name, "Leaving all channels").await?;
    }
    Ok(())
}

pub struct PartHandler;

#[async_trait]
impl Handler for PartHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        let reason = msg.param(1).unwrap_or("Leaving").to_string();
        for name in msg.params[0].split(',').map(str::to_string).collect::<Vec<_>>() {
            part_one(ctx, &name, &reason).await?;
        }
        Ok(())
    }
}

async fn part_one(ctx: &mut Context<'_>, name: &str, reason: &str) -> HandlerResult {
    let Some(channel) = ctx.rookery.channel(name) else {
        return ctx
            .send_numeric(
                Response::ERR_NOSUCHCHANNEL,
                vec![name.to_string(), "No such channel".to_string()],
            )
            .await;
    };

    let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
    let folded = irc_to_lower(name);
    if !session.read().channels.contains(&folded) {
        return ctx
            .send_numeric(
                Response::ERR_NOTONCHANNEL,
                vec![name.to_string(), "You're not on that channel".to_string()],
            )
            .await;
    }

    let source = session.read().source();
    let part = Message::new("PART", vec![name.to_string(), reason.to_string()]).with_source(source);
    ctx.rookery.send_channel(name, &part, None);

    let destroy = channel.lock().remove_member(&ctx.uid);
    session.write().channels.remove(&folded);
    if destroy {
        ctx.rookery.destroy_channel(name);
    }

    ctx.rookery.broadcast_servers(
        &Message::new("PART", vec![name.to_string(), reason.to_string()])
            .with_source(Source::server(&ctx.uid)),
        None,
    );
    Ok(())
}

pub struct TopicHandler;

#[async_trait]
impl Handler for TopicHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        let name = msg.params[0].clone();
        let Some(channel) = ctx.rookery.channel(&name) else {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHCHANNEL,
                    vec![name, "No such channel".to_string()],
                )
                .await;
        };

        let Some(new_text) = msg.param(1).map(str::to_string) else {
            return send_topic_numerics(ctx, &name, &channel).await;
        };

        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let (nick, source) = {
            let s = session.read();
            (s.nick_or_star(), s.source())
        };

        let config = ctx.rookery.config();
        let mut text = new_text;
        text.truncate(config.limits.max_topic_length);

        enum Denied {
            NotOnChannel,
            NotOp,
        }
        let denied = {
            let mut chan = channel.lock();
            match chan.member_modes(&ctx.uid) {
                None => Some(Denied::NotOnChannel),
                Some(member) if chan.modes.topic_lock && !member.is_at_least_halfop() => {
                    Some(Denied::NotOp)
                }
                Some(_) => {
                    chan.topic = Some(Topic {
                        text: text.clone(),
                        set_by: nick,
                        set_at: Utc::now().timestamp(),
                    });
                    None
                }
            }
        };
        match denied {
            Some(Denied::NotOnChannel) => {
                return ctx
                    .send_numeric(
                        Response::ERR_NOTONCHANNEL,
                        vec![name, "You're not on that channel".to_string()],
                    )
                    .await;
            }
            Some(Denied::NotOp) => {
                return ctx
                    .send_numeric(
                        Response::ERR_CHANOPRIVSNEEDED,
                        vec![name, "You're not channel operator".to_string()],
                    )
                    .await;
            }
            None => {}
        }

        let topic_msg =
            Message::new("TOPIC", vec![name.clone(), text.clone()]).with_source(source);
        ctx.rookery.send_channel(&name, &topic_msg, None);
        ctx.rookery.broadcast_servers(
            &Message::new("TOPIC", vec![name.clone(), text.clone()])
                .with_source(Source::server(&ctx.uid)),
            None,
        );

        // Registered channels persist their topic.
        let registered = channel.lock().registered;
        if registered {
            if let Err(e) = ctx.rookery.db.channels().save_topic(&name, Some(&text)).await {
                tracing::warn!(channel = %name, error = %e, "failed to persist topic");
            }
        }
        Ok(())
    }
}

/// 332/333 or 331.
pub async fn send_topic_numerics(
    ctx: &Context<'_>,
    name: &str,
    channel: &std::sync::Arc<parking_lot::Mutex<crate::state::Channel>>,
) -> HandlerResult {
    let topic = channel.lock().topic.clone();
    match topic {
        Some(topic) => {
            ctx.send_numeric(Response::RPL_TOPIC, vec![name.to_string(), topic.text.clone()])
                .await?;
            ctx.send_numeric(
                Response::RPL_TOPICWHOTIME,
                vec![name.to_string(), topic.set_by, topic.set_at.to_string()],
            )
            .await
        }
        None => {
            ctx.send_numeric(
                Response::RPL_NOTOPIC,
                vec![name.to_string(), "No topic is set".to_string()],
            )
            .await
        }
    }
}

pub struct NamesHandler;

#[async_trait]
impl Handler for NamesHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let Some(name) = msg.param(0).map(str::to_string) else {
            return ctx
                .send_numeric(
                    Response::RPL_ENDOFNAMES,
                    vec!["*".to_string(), "End of /NAMES list".to_string()],
                )
                .await;
        };
        send_names(ctx, &name).await
    }
}

/// 353/366 for one channel, honoring multi-prefix and userhost-in-names.
pub async fn send_names(ctx: &Context<'_>, name: &str) -> HandlerResult {
    let (multi_prefix, userhost) = {
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let s = session.read();
        (
            s.has_cap(Capability::MultiPrefix),
            s.has_cap(Capability::UserhostInNames),
        )
    };

    if let Some(channel) = ctx.rookery.channel(name) {
        let (display, members, secret, is_member) = {
            let chan = channel.lock();
            (
                chan.name.clone(),
                chan.members.clone(),
                chan.modes.secret,
                chan.members.contains_key(&ctx.uid),
            )
        };
        if !secret || is_member {
            let mut entries: Vec<String> = Vec::with_capacity(members.len());
            for (uid, modes) in &members {
                let Some(source) = ctx.rookery.user_source(uid) else {
                    continue;
                };
                let prefix = if multi_prefix {
                    modes.all_prefixes()
                } else {
                    modes.prefix().map(String::from).unwrap_or_default()
                };
                let who = if userhost {
                    source.to_string()
                } else {
                    source.name().to_string()
                };
                entries.push(format!("{prefix}{who}"));
            }
            entries.sort_unstable();
            let symbol = if secret { "@" } else { "=" };
            ctx.send_numeric(
                Response::RPL_NAMREPLY,
                vec![symbol.to_string(), display, entries.join(" ")],
            )
            .await?;
        }
    }
    ctx.send_numeric(
        Response::RPL_ENDOFNAMES,
        vec![name.to_string(), "End of /NAMES list".to_string()],
    )
    .await
}

pub struct ListHandler;

#[async_trait]
impl Handler for ListHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        ctx.send_numeric(
            Response::RPL_LISTSTART,
            vec!["Channel".to_string(), "Users  Name".to_string()],
        )
        .await?;
        let channels: Vec<_> = ctx
            .rookery
            .channels
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for channel in channels {
            let (name, count, topic, hidden) = {
                let chan = channel.lock();
                (
                    chan.name.clone(),
                    chan.members.len(),
                    chan.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default(),
                    (chan.modes.secret || chan.modes.private)
                        && !chan.members.contains_key(&ctx.uid),
                )
            };
            if hidden {
                continue;
            }
            ctx.send_numeric(
                Response::RPL_LIST,
                vec![name, count.to_string(), topic],
            )
            .await?;
        }
        ctx.send_numeric(Response::RPL_LISTEND, vec!["End of /LIST".to_string()])
            .await
    }
}

pub struct InviteHandler;

#[async_trait]
impl Handler for InviteHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 2)?;
        let (target_nick, name) = (msg.params[0].clone(), msg.params[1].clone());

        let Some(target_uid) = ctx.rookery.uid_by_nick(&target_nick) else {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHNICK,
                    vec![target_nick, "No such nick/channel".to_string()],
                )
                .await;
        };
        let Some(channel) = ctx.rookery.channel(&name) else {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHCHANNEL,
                    vec![name, "No such channel".to_string()],
                )
                .await;
        };

        enum Denied {
            NotOnChannel,
            AlreadyOn,
            NotOp,
        }
        let denied = {
            let mut chan = channel.lock();
            match chan.member_modes(&ctx.uid) {
                None => Some(Denied::NotOnChannel),
                Some(_) if chan.members.contains_key(&target_uid) => Some(Denied::AlreadyOn),
                Some(member) if chan.modes.invite_only && !member.is_op() => Some(Denied::NotOp),
                Some(_) => {
                    chan.invited.push(target_uid.clone());
                    None
                }
            }
        };
        match denied {
            Some(Denied::NotOnChannel) => {
                return ctx
                    .send_numeric(
                        Response::ERR_NOTONCHANNEL,
                        vec![name, "You're not on that channel".to_string()],
                    )
                    .await;
            }
            Some(Denied::AlreadyOn) => {
                return ctx
                    .send_numeric(
                        Response::ERR_USERONCHANNEL,
                        vec![target_nick, name, "is already on channel".to_string()],
                    )
                    .await;
            }
            Some(Denied::NotOp) => {
                return ctx
                    .send_numeric(
                        Response::ERR_CHANOPRIVSNEEDED,
                        vec![name, "You're not channel operator".to_string()],
                    )
                    .await;
            }
            None => {}
        }

        ctx.send_numeric(
            Response::RPL_INVITING,
            vec![target_nick.clone(), name.clone()],
        )
        .await?;

        let source = ctx.source();
        let invite =
            Message::new("INVITE", vec![target_nick.clone(), name.clone()]).with_source(source);
        if ctx.rookery.is_local_uid(&target_uid) {
            ctx.rookery.send(&target_uid, invite.clone());
        } else {
            ctx.rookery.send_server(
                &target_uid[..3],
                Message::new("INVITE", vec![target_uid.clone(), name.clone()])
                    .with_source(Source::server(&ctx.uid)),
            );
        }

        // invite-notify to channel ops holding the cap.
        let ops: Vec<String> = {
            let chan = channel.lock();
            chan.members
                .iter()
                .filter(|(_, m)| m.is_at_least_halfop())
                .map(|(uid, _)| uid.clone())
                .collect()
        };
        for op_uid in ops {
            if !ctx.rookery.is_local_uid(&op_uid) || op_uid == ctx.uid {
                continue;
            }
            let has_cap = ctx
                .rookery
                .sessions
                .get(&op_uid)
                .map(|s| s.value().read().has_cap(Capability::InviteNotify))
                .unwrap_or(false);
            if has_cap {
                ctx.rookery.send(&op_uid, invite.clone());
            }
        }
        Ok(())
    }
}

pub struct KickHandler;

#[async_trait]
impl Handler for KickHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 2)?;
        let name = msg.params[0].clone();
        let target_nick = msg.params[1].clone();
        let reason = msg.param(2).unwrap_or(&target_nick).to_string();

        let Some(channel) = ctx.rookery.channel(&name) else {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHCHANNEL,
                    vec![name, "No such channel".to_string()],
                )
                .await;
        };
        let Some(target_uid) = ctx.rookery.uid_by_nick(&target_nick) else {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHNICK,
                    vec![target_nick, "No such nick/channel".to_string()],
                )
                .await;
        };

        enum Denied {
            NotOnChannel,
            TargetMissing,
            NotOp,
        }
        let denied = {
            let chan = channel.lock();
            match (chan.member_modes(&ctx.uid), chan.member_modes(&target_uid)) {
                (None, _) => Some(Denied::NotOnChannel),
                (Some(_), None) => Some(Denied::TargetMissing),
                (Some(kicker), Some(target)) if !kicker.can_kick(target) => Some(Denied::NotOp),
                _ => None,
            }
        };
        match denied {
            Some(Denied::NotOnChannel) => {
                return ctx
                    .send_numeric(
                        Response::ERR_NOTONCHANNEL,
                        vec![name, "You're not on that channel".to_string()],
                    )
                    .await;
            }
            Some(Denied::TargetMissing) => {
                return ctx
                    .send_numeric(
                        Response::ERR_USERNOTINCHANNEL,
                        vec![target_nick, name, "They aren't on that channel".to_string()],
                    )
                    .await;
            }
            Some(Denied::NotOp) => {
                return ctx
                    .send_numeric(
                        Response::ERR_CHANOPRIVSNEEDED,
                        vec![name, "You're not channel operator".to_string()],
                    )
                    .await;
            }
            None => {}
        }

        let source = ctx.source();
        let kick = Message::new(
            "KICK",
            vec![name.clone(), target_nick.clone(), reason.clone()],
        )
        .with_source(source);
        ctx.rookery.send_channel(&name, &kick, None);

        let destroy = channel.lock().remove_member(&target_uid);
        if let Some(target_session) = ctx.rookery.sessions.get(&target_uid) {
            target_session.value().write().channels.remove(&irc_to_lower(&name));
        } else if let Some(mut remote) = ctx.rookery.remotes.get_mut(&target_uid) {
            remote.channels.remove(&irc_to_lower(&name));
        }
        if destroy {
            ctx.rookery.destroy_channel(&name);
        }

        ctx.rookery.broadcast_servers(
            &Message::new("KICK", vec![name, target_uid, reason])
                .with_source(Source::server(&ctx.uid)),
            None,
        );
        Ok(())
    }
}
