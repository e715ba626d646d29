//! User queries: WHOIS, WHO, WHOWAS, USERHOST, ISON.

use super::core::{Context, Handler};
use super::helpers::require_params;
use crate::error::HandlerResult;
use async_trait::async_trait;
use munin_proto::{irc_eq, Message, Response};

pub struct WhoisHandler;

#[async_trait]
impl Handler for WhoisHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        // WHOIS [server] nick: the last parameter is the nick.
        let target = msg.params.last().cloned().unwrap_or_default();

        let Some(uid) = ctx.rookery.uid_by_nick(&target) else {
            ctx.send_numeric(
                Response::ERR_NOSUCHNICK,
                vec![target.clone(), "No such nick/channel".to_string()],
            )
            .await?;
            return ctx
                .send_numeric(
                    Response::RPL_ENDOFWHOIS,
                    vec![target, "End of /WHOIS list".to_string()],
                )
                .await;
        };

        // Collect the profile without holding any lock across sends.
        struct Profile {
            nick: String,
            user: String,
            host: String,
            realname: String,
            server: String,
            server_info: String,
            oper: bool,
            secure: bool,
            account: Option<String>,
            idle_secs: Option<u64>,
            signon: Option<i64>,
            channels: Vec<String>,
        }

        let profile = if let Some(session) = ctx.rookery.sessions.get(&uid) {
            let s = session.read();
            Some(Profile {
                nick: s.nick.clone().unwrap_or_default(),
                user: s.user.clone().unwrap_or_default(),
                host: s.host.clone(),
                realname: s.realname.clone().unwrap_or_default(),
                server: ctx.rookery.info.name.clone(),
                server_info: ctx.rookery.info.description.clone(),
                oper: s.modes.oper,
                secure: s.modes.secure,
                account: s.account.clone(),
                idle_secs: Some(s.idle_since.elapsed().as_secs()),
                signon: Some(s.connected_at.timestamp()),
                channels: s.channels.iter().cloned().collect(),
            })
        } else if let Some(remote) = ctx.rookery.remotes.get(&uid) {
            let origin = ctx
                .rookery
                .topology
                .get(remote.sid())
                .map(|s| (s.name, s.description))
                .unwrap_or_default();
            Some(Profile {
                nick: remote.nick.clone(),
                user: remote.user.clone(),
                host: remote.display_host().to_string(),
                realname: remote.realname.clone(),
                server: origin.0,
                server_info: origin.1,
                oper: remote.modes.oper,
                secure: remote.modes.secure,
                account: remote.account.clone(),
                idle_secs: None,
                signon: None,
                channels: remote.channels.iter().cloned().collect(),
            })
        } else {
            None
        };

        let Some(p) = profile else {
            return ctx
                .send_numeric(
                    Response::RPL_ENDOFWHOIS,
                    vec![target, "End of /WHOIS list".to_string()],
                )
                .await;
        };

        ctx.send_numeric(
            Response::RPL_WHOISUSER,
            vec![
                p.nick.clone(),
                p.user,
                p.host,
                "*".to_string(),
                p.realname,
            ],
        )
        .await?;
        ctx.send_numeric(
            Response::RPL_WHOISSERVER,
            vec![p.nick.clone(), p.server, p.server_info],
        )
        .await?;

        if !p.channels.is_empty() {
            // Channel display names with the member's prefix.
            let mut names = Vec::new();
            for folded in &p.channels {
                if let Some(channel) = ctx.rookery.channel(folded) {
                    let chan = channel.lock();
                    if chan.modes.secret && !chan.members.contains_key(&ctx.uid) {
                        continue;
                    }
                    let prefix = chan
                        .member_modes(&uid)
                        .and_then(|m| m.prefix())
                        .map(String::from)
                        .unwrap_or_default();
                    names.push(format!("{}{}", prefix, chan.name));
                }
            }
            if !names.is_empty() {
                ctx.send_numeric(
                    Response::RPL_WHOISCHANNELS,
                    vec![p.nick.clone(), names.join(" ")],
                )
                .await?;
            }
        }

        if p.oper {
            ctx.send_numeric(
                Response::RPL_WHOISOPERATOR,
                vec![p.nick.clone(), "is an IRC operator".to_string()],
            )
            .await?;
        }
        if p.secure {
            ctx.send_numeric(
                Response::RPL_WHOISSECURE,
                vec![p.nick.clone(), "is using a secure connection".to_string()],
            )
            .await?;
        }
        if let Some(account) = &p.account {
            ctx.send_numeric(
                Response::RPL_WHOISACCOUNT,
                vec![
                    p.nick.clone(),
                    account.clone(),
                    "is logged in as".to_string(),
                ],
            )
            .await?;
        }
        if let (Some(idle), Some(signon)) = (p.idle_secs, p.signon) {
            ctx.send_numeric(
                Response::RPL_WHOISIDLE,
                vec![
                    p.nick.clone(),
                    idle.to_string(),
                    signon.to_string(),
                    "seconds idle, signon time".to_string(),
                ],
            )
            .await?;
        }
        ctx.send_numeric(
            Response::RPL_ENDOFWHOIS,
            vec![p.nick, "End of /WHOIS list".to_string()],
        )
        .await
    }
}

pub struct WhoHandler;

#[async_trait]
impl Handler for WhoHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let mask = msg.param(0).unwrap_or("*").to_string();

        if mask.starts_with('#') {
            if let Some(channel) = ctx.rookery.channel(&mask) {
                let (display, members) = {
                    let chan = channel.lock();
                    (chan.name.clone(), chan.members.clone())
                };
                for (uid, modes) in members {
                    let _ = send_who_reply(ctx, &display, &uid, modes.prefix()).await;
                }
            }
        } else {
            // Nick match only; full host-mask WHO is an operator tool we
            // keep narrow.
            if let Some(uid) = ctx.rookery.uid_by_nick(&mask) {
                send_who_reply(ctx, "*", &uid, None).await?;
            }
        }
        ctx.send_numeric(
            Response::RPL_ENDOFWHO,
            vec![mask, "End of /WHO list".to_string()],
        )
        .await
    }
}

async fn send_who_reply(
    ctx: &Context<'_>,
    channel: &str,
    uid: &str,
    prefix: Option<char>,
) -> HandlerResult {
    struct Row {
        user: String,
        host: String,
        server: String,
        nick: String,
        away: bool,
        oper: bool,
        realname: String,
    }
    let row = if let Some(session) = ctx.rookery.sessions.get(uid) {
        let s = session.read();
        Some(Row {
            user: s.user.clone().unwrap_or_default(),
            host: s.host.clone(),
            server: ctx.rookery.info.name.clone(),
            nick: s.nick.clone().unwrap_or_default(),
            away: s.away.is_some(),
            oper: s.modes.oper,
            realname: s.realname.clone().unwrap_or_default(),
        })
    } else {
        ctx.rookery.remotes.get(uid).map(|remote| Row {
            user: remote.user.clone(),
            host: remote.display_host().to_string(),
            server: ctx
                .rookery
                .topology
                .get(remote.sid())
                .map(|s| s.name)
                .unwrap_or_default(),
            nick: remote.nick.clone(),
            away: remote.away.is_some(),
            oper: remote.modes.oper,
            realname: remote.realname.clone(),
        })
    };
    let Some(row) = row else { return Ok(()) };

    let mut flags = String::from(if row.away { "G" } else { "H" });
    if row.oper {
        flags.push('*');
    }
    if let Some(p) = prefix {
        flags.push(p);
    }
    ctx.send_numeric(
        Response::RPL_WHOREPLY,
        vec![
            channel.to_string(),
            row.user,
            row.host,
            row.server,
            row.nick,
            flags,
            format!("0 {}", row.realname),
        ],
    )
    .await
}

pub struct WhowasHandler;

#[async_trait]
impl Handler for WhowasHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        let target = msg.params[0].clone();
        let limit: usize = msg
            .param(1)
            .and_then(|n| n.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(8);

        let entries: Vec<_> = {
            let whowas = ctx.rookery.whowas.lock();
            whowas
                .iter()
                .filter(|e| irc_eq(&e.nick, &target))
                .take(limit)
                .cloned()
                .collect()
        };

        if entries.is_empty() {
            ctx.send_numeric(
                Response::ERR_WASNOSUCHNICK,
                vec![target.clone(), "There was no such nickname".to_string()],
            )
            .await?;
        }
        for entry in entries {
            ctx.send_numeric(
                Response::RPL_WHOWASUSER,
                vec![
                    entry.nick,
                    entry.user,
                    entry.host,
                    "*".to_string(),
                    entry.realname,
                ],
            )
            .await?;
        }
        ctx.send_numeric(
            Response::RPL_ENDOFWHOWAS,
            vec![target, "End of WHOWAS".to_string()],
        )
        .await
    }
}

pub struct UserhostHandler;

#[async_trait]
impl Handler for UserhostHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        let mut replies = Vec::new();
        for nick in msg.params.iter().take(5) {
            let Some(uid) = ctx.rookery.uid_by_nick(nick) else {
                continue;
            };
            if let Some(session) = ctx.rookery.sessions.get(&uid) {
                let s = session.read();
                let oper = if s.modes.oper { "*" } else { "" };
                let away = if s.away.is_some() { "-" } else { "+" };
                replies.push(format!(
                    "{}{}={}{}@{}",
                    s.nick.clone().unwrap_or_default(),
                    oper,
                    away,
                    s.user.clone().unwrap_or_default(),
                    s.host
                ));
            }
        }
        ctx.send_numeric(Response::RPL_USERHOST, vec![replies.join(" ")])
            .await
    }
}

pub struct IsonHandler;

#[async_trait]
impl Handler for IsonHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        let mut online = Vec::new();
        for nick in msg
            .params
            .iter()
            .flat_map(|p| p.split_whitespace())
        {
            if ctx.rookery.uid_by_nick(nick).is_some() {
                online.push(nick.to_string());
            }
        }
        ctx.send_numeric(Response::RPL_ISON, vec![online.join(" ")])
            .await
    }
}
