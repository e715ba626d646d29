//! Connection and registration commands: NICK, USER, PASS, PING, PONG,
//! QUIT, WEBIRC, plus the welcome burst.

use super::core::{Context, Handler};
use super::helpers::require_params;
use crate::error::{HandlerError, HandlerResult};
use async_trait::async_trait;
use chrono::Utc;
use munin_proto::{is_valid_nickname, Message, Response, Source};
use tracing::info;

/// Server version string for 002/004/VERSION.
pub const VERSION: &str = concat!("munind-", env!("CARGO_PKG_VERSION"));

pub struct NickHandler;

#[async_trait]
impl Handler for NickHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let Some(new_nick) = msg.param(0).map(str::to_string) else {
            return ctx
                .send_numeric(
                    Response::ERR_NONICKNAMEGIVEN,
                    vec!["No nickname given".to_string()],
                )
                .await;
        };

        let max_len = ctx.rookery.config().limits.max_nick_length;
        if !is_valid_nickname(&new_nick) || new_nick.len() > max_len {
            return Err(HandlerError::ErroneousNickname(new_nick));
        }

        if !ctx.rookery.claim_nick(&new_nick, &ctx.uid) {
            return Err(HandlerError::NicknameInUse(new_nick));
        }

        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let (old_source, old_nick, registered) = {
            let mut s = session.write();
            let old_source = s.source();
            let old = s.nick.replace(new_nick.clone());
            s.nick_ts = Utc::now().timestamp();
            (old_source, old, s.registered)
        };

        if let Some(old) = &old_nick {
            if old != &new_nick {
                ctx.rookery.release_nick(old, &ctx.uid);
            }
        }

        if registered {
            // Observers (sharing a channel) and the user itself see the
            // change before any message with the new nick.
            let change =
                Message::new("NICK", vec![new_nick.clone()]).with_source(old_source);
            ctx.rookery.send_common_peers(&ctx.uid, &change, false);
            ctx.send(change).await?;

            let ts = Utc::now().timestamp().to_string();
            ctx.rookery.broadcast_servers(
                &Message::new("NICK", vec![new_nick, ts]).with_source(Source::server(&ctx.uid)),
                None,
            );
        } else {
            try_complete_registration(ctx).await?;
        }
        Ok(())
    }
}

pub struct UserHandler;

#[async_trait]
impl Handler for UserHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 4)?;
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        {
            let mut s = session.write();
            if s.registered {
                return Err(HandlerError::AlreadyRegistered);
            }
            let mut ident = msg.params[0].clone();
            ident.truncate(10);
            if s.webirc_gateway.is_some() && !s.webirc_trust_ident {
                ident.insert(0, '~');
            }
            s.user = Some(ident);
            s.realname = Some(msg.params[3].clone());
        }
        try_complete_registration(ctx).await
    }
}

pub struct PassHandler;

#[async_trait]
impl Handler for PassHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 1)?;
        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let mut s = session.write();
        if s.registered {
            return Err(HandlerError::AlreadyRegistered);
        }
        s.password = Some(msg.params[0].clone());
        Ok(())
    }
}

pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let Some(token) = msg.param(0) else {
            return ctx
                .send_numeric(Response::ERR_NOORIGIN, vec!["No origin specified".to_string()])
                .await;
        };
        ctx.send(
            Message::new("PONG", vec![ctx.server_name(), token.to_string()])
                .with_source(Source::server(&ctx.rookery.info.name)),
        )
        .await
    }
}

pub struct PongHandler;

#[async_trait]
impl Handler for PongHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, _ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        // Liveness is recorded by the connection loop on every line.
        Ok(())
    }
}

pub struct QuitHandler;

#[async_trait]
impl Handler for QuitHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, _ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        Err(HandlerError::Quit(msg.param(0).map(str::to_string)))
    }
}

pub struct WebircHandler;

#[async_trait]
impl Handler for WebircHandler {
    fn pre_registration(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 4)?;
        let (password, gateway, client_host, client_ip) = (
            &msg.params[0],
            &msg.params[1],
            &msg.params[2],
            &msg.params[3],
        );

        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        {
            let s = session.read();
            if s.registered || s.nick.is_some() || s.user.is_some() {
                // Only valid as the very first thing a gateway sends.
                return Err(HandlerError::AlreadyRegistered);
            }
        }

        let config = ctx.rookery.config();
        let source_ip = session.read().ip;
        let block = config.webirc.iter().find(|b| {
            &b.name == gateway
                && b.allows_source(source_ip)
                && constant_time_eq(&b.password, password)
        });

        let Some(block) = block else {
            info!(gateway = %gateway, ip = %source_ip, "WEBIRC rejected");
            return Err(HandlerError::NoPrivileges);
        };

        let parsed_ip: std::net::IpAddr = client_ip
            .parse()
            .map_err(|_| HandlerError::Internal("bad WEBIRC ip".into()))?;

        {
            let mut s = session.write();
            s.ip = parsed_ip;
            s.host = client_host.clone();
            s.webirc_gateway = Some(block.name.clone());
            s.webirc_trust_ident = block.trust_ident;
        }
        info!(gateway = %gateway, host = %client_host, ip = %client_ip, "WEBIRC host rewrite");
        Ok(())
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Promote the session to Registered when every gate has cleared, then
/// emit the welcome burst and introduce the user to the network.
pub async fn try_complete_registration(ctx: &mut Context<'_>) -> HandlerResult {
    let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
    let ready = session.read().can_register();
    if !ready {
        return Ok(());
    }

    // Network bans gate registration, not accept: WEBIRC and ident are
    // only known now.
    let (user, host, ip, hostmask, secure) = {
        let s = session.read();
        (
            s.user.clone().unwrap_or_default(),
            s.host.clone(),
            s.ip,
            s.hostmask(),
            s.secure,
        )
    };
    if ctx.rookery.config().security.require_tls && !secure {
        ctx.send(Message::error("TLS is required on this server")).await?;
        return Err(HandlerError::Quit(Some("TLS required".to_string())));
    }
    let now = Utc::now();
    let banned = ctx
        .rookery
        .bans
        .read()
        .iter()
        .find(|b| b.matches_user(&user, &host, ip, now))
        .map(|b| b.reason.clone());
    if let Some(reason) = banned {
        info!(hostmask = %hostmask, reason = %reason, "banned user rejected at registration");
        ctx.send(Message::error(format!("You are banned from this server: {reason}")))
            .await?;
        return Err(HandlerError::Quit(Some("K-lined".to_string())));
    }

    {
        let mut s = session.write();
        s.registered = true;
    }
    crate::metrics::REGISTERED_USERS.inc();

    send_welcome_burst(ctx).await?;

    // Introduce to every directly linked server.
    let uid_msg = {
        let s = session.read();
        Message::new(
            "UID",
            vec![
                s.nick.clone().unwrap_or_default(),
                "1".to_string(),
                s.nick_ts.to_string(),
                s.user.clone().unwrap_or_default(),
                s.host.clone(),
                s.uid.clone(),
                s.ip.to_string(),
                s.modes.to_mode_string(),
                s.host.clone(),
                s.realname.clone().unwrap_or_default(),
            ],
        )
        .with_source(Source::server(&ctx.rookery.info.sid))
    };
    ctx.rookery.broadcast_servers(&uid_msg, None);
    Ok(())
}

/// The 001-005 / LUSERS / MOTD welcome sequence.
pub async fn send_welcome_burst(ctx: &Context<'_>) -> HandlerResult {
    let nick = ctx.nick_or_star();
    let info = &ctx.rookery.info;
    let config = ctx.rookery.config();

    ctx.send_numeric(
        Response::RPL_WELCOME,
        vec![format!("Welcome to the {} Network, {}", info.network, nick)],
    )
    .await?;
    ctx.send_numeric(
        Response::RPL_YOURHOST,
        vec![format!("Your host is {}, running version {}", info.name, VERSION)],
    )
    .await?;
    ctx.send_numeric(
        Response::RPL_CREATED,
        vec![format!(
            "This server was created {}",
            ctx.rookery.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )],
    )
    .await?;
    ctx.send_numeric(
        Response::RPL_MYINFO,
        vec![
            info.name.clone(),
            VERSION.to_string(),
            "iwoBZ".to_string(),
            "beIiklmnprst".to_string(),
        ],
    )
    .await?;

    let limits = &config.limits;
    let tokens = vec![
        format!("NETWORK={}", info.network),
        "CASEMAPPING=rfc1459".to_string(),
        "CHANTYPES=#".to_string(),
        "PREFIX=(ohv)@%+".to_string(),
        "CHANMODES=beI,k,l,imnprst".to_string(),
        format!("NICKLEN={}", limits.max_nick_length),
        format!("CHANNELLEN={}", limits.max_channel_length),
        format!("TOPICLEN={}", limits.max_topic_length),
        format!("MAXTARGETS={}", limits.max_targets),
        "MODES=4".to_string(),
    ];
    let mut params = tokens;
    params.push("are supported by this server".to_string());
    ctx.send_numeric(Response::RPL_ISUPPORT, params).await?;

    super::server_query::send_lusers(ctx).await?;
    super::server_query::send_motd(ctx).await?;
    Ok(())
}
