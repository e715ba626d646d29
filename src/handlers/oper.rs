//! Operator commands: OPER, KILL, WALLOPS, REHASH, DIE, RESTART, SQUIT,
//! CONNECT, TRACE.

use super::core::{Context, Handler};
use super::helpers::{require_oper, require_params};
use crate::error::{HandlerError, HandlerResult};
use crate::security::password;
use async_trait::async_trait;
use munin_proto::{mask_match, Message, Response, Source};
use tracing::{info, warn};

pub struct OperHandler;

#[async_trait]
impl Handler for OperHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_params(msg, 2)?;
        crate::metrics::AUTH_ATTEMPTS.inc();
        let (name, pass) = (&msg.params[0], &msg.params[1]);

        let session = ctx.session().ok_or(HandlerError::NotRegistered)?;
        let hostmask = session.read().hostmask();

        let config = ctx.rookery.config();
        let block = config.opers.iter().find(|block| {
            &block.name == name
                && (block.hostmasks.is_empty()
                    || block.hostmasks.iter().any(|m| mask_match(m, &hostmask)))
        });

        // A missing block and a wrong password are indistinguishable.
        let authenticated = block
            .map(|b| password::verify_password(pass, &b.password_hash))
            .unwrap_or_else(|| {
                let _ = password::verify_password(pass, "$argon2id$burn");
                false
            });

        if !authenticated {
            warn!(oper = %name, hostmask = %hostmask, "failed OPER attempt");
            return ctx
                .send_numeric(
                    Response::ERR_PASSWDMISMATCH,
                    vec!["Password incorrect".to_string()],
                )
                .await;
        }

        let nick = {
            let mut s = session.write();
            s.modes.oper = true;
            s.oper_name = Some(name.clone());
            s.nick_or_star()
        };
        info!(oper = %name, nick = %nick, "operator authenticated");

        ctx.send_numeric(
            Response::RPL_YOUREOPER,
            vec!["You are now an IRC operator".to_string()],
        )
        .await?;
        ctx.send(
            Message::new("MODE", vec![nick, "+o".to_string()]).with_source(ctx.source()),
        )
        .await?;
        ctx.rookery.broadcast_servers(
            &Message::new("MODE", vec![ctx.uid.clone(), "+o".to_string()])
                .with_source(Source::server(&ctx.uid)),
            None,
        );
        Ok(())
    }
}

pub struct KillHandler;

#[async_trait]
impl Handler for KillHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_oper(ctx)?;
        require_params(msg, 2)?;
        let (target, reason) = (&msg.params[0], msg.params[1].clone());

        let Some(target_uid) = ctx.rookery.uid_by_nick(target) else {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHNICK,
                    vec![target.clone(), "No such nick/channel".to_string()],
                )
                .await;
        };
        if ctx
            .rookery
            .remotes
            .get(&target_uid)
            .is_some_and(|r| r.is_service)
        {
            return ctx
                .send_numeric(
                    Response::ERR_CANTKILLSERVER,
                    vec!["You can't kill a service".to_string()],
                )
                .await;
        }

        let killer = ctx.nick_or_star();
        let full_reason = format!("Killed ({killer} ({reason}))");
        info!(target = %target, by = %killer, reason = %reason, "KILL");

        // KILL floods the whole network; every server drops the user.
        ctx.rookery.broadcast_servers(
            &Message::new("KILL", vec![target_uid.clone(), full_reason.clone()])
                .with_source(Source::server(&ctx.uid)),
            None,
        );

        if ctx.rookery.is_local_uid(&target_uid) {
            ctx.rookery.kill_connection(&target_uid, &full_reason);
        } else {
            ctx.rookery.remove_remote_user(&target_uid, &full_reason);
        }
        Ok(())
    }
}

pub struct WallopsHandler;

#[async_trait]
impl Handler for WallopsHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_oper(ctx)?;
        require_params(msg, 1)?;
        let text = msg.params[0].clone();
        let wallops = Message::new("WALLOPS", vec![text.clone()]).with_source(ctx.source());

        for entry in ctx.rookery.sessions.iter() {
            let wants = {
                let s = entry.value().read();
                s.modes.wallops || s.modes.oper
            };
            if wants {
                ctx.rookery.send(entry.key(), wallops.clone());
            }
        }
        ctx.rookery.broadcast_servers(
            &Message::new("WALLOPS", vec![text]).with_source(Source::server(&ctx.uid)),
            None,
        );
        Ok(())
    }
}

pub struct RehashHandler;

#[async_trait]
impl Handler for RehashHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        require_oper(ctx)?;
        let path = ctx.rookery.config_path.clone();
        match crate::config::Config::load(&path) {
            Ok(new_config) => {
                if let Err(errors) = crate::config::validate(&new_config) {
                    for error in &errors {
                        warn!(error = %error, "REHASH validation failed");
                    }
                    return ctx
                        .send_numeric(
                            Response::RPL_REHASHING,
                            vec![path, "Rehash failed validation; kept old config".to_string()],
                        )
                        .await;
                }
                ctx.rookery.rehash(new_config);
                info!(path = %path, "configuration rehashed");
                ctx.send_numeric(Response::RPL_REHASHING, vec![path, "Rehashing".to_string()])
                    .await
            }
            Err(e) => {
                warn!(error = %e, "REHASH failed to load config");
                ctx.send_numeric(
                    Response::RPL_REHASHING,
                    vec![path, format!("Rehash failed: {e}")],
                )
                .await
            }
        }
    }
}

pub struct DieHandler;

#[async_trait]
impl Handler for DieHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        require_oper(ctx)?;
        info!(by = %ctx.nick_or_star(), "DIE: shutting down");
        let _ = ctx.rookery.shutdown.send(());
        Ok(())
    }
}

pub struct RestartHandler;

#[async_trait]
impl Handler for RestartHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        require_oper(ctx)?;
        info!(by = %ctx.nick_or_star(), "RESTART: shutting down for supervisor restart");
        // The process manager is responsible for bringing us back.
        let _ = ctx.rookery.shutdown.send(());
        Ok(())
    }
}

pub struct SquitHandler;

#[async_trait]
impl Handler for SquitHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_oper(ctx)?;
        require_params(msg, 1)?;
        let target = msg.params[0].clone();
        let reason = msg.param(1).unwrap_or("Operator SQUIT").to_string();

        // Cancel any scheduled reconnection for this link block first, so
        // the split does not immediately heal itself.
        if let Some(cancel) = ctx.rookery.reconnect_cancels.get(&target) {
            let _ = cancel.value().send(true);
        }

        let Some(sid) = ctx.rookery.topology.sid_by_name(&target) else {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHSERVER,
                    vec![target, "No such server".to_string()],
                )
                .await;
        };

        info!(server = %target, by = %ctx.nick_or_star(), reason = %reason, "operator SQUIT");
        if let Some(link) = ctx.rookery.links.get(&sid) {
            // Direct link: closing it triggers the netsplit path.
            link.value().close(&reason);
        } else {
            // Remote server: route an SQUIT toward it.
            ctx.rookery.send_server(
                &sid,
                Message::new("SQUIT", vec![target, reason]).with_source(Source::server(&ctx.uid)),
            );
        }
        Ok(())
    }
}

pub struct ConnectHandler;

#[async_trait]
impl Handler for ConnectHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        require_oper(ctx)?;
        require_params(msg, 1)?;
        let target = msg.params[0].clone();

        let config = ctx.rookery.config();
        let block = config.links.iter().find(|l| l.name == target).cloned();
        let Some(block) = block else {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHSERVER,
                    vec![target, "No such server configured".to_string()],
                )
                .await;
        };
        if ctx.rookery.topology.contains_name(&block.name) {
            return ctx
                .send_numeric(
                    Response::ERR_NOSUCHSERVER,
                    vec![block.name, "Already linked".to_string()],
                )
                .await;
        }

        info!(server = %block.name, by = %ctx.nick_or_star(), "operator CONNECT");
        crate::sync::manager::spawn_outbound(ctx.rookery.clone(), block, false);
        Ok(())
    }
}

pub struct TraceHandler;

#[async_trait]
impl Handler for TraceHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        require_oper(ctx)?;
        for server in ctx.rookery.topology.all() {
            ctx.send_numeric(
                Response::RPL_TRACESERVER,
                vec![
                    "Serv".to_string(),
                    server.name,
                    format!("hops {}", server.hop_count),
                ],
            )
            .await?;
        }
        ctx.send_numeric(
            Response::RPL_TRACEEND,
            vec![
                ctx.rookery.info.name.clone(),
                "End of TRACE".to_string(),
            ],
        )
        .await
    }
}
