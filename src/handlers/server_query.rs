//! Server queries: MOTD, LUSERS, VERSION, TIME, INFO, ADMIN, STATS, LINKS.

use super::connection::VERSION;
use super::core::{Context, Handler};
use crate::error::HandlerResult;
use async_trait::async_trait;
use munin_proto::{Message, Response};

pub struct MotdHandler;

#[async_trait]
impl Handler for MotdHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        send_motd(ctx).await
    }
}

/// 375/372/376, or 422 when no MOTD is configured.
pub async fn send_motd(ctx: &Context<'_>) -> HandlerResult {
    let lines = ctx.rookery.motd_lines();
    if lines.is_empty() {
        return ctx
            .send_numeric(Response::ERR_NOMOTD, vec!["MOTD File is missing".to_string()])
            .await;
    }
    ctx.send_numeric(
        Response::RPL_MOTDSTART,
        vec![format!("- {} Message of the day -", ctx.rookery.info.name)],
    )
    .await?;
    for line in lines {
        ctx.send_numeric(Response::RPL_MOTD, vec![format!("- {line}")])
            .await?;
    }
    ctx.send_numeric(Response::RPL_ENDOFMOTD, vec!["End of /MOTD command".to_string()])
        .await
}

pub struct LusersHandler;

#[async_trait]
impl Handler for LusersHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        send_lusers(ctx).await
    }
}

/// The LUSERS block, shared with the welcome burst.
pub async fn send_lusers(ctx: &Context<'_>) -> HandlerResult {
    let local = ctx.rookery.sessions.len();
    let remote = ctx
        .rookery
        .remotes
        .iter()
        .filter(|e| !e.value().is_service)
        .count();
    let total = local + remote;
    let opers = ctx
        .rookery
        .sessions
        .iter()
        .filter(|e| e.value().read().modes.oper)
        .count();
    let channels = ctx.rookery.channels.len();
    let servers = ctx.rookery.topology.len();
    let direct = ctx.rookery.links.len();

    ctx.send_numeric(
        Response::RPL_LUSERCLIENT,
        vec![format!(
            "There are {total} users on {servers} servers"
        )],
    )
    .await?;
    if opers > 0 {
        ctx.send_numeric(
            Response::RPL_LUSEROP,
            vec![opers.to_string(), "operator(s) online".to_string()],
        )
        .await?;
    }
    if channels > 0 {
        ctx.send_numeric(
            Response::RPL_LUSERCHANNELS,
            vec![channels.to_string(), "channels formed".to_string()],
        )
        .await?;
    }
    ctx.send_numeric(
        Response::RPL_LUSERME,
        vec![format!("I have {local} clients and {direct} servers")],
    )
    .await?;
    ctx.send_numeric(
        Response::RPL_LOCALUSERS,
        vec![format!("Current local users: {local}")],
    )
    .await?;
    ctx.send_numeric(
        Response::RPL_GLOBALUSERS,
        vec![format!("Current global users: {total}")],
    )
    .await
}

pub struct VersionHandler;

#[async_trait]
impl Handler for VersionHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        ctx.send_numeric(
            Response::RPL_VERSION,
            vec![
                VERSION.to_string(),
                ctx.rookery.info.name.clone(),
                "TS6 federated IRC daemon".to_string(),
            ],
        )
        .await
    }
}

pub struct TimeHandler;

#[async_trait]
impl Handler for TimeHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        ctx.send_numeric(
            Response::RPL_TIME,
            vec![
                ctx.rookery.info.name.clone(),
                chrono::Utc::now().format("%A %B %d %Y -- %H:%M:%S UTC").to_string(),
            ],
        )
        .await
    }
}

pub struct InfoHandler;

#[async_trait]
impl Handler for InfoHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        for line in [
            format!("{VERSION}"),
            "A federated IRC daemon speaking RFC 1459/2812 and TS6".to_string(),
            format!("Running since {}", ctx.rookery.started_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ] {
            ctx.send_numeric(Response::RPL_INFO, vec![line]).await?;
        }
        ctx.send_numeric(Response::RPL_ENDOFINFO, vec!["End of /INFO list".to_string()])
            .await
    }
}

pub struct AdminHandler;

#[async_trait]
impl Handler for AdminHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        let config = ctx.rookery.config();
        ctx.send_numeric(
            Response::RPL_ADMINME,
            vec![
                ctx.rookery.info.name.clone(),
                "Administrative info".to_string(),
            ],
        )
        .await?;
        ctx.send_numeric(
            Response::RPL_ADMINLOC1,
            vec![ctx.rookery.info.description.clone()],
        )
        .await?;
        ctx.send_numeric(Response::RPL_ADMINLOC2, vec![config.server.admin_name.clone()])
            .await?;
        ctx.send_numeric(
            Response::RPL_ADMINEMAIL,
            vec![config.server.admin_email.clone()],
        )
        .await
    }
}

pub struct StatsHandler;

#[async_trait]
impl Handler for StatsHandler {
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let query = msg.param(0).unwrap_or_default().chars().next().unwrap_or(' ');
        match query {
            'u' => {
                let uptime = (chrono::Utc::now() - ctx.rookery.started_at).num_seconds();
                let (days, rem) = (uptime / 86400, uptime % 86400);
                ctx.send_numeric(
                    Response::RPL_STATSUPTIME,
                    vec![format!(
                        "Server Up {days} days {:02}:{:02}:{:02}",
                        rem / 3600,
                        (rem % 3600) / 60,
                        rem % 60
                    )],
                )
                .await?;
            }
            'm' => {
                for (command, count) in ctx.registry_stats() {
                    ctx.send_numeric(
                        Response::RPL_STATSCOMMANDS,
                        vec![command.to_string(), count.to_string()],
                    )
                    .await?;
                }
            }
            'l' => {
                for entry in ctx.rookery.links.iter() {
                    ctx.send_numeric(
                        Response::RPL_STATSCOMMANDS,
                        vec![
                            entry.value().name.clone(),
                            entry.key().clone(),
                        ],
                    )
                    .await?;
                }
            }
            _ => {}
        }
        ctx.send_numeric(
            Response::RPL_ENDOFSTATS,
            vec![query.to_string(), "End of /STATS report".to_string()],
        )
        .await
    }
}

pub struct LinksHandler;

#[async_trait]
impl Handler for LinksHandler {
    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        for server in ctx.rookery.topology.all() {
            ctx.send_numeric(
                Response::RPL_LINKS,
                vec![
                    server.name.clone(),
                    ctx.rookery.info.name.clone(),
                    format!("{} {}", server.hop_count, server.description),
                ],
            )
            .await?;
        }
        ctx.send_numeric(
            Response::RPL_ENDOFLINKS,
            vec!["*".to_string(), "End of /LINKS list".to_string()],
        )
        .await
    }
}
