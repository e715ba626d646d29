//! Handler plumbing: execution context, handler trait, and the dispatch
//! registry.

use crate::error::{HandlerError, HandlerResult};
use crate::state::{Rookery, Session};
use async_trait::async_trait;
use munin_proto::{Message, Response, Source};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Everything a handler needs for one command.
pub struct Context<'a> {
    pub rookery: &'a Arc<Rookery>,
    pub registry: &'a Registry,
    pub uid: String,
}

impl Context<'_> {
    /// Per-command usage counters, for STATS m.
    pub fn registry_stats(&self) -> Vec<(&'static str, u64)> {
        self.registry.command_stats()
    }

    /// This connection's session. `None` only during teardown races.
    pub fn session(&self) -> Option<Arc<RwLock<Session>>> {
        self.rookery.sessions.get(&self.uid).map(|e| e.value().clone())
    }

    /// Nick for numerics, `*` before registration.
    pub fn nick_or_star(&self) -> String {
        self.session()
            .map(|s| s.read().nick_or_star())
            .unwrap_or_else(|| "*".to_string())
    }

    pub fn server_name(&self) -> String {
        self.rookery.info.name.clone()
    }

    /// Queue a message for this connection, respecting its backpressure.
    pub async fn send(&self, msg: Message) -> HandlerResult {
        let tx = self
            .rookery
            .senders
            .get(&self.uid)
            .map(|h| h.tx.clone())
            .ok_or_else(|| HandlerError::Internal("connection gone".into()))?;
        tx.send(msg).await?;
        Ok(())
    }

    /// Build a numeric reply addressed to this connection's nick.
    pub fn numeric(&self, response: Response, params: Vec<String>) -> Message {
        let mut all = vec![self.nick_or_star()];
        all.extend(params);
        Message {
            tags: None,
            source: Some(Source::server(&self.rookery.info.name)),
            command: response.code_string(),
            params: all,
        }
    }

    /// Send a numeric reply.
    pub async fn send_numeric(&self, response: Response, params: Vec<String>) -> HandlerResult {
        self.send(self.numeric(response, params)).await
    }

    /// This session's full source, for echoing its own actions.
    pub fn source(&self) -> Source {
        self.session()
            .map(|s| s.read().source())
            .unwrap_or_else(|| Source::server(&self.rookery.info.name))
    }
}

/// One command handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Whether the command is honored before registration. Everything
    /// else gets ERR_NOTREGISTERED until the welcome burst.
    fn pre_registration(&self) -> bool {
        false
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult;
}

/// Registry of client-command handlers.
pub struct Registry {
    handlers: HashMap<&'static str, Box<dyn Handler>>,
    /// Per-command usage counters for STATS m.
    command_counts: HashMap<&'static str, Arc<AtomicU64>>,
}

impl Registry {
    /// Build a registry from a handler table. The full table lives in
    /// [`crate::handlers::registry_with_defaults`].
    pub fn new(handlers: HashMap<&'static str, Box<dyn Handler>>) -> Registry {
        let mut command_counts = HashMap::new();
        for &cmd in handlers.keys() {
            command_counts.insert(cmd, Arc::new(AtomicU64::new(0)));
        }
        Registry {
            handlers,
            command_counts,
        }
    }

    /// Command usage statistics for STATS m, most-used first.
    pub fn command_stats(&self) -> Vec<(&'static str, u64)> {
        let mut stats: Vec<_> = self
            .command_counts
            .iter()
            .map(|(cmd, count)| (*cmd, count.load(Ordering::Relaxed)))
            .filter(|(_, count)| *count > 0)
            .collect();
        stats.sort_by(|a, b| b.1.cmp(&a.1));
        stats
    }

    /// Dispatch one parsed message from a registered-or-not client
    /// connection. Applies the registration gate and both rate-limit
    /// buckets before the handler runs.
    pub async fn dispatch(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let cmd_name = msg.command.clone();
        crate::metrics::COMMANDS_PROCESSED.inc();

        let (registered, ip) = match ctx.session() {
            Some(session) => {
                let s = session.read();
                (s.registered, s.ip)
            }
            None => return Ok(()),
        };

        let handler = self.handlers.get(cmd_name.as_str());

        // Registration gate: outside the whitelist, nothing runs before
        // the welcome burst - including unknown commands.
        let pre_ok = handler.map(|h| h.pre_registration()).unwrap_or(false);
        if !registered && !pre_ok {
            return Err(HandlerError::NotRegistered);
        }

        let Some(handler) = handler else {
            ctx.send(ctx.numeric(
                Response::ERR_UNKNOWNCOMMAND,
                vec![cmd_name.clone(), "Unknown command".to_string()],
            ))
            .await?;
            return Ok(());
        };

        // Token buckets: every command drains the command bucket, and
        // PRIVMSG/NOTICE additionally drain the message bucket. A drained
        // bucket drops the command with 263; never a disconnect.
        if !self.rate_limit_ok(ctx, &cmd_name, ip) {
            return Err(HandlerError::RateLimited);
        }

        if let Some(counter) = self.command_counts.get(cmd_name.as_str()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let result = handler.handle(ctx, msg).await;
        if let Err(ref e) = result {
            debug!(command = %cmd_name, uid = %ctx.uid, error = %e, error_code = e.error_code(), "command error");
        }
        result
    }

    fn rate_limit_ok(&self, ctx: &Context<'_>, cmd_name: &str, ip: std::net::IpAddr) -> bool {
        // PONG must never be throttled or ping probes become fatal.
        if cmd_name == "PONG" {
            return true;
        }
        if !ctx.rookery.rate_limiter.check_command(&ctx.uid, ip) {
            return false;
        }
        if matches!(cmd_name, "PRIVMSG" | "NOTICE")
            && !ctx.rookery.rate_limiter.check_message(&ctx.uid, ip)
        {
            return false;
        }
        true
    }
}
