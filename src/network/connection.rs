//! The per-connection driver.
//!
//! Each accepted client runs one task that owns both halves of the
//! transport: inbound lines go through the parser and dispatcher, and the
//! bounded outbound queue is drained strictly FIFO, which gives each
//! connection its byte-ordering guarantee. Timers handle the ping
//! schedule and the registration timeout; the kill switch and the global
//! shutdown token end the loop from outside.

use super::transport::LineTransport;
use crate::error::HandlerError;
use crate::handlers::{Context, Registry};
use crate::state::{ConnHandle, Rookery, Session};
use munin_proto::{Message, Source};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

/// Outbound queue depth per client. With ~128-byte lines this is in the
/// ballpark of the configured client SendQ.
const CLIENT_QUEUE_DEPTH: usize = 512;

/// How the loop ended, for the teardown path.
enum Exit {
    Quit(String),
    Killed(String),
    Transport,
    Shutdown,
    Timeout(&'static str),
}

/// Drive one client connection to completion. Consumes the transport.
pub async fn run_client(
    mut transport: Box<dyn LineTransport>,
    rookery: Arc<Rookery>,
    registry: Arc<Registry>,
    ip: IpAddr,
    secure: bool,
    cert_fingerprint: Option<String>,
) {
    let uid = rookery.uid_gen.next_uid();

    let mut session = Session::new(uid.clone(), ip, secure);
    session.cert_fingerprint = cert_fingerprint;
    // Hide the real host behind the cloak from the first byte.
    {
        let config = rookery.config();
        if !config.security.cloak_secret.is_empty() {
            session.host = crate::security::cloaking::cloak_ip(
                &config.security.cloak_secret,
                &config.security.cloak_suffix,
                ip,
            );
        }
    }
    rookery
        .sessions
        .insert(uid.clone(), Arc::new(RwLock::new(session)));

    let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_QUEUE_DEPTH);
    let (kill_tx, mut kill_rx) = watch::channel::<Option<String>>(None);
    rookery
        .senders
        .insert(uid.clone(), ConnHandle { tx, kill: kill_tx });
    crate::metrics::ACTIVE_CONNECTIONS.inc();
    debug!(uid = %uid, %ip, secure, "client connection accepted");

    let (ping_timeout, registration_timeout) = {
        let limits = &rookery.config().limits;
        (
            Duration::from_secs(limits.ping_timeout_secs),
            Duration::from_secs(limits.registration_timeout_secs),
        )
    };

    let mut shutdown_rx = rookery.shutdown.subscribe();
    let mut timer = tokio::time::interval(Duration::from_secs(5));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let exit = loop {
        tokio::select! {
            inbound = transport.next_line() => {
                match inbound {
                    None => break Exit::Transport,
                    Some(Err(e)) => {
                        trace!(uid = %uid, error = %e, "transport error");
                        break Exit::Transport;
                    }
                    Some(Ok(line)) => {
                        if let Some(session) = rookery.sessions.get(&uid) {
                            session.value().write().touch();
                        }
                        // The parser never fails the connection; bad lines
                        // are logged and dropped.
                        let msg: Message = match line.parse() {
                            Ok(msg) => msg,
                            Err(e) => {
                                debug!(uid = %uid, error = %e, "unparseable line discarded");
                                continue;
                            }
                        };
                        let mut ctx = Context {
                            rookery: &rookery,
                            registry: &registry,
                            uid: uid.clone(),
                        };
                        match registry.dispatch(&mut ctx, &msg).await {
                            Ok(()) => {}
                            Err(HandlerError::Quit(reason)) => {
                                break Exit::Quit(reason.unwrap_or_else(|| "Client Quit".into()));
                            }
                            Err(HandlerError::Send(_)) => break Exit::Transport,
                            Err(e) => {
                                let nick = ctx.nick_or_star();
                                if let Some(reply) =
                                    e.to_irc_reply(&rookery.info.name, &nick, &msg.command)
                                {
                                    if transport.send_line(&reply.to_string()).await.is_err() {
                                        break Exit::Transport;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if transport.send_line(&msg.to_string()).await.is_err() {
                            break Exit::Transport;
                        }
                    }
                    None => break Exit::Transport,
                }
            }
            _ = kill_rx.changed() => {
                let reason = kill_rx.borrow().clone();
                if let Some(reason) = reason {
                    break Exit::Killed(reason);
                }
            }
            _ = shutdown_rx.recv() => break Exit::Shutdown,
            _ = timer.tick() => {
                if let Some(reason) = check_timers(&rookery, &uid, ping_timeout, registration_timeout) {
                    match reason {
                        TimerAction::SendPing => {
                            let ping = Message::ping(rookery.info.name.clone());
                            if transport.send_line(&ping.to_string()).await.is_err() {
                                break Exit::Transport;
                            }
                        }
                        TimerAction::Close(why) => break Exit::Timeout(why),
                    }
                }
            }
        }
    };

    // Drain anything already queued so close-time messages arrive.
    while let Ok(msg) = rx.try_recv() {
        if transport.send_line(&msg.to_string()).await.is_err() {
            break;
        }
    }

    let (reason, notify_network) = match exit {
        Exit::Quit(reason) => {
            let full = format!("Quit: {reason}");
            let _ = transport
                .send_line(&Message::error("Closing Link").to_string())
                .await;
            (full, true)
        }
        Exit::Killed(reason) => {
            let _ = transport
                .send_line(&Message::error(reason.clone()).to_string())
                .await;
            (reason, true)
        }
        Exit::Timeout(reason) => {
            let _ = transport
                .send_line(&Message::error(reason).to_string())
                .await;
            (reason.to_string(), true)
        }
        Exit::Shutdown => {
            let _ = transport
                .send_line(&Message::error("Server shutting down").to_string())
                .await;
            ("Server shutting down".to_string(), false)
        }
        Exit::Transport => ("Connection reset by peer".to_string(), true),
    };
    transport.shutdown().await;

    let was_registered = rookery
        .sessions
        .get(&uid)
        .map(|s| s.value().read().registered)
        .unwrap_or(false);
    if was_registered && notify_network {
        rookery.broadcast_servers(
            &Message::new("QUIT", vec![reason.clone()]).with_source(Source::server(&uid)),
            None,
        );
    }
    rookery.remove_session(&uid, &reason);
    info!(uid = %uid, reason = %reason, "client connection closed");
}

enum TimerAction {
    SendPing,
    Close(&'static str),
}

/// Ping/registration timeout discipline, evaluated every timer tick.
fn check_timers(
    rookery: &Rookery,
    uid: &str,
    ping_timeout: Duration,
    registration_timeout: Duration,
) -> Option<TimerAction> {
    let session = rookery.sessions.get(uid)?;
    let mut s = session.value().write();

    if !s.registered {
        let age = chrono::Utc::now() - s.connected_at;
        if age > chrono::Duration::from_std(registration_timeout).ok()? {
            return Some(TimerAction::Close("Registration timeout"));
        }
        return None;
    }

    if let Some(sent) = s.ping_sent {
        if sent.elapsed() > ping_timeout {
            return Some(TimerAction::Close("Ping timeout"));
        }
        return None;
    }
    if s.last_activity.elapsed() > ping_timeout {
        s.ping_sent = Some(std::time::Instant::now());
        return Some(TimerAction::SendPing);
    }
    None
}
