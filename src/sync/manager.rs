//! Link lifecycle: outbound connections with exponential-backoff
//! reconnection, the inbound S2S listener, and the per-link event loop.

use super::burst::generate_burst;
use super::handshake::HandshakeMachine;
use super::link::{PeerHandle, PEER_QUEUE_DEPTH};
use super::protocol::PeerContext;
use super::split::handle_netsplit;
use super::topology::LinkedServer;
use crate::config::LinkBlock;
use crate::error::LinkError;
use crate::state::Rookery;
use futures_util::{SinkExt, StreamExt};
use munin_proto::{LineCodec, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Handshake must finish within this window.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Keepalive cadence on an established link.
const HEARTBEAT: Duration = Duration::from_secs(60);

/// Launch an outbound link task. With `with_backoff`, a lost link keeps
/// retrying on the block's exponential schedule until cancelled by SQUIT.
pub fn spawn_outbound(rookery: Arc<Rookery>, link: LinkBlock, with_backoff: bool) {
    tokio::spawn(async move {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        rookery
            .reconnect_cancels
            .insert(link.name.clone(), cancel_tx);

        let mut delay = Duration::from_secs(link.reconnect_initial_secs.max(1));
        let max_delay = Duration::from_secs(link.reconnect_max_secs.max(1));
        let mut attempts: u32 = 0;
        let mut had_link = false;

        loop {
            match connect_once(&rookery, &link).await {
                Ok(()) => {
                    // The link ran and then dropped; start over fresh.
                    if had_link {
                        info!(peer = %link.name, "link lost again");
                    }
                    had_link = true;
                    delay = Duration::from_secs(link.reconnect_initial_secs.max(1));
                    attempts = 0;
                }
                Err(e) => {
                    warn!(peer = %link.name, error = %e, "link attempt failed");
                }
            }

            if !with_backoff {
                break;
            }
            attempts += 1;
            if let Some(cap) = link.reconnect_attempts {
                if attempts > cap {
                    warn!(peer = %link.name, attempts, "reconnect attempt cap reached, giving up");
                    break;
                }
            }

            debug!(peer = %link.name, delay_secs = delay.as_secs(), "reconnect scheduled");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!(peer = %link.name, "reconnection cancelled");
                        break;
                    }
                }
            }
            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * link.reconnect_multiplier.max(1.0))
                    .min(max_delay.as_secs_f64()),
            );
        }
        rookery.reconnect_cancels.remove(&link.name);
    });
}

/// One outbound attempt: connect, handshake, burst, run until closed.
/// `Ok(())` means the link was established (even if it later dropped).
async fn connect_once(rookery: &Arc<Rookery>, link: &LinkBlock) -> Result<(), LinkError> {
    info!(peer = %link.name, host = %link.hostname, port = link.port, tls = link.tls, "connecting to peer");
    let stream = tokio::net::TcpStream::connect((link.hostname.as_str(), link.port)).await?;
    let _ = stream.set_nodelay(true);

    if link.tls {
        let connector = crate::network::tls::build_link_connector();
        let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(link.name.clone())
            .map_err(|_| LinkError::Protocol("bad server name for TLS".to_string()))?;
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(LinkError::Io)?;
        establish_outbound(rookery, link, tls_stream).await
    } else {
        establish_outbound(rookery, link, stream).await
    }
}

async fn establish_outbound<S>(
    rookery: &Arc<Rookery>,
    link: &LinkBlock,
    stream: S,
) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut framed = Framed::new(stream, LineCodec::server());

    // We talk first; the peer answers with its own three lines.
    for line in HandshakeMachine::local_lines(link, &rookery.info) {
        framed.send(line.to_string()).await?;
    }

    let machine = read_handshake(&mut framed).await?;
    finish_link(rookery, framed, machine, false).await
}

/// Spawn accept loops for every configured S2S listener.
pub fn spawn_inbound_listeners(rookery: Arc<Rookery>) {
    let config = rookery.config();
    let acceptor = config
        .tls
        .as_ref()
        .and_then(|tls| crate::network::tls::build_acceptor(tls).ok());

    for listen in config.listen_server.clone() {
        let rookery = rookery.clone();
        let acceptor = if listen.tls { acceptor.clone() } else { None };
        if listen.tls && acceptor.is_none() {
            warn!(addr = %listen.addr, "S2S listener wants TLS but no material is configured");
            continue;
        }
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(listen.addr).await {
                Ok(l) => l,
                Err(e) => {
                    warn!(addr = %listen.addr, error = %e, "failed to bind S2S listener");
                    return;
                }
            };
            info!(addr = %listen.addr, tls = listen.tls, "S2S listener bound");
            let mut shutdown_rx = rookery.shutdown.subscribe();
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, addr)) = accepted else { continue };
                        let _ = stream.set_nodelay(true);
                        debug!(peer_addr = %addr, "inbound S2S connection");
                        let rookery = rookery.clone();
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            let result = match acceptor {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        let framed = Framed::new(tls_stream, LineCodec::server());
                                        establish_inbound(&rookery, framed).await
                                    }
                                    Err(e) => {
                                        debug!(peer_addr = %addr, error = %e, "S2S TLS handshake failed");
                                        return;
                                    }
                                },
                                None => {
                                    let framed = Framed::new(stream, LineCodec::server());
                                    establish_inbound(&rookery, framed).await
                                }
                            };
                            if let Err(e) = result {
                                warn!(peer_addr = %addr, error = %e, "inbound link failed");
                            }
                        });
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }
}

async fn establish_inbound<S>(
    rookery: &Arc<Rookery>,
    mut framed: Framed<S, LineCodec>,
) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let machine = read_handshake(&mut framed).await?;

    // Validation happens inside finish_link; we only answer with our own
    // handshake once the peer's block is known.
    let config = rookery.config();
    let link = machine.validate(&config.links).map(|l| l.clone());
    let link = match link {
        Ok(link) => link,
        Err(e) => {
            let _ = framed.send(Message::error(e.to_string()).to_string()).await;
            return Err(e);
        }
    };
    for line in HandshakeMachine::local_lines(&link, &rookery.info) {
        framed.send(line.to_string()).await?;
    }

    finish_link(rookery, framed, machine, true).await
}

/// Collect the peer's PASS/CAPAB/SERVER, bounded by the handshake window.
async fn read_handshake<S>(
    framed: &mut Framed<S, LineCodec>,
) -> Result<HandshakeMachine, LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut machine = HandshakeMachine::new();
    let deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
    while !machine.complete() {
        let line = tokio::time::timeout_at(deadline, framed.next())
            .await
            .map_err(|_| LinkError::Protocol("handshake timeout".to_string()))?
            .ok_or_else(|| LinkError::Protocol("connection closed during handshake".to_string()))?
            .map_err(LinkError::Io)?;
        let msg: Message = line
            .parse()
            .map_err(|e| LinkError::Protocol(format!("unparseable handshake line: {e}")))?;
        machine.step(&msg)?;
    }
    Ok(machine)
}

/// Shared tail of both directions: validate, register, burst, run.
async fn finish_link<S>(
    rookery: &Arc<Rookery>,
    mut framed: Framed<S, LineCodec>,
    machine: HandshakeMachine,
    already_validated: bool,
) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if !already_validated {
        let config = rookery.config();
        if let Err(e) = machine.validate(&config.links) {
            let _ = framed.send(Message::error(e.to_string()).to_string()).await;
            return Err(e);
        }
    }
    let sid = machine.remote_sid.clone().unwrap_or_default();
    let name = machine.remote_name.clone().unwrap_or_default();
    let description = machine.remote_description.clone().unwrap_or_default();

    // Refuse anything already present in the topology.
    if rookery.topology.contains_sid(&sid) || rookery.topology.contains_name(&name) {
        let e = LinkError::AlreadyLinked(name.clone());
        let _ = framed.send(Message::error(e.to_string()).to_string()).await;
        return Err(e);
    }
    {
        let now = chrono::Utc::now();
        let bans = rookery.bans.read();
        if bans.iter().any(|b| b.matches_server(&name, now)) {
            let e = LinkError::Protocol(format!("{name} is juped"));
            let _ = framed.send(Message::error(e.to_string()).to_string()).await;
            return Err(e);
        }
    }

    let healed = rookery.reconnect_cancels.contains_key(&name);
    rookery.topology.add_server(LinkedServer {
        sid: sid.clone(),
        name: name.clone(),
        description,
        hop_count: 1,
        uplink: Some(rookery.info.sid.clone()),
        is_direct: true,
    });

    let (tx, rx) = mpsc::channel::<Message>(PEER_QUEUE_DEPTH);
    let (kill_tx, kill_rx) = watch::channel::<Option<String>>(None);
    rookery.links.insert(
        sid.clone(),
        PeerHandle::new(sid.clone(), name.clone(), tx, kill_tx),
    );
    crate::metrics::LINKED_SERVERS.inc();
    if healed {
        info!(peer = %name, sid = %sid, "netsplit healed");
    } else {
        info!(peer = %name, sid = %sid, "link established");
    }

    // Burst our world; the PING at the end asks for their PONG.
    for line in generate_burst(rookery, &sid) {
        framed.send(line.to_string()).await?;
    }

    let reason = run_link(rookery, &mut framed, &sid, &name, rx, kill_rx).await;
    info!(peer = %name, reason = %reason, "link closed");
    handle_netsplit(rookery, &sid, &reason, None);
    Ok(())
}

/// The established-link event loop.
async fn run_link<S>(
    rookery: &Arc<Rookery>,
    framed: &mut Framed<S, LineCodec>,
    sid: &str,
    name: &str,
    mut rx: mpsc::Receiver<Message>,
    mut kill_rx: watch::Receiver<Option<String>>,
) -> String
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let peer = PeerContext {
        sid: sid.to_string(),
        name: name.to_string(),
    };
    let mut shutdown_rx = rookery.shutdown.subscribe();
    let mut heartbeat = tokio::time::interval(HEARTBEAT);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            inbound = framed.next() => {
                match inbound {
                    None => return "Read error".to_string(),
                    Some(Err(e)) => return format!("Read error: {e}"),
                    Some(Ok(line)) => {
                        let msg: Message = match line.parse() {
                            Ok(msg) => msg,
                            Err(e) => {
                                debug!(peer = %name, error = %e, "unparseable S2S line discarded");
                                continue;
                            }
                        };
                        match super::protocol::dispatch(rookery, &peer, &msg).await {
                            Ok(true) => {}
                            Ok(false) => return "Closing link".to_string(),
                            Err(e) => {
                                let _ = framed
                                    .send(Message::error(e.to_string()).to_string())
                                    .await;
                                return e.to_string();
                            }
                        }
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if let Err(e) = framed.send(msg.to_string()).await {
                            return format!("Write error: {e}");
                        }
                    }
                    None => return "Closing link".to_string(),
                }
            }
            _ = kill_rx.changed() => {
                let reason = kill_rx.borrow().clone();
                if let Some(reason) = reason {
                    let _ = framed.send(Message::error(reason.clone()).to_string()).await;
                    return reason;
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = framed
                    .send(Message::error("Server shutting down").to_string())
                    .await;
                return "Server shutting down".to_string();
            }
            _ = heartbeat.tick() => {
                let ping = Message::ping(rookery.info.sid.clone())
                    .with_source(munin_proto::Source::server(&rookery.info.sid));
                if let Err(e) = framed.send(ping.to_string()).await {
                    return format!("Write error: {e}");
                }
            }
        }
    }
}
