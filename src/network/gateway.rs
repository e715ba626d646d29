//! Listener bootstrap and accept loops.

use super::connection::run_client;
use super::transport::FramedTransport;
use crate::handlers::Registry;
use crate::state::Rookery;
use munin_proto::LineCodec;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Owns every client-facing listener task.
pub struct Gateway {
    rookery: Arc<Rookery>,
}

impl Gateway {
    /// Bind all configured client and WebSocket listeners and start their
    /// accept loops.
    pub async fn bind(rookery: Arc<Rookery>, registry: Arc<Registry>) -> anyhow::Result<Gateway> {
        let config = rookery.config();

        let acceptor = match &config.tls {
            Some(tls) => Some(super::tls::build_acceptor(tls)?),
            None => None,
        };

        for listen in &config.listen {
            let listener = tokio::net::TcpListener::bind(listen.addr).await?;
            info!(addr = %listen.addr, tls = listen.tls, "client listener bound");
            let acceptor = if listen.tls { acceptor.clone() } else { None };
            tokio::spawn(accept_loop(
                listener,
                acceptor,
                rookery.clone(),
                registry.clone(),
            ));
        }

        for ws in &config.websocket {
            let listener = tokio::net::TcpListener::bind(ws.addr).await?;
            info!(addr = %ws.addr, path = %ws.path, tls = ws.tls, "websocket listener bound");
            let acceptor = if ws.tls { acceptor.clone() } else { None };
            tokio::spawn(super::websocket::accept_loop(
                listener,
                acceptor,
                ws.clone(),
                rookery.clone(),
                registry.clone(),
            ));
        }

        Ok(Gateway { rookery })
    }

    /// Block until shutdown is signalled. Accept loops stop themselves on
    /// the same signal; connection tasks flush and close.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut shutdown_rx = self.rookery.shutdown.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("gateway stopping");
        Ok(())
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    acceptor: Option<TlsAcceptor>,
    rookery: Arc<Rookery>,
    registry: Arc<Registry>,
) {
    let mut shutdown_rx = rookery.shutdown.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                };
                // Connections-per-IP bucket; refusal is a silent close.
                if !rookery.rate_limiter.check_connection(addr.ip()) {
                    debug!(ip = %addr.ip(), "connection rejected by rate limit");
                    continue;
                }
                let _ = stream.set_nodelay(true);

                let rookery = rookery.clone();
                let registry = registry.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                let fingerprint = super::tls::peer_fingerprint(&tls_stream);
                                let transport = Box::new(FramedTransport::new(
                                    tls_stream,
                                    LineCodec::client(),
                                ));
                                run_client(transport, rookery, registry, addr.ip(), true, fingerprint)
                                    .await;
                            }
                            Err(e) => {
                                debug!(ip = %addr.ip(), error = %e, "TLS handshake failed");
                            }
                        },
                        None => {
                            let transport =
                                Box::new(FramedTransport::new(stream, LineCodec::client()));
                            run_client(transport, rookery, registry, addr.ip(), false, None).await;
                        }
                    }
                });
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}
