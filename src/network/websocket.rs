//! WebSocket client transport.
//!
//! HTTP upgrade at the configured path; the Origin header is checked
//! against the listener's allow-list (exact or `*.domain`). Each text
//! frame may carry several `\n`-separated IRC lines; binary frames are
//! ignored.

use super::connection::run_client;
use super::transport::WsTransport;
use crate::config::WebSocketConfig;
use crate::handlers::Registry;
use crate::state::Rookery;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error};

pub async fn accept_loop(
    listener: tokio::net::TcpListener,
    acceptor: Option<TlsAcceptor>,
    ws_config: WebSocketConfig,
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
                        error!(error = %e, "websocket accept failed");
                        continue;
                    }
                };
                if !rookery.rate_limiter.check_connection(addr.ip()) {
                    debug!(ip = %addr.ip(), "websocket connection rejected by rate limit");
                    continue;
                }

                let rookery = rookery.clone();
                let registry = registry.clone();
                let ws_config = ws_config.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                let fingerprint = super::tls::peer_fingerprint(&tls_stream);
                                serve(tls_stream, ws_config, rookery, registry, addr.ip(), true, fingerprint)
                                    .await;
                            }
                            Err(e) => {
                                debug!(ip = %addr.ip(), error = %e, "websocket TLS handshake failed");
                            }
                        },
                        None => {
                            serve(stream, ws_config, rookery, registry, addr.ip(), false, None).await;
                        }
                    }
                });
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

async fn serve<S>(
    stream: S,
    ws_config: WebSocketConfig,
    rookery: Arc<Rookery>,
    registry: Arc<Registry>,
    ip: std::net::IpAddr,
    secure: bool,
    cert_fingerprint: Option<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let path = ws_config.path.clone();
    let origins = ws_config.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != path {
            return Err(error_response(StatusCode::NOT_FOUND));
        }
        if let Some(origin) = req
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok())
        {
            if !origins.origin_allowed(origin) {
                return Err(error_response(StatusCode::FORBIDDEN));
            }
        }
        Ok(resp)
    };

    match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => {
            let transport = Box::new(WsTransport::new(ws_stream));
            run_client(transport, rookery, registry, ip, secure, cert_fingerprint).await;
        }
        Err(e) => {
            debug!(%ip, error = %e, "websocket handshake rejected");
        }
    }
}

fn error_response(status: StatusCode) -> ErrorResponse {
    let mut resp = ErrorResponse::new(None);
    *resp.status_mut() = status;
    resp
}
