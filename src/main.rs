//! Daemon entry point: configuration, state bootstrap, listeners,
//! background maintenance, shutdown.

use munind::config::Config;
use munind::db::Database;
use munind::network::Gateway;
use munind::state::Rookery;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path; defaults to
/// `config.toml`.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    // Canonicalize so REHASH does not depend on the working directory.
    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: failed to load config from {config_path}: {e}");
        e
    })?;

    munind::telemetry::init(config.server.log_format);

    if let Err(errors) = munind::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }
        anyhow::bail!("configuration validation failed with {} error(s)", errors.len());
    }

    // Refuse to run with a guessable cloak secret unless cloaking is off.
    if !config.security.cloak_secret.is_empty()
        && munind::security::cloaking::is_weak_secret(&config.security.cloak_secret)
    {
        anyhow::bail!(
            "security.cloak_secret is weak; generate one with `openssl rand -hex 32`"
        );
    }

    info!(
        server = %config.server.name,
        network = %config.server.network,
        sid = %config.server.sid,
        "starting munind"
    );

    let db = Database::open(&config.database.path, config.database.run_migrations).await?;
    let retention_days = config.database.message_retention_days;
    let metrics_port = config.server.metrics_port;
    let autoconnect_links: Vec<_> = config
        .links
        .iter()
        .filter(|l| l.autoconnect)
        .cloned()
        .collect();

    let (rookery, mut disconnect_rx) = Rookery::new(config, config_path, db);
    let rookery = Arc::new(rookery);

    // Network bans load into the enforcement cache before anyone connects.
    match rookery.db.bans().all_active().await {
        Ok(bans) => {
            info!(count = bans.len(), "loaded active network bans");
            *rookery.bans.write() = bans;
        }
        Err(e) => warn!(error = %e, "failed to load network bans"),
    }

    munind::services::register_services(&rookery);
    info!("service pseudo-users registered");

    // Signal handler for graceful shutdown.
    {
        let shutdown_tx = rookery.shutdown.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received, shutting down"),
                _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            }
            let _ = shutdown_tx.send(());
        });
    }

    // Deferred disconnects (slow clients, K-lines found mid-session).
    {
        let rookery = Arc::clone(&rookery);
        tokio::spawn(async move {
            while let Some((uid, reason)) = disconnect_rx.recv().await {
                rookery.kill_connection(&uid, &reason);
            }
        });
    }

    if metrics_port == 0 {
        info!("metrics disabled");
    } else {
        munind::metrics::init();
        tokio::spawn(munind::http::run_http_server(metrics_port));
        info!(port = metrics_port, "metrics endpoint started");
    }

    // Periodic maintenance: uptime gauge, ban expiry, history retention,
    // rate-limiter pruning.
    {
        let rookery = Arc::clone(&rookery);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = rookery.shutdown.subscribe();
            let mut ticks: u64 = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        ticks += 1;
                        let uptime = (chrono::Utc::now() - rookery.started_at).num_seconds();
                        munind::metrics::UPTIME_SECONDS.set(uptime);

                        // Drop expired bans from the cache each minute.
                        let now = chrono::Utc::now();
                        rookery.bans.write().retain(|b| !b.is_expired(now));

                        // Heavier work on the hour.
                        if ticks % 60 == 0 {
                            if let Ok(removed) = rookery.db.bans().prune_expired().await {
                                if removed > 0 {
                                    info!(removed, "expired bans pruned");
                                }
                            }
                            let cutoff = (chrono::Utc::now()
                                - chrono::Duration::days(i64::from(retention_days)))
                            .timestamp();
                            match rookery.db.history().prune_older_than(cutoff).await {
                                Ok(removed) if removed > 0 => {
                                    info!(removed, "old messages pruned from history");
                                }
                                Ok(_) => {}
                                Err(e) => warn!(error = %e, "history prune failed"),
                            }
                            rookery.rate_limiter.cleanup();
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    let registry = Arc::new(munind::handlers::registry_with_defaults());

    // S2S: inbound listener plus autoconnect links with backoff.
    munind::sync::manager::spawn_inbound_listeners(Arc::clone(&rookery));
    for link in autoconnect_links {
        munind::sync::manager::spawn_outbound(Arc::clone(&rookery), link, true);
    }

    let gateway = Gateway::bind(Arc::clone(&rookery), registry).await?;
    gateway.run().await?;

    info!("gateway stopped, draining connections");
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
    Ok(())
}
