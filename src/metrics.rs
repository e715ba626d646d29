//! Prometheus metrics.
//!
//! Registered once at startup and exposed through the HTTP endpoint in
//! [`crate::http`].

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Seconds since process start.
    pub static ref UPTIME_SECONDS: IntGauge = IntGauge::new(
        "irc_uptime_seconds",
        "Seconds since server start"
    ).unwrap();

    /// Currently open client connections (registered or not).
    pub static ref ACTIVE_CONNECTIONS: IntGauge = IntGauge::new(
        "irc_active_connections",
        "Currently open client connections"
    ).unwrap();

    /// Currently registered users.
    pub static ref REGISTERED_USERS: IntGauge = IntGauge::new(
        "irc_registered_users",
        "Currently registered users"
    ).unwrap();

    /// Active channels.
    pub static ref ACTIVE_CHANNELS: IntGauge = IntGauge::new(
        "irc_active_channels",
        "Active channels"
    ).unwrap();

    /// Directly linked servers.
    pub static ref LINKED_SERVERS: IntGauge = IntGauge::new(
        "irc_linked_servers",
        "Directly linked S2S peers"
    ).unwrap();

    /// Total commands processed.
    pub static ref COMMANDS_PROCESSED: IntCounter = IntCounter::new(
        "irc_commands_processed_total",
        "Total commands processed"
    ).unwrap();

    /// Total authentication attempts (SASL + OPER).
    pub static ref AUTH_ATTEMPTS: IntCounter = IntCounter::new(
        "irc_auth_attempts_total",
        "Authentication attempts"
    ).unwrap();

    /// Total rate limit hits.
    pub static ref RATE_LIMIT_HITS: IntCounter = IntCounter::new(
        "irc_rate_limit_hits_total",
        "Rate limit hits"
    ).unwrap();
}

/// Register all metrics. Must be called once before the first scrape.
pub fn init() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(UPTIME_SECONDS.clone()),
        Box::new(ACTIVE_CONNECTIONS.clone()),
        Box::new(REGISTERED_USERS.clone()),
        Box::new(ACTIVE_CHANNELS.clone()),
        Box::new(LINKED_SERVERS.clone()),
        Box::new(COMMANDS_PROCESSED.clone()),
        Box::new(AUTH_ATTEMPTS.clone()),
        Box::new(RATE_LIMIT_HITS.clone()),
    ];
    for c in collectors {
        // Double-registration only happens in tests; ignore it.
        let _ = REGISTRY.register(c);
    }
}

/// Gather all metrics in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_registered_series() {
        init();
        COMMANDS_PROCESSED.inc();
        RATE_LIMIT_HITS.inc();
        let text = gather_metrics();
        assert!(text.contains("irc_commands_processed_total"));
        assert!(text.contains("irc_rate_limit_hits_total"));
        assert!(text.contains("# TYPE"));
    }
}
