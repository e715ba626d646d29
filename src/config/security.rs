//! Security configuration: cloaking, STS, rate-limit buckets.

use serde::Deserialize;

/// The `[security]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// Require TLS for client registration.
    #[serde(default)]
    pub require_tls: bool,
    /// Advertise the `sts` capability.
    #[serde(default)]
    pub enable_sts: bool,
    /// STS policy duration in seconds.
    #[serde(default = "default_sts_duration")]
    pub sts_duration_secs: u64,
    /// HMAC key for hostname cloaking. Weak values are rejected at startup.
    #[serde(default)]
    pub cloak_secret: String,
    /// Suffix appended to cloaked hosts.
    #[serde(default = "default_cloak_suffix")]
    pub cloak_suffix: String,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_sts_duration() -> u64 {
    30 * 86400
}

fn default_cloak_suffix() -> String {
    "ip".to_string()
}

/// Token-bucket parameters for the three limiter families.
///
/// Rates are tokens per second; bursts are bucket capacities.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// New connections per source IP.
    #[serde(default = "default_connection_rate")]
    pub connection_rate: f64,
    #[serde(default = "default_connection_burst")]
    pub connection_burst: u32,
    /// Commands per connection.
    #[serde(default = "default_command_rate")]
    pub command_rate: f64,
    #[serde(default = "default_command_burst")]
    pub command_burst: u32,
    /// PRIVMSG/NOTICE per connection.
    #[serde(default = "default_message_rate")]
    pub message_rate: f64,
    #[serde(default = "default_message_burst")]
    pub message_burst: u32,
    /// CIDRs that bypass every bucket.
    #[serde(default)]
    pub exempt_cidrs: Vec<String>,
}

fn default_connection_rate() -> f64 {
    0.5
}
fn default_connection_burst() -> u32 {
    3
}
fn default_command_rate() -> f64 {
    10.0
}
fn default_command_burst() -> u32 {
    20
}
fn default_message_rate() -> f64 {
    3.0
}
fn default_message_burst() -> u32 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            connection_rate: default_connection_rate(),
            connection_burst: default_connection_burst(),
            command_rate: default_command_rate(),
            command_burst: default_command_burst(),
            message_rate: default_message_rate(),
            message_burst: default_message_burst(),
            exempt_cidrs: Vec::new(),
        }
    }
}
