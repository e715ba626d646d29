//! Protocol limits.

use serde::Deserialize;

/// The `[limits]` section. Every field has a sane default so the section
/// can be omitted entirely.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_nick_length")]
    pub max_nick_length: usize,
    #[serde(default = "default_max_channel_length")]
    pub max_channel_length: usize,
    #[serde(default = "default_max_topic_length")]
    pub max_topic_length: usize,
    /// Maximum channels a user may occupy.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,
    /// Maximum targets per PRIVMSG/NOTICE.
    #[serde(default = "default_max_targets")]
    pub max_targets: usize,
    /// Seconds of silence before we probe with PING, and again before the
    /// probe is considered failed.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    /// Seconds an unregistered connection may linger.
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_secs: u64,
    /// Outstanding bytes before a client is a "slow client".
    #[serde(default = "default_sendq_client")]
    pub sendq_client_bytes: usize,
    /// Outstanding bytes on an S2S link before the link is dropped.
    #[serde(default = "default_sendq_server")]
    pub sendq_server_bytes: usize,
}

fn default_max_nick_length() -> usize {
    30
}
fn default_max_channel_length() -> usize {
    64
}
fn default_max_topic_length() -> usize {
    390
}
fn default_max_channels() -> usize {
    50
}
fn default_max_targets() -> usize {
    4
}
fn default_ping_timeout() -> u64 {
    120
}
fn default_registration_timeout() -> u64 {
    30
}
fn default_sendq_client() -> usize {
    64 * 1024
}
fn default_sendq_server() -> usize {
    4 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_nick_length: default_max_nick_length(),
            max_channel_length: default_max_channel_length(),
            max_topic_length: default_max_topic_length(),
            max_channels: default_max_channels(),
            max_targets: default_max_targets(),
            ping_timeout_secs: default_ping_timeout(),
            registration_timeout_secs: default_registration_timeout(),
            sendq_client_bytes: default_sendq_client(),
            sendq_server_bytes: default_sendq_server(),
        }
    }
}
