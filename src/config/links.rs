//! Server-to-server link configuration.

use serde::Deserialize;

/// Link block configuration for one remote server.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkBlock {
    /// Remote server name (e.g. "hub.example.org").
    pub name: String,
    /// Remote host to connect to.
    pub hostname: String,
    /// Remote port.
    pub port: u16,
    /// Password we send in our PASS line.
    pub send_password: String,
    /// Password we require in the remote's PASS line.
    pub receive_password: String,
    /// Use TLS for this link.
    #[serde(default)]
    pub tls: bool,
    /// Initiate the connection automatically and reconnect on loss.
    #[serde(default)]
    pub autoconnect: bool,
    /// Expected remote SID, checked during the handshake when set.
    #[serde(default)]
    pub sid: Option<String>,
    /// Initial reconnect delay in seconds.
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_secs: u64,
    /// Backoff multiplier applied per failed attempt.
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,
    /// Backoff ceiling in seconds.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
    /// Give up after this many attempts; `None` retries forever.
    #[serde(default)]
    pub reconnect_attempts: Option<u32>,
}

fn default_reconnect_initial() -> u64 {
    10
}
fn default_reconnect_multiplier() -> f64 {
    2.0
}
fn default_reconnect_max() -> u64 {
    600
}
