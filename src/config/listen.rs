//! Listener configuration.

use serde::Deserialize;
use std::net::SocketAddr;

/// One TCP listener, client or S2S.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Bind address.
    pub addr: SocketAddr,
    /// Serve TLS on this listener (requires `[tls]` material).
    #[serde(default)]
    pub tls: bool,
}

/// TLS certificate material.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: String,
    /// PEM private key.
    pub key_path: String,
}

/// One WebSocket listener.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Bind address.
    pub addr: SocketAddr,
    /// HTTP upgrade path.
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Allowed `Origin` values: exact matches or `*.domain` wildcards.
    /// Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Serve TLS on this listener.
    #[serde(default)]
    pub tls: bool,
}

fn default_ws_path() -> String {
    "/".to_string()
}

impl WebSocketConfig {
    /// Check an `Origin` header value against the allow-list.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        // Compare against the host part of the origin URL.
        let host = origin
            .strip_prefix("https://")
            .or_else(|| origin.strip_prefix("http://"))
            .unwrap_or(origin);
        let host = host.split(':').next().unwrap_or(host);

        self.allowed_origins.iter().any(|allowed| {
            if allowed == "*" {
                true
            } else if let Some(suffix) = allowed.strip_prefix("*.") {
                host == suffix || host.ends_with(&format!(".{suffix}"))
            } else {
                host.eq_ignore_ascii_case(allowed)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(origins: &[&str]) -> WebSocketConfig {
        WebSocketConfig {
            addr: "127.0.0.1:8097".parse().unwrap(),
            path: "/irc".into(),
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            tls: false,
        }
    }

    #[test]
    fn empty_allowlist_accepts_all() {
        assert!(ws(&[]).origin_allowed("https://anything.example"));
    }

    #[test]
    fn exact_origin_match() {
        let cfg = ws(&["chat.example.org"]);
        assert!(cfg.origin_allowed("https://chat.example.org"));
        assert!(cfg.origin_allowed("https://chat.example.org:443"));
        assert!(!cfg.origin_allowed("https://evil.example.org"));
    }

    #[test]
    fn wildcard_origin_match() {
        let cfg = ws(&["*.example.org"]);
        assert!(cfg.origin_allowed("https://chat.example.org"));
        assert!(cfg.origin_allowed("https://a.b.example.org"));
        assert!(cfg.origin_allowed("https://example.org"));
        assert!(!cfg.origin_allowed("https://example.com"));
        assert!(!cfg.origin_allowed("https://badexample.org"));
    }
}
