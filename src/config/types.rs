//! Top-level configuration types.

use super::limits::LimitsConfig;
use super::links::LinkBlock;
use super::listen::{ListenConfig, TlsConfig, WebSocketConfig};
use super::oper::{OperBlock, WebircBlock};
use super::secrets;
use super::security::SecurityConfig;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Secrets(#[from] secrets::SecretsError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// The `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (a hostname, e.g. "hugin.example.org").
    pub name: String,
    /// TS6 server ID: digit + two digits/uppercase letters.
    pub sid: String,
    /// Human-readable description, shown in LINKS and WHOIS.
    pub description: String,
    /// Network name advertised in ISUPPORT.
    pub network: String,
    /// Administrator name for ADMIN.
    #[serde(default)]
    pub admin_name: String,
    /// Administrator contact for ADMIN.
    #[serde(default)]
    pub admin_email: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus exposition port; 0 disables the endpoint.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

/// The `[database]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path or `:memory:`.
    pub path: String,
    /// Run schema migrations at startup.
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    /// Stored-message retention, in days.
    #[serde(default = "default_retention_days")]
    pub message_retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "munind.db".to_string(),
            run_migrations: true,
            message_retention_days: default_retention_days(),
        }
    }
}

pub(super) fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

/// The `[motd]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MotdConfig {
    /// Path to a MOTD file (one line per MOTD line).
    pub file: Option<String>,
    /// Inline MOTD lines, used when `file` is not set.
    #[serde(default)]
    pub lines: Vec<String>,
}

impl MotdConfig {
    /// Resolve the MOTD lines. An empty result means "no MOTD" (422).
    pub fn load_lines(&self) -> Vec<String> {
        if let Some(ref path) = self.file {
            match std::fs::read_to_string(path) {
                Ok(content) => return content.lines().map(str::to_string).collect(),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "failed to read MOTD file");
                }
            }
        }
        self.lines.clone()
    }
}

/// The complete daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Client listeners.
    #[serde(default)]
    pub listen: Vec<ListenConfig>,
    /// S2S listeners.
    #[serde(default)]
    pub listen_server: Vec<ListenConfig>,
    /// WebSocket listeners.
    #[serde(default)]
    pub websocket: Vec<WebSocketConfig>,
    /// TLS material shared by TLS-enabled listeners.
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// S2S link blocks.
    #[serde(default)]
    pub links: Vec<LinkBlock>,
    /// Operator blocks.
    #[serde(default)]
    pub opers: Vec<OperBlock>,
    /// WEBIRC gateway blocks.
    #[serde(default)]
    pub webirc: Vec<WebircBlock>,
    #[serde(default)]
    pub motd: MotdConfig,
}

impl Config {
    /// Load, decrypt, and deserialize a configuration file.
    ///
    /// String values prefixed `enc:` are decrypted with the master key from
    /// the environment before deserialization, so handlers only ever see
    /// plaintext.
    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(Path::new(path)).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;

        let mut value: toml::Value = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;

        secrets::decrypt_tree(&mut value)?;

        value.try_into().map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let toml = r#"
            [server]
            name = "irc.example.org"
            sid = "001"
            description = "Example"
            network = "ExampleNet"

            [[listen]]
            addr = "127.0.0.1:6667"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.sid, "001");
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(config.database.message_retention_days, 30);
        assert!(config.links.is_empty());
    }

    #[test]
    fn full_sections_parse() {
        let toml = r#"
            [server]
            name = "irc.example.org"
            sid = "0AB"
            description = "Example"
            network = "ExampleNet"
            admin_name = "Op"
            admin_email = "op@example.org"
            log_format = "json"

            [[listen]]
            addr = "0.0.0.0:6667"

            [[listen_server]]
            addr = "0.0.0.0:7000"

            [[websocket]]
            addr = "0.0.0.0:8097"
            path = "/irc"
            allowed_origins = ["*.example.org"]

            [security]
            cloak_secret = "sixteen-plus-characters"
            cloak_suffix = "ip.example.org"

            [security.rate_limit]
            connection_rate = 1.0
            connection_burst = 3
            command_rate = 10.0
            command_burst = 20
            message_rate = 3.0
            message_burst = 10
            exempt_cidrs = ["127.0.0.0/8"]

            [database]
            path = ":memory:"

            [limits]
            max_nick_length = 30

            [[links]]
            name = "hub.example.org"
            hostname = "10.0.0.2"
            port = 7000
            send_password = "s3cret"
            receive_password = "s3cret"
            autoconnect = true

            [[opers]]
            name = "root"
            password_hash = "$argon2id$..."

            [[webirc]]
            name = "gateway"
            password = "gw"
            allowed_cidrs = ["192.0.2.0/24"]

            [motd]
            lines = ["Welcome"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.websocket[0].path, "/irc");
        assert_eq!(config.links[0].name, "hub.example.org");
        assert!(config.links[0].autoconnect);
        assert_eq!(config.security.rate_limit.message_burst, 10);
        assert_eq!(config.motd.load_lines(), vec!["Welcome"]);
    }
}
