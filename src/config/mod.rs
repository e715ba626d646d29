//! Configuration loading and management.
//!
//! Split into logical submodules:
//! - [`types`]: top-level `Config` plus server/database/MOTD sections
//! - [`listen`]: listener configuration (plain, TLS, WebSocket, S2S)
//! - [`limits`]: protocol limits (nick length, ping timeout, SendQ, ...)
//! - [`security`]: TLS material, cloaking, rate-limit buckets
//! - [`links`]: S2S link blocks
//! - [`oper`]: operator and WEBIRC gateway blocks
//! - [`secrets`]: `enc:` ciphertext values decrypted with the master key
//! - [`validation`]: startup sanity checks

mod limits;
mod links;
mod listen;
mod oper;
mod secrets;
mod security;
mod types;
mod validation;

pub use limits::LimitsConfig;
pub use links::LinkBlock;
pub use listen::{ListenConfig, TlsConfig, WebSocketConfig};
pub use oper::{OperBlock, WebircBlock};
pub use secrets::{decrypt_value, SecretsError, ENC_PREFIX, MASTER_KEY_ENV};
pub use security::{RateLimitConfig, SecurityConfig};
pub use types::{Config, ConfigError, DatabaseConfig, LogFormat, MotdConfig, ServerConfig};
pub use validation::validate;
