//! Security subsystems: password hashing, rate limiting, host cloaking,
//! and network-ban matching.

pub mod bans;
pub mod cloaking;
pub mod password;
pub mod rate_limit;

pub use bans::{BanKind, ServerBan};
pub use rate_limit::RateLimiter;
