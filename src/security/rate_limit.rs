//! Token-bucket rate limiting.
//!
//! Three independent bucket families:
//! - per source IP for new connections
//! - per connection for commands
//! - per connection for PRIVMSG/NOTICE
//!
//! Buckets refill continuously: `tokens = min(burst, tokens + rate * dt)`.
//! A drained bucket drops the offending command (the caller replies 263);
//! nothing here ever disconnects a client.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use ipnet::IpNet;
use parking_lot::{Mutex, RwLock};
use std::net::IpAddr;
use std::time::Instant;
use tracing::debug;

/// A single token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(rate: f64, burst: u32, now: Instant) -> TokenBucket {
        TokenBucket {
            rate,
            burst: f64::from(burst),
            tokens: f64::from(burst),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + self.rate * dt).min(self.burst);
        self.last_refill = now;
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count after refilling to `now`. Test hook.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

/// Thread-safe rate limiter covering all three families.
pub struct RateLimiter {
    config: RwLock<RateLimitConfig>,
    exempt: RwLock<Vec<IpNet>>,
    connections: DashMap<IpAddr, Mutex<TokenBucket>>,
    commands: DashMap<String, Mutex<TokenBucket>>,
    messages: DashMap<String, Mutex<TokenBucket>>,
}

impl RateLimiter {
    /// Build from config. Bad exempt CIDRs were rejected at validation.
    pub fn new(config: RateLimitConfig) -> RateLimiter {
        let exempt = parse_cidrs(&config.exempt_cidrs);
        RateLimiter {
            config: RwLock::new(config),
            exempt: RwLock::new(exempt),
            connections: DashMap::new(),
            commands: DashMap::new(),
            messages: DashMap::new(),
        }
    }

    fn is_exempt(&self, ip: IpAddr) -> bool {
        self.exempt.read().iter().any(|net| net.contains(&ip))
    }

    /// Check whether `ip` may open a new connection.
    pub fn check_connection(&self, ip: IpAddr) -> bool {
        if self.is_exempt(ip) {
            return true;
        }
        let now = Instant::now();
        let (rate, burst) = {
            let c = self.config.read();
            (c.connection_rate, c.connection_burst)
        };
        let bucket = self
            .connections
            .entry(ip)
            .or_insert_with(|| Mutex::new(TokenBucket::new(rate, burst, now)));
        let allowed = bucket.lock().try_acquire(now);
        if !allowed {
            debug!(%ip, "connection rate limit exceeded");
            crate::metrics::RATE_LIMIT_HITS.inc();
        }
        allowed
    }

    /// Check whether a connection may run another command.
    pub fn check_command(&self, uid: &str, ip: IpAddr) -> bool {
        if self.is_exempt(ip) {
            return true;
        }
        let now = Instant::now();
        let (rate, burst) = {
            let c = self.config.read();
            (c.command_rate, c.command_burst)
        };
        let bucket = self
            .commands
            .entry(uid.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(rate, burst, now)));
        let allowed = bucket.lock().try_acquire(now);
        if !allowed {
            debug!(uid = %uid, "command rate limit exceeded");
            crate::metrics::RATE_LIMIT_HITS.inc();
        }
        allowed
    }

    /// Check whether a connection may send another PRIVMSG/NOTICE.
    pub fn check_message(&self, uid: &str, ip: IpAddr) -> bool {
        if self.is_exempt(ip) {
            return true;
        }
        let now = Instant::now();
        let (rate, burst) = {
            let c = self.config.read();
            (c.message_rate, c.message_burst)
        };
        let bucket = self
            .messages
            .entry(uid.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(rate, burst, now)));
        let allowed = bucket.lock().try_acquire(now);
        if !allowed {
            debug!(uid = %uid, "message rate limit exceeded");
            crate::metrics::RATE_LIMIT_HITS.inc();
        }
        allowed
    }

    /// Drop a connection's buckets on disconnect.
    pub fn remove_client(&self, uid: &str) {
        self.commands.remove(uid);
        self.messages.remove(uid);
    }

    /// Periodic maintenance: bound per-IP bucket growth.
    pub fn cleanup(&self) {
        const MAX_ENTRIES: usize = 10_000;
        if self.connections.len() > MAX_ENTRIES {
            self.connections.clear();
            debug!("cleared connection rate limiters (exceeded {} entries)", MAX_ENTRIES);
        }
    }

    /// REHASH: swap parameters and re-read the exempt list. Existing
    /// buckets keep their fill level; only new buckets pick up the rates.
    pub fn rehash(&self, new_config: RateLimitConfig) {
        *self.exempt.write() = parse_cidrs(&new_config.exempt_cidrs);
        *self.config.write() = new_config;
    }
}

fn parse_cidrs(cidrs: &[String]) -> Vec<IpNet> {
    cidrs.iter().filter_map(|c| c.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            connection_rate: 1.0,
            connection_burst: 3,
            command_rate: 10.0,
            command_burst: 20,
            message_rate: 3.0,
            message_burst: 10,
            exempt_cidrs: vec!["10.0.0.0/8".into()],
        }
    }

    #[test]
    fn bucket_drains_and_refills() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(3.0, 10, t0);

        for _ in 0..10 {
            assert!(bucket.try_acquire(t0));
        }
        assert!(!bucket.try_acquire(t0));

        // One second refills rate tokens.
        let t1 = t0 + Duration::from_secs(1);
        assert!(bucket.try_acquire(t1));
        assert!(bucket.try_acquire(t1));
        assert!(bucket.try_acquire(t1));
        assert!(!bucket.try_acquire(t1));
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(5.0, 10, t0);
        for _ in 0..4 {
            assert!(bucket.try_acquire(t0));
        }
        // After a long idle period capacity equals min(b, c + r*dt) = b.
        let later = t0 + Duration::from_secs(3600);
        assert_eq!(bucket.available(later), 10.0);
    }

    #[test]
    fn refill_formula() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 10, t0);
        for _ in 0..10 {
            assert!(bucket.try_acquire(t0));
        }
        let available = bucket.available(t0 + Duration::from_millis(2500));
        assert!((available - 5.0).abs() < 0.01, "expected ~5.0, got {available}");
    }

    #[test]
    fn flood_of_fifteen_messages() {
        // burst 10, rate 3/s: first 10 pass, next 5 are dropped.
        let limiter = RateLimiter::new(test_config());
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let mut allowed = 0;
        let mut dropped = 0;
        for _ in 0..15 {
            if limiter.check_message("001AAAAAA", ip) {
                allowed += 1;
            } else {
                dropped += 1;
            }
        }
        assert_eq!(allowed, 10);
        assert_eq!(dropped, 5);
    }

    #[test]
    fn exempt_cidr_bypasses_buckets() {
        let limiter = RateLimiter::new(test_config());
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        for _ in 0..100 {
            assert!(limiter.check_connection(ip));
            assert!(limiter.check_message("001AAAAAB", ip));
        }
    }

    #[test]
    fn connection_bucket_per_ip() {
        let limiter = RateLimiter::new(test_config());
        let a: IpAddr = "192.0.2.1".parse().unwrap();
        let b: IpAddr = "192.0.2.2".parse().unwrap();
        for _ in 0..3 {
            assert!(limiter.check_connection(a));
        }
        assert!(!limiter.check_connection(a));
        assert!(limiter.check_connection(b));
    }

    #[test]
    fn remove_client_resets_buckets() {
        let limiter = RateLimiter::new(test_config());
        let ip: IpAddr = "192.0.2.9".parse().unwrap();
        for _ in 0..10 {
            let _ = limiter.check_message("001AAAAAC", ip);
        }
        assert!(!limiter.check_message("001AAAAAC", ip));
        limiter.remove_client("001AAAAAC");
        assert!(limiter.check_message("001AAAAAC", ip));
    }
}
