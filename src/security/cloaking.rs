//! Hostname cloaking.
//!
//! User IPs are replaced by an HMAC-SHA256 digest keyed with the configured
//! cloak secret, so bans survive reconnects without exposing addresses.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::IpAddr;

type HmacSha256 = Hmac<Sha256>;

/// Secrets that must never ship to production.
const WEAK_SECRETS: &[&str] = &["", "changeme", "secret", "cloak-secret"];

/// Whether the configured secret is a known-weak placeholder.
pub fn is_weak_secret(secret: &str) -> bool {
    WEAK_SECRETS.contains(&secret) || secret.len() < 16
}

/// Cloak an IP address into `<hex12>.<suffix>`.
pub fn cloak_ip(secret: &str, suffix: &str, ip: IpAddr) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(ip.to_string().as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut hex = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("{hex}.{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloak_is_deterministic() {
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let a = cloak_ip("a-sufficiently-long-secret", "ip.example", ip);
        let b = cloak_ip("a-sufficiently-long-secret", "ip.example", ip);
        assert_eq!(a, b);
        assert!(a.ends_with(".ip.example"));
    }

    #[test]
    fn different_ips_cloak_differently() {
        let a = cloak_ip("a-sufficiently-long-secret", "ip", "192.0.2.1".parse().unwrap());
        let b = cloak_ip("a-sufficiently-long-secret", "ip", "192.0.2.2".parse().unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn different_secrets_cloak_differently() {
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let a = cloak_ip("a-sufficiently-long-secret", "ip", ip);
        let b = cloak_ip("another-sufficiently-long-one", "ip", ip);
        assert_ne!(a, b);
    }

    #[test]
    fn weak_secrets_detected() {
        assert!(is_weak_secret(""));
        assert!(is_weak_secret("changeme"));
        assert!(is_weak_secret("short"));
        assert!(!is_weak_secret("a-sufficiently-long-secret"));
    }
}
