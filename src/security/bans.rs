//! Network ban matching.
//!
//! K-lines and G-lines match `user@host`, Z-lines match IPs (plain or
//! CIDR), and jupes match server names. The live cache mirrors the ban
//! repository; expiry is checked at match time so a stale cache can never
//! extend a ban.

use chrono::{DateTime, Utc};
use munin_proto::mask_match;
use std::net::IpAddr;

/// Ban categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanKind {
    /// Local user@host ban.
    KLine,
    /// Network-wide user@host ban.
    GLine,
    /// Network-wide IP ban.
    ZLine,
    /// Blocked server name.
    Jupe,
}

impl BanKind {
    /// Wire/storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            BanKind::KLine => "kline",
            BanKind::GLine => "gline",
            BanKind::ZLine => "zline",
            BanKind::Jupe => "jupe",
        }
    }

    /// Parse a storage name.
    pub fn parse(s: &str) -> Option<BanKind> {
        match s {
            "kline" => Some(BanKind::KLine),
            "gline" => Some(BanKind::GLine),
            "zline" => Some(BanKind::ZLine),
            "jupe" => Some(BanKind::Jupe),
            _ => None,
        }
    }
}

/// A network ban, as cached in memory.
#[derive(Debug, Clone)]
pub struct ServerBan {
    pub id: i64,
    pub kind: BanKind,
    pub pattern: String,
    pub reason: String,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ServerBan {
    /// Whether the ban is expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Match a connecting user against this ban.
    pub fn matches_user(&self, user: &str, host: &str, ip: IpAddr, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            return false;
        }
        match self.kind {
            BanKind::KLine | BanKind::GLine => {
                let subject = format!("{user}@{host}");
                let ip_subject = format!("{user}@{ip}");
                mask_match(&self.pattern, &subject) || mask_match(&self.pattern, &ip_subject)
            }
            BanKind::ZLine => matches_ip(&self.pattern, ip),
            BanKind::Jupe => false,
        }
    }

    /// Match a server name against a jupe.
    pub fn matches_server(&self, name: &str, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            return false;
        }
        self.kind == BanKind::Jupe && mask_match(&self.pattern, name)
    }
}

fn matches_ip(pattern: &str, ip: IpAddr) -> bool {
    if let Ok(net) = pattern.parse::<ipnet::IpNet>() {
        return net.contains(&ip);
    }
    if let Ok(single) = pattern.parse::<IpAddr>() {
        return single == ip;
    }
    mask_match(pattern, &ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ban(kind: BanKind, pattern: &str) -> ServerBan {
        ServerBan {
            id: 1,
            kind,
            pattern: pattern.to_string(),
            reason: "testing".into(),
            set_by: "oper".into(),
            set_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn kline_matches_user_host() {
        let b = ban(BanKind::KLine, "*@*.bad.example");
        let ip = "192.0.2.1".parse().unwrap();
        assert!(b.matches_user("joe", "gw.bad.example", ip, Utc::now()));
        assert!(!b.matches_user("joe", "good.example", ip, Utc::now()));
    }

    #[test]
    fn kline_matches_literal_ip_host() {
        let b = ban(BanKind::KLine, "*@192.0.2.*");
        let ip = "192.0.2.44".parse().unwrap();
        assert!(b.matches_user("joe", "cloaked.ip", ip, Utc::now()));
    }

    #[test]
    fn zline_matches_cidr() {
        let b = ban(BanKind::ZLine, "198.51.100.0/24");
        assert!(b.matches_user("x", "h", "198.51.100.7".parse().unwrap(), Utc::now()));
        assert!(!b.matches_user("x", "h", "198.51.101.7".parse().unwrap(), Utc::now()));
    }

    #[test]
    fn zline_matches_single_ip() {
        let b = ban(BanKind::ZLine, "203.0.113.5");
        assert!(b.matches_user("x", "h", "203.0.113.5".parse().unwrap(), Utc::now()));
        assert!(!b.matches_user("x", "h", "203.0.113.6".parse().unwrap(), Utc::now()));
    }

    #[test]
    fn jupe_matches_server_names_only() {
        let b = ban(BanKind::Jupe, "evil.*");
        assert!(b.matches_server("evil.example.org", Utc::now()));
        assert!(!b.matches_user("x", "evil.example.org", "192.0.2.1".parse().unwrap(), Utc::now()));
    }

    #[test]
    fn expired_bans_do_not_match() {
        let mut b = ban(BanKind::KLine, "*@*");
        b.expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(!b.matches_user("x", "h", "192.0.2.1".parse().unwrap(), Utc::now()));
    }
}
