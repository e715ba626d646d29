//! Operator and WEBIRC gateway blocks.

use serde::Deserialize;

/// One `[[opers]]` block.
#[derive(Debug, Clone, Deserialize)]
pub struct OperBlock {
    /// Name given to OPER.
    pub name: String,
    /// Argon2id hash of the operator password.
    pub password_hash: String,
    /// Hostmasks allowed to use this block; empty means any.
    #[serde(default)]
    pub hostmasks: Vec<String>,
}

/// One `[[webirc]]` gateway block.
#[derive(Debug, Clone, Deserialize)]
pub struct WebircBlock {
    /// Gateway name, matched against the WEBIRC command.
    pub name: String,
    /// Shared password.
    pub password: String,
    /// Source addresses the gateway may connect from.
    #[serde(default)]
    pub allowed_cidrs: Vec<String>,
    /// Accept the gateway's ident claim. When unset the session keeps the
    /// ident it registered with.
    #[serde(default)]
    pub trust_ident: bool,
}

impl WebircBlock {
    /// Whether `ip` falls inside one of the gateway's allowed CIDRs.
    /// An empty list denies everything: gateways must be pinned.
    pub fn allows_source(&self, ip: std::net::IpAddr) -> bool {
        self.allowed_cidrs.iter().any(|cidr| {
            cidr.parse::<ipnet::IpNet>()
                .map(|net| net.contains(&ip))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webirc_cidr_check() {
        let block = WebircBlock {
            name: "gw".into(),
            password: "pw".into(),
            allowed_cidrs: vec!["192.0.2.0/24".into()],
            trust_ident: false,
        };
        assert!(block.allows_source("192.0.2.7".parse().unwrap()));
        assert!(!block.allows_source("198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn webirc_empty_cidrs_deny() {
        let block = WebircBlock {
            name: "gw".into(),
            password: "pw".into(),
            allowed_cidrs: vec![],
            trust_ident: false,
        };
        assert!(!block.allows_source("127.0.0.1".parse().unwrap()));
    }
}
