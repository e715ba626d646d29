//! Remote users learned over S2S.
//!
//! A remote user is logically owned by its origin server: it disappears on
//! QUIT, KILL, or when the origin server leaves the topology. Service
//! pseudo-users look like remote users but are flagged and exempt from the
//! netsplit cascade.

use crate::state::session::UserModes;
use munin_proto::Source;
use std::collections::HashSet;

/// A user on another server.
#[derive(Debug, Clone)]
pub struct RemoteUser {
    pub uid: String,
    pub nick: String,
    pub user: String,
    pub host: String,
    pub vhost: Option<String>,
    pub realname: String,
    pub modes: UserModes,
    pub account: Option<String>,
    pub away: Option<String>,
    /// Nick TS, for collision resolution.
    pub introduced_ts: i64,
    /// Folded names of channels this user occupies.
    pub channels: HashSet<String>,
    /// In-process service pseudo-user: never removed by netsplit.
    pub is_service: bool,
}

impl RemoteUser {
    /// The origin server's SID (UID prefix).
    pub fn sid(&self) -> &str {
        &self.uid[..3]
    }

    /// Displayed host (vhost when set).
    pub fn display_host(&self) -> &str {
        self.vhost.as_deref().unwrap_or(&self.host)
    }

    /// Message source for fanout to local clients.
    pub fn source(&self) -> Source {
        Source::user(self.nick.clone(), self.user.clone(), self.display_host().to_string())
    }

    /// `nick!user@host` for ban matching.
    pub fn hostmask(&self) -> String {
        self.source().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> RemoteUser {
        RemoteUser {
            uid: "002AAAABA".into(),
            nick: "bob".into(),
            user: "bob".into(),
            host: "real.example".into(),
            vhost: None,
            realname: "Bob".into(),
            modes: UserModes::default(),
            account: None,
            away: None,
            introduced_ts: 100,
            channels: HashSet::new(),
            is_service: false,
        }
    }

    #[test]
    fn sid_is_uid_prefix() {
        assert_eq!(user().sid(), "002");
    }

    #[test]
    fn vhost_overrides_display() {
        let mut u = user();
        assert_eq!(u.display_host(), "real.example");
        u.vhost = Some("cloak.example".into());
        assert_eq!(u.display_host(), "cloak.example");
        assert_eq!(u.source().to_string(), "bob!bob@cloak.example");
    }
}
