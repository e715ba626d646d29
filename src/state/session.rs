//! Per-connection session state.
//!
//! A `Session` is created on accept and destroyed on close. Everything
//! here is guarded by the session's own lock in the registry; none of the
//! methods block or await.

use chrono::{DateTime, Utc};
use munin_proto::{Capability, Source};
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Instant;

/// User mode bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserModes {
    pub invisible: bool,
    pub wallops: bool,
    pub oper: bool,
    pub bot: bool,
    pub secure: bool,
}

impl UserModes {
    /// Render as `+iwoBZ` (always includes the leading `+`).
    pub fn to_mode_string(self) -> String {
        let mut s = String::from("+");
        if self.invisible {
            s.push('i');
        }
        if self.wallops {
            s.push('w');
        }
        if self.oper {
            s.push('o');
        }
        if self.bot {
            s.push('B');
        }
        if self.secure {
            s.push('Z');
        }
        s
    }

    /// Apply a single mode letter. Returns `false` for unknown letters
    /// and for attempts to grant restricted modes (+o, +Z) by hand.
    pub fn apply(&mut self, letter: char, adding: bool) -> bool {
        match letter {
            'i' => self.invisible = adding,
            'w' => self.wallops = adding,
            'B' => self.bot = adding,
            // +o is granted only via OPER; -o works.
            'o' if !adding => self.oper = false,
            // +Z reflects the transport; it is never settable.
            'o' | 'Z' => return false,
            _ => return false,
        }
        true
    }

    /// Parse a burst mode string like `+iw`.
    pub fn from_mode_string(s: &str) -> UserModes {
        let mut modes = UserModes::default();
        for c in s.chars() {
            match c {
                'i' => modes.invisible = true,
                'w' => modes.wallops = true,
                'o' => modes.oper = true,
                'B' => modes.bot = true,
                'Z' => modes.secure = true,
                _ => {}
            }
        }
        modes
    }
}

/// SASL progress for a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaslState {
    /// Never attempted, or aborted.
    #[default]
    None,
    /// AUTHENTICATE exchange in flight for a mechanism.
    InProgress(String),
    /// Completed successfully.
    Done,
}

/// Live state for one client connection.
#[derive(Debug)]
pub struct Session {
    /// Connection identity: also this user's TS6 UID.
    pub uid: String,
    pub ip: IpAddr,
    /// Transport is TLS (or terminated-TLS WebSocket).
    pub secure: bool,
    /// SHA-256 fingerprint of the client certificate, when presented.
    pub cert_fingerprint: Option<String>,

    pub nick: Option<String>,
    pub user: Option<String>,
    pub realname: Option<String>,
    /// Display host (cloaked).
    pub host: String,
    /// PASS argument, checked at registration time.
    pub password: Option<String>,

    pub registered: bool,
    /// CAP LS/REQ opened and not yet closed by CAP END.
    pub cap_negotiating: bool,
    pub caps: HashSet<Capability>,
    pub sasl: SaslState,
    /// Base64 chunks being accumulated for AUTHENTICATE.
    pub sasl_buffer: String,
    pub account: Option<String>,

    pub modes: UserModes,
    /// Folded names of joined channels.
    pub channels: HashSet<String>,
    pub away: Option<String>,

    pub connected_at: DateTime<Utc>,
    /// TS used for nick-collision resolution.
    pub nick_ts: i64,
    pub last_activity: Instant,
    /// Set while a PING probe is outstanding.
    pub ping_sent: Option<Instant>,
    pub idle_since: Instant,

    /// OPER block name once opered up.
    pub oper_name: Option<String>,
    /// WEBIRC gateway that rewrote this session, if any.
    pub webirc_gateway: Option<String>,
    /// Gateway block's trust_ident flag; untrusted idents get a `~`.
    pub webirc_trust_ident: bool,
}

impl Session {
    pub fn new(uid: String, ip: IpAddr, secure: bool) -> Session {
        let now = Instant::now();
        Session {
            uid,
            host: ip.to_string(),
            ip,
            secure,
            cert_fingerprint: None,
            nick: None,
            user: None,
            realname: None,
            password: None,
            registered: false,
            cap_negotiating: false,
            caps: HashSet::new(),
            sasl: SaslState::None,
            sasl_buffer: String::new(),
            account: None,
            modes: UserModes {
                secure,
                ..UserModes::default()
            },
            channels: HashSet::new(),
            away: None,
            connected_at: Utc::now(),
            nick_ts: Utc::now().timestamp(),
            last_activity: now,
            ping_sent: None,
            idle_since: now,
            oper_name: None,
            webirc_gateway: None,
            webirc_trust_ident: true,
        }
    }

    /// Registration invariant: nick set, user set, cap negotiation closed,
    /// and no SASL exchange still in flight.
    pub fn can_register(&self) -> bool {
        !self.registered
            && self.nick.is_some()
            && self.user.is_some()
            && !self.cap_negotiating
            && !matches!(self.sasl, SaslState::InProgress(_))
    }

    /// Whether a capability was negotiated.
    pub fn has_cap(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    /// Build this session's message source. Falls back to `*` pieces
    /// pre-registration.
    pub fn source(&self) -> Source {
        Source::user(
            self.nick.as_deref().unwrap_or("*"),
            self.user.as_deref().unwrap_or("*"),
            self.host.clone(),
        )
    }

    /// `nick!user@host` for ban matching.
    pub fn hostmask(&self) -> String {
        self.source().to_string()
    }

    /// Nick for numeric replies; `*` before one is chosen.
    pub fn nick_or_star(&self) -> String {
        self.nick.clone().unwrap_or_else(|| "*".to_string())
    }

    /// Record inbound traffic and clear any outstanding ping probe.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.ping_sent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("001AAAABA".into(), "192.0.2.1".parse().unwrap(), false)
    }

    #[test]
    fn registration_gate() {
        let mut s = session();
        assert!(!s.can_register());

        s.nick = Some("alice".into());
        assert!(!s.can_register());

        s.user = Some("alice".into());
        assert!(s.can_register());

        s.cap_negotiating = true;
        assert!(!s.can_register());
        s.cap_negotiating = false;

        s.sasl = SaslState::InProgress("PLAIN".into());
        assert!(!s.can_register());
        s.sasl = SaslState::Done;
        assert!(s.can_register());

        s.registered = true;
        assert!(!s.can_register());
    }

    #[test]
    fn mode_string_rendering() {
        let mut modes = UserModes::default();
        assert_eq!(modes.to_mode_string(), "+");
        modes.invisible = true;
        modes.secure = true;
        assert_eq!(modes.to_mode_string(), "+iZ");
    }

    #[test]
    fn mode_apply_rules() {
        let mut modes = UserModes::default();
        assert!(modes.apply('i', true));
        assert!(modes.invisible);
        assert!(!modes.apply('o', true), "+o must not be settable by MODE");
        assert!(!modes.apply('Z', true), "+Z must not be settable by MODE");
        modes.oper = true;
        assert!(modes.apply('o', false));
        assert!(!modes.oper);
        assert!(!modes.apply('x', true));
    }

    #[test]
    fn tls_session_gets_secure_mode() {
        let s = Session::new("001AAAABA".into(), "192.0.2.1".parse().unwrap(), true);
        assert!(s.modes.secure);
    }

    #[test]
    fn source_before_registration() {
        let s = session();
        assert_eq!(s.source().to_string(), "*!*@192.0.2.1");
    }
}
