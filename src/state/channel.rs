//! Channel state.
//!
//! A channel is owned by the registry as `Arc<Mutex<Channel>>`; every
//! member-modify transaction takes that lock, applies, and releases. The
//! methods here are pure state transitions so they can be tested without a
//! running server.

use chrono::Utc;
use munin_proto::mask_match;
use std::collections::HashMap;

/// Per-member status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberModes {
    pub founder: bool,
    pub op: bool,
    pub halfop: bool,
    pub voice: bool,
}

impl MemberModes {
    /// Highest single prefix char for NAMES without `multi-prefix`.
    pub fn prefix(self) -> Option<char> {
        if self.founder || self.op {
            Some('@')
        } else if self.halfop {
            Some('%')
        } else if self.voice {
            Some('+')
        } else {
            None
        }
    }

    /// All prefix chars, highest first, for `multi-prefix` and SJOIN.
    pub fn all_prefixes(self) -> String {
        let mut s = String::new();
        if self.founder || self.op {
            s.push('@');
        }
        if self.halfop {
            s.push('%');
        }
        if self.voice {
            s.push('+');
        }
        s
    }

    /// Parse SJOIN prefix chars.
    pub fn from_prefixes(prefixes: &str) -> MemberModes {
        let mut m = MemberModes::default();
        for c in prefixes.chars() {
            match c {
                '@' => m.op = true,
                '%' => m.halfop = true,
                '+' => m.voice = true,
                _ => {}
            }
        }
        m
    }

    pub fn is_at_least_halfop(self) -> bool {
        self.founder || self.op || self.halfop
    }

    pub fn is_op(self) -> bool {
        self.founder || self.op
    }

    /// KICK rights: ops kick anyone; halfops kick only members below
    /// halfop.
    pub fn can_kick(self, target: MemberModes) -> bool {
        if self.is_op() {
            return true;
        }
        if self.halfop {
            return !target.is_at_least_halfop();
        }
        false
    }
}

/// One entry in a ban/except/invex list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Channel topic with attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Channel mode bits plus parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelModes {
    pub key: Option<String>,
    pub limit: Option<u32>,
    pub topic_lock: bool,
    pub no_external: bool,
    pub moderated: bool,
    pub invite_only: bool,
    pub secret: bool,
    pub private: bool,
    pub registered_only: bool,
}

impl ChannelModes {
    /// Render as `+ntk <key>`-style string: letters first, parameters
    /// appended in letter order.
    pub fn to_mode_string(&self, reveal_key: bool) -> String {
        let mut letters = String::from("+");
        let mut params: Vec<String> = Vec::new();
        if self.invite_only {
            letters.push('i');
        }
        if let Some(key) = &self.key {
            letters.push('k');
            params.push(if reveal_key { key.clone() } else { "*".to_string() });
        }
        if let Some(limit) = self.limit {
            letters.push('l');
            params.push(limit.to_string());
        }
        if self.moderated {
            letters.push('m');
        }
        if self.no_external {
            letters.push('n');
        }
        if self.private {
            letters.push('p');
        }
        if self.registered_only {
            letters.push('r');
        }
        if self.secret {
            letters.push('s');
        }
        if self.topic_lock {
            letters.push('t');
        }
        if params.is_empty() {
            letters
        } else {
            format!("{} {}", letters, params.join(" "))
        }
    }

    /// Parse an SJOIN-style simple mode string (`+ntk` plus params in
    /// order). Unknown letters are skipped.
    pub fn from_sjoin(modes: &str, params: &[String]) -> ChannelModes {
        let mut result = ChannelModes::default();
        let mut param_iter = params.iter();
        for c in modes.chars() {
            match c {
                'i' => result.invite_only = true,
                'k' => result.key = param_iter.next().cloned(),
                'l' => result.limit = param_iter.next().and_then(|p| p.parse().ok()),
                'm' => result.moderated = true,
                'n' => result.no_external = true,
                'p' => result.private = true,
                'r' => result.registered_only = true,
                's' => result.secret = true,
                't' => result.topic_lock = true,
                _ => {}
            }
        }
        result
    }
}

/// Reasons a JOIN is refused, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDenied {
    Banned,
    InviteOnly,
    BadKey,
    Full,
    RegisteredOnly,
}

/// A channel and its membership.
#[derive(Debug)]
pub struct Channel {
    /// Display name (original capitalization).
    pub name: String,
    /// Creation timestamp, the TS6 tie-breaker. Monotonic: only ever
    /// lowered, never raised.
    pub created_ts: i64,
    pub members: HashMap<String, MemberModes>,
    pub modes: ChannelModes,
    pub topic: Option<Topic>,
    pub bans: Vec<ListEntry>,
    pub excepts: Vec<ListEntry>,
    pub invex: Vec<ListEntry>,
    /// UIDs holding a live INVITE into the channel.
    pub invited: Vec<String>,
    /// Registered channels survive emptiness (topic/modes persisted).
    pub registered: bool,
}

impl Channel {
    /// Create a channel; the first joiner stamps `created_ts = now`.
    pub fn new(name: String) -> Channel {
        Channel {
            name,
            created_ts: Utc::now().timestamp(),
            members: HashMap::new(),
            modes: ChannelModes::default(),
            topic: None,
            bans: Vec::new(),
            excepts: Vec::new(),
            invex: Vec::new(),
            invited: Vec::new(),
            registered: false,
        }
    }

    /// Access-control for JOIN, checked in order: bans (minus excepts),
    /// invite-only (with invex), key, limit, registered-only.
    pub fn check_join(
        &self,
        uid: &str,
        hostmask: &str,
        key: Option<&str>,
        account: Option<&str>,
    ) -> Result<(), JoinDenied> {
        let invited = self.invited.iter().any(|u| u == uid);

        let banned = self.bans.iter().any(|b| mask_match(&b.mask, hostmask))
            && !self.excepts.iter().any(|e| mask_match(&e.mask, hostmask));
        if banned && !invited {
            return Err(JoinDenied::Banned);
        }

        if self.modes.invite_only && !invited {
            let invexed = self.invex.iter().any(|i| mask_match(&i.mask, hostmask));
            if !invexed {
                return Err(JoinDenied::InviteOnly);
            }
        }

        if let Some(required) = &self.modes.key {
            if key != Some(required.as_str()) {
                return Err(JoinDenied::BadKey);
            }
        }

        if let Some(limit) = self.modes.limit {
            if self.members.len() >= limit as usize {
                return Err(JoinDenied::Full);
            }
        }

        if self.modes.registered_only && account.is_none() {
            return Err(JoinDenied::RegisteredOnly);
        }

        Ok(())
    }

    /// Add a member; first member of a fresh channel gets ops.
    pub fn add_member(&mut self, uid: String, modes: MemberModes) {
        self.members.insert(uid.clone(), modes);
        self.invited.retain(|u| u != &uid);
    }

    /// Remove a member. Returns `true` if the channel should be
    /// destroyed (empty and not registered).
    pub fn remove_member(&mut self, uid: &str) -> bool {
        self.members.remove(uid);
        self.members.is_empty() && !self.registered
    }

    pub fn member_modes(&self, uid: &str) -> Option<MemberModes> {
        self.members.get(uid).copied()
    }

    /// TS6 SJOIN conflict resolution.
    ///
    /// - `their_ts < created_ts`: remote wins. Local modes and statuses are
    ///   dropped, the remote mode set is installed, the timestamp lowers.
    /// - `their_ts > created_ts`: local wins. The incoming mode/status
    ///   portion is ignored (the caller still adds members, statusless).
    /// - equal: union of modes; statuses merge additively.
    ///
    /// Returns `true` when the remote side won (callers must then strip
    /// statuses they had granted locally before applying the remote ones).
    pub fn ts6_merge(&mut self, their_ts: i64, their_modes: ChannelModes) -> SjoinOutcome {
        use std::cmp::Ordering;
        match their_ts.cmp(&self.created_ts) {
            Ordering::Less => {
                self.created_ts = their_ts;
                self.modes = their_modes;
                for status in self.members.values_mut() {
                    *status = MemberModes::default();
                }
                SjoinOutcome::RemoteWins
            }
            Ordering::Greater => SjoinOutcome::LocalWins,
            Ordering::Equal => {
                // Union of boolean modes; parameters prefer the local side.
                let local = &mut self.modes;
                local.topic_lock |= their_modes.topic_lock;
                local.no_external |= their_modes.no_external;
                local.moderated |= their_modes.moderated;
                local.invite_only |= their_modes.invite_only;
                local.secret |= their_modes.secret;
                local.private |= their_modes.private;
                local.registered_only |= their_modes.registered_only;
                if local.key.is_none() {
                    local.key = their_modes.key;
                }
                if local.limit.is_none() {
                    local.limit = their_modes.limit;
                }
                SjoinOutcome::Merge
            }
        }
    }
}

/// What an SJOIN comparison decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SjoinOutcome {
    /// Their TS was older: local state was reset to theirs.
    RemoteWins,
    /// Our TS is older: ignore their modes/statuses.
    LocalWins,
    /// Equal TS: union.
    Merge,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan() -> Channel {
        Channel::new("#test".into())
    }

    #[test]
    fn first_member_empty_channel_lifecycle() {
        let mut c = chan();
        c.add_member("001AAAABA".into(), MemberModes { op: true, ..Default::default() });
        assert!(!c.remove_member("nonexistent"));
        assert!(c.remove_member("001AAAABA"), "last part destroys the channel");
    }

    #[test]
    fn registered_channel_survives_empty() {
        let mut c = chan();
        c.registered = true;
        c.add_member("001AAAABA".into(), MemberModes::default());
        assert!(!c.remove_member("001AAAABA"));
    }

    #[test]
    fn join_check_order_ban_first() {
        let mut c = chan();
        c.modes.invite_only = true;
        c.modes.key = Some("k".into());
        c.bans.push(ListEntry { mask: "*!*@bad.example".into(), set_by: "op".into(), set_at: 0 });

        // Ban outranks invite-only in the reply ordering.
        assert_eq!(
            c.check_join("001AAAABA", "joe!j@bad.example", None, None),
            Err(JoinDenied::Banned)
        );
        // Except neutralizes the ban, then invite-only fires.
        c.excepts.push(ListEntry { mask: "joe!*@*".into(), set_by: "op".into(), set_at: 0 });
        assert_eq!(
            c.check_join("001AAAABA", "joe!j@bad.example", None, None),
            Err(JoinDenied::InviteOnly)
        );
    }

    #[test]
    fn invex_passes_invite_only() {
        let mut c = chan();
        c.modes.invite_only = true;
        c.invex.push(ListEntry { mask: "*!*@trusted.example".into(), set_by: "op".into(), set_at: 0 });
        assert!(c.check_join("u", "joe!j@trusted.example", None, None).is_ok());
        assert_eq!(
            c.check_join("u", "joe!j@other.example", None, None),
            Err(JoinDenied::InviteOnly)
        );
    }

    #[test]
    fn live_invite_passes_ban_and_invite_only() {
        let mut c = chan();
        c.modes.invite_only = true;
        c.bans.push(ListEntry { mask: "*!*@*".into(), set_by: "op".into(), set_at: 0 });
        c.invited.push("001AAAABA".into());
        assert!(c.check_join("001AAAABA", "joe!j@x", None, None).is_ok());
    }

    #[test]
    fn key_and_limit_and_registered_only() {
        let mut c = chan();
        c.modes.key = Some("sesame".into());
        assert_eq!(c.check_join("u", "a!b@c", None, None), Err(JoinDenied::BadKey));
        assert_eq!(c.check_join("u", "a!b@c", Some("wrong"), None), Err(JoinDenied::BadKey));
        assert!(c.check_join("u", "a!b@c", Some("sesame"), None).is_ok());

        c.modes.key = None;
        c.modes.limit = Some(1);
        c.add_member("occupant".into(), MemberModes::default());
        assert_eq!(c.check_join("u", "a!b@c", None, None), Err(JoinDenied::Full));

        c.modes.limit = None;
        c.modes.registered_only = true;
        assert_eq!(c.check_join("u", "a!b@c", None, None), Err(JoinDenied::RegisteredOnly));
        assert!(c.check_join("u", "a!b@c", None, Some("acct")).is_ok());
    }

    #[test]
    fn kick_rights() {
        let op = MemberModes { op: true, ..Default::default() };
        let halfop = MemberModes { halfop: true, ..Default::default() };
        let voice = MemberModes { voice: true, ..Default::default() };

        assert!(op.can_kick(op));
        assert!(op.can_kick(halfop));
        assert!(halfop.can_kick(voice));
        assert!(!halfop.can_kick(halfop));
        assert!(!halfop.can_kick(op));
        assert!(!voice.can_kick(voice));
    }

    #[test]
    fn ts6_remote_wins_resets_state() {
        let mut c = chan();
        c.created_ts = 500;
        c.modes.no_external = true;
        c.modes.topic_lock = true;
        c.add_member("001AAAAAA".into(), MemberModes { op: true, ..Default::default() });

        let theirs = ChannelModes { moderated: true, ..Default::default() };
        assert_eq!(c.ts6_merge(400, theirs.clone()), SjoinOutcome::RemoteWins);

        assert_eq!(c.created_ts, 400);
        assert_eq!(c.modes, theirs);
        assert_eq!(c.member_modes("001AAAAAA"), Some(MemberModes::default()));
    }

    #[test]
    fn ts6_local_wins_keeps_state() {
        let mut c = chan();
        c.created_ts = 400;
        c.modes.no_external = true;

        let outcome = c.ts6_merge(500, ChannelModes { moderated: true, ..Default::default() });
        assert_eq!(outcome, SjoinOutcome::LocalWins);
        assert_eq!(c.created_ts, 400);
        assert!(c.modes.no_external);
        assert!(!c.modes.moderated);
    }

    #[test]
    fn ts6_equal_unions_modes() {
        let mut c = chan();
        c.created_ts = 400;
        c.modes.no_external = true;

        let outcome = c.ts6_merge(400, ChannelModes { moderated: true, ..Default::default() });
        assert_eq!(outcome, SjoinOutcome::Merge);
        assert!(c.modes.no_external && c.modes.moderated);
        assert_eq!(c.created_ts, 400);
    }

    #[test]
    fn mode_string_rendering() {
        let mut c = chan();
        c.modes.no_external = true;
        c.modes.topic_lock = true;
        assert_eq!(c.modes.to_mode_string(true), "+nt");
        c.modes.key = Some("sesame".into());
        c.modes.limit = Some(25);
        assert_eq!(c.modes.to_mode_string(true), "+klnt sesame 25");
        assert_eq!(c.modes.to_mode_string(false), "+klnt * 25");
    }

    #[test]
    fn sjoin_mode_parsing() {
        let modes = ChannelModes::from_sjoin("+ntk", &["sesame".to_string()]);
        assert!(modes.no_external && modes.topic_lock);
        assert_eq!(modes.key.as_deref(), Some("sesame"));
        // unknown letters skipped
        let modes = ChannelModes::from_sjoin("+nQt", &[]);
        assert!(modes.no_external && modes.topic_lock);
    }

    #[test]
    fn multi_prefix_rendering() {
        let m = MemberModes { op: true, voice: true, ..Default::default() };
        assert_eq!(m.prefix(), Some('@'));
        assert_eq!(m.all_prefixes(), "@+");
        assert_eq!(MemberModes::from_prefixes("@+"), m);
    }
}
