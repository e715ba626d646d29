//! IRCv3 capability tokens.

use std::fmt;
use std::str::FromStr;

/// A capability the server can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    MultiPrefix,
    Sasl,
    AwayNotify,
    ExtendedJoin,
    AccountNotify,
    AccountTag,
    CapNotify,
    Chghost,
    EchoMessage,
    InviteNotify,
    LabeledResponse,
    MessageTags,
    Msgid,
    ServerTime,
    UserhostInNames,
    Batch,
    Setname,
    StandardReplies,
    Chathistory,
    Sts,
    Tls,
}

impl Capability {
    /// All capabilities, in advertisement order.
    pub const ALL: &'static [Capability] = &[
        Capability::MultiPrefix,
        Capability::Sasl,
        Capability::AwayNotify,
        Capability::ExtendedJoin,
        Capability::AccountNotify,
        Capability::AccountTag,
        Capability::CapNotify,
        Capability::Chghost,
        Capability::EchoMessage,
        Capability::InviteNotify,
        Capability::LabeledResponse,
        Capability::MessageTags,
        Capability::Msgid,
        Capability::ServerTime,
        Capability::UserhostInNames,
        Capability::Batch,
        Capability::Setname,
        Capability::StandardReplies,
        Capability::Chathistory,
        Capability::Sts,
        Capability::Tls,
    ];

    /// Wire name of the capability.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::MultiPrefix => "multi-prefix",
            Capability::Sasl => "sasl",
            Capability::AwayNotify => "away-notify",
            Capability::ExtendedJoin => "extended-join",
            Capability::AccountNotify => "account-notify",
            Capability::AccountTag => "account-tag",
            Capability::CapNotify => "cap-notify",
            Capability::Chghost => "chghost",
            Capability::EchoMessage => "echo-message",
            Capability::InviteNotify => "invite-notify",
            Capability::LabeledResponse => "labeled-response",
            Capability::MessageTags => "message-tags",
            Capability::Msgid => "msgid",
            Capability::ServerTime => "server-time",
            Capability::UserhostInNames => "userhost-in-names",
            Capability::Batch => "batch",
            Capability::Setname => "setname",
            Capability::StandardReplies => "standard-replies",
            Capability::Chathistory => "draft/chathistory",
            Capability::Sts => "sts",
            Capability::Tls => "tls",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Capability, ()> {
        Capability::ALL
            .iter()
            .copied()
            .find(|cap| cap.as_str() == s)
            .ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_by_name() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().as_ref(), Ok(cap));
        }
    }

    #[test]
    fn unknown_cap_is_rejected() {
        assert!("draft/no-such-cap".parse::<Capability>().is_err());
    }
}
