//! Message source (the `:prefix` of a line).
//!
//! Client-originated traffic carries a `nick!user@host` source; server and
//! TS6 traffic carries a bare name, SID, or UID. Anything without `!` or
//! `@` parses as the named form, which covers all three.

use std::fmt;

/// The origin of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A server name, SID, or UID.
    Named(String),
    /// A full user source: `nick!user@host`.
    User {
        /// Nickname.
        nick: String,
        /// Ident / username.
        user: String,
        /// Displayed hostname.
        host: String,
    },
}

impl Source {
    /// Parse a source token (without the leading `:`).
    pub fn parse(s: &str) -> Source {
        if let Some(bang) = s.find('!') {
            let (nick, rest) = s.split_at(bang);
            let rest = &rest[1..];
            if let Some(at) = rest.find('@') {
                let (user, host) = rest.split_at(at);
                return Source::User {
                    nick: nick.to_string(),
                    user: user.to_string(),
                    host: host[1..].to_string(),
                };
            }
            // nick!user without a host: keep the pieces, empty host
            return Source::User {
                nick: nick.to_string(),
                user: rest.to_string(),
                host: String::new(),
            };
        }
        if let Some(at) = s.find('@') {
            let (nick, host) = s.split_at(at);
            return Source::User {
                nick: nick.to_string(),
                user: String::new(),
                host: host[1..].to_string(),
            };
        }
        Source::Named(s.to_string())
    }

    /// Build a full user source.
    pub fn user(nick: impl Into<String>, user: impl Into<String>, host: impl Into<String>) -> Source {
        Source::User {
            nick: nick.into(),
            user: user.into(),
            host: host.into(),
        }
    }

    /// Build a named (server/SID/UID) source.
    pub fn server(name: impl Into<String>) -> Source {
        Source::Named(name.into())
    }

    /// The nickname or name portion.
    pub fn name(&self) -> &str {
        match self {
            Source::Named(name) => name,
            Source::User { nick, .. } => nick,
        }
    }

    /// Render as the `nick!user@host` hostmask form used for ban matching.
    ///
    /// Named sources render as just the name.
    pub fn hostmask(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Named(name) => f.write_str(name),
            Source::User { nick, user, host } => {
                write!(f, "{}", nick)?;
                if !user.is_empty() {
                    write!(f, "!{}", user)?;
                }
                if !host.is_empty() {
                    write!(f, "@{}", host)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_user() {
        let s = Source::parse("nick!user@host.example");
        assert_eq!(s, Source::user("nick", "user", "host.example"));
        assert_eq!(s.to_string(), "nick!user@host.example");
    }

    #[test]
    fn parse_server_name() {
        let s = Source::parse("hub.example.net");
        assert_eq!(s, Source::Named("hub.example.net".into()));
    }

    #[test]
    fn parse_sid_and_uid() {
        assert_eq!(Source::parse("001"), Source::Named("001".into()));
        assert_eq!(Source::parse("001AAAAAB"), Source::Named("001AAAAAB".into()));
    }

    #[test]
    fn parse_nick_at_host() {
        let s = Source::parse("nick@host");
        assert_eq!(
            s,
            Source::User {
                nick: "nick".into(),
                user: String::new(),
                host: "host".into()
            }
        );
        assert_eq!(s.to_string(), "nick@host");
    }

    #[test]
    fn name_accessor() {
        assert_eq!(Source::parse("nick!u@h").name(), "nick");
        assert_eq!(Source::parse("001").name(), "001");
    }
}
