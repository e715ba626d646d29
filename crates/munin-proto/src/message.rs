//! IRC message grammar.
//!
//! `[@tags SP] [:source SP] command (SP middle)* [SP ':' trailing]`
//!
//! The parser is nom-based and never panics on hostile input; malformed
//! lines surface as [`ProtocolError`] for the caller to log and discard.

use crate::error::ProtocolError;
use crate::response::Response;
use crate::source::Source;
use crate::tags::{escape_tag_value, unescape_tag_value};
use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    sequence::preceded,
    IResult,
};
use std::fmt;
use std::str::FromStr;

/// A single message tag: key and optional value (already unescaped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag(pub String, pub Option<String>);

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags, if any.
    pub tags: Option<Vec<Tag>>,
    /// Message source, if any.
    pub source: Option<Source>,
    /// Command name (upper-cased letters) or 3-digit numeric.
    pub command: String,
    /// Parameters including the trailing parameter, unmarked.
    pub params: Vec<String>,
}

impl Message {
    /// Construct a message with no tags or source.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Message {
        Message {
            tags: None,
            source: None,
            command: command.into(),
            params,
        }
    }

    /// Construct a numeric reply from the server.
    pub fn numeric(server: &str, response: Response, params: Vec<String>) -> Message {
        Message {
            tags: None,
            source: Some(Source::server(server)),
            command: response.code_string(),
            params,
        }
    }

    /// Attach or replace the source.
    pub fn with_source(mut self, source: Source) -> Message {
        self.source = Some(source);
        self
    }

    /// Append a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: Option<String>) -> Message {
        self.tags
            .get_or_insert_with(Vec::new)
            .push(Tag(key.into(), value));
        self
    }

    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .as_ref()?
            .iter()
            .find(|t| t.0 == key)
            .and_then(|t| t.1.as_deref())
    }

    /// Parameter accessor that tolerates missing entries.
    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// `PRIVMSG` constructor.
    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Message {
        Message::new("PRIVMSG", vec![target.into(), text.into()])
    }

    /// `NOTICE` constructor.
    pub fn notice(target: impl Into<String>, text: impl Into<String>) -> Message {
        Message::new("NOTICE", vec![target.into(), text.into()])
    }

    /// `PING` constructor.
    pub fn ping(token: impl Into<String>) -> Message {
        Message::new("PING", vec![token.into()])
    }

    /// `PONG` constructor.
    pub fn pong(token: impl Into<String>) -> Message {
        Message::new("PONG", vec![token.into()])
    }

    /// `ERROR` constructor (connection-fatal notification).
    pub fn error(reason: impl Into<String>) -> Message {
        Message::new("ERROR", vec![reason.into()])
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_tags_raw(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_until(" "))(input)
}

fn parse_source_raw(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

fn parse_command_raw(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(input)
}

/// Split the remainder into middles plus an optional trailing.
///
/// Consecutive spaces collapse; the trailing parameter begins at the first
/// `:`-prefixed token and runs to end of line.
fn parse_params(input: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut rest = input;

    while rest.as_bytes().first() == Some(&b' ') {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.is_empty() || rest.starts_with('\r') || rest.starts_with('\n') {
            break;
        }
        if let Some(stripped) = rest.strip_prefix(':') {
            let end = stripped.find(['\r', '\n']).unwrap_or(stripped.len());
            params.push(&stripped[..end]);
            break;
        }
        let end = rest.find([' ', '\r', '\n']).unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
        if rest.starts_with('\r') || rest.starts_with('\n') {
            break;
        }
    }

    params
}

fn decode_tags(raw: &str) -> Vec<Tag> {
    raw.split(';')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => Tag(key.to_string(), Some(unescape_tag_value(value))),
            None => Tag(part.to_string(), None),
        })
        .collect()
}

/// Whether a token is a legal command: ASCII letters, or exactly 3 digits.
fn is_valid_command(cmd: &str) -> bool {
    if cmd.is_empty() {
        return false;
    }
    if cmd.bytes().all(|b| b.is_ascii_digit()) {
        return cmd.len() == 3;
    }
    cmd.bytes().all(|b| b.is_ascii_alphabetic())
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(input: &str) -> Result<Message, ProtocolError> {
        let original_len = input.len();
        let err = |rest: &str, reason| ProtocolError::InvalidMessage {
            position: original_len - rest.len(),
            reason,
        };

        let (input, tags) = opt(parse_tags_raw)(input).map_err(|_: nom::Err<nom::error::Error<&str>>| {
            ProtocolError::InvalidMessage {
                position: 0,
                reason: "unterminated tag segment",
            }
        })?;
        let (input, _) = space0::<_, nom::error::Error<&str>>(input)
            .map_err(|_| err(input, "expected space after tags"))?;

        let (input, source) = opt(parse_source_raw)(input)
            .map_err(|_: nom::Err<nom::error::Error<&str>>| err(input, "bad source"))?;
        let (input, _) = space0::<_, nom::error::Error<&str>>(input)
            .map_err(|_| err(input, "expected space after source"))?;

        let (input, command) = parse_command_raw(input)
            .map_err(|_: nom::Err<nom::error::Error<&str>>| err(input, "missing command"))?;

        if !is_valid_command(command) {
            return Err(ProtocolError::InvalidCommand(command.to_string()));
        }

        let params = parse_params(input);

        Ok(Message {
            tags: tags.map(decode_tags),
            source: source.map(Source::parse),
            command: command.to_ascii_uppercase(),
            params: params.into_iter().map(str::to_string).collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tags) = &self.tags {
            if !tags.is_empty() {
                f.write_str("@")?;
                for (i, Tag(key, value)) in tags.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    f.write_str(key)?;
                    if let Some(value) = value {
                        f.write_str("=")?;
                        escape_tag_value(f, value)?;
                    }
                }
                f.write_str(" ")?;
            }
        }
        if let Some(source) = &self.source {
            write!(f, ":{} ", source)?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_command() {
        let msg: Message = "PING".parse().unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.tags.is_none());
        assert!(msg.source.is_none());
        assert!(msg.params.is_empty());
    }

    #[test]
    fn parse_command_with_params() {
        let msg: Message = "PRIVMSG #channel :Hello, world!".parse().unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "Hello, world!"]);
    }

    #[test]
    fn parse_with_source() {
        let msg: Message = ":nick!user@host QUIT :Gone".parse().unwrap();
        assert_eq!(msg.source, Some(Source::user("nick", "user", "host")));
        assert_eq!(msg.params, vec!["Gone"]);
    }

    #[test]
    fn parse_with_tags() {
        let msg: Message = "@msgid=abc;time=2023-01-01T00:00:00Z PRIVMSG #c :hi"
            .parse()
            .unwrap();
        assert_eq!(msg.tag("msgid"), Some("abc"));
        assert_eq!(msg.tag("time"), Some("2023-01-01T00:00:00Z"));
    }

    #[test]
    fn parse_tag_value_unescaping() {
        let msg: Message = "@key=semi\\:space\\svalue PING".parse().unwrap();
        assert_eq!(msg.tag("key"), Some("semi;space value"));
    }

    #[test]
    fn parse_valueless_tag() {
        let msg: Message = "@account PING".parse().unwrap();
        assert_eq!(msg.tags.as_ref().unwrap()[0], Tag("account".into(), None));
    }

    #[test]
    fn parse_collapses_multiple_spaces() {
        let msg: Message = "MODE   #chan  +o   alice".parse().unwrap();
        assert_eq!(msg.params, vec!["#chan", "+o", "alice"]);
    }

    #[test]
    fn parse_numeric_command() {
        let msg: Message = ":server 001 alice :Welcome".parse().unwrap();
        assert_eq!(msg.command, "001");
    }

    #[test]
    fn reject_bad_commands() {
        assert!("12 arg".parse::<Message>().is_err());
        assert!("1234 arg".parse::<Message>().is_err());
        assert!(":src".parse::<Message>().is_err());
        assert!("".parse::<Message>().is_err());
    }

    #[test]
    fn command_is_uppercased() {
        let msg: Message = "privmsg #c :hi".parse().unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn render_trailing_rules() {
        assert_eq!(Message::privmsg("#c", "two words").to_string(), "PRIVMSG #c :two words");
        assert_eq!(Message::privmsg("#c", "word").to_string(), "PRIVMSG #c word");
        assert_eq!(Message::privmsg("#c", "").to_string(), "PRIVMSG #c :");
        assert_eq!(Message::privmsg("#c", ":starts").to_string(), "PRIVMSG #c ::starts");
    }

    #[test]
    fn round_trip() {
        // parse(render(T, S, C, P)) == (T, S, C, P) for grammar-constrained
        // inputs: middles are non-empty, space-free, and not colon-led.
        let cases = vec![
            Message::new("PING", vec![]),
            Message::privmsg("#chan", "hello there"),
            Message::numeric("irc.example.org", Response::RPL_WELCOME, vec!["alice".into(), "Welcome".into()]),
            Message::new("MODE", vec!["#c".into(), "+ov".into(), "a".into(), "b".into()])
                .with_source(Source::user("op", "op", "host")),
            Message::privmsg("#c", "tagged ; value")
                .with_tag("msgid", Some("id-1".into()))
                .with_tag("time", Some("2023-01-01T00:00:00.000Z".into()))
                .with_tag("account", None),
            Message::new("UID", vec![
                "alice".into(), "1".into(), "100".into(), "alice".into(),
                "host".into(), "001AAAAAB".into(), "0".into(), "+i".into(),
                "host".into(), "Alice Example".into(),
            ])
            .with_source(Source::server("001")),
        ];
        for msg in cases {
            let rendered = msg.to_string();
            let reparsed: Message = rendered.parse().unwrap_or_else(|e| panic!("{rendered}: {e}"));
            assert_eq!(reparsed, msg, "round-trip failed for {rendered}");
        }
    }
}
