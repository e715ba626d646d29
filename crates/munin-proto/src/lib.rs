//! # munin-proto
//!
//! The wire-protocol layer of the Munin IRC daemon: message grammar with
//! IRCv3 tags, numeric replies, capability tokens, RFC1459 casemapping,
//! and (behind the `tokio` feature) a length-bounded line codec.
//!
//! This crate knows nothing about server state. It parses bytes into
//! [`Message`] values and renders them back; everything else lives in the
//! daemon.
//!
//! ```rust
//! use munin_proto::Message;
//!
//! let raw = "@time=2023-01-01T12:00:00Z :nick!user@host PRIVMSG #channel :Hello!";
//! let msg: Message = raw.parse().expect("valid IRC message");
//! assert_eq!(msg.command, "PRIVMSG");
//! assert_eq!(msg.params[1], "Hello!");
//! ```

#![deny(clippy::all)]

pub mod caps;
pub mod casemap;
pub mod error;
pub mod message;
pub mod response;
pub mod source;
pub mod tags;
pub mod validation;

#[cfg(feature = "tokio")]
pub mod codec;

pub use self::caps::Capability;
pub use self::casemap::{irc_eq, irc_to_lower};
pub use self::error::ProtocolError;
pub use self::message::{Message, Tag};
pub use self::response::Response;
pub use self::source::Source;
pub use self::validation::{is_valid_channel_name, is_valid_nickname, mask_match};

#[cfg(feature = "tokio")]
pub use self::codec::{LineCodec, CLIENT_LINE_MAX, SERVER_LINE_MAX};
