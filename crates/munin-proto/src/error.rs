//! Protocol-level errors.

use thiserror::Error;

/// Errors produced while parsing wire data.
///
/// These never terminate a connection; callers log and discard the
/// offending line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The line could not be parsed as an IRC message.
    #[error("invalid message at byte {position}: {reason}")]
    InvalidMessage {
        /// Byte offset where parsing gave up.
        position: usize,
        /// Short description of what went wrong.
        reason: &'static str,
    },

    /// The command token is neither letters nor a 3-digit numeric.
    #[error("invalid command token: {0}")]
    InvalidCommand(String),
}
