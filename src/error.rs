//! Unified error handling for munind.
//!
//! Domain errors map onto numeric replies where one exists; everything else
//! is logged and contained. A failing handler never takes down more than
//! its own connection.

use munin_proto::{Message, Response, Source};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during command handling.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not enough parameters")]
    NeedMoreParams,

    #[error("no text to send")]
    NoTextToSend,

    #[error("nickname in use: {0}")]
    NicknameInUse(String),

    #[error("erroneous nickname: {0}")]
    ErroneousNickname(String),

    #[error("not registered")]
    NotRegistered,

    #[error("already registered")]
    AlreadyRegistered,

    #[error("permission denied")]
    NoPrivileges,

    #[error("rate limited")]
    RateLimited,

    #[error("send error: {0}")]
    Send(#[from] mpsc::error::SendError<Message>),

    #[error("client quit: {0:?}")]
    Quit(Option<String>),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Static error code for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NeedMoreParams => "need_more_params",
            Self::NoTextToSend => "no_text_to_send",
            Self::NicknameInUse(_) => "nickname_in_use",
            Self::ErroneousNickname(_) => "erroneous_nickname",
            Self::NotRegistered => "not_registered",
            Self::AlreadyRegistered => "already_registered",
            Self::NoPrivileges => "no_privileges",
            Self::RateLimited => "rate_limited",
            Self::Send(_) => "send_error",
            Self::Quit(_) => "quit",
            Self::Persistence(_) => "persistence_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Convert to an IRC error reply.
    ///
    /// Returns `None` for errors with no client-visible numeric (internal,
    /// send failures, quit; those are handled by the connection loop).
    pub fn to_irc_reply(&self, server_name: &str, nick: &str, cmd_name: &str) -> Option<Message> {
        let (response, params) = match self {
            Self::NotRegistered => (
                Response::ERR_NOTREGISTERED,
                vec!["*".to_string(), "You have not registered".to_string()],
            ),
            Self::NeedMoreParams => (
                Response::ERR_NEEDMOREPARAMS,
                vec![
                    nick.to_string(),
                    cmd_name.to_string(),
                    "Not enough parameters".to_string(),
                ],
            ),
            Self::NoTextToSend => (
                Response::ERR_NOTEXTTOSEND,
                vec![nick.to_string(), "No text to send".to_string()],
            ),
            Self::NicknameInUse(bad) => (
                Response::ERR_NICKNAMEINUSE,
                vec![
                    nick.to_string(),
                    bad.clone(),
                    "Nickname is already in use".to_string(),
                ],
            ),
            Self::ErroneousNickname(bad) => (
                Response::ERR_ERRONEUSNICKNAME,
                vec![nick.to_string(), bad.clone(), "Erroneous nickname".to_string()],
            ),
            Self::AlreadyRegistered => (
                Response::ERR_ALREADYREGISTERED,
                vec!["*".to_string(), "You may not reregister".to_string()],
            ),
            Self::NoPrivileges => (
                Response::ERR_NOPRIVILEGES,
                vec![
                    nick.to_string(),
                    "Permission Denied - You're not an IRC operator".to_string(),
                ],
            ),
            Self::RateLimited => (
                Response::RPL_TRYAGAIN,
                vec![
                    nick.to_string(),
                    cmd_name.to_string(),
                    "Rate limit exceeded".to_string(),
                ],
            ),
            Self::Persistence(_) => (
                Response::ERR_UNKNOWNCOMMAND,
                vec![
                    nick.to_string(),
                    cmd_name.to_string(),
                    "Temporary failure, try again".to_string(),
                ],
            ),
            Self::Send(_) | Self::Quit(_) | Self::Internal(_) => return None,
        };

        Some(Message {
            tags: None,
            source: Some(Source::server(server_name)),
            command: response.code_string(),
            params,
        })
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Errors on a server-to-server link. All of these are fatal to the link
/// (ERROR + close + SQUIT propagation), never to the process.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link password mismatch for {0}")]
    BadPassword(String),

    #[error("no link block configured for {0}")]
    UnknownServer(String),

    #[error("server {0} is already linked")]
    AlreadyLinked(String),

    #[error("missing required capabilities: {0}")]
    MissingCaps(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("send queue exceeded")]
    SendQExceeded,

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(HandlerError::NeedMoreParams.error_code(), "need_more_params");
        assert_eq!(HandlerError::RateLimited.error_code(), "rate_limited");
        assert_eq!(HandlerError::Internal("x".into()).error_code(), "internal_error");
    }

    #[test]
    fn needmoreparams_reply_shape() {
        let reply = HandlerError::NeedMoreParams
            .to_irc_reply("irc.example.org", "alice", "JOIN")
            .unwrap();
        assert_eq!(reply.command, "461");
        assert_eq!(reply.params, vec!["alice", "JOIN", "Not enough parameters"]);
    }

    #[test]
    fn internal_errors_have_no_reply() {
        assert!(HandlerError::Internal("oops".into())
            .to_irc_reply("s", "n", "JOIN")
            .is_none());
        assert!(HandlerError::Quit(None).to_irc_reply("s", "n", "QUIT").is_none());
    }

    #[test]
    fn rate_limited_maps_to_tryagain() {
        let reply = HandlerError::RateLimited
            .to_irc_reply("s", "alice", "PRIVMSG")
            .unwrap();
        assert_eq!(reply.command, "263");
    }
}
