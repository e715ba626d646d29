//! Client command handlers.
//!
//! Each command is a [`Handler`] registered in the dispatch table; the
//! connection loop feeds parsed messages through [`Registry::dispatch`],
//! which applies the registration gate and rate limits.

mod cap;
mod channel;
mod chathistory;
mod connection;
mod core;
mod helpers;
mod messaging;
mod mode;
mod oper;
mod sasl;
mod server_query;
mod services_alias;
mod user_query;
mod user_status;

pub use self::core::{Context, Handler, Registry};
pub use connection::send_welcome_burst;
pub use helpers::filter_tags_for;

use std::collections::HashMap;

/// The full command table.
pub fn registry_with_defaults() -> Registry {
    let mut handlers: HashMap<&'static str, Box<dyn Handler>> = HashMap::new();

    // Connection / registration
    handlers.insert("NICK", Box::new(connection::NickHandler));
    handlers.insert("USER", Box::new(connection::UserHandler));
    handlers.insert("PASS", Box::new(connection::PassHandler));
    handlers.insert("PING", Box::new(connection::PingHandler));
    handlers.insert("PONG", Box::new(connection::PongHandler));
    handlers.insert("QUIT", Box::new(connection::QuitHandler));
    handlers.insert("WEBIRC", Box::new(connection::WebircHandler));
    handlers.insert("CAP", Box::new(cap::CapHandler));
    handlers.insert("AUTHENTICATE", Box::new(sasl::AuthenticateHandler));

    // Channels
    handlers.insert("JOIN", Box::new(channel::JoinHandler));
    handlers.insert("PART", Box::new(channel::PartHandler));
    handlers.insert("TOPIC", Box::new(channel::TopicHandler));
    handlers.insert("NAMES", Box::new(channel::NamesHandler));
    handlers.insert("LIST", Box::new(channel::ListHandler));
    handlers.insert("INVITE", Box::new(channel::InviteHandler));
    handlers.insert("KICK", Box::new(channel::KickHandler));
    handlers.insert("MODE", Box::new(mode::ModeHandler));

    // Messaging
    handlers.insert("PRIVMSG", Box::new(messaging::PrivmsgHandler));
    handlers.insert("NOTICE", Box::new(messaging::NoticeHandler));

    // Queries
    handlers.insert("WHOIS", Box::new(user_query::WhoisHandler));
    handlers.insert("WHO", Box::new(user_query::WhoHandler));
    handlers.insert("WHOWAS", Box::new(user_query::WhowasHandler));
    handlers.insert("USERHOST", Box::new(user_query::UserhostHandler));
    handlers.insert("ISON", Box::new(user_query::IsonHandler));
    handlers.insert("MOTD", Box::new(server_query::MotdHandler));
    handlers.insert("LUSERS", Box::new(server_query::LusersHandler));
    handlers.insert("VERSION", Box::new(server_query::VersionHandler));
    handlers.insert("TIME", Box::new(server_query::TimeHandler));
    handlers.insert("INFO", Box::new(server_query::InfoHandler));
    handlers.insert("ADMIN", Box::new(server_query::AdminHandler));
    handlers.insert("STATS", Box::new(server_query::StatsHandler));
    handlers.insert("LINKS", Box::new(server_query::LinksHandler));

    // Presence
    handlers.insert("AWAY", Box::new(user_status::AwayHandler));
    handlers.insert("SETNAME", Box::new(user_status::SetnameHandler));

    // History
    handlers.insert("CHATHISTORY", Box::new(chathistory::ChatHistoryHandler));

    // Operator
    handlers.insert("OPER", Box::new(oper::OperHandler));
    handlers.insert("KILL", Box::new(oper::KillHandler));
    handlers.insert("WALLOPS", Box::new(oper::WallopsHandler));
    handlers.insert("REHASH", Box::new(oper::RehashHandler));
    handlers.insert("DIE", Box::new(oper::DieHandler));
    handlers.insert("RESTART", Box::new(oper::RestartHandler));
    handlers.insert("SQUIT", Box::new(oper::SquitHandler));
    handlers.insert("CONNECT", Box::new(oper::ConnectHandler));
    handlers.insert("TRACE", Box::new(oper::TraceHandler));

    // Service aliases
    handlers.insert("NICKSERV", Box::new(services_alias::NickServAlias));
    handlers.insert("NS", Box::new(services_alias::NickServAlias));
    handlers.insert("CHANSERV", Box::new(services_alias::ChanServAlias));
    handlers.insert("CS", Box::new(services_alias::ChanServAlias));
    handlers.insert("MEMOSERV", Box::new(services_alias::MemoServAlias));
    handlers.insert("MS", Box::new(services_alias::MemoServAlias));

    Registry::new(handlers)
}
