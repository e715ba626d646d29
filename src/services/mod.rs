//! In-process service pseudo-users.
//!
//! NickServ, ChanServ, and MemoServ are message recipients with fixed
//! UIDs (`<sid>AAAAA{N,C,M}`) introduced during burst as oper+service
//! users. A PRIVMSG to one of them is parsed as a sub-command; every
//! reply is a NOTICE from the service. They are flagged so the netsplit
//! cascade and QUIT propagation skip them.

mod chanserv;
mod memoserv;
mod nickserv;

use crate::state::{RemoteUser, Rookery, UserModes};
use munin_proto::{irc_eq, Message, Source};
use std::collections::HashSet;
use std::sync::Arc;

/// The three services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    NickServ,
    ChanServ,
    MemoServ,
}

impl ServiceKind {
    pub const ALL: &'static [ServiceKind] = &[
        ServiceKind::NickServ,
        ServiceKind::ChanServ,
        ServiceKind::MemoServ,
    ];

    /// UID suffix letter.
    pub fn letter(self) -> char {
        match self {
            ServiceKind::NickServ => 'N',
            ServiceKind::ChanServ => 'C',
            ServiceKind::MemoServ => 'M',
        }
    }

    pub fn nick(self) -> &'static str {
        match self {
            ServiceKind::NickServ => "NickServ",
            ServiceKind::ChanServ => "ChanServ",
            ServiceKind::MemoServ => "MemoServ",
        }
    }

    fn realname(self) -> &'static str {
        match self {
            ServiceKind::NickServ => "Nickname registration service",
            ServiceKind::ChanServ => "Channel registration service",
            ServiceKind::MemoServ => "Memo service",
        }
    }

    fn by_name(name: &str) -> Option<ServiceKind> {
        ServiceKind::ALL
            .iter()
            .copied()
            .find(|kind| irc_eq(kind.nick(), name))
    }
}

/// Install the service pseudo-users into the registry. Called once at
/// startup, before any listener accepts.
pub fn register_services(rookery: &Rookery) {
    for &kind in ServiceKind::ALL {
        let uid = rookery.uid_gen.service_uid(kind.letter());
        let service = RemoteUser {
            uid: uid.clone(),
            nick: kind.nick().to_string(),
            user: "services".to_string(),
            host: rookery.info.name.clone(),
            vhost: None,
            realname: kind.realname().to_string(),
            modes: UserModes {
                oper: true,
                bot: true,
                ..UserModes::default()
            },
            account: Some(kind.nick().to_string()),
            away: None,
            introduced_ts: rookery.started_at.timestamp(),
            channels: HashSet::new(),
            is_service: true,
        };
        rookery.claim_nick(kind.nick(), &uid);
        rookery.remotes.insert(uid, service);
    }
}

/// Entry point for traffic addressed to a service nickname.
pub async fn handle_service_message(
    rookery: &Arc<Rookery>,
    from_uid: &str,
    service: &str,
    text: &str,
) {
    let Some(kind) = ServiceKind::by_name(service) else {
        return;
    };
    let mut words = text.split_whitespace();
    let Some(command) = words.next().map(str::to_ascii_uppercase) else {
        notice(rookery, kind, from_uid, "No command given. Try HELP.");
        return;
    };
    let rest: Vec<&str> = words.collect();

    match kind {
        ServiceKind::NickServ => nickserv::handle(rookery, from_uid, &command, &rest).await,
        ServiceKind::ChanServ => chanserv::handle(rookery, from_uid, &command, &rest).await,
        ServiceKind::MemoServ => memoserv::handle(rookery, from_uid, &command, &rest).await,
    }
}

/// NOTICE from a service to a local user.
pub(crate) fn notice(rookery: &Rookery, kind: ServiceKind, to_uid: &str, text: &str) {
    let Some(target_nick) = rookery.user_nick(to_uid) else {
        return;
    };
    let source = Source::user(kind.nick(), "services", rookery.info.name.clone());
    rookery.send(
        to_uid,
        Message::new("NOTICE", vec![target_nick, text.to_string()]).with_source(source),
    );
}

/// The sender's identified account, or a scolding NOTICE.
pub(crate) fn require_account(
    rookery: &Rookery,
    kind: ServiceKind,
    uid: &str,
) -> Option<String> {
    match rookery.user_account(uid) {
        Some(account) => Some(account),
        None => {
            notice(
                rookery,
                kind,
                uid,
                "You must be identified to your account first. See /msg NickServ HELP IDENTIFY.",
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::rookery;

    #[tokio::test]
    async fn services_are_registered_with_fixed_uids() {
        let rookery = rookery().await;
        register_services(&rookery);

        let ns = rookery.uid_by_nick("nickserv").expect("NickServ registered");
        assert_eq!(ns, "001AAAAAN");
        let service = rookery.remotes.get(&ns).unwrap();
        assert!(service.is_service);
        assert!(service.modes.oper);

        assert_eq!(rookery.uid_by_nick("CHANSERV").unwrap(), "001AAAAAC");
        assert_eq!(rookery.uid_by_nick("MemoServ").unwrap(), "001AAAAAM");
    }

    #[test]
    fn service_lookup_is_casemapped() {
        assert_eq!(ServiceKind::by_name("nickserv"), Some(ServiceKind::NickServ));
        assert_eq!(ServiceKind::by_name("MEMOSERV"), Some(ServiceKind::MemoServ));
        assert_eq!(ServiceKind::by_name("OtherServ"), None);
    }
}
