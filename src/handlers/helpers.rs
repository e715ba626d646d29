//! Shared handler utilities.

use crate::error::{HandlerError, HandlerResult};
use crate::state::Rookery;
use munin_proto::{Capability, Message};
use std::collections::HashSet;

/// Require a minimum parameter count.
pub fn require_params(msg: &Message, n: usize) -> Result<(), HandlerError> {
    if msg.params.len() < n {
        Err(HandlerError::NeedMoreParams)
    } else {
        Ok(())
    }
}

/// `server-time` tag value for now.
pub fn server_time_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Fresh msgid.
pub fn new_msgid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Strip tags a recipient has not negotiated. Tag-capability mapping:
/// `time` needs server-time, `account` needs account-tag, `msgid` and
/// other named tags ride on message-tags, `batch`/`label` need their caps.
pub fn filter_tags_for(caps: &HashSet<Capability>, msg: &Message) -> Message {
    let Some(tags) = &msg.tags else {
        return msg.clone();
    };
    let kept: Vec<_> = tags
        .iter()
        .filter(|tag| match tag.0.as_str() {
            "time" => caps.contains(&Capability::ServerTime),
            "account" => caps.contains(&Capability::AccountTag),
            "batch" => caps.contains(&Capability::Batch),
            "label" => caps.contains(&Capability::LabeledResponse),
            _ => caps.contains(&Capability::MessageTags),
        })
        .cloned()
        .collect();
    let mut filtered = msg.clone();
    filtered.tags = if kept.is_empty() { None } else { Some(kept) };
    filtered
}

/// Deliver a tagged message to one local user, stripping tags per their
/// negotiated capabilities.
pub fn deliver_tagged(rookery: &Rookery, uid: &str, msg: &Message) {
    let Some(session) = rookery.sessions.get(uid).map(|e| e.value().clone()) else {
        return;
    };
    let filtered = {
        let guard = session.read();
        filter_tags_for(&guard.caps, msg)
    };
    rookery.send(uid, filtered);
}

/// Run a handler body only when the session is an operator.
pub fn require_oper(ctx: &crate::handlers::Context<'_>) -> HandlerResult {
    let is_oper = ctx
        .session()
        .map(|s| s.read().modes.oper)
        .unwrap_or(false);
    if is_oper {
        Ok(())
    } else {
        Err(HandlerError::NoPrivileges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use munin_proto::Tag;

    #[test]
    fn tag_filtering_by_cap() {
        let msg = Message::privmsg("#c", "hi")
            .with_tag("time", Some("2023-01-01T00:00:00.000Z".into()))
            .with_tag("msgid", Some("abc".into()))
            .with_tag("account", Some("alice".into()));

        let none: HashSet<Capability> = HashSet::new();
        assert!(filter_tags_for(&none, &msg).tags.is_none());

        let mut st = HashSet::new();
        st.insert(Capability::ServerTime);
        let filtered = filter_tags_for(&st, &msg);
        assert_eq!(
            filtered.tags.unwrap(),
            vec![Tag("time".into(), Some("2023-01-01T00:00:00.000Z".into()))]
        );

        let mut all = HashSet::new();
        all.insert(Capability::ServerTime);
        all.insert(Capability::MessageTags);
        all.insert(Capability::AccountTag);
        assert_eq!(filter_tags_for(&all, &msg).tags.unwrap().len(), 3);
    }

    #[test]
    fn msgids_are_unique() {
        assert_ne!(new_msgid(), new_msgid());
    }

    #[test]
    fn server_time_format() {
        let t = server_time_now();
        assert!(t.ends_with('Z'));
        assert!(t.contains('T'));
    }
}
