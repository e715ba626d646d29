//! Netsplit handling.
//!
//! When a link dies we compute the downstream set behind it, synthesize
//! QUITs for every user on those servers (quit reason is the
//! `"<upstream> <lost>"` pair clients recognize), prune the topology, and
//! propagate SQUIT to the remaining links.

use crate::state::Rookery;
use munin_proto::{Message, Source};
use tracing::{debug, info};

/// Tear down everything behind `lost_sid`. Safe to call for any SID; a
/// no-longer-known server is a no-op. `except_link` suppresses SQUIT
/// propagation back up the link the news arrived on (split horizon).
pub fn handle_netsplit(rookery: &Rookery, lost_sid: &str, reason: &str, except_link: Option<&str>) {
    let Some(lost) = rookery.topology.get(lost_sid) else {
        debug!(sid = %lost_sid, "netsplit for unknown server ignored");
        return;
    };

    let upstream_name = lost
        .uplink
        .as_deref()
        .and_then(|up| rookery.topology.get(up))
        .map(|s| s.name)
        .unwrap_or_else(|| rookery.info.name.clone());
    let quit_reason = format!("{} {}", upstream_name, lost.name);

    let downstream = rookery.topology.downstream_sids(lost_sid);
    info!(
        lost = %lost.name,
        sid = %lost_sid,
        downstream = downstream.len(),
        reason = %reason,
        "netsplit"
    );

    // Users on removed servers vanish; services are never cascade-removed.
    let affected: Vec<String> = rookery
        .remotes
        .iter()
        .filter(|entry| {
            let user = entry.value();
            !user.is_service && downstream.iter().any(|sid| sid == user.sid())
        })
        .map(|entry| entry.key().clone())
        .collect();

    info!(users = affected.len(), "netsplit mass quit");
    for uid in &affected {
        rookery.remove_remote_user(uid, &quit_reason);
    }

    // Deepest servers first, so parents never dangle.
    for sid in downstream.iter().rev() {
        rookery.topology.remove_server(sid);
    }
    if rookery.links.remove(lost_sid).is_some() {
        crate::metrics::LINKED_SERVERS.dec();
    }

    // Tell the rest of the network.
    rookery.broadcast_servers(
        &Message::new("SQUIT", vec![lost.name.clone(), reason.to_string()])
            .with_source(Source::server(&rookery.info.sid)),
        except_link,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::*;
    use crate::state::{MemberModes, RemoteUser};
    use crate::sync::topology::LinkedServer;
    use std::collections::HashSet;

    fn remote(uid: &str, nick: &str, channels: &[&str]) -> RemoteUser {
        RemoteUser {
            uid: uid.into(),
            nick: nick.into(),
            user: nick.into(),
            host: "h.example".into(),
            vhost: None,
            realname: nick.into(),
            modes: Default::default(),
            account: None,
            away: None,
            introduced_ts: 100,
            channels: channels.iter().map(|c| c.to_string()).collect::<HashSet<_>>(),
            is_service: false,
        }
    }

    fn server(sid: &str, name: &str, hop: u8, uplink: &str) -> LinkedServer {
        LinkedServer {
            sid: sid.into(),
            name: name.into(),
            description: String::new(),
            hop_count: hop,
            uplink: Some(uplink.into()),
            is_direct: hop == 1,
        }
    }

    #[tokio::test]
    async fn cascade_removes_downstream_users_and_servers() {
        // Topology: us(001) - B(002) - C(003); users on B and C share #x
        // with a local user.
        let rookery = rookery().await;
        rookery.topology.add_server(server("002", "b.example", 1, "001"));
        rookery.topology.add_server(server("003", "c.example", 2, "002"));

        let (local, mut local_rx) = fake_session(&rookery, "carol");
        let (chan, _) = rookery.channel_or_create("#x");
        for (uid, nick) in [("002AAAA1", "bob"), ("003BBBB1", "bert")] {
            rookery.remotes.insert(uid.to_string(), remote(uid, nick, &["#x"]));
            rookery.claim_nick(nick, uid);
            chan.lock().add_member(uid.to_string(), MemberModes::default());
        }
        chan.lock().add_member(local.clone(), MemberModes::default());
        rookery
            .sessions
            .get(&local)
            .unwrap()
            .write()
            .channels
            .insert("#x".to_string());

        handle_netsplit(&rookery, "002", "Read error", None);

        // Both remote users are gone, everywhere.
        assert!(rookery.remotes.get("002AAAA1").is_none());
        assert!(rookery.remotes.get("003BBBB1").is_none());
        assert!(rookery.uid_by_nick("bob").is_none());
        assert_eq!(chan.lock().members.len(), 1);

        // Topology retains only us.
        assert!(!rookery.topology.contains_sid("002"));
        assert!(!rookery.topology.contains_sid("003"));
        assert!(rookery.topology.contains_sid("001"));

        // The local observer saw both QUITs with the split reason.
        let mut reasons = Vec::new();
        while let Ok(msg) = local_rx.try_recv() {
            if msg.command == "QUIT" {
                reasons.push(msg.params[0].clone());
            }
        }
        assert_eq!(reasons.len(), 2);
        for reason in reasons {
            assert_eq!(reason, "irc.test.example b.example");
        }
    }

    #[tokio::test]
    async fn services_survive_netsplit() {
        let rookery = rookery().await;
        crate::services::register_services(&rookery);
        rookery.topology.add_server(server("002", "b.example", 1, "001"));

        handle_netsplit(&rookery, "002", "gone", None);

        assert!(rookery.uid_by_nick("NickServ").is_some());
        assert!(rookery.remotes.get("001AAAAAN").is_some());
    }

    #[tokio::test]
    async fn sibling_branches_survive() {
        let rookery = rookery().await;
        rookery.topology.add_server(server("002", "b.example", 1, "001"));
        rookery.topology.add_server(server("004", "d.example", 1, "001"));
        rookery.remotes.insert("004AAAA1".into(), remote("004AAAA1", "dave", &[]));
        rookery.claim_nick("dave", "004AAAA1");

        handle_netsplit(&rookery, "002", "gone", None);

        assert!(rookery.topology.contains_sid("004"));
        assert!(rookery.uid_by_nick("dave").is_some());
    }
}
