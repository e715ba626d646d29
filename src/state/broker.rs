//! Message fanout.
//!
//! All delivery is best-effort: a failed send is logged (and may schedule
//! a slow-client disconnect) but never surfaces to the caller. Ordering is
//! established here: each recipient's bounded queue preserves arrival
//! order, and the write-serializer drains it FIFO.

use super::Rookery;
use munin_proto::{irc_to_lower, Message};
use std::collections::HashSet;
use tracing::{debug, trace};

impl Rookery {
    /// Enqueue one message for a local connection.
    ///
    /// A full queue marks the client slow and schedules a disconnect; the
    /// message is dropped.
    pub fn send(&self, uid: &str, msg: Message) {
        let Some(handle) = self.senders.get(uid) else {
            trace!(uid = %uid, "send to unknown connection dropped");
            return;
        };
        match handle.tx.try_send(msg) {
            Ok(()) => {}
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                debug!(uid = %uid, "send queue full, disconnecting slow client");
                self.request_disconnect(uid, "SendQ exceeded");
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                trace!(uid = %uid, "send to closing connection dropped");
            }
        }
    }

    /// Fan a message out to every local member of a channel.
    pub fn send_channel(&self, channel_name: &str, msg: &Message, except: Option<&str>) {
        let Some(channel) = self.channel(channel_name) else {
            return;
        };
        let members: Vec<String> = channel.lock().members.keys().cloned().collect();
        for member in members {
            if Some(member.as_str()) == except || !self.is_local_uid(&member) {
                continue;
            }
            self.send(&member, msg.clone());
        }
    }

    /// Fan out to the deduplicated union of several channels' members: a
    /// user in two of them gets the line once.
    pub fn send_channels(&self, channel_names: &[String], msg: &Message, except: Option<&str>) {
        let mut seen: HashSet<String> = HashSet::new();
        for name in channel_names {
            let Some(channel) = self.channels.get(&irc_to_lower(name)).map(|e| e.value().clone())
            else {
                continue;
            };
            let members: Vec<String> = channel.lock().members.keys().cloned().collect();
            for member in members {
                if Some(member.as_str()) == except || !self.is_local_uid(&member) {
                    continue;
                }
                if seen.insert(member.clone()) {
                    self.send(&member, msg.clone());
                }
            }
        }
    }

    /// Send to every user who shares at least one channel with `uid`,
    /// deduplicated. Used for QUIT/NICK/AWAY visibility.
    pub fn send_common_peers(&self, uid: &str, msg: &Message, include_self: bool) {
        let channel_names: Vec<String> = if let Some(session) = self.sessions.get(uid) {
            session.read().channels.iter().cloned().collect()
        } else if let Some(remote) = self.remotes.get(uid) {
            remote.channels.iter().cloned().collect()
        } else {
            Vec::new()
        };
        let except = if include_self { None } else { Some(uid) };
        self.send_channels(&channel_names, msg, except);
        if include_self && self.is_local_uid(uid) {
            // send_channels already delivered to self if a channel was
            // shared; cover the channel-less case.
            if channel_names.is_empty() {
                self.send(uid, msg.clone());
            }
        }
    }

    /// Send to all local operators.
    pub fn send_operators(&self, msg: &Message) {
        for entry in self.sessions.iter() {
            let is_oper = entry.value().read().modes.oper;
            if is_oper {
                self.send(entry.key(), msg.clone());
            }
        }
    }

    /// Send one message down a direct S2S link, addressed by SID or by
    /// server name. Messages for transitively-reached servers go to the
    /// direct peer on the route.
    pub fn send_server(&self, sid_or_name: &str, msg: Message) {
        let sid = if self.links.contains_key(sid_or_name) {
            Some(sid_or_name.to_string())
        } else {
            self.topology
                .sid_by_name(sid_or_name)
                .or_else(|| {
                    // A known but indirect SID routes via its direct peer.
                    self.topology.route_to(sid_or_name, &self.info.sid)
                })
                .and_then(|target| {
                    if self.links.contains_key(&target) {
                        Some(target)
                    } else {
                        self.topology.route_to(&target, &self.info.sid)
                    }
                })
        };

        let Some(sid) = sid else {
            debug!(target = %sid_or_name, "no route to server, message dropped");
            return;
        };
        if let Some(link) = self.links.get(&sid) {
            link.value().send(msg);
        }
    }

    /// Broadcast to every direct link except one (split horizon).
    pub fn broadcast_servers(&self, msg: &Message, except_sid: Option<&str>) {
        for entry in self.links.iter() {
            if Some(entry.key().as_str()) == except_sid {
                continue;
            }
            entry.value().send(msg.clone());
        }
    }

    /// Channels that have at least one member behind the given direct
    /// link. Used to decide which channel traffic to forward.
    pub fn channel_has_members_behind(&self, channel_name: &str, link_sid: &str) -> bool {
        let Some(channel) = self.channel(channel_name) else {
            return false;
        };
        let members: Vec<String> = channel.lock().members.keys().cloned().collect();
        members.iter().any(|uid| {
            if self.is_local_uid(uid) {
                return false;
            }
            let origin = &uid[..3.min(uid.len())];
            origin == link_sid
                || self
                    .topology
                    .route_to(origin, &self.info.sid)
                    .is_some_and(|via| via == link_sid)
        })
    }
}
