//! Shared server state.
//!
//! The [`Rookery`] owns every live entity: sessions, remote users,
//! channels, the nick index, per-connection send handles, and the S2S
//! topology. Persistent entities live behind [`crate::db`]; the registry
//! holds only lookup state and never aliases storage rows.

mod broker;
mod channel;
mod remote;
mod session;
mod uid;

pub use channel::{Channel, ChannelModes, JoinDenied, ListEntry, MemberModes, SjoinOutcome, Topic};
pub use remote::RemoteUser;
pub use session::{SaslState, Session, UserModes};
pub use uid::UidGenerator;

use crate::config::Config;
use crate::db::Database;
use crate::security::{RateLimiter, ServerBan};
use crate::sync::link::PeerHandle;
use crate::sync::topology::Topology;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use munin_proto::{irc_to_lower, Message, Source};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

/// Immutable identity of this server, fixed at boot.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub sid: String,
    pub description: String,
    pub network: String,
}

/// One WHOWAS record.
#[derive(Debug, Clone)]
pub struct WhowasEntry {
    pub nick: String,
    pub user: String,
    pub host: String,
    pub realname: String,
    pub seen_at: i64,
}

/// Bound on retained WHOWAS records.
const WHOWAS_CAPACITY: usize = 1024;

/// Send/kill handles for one local connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    /// Bounded outbound queue; the write-serializer drains it in FIFO
    /// order, which is what guarantees per-connection byte ordering.
    pub tx: mpsc::Sender<Message>,
    /// Setting a reason terminates the connection from outside
    /// (KILL, K-line, SendQ exceeded).
    pub kill: watch::Sender<Option<String>>,
}

/// The live-state registry.
pub struct Rookery {
    pub info: ServerInfo,
    config: RwLock<Arc<Config>>,
    pub config_path: String,
    pub started_at: DateTime<Utc>,

    /// Local sessions by UID.
    pub sessions: DashMap<String, Arc<RwLock<Session>>>,
    /// Remote users by UID.
    pub remotes: DashMap<String, RemoteUser>,
    /// Folded nick to UID, local and remote.
    pub nicks: DashMap<String, String>,
    /// Folded channel name to channel.
    pub channels: DashMap<String, Arc<Mutex<Channel>>>,
    /// Connection handles for local sessions.
    pub senders: DashMap<String, ConnHandle>,

    pub uid_gen: UidGenerator,
    pub db: Database,
    pub rate_limiter: RateLimiter,
    /// Cached network bans, mirroring the ban repository.
    pub bans: RwLock<Vec<ServerBan>>,

    /// S2S topology (this server plus everything learned).
    pub topology: Topology,
    /// Directly linked peers by SID.
    pub links: DashMap<String, PeerHandle>,

    /// Process-wide shutdown signal.
    pub shutdown: broadcast::Sender<()>,
    /// Deferred disconnect requests `(uid, reason)`, drained by a worker
    /// so fanout paths never block on teardown.
    pub disconnect_tx: mpsc::Sender<(String, String)>,

    motd: RwLock<Vec<String>>,
    /// Recent departures for WHOWAS, newest first.
    pub whowas: Mutex<std::collections::VecDeque<WhowasEntry>>,
    /// Reconnect-backoff cancel switches, keyed by link-block name.
    /// An operator SQUIT flips the switch; the backoff loop obeys it.
    pub reconnect_cancels: DashMap<String, watch::Sender<bool>>,
}

impl Rookery {
    /// Assemble the registry. The disconnect receiver must be drained by
    /// the caller (see `main`).
    pub fn new(
        config: Config,
        config_path: String,
        db: Database,
    ) -> (Rookery, mpsc::Receiver<(String, String)>) {
        let info = ServerInfo {
            name: config.server.name.clone(),
            sid: config.server.sid.clone(),
            description: config.server.description.clone(),
            network: config.server.network.clone(),
        };
        let topology = Topology::new(&info.sid, &info.name, &info.description);
        let rate_limiter = RateLimiter::new(config.security.rate_limit.clone());
        let motd = config.motd.load_lines();
        let uid_gen = UidGenerator::new(info.sid.clone());
        let (shutdown, _) = broadcast::channel(4);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(1024);

        let rookery = Rookery {
            info,
            config: RwLock::new(Arc::new(config)),
            config_path,
            started_at: Utc::now(),
            sessions: DashMap::new(),
            remotes: DashMap::new(),
            nicks: DashMap::new(),
            channels: DashMap::new(),
            senders: DashMap::new(),
            uid_gen,
            db,
            rate_limiter,
            bans: RwLock::new(Vec::new()),
            topology,
            links: DashMap::new(),
            shutdown,
            disconnect_tx,
            motd: RwLock::new(motd),
            whowas: Mutex::new(std::collections::VecDeque::new()),
            reconnect_cancels: DashMap::new(),
        };
        (rookery, disconnect_rx)
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    /// REHASH: swap the snapshot and signal long-lived subsystems.
    /// Live connections and bucket fill levels are untouched.
    pub fn rehash(&self, new_config: Config) {
        self.rate_limiter.rehash(new_config.security.rate_limit.clone());
        *self.motd.write() = new_config.motd.load_lines();
        *self.config.write() = Arc::new(new_config);
    }

    /// MOTD lines from the current snapshot.
    pub fn motd_lines(&self) -> Vec<String> {
        self.motd.read().clone()
    }

    /// Whether a UID belongs to this server.
    pub fn is_local_uid(&self, uid: &str) -> bool {
        uid.starts_with(&self.info.sid)
    }

    /// Look up a UID by nickname (casemapped).
    pub fn uid_by_nick(&self, nick: &str) -> Option<String> {
        self.nicks.get(&irc_to_lower(nick)).map(|e| e.value().clone())
    }

    /// Claim a nickname for a UID. Fails if taken by someone else.
    pub fn claim_nick(&self, nick: &str, uid: &str) -> bool {
        let folded = irc_to_lower(nick);
        match self.nicks.entry(folded) {
            dashmap::mapref::entry::Entry::Occupied(e) => e.get() == uid,
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(uid.to_string());
                true
            }
        }
    }

    /// Release a nickname if it belongs to the UID.
    pub fn release_nick(&self, nick: &str, uid: &str) {
        let folded = irc_to_lower(nick);
        if let Some(entry) = self.nicks.get(&folded) {
            if entry.value() != uid {
                return;
            }
        }
        self.nicks.remove(&folded);
    }

    /// Source for any known user, local or remote.
    pub fn user_source(&self, uid: &str) -> Option<Source> {
        if let Some(session) = self.sessions.get(uid) {
            return Some(session.read().source());
        }
        self.remotes.get(uid).map(|u| u.source())
    }

    /// Nickname for any known user.
    pub fn user_nick(&self, uid: &str) -> Option<String> {
        if let Some(session) = self.sessions.get(uid) {
            return session.read().nick.clone();
        }
        self.remotes.get(uid).map(|u| u.nick.clone())
    }

    /// Account tag value for any known user.
    pub fn user_account(&self, uid: &str) -> Option<String> {
        if let Some(session) = self.sessions.get(uid) {
            return session.read().account.clone();
        }
        self.remotes.get(uid).and_then(|u| u.account.clone())
    }

    /// Get an existing channel.
    pub fn channel(&self, name: &str) -> Option<Arc<Mutex<Channel>>> {
        self.channels.get(&irc_to_lower(name)).map(|e| e.value().clone())
    }

    /// Get or create a channel; `true` when freshly created.
    pub fn channel_or_create(&self, name: &str) -> (Arc<Mutex<Channel>>, bool) {
        let folded = irc_to_lower(name);
        if let Some(existing) = self.channels.get(&folded) {
            return (existing.value().clone(), false);
        }
        let created = Arc::new(Mutex::new(Channel::new(name.to_string())));
        match self.channels.entry(folded) {
            dashmap::mapref::entry::Entry::Occupied(e) => (e.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(created.clone());
                crate::metrics::ACTIVE_CHANNELS.inc();
                (created, true)
            }
        }
    }

    /// Drop a channel that became empty.
    pub fn destroy_channel(&self, name: &str) {
        if self.channels.remove(&irc_to_lower(name)).is_some() {
            crate::metrics::ACTIVE_CHANNELS.dec();
        }
    }

    /// Remove a user (local or remote) from every channel, broadcasting a
    /// QUIT to local members who share one. Returns the folded channel
    /// names the user occupied.
    pub fn purge_from_channels(&self, uid: &str, quit: &Message) -> Vec<String> {
        let channel_names: Vec<String> = if let Some(session) = self.sessions.get(uid) {
            session.read().channels.iter().cloned().collect()
        } else if let Some(remote) = self.remotes.get(uid) {
            remote.channels.iter().cloned().collect()
        } else {
            Vec::new()
        };

        // One QUIT per observer even across shared channels.
        let mut notified = std::collections::HashSet::new();
        for folded in &channel_names {
            if let Some(channel) = self.channels.get(folded).map(|e| e.value().clone()) {
                let (destroy, members) = {
                    let mut guard = channel.lock();
                    let members: Vec<String> = guard.members.keys().cloned().collect();
                    (guard.remove_member(uid), members)
                };
                for member in members {
                    if member != uid && notified.insert(member.clone()) {
                        self.send(&member, quit.clone());
                    }
                }
                if destroy {
                    self.destroy_channel(folded);
                }
            }
        }
        channel_names
    }

    /// Full local-session teardown: channels, nick index, rate buckets,
    /// sender handle, metrics. The caller broadcasts S2S QUIT separately.
    pub fn remove_session(&self, uid: &str, reason: &str) {
        let Some((_, session)) = self.sessions.remove(uid) else {
            return;
        };
        let (source, nick, registered) = {
            let s = session.read();
            (s.source(), s.nick.clone(), s.registered)
        };

        if let Some(nick) = &nick {
            let s = session.read();
            let mut whowas = self.whowas.lock();
            whowas.push_front(WhowasEntry {
                nick: nick.clone(),
                user: s.user.clone().unwrap_or_default(),
                host: s.host.clone(),
                realname: s.realname.clone().unwrap_or_default(),
                seen_at: Utc::now().timestamp(),
            });
            whowas.truncate(WHOWAS_CAPACITY);
        }

        let quit = Message::new("QUIT", vec![reason.to_string()]).with_source(source);
        self.purge_from_channels(uid, &quit);

        if let Some(nick) = nick {
            self.release_nick(&nick, uid);
        }
        self.senders.remove(uid);
        self.rate_limiter.remove_client(uid);
        crate::metrics::ACTIVE_CONNECTIONS.dec();
        if registered {
            crate::metrics::REGISTERED_USERS.dec();
        }
        debug!(uid = %uid, reason = %reason, "session removed");
    }

    /// Remove a remote user, broadcasting QUIT locally.
    pub fn remove_remote_user(&self, uid: &str, reason: &str) {
        let Some((_, remote)) = self.remotes.remove(uid) else {
            return;
        };
        let quit = Message::new("QUIT", vec![reason.to_string()]).with_source(remote.source());
        // Re-insert briefly so purge can read the channel set.
        self.remotes.insert(uid.to_string(), remote.clone());
        self.purge_from_channels(uid, &quit);
        self.remotes.remove(uid);
        self.release_nick(&remote.nick, uid);
    }

    /// Request an out-of-band disconnect (drained by the main worker).
    pub fn request_disconnect(&self, uid: &str, reason: &str) {
        let _ = self
            .disconnect_tx
            .try_send((uid.to_string(), reason.to_string()));
    }

    /// Trip a connection's kill switch.
    pub fn kill_connection(&self, uid: &str, reason: &str) {
        if let Some(handle) = self.senders.get(uid) {
            let _ = handle.kill.send(Some(reason.to_string()));
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A Rookery over an unopened in-memory database path, for state-only
    /// tests that never touch persistence.
    pub async fn rookery() -> Arc<Rookery> {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "irc.test.example"
            sid = "001"
            description = "test"
            network = "TestNet"

            [[listen]]
            addr = "127.0.0.1:0"
            "#,
        )
        .unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let (rookery, _rx) = Rookery::new(config, "test.toml".into(), db);
        Arc::new(rookery)
    }

    /// Register a fake local session with a sender, returning its UID and
    /// the receiving end of its queue.
    pub fn fake_session(
        rookery: &Rookery,
        nick: &str,
    ) -> (String, mpsc::Receiver<Message>) {
        let uid = rookery.uid_gen.next_uid();
        let mut session = Session::new(uid.clone(), "127.0.0.1".parse().unwrap(), false);
        session.nick = Some(nick.to_string());
        session.user = Some(nick.to_string());
        session.registered = true;
        rookery
            .sessions
            .insert(uid.clone(), Arc::new(RwLock::new(session)));
        rookery.claim_nick(nick, &uid);
        let (tx, rx) = mpsc::channel(64);
        let (kill, _) = watch::channel(None);
        rookery.senders.insert(uid.clone(), ConnHandle { tx, kill });
        (uid, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn nick_claims_are_exclusive_and_casemapped() {
        let rookery = rookery().await;
        assert!(rookery.claim_nick("Alice", "001AAAABA"));
        assert!(!rookery.claim_nick("alice", "001AAAABB"));
        assert!(rookery.claim_nick("ALICE", "001AAAABA"), "re-claim by owner is fine");
        rookery.release_nick("alice", "001AAAABB");
        assert!(rookery.uid_by_nick("Alice").is_some(), "release by non-owner is a no-op");
        rookery.release_nick("alice", "001AAAABA");
        assert!(rookery.uid_by_nick("Alice").is_none());
    }

    #[tokio::test]
    async fn channel_create_and_destroy() {
        let rookery = rookery().await;
        let (_, created) = rookery.channel_or_create("#Test");
        assert!(created);
        let (_, created_again) = rookery.channel_or_create("#test");
        assert!(!created_again, "folded name maps to the same channel");
        rookery.destroy_channel("#TEST");
        assert!(rookery.channel("#test").is_none());
    }

    #[tokio::test]
    async fn remove_session_broadcasts_quit_once() {
        let rookery = rookery().await;
        let (alice, _alice_rx) = fake_session(&rookery, "alice");
        let (bob, mut bob_rx) = fake_session(&rookery, "bob");

        // Shared membership in two channels: bob must still get ONE quit.
        for name in ["#a", "#b"] {
            let (chan, _) = rookery.channel_or_create(name);
            chan.lock().add_member(alice.clone(), MemberModes::default());
            chan.lock().add_member(bob.clone(), MemberModes::default());
            rookery.sessions.get(&alice).unwrap().write().channels.insert(name.to_string());
            rookery.sessions.get(&bob).unwrap().write().channels.insert(name.to_string());
        }

        rookery.remove_session(&alice, "Quit: bye");

        let first = bob_rx.try_recv().expect("bob sees the quit");
        assert_eq!(first.command, "QUIT");
        assert!(bob_rx.try_recv().is_err(), "exactly one QUIT for bob");
        assert!(rookery.uid_by_nick("alice").is_none());
        assert!(rookery.sessions.get(&alice).is_none());
    }
}
