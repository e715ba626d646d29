//! Handle for one direct S2S link.

use munin_proto::Message;
use tokio::sync::{mpsc, watch};
use tracing::warn;

/// Outbound queue depth for a peer link. Sized so that a full burst fits;
/// overflowing it is a protocol-level failure, not backpressure.
pub const PEER_QUEUE_DEPTH: usize = 32_768;

/// Send/teardown handle for a directly linked server.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub sid: String,
    pub name: String,
    tx: mpsc::Sender<Message>,
    kill: watch::Sender<Option<String>>,
}

impl PeerHandle {
    pub fn new(
        sid: String,
        name: String,
        tx: mpsc::Sender<Message>,
        kill: watch::Sender<Option<String>>,
    ) -> PeerHandle {
        PeerHandle { sid, name, tx, kill }
    }

    /// Enqueue a message for the peer. S2S queues never drop traffic:
    /// overflow forces the link down (SQUIT follows from the teardown).
    pub fn send(&self, msg: Message) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = %self.name, "S2S send queue exceeded, dropping link");
                let _ = self.kill.send(Some("SendQ exceeded".to_string()));
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Tear the link down with a reason.
    pub fn close(&self, reason: &str) {
        let _ = self.kill.send(Some(reason.to_string()));
    }
}
