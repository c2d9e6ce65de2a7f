//! In-process transport: every peer is a thread in this same
//! program, exchanging `Message` values directly with no
//! serialization step.
//!
//! Grounded on `original_source/src/sandbox/ThreadTransport.h`: one
//! bounded queue per destination peer, held in a single process-wide
//! map guarded by a mutex. Used for single-process tests and for
//! colocated client/server setups where paying for TCP framing would
//! be wasted work.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crossbeam::channel::{self, Receiver, Sender};

use super::{Transport, TransportConfig};
use crate::error::TransportError;
use crate::message::{Message, Peer};

type Hub = Mutex<HashMap<Peer, Sender<Message>>>;

fn hub() -> &'static Hub {
    static HUB: OnceLock<Hub> = OnceLock::new();
    HUB.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Depth of each peer's inbound queue, matching the bounded
/// `eckit::Queue<Message>` the reference `ThreadTransport` hands out
/// per peer.
const QUEUE_DEPTH: usize = 256;

pub struct ThreadTransport {
    local_peer: Peer,
    inbox_rx: Receiver<Message>,
}

impl ThreadTransport {
    pub fn new(config: TransportConfig) -> Self {
        let (tx, rx) = channel::bounded(QUEUE_DEPTH);
        {
            let mut map = hub().lock().expect("thread transport hub mutex poisoned");
            map.insert(config.local_peer.clone(), tx);
        }
        Self {
            local_peer: config.local_peer,
            inbox_rx: rx,
        }
    }
}

impl Transport for ThreadTransport {
    fn local_peer(&self) -> &Peer {
        &self.local_peer
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        let sender = {
            let map = hub().lock().expect("thread transport hub mutex poisoned");
            map.get(&message.destination).cloned()
        };
        match sender {
            Some(s) => s
                .send(message)
                .map_err(|_| TransportError::PeerUnreachable("destination peer has closed".into())),
            None => Err(TransportError::PeerUnreachable(format!(
                "no thread-transport peer registered as {}",
                message.destination
            ))),
        }
    }

    fn receive(&self) -> Result<Option<Message>, TransportError> {
        match self.inbox_rx.recv() {
            Ok(message) => Ok(Some(message)),
            Err(_) => Ok(None),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        // Unregistering first means any sender that races us here gets
        // `PeerUnreachable` instead of silently queuing into a peer
        // that is going away.
        let mut map = hub().lock().expect("thread transport hub mutex poisoned");
        map.remove(&self.local_peer);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Metadata, Tag};
    use crate::transport::LocalPeerTag;

    fn config(peer: Peer) -> TransportConfig {
        TransportConfig {
            local_peer: peer,
            peer_tag: LocalPeerTag::Client,
            pool_size: 4,
            buffer_size: 4096,
        }
    }

    #[test]
    fn delivers_a_message_to_its_destination() {
        let server = Peer::new("thread-test-server", 0);
        let client = Peer::new("thread-test-client", 0);

        let server_t = ThreadTransport::new(config(server.clone()));
        let client_t = ThreadTransport::new(config(client.clone()));

        let mut md = Metadata::new();
        md.set("precision", "double");
        let msg = Message::new(Tag::Notification, client.clone(), server.clone(), md, vec![], 0).unwrap();
        client_t.send(msg.clone()).unwrap();

        let received = server_t.receive().unwrap().unwrap();
        assert_eq!(received, msg);
    }

    #[test]
    fn send_to_unknown_peer_fails() {
        let client = Peer::new("thread-test-unknown", 0);
        let client_t = ThreadTransport::new(config(client.clone()));
        let mut md = Metadata::new();
        md.set("precision", "double");
        let msg = Message::new(
            Tag::Notification,
            client,
            Peer::new("nobody-is-listening", 0),
            md,
            vec![],
            0,
        )
        .unwrap();
        let err = client_t.send(msg).unwrap_err();
        assert!(matches!(err, TransportError::PeerUnreachable(_)));
    }
}
