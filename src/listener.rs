//! Listener: turns a [`Transport`]'s inbound message stream into
//! connection lifecycle events plus a queue of payload messages for a
//! [`crate::plan::Plan`] to process.
//!
//! Grounded directly on `original_source/src/sandbox/Listener.cc`'s
//! `listen()`: a dispatcher thread drains a bounded queue while the
//! calling thread loops `transport.receive()`, tracking each peer's
//! connection as it opens and closes, until every known connection has
//! closed — at which point it drains the queue one last time and
//! returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{SimioError, TransportError};
use crate::message::{Message, Peer, Tag};
use crate::transport::Transport;

/// Per-peer connection lifecycle, matching `Listener.h`'s implicit
/// state machine (a peer is known once `Open` arrives, gone once
/// `Close` arrives).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Streaming,
    Closed,
}

/// Depth of the queue handed to the dispatcher thread. Spec.md §5
/// calls this "bounded" without a fixed number; sized generously
/// enough that a slow Plan doesn't stall the receive loop under normal
/// load.
const MSG_QUEUE_DEPTH: usize = 1024;

/// How a received message is turned into work for the dispatcher.
/// Implemented by `Plan` (and by test doubles).
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, message: Message) -> Result<(), SimioError>;
}

impl<F> Dispatch for F
where
    F: Fn(Message) -> Result<(), SimioError> + Send + Sync,
{
    fn dispatch(&self, message: Message) -> Result<(), SimioError> {
        self(message)
    }
}

pub struct Listener {
    transport: Arc<dyn Transport>,
    connections: Mutex<HashMap<Peer, ConnectionState>>,
    queue_tx: Sender<Message>,
    queue_rx: Receiver<Message>,
    /// Count of messages handed to the queue but not yet finished
    /// processing by the dispatcher thread. Incremented by the receive
    /// loop right before `send`, decremented by the dispatcher right
    /// after `dispatch` returns — reaching zero is what "queue
    /// drained" means, not merely "channel empty".
    pending: Arc<AtomicUsize>,
    /// Number of `Close` messages received for a peer this listener
    /// never saw an `Open` from (spec.md §4.2: "Close on an unknown
    /// peer is an error"). Each occurrence is logged as a
    /// `TransportError::ProtocolViolation` and the message is dropped
    /// rather than mutating connection state.
    protocol_violations: AtomicUsize,
}

impl Listener {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = channel::bounded(MSG_QUEUE_DEPTH);
        Self {
            transport,
            connections: Mutex::new(HashMap::new()),
            queue_tx: tx,
            queue_rx: rx,
            pending: Arc::new(AtomicUsize::new(0)),
            protocol_violations: AtomicUsize::new(0),
        }
    }

    pub fn connection_state(&self, peer: &Peer) -> Option<ConnectionState> {
        self.connections.lock().get(peer).copied()
    }

    /// Number of `Close`-on-unknown-peer protocol violations observed
    /// so far.
    pub fn protocol_violation_count(&self) -> usize {
        self.protocol_violations.load(Ordering::Acquire)
    }

    pub fn open_connection_count(&self) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|s| **s != ConnectionState::Closed)
            .count()
    }

    /// Run the receive loop until every connection the transport
    /// opened has also closed, dispatching every non-control-lifecycle
    /// message to `dispatch` on a background thread. Blocks the
    /// calling thread for the duration of the run.
    pub fn listen(&self, dispatch: Arc<dyn Dispatch>) -> Result<(), SimioError> {
        let queue_rx = self.queue_rx.clone();
        let pending = self.pending.clone();
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let dispatcher_stop = stop.clone();
        let dispatcher = thread::spawn(move || loop {
            match queue_rx.recv_timeout(Duration::from_millis(5)) {
                Ok(message) => {
                    if let Err(err) = dispatch.dispatch(message) {
                        tracing::error!(error = %err, "dispatch failed for queued message");
                    }
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
                Err(channel::RecvTimeoutError::Timeout) => {
                    if dispatcher_stop.load(Ordering::Acquire) && pending.load(Ordering::Acquire) == 0 {
                        return;
                    }
                }
                Err(channel::RecvTimeoutError::Disconnected) => return,
            }
        });

        loop {
            let message = match self.transport.receive() {
                Ok(Some(m)) => m,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(error = %err, "listener transport receive failed");
                    break;
                }
            };

            match message.tag {
                Tag::Open => {
                    let mut connections = self.connections.lock();
                    if connections.contains_key(&message.source) {
                        tracing::warn!(peer = %message.source, "duplicate Open ignored, connection already known");
                    } else {
                        connections.insert(message.source.clone(), ConnectionState::Open);
                    }
                }
                Tag::Close => {
                    let mut connections = self.connections.lock();
                    match connections.get_mut(&message.source) {
                        Some(state) => *state = ConnectionState::Closed,
                        None => {
                            self.protocol_violations.fetch_add(1, Ordering::AcqRel);
                            let err = TransportError::ProtocolViolation(format!(
                                "Close received from unknown peer {}",
                                message.source
                            ));
                            tracing::error!(error = %err, "dropping Close for unknown peer");
                        }
                    }
                }
                _ => {
                    self.connections
                        .lock()
                        .entry(message.source.clone())
                        .and_modify(|s| *s = ConnectionState::Streaming)
                        .or_insert(ConnectionState::Streaming);
                    self.pending.fetch_add(1, Ordering::AcqRel);
                    if self.queue_tx.send(message).is_err() {
                        self.pending.fetch_sub(1, Ordering::AcqRel);
                        break;
                    }
                }
            }

            let conns = self.connections.lock();
            if !conns.is_empty() && conns.values().all(|s| *s == ConnectionState::Closed) {
                break;
            }
        }

        // Every connection has closed (or the transport gave up); tell
        // the dispatcher to stop once it has drained what's queued.
        stop.store(true, Ordering::Release);
        let _ = dispatcher.join();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Metadata;
    use crate::transport::{thread::ThreadTransport, LocalPeerTag, TransportConfig};
    use std::sync::atomic::AtomicUsize as Counter;

    fn config(peer: Peer) -> TransportConfig {
        TransportConfig {
            local_peer: peer,
            peer_tag: LocalPeerTag::Server,
            pool_size: 4,
            buffer_size: 4096,
        }
    }

    #[test]
    fn listener_tracks_open_then_close_and_drains_queue() {
        let server_peer = Peer::new("listener-test-server", 0);
        let client_peer = Peer::new("listener-test-client", 0);

        let server: Arc<dyn Transport> = Arc::new(ThreadTransport::new(config(server_peer.clone())));
        let client = ThreadTransport::new(config(client_peer.clone()));

        let mut md = Metadata::new();
        md.set("precision", "double");

        let open = Message::new(Tag::Open, client_peer.clone(), server_peer.clone(), md.clone(), vec![], 0).unwrap();
        let field = Message::new(
            Tag::Notification,
            client_peer.clone(),
            server_peer.clone(),
            md.clone(),
            vec![],
            0,
        )
        .unwrap();
        let close = Message::new(Tag::Close, client_peer.clone(), server_peer.clone(), md, vec![], 0).unwrap();

        client.send(open).unwrap();
        client.send(field).unwrap();
        client.send(close).unwrap();

        let listener = Listener::new(server);
        let received = Arc::new(Counter::new(0));
        let received_clone = received.clone();
        let dispatch: Arc<dyn Dispatch> = Arc::new(move |_msg: Message| {
            received_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        listener.listen(dispatch).unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(
            listener.connection_state(&client_peer),
            Some(ConnectionState::Closed)
        );
    }

    #[test]
    fn duplicate_open_is_ignored_not_reset() {
        let server_peer = Peer::new("listener-dup-open-server", 0);
        let client_peer = Peer::new("listener-dup-open-client", 0);

        let server: Arc<dyn Transport> = Arc::new(ThreadTransport::new(config(server_peer.clone())));
        let client = ThreadTransport::new(config(client_peer.clone()));

        let mut md = Metadata::new();
        md.set("precision", "double");

        let open_a = Message::new(Tag::Open, client_peer.clone(), server_peer.clone(), md.clone(), vec![], 0).unwrap();
        let open_b = Message::new(Tag::Open, client_peer.clone(), server_peer.clone(), md.clone(), vec![], 0).unwrap();
        let close = Message::new(Tag::Close, client_peer.clone(), server_peer.clone(), md, vec![], 0).unwrap();

        client.send(open_a).unwrap();
        client.send(open_b).unwrap();
        client.send(close).unwrap();

        let listener = Listener::new(server);
        let dispatch: Arc<dyn Dispatch> = Arc::new(|_msg: Message| Ok(()));
        listener.listen(dispatch).unwrap();

        assert_eq!(
            listener.connection_state(&client_peer),
            Some(ConnectionState::Closed)
        );
        assert_eq!(listener.protocol_violation_count(), 0);
    }

    #[test]
    fn close_on_unknown_peer_is_a_protocol_violation() {
        let server_peer = Peer::new("listener-unknown-close-server", 0);
        let unknown_peer = Peer::new("listener-unknown-close-client", 0);

        let server_transport: Arc<dyn Transport> =
            Arc::new(ThreadTransport::new(config(server_peer.clone())));
        let client = ThreadTransport::new(config(unknown_peer.clone()));

        let mut md = Metadata::new();
        md.set("precision", "double");
        let close = Message::new(Tag::Close, unknown_peer.clone(), server_peer.clone(), md, vec![], 0).unwrap();
        client.send(close).unwrap();

        let listener = Arc::new(Listener::new(server_transport.clone()));
        let dispatch: Arc<dyn Dispatch> = Arc::new(|_msg: Message| Ok(()));

        // No connection was ever opened, so the receive loop's
        // "every known connection closed" check never fires; run the
        // listener on a background thread, wait for the violation to
        // be recorded, then close the transport to unblock the
        // listener's `receive()` call so the test thread can join it.
        let handle = {
            let listener = listener.clone();
            thread::spawn(move || listener.listen(dispatch))
        };

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while listener.protocol_violation_count() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(listener.protocol_violation_count(), 1);
        assert_eq!(listener.connection_state(&unknown_peer), None);

        server_transport.close().unwrap();
        handle.join().unwrap().unwrap();
    }
}
