//! TCP transport: blocking `std::net` sockets framed with
//! [`super::wire`].
//!
//! Grounded on the teacher's `TcpSocketTransport` in
//! `ipc/tcp_socket.rs` — the connection map keyed by a generated id,
//! the background read loop per connection, the length-prefixed
//! framing — reworked from `tokio`'s async streams to
//! `std::net::TcpStream` plus one reader thread per connection,
//! matching the blocking model spec.md §5 calls for.

use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::wire::{decode_message, encode_message};
use super::{Transport, TransportConfig};
use crate::error::TransportError;
use crate::message::{Message, Peer};

type ConnectionId = u64;

struct Connection {
    stream: TcpStream,
}

/// A TCP-backed transport. `connect_to` opens outbound sockets lazily,
/// the first time a message is sent to a given destination; `listen_on`
/// accepts inbound connections on a background thread and feeds every
/// decoded message into a single shared inbox.
pub struct TcpTransport {
    local_peer: Peer,
    connections: Mutex<HashMap<Peer, Connection>>,
    next_connection_id: AtomicU64,
    inbox_tx: Sender<Message>,
    inbox_rx: Receiver<Message>,
    listener_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TcpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let (tx, rx) = channel::bounded(config.pool_size.max(1));
        Ok(Self {
            local_peer: config.local_peer,
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(0),
            inbox_tx: tx,
            inbox_rx: rx,
            listener_handle: Mutex::new(None),
        })
    }

    /// Bind `addr` and spawn a background thread accepting connections,
    /// one reader thread per accepted socket, each decoding frames and
    /// forwarding them into this transport's shared inbox.
    pub fn listen_on<A: ToSocketAddrs>(&self, addr: A) -> Result<(), TransportError> {
        let listener = TcpListener::bind(addr)?;
        let inbox_tx = self.inbox_tx.clone();
        let handle = thread::spawn(move || {
            for incoming in listener.incoming() {
                let stream = match incoming {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let tx = inbox_tx.clone();
                thread::spawn(move || read_loop(stream, tx));
            }
        });
        *self.listener_handle.lock() = Some(handle);
        Ok(())
    }

    /// Register an outbound connection to `peer`, reachable at `addr`.
    /// Also spawns a reader thread so replies on the same socket reach
    /// this transport's inbox.
    pub fn connect_to<A: ToSocketAddrs>(&self, peer: Peer, addr: A) -> Result<(), TransportError> {
        let stream = TcpStream::connect(addr)?;
        let reader_stream = stream.try_clone()?;
        let inbox_tx = self.inbox_tx.clone();
        thread::spawn(move || read_loop(reader_stream, inbox_tx));

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let _ = id;
        self.connections.lock().insert(peer, Connection { stream });
        Ok(())
    }
}

fn read_loop(stream: TcpStream, inbox_tx: Sender<Message>) {
    let mut reader = BufReader::new(stream);
    loop {
        match decode_message(&mut reader) {
            Ok(message) => {
                if inbox_tx.send(message).is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

impl Transport for TcpTransport {
    fn local_peer(&self) -> &Peer {
        &self.local_peer
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        let mut connections = self.connections.lock();
        let conn = connections.get_mut(&message.destination).ok_or_else(|| {
            TransportError::PeerUnreachable(format!(
                "no open connection to {}; call connect_to first",
                message.destination
            ))
        })?;
        let mut buf = Vec::new();
        encode_message(&message, &mut buf)?;
        conn.stream.write_all(&buf)?;
        conn.stream.flush()?;
        Ok(())
    }

    fn receive(&self) -> Result<Option<Message>, TransportError> {
        match self.inbox_rx.recv() {
            Ok(message) => Ok(Some(message)),
            Err(_) => Ok(None),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        self.connections.lock().clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
