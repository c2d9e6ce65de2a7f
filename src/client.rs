//! `Client`: the simulation-facing façade over a [`Transport`] — open
//! and close connections, register a domain, push field partials,
//! signal a step-complete barrier, send a one-off notification.
//!
//! Grounded in `original_source/src/multio/server/tools/
//! multio-hammer.cc`'s `spawnClients`/`sendData` (the open → domain →
//! {field...} → step-complete → close sequence every client follows)
//! and spec.md §4.8. Buffering is delegated to
//! [`crate::transport::BufferedSender`] so a caller can push one field
//! per call without paying a transport round trip each time.

use std::sync::Arc;

use crate::domain::Domain;
use crate::error::{SimioError, TransportError};
use crate::message::{Message, Metadata, Peer, Tag};
use crate::transport::{BufferedSender, Transport};

/// Number of buffered messages per destination before an automatic
/// flush, absent a more specific tuning knob in spec.md §6.
const DEFAULT_HIGH_WATER_MARK: usize = 64;

pub struct Client {
    local_peer: Peer,
    servers: Vec<Peer>,
    sender: BufferedSender,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, servers: Vec<Peer>) -> Self {
        let local_peer = transport.local_peer().clone();
        Self {
            local_peer,
            servers,
            sender: BufferedSender::new(transport, DEFAULT_HIGH_WATER_MARK),
        }
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local_peer
    }

    /// Announce this client to every known server (spec.md §4.8).
    pub fn open_connections(&self) -> Result<(), SimioError> {
        for server in &self.servers {
            let message = self.control_message(Tag::Open, server.clone())?;
            self.sender.buffered_send(message)?;
            self.sender.flush(server)?;
        }
        Ok(())
    }

    /// Tell every known server this client is done, flushing any
    /// buffered data first so nothing is silently lost.
    pub fn close_connections(&self) -> Result<(), SimioError> {
        self.sender.flush_all()?;
        for server in &self.servers {
            let message = self.control_message(Tag::Close, server.clone())?;
            self.sender.buffered_send(message)?;
            self.sender.flush(server)?;
        }
        Ok(())
    }

    /// Register this client's partition of `name` with `server`.
    ///
    /// `global_size` is the field's element count, the same value
    /// later carried by `Field` messages for this domain — it lets
    /// the server bound-check an unstructured index list as it parses
    /// the descriptor (spec.md §3's `Unstructured` invariant).
    pub fn write_domain(
        &self,
        name: &str,
        domain: &Domain,
        global_size: u64,
        server: &Peer,
    ) -> Result<(), SimioError> {
        let mut metadata = Metadata::new();
        metadata.set("precision", "double");
        metadata.set("domain", name);
        metadata.set("structured", matches!(domain, Domain::Structured(_)));
        let message = Message::new(
            Tag::Domain,
            self.local_peer.clone(),
            server.clone(),
            metadata,
            domain.to_bytes(),
            global_size,
        )?;
        self.sender.buffered_send(message)?;
        self.sender.flush(server)?;
        Ok(())
    }

    /// Push one local partial of a field to `server`, buffered per
    /// spec.md §4.1's `bufferedSend`.
    pub fn write_field(
        &self,
        metadata: Metadata,
        local_values: &[f64],
        global_size: u64,
        server: &Peer,
    ) -> Result<(), SimioError> {
        let precision = crate::message::Precision::from_metadata(&metadata)
            .map_err(SimioError::Metadata)?;
        let payload = crate::domain::encode_payload(local_values, precision);
        let message = Message::new(
            Tag::Field,
            self.local_peer.clone(),
            server.clone(),
            metadata,
            payload,
            global_size,
        )?;
        self.sender.buffered_send(message)?;
        Ok(())
    }

    /// Signal a time-step barrier to every known server, flushing
    /// first so every field for this step has already been sent.
    pub fn write_step_complete(&self, metadata: Metadata) -> Result<(), SimioError> {
        self.sender.flush_all()?;
        for server in &self.servers {
            let message = Message::new(
                Tag::StepComplete,
                self.local_peer.clone(),
                server.clone(),
                metadata.clone(),
                vec![],
                0,
            )?;
            self.sender.buffered_send(message)?;
            self.sender.flush(server)?;
        }
        Ok(())
    }

    /// Broadcast a free-form notification to every known server.
    pub fn notify(&self, metadata: Metadata) -> Result<(), SimioError> {
        for server in &self.servers {
            let message = Message::new(
                Tag::Notification,
                self.local_peer.clone(),
                server.clone(),
                metadata.clone(),
                vec![],
                0,
            )?;
            self.sender.buffered_send(message)?;
            self.sender.flush(server)?;
        }
        Ok(())
    }

    fn control_message(&self, tag: Tag, server: Peer) -> Result<Message, TransportError> {
        let mut metadata = Metadata::new();
        metadata.set("precision", "double");
        Message::new(tag, self.local_peer.clone(), server, metadata, vec![], 0)
            .map_err(|e| TransportError::ProtocolViolation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{thread::ThreadTransport, LocalPeerTag, TransportConfig};

    fn config(peer: Peer, tag: LocalPeerTag) -> TransportConfig {
        TransportConfig {
            local_peer: peer,
            peer_tag: tag,
            pool_size: 4,
            buffer_size: 4096,
        }
    }

    #[test]
    fn open_and_close_reach_the_server() {
        let server_peer = Peer::new("client-test-server", 0);
        let client_peer = Peer::new("client-test-client", 0);
        let server: Arc<dyn Transport> =
            Arc::new(ThreadTransport::new(config(server_peer.clone(), LocalPeerTag::Server)));
        let client_transport: Arc<dyn Transport> =
            Arc::new(ThreadTransport::new(config(client_peer, LocalPeerTag::Client)));

        let client = Client::new(client_transport, vec![server_peer]);
        client.open_connections().unwrap();
        client.close_connections().unwrap();

        let open = server.receive().unwrap().unwrap();
        assert_eq!(open.tag, Tag::Open);
        let close = server.receive().unwrap().unwrap();
        assert_eq!(close.tag, Tag::Close);
    }

    #[test]
    fn write_field_is_buffered_until_flush() {
        let server_peer = Peer::new("client-field-test-server", 0);
        let client_peer = Peer::new("client-field-test-client", 0);
        let server: Arc<dyn Transport> =
            Arc::new(ThreadTransport::new(config(server_peer.clone(), LocalPeerTag::Server)));
        let client_transport: Arc<dyn Transport> =
            Arc::new(ThreadTransport::new(config(client_peer, LocalPeerTag::Client)));

        let client = Client::new(client_transport, vec![server_peer.clone()]);
        let mut md = Metadata::new();
        md.set("precision", "double");
        md.set("param", 130i64);
        client.write_field(md, &[1.0, 2.0], 2, &server_peer).unwrap();
        client.write_step_complete(Metadata::new()).unwrap();

        let field = server.receive().unwrap().unwrap();
        assert_eq!(field.tag, Tag::Field);
        let step_complete = server.receive().unwrap().unwrap();
        assert_eq!(step_complete.tag, Tag::StepComplete);
    }
}
