//! The `Encode` action: converts an in-memory Field into a wire
//! format understood by downstream consumers (e.g. GRIB).
//!
//! Concrete codec libraries are an external collaborator per spec.md
//! §1's Non-goals ("concrete codec libraries used by the interpolate
//! and encode transforms" are out of scope). This action carries the
//! pluggable seam — a [`Codec`] trait — with a default passthrough
//! implementation so the pipeline stays runnable without one.

use crate::message::{Message, Tag};

pub trait Codec: Send {
    fn encode(&mut self, message: &Message) -> Vec<u8>;
    fn name(&self) -> &'static str;
}

/// No codec configured: the payload passes through unchanged, tagged
/// for visibility in logs.
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn encode(&mut self, message: &Message) -> Vec<u8> {
        message.payload.clone()
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

pub struct Encode {
    codec: Box<dyn Codec>,
}

impl Encode {
    pub fn new(codec: Box<dyn Codec>) -> Self {
        Self { codec }
    }

    pub fn passthrough() -> Self {
        Self::new(Box::new(PassthroughCodec))
    }

    pub fn execute(&mut self, message: Message) -> Option<Message> {
        if message.tag != Tag::Field {
            return Some(message);
        }
        let encoded = self.codec.encode(&message);
        tracing::debug!(codec = self.codec.name(), field_id = %message.field_id, "encoded field");
        let mut out = message;
        out.payload = encoded;
        Some(out)
    }
}
