//! The `Convert` action: re-encodes a Field message's payload to a
//! target [`Precision`], upcasting or downcasting the decoded values
//! (spec.md §8 scenario 2: a single-precision partial entering a
//! `convert → aggregate → sink` pipeline must reach the sink as a
//! bit-faithful double). Non-Field messages, and Fields already at the
//! target precision, pass through unchanged.
//!
//! `Message` is immutable once built (see `message/mod.rs`'s doc
//! comment); this rebuilds one from the old one's parts rather than
//! mutating `payload`/`precision` in place.

use crate::domain::{decode_payload, encode_payload};
use crate::message::{Message, Precision, Tag};

pub struct Convert {
    target: Precision,
}

impl Convert {
    pub fn new(target: Precision) -> Self {
        Self { target }
    }

    pub fn execute(&mut self, message: Message) -> Option<Message> {
        if message.tag != Tag::Field || message.precision == self.target {
            return Some(message);
        }

        let values = decode_payload(&message.payload, message.precision);
        let payload = encode_payload(&values, self.target);
        let mut metadata = message.metadata;
        metadata.set(
            "precision",
            match self.target {
                Precision::Single => "single",
                Precision::Double => "double",
            },
        );

        Message::new(
            message.tag,
            message.source,
            message.destination,
            metadata,
            payload,
            message.global_size,
        )
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Metadata, Peer};

    fn field(precision: &str, values: &[f64]) -> Message {
        let mut md = Metadata::new();
        md.set("precision", precision);
        md.set("param", 130i64);
        let prec = if precision == "single" {
            Precision::Single
        } else {
            Precision::Double
        };
        Message::new(
            Tag::Field,
            Peer::new("c", 0),
            Peer::new("s", 0),
            md,
            encode_payload(values, prec),
            values.len() as u64,
        )
        .unwrap()
    }

    #[test]
    fn upcasts_single_to_double_bit_faithfully() {
        let mut convert = Convert::new(Precision::Double);
        let single = field("single", &[1.0, 2.5, -3.0]);

        let out = convert.execute(single).unwrap();
        assert_eq!(out.precision, Precision::Double);
        assert_eq!(decode_payload(&out.payload, Precision::Double), vec![1.0, 2.5, -3.0]);
    }

    #[test]
    fn downcasts_double_to_single() {
        let mut convert = Convert::new(Precision::Single);
        let double = field("double", &[4.0, 8.0]);

        let out = convert.execute(double).unwrap();
        assert_eq!(out.precision, Precision::Single);
        assert_eq!(decode_payload(&out.payload, Precision::Single), vec![4.0, 8.0]);
    }

    #[test]
    fn no_op_when_already_at_target_precision() {
        let mut convert = Convert::new(Precision::Double);
        let double = field("double", &[1.0]);
        let payload_before = double.payload.clone();

        let out = convert.execute(double).unwrap();
        assert_eq!(out.payload, payload_before);
    }

    #[test]
    fn forwards_control_messages_untouched() {
        let mut convert = Convert::new(Precision::Double);
        let mut md = Metadata::new();
        md.set("precision", "single");
        let flush = Message::new(Tag::Flush, Peer::new("c", 0), Peer::new("s", 0), md, vec![], 0).unwrap();

        let out = convert.execute(flush).unwrap();
        assert_eq!(out.tag, Tag::Flush);
    }
}
