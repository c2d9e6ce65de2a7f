//! The immutable message envelope and the identifying types it is
//! built from.
//!
//! Grounded in `original_source/src/multio/attic/Message.cc` and the
//! wire-framing contract of spec.md §4.1. A [`Message`] never mutates
//! after construction; actions that need to change it (precision
//! conversion, encoding) build a new one from the old one's parts.

pub mod metadata;
pub mod peer;
pub mod selector;

pub use metadata::{Metadata, MetadataValue};
pub use peer::Peer;
pub use selector::MetadataSelector;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Classification of a message, matching spec.md §3's tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Field,
    Mapping,
    StepComplete,
    Flush,
    Open,
    Close,
    Domain,
    Grib,
    Statistics,
    Notification,
}

impl Tag {
    pub fn as_u8(self) -> u8 {
        match self {
            Tag::Field => 0,
            Tag::Mapping => 1,
            Tag::StepComplete => 2,
            Tag::Flush => 3,
            Tag::Open => 4,
            Tag::Close => 5,
            Tag::Domain => 6,
            Tag::Grib => 7,
            Tag::Statistics => 8,
            Tag::Notification => 9,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Tag::Field,
            1 => Tag::Mapping,
            2 => Tag::StepComplete,
            3 => Tag::Flush,
            4 => Tag::Open,
            5 => Tag::Close,
            6 => Tag::Domain,
            7 => Tag::Grib,
            8 => Tag::Statistics,
            9 => Tag::Notification,
            _ => return None,
        })
    }
}

/// Numeric precision a Field message's payload is encoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    pub fn size_in_bytes(self) -> usize {
        match self {
            Precision::Single => std::mem::size_of::<f32>(),
            Precision::Double => std::mem::size_of::<f64>(),
        }
    }

    pub(crate) fn from_metadata(md: &Metadata) -> Result<Self, MetadataError> {
        match md.get_string_or("precision", "double")? {
            "single" => Ok(Precision::Single),
            "double" => Ok(Precision::Double),
            other => Err(MetadataError::Parse(format!(
                "unknown precision \"{other}\", expected \"single\" or \"double\""
            ))),
        }
    }
}

/// The identifying metadata keys a `fieldId` is derived from. Two
/// messages sharing a `fieldId` MUST describe the same global field
/// (spec.md §3).
const IDENTIFYING_KEYS: &[&str] = &["param", "parameter", "level", "step", "domain"];

fn derive_field_id(md: &Metadata) -> String {
    let mut parts = Vec::new();
    for key in IDENTIFYING_KEYS {
        if let Ok(value) = md.get(key) {
            parts.push(format!("{key}={value:?}"));
        }
    }
    parts.join(",")
}

/// An immutable message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub tag: Tag,
    pub source: Peer,
    pub destination: Peer,
    pub metadata: Metadata,
    pub field_id: String,
    pub payload: Vec<u8>,
    pub global_size: u64,
    pub precision: Precision,
}

impl Message {
    /// Construct a new message, deriving `fieldId` from metadata and
    /// validating the Field-message payload-size invariant.
    pub fn new(
        tag: Tag,
        source: Peer,
        destination: Peer,
        mut metadata: Metadata,
        payload: Vec<u8>,
        global_size: u64,
    ) -> Result<Self, MetadataError> {
        let precision = Precision::from_metadata(&metadata)?;
        let field_id = derive_field_id(&metadata);

        if tag == Tag::Field {
            let unit = precision.size_in_bytes();
            if payload.len() % unit != 0 {
                return Err(MetadataError::Parse(format!(
                    "Field payload of {} bytes is not a multiple of the {}-byte precision unit",
                    payload.len(),
                    unit
                )));
            }
            // globalSize rides inside metadata on the wire (spec.md §4.1's
            // frame has no dedicated slot for it); keep both in sync.
            if !metadata.has("globalSize") {
                metadata.set("globalSize", global_size as i64);
            }
        }

        Ok(Self {
            tag,
            source,
            destination,
            metadata,
            field_id,
            payload,
            global_size,
            precision,
        })
    }

    /// Rebuild a message from its wire-decoded parts: `global_size`
    /// comes back out of `metadata["globalSize"]` rather than riding
    /// as a separate frame field.
    pub fn from_wire_parts(
        tag: Tag,
        source: Peer,
        destination: Peer,
        field_id: String,
        metadata: Metadata,
        payload: Vec<u8>,
    ) -> Result<Self, MetadataError> {
        let precision = Precision::from_metadata(&metadata)?;
        let global_size = metadata.get_long_or("globalSize", 0)? as u64;
        Ok(Self {
            tag,
            source,
            destination,
            metadata,
            field_id,
            payload,
            global_size,
            precision,
        })
    }

    pub fn is_control(&self) -> bool {
        matches!(self.tag, Tag::StepComplete | Tag::Flush)
    }

    /// Number of elements held in `payload` at this message's
    /// precision (the *local* size, as opposed to `global_size`).
    pub fn local_len(&self) -> usize {
        self.payload.len() / self.precision.size_in_bytes()
    }
}
