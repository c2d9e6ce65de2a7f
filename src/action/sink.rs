//! The `Sink` action: writes a message's payload out and terminates
//! the pipeline for it (spec.md §4.3).
//!
//! Concrete file/object-store backends are an external collaborator
//! per spec.md §1's Non-goals; this keeps a minimal file-backed
//! target plus a `Null` (discard) target so the pipeline is runnable
//! end to end without a real storage integration.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::error::{SimioError, SinkError};
use crate::message::Message;

pub enum SinkTarget {
    File { name: String, path: PathBuf },
    Null,
}

pub struct Sink {
    target: SinkTarget,
    handle: Option<File>,
}

impl Sink {
    pub fn new(target: SinkTarget) -> Self {
        Self { target, handle: None }
    }

    pub fn execute(&mut self, message: Message) -> Result<Option<Message>, SimioError> {
        match &self.target {
            SinkTarget::Null => Ok(None),
            SinkTarget::File { name, path } => {
                if self.handle.is_none() {
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .map_err(|source| SinkError::Write {
                            sink: name.clone(),
                            source,
                        })?;
                    self.handle = Some(file);
                }
                let file = self.handle.as_mut().expect("just initialized above");
                file.write_all(&message.payload).map_err(|source| SinkError::Write {
                    sink: name.clone(),
                    source,
                })?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Metadata, Peer, Tag};

    #[test]
    fn writes_payload_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut sink = Sink::new(SinkTarget::File {
            name: "test-sink".to_string(),
            path: path.clone(),
        });

        let mut md = Metadata::new();
        md.set("precision", "double");
        let message = Message::new(Tag::Field, Peer::new("c", 0), Peer::new("s", 0), md, vec![1, 2, 3, 4, 5, 6, 7, 8], 1).unwrap();
        assert!(sink.execute(message).unwrap().is_none());

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn null_sink_discards_without_error() {
        let mut sink = Sink::new(SinkTarget::Null);
        let mut md = Metadata::new();
        md.set("precision", "double");
        let message = Message::new(Tag::Field, Peer::new("c", 0), Peer::new("s", 0), md, vec![0u8; 8], 1).unwrap();
        assert!(sink.execute(message).unwrap().is_none());
    }
}
