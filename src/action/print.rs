//! The `Print`/Debug action: logs a message then forwards it
//! unchanged. Named in spec.md §4.3's action list without further
//! definition; shaped after the sibling actions in
//! `original_source/src/sandbox/actions/` and the sample
//! `{"type": "Print", "stream": "error"}` configuration in
//! `PlanConfigurations.h`.

use crate::message::Message;

pub struct Print {
    label: String,
}

impl Print {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }

    pub fn execute(&mut self, message: Message) -> Option<Message> {
        tracing::info!(
            plan_action = %self.label,
            tag = ?message.tag,
            field_id = %message.field_id,
            source = %message.source,
            "message observed"
        );
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Metadata, Peer, Tag};

    #[test]
    fn forwards_every_message_unchanged() {
        let mut md = Metadata::new();
        md.set("precision", "double");
        let message = Message::new(Tag::Notification, Peer::new("c", 0), Peer::new("s", 0), md, vec![], 0).unwrap();
        let mut print = Print::new("debug-print");
        let out = print.execute(message.clone()).unwrap();
        assert_eq!(out, message);
    }
}
