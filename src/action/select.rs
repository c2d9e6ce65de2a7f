//! The `Select` action: forwards a message iff its metadata matches a
//! configured [`MetadataSelector`], except for control messages which
//! always pass through (spec.md §4.3).

use crate::message::{Message, MetadataSelector};

pub struct Select {
    selector: MetadataSelector,
}

impl Select {
    pub fn new(selector: MetadataSelector) -> Self {
        Self { selector }
    }

    pub fn execute(&mut self, message: Message) -> Option<Message> {
        if message.is_control() || self.selector.matches(&message.metadata) {
            Some(message)
        } else {
            tracing::debug!(field_id = %message.field_id, "dropped by selector");
            None
        }
    }
}
