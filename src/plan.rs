//! A `Plan`: one named, ordered action table a message is walked
//! through.
//!
//! Grounded in `original_source/src/multio/action/Plan.cc`: a plan owns
//! its actions head-first and measures the wall-clock time it spends
//! processing, logging the total once on teardown via a scoped timer.
//! Ported here as a `Duration` accumulator plus a `Drop` impl, rather
//! than the original's RAII `ScopedTimer` around every `process` call,
//! since Rust's `Instant`/`Drop` give the same "always logged, even on
//! an early return" guarantee without needing a guard object at each
//! call site.

use std::time::{Duration, Instant};

use crate::action::{is_always_forwarded, Action, ActionContext};
use crate::error::SimioError;
use crate::message::Message;

pub struct Plan {
    name: String,
    actions: Vec<Action>,
    ctx: ActionContext,
    total_time: Duration,
    messages_processed: u64,
}

impl Plan {
    pub fn new(name: impl Into<String>, actions: Vec<Action>, ctx: ActionContext) -> Self {
        Self {
            name: name.into(),
            actions,
            ctx,
            total_time: Duration::ZERO,
            messages_processed: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Walk `message` through this plan's action table by index,
    /// forwarding whatever each action hands back until one of them
    /// drops it (returns an empty `Vec`) or the table is exhausted.
    ///
    /// An action may also fan a single message out into several (only
    /// `Statistics` does, completing more than one in-flight window on
    /// one `StepComplete`/`Flush`); each output continues independently
    /// from the next index, so this walks a stack of `(action_index,
    /// Message)` pairs rather than a single `message` slot.
    ///
    /// Control messages (`StepComplete`, `Flush`) still walk the whole
    /// table — every action along the way decides for itself whether
    /// to act on or merely forward them — but a non-terminal action
    /// that would otherwise drop a regular message must not drop a
    /// control one (spec.md §4.3); that's enforced per-action, not
    /// here, so this loop just does the walking.
    pub fn process(&mut self, message: Message) -> Result<(), SimioError> {
        let started = Instant::now();
        let is_control = is_always_forwarded(&message);
        let mut stack: Vec<(usize, Message)> = vec![(0, message)];

        while let Some((index, msg)) = stack.pop() {
            if index >= self.actions.len() {
                continue;
            }

            let action = &mut self.actions[index];
            let outputs = match action.execute(msg, &self.ctx) {
                Ok(outputs) => outputs,
                Err(err) => {
                    self.total_time += started.elapsed();
                    return Err(err);
                }
            };

            if outputs.is_empty() {
                if is_control {
                    tracing::warn!(
                        plan = %self.name,
                        action_index = index,
                        action = action.type_name(),
                        "control message unexpectedly dropped mid-pipeline"
                    );
                }
            } else {
                for out in outputs {
                    stack.push((index + 1, out));
                }
            }
        }

        self.total_time += started.elapsed();
        self.messages_processed += 1;
        Ok(())
    }
}

impl Drop for Plan {
    fn drop(&mut self) {
        tracing::info!(
            plan = %self.name,
            messages = self.messages_processed,
            total_ms = self.total_time.as_secs_f64() * 1000.0,
            "plan finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::select::Select;
    use crate::action::sink::{Sink, SinkTarget};
    use crate::domain::DomainRegistry;
    use crate::message::{Metadata, MetadataSelector, Peer, Tag};

    fn ctx() -> ActionContext {
        ActionContext {
            domain_registry: DomainRegistry::new(),
        }
    }

    fn field(category: &str) -> Message {
        let mut md = Metadata::new();
        md.set("precision", "double");
        md.set("category", category);
        Message::new(Tag::Field, Peer::new("c", 0), Peer::new("s", 0), md, vec![0u8; 8], 1).unwrap()
    }

    #[test]
    fn walks_actions_in_order_until_dropped() {
        let selector = MetadataSelector::from_yaml("match: { category: [ocean] }").unwrap();
        let actions = vec![
            Action::Select(Select::new(selector)),
            Action::Sink(Sink::new(SinkTarget::Null)),
        ];
        let mut plan = Plan::new("test", actions, ctx());

        assert!(plan.process(field("ocean")).is_ok());
        assert!(plan.process(field("atmosphere")).is_ok());
        // Both messages were offered to the plan; `messages_processed`
        // counts offers, not how far down the table each one got.
        assert_eq!(plan.messages_processed, 2);
    }
}
