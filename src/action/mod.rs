//! The action pipeline: a linear chain of stateful transforms a
//! message flows through on its way from the Listener to a sink.
//!
//! Grounded in spec.md §4.3 and §9's design note: "Model Action as a
//! tagged variant... plus an optional successor index into a
//! contiguous action table owned by the Plan." Rather than a linked
//! list of boxed trait objects, [`crate::plan::Plan`] holds a flat
//! `Vec<Action>` built in configured (head-first) order and walks it
//! with a plain index loop — simpler lifetimes, one allocation, no
//! dynamic dispatch through `Rc`/`Arc`.

pub mod aggregation;
pub mod convert;
pub mod encode;
pub mod print;
pub mod select;
pub mod sink;
pub mod statistics;

use crate::domain::DomainRegistry;
use crate::error::SimioError;
use crate::message::Message;

/// Shared, read-mostly state every action may need, threaded through
/// from `Server`/`Plan` construction rather than reached for through a
/// global (per spec.md §9's note on contexts vs. process statics).
#[derive(Clone)]
pub struct ActionContext {
    pub domain_registry: DomainRegistry,
}

/// One stage of a Plan's pipeline.
pub enum Action {
    Select(select::Select),
    Aggregation(aggregation::Aggregation),
    Statistics(statistics::Statistics),
    Convert(convert::Convert),
    Encode(encode::Encode),
    Sink(sink::Sink),
    Print(print::Print),
    Null,
}

impl Action {
    /// Consume `message`, returning every message to forward to the
    /// next action in the Plan's table — zero if this action dropped
    /// or terminally consumed it (e.g. a Sink write), one in the
    /// common case, or more than one when an action fans a single
    /// control message out into several results (spec.md §3's
    /// ownership note: "payload buffers may be shared... if an action
    /// needs to clone for fan-out"; `Statistics` is the one action
    /// that does, since a single `StepComplete`/`Flush` can complete
    /// several in-flight windows at once).
    pub fn execute(
        &mut self,
        message: Message,
        ctx: &ActionContext,
    ) -> Result<Vec<Message>, SimioError> {
        match self {
            Action::Select(a) => Ok(a.execute(message).into_iter().collect()),
            Action::Aggregation(a) => a.execute(message, ctx).map(|m| m.into_iter().collect()),
            Action::Statistics(a) => Ok(a.execute(message)),
            Action::Convert(a) => Ok(a.execute(message).into_iter().collect()),
            Action::Encode(a) => Ok(a.execute(message).into_iter().collect()),
            Action::Sink(a) => a.execute(message).map(|m| m.into_iter().collect()),
            Action::Print(a) => Ok(a.execute(message).into_iter().collect()),
            Action::Null => Ok(Vec::new()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Select(_) => "Select",
            Action::Aggregation(_) => "Aggregation",
            Action::Statistics(_) => "Statistics",
            Action::Convert(_) => "Convert",
            Action::Encode(_) => "Encode",
            Action::Sink(_) => "Sink",
            Action::Print(_) => "Print",
            Action::Null => "Null",
        }
    }
}

/// True for the two control tags that every non-terminal action must
/// forward regardless of its own filtering logic (spec.md §4.3).
pub fn is_always_forwarded(message: &Message) -> bool {
    message.is_control()
}
