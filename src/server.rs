//! `Server`: owns a [`Transport`], a [`Listener`], and the ordered list
//! of [`Plan`]s every incoming message is offered to.
//!
//! Grounded in `original_source/src/multio/server/MultioServer.cc`
//! (construction from a transport plus a failure-handling scope around
//! every dispatched message — there is no dedicated `Server.cc`/`.h`
//! under `examples/original_source/`, only this monolithic server) and
//! spec.md §5's "every incoming message is offered to each plan in
//! order" rule. SPEC_FULL.md's Open Question 1
//! resolves to exposing exactly one `Server::new` path that always
//! installs a failure-aware dispatch scope, rather than an opt-in
//! wrapper — callers who want a different policy pass their own
//! `failure_handler` instead of reaching for a second constructor.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::action::ActionContext;
use crate::error::{FailureAction, SimioError};
use crate::listener::Listener;
use crate::message::Message;
use crate::plan::Plan;
use crate::transport::Transport;

/// Decides what happens to a [`SimioError`] raised while dispatching
/// one message to one plan.
pub type FailureHandler = Box<dyn Fn(&SimioError) -> FailureAction + Send + Sync>;

/// The default failure handler: always propagate. Spec.md §7's
/// per-error-kind guidance (warn-and-drop for domain/aggregation
/// issues, fatal for configuration issues) is implemented by each
/// action returning `Ok(None)` instead of `Err` for the recoverable
/// cases, so by the time an error reaches here it is one the plan
/// could not itself recover from.
fn rethrow(_err: &SimioError) -> FailureAction {
    FailureAction::Rethrow
}

pub struct Server {
    transport: Arc<dyn Transport>,
    listener: Listener,
    plans: Mutex<Vec<Plan>>,
    failure_handler: FailureHandler,
}

impl Server {
    pub fn new(transport: Arc<dyn Transport>, plans: Vec<Plan>) -> Self {
        Self::with_failure_handler(transport, plans, Box::new(rethrow))
    }

    pub fn with_failure_handler(
        transport: Arc<dyn Transport>,
        plans: Vec<Plan>,
        failure_handler: FailureHandler,
    ) -> Self {
        let listener = Listener::new(transport.clone());
        Self {
            transport,
            listener,
            plans: Mutex::new(plans),
            failure_handler,
        }
    }

    /// Offer `message` to every plan, in configured order, applying
    /// this server's [`FailureAction`] policy to whatever a plan's
    /// `process` returns.
    pub fn dispatch(&self, message: Message) -> Result<(), SimioError> {
        let mut plans = self.plans.lock();
        for plan in plans.iter_mut() {
            let mut to_process = message.clone();
            loop {
                match plan.process(to_process.clone()) {
                    Ok(()) => break,
                    Err(err) => match (self.failure_handler)(&err) {
                        FailureAction::Ignore => {
                            tracing::warn!(plan = plan.name(), error = %err, "ignoring plan failure");
                            break;
                        }
                        FailureAction::Retry => {
                            tracing::warn!(plan = plan.name(), error = %err, "retrying after plan failure");
                            to_process = message.clone();
                            continue;
                        }
                        FailureAction::AbortTransport => {
                            tracing::error!(plan = plan.name(), error = %err, "aborting transport after plan failure");
                            self.transport.abort(&err.to_string())?;
                            return Err(err);
                        }
                        FailureAction::Rethrow => return Err(err),
                    },
                }
            }
        }
        Ok(())
    }

    /// Run the listener loop, offering every received message to this
    /// server's plans, until every known connection has closed. Blocks
    /// the calling thread.
    pub fn run(self: Arc<Self>) -> Result<(), SimioError> {
        let dispatcher = self.clone();
        self.listener.listen(Arc::new(move |message: Message| dispatcher.dispatch(message)))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn plan_count(&self) -> usize {
        self.plans.lock().len()
    }
}

/// Build a fresh [`ActionContext`] shared by every plan a `Server`
/// owns — one domain registry for the whole process, matching
/// spec.md §4.5's "process-wide" framing.
pub fn shared_context() -> ActionContext {
    ActionContext {
        domain_registry: crate::domain::DomainRegistry::new(),
    }
}
