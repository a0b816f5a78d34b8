//! Lifecycle Manager: the single writer of session state.
//!
//! Each poll gathers facts from the tracker, SCM and runtime, runs the pure
//! [`transition::decide`] function, appends the resulting event, persists the
//! record, and only then dispatches reactions for the new events. Sessions
//! are polled concurrently under a bounded pool; each session is guarded by
//! its own lock and cancellation token in [`SessionCoordinator`].

pub mod cleanup;
pub mod context;
pub mod coordinator;
pub mod manager;
mod observe;
mod perf;
pub mod prompts;
pub mod reaction;
pub mod transition;
pub mod webhook;

pub use cleanup::{teardown_resources, TeardownReport};
pub use context::LifecycleContext;
pub use coordinator::{SessionCoordinator, SessionSlot};
pub use manager::{LifecycleManager, PollOutcome, ScanReport};
pub use perf::LifecyclePerfSnapshot;
pub use transition::{decide, is_valid_transition, Decision, ObservedFacts, SessionView};
pub use webhook::{WebhookOutcome, WebhookRejection};
