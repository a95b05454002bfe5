//! Actor-based recovery supervision.
//!
//! One [`SupervisorActor`] per render host; its mailbox is the single
//! serialized execution context for the whole recovery state machine.

mod supervisor;

pub mod messages;

pub use messages::{CrashReason, RecoveryState, SupervisorMsg, SupervisorStatus, TriggerOutcome};
pub use supervisor::{SupervisorActor, SupervisorArgs};

#[cfg(test)]
mod tests;
