//! Crash-recovery supervision for embedded render hosts.
//!
//! A render host (a WebView-style surface whose content runs in a separate
//! process) can lose that process at any time, leaving a blank, frozen
//! surface. This crate supervises one or more such hosts: it detects the
//! loss through lifecycle signals and periodic liveness probes, tears the
//! dead host down, brings up a replacement, restores the captured session
//! state, and verifies the replacement is healthy. Every transition runs
//! through a single serialized state machine that can never run two
//! recoveries at once.
//!
//! The rendering engine itself stays outside the crate: integrators
//! implement [`HostDriver`] and [`RenderHost`] for their environment and
//! hand the driver to a [`RecoveryManager`] (one surface) or a
//! [`SupervisorRegistry`] (many).

pub mod actors;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod manager;
pub mod monitor;
pub mod observer;
pub mod registry;
pub mod snapshot;

pub use actors::{CrashReason, RecoveryState, SupervisorStatus, TriggerOutcome};
pub use config::{DebugLevel, RecoveryConfig, RecoveryMethod};
pub use diagnostics::{DiagnosticsEvent, PhaseOutcome, RecoveryPhase};
pub use error::{HostError, RecoveryError, SnapshotError};
pub use host::{
    HostDriver, LifecycleEvent, LifecycleEventKind, LifecycleSender, RenderHost, RenderHostHandle,
};
pub use manager::RecoveryManager;
pub use monitor::{HealthCheckResult, HealthOutcome};
pub use observer::RecoveryObserver;
pub use registry::SupervisorRegistry;
pub use snapshot::{SnapshotStore, StateSnapshot};
