//! Mailbox protocol for the recovery supervisor.
//!
//! All state transitions for one render host are serialized through this
//! message enum: the lifecycle pump, the monitor ticker, and the external
//! facade are all just senders into the same mailbox.
//!
//! # Message patterns
//!
//! - **Request-reply**: variants carrying a `reply` oneshot channel.
//! - **Fire-and-forget**: crash signals, ticks, `Shutdown`.
//! - **Internal**: `RecoveryFinished` / `VerificationFinished` are sent by
//!   tasks the supervisor spawned itself; external callers never construct
//!   them.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::config::RecoveryConfig;
use crate::error::RecoveryError;
use crate::host::{LifecycleEvent, RenderHostHandle};
use crate::monitor::HealthCheckResult;
use crate::observer::RecoveryObserver;

/// Why a recovery was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashReason {
    /// The hosting environment reported the render host's process gone.
    ProcessTerminated,
    /// A liveness probe (periodic or out-of-cycle) came back failed.
    HealthCheckFailed,
    /// An external caller forced recovery via `trigger_recovery`.
    Manual,
}

impl CrashReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            CrashReason::ProcessTerminated => "process_terminated",
            CrashReason::HealthCheckFailed => "health_check_failed",
            CrashReason::Manual => "manual",
        }
    }
}

/// Reply for `trigger_recovery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyInProgress,
}

/// The supervisor's recovery state machine position.
///
/// The non-`Idle` states are the sole guard against concurrent recovery:
/// any crash signal arriving while not `Idle` is dropped, never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryState {
    Idle,
    Recovering,
    VerifyingHealth,
}

/// Point-in-time view of the supervisor, for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub state: RecoveryState,
    pub monitoring: bool,
    pub host: Option<Uuid>,
    pub host_alive: bool,
    pub last_health: Option<HealthCheckResult>,
    pub recoveries_completed: u64,
    pub recoveries_failed: u64,
    pub signals_dropped: u64,
}

/// Result reported by a spawned recovery task.
pub struct RecoveryTaskOutcome {
    pub(crate) result: Result<RecoveredHost, RecoveryError>,
    pub(crate) primary_failed: bool,
    pub(crate) used_fallback: bool,
    pub(crate) snapshot_restored: bool,
    /// On cancellation the untouched previous handle comes back here so the
    /// supervisor can reinstall it.
    pub(crate) surviving_host: Option<Arc<RenderHostHandle>>,
}

pub struct RecoveredHost {
    pub(crate) handle: Arc<RenderHostHandle>,
}

pub enum SupervisorMsg {
    /// A lifecycle signal from the hosting environment, forwarded by the
    /// pump task. Events for a host that is no longer current are dropped.
    Lifecycle(LifecycleEvent),

    /// Requests a recovery attempt. Dropped (with a log and a counter) when
    /// the state machine is not `Idle`.
    CrashSignal { reason: CrashReason },

    /// One beat of the health monitor. Skipped entirely while a recovery is
    /// in progress so a tick can never re-signal a running incident.
    HealthTick,

    /// Out-of-cycle probe; does not alter monitor timing.
    CheckHealthNow {
        reply: oneshot::Sender<HealthCheckResult>,
    },

    /// Forces a crash signal regardless of monitor state.
    TriggerRecovery {
        reply: oneshot::Sender<TriggerOutcome>,
    },

    /// Makes the next probe report `Unresponsive` without touching the
    /// render host. Test-only hook for validating the recovery path.
    SimulateFailure,

    /// (Re)starts the monitor with the given tunables. Idempotent: an
    /// already-running ticker is cancelled and replaced, never stacked.
    StartMonitoring {
        config: RecoveryConfig,
        reply: oneshot::Sender<()>,
    },

    /// Stops the monitor. A no-op when it is not running.
    StopMonitoring { reply: oneshot::Sender<()> },

    Status {
        reply: oneshot::Sender<SupervisorStatus>,
    },

    RegisterObserver {
        observer: Arc<dyn RecoveryObserver>,
    },

    /// Internal: the spawned recovery task finished.
    RecoveryFinished(RecoveryTaskOutcome),

    /// Internal: the post-recovery verification probe finished.
    VerificationFinished { result: HealthCheckResult },

    /// Stops the supervisor, cancelling the monitor and any in-flight
    /// recovery attempt.
    Shutdown,
}
