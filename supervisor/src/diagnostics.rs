//! Structured diagnostics for every supervisor state transition.
//!
//! Pure observer: events are fanned out over a lossy broadcast channel and
//! mirrored into `tracing` logs and `metrics` counters. Delivery is
//! fire-and-forget; a slow or absent subscriber can never block or influence
//! the recovery control flow.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::DebugLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryPhase {
    MonitorStarted,
    MonitorStopped,
    ProbeCompleted,
    SignalDropped,
    RecoveryStarting,
    SnapshotCaptured,
    FallbackEngaged,
    SnapshotRestored,
    RecoveryCompleted,
    RecoveryFailed,
    /// Emitted alongside failures when `show_debug_alerts` is set; the
    /// subscriber decides how (or whether) to present it.
    AlertRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseOutcome {
    Ok,
    Degraded,
    Failed,
}

/// One structured event per state transition.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsEvent {
    pub phase: RecoveryPhase,
    pub outcome: PhaseOutcome,
    pub timestamp: DateTime<Utc>,
    pub host: Option<Uuid>,
    pub detail: Option<String>,
}

impl DiagnosticsEvent {
    /// The verbosity an event needs the sink to be configured at before it
    /// is broadcast. Failures always pass; per-tick probe chatter only at
    /// `Verbose`.
    fn required_level(&self) -> DebugLevel {
        if self.outcome == PhaseOutcome::Failed {
            return DebugLevel::Quiet;
        }
        match self.phase {
            RecoveryPhase::ProbeCompleted => DebugLevel::Verbose,
            _ => DebugLevel::Normal,
        }
    }
}

pub struct DiagnosticsSink {
    tx: broadcast::Sender<DiagnosticsEvent>,
    level: RwLock<DebugLevel>,
    alerts_enabled: AtomicBool,
}

impl DiagnosticsSink {
    pub fn new(buffer_size: usize, level: DebugLevel, alerts_enabled: bool) -> Self {
        describe_metrics();
        let (tx, _) = broadcast::channel(buffer_size);
        Self {
            tx,
            level: RwLock::new(level),
            alerts_enabled: AtomicBool::new(alerts_enabled),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticsEvent> {
        self.tx.subscribe()
    }

    /// Applied on reconfiguration; takes effect for subsequent events.
    pub fn reconfigure(&self, level: DebugLevel, alerts_enabled: bool) {
        *self.level.write() = level;
        self.alerts_enabled.store(alerts_enabled, Ordering::SeqCst);
    }

    pub fn emit(
        &self,
        phase: RecoveryPhase,
        outcome: PhaseOutcome,
        host: Option<Uuid>,
        detail: Option<String>,
    ) {
        let event = DiagnosticsEvent {
            phase,
            outcome,
            timestamp: Utc::now(),
            host,
            detail,
        };

        match event.outcome {
            PhaseOutcome::Failed => {
                error!(phase = ?event.phase, host = ?event.host, detail = ?event.detail, "recovery diagnostic")
            }
            PhaseOutcome::Degraded => {
                info!(phase = ?event.phase, host = ?event.host, detail = ?event.detail, "recovery diagnostic")
            }
            PhaseOutcome::Ok => {
                debug!(phase = ?event.phase, host = ?event.host, "recovery diagnostic")
            }
        }

        let alert = self.alerts_enabled.load(Ordering::SeqCst)
            && event.outcome == PhaseOutcome::Failed
            && event.phase != RecoveryPhase::AlertRequested;

        if *self.level.read() >= event.required_level() {
            // Send errors just mean nobody is subscribed.
            let _ = self.tx.send(event.clone());
        }

        if alert {
            self.emit(
                RecoveryPhase::AlertRequested,
                PhaseOutcome::Failed,
                event.host,
                event.detail,
            );
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "renderguard_crash_signals_total",
        "Crash signals received, by reason"
    );
    metrics::describe_counter!(
        "renderguard_crash_signals_dropped_total",
        "Crash signals dropped because a recovery was already in progress"
    );
    metrics::describe_counter!(
        "renderguard_recovery_attempts_total",
        "Recovery attempts started"
    );
    metrics::describe_counter!(
        "renderguard_recovery_outcomes_total",
        "Completed recovery incidents, by outcome"
    );
    metrics::describe_counter!(
        "renderguard_health_probes_total",
        "Liveness probes executed, by outcome"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quiet_level_only_passes_failures() {
        let sink = DiagnosticsSink::new(16, DebugLevel::Quiet, false);
        let mut rx = sink.subscribe();

        sink.emit(RecoveryPhase::RecoveryStarting, PhaseOutcome::Ok, None, None);
        sink.emit(RecoveryPhase::RecoveryFailed, PhaseOutcome::Failed, None, None);

        let event = rx.try_recv().expect("failure event should pass");
        assert_eq!(event.phase, RecoveryPhase::RecoveryFailed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn probe_events_require_verbose() {
        let sink = DiagnosticsSink::new(16, DebugLevel::Normal, false);
        let mut rx = sink.subscribe();

        sink.emit(RecoveryPhase::ProbeCompleted, PhaseOutcome::Ok, None, None);
        assert!(rx.try_recv().is_err());

        sink.reconfigure(DebugLevel::Verbose, false);
        sink.emit(RecoveryPhase::ProbeCompleted, PhaseOutcome::Ok, None, None);
        assert_eq!(rx.try_recv().unwrap().phase, RecoveryPhase::ProbeCompleted);
    }

    #[tokio::test]
    async fn failures_raise_alerts_when_enabled() {
        let sink = DiagnosticsSink::new(16, DebugLevel::Normal, true);
        let mut rx = sink.subscribe();

        sink.emit(
            RecoveryPhase::RecoveryFailed,
            PhaseOutcome::Failed,
            None,
            Some("boom".to_string()),
        );

        assert_eq!(rx.try_recv().unwrap().phase, RecoveryPhase::RecoveryFailed);
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.phase, RecoveryPhase::AlertRequested);
        assert_eq!(alert.detail.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn emitting_without_subscribers_is_fine() {
        let sink = DiagnosticsSink::new(16, DebugLevel::Verbose, false);
        sink.emit(RecoveryPhase::MonitorStarted, PhaseOutcome::Ok, None, None);
    }
}
