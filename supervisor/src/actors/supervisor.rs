//! The recovery supervisor actor.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{
    CrashReason, RecoveredHost, RecoveryState, RecoveryTaskOutcome, SupervisorMsg,
    SupervisorStatus, TriggerOutcome,
};
use crate::config::{RecoveryConfig, RecoveryMethod};
use crate::diagnostics::{DiagnosticsSink, PhaseOutcome, RecoveryPhase};
use crate::error::{HostError, RecoveryError};
use crate::host::{create_host, HostDriver, LifecycleEventKind, LifecycleSender, RenderHostHandle};
use crate::monitor::{self, HealthCheckResult, HealthOutcome, MonitorTask};
use crate::observer::ObserverSet;
use crate::snapshot::{SnapshotStore, StateSnapshot};

/// Supervises one render host: detects crashes (lifecycle signals and
/// liveness probes), and drives the bounded recovery protocol
/// `Idle → Recovering → VerifyingHealth → Idle`.
///
/// # Concurrency safety
///
/// Every state transition runs sequentially through the actor's mailbox;
/// the [`RecoveryState`] value is the sole guard against concurrent
/// recovery. The slow phases of an attempt (debounce, teardown,
/// recreation, restore) run in a spawned [`RecoveryJob`] so that crash
/// signals arriving mid-recovery hit the non-`Idle` guard and are dropped
/// rather than queueing behind the running attempt.
///
/// # Ownership
///
/// The current [`RenderHostHandle`] is exclusively owned by this actor.
/// It moves into the recovery job for the duration of an attempt and comes
/// back (or is replaced) in the job's outcome message; external callers
/// can only probe it or request recovery, never replace it.
pub struct SupervisorActor;

/// Arguments for spawning a [`SupervisorActor`].
pub struct SupervisorArgs {
    pub driver: Arc<dyn HostDriver>,
    pub config: RecoveryConfig,
    pub lifecycle_tx: LifecycleSender,
    pub diagnostics: Arc<DiagnosticsSink>,
}

pub struct SupervisorState {
    driver: Arc<dyn HostDriver>,
    config: RecoveryConfig,
    lifecycle_tx: LifecycleSender,
    diagnostics: Arc<DiagnosticsSink>,
    observers: ObserverSet,
    snapshots: SnapshotStore,
    recovery_state: RecoveryState,
    host: Option<Arc<RenderHostHandle>>,
    /// Id of the host the in-flight incident is recovering; the handle
    /// itself is inside the recovery job, so `host` alone can't identify
    /// lifecycle events that still belong to this incident.
    incident_host: Option<uuid::Uuid>,
    monitor: Option<MonitorTask>,
    recovery_cancel: Option<CancellationToken>,
    /// Recent primary-strategy failures, pruned against the retry window.
    primary_failures: VecDeque<Instant>,
    simulate_next_failure: bool,
    last_health: Option<HealthCheckResult>,
    recoveries_completed: u64,
    recoveries_failed: u64,
    signals_dropped: u64,
}

#[async_trait]
impl Actor for SupervisorActor {
    type Msg = SupervisorMsg;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        args.diagnostics.reconfigure(
            args.config.effective_debug_level(),
            args.config.show_debug_alerts,
        );

        // Creating the initial host also installs the lifecycle observer
        // that will deliver termination signals for it.
        let handle = create_host(&args.driver, &args.lifecycle_tx)
            .await
            .map_err(|e| format!("initial render host creation failed: {}", e))?;

        info!(host = %handle.id(), "recovery supervisor started");

        Ok(SupervisorState {
            driver: args.driver,
            config: args.config,
            lifecycle_tx: args.lifecycle_tx,
            diagnostics: args.diagnostics,
            observers: ObserverSet::new(),
            snapshots: SnapshotStore::new(),
            recovery_state: RecoveryState::Idle,
            host: Some(Arc::new(handle)),
            incident_host: None,
            monitor: None,
            recovery_cancel: None,
            primary_failures: VecDeque::new(),
            simulate_next_failure: false,
            last_health: None,
            recoveries_completed: 0,
            recoveries_failed: 0,
            signals_dropped: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMsg::Lifecycle(event) => {
                let reason = match event.kind {
                    LifecycleEventKind::ProcessTerminated => CrashReason::ProcessTerminated,
                    LifecycleEventKind::HealthCheckFailed => CrashReason::HealthCheckFailed,
                };
                let known = state.current_host_id() == Some(event.host)
                    || state.incident_host == Some(event.host);
                if !known {
                    debug!(host = %event.host, "dropping lifecycle event for a replaced render host");
                } else if state.recovery_state == RecoveryState::Idle {
                    if event.kind == LifecycleEventKind::ProcessTerminated {
                        if let Some(host) = &state.host {
                            host.mark_terminated();
                        }
                    }
                    state.on_crash_signal(&myself, reason).await;
                } else {
                    // The non-Idle guard inside on_crash_signal drops and
                    // counts it.
                    state.on_crash_signal(&myself, reason).await;
                }
            }
            SupervisorMsg::CrashSignal { reason } => {
                state.on_crash_signal(&myself, reason).await;
            }
            SupervisorMsg::HealthTick => {
                if state.recovery_state != RecoveryState::Idle {
                    debug!("skipping health tick while a recovery is in progress");
                } else {
                    let result = state.run_probe().await;
                    match result.outcome {
                        HealthOutcome::Healthy => {}
                        HealthOutcome::Terminated => {
                            state
                                .on_crash_signal(&myself, CrashReason::ProcessTerminated)
                                .await;
                        }
                        HealthOutcome::Unresponsive => {
                            state
                                .on_crash_signal(&myself, CrashReason::HealthCheckFailed)
                                .await;
                        }
                    }
                }
            }
            SupervisorMsg::CheckHealthNow { reply } => {
                let result = state.run_probe().await;
                let _ = reply.send(result);
            }
            SupervisorMsg::TriggerRecovery { reply } => {
                if state.recovery_state == RecoveryState::Idle {
                    let _ = reply.send(TriggerOutcome::Started);
                    state.on_crash_signal(&myself, CrashReason::Manual).await;
                } else {
                    let _ = reply.send(TriggerOutcome::AlreadyInProgress);
                    state.on_crash_signal(&myself, CrashReason::Manual).await;
                }
            }
            SupervisorMsg::SimulateFailure => {
                info!("next liveness probe will report unresponsive (simulated)");
                state.simulate_next_failure = true;
            }
            SupervisorMsg::StartMonitoring { config, reply } => {
                state.config = config;
                state
                    .diagnostics
                    .reconfigure(config.effective_debug_level(), config.show_debug_alerts);
                if let Some(running) = state.monitor.take() {
                    running.stop();
                }
                state.monitor = Some(MonitorTask::start(
                    myself.clone(),
                    config.health_check_interval,
                ));
                info!(interval = ?config.health_check_interval, "health monitoring started");
                state.diagnostics.emit(
                    RecoveryPhase::MonitorStarted,
                    PhaseOutcome::Ok,
                    state.current_host_id(),
                    None,
                );
                let _ = reply.send(());
            }
            SupervisorMsg::StopMonitoring { reply } => {
                if let Some(running) = state.monitor.take() {
                    running.stop();
                    info!("health monitoring stopped");
                    state.diagnostics.emit(
                        RecoveryPhase::MonitorStopped,
                        PhaseOutcome::Ok,
                        state.current_host_id(),
                        None,
                    );
                }
                let _ = reply.send(());
            }
            SupervisorMsg::Status { reply } => {
                let _ = reply.send(SupervisorStatus {
                    state: state.recovery_state,
                    monitoring: state.monitor.is_some(),
                    host: state.current_host_id(),
                    host_alive: state.host.as_ref().map(|h| h.is_alive()).unwrap_or(false),
                    last_health: state.last_health,
                    recoveries_completed: state.recoveries_completed,
                    recoveries_failed: state.recoveries_failed,
                    signals_dropped: state.signals_dropped,
                });
            }
            SupervisorMsg::RegisterObserver { observer } => {
                state.observers.register(observer);
            }
            SupervisorMsg::RecoveryFinished(outcome) => {
                state.on_recovery_finished(&myself, outcome);
            }
            SupervisorMsg::VerificationFinished { result } => {
                state.on_verification_finished(result);
            }
            SupervisorMsg::Shutdown => {
                info!("recovery supervisor shutting down");
                myself.stop(None);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(running) = state.monitor.take() {
            running.stop();
        }
        if let Some(cancel) = state.recovery_cancel.take() {
            cancel.cancel();
        }
        state.recovery_state = RecoveryState::Idle;
        if let Some(host) = state.host.take() {
            host.destroy().await;
        }
        Ok(())
    }
}

impl SupervisorState {
    fn current_host_id(&self) -> Option<uuid::Uuid> {
        self.host.as_ref().map(|h| h.id())
    }

    /// Entry point of the state machine. The non-`Idle` guard here is the
    /// sole mechanism preventing concurrent recovery: duplicate signals are
    /// dropped, never queued.
    async fn on_crash_signal(&mut self, myself: &ActorRef<SupervisorMsg>, reason: CrashReason) {
        metrics::counter!("renderguard_crash_signals_total", 1, "reason" => reason.as_str());

        if self.recovery_state != RecoveryState::Idle {
            self.signals_dropped += 1;
            warn!(
                reason = reason.as_str(),
                "recovery already in progress, dropping crash signal"
            );
            metrics::counter!("renderguard_crash_signals_dropped_total", 1);
            self.diagnostics.emit(
                RecoveryPhase::SignalDropped,
                PhaseOutcome::Degraded,
                self.current_host_id(),
                Some(reason.as_str().to_string()),
            );
            return;
        }

        let host_id = self.current_host_id();
        info!(reason = reason.as_str(), host = ?host_id, "starting recovery");
        self.recovery_state = RecoveryState::Recovering;
        self.incident_host = host_id;
        metrics::counter!("renderguard_recovery_attempts_total", 1);
        self.observers.notify_starting(host_id);
        self.diagnostics.emit(
            RecoveryPhase::RecoveryStarting,
            PhaseOutcome::Ok,
            host_id,
            Some(reason.as_str().to_string()),
        );

        // Best-effort capture before teardown begins. Failure degrades to an
        // empty snapshot and never aborts the attempt.
        let snapshot = match &self.host {
            Some(host) => self.snapshots.capture(host).await,
            None => StateSnapshot::empty(),
        };
        self.diagnostics.emit(
            RecoveryPhase::SnapshotCaptured,
            if snapshot.is_empty() {
                PhaseOutcome::Degraded
            } else {
                PhaseOutcome::Ok
            },
            host_id,
            None,
        );

        let use_primary = self.should_attempt_primary();
        let cancel = CancellationToken::new();
        self.recovery_cancel = Some(cancel.clone());

        let job = RecoveryJob {
            driver: self.driver.clone(),
            config: self.config,
            old_host: self.host.take(),
            snapshot,
            use_primary,
            lifecycle_tx: self.lifecycle_tx.clone(),
            store: self.snapshots,
            diagnostics: self.diagnostics.clone(),
            cancel,
        };
        let supervisor = myself.clone();
        tokio::spawn(async move {
            let outcome = job.execute().await;
            // If the supervisor is already gone, the handles the outcome
            // carries have no owner left; destroy them here. Destroy is
            // idempotent, so holding these clones past a successful cast
            // is harmless.
            let orphans: Vec<Arc<RenderHostHandle>> = outcome
                .surviving_host
                .iter()
                .cloned()
                .chain(outcome.result.as_ref().ok().map(|r| r.handle.clone()))
                .collect();
            if supervisor
                .cast(SupervisorMsg::RecoveryFinished(outcome))
                .is_err()
            {
                warn!("recovery supervisor stopped before receiving the recovery outcome");
                for host in orphans {
                    host.destroy().await;
                }
            }
        });
    }

    /// The `shouldRecreateWebView` decision: skip the primary strategy when
    /// it has already failed `max_recreate_attempts` times inside the retry
    /// window. Entries age out; successes do not clear them.
    fn should_attempt_primary(&mut self) -> bool {
        let now = Instant::now();
        while let Some(oldest) = self.primary_failures.front() {
            if now.duration_since(*oldest) > self.config.recreate_retry_window {
                self.primary_failures.pop_front();
            } else {
                break;
            }
        }
        (self.primary_failures.len() as u32) < self.config.max_recreate_attempts
    }

    async fn run_probe(&mut self) -> HealthCheckResult {
        let forced = std::mem::take(&mut self.simulate_next_failure);
        let result =
            monitor::probe(self.host.as_deref(), self.config.probe_timeout(), forced).await;
        self.last_health = Some(result);
        self.diagnostics.emit(
            RecoveryPhase::ProbeCompleted,
            if result.outcome == HealthOutcome::Healthy {
                PhaseOutcome::Ok
            } else {
                PhaseOutcome::Degraded
            },
            self.current_host_id(),
            None,
        );
        result
    }

    fn on_recovery_finished(
        &mut self,
        myself: &ActorRef<SupervisorMsg>,
        outcome: RecoveryTaskOutcome,
    ) {
        if self.recovery_state != RecoveryState::Recovering {
            warn!("ignoring stale recovery outcome");
            if let Ok(recovered) = outcome.result {
                // Don't leak a live host nobody will ever install.
                tokio::spawn(async move { recovered.handle.destroy().await });
            }
            return;
        }

        if outcome.primary_failed {
            self.primary_failures.push_back(Instant::now());
        }

        match outcome.result {
            Ok(recovered) => {
                let handle = recovered.handle;
                let host_id = handle.id();
                self.diagnostics.emit(
                    RecoveryPhase::SnapshotRestored,
                    if outcome.snapshot_restored {
                        PhaseOutcome::Ok
                    } else {
                        PhaseOutcome::Degraded
                    },
                    Some(host_id),
                    outcome
                        .used_fallback
                        .then(|| "fallback strategy".to_string()),
                );
                self.host = Some(handle.clone());
                self.recovery_state = RecoveryState::VerifyingHealth;
                debug!(host = %host_id, "recovery produced a handle, verifying health");

                let timeout = self.config.probe_timeout();
                let supervisor = myself.clone();
                tokio::spawn(async move {
                    let result = monitor::probe(Some(&handle), timeout, false).await;
                    let _ = supervisor.cast(SupervisorMsg::VerificationFinished { result });
                });
            }
            Err(RecoveryError::Cancelled) => {
                info!("recovery attempt cancelled before completion");
                self.host = outcome.surviving_host;
                self.recovery_state = RecoveryState::Idle;
                self.incident_host = None;
                self.recovery_cancel = None;
            }
            Err(err) => {
                self.recoveries_failed += 1;
                metrics::counter!("renderguard_recovery_outcomes_total", 1, "outcome" => "failed");
                self.observers.notify_failed(None, &err);
                self.diagnostics.emit(
                    RecoveryPhase::RecoveryFailed,
                    PhaseOutcome::Failed,
                    None,
                    Some(err.to_string()),
                );
                warn!(error = %err, "recovery failed; render surface is absent until the next incident");
                self.recovery_state = RecoveryState::Idle;
                self.incident_host = None;
                self.recovery_cancel = None;
            }
        }
    }

    fn on_verification_finished(&mut self, result: HealthCheckResult) {
        if self.recovery_state != RecoveryState::VerifyingHealth {
            debug!("ignoring stale verification result");
            return;
        }

        self.last_health = Some(result);
        self.recovery_state = RecoveryState::Idle;
        self.incident_host = None;
        self.recovery_cancel = None;
        let host_id = self.current_host_id();

        if result.outcome == HealthOutcome::Healthy {
            self.recoveries_completed += 1;
            metrics::counter!("renderguard_recovery_outcomes_total", 1, "outcome" => "recovered");
            if let Some(host) = host_id {
                self.observers.notify_completed(host);
            }
            self.diagnostics.emit(
                RecoveryPhase::RecoveryCompleted,
                PhaseOutcome::Ok,
                host_id,
                None,
            );
            self.forward_debug("render host recovered");
            info!(host = ?host_id, "recovery completed");
        } else {
            self.recoveries_failed += 1;
            metrics::counter!("renderguard_recovery_outcomes_total", 1, "outcome" => "verification_failed");
            let err = RecoveryError::VerificationFailed {
                outcome: result.outcome,
            };
            self.observers.notify_failed(host_id, &err);
            self.diagnostics.emit(
                RecoveryPhase::RecoveryFailed,
                PhaseOutcome::Failed,
                host_id,
                Some(err.to_string()),
            );
            self.forward_debug("render host recovery failed verification");
            // The new handle stays installed; retrying here is what causes
            // retry storms, so the incident ends now.
            warn!(host = ?host_id, outcome = ?result.outcome, "post-recovery verification failed");
        }
    }

    /// Forwards a recovery outcome line into the page when
    /// `log_to_javascript` is enabled (the bridge's `onDebugMessage` hook).
    /// Fire-and-forget; never on the recovery path's critical chain.
    fn forward_debug(&self, message: &str) {
        if !self.config.log_to_javascript {
            return;
        }
        let Some(host) = self.host.clone() else {
            return;
        };
        let payload = serde_json::to_string(message).unwrap_or_else(|_| "\"\"".to_string());
        let script = format!(
            "window.RenderGuard && window.RenderGuard.onDebugMessage && window.RenderGuard.onDebugMessage({payload});"
        );
        tokio::spawn(async move {
            let _ = host.evaluate(&script).await;
        });
    }
}

/// The slow phases of one recovery attempt: debounce, teardown, recreation,
/// restore. Runs off the mailbox so duplicate crash signals hit the state
/// guard instead of queueing; bounded to the primary attempt plus at most
/// one fallback.
struct RecoveryJob {
    driver: Arc<dyn HostDriver>,
    config: RecoveryConfig,
    old_host: Option<Arc<RenderHostHandle>>,
    snapshot: StateSnapshot,
    use_primary: bool,
    lifecycle_tx: LifecycleSender,
    store: SnapshotStore,
    diagnostics: Arc<DiagnosticsSink>,
    cancel: CancellationToken,
}

impl RecoveryJob {
    async fn execute(mut self) -> RecoveryTaskOutcome {
        // Debounce: absorb bursts of rapid repeated crash signals before
        // touching the host. Cancellable by supervisor shutdown, in which
        // case the untouched handle travels back in the outcome.
        if !self.config.recovery_delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return RecoveryTaskOutcome {
                        result: Err(RecoveryError::Cancelled),
                        primary_failed: false,
                        used_fallback: false,
                        snapshot_restored: false,
                        surviving_host: self.old_host.take(),
                    };
                }
                _ = tokio::time::sleep(self.config.recovery_delay) => {}
            }
        }

        let mut primary_error = None;
        if self.use_primary {
            match self.attempt_primary().await {
                Ok((handle, restored)) => {
                    return RecoveryTaskOutcome {
                        result: Ok(RecoveredHost { handle }),
                        primary_failed: false,
                        used_fallback: false,
                        snapshot_restored: restored,
                        surviving_host: None,
                    };
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        method = ?self.config.recovery_method,
                        "primary recovery strategy failed, engaging fallback"
                    );
                    primary_error = Some(err.to_string());
                }
            }
        } else {
            info!("primary strategy skipped: recreate retry budget exhausted");
        }

        let primary_failed = primary_error.is_some();
        self.diagnostics.emit(
            RecoveryPhase::FallbackEngaged,
            PhaseOutcome::Degraded,
            None,
            Some(primary_error.clone().unwrap_or_else(|| {
                "primary strategy skipped (retry budget exhausted)".to_string()
            })),
        );

        match self.attempt_fallback().await {
            Ok((handle, restored)) => RecoveryTaskOutcome {
                result: Ok(RecoveredHost { handle }),
                primary_failed,
                used_fallback: true,
                snapshot_restored: restored,
                surviving_host: None,
            },
            Err(err) => RecoveryTaskOutcome {
                result: Err(RecoveryError::PrimaryAndFallbackFailed {
                    primary: primary_error
                        .unwrap_or_else(|| "skipped (retry budget exhausted)".to_string()),
                    fallback: err.to_string(),
                }),
                primary_failed,
                used_fallback: true,
                snapshot_restored: false,
                surviving_host: None,
            },
        }
    }

    async fn attempt_primary(&mut self) -> Result<(Arc<RenderHostHandle>, bool), HostError> {
        match self.config.recovery_method {
            RecoveryMethod::Reload => {
                // The engine respawns its content process on reload; the
                // handle and its location survive.
                let host = self.old_host.take().ok_or(HostError::HostGone)?;
                if let Err(err) = host.reload().await {
                    self.old_host = Some(host);
                    return Err(err);
                }
                host.clear_terminated();
                let restored = self.store.restore_page_state(&self.snapshot, &host).await;
                Ok((host, restored))
            }
            RecoveryMethod::Recreate => {
                if let Some(old) = self.old_host.take() {
                    old.destroy().await;
                }
                let handle = Arc::new(create_host(&self.driver, &self.lifecycle_tx).await?);
                let restored = self.store.restore(&self.snapshot, &handle).await;
                Ok((handle, restored))
            }
        }
    }

    /// Lower-fidelity path: a bare host at the captured location, with the
    /// in-page state discarded.
    async fn attempt_fallback(&mut self) -> Result<(Arc<RenderHostHandle>, bool), HostError> {
        if let Some(old) = self.old_host.take() {
            old.destroy().await;
        }
        let handle = Arc::new(create_host(&self.driver, &self.lifecycle_tx).await?);
        let location_ok = self.store.restore_location(&self.snapshot, &handle).await;
        if self.snapshot.page_state.is_some() {
            warn!("captured page state discarded on the fallback recovery path");
        }
        Ok((handle, location_ok && self.snapshot.page_state.is_none()))
    }
}
