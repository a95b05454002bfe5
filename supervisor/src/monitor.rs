//! Periodic liveness monitoring.
//!
//! The monitor is a cancellable ticker task that casts [`SupervisorMsg::HealthTick`]
//! into the supervisor's mailbox every `health_check_interval`; the probe
//! itself runs on the supervisor's serialized context. Restarting the monitor
//! cancels and replaces the ticker, never stacks a second one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use ractor::ActorRef;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::actors::messages::SupervisorMsg;
use crate::host::RenderHostHandle;

/// Trivial, side-effect-free evaluation request used as the liveness probe.
pub(crate) const LIVENESS_SCRIPT: &str = "(function(){return 1;})()";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthOutcome {
    Healthy,
    Unresponsive,
    Terminated,
}

/// Result of a single liveness probe. Ephemeral: produced each tick and not
/// retained beyond the last observation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthCheckResult {
    pub outcome: HealthOutcome,
    pub observed_at: DateTime<Utc>,
}

impl HealthCheckResult {
    fn observed(outcome: HealthOutcome) -> Self {
        Self {
            outcome,
            observed_at: Utc::now(),
        }
    }
}

/// Runs one liveness probe against the current handle.
///
/// Probe policy:
/// - no current handle, or lifecycle observer already signaled termination
///   => `Terminated` (short-circuits the evaluation);
/// - handle reports not alive, or the evaluation errors or exceeds
///   `timeout` => `Unresponsive`;
/// - response within the timeout => `Healthy`.
///
/// `forced_failure` reports `Unresponsive` without touching the host at all
/// (the `simulate_failure` test hook).
pub(crate) async fn probe(
    host: Option<&RenderHostHandle>,
    timeout: Duration,
    forced_failure: bool,
) -> HealthCheckResult {
    let result = probe_outcome(host, timeout, forced_failure).await;
    metrics::counter!("renderguard_health_probes_total", 1, "outcome" => outcome_label(result.outcome));
    result
}

async fn probe_outcome(
    host: Option<&RenderHostHandle>,
    timeout: Duration,
    forced_failure: bool,
) -> HealthCheckResult {
    if forced_failure {
        debug!("probe failure forced by simulate_failure");
        return HealthCheckResult::observed(HealthOutcome::Unresponsive);
    }

    let Some(host) = host else {
        return HealthCheckResult::observed(HealthOutcome::Terminated);
    };

    if host.is_terminated() {
        return HealthCheckResult::observed(HealthOutcome::Terminated);
    }

    if !host.is_alive() {
        return HealthCheckResult::observed(HealthOutcome::Unresponsive);
    }

    match tokio::time::timeout(timeout, host.evaluate(LIVENESS_SCRIPT)).await {
        Ok(Ok(_)) => HealthCheckResult::observed(HealthOutcome::Healthy),
        Ok(Err(err)) => {
            debug!(host = %host.id(), error = %err, "liveness probe errored");
            HealthCheckResult::observed(HealthOutcome::Unresponsive)
        }
        Err(_) => {
            debug!(host = %host.id(), ?timeout, "liveness probe timed out");
            HealthCheckResult::observed(HealthOutcome::Unresponsive)
        }
    }
}

fn outcome_label(outcome: HealthOutcome) -> &'static str {
    match outcome {
        HealthOutcome::Healthy => "healthy",
        HealthOutcome::Unresponsive => "unresponsive",
        HealthOutcome::Terminated => "terminated",
    }
}

/// The single repeating timer owned by the health monitor. Stopping cancels
/// the ticker; starting again builds a fresh one at the current interval.
pub(crate) struct MonitorTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorTask {
    pub(crate) fn start(supervisor: ActorRef<SupervisorMsg>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let ticker_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if supervisor.cast(SupervisorMsg::HealthTick).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("health monitor ticker stopped");
        });

        Self { cancel, task }
    }

    pub(crate) fn stop(self) {
        self.cancel.cancel();
        drop(self.task);
    }
}
