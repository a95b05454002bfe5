//! Public facade over the supervisor actor.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ractor::{Actor, ActorRef};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::actors::messages::{SupervisorMsg, SupervisorStatus, TriggerOutcome};
use crate::actors::{SupervisorActor, SupervisorArgs};
use crate::config::RecoveryConfig;
use crate::diagnostics::{DiagnosticsEvent, DiagnosticsSink};
use crate::host::HostDriver;
use crate::monitor::HealthCheckResult;
use crate::observer::RecoveryObserver;

/// Depth of the diagnostics broadcast ring. Slow subscribers lose the oldest
/// events rather than applying backpressure to the supervisor.
const DIAGNOSTICS_BUFFER: usize = 256;

/// Handle to one supervised render host.
///
/// Spawning a manager creates the initial host through the given driver and
/// starts the supervisor actor that owns it. The manager is cheaply clonable;
/// all clones talk to the same supervisor mailbox.
///
/// Monitoring is off until [`start_monitoring`] is called, but crash signals
/// delivered by the hosting environment trigger recovery either way.
///
/// [`start_monitoring`]: RecoveryManager::start_monitoring
#[derive(Clone)]
pub struct RecoveryManager {
    actor: ActorRef<SupervisorMsg>,
    diagnostics: Arc<DiagnosticsSink>,
}

impl RecoveryManager {
    /// Creates the initial render host and spawns its supervisor.
    pub async fn spawn(driver: Arc<dyn HostDriver>, config: RecoveryConfig) -> Result<Self> {
        let diagnostics = Arc::new(DiagnosticsSink::new(
            DIAGNOSTICS_BUFFER,
            config.effective_debug_level(),
            config.show_debug_alerts,
        ));
        let (lifecycle_tx, mut lifecycle_rx) = mpsc::unbounded_channel();

        let (actor, _join) = Actor::spawn(
            None,
            SupervisorActor,
            SupervisorArgs {
                driver,
                config,
                lifecycle_tx,
                diagnostics: diagnostics.clone(),
            },
        )
        .await
        .context("failed to spawn recovery supervisor")?;

        // Pump lifecycle signals from the hosting environment into the
        // supervisor's mailbox. Ends when either side goes away.
        let pump_target = actor.clone();
        tokio::spawn(async move {
            while let Some(event) = lifecycle_rx.recv().await {
                if pump_target.cast(SupervisorMsg::Lifecycle(event)).is_err() {
                    break;
                }
            }
            debug!("lifecycle pump stopped");
        });

        Ok(Self { actor, diagnostics })
    }

    /// (Re)starts periodic health monitoring with the given tunables. The
    /// new configuration also applies to subsequent recoveries. Idempotent:
    /// a running ticker is replaced, never stacked.
    pub async fn start_monitoring(&self, config: RecoveryConfig) -> Result<()> {
        self.call(|reply| SupervisorMsg::StartMonitoring { config, reply })
            .await
    }

    /// Stops periodic health monitoring. A no-op when it is not running;
    /// crash signals from the hosting environment still trigger recovery.
    pub async fn stop_monitoring(&self) -> Result<()> {
        self.call(|reply| SupervisorMsg::StopMonitoring { reply })
            .await
    }

    /// Forces a recovery attempt. Reports [`TriggerOutcome::AlreadyInProgress`]
    /// when one is running; the duplicate request is dropped, not queued.
    pub async fn trigger_recovery(&self) -> Result<TriggerOutcome> {
        self.call(|reply| SupervisorMsg::TriggerRecovery { reply })
            .await
    }

    /// Runs one out-of-cycle liveness probe. Does not alter monitor timing;
    /// an unhealthy result here does not itself start a recovery.
    pub async fn check_health_now(&self) -> Result<HealthCheckResult> {
        self.call(|reply| SupervisorMsg::CheckHealthNow { reply })
            .await
    }

    pub async fn status(&self) -> Result<SupervisorStatus> {
        self.call(|reply| SupervisorMsg::Status { reply }).await
    }

    /// Makes the next liveness probe report unresponsive without touching
    /// the render host. Lets integrators validate the full recovery path.
    pub fn simulate_failure(&self) -> Result<()> {
        self.cast(SupervisorMsg::SimulateFailure)
    }

    pub fn register_observer(&self, observer: Arc<dyn RecoveryObserver>) -> Result<()> {
        self.cast(SupervisorMsg::RegisterObserver { observer })
    }

    /// Subscribes to structured diagnostics events. Delivery is lossy under
    /// subscriber lag and filtered by the configured debug level.
    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticsEvent> {
        self.diagnostics.subscribe()
    }

    /// Stops the supervisor, cancelling the monitor and any in-flight
    /// recovery attempt and destroying the current host. Fire-and-forget.
    pub fn shutdown(&self) {
        let _ = self.actor.cast(SupervisorMsg::Shutdown);
    }

    fn cast(&self, msg: SupervisorMsg) -> Result<()> {
        self.actor
            .cast(msg)
            .map_err(|_| anyhow!("recovery supervisor is no longer running"))
    }

    async fn call<T>(
        &self,
        make_msg: impl FnOnce(oneshot::Sender<T>) -> SupervisorMsg,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.actor
            .cast(make_msg(tx))
            .map_err(|_| anyhow!("recovery supervisor is no longer running"))?;
        rx.await
            .map_err(|_| anyhow!("recovery supervisor dropped the request"))
    }
}
