//! Shared harness for supervisor and registry tests: a scriptable in-memory
//! render host driver plus polling helpers.

mod registry_tests;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

use crate::actors::messages::SupervisorStatus;
use crate::config::{DebugLevel, RecoveryConfig};
use crate::diagnostics::DiagnosticsEvent;
use crate::error::{HostError, RecoveryError};
use crate::host::{LifecycleEvent, LifecycleEventKind, LifecycleSender, RenderHost};
use crate::manager::RecoveryManager;
use crate::observer::RecoveryObserver;

/// Per-host ledger of what the supervisor did to it.
pub(crate) struct MockHostRecord {
    pub(crate) id: Uuid,
    pub(crate) destroys: AtomicUsize,
    pub(crate) reloads: AtomicUsize,
    pub(crate) navigations: Mutex<Vec<Url>>,
    pub(crate) evaluated: Mutex<Vec<String>>,
}

struct MockDriverInner {
    creation_attempts: AtomicUsize,
    /// Countdown of injected creation failures.
    fail_creations: AtomicUsize,
    /// Countdown of injected reload failures.
    fail_reloads: AtomicUsize,
    /// Shared switch; when false, every evaluation hangs forever.
    responsive: AtomicBool,
    lifecycle: Mutex<Option<LifecycleSender>>,
    records: Mutex<Vec<Arc<MockHostRecord>>>,
}

/// Scriptable driver: counts creations, injects failures on demand, and can
/// deliver lifecycle signals the way a hosting environment would.
#[derive(Clone)]
pub(crate) struct MockDriver {
    inner: Arc<MockDriverInner>,
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(MockDriverInner {
                creation_attempts: AtomicUsize::new(0),
                fail_creations: AtomicUsize::new(0),
                fail_reloads: AtomicUsize::new(0),
                responsive: AtomicBool::new(true),
                lifecycle: Mutex::new(None),
                records: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn creation_attempts(&self) -> usize {
        self.inner.creation_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn records(&self) -> Vec<Arc<MockHostRecord>> {
        self.inner.records.lock().clone()
    }

    pub(crate) fn record(&self, index: usize) -> Arc<MockHostRecord> {
        self.inner.records.lock()[index].clone()
    }

    pub(crate) fn current_record(&self) -> Arc<MockHostRecord> {
        self.inner
            .records
            .lock()
            .last()
            .expect("no host created yet")
            .clone()
    }

    pub(crate) fn set_fail_creations(&self, count: usize) {
        self.inner.fail_creations.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_reloads(&self, count: usize) {
        self.inner.fail_reloads.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_responsive(&self, responsive: bool) {
        self.inner.responsive.store(responsive, Ordering::SeqCst);
    }

    /// Delivers a process-termination signal for the most recent host, the
    /// way the environment's lifecycle observer would.
    pub(crate) fn terminate_current(&self) {
        let id = self.current_record().id;
        self.send_lifecycle(id, LifecycleEventKind::ProcessTerminated);
    }

    pub(crate) fn send_lifecycle(&self, host: Uuid, kind: LifecycleEventKind) {
        let sender = self
            .inner
            .lifecycle
            .lock()
            .clone()
            .expect("no lifecycle sender installed");
        sender
            .send(LifecycleEvent { host, kind })
            .expect("lifecycle channel closed");
    }
}

#[async_trait]
impl crate::host::HostDriver for MockDriver {
    async fn create(
        &self,
        id: Uuid,
        lifecycle: LifecycleSender,
    ) -> Result<Box<dyn RenderHost>, HostError> {
        self.inner.creation_attempts.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .inner
            .fail_creations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(HostError::CreationFailed("injected creation failure".into()));
        }

        *self.inner.lifecycle.lock() = Some(lifecycle);

        let record = Arc::new(MockHostRecord {
            id,
            destroys: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
            navigations: Mutex::new(Vec::new()),
            evaluated: Mutex::new(Vec::new()),
        });
        self.inner.records.lock().push(record.clone());

        Ok(Box::new(MockHost {
            record,
            inner: self.inner.clone(),
        }))
    }
}

struct MockHost {
    record: Arc<MockHostRecord>,
    inner: Arc<MockDriverInner>,
}

#[async_trait]
impl RenderHost for MockHost {
    async fn destroy(&self) {
        self.record.destroys.fetch_add(1, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn evaluate(&self, script: &str) -> Result<Value, HostError> {
        self.record.evaluated.lock().push(script.to_string());
        if !self.inner.responsive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(Value::String("{\"scrollX\":0,\"scrollY\":42}".to_string()))
    }

    async fn navigate(&self, location: &Url) -> Result<(), HostError> {
        self.record.navigations.lock().push(location.clone());
        Ok(())
    }

    async fn reload(&self) -> Result<(), HostError> {
        self.record.reloads.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .inner
            .fail_reloads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(HostError::Navigation("injected reload failure".into()));
        }
        Ok(())
    }

    fn current_location(&self) -> Option<Url> {
        Url::parse("https://app.example/session").ok()
    }
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    pub(crate) starting: AtomicUsize,
    pub(crate) completed: AtomicUsize,
    pub(crate) failed: AtomicUsize,
}

impl RecoveryObserver for RecordingObserver {
    fn on_recovery_starting(&self, _host: Option<Uuid>) {
        self.starting.fetch_add(1, Ordering::SeqCst);
    }

    fn on_recovery_completed(&self, _host: Uuid) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_recovery_failed(&self, _host: Option<Uuid>, _error: &RecoveryError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opt-in log output for debugging test failures (`RUST_LOG=...`).
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Tunables shrunk so a full incident fits comfortably inside a test.
pub(crate) fn fast_config() -> RecoveryConfig {
    RecoveryConfig {
        debug_mode_enabled: true,
        debug_level: DebugLevel::Verbose,
        health_check_interval: Duration::from_millis(500),
        recovery_delay: Duration::from_millis(10),
        ..RecoveryConfig::default()
    }
}

/// Polls `status()` until `predicate` holds, panicking after three seconds.
pub(crate) async fn wait_for_status(
    manager: &RecoveryManager,
    mut predicate: impl FnMut(&SupervisorStatus) -> bool,
) -> SupervisorStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let status = manager.status().await.expect("status request failed");
        if predicate(&status) {
            return status;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within deadline; last status: {status:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collects every diagnostics event currently buffered.
pub(crate) fn drain_events(
    rx: &mut broadcast::Receiver<DiagnosticsEvent>,
) -> Vec<DiagnosticsEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
