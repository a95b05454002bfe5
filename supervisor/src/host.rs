//! The render host boundary.
//!
//! The rendering engine itself lives outside this crate; the supervisor only
//! sees it through the [`HostDriver`] and [`RenderHost`] traits implemented
//! by the hosting environment. [`RenderHostHandle`] wraps a driver-provided
//! instance with the identity and lifecycle flags the supervisor relies on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use crate::error::HostError;

/// Channel on which the hosting environment delivers lifecycle signals for
/// the hosts it created. Installed once per supervisor; every created host
/// shares it and tags events with its own id.
pub type LifecycleSender = mpsc::UnboundedSender<LifecycleEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    /// The render host's content process was terminated by the environment.
    ProcessTerminated,
    /// The environment's own health checking flagged the host as failed.
    HealthCheckFailed,
}

/// A lifecycle signal from the hosting environment. Events carrying the id
/// of a host that has since been replaced are dropped by the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleEvent {
    pub host: Uuid,
    pub kind: LifecycleEventKind,
}

/// The hosting environment's allocator for render hosts.
///
/// `create` must install whatever observer wiring is needed so that later
/// process-termination signals for the new host arrive on `lifecycle`,
/// tagged with `id`.
#[async_trait]
pub trait HostDriver: Send + Sync + 'static {
    async fn create(
        &self,
        id: Uuid,
        lifecycle: LifecycleSender,
    ) -> Result<Box<dyn RenderHost>, HostError>;
}

/// A single live render host instance, as exposed by the driver.
#[async_trait]
pub trait RenderHost: Send + Sync {
    /// Releases the underlying instance. Called at most once per host; the
    /// wrapping [`RenderHostHandle`] enforces idempotency.
    async fn destroy(&self);

    /// Best-effort liveness from the driver's last known lifecycle signal.
    /// Never a synchronous probe.
    fn is_alive(&self) -> bool;

    /// Evaluates a script inside the page and returns its result.
    async fn evaluate(&self, script: &str) -> Result<Value, HostError>;

    async fn navigate(&self, location: &Url) -> Result<(), HostError>;

    /// Reloads the current location; on engines with out-of-process content
    /// this respawns a terminated content process.
    async fn reload(&self) -> Result<(), HostError>;

    fn current_location(&self) -> Option<Url>;
}

/// The supervisor's exclusively-owned reference to the current render host.
///
/// At most one handle is current at any time; only the recovery supervisor
/// may replace it. The previous handle is destroyed before a replacement is
/// installed.
pub struct RenderHostHandle {
    id: Uuid,
    host: Box<dyn RenderHost>,
    destroyed: AtomicBool,
    terminated: AtomicBool,
}

impl RenderHostHandle {
    pub(crate) fn new(id: Uuid, host: Box<dyn RenderHost>) -> Self {
        Self {
            id,
            host,
            destroyed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Best-effort liveness: false once destroyed, once the lifecycle
    /// observer signaled termination, or when the driver reports the
    /// instance dead.
    pub fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
            && !self.terminated.load(Ordering::SeqCst)
            && self.host.is_alive()
    }

    /// Whether the lifecycle observer already signaled process termination.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// A successful reload respawns the content process, so the stale
    /// termination flag no longer describes the handle.
    pub(crate) fn clear_terminated(&self) {
        self.terminated.store(false, Ordering::SeqCst);
    }

    /// Destroys the underlying host. Idempotent: the second and later calls
    /// are no-ops and do not reach the driver again.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.host.destroy().await;
    }

    pub async fn evaluate(&self, script: &str) -> Result<Value, HostError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(HostError::HostGone);
        }
        self.host.evaluate(script).await
    }

    pub async fn navigate(&self, location: &Url) -> Result<(), HostError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(HostError::HostGone);
        }
        self.host.navigate(location).await
    }

    pub async fn reload(&self) -> Result<(), HostError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(HostError::HostGone);
        }
        self.host.reload().await
    }

    pub fn current_location(&self) -> Option<Url> {
        self.host.current_location()
    }
}

/// Allocates a fresh host with a new identity and wraps it.
pub(crate) async fn create_host(
    driver: &Arc<dyn HostDriver>,
    lifecycle: &LifecycleSender,
) -> Result<RenderHostHandle, HostError> {
    let id = Uuid::new_v4();
    let host = driver.create(id, lifecycle.clone()).await?;
    Ok(RenderHostHandle::new(id, host))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingHost {
        destroys: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RenderHost for CountingHost {
        async fn destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }

        fn is_alive(&self) -> bool {
            true
        }

        async fn evaluate(&self, _script: &str) -> Result<Value, HostError> {
            Ok(Value::Null)
        }

        async fn navigate(&self, _location: &Url) -> Result<(), HostError> {
            Ok(())
        }

        async fn reload(&self) -> Result<(), HostError> {
            Ok(())
        }

        fn current_location(&self) -> Option<Url> {
            None
        }
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let destroys = Arc::new(AtomicUsize::new(0));
        let handle = RenderHostHandle::new(
            Uuid::new_v4(),
            Box::new(CountingHost {
                destroys: destroys.clone(),
            }),
        );

        handle.destroy().await;
        handle.destroy().await;
        handle.destroy().await;

        assert_eq!(destroys.load(Ordering::SeqCst), 1);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn destroyed_handle_rejects_operations() {
        let handle = RenderHostHandle::new(
            Uuid::new_v4(),
            Box::new(CountingHost {
                destroys: Arc::new(AtomicUsize::new(0)),
            }),
        );
        handle.destroy().await;

        assert!(matches!(
            handle.evaluate("1").await,
            Err(HostError::HostGone)
        ));
        assert!(matches!(handle.reload().await, Err(HostError::HostGone)));
    }

    #[tokio::test]
    async fn termination_signal_flips_liveness() {
        let handle = RenderHostHandle::new(
            Uuid::new_v4(),
            Box::new(CountingHost {
                destroys: Arc::new(AtomicUsize::new(0)),
            }),
        );
        assert!(handle.is_alive());
        handle.mark_terminated();
        assert!(!handle.is_alive());
        assert!(handle.is_terminated());
    }
}
