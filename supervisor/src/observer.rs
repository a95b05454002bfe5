//! Optional recovery lifecycle hooks.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::RecoveryError;

/// Callbacks around a recovery incident. All hooks are optional (default
/// no-ops) and must return quickly: they run on the supervisor's serialized
/// context.
pub trait RecoveryObserver: Send + Sync {
    /// A recovery attempt is about to start. `host` is the handle being
    /// replaced, when one is still installed.
    fn on_recovery_starting(&self, _host: Option<Uuid>) {}

    /// The replacement handle passed its post-recovery health probe.
    fn on_recovery_completed(&self, _host: Uuid) {}

    /// The incident ended in failure; no automatic retry will follow.
    fn on_recovery_failed(&self, _host: Option<Uuid>, _error: &RecoveryError) {}
}

/// Registered observers. Zero registrations simply means no notifications.
pub(crate) struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn RecoveryObserver>>>,
}

impl ObserverSet {
    pub(crate) fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, observer: Arc<dyn RecoveryObserver>) {
        let mut observers = self.observers.write();
        observers.push(observer);
        debug!(count = observers.len(), "recovery observer registered");
    }

    pub(crate) fn notify_starting(&self, host: Option<Uuid>) {
        for observer in self.observers.read().iter() {
            observer.on_recovery_starting(host);
        }
    }

    pub(crate) fn notify_completed(&self, host: Uuid) {
        for observer in self.observers.read().iter() {
            observer.on_recovery_completed(host);
        }
    }

    pub(crate) fn notify_failed(&self, host: Option<Uuid>, error: &RecoveryError) {
        for observer in self.observers.read().iter() {
            observer.on_recovery_failed(host, error);
        }
    }
}
