//! Session state preservation across a render host replacement.
//!
//! A [`StateSnapshot`] holds the minimal state needed to resume the user's
//! session: the current location plus an opaque serialized blob produced by
//! an in-page capture hook. Capture runs immediately before teardown and
//! never fails the caller; restore runs after recreation and reports whether
//! it fully succeeded.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::SnapshotError;
use crate::host::RenderHostHandle;

/// In-page capture hook. Applications may define `window.__renderguardCapture`
/// to serialize whatever session state they care about; without it we fall
/// back to scroll position.
pub(crate) const CAPTURE_SCRIPT: &str = "(function(){\
 if (window.__renderguardCapture) { return window.__renderguardCapture(); }\
 return JSON.stringify({ scrollX: window.scrollX || 0, scrollY: window.scrollY || 0 });\
})()";

pub(crate) const RESTORE_MARKER: &str = "__renderguardRestore";

fn restore_script(page_state: &str) -> String {
    let encoded = serde_json::to_string(page_state).unwrap_or_else(|_| "null".to_string());
    format!(
        "(function(){{\
 var s = {encoded};\
 if (window.{RESTORE_MARKER}) {{ window.{RESTORE_MARKER}(s); return true; }}\
 try {{ var p = JSON.parse(s); window.scrollTo(p.scrollX || 0, p.scrollY || 0); }} catch (e) {{}}\
 return true;\
}})()"
    )
}

/// Minimal serialized session state carried across a recreation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub location: Option<Url>,
    pub page_state: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn empty() -> Self {
        Self {
            location: None,
            page_state: None,
            captured_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.page_state.is_none()
    }
}

/// Captures and restores [`StateSnapshot`]s against a render host handle.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotStore {
    capture_timeout: Duration,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_millis(500),
        }
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the current session state. Never fails the caller: internal
    /// errors degrade to an empty-but-valid snapshot with a logged
    /// diagnostic.
    pub async fn capture(&self, host: &RenderHostHandle) -> StateSnapshot {
        let location = host.current_location();

        let page_state = match self.capture_page_state(host).await {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(host = %host.id(), error = %err, "page state capture degraded to empty");
                None
            }
        };

        StateSnapshot {
            location,
            page_state,
            captured_at: Utc::now(),
        }
    }

    async fn capture_page_state(&self, host: &RenderHostHandle) -> Result<String, SnapshotError> {
        let evaluation = tokio::time::timeout(self.capture_timeout, host.evaluate(CAPTURE_SCRIPT))
            .await
            .map_err(|_| SnapshotError::CaptureTimeout)?;

        match evaluation.map_err(SnapshotError::Capture)? {
            Value::String(state) => Ok(state),
            other => Ok(other.to_string()),
        }
    }

    /// Restores a snapshot onto a (new) handle. Returns `true` only when
    /// every field present in the snapshot was restored; a partial result is
    /// `false` but is not an error condition for the caller. An empty
    /// snapshot restores vacuously.
    pub async fn restore(&self, snapshot: &StateSnapshot, host: &RenderHostHandle) -> bool {
        let location_ok = self.restore_location(snapshot, host).await;
        let page_state_ok = self.restore_page_state(snapshot, host).await;
        location_ok && page_state_ok
    }

    /// Location-only restoration, used by the fallback strategy.
    pub async fn restore_location(&self, snapshot: &StateSnapshot, host: &RenderHostHandle) -> bool {
        let Some(location) = &snapshot.location else {
            return true;
        };
        match host.navigate(location).await {
            Ok(()) => true,
            Err(err) => {
                warn!(host = %host.id(), error = %err, "location restore failed");
                false
            }
        }
    }

    /// Re-injects the captured page state, used by the reload strategy where
    /// the location survives on its own.
    pub async fn restore_page_state(
        &self,
        snapshot: &StateSnapshot,
        host: &RenderHostHandle,
    ) -> bool {
        let Some(page_state) = &snapshot.page_state else {
            return true;
        };
        match host.evaluate(&restore_script(page_state)).await {
            Ok(_) => {
                debug!(host = %host.id(), "page state restored");
                true
            }
            Err(err) => {
                warn!(
                    host = %host.id(),
                    error = %SnapshotError::Restore(err),
                    "page state restore failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::error::HostError;
    use crate::host::RenderHost;

    struct BrokenHost;

    #[async_trait]
    impl RenderHost for BrokenHost {
        async fn destroy(&self) {}

        fn is_alive(&self) -> bool {
            true
        }

        async fn evaluate(&self, _script: &str) -> Result<Value, HostError> {
            Err(HostError::Evaluation("page unresponsive".into()))
        }

        async fn navigate(&self, _location: &Url) -> Result<(), HostError> {
            Err(HostError::Navigation("refused".into()))
        }

        async fn reload(&self) -> Result<(), HostError> {
            Ok(())
        }

        fn current_location(&self) -> Option<Url> {
            Some(Url::parse("https://app.example/session").unwrap())
        }
    }

    fn broken_handle() -> RenderHostHandle {
        RenderHostHandle::new(Uuid::new_v4(), Box::new(BrokenHost))
    }

    #[tokio::test]
    async fn capture_degrades_but_never_fails() {
        let store = SnapshotStore::new();
        let snapshot = store.capture(&broken_handle()).await;

        assert_eq!(
            snapshot.location.as_ref().map(|u| u.as_str()),
            Some("https://app.example/session")
        );
        assert!(snapshot.page_state.is_none());
    }

    #[tokio::test]
    async fn empty_snapshot_restores_vacuously() {
        let store = SnapshotStore::new();
        let snapshot = StateSnapshot::empty();
        assert!(snapshot.is_empty());
        assert!(store.restore(&snapshot, &broken_handle()).await);
    }

    #[tokio::test]
    async fn partial_restore_reports_false() {
        let store = SnapshotStore::new();
        let snapshot = StateSnapshot {
            location: Some(Url::parse("https://app.example/session").unwrap()),
            page_state: Some("{}".to_string()),
            captured_at: Utc::now(),
        };
        assert!(!store.restore(&snapshot, &broken_handle()).await);
    }

    #[test]
    fn restore_script_escapes_state() {
        let script = restore_script("{\"a\":\"b\"}");
        assert!(script.contains(RESTORE_MARKER));
        assert!(script.contains("{\\\"a\\\":\\\"b\\\"}"));
    }

    #[test]
    fn snapshot_round_trips_through_serde() {
        let snapshot = StateSnapshot {
            location: Some(Url::parse("https://app.example/a?b=c").unwrap()),
            page_state: Some("state".to_string()),
            captured_at: Utc::now(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.location, snapshot.location);
        assert_eq!(back.page_state, snapshot.page_state);
    }
}
