//! Shared error types for the recovery supervisor.

use thiserror::Error;

use crate::monitor::HealthOutcome;

/// Errors produced at the render host boundary.
#[derive(Debug, Error)]
pub enum HostError {
    /// The hosting environment refused to allocate a new render host.
    /// Fatal to the current recovery attempt; triggers the fallback strategy
    /// or, if that also fails, a terminal `RecoveryFailed` report.
    #[error("hosting environment refused to allocate a render host: {0}")]
    CreationFailed(String),

    /// The handle was already destroyed when the operation was requested.
    #[error("render host is gone")]
    HostGone,

    /// Script evaluation against the render host failed.
    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    /// Navigation request was rejected by the render host.
    #[error("navigation failed: {0}")]
    Navigation(String),
}

/// Internal snapshot failures. Always non-fatal to the caller: the snapshot
/// store degrades to an empty-but-valid snapshot (capture) or a `false`
/// restore result, logging the underlying cause.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("page state capture timed out")]
    CaptureTimeout,

    #[error("page state capture failed: {0}")]
    Capture(#[source] HostError),

    #[error("page state restore failed: {0}")]
    Restore(#[source] HostError),
}

/// Terminal outcome of a recovery incident. Surfaced to observers and the
/// diagnostics sink; never retried implicitly.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Both the primary strategy and the single fallback attempt failed.
    /// The render surface may be absent until the next incident.
    #[error("recovery failed: primary strategy: {primary}; fallback: {fallback}")]
    PrimaryAndFallbackFailed { primary: String, fallback: String },

    /// The post-recovery verification probe did not come back healthy. The
    /// new handle stays installed; no second attempt is made for this
    /// incident.
    #[error("post-recovery verification reported {outcome:?}")]
    VerificationFailed { outcome: HealthOutcome },

    /// The attempt was cancelled before completing (supervisor shutdown).
    #[error("recovery cancelled before completion")]
    Cancelled,
}
