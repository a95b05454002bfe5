//! Supervisor tunables.
//!
//! Configuration arrives as a flat map of named options (the shape the
//! command-dispatch bridge hands us), with documented defaults. Unknown keys
//! are ignored, missing keys fall back to defaults, and out-of-range values
//! fall back with a warning rather than failing startup.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RECREATE_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECREATE_RETRY_WINDOW: Duration = Duration::from_secs(60);

/// Diagnostics verbosity. Ordered so that `Verbose > Normal > Quiet`: an
/// event passes the filter when the configured level is at least the level
/// the event requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Quiet,
    Normal,
    Verbose,
}

impl DebugLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Some(Self::Quiet),
            "normal" => Some(Self::Normal),
            "verbose" => Some(Self::Verbose),
            _ => None,
        }
    }
}

/// Primary recreation strategy for a recovery attempt.
///
/// `Reload` keeps the current handle and asks the engine to reload (the
/// content process respawns); `Recreate` destroys the handle and builds a
/// fresh one, restoring the captured snapshot onto it. The fallback path is
/// always a bare recreate with location-only restoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMethod {
    Reload,
    Recreate,
}

impl RecoveryMethod {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "reload" => Some(Self::Reload),
            "recreate" => Some(Self::Recreate),
            _ => None,
        }
    }
}

/// Resolved tunables for monitoring and recovery.
///
/// An instance is an immutable snapshot: the supervisor reads it at monitor
/// start and at the beginning of each recovery attempt, so a live
/// reconfiguration (via `start_monitoring`) takes effect on the next cycle
/// and never mid-recovery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryConfig {
    pub debug_mode_enabled: bool,
    pub debug_level: DebugLevel,
    pub show_debug_alerts: bool,
    pub log_to_javascript: bool,
    pub health_check_interval: Duration,
    pub recovery_delay: Duration,
    pub recovery_method: RecoveryMethod,
    /// Primary-strategy failures tolerated inside `recreate_retry_window`
    /// before a new incident skips straight to the fallback.
    pub max_recreate_attempts: u32,
    pub recreate_retry_window: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            debug_mode_enabled: false,
            debug_level: DebugLevel::Normal,
            show_debug_alerts: false,
            log_to_javascript: false,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
            recovery_method: RecoveryMethod::Recreate,
            max_recreate_attempts: DEFAULT_MAX_RECREATE_ATTEMPTS,
            recreate_retry_window: DEFAULT_RECREATE_RETRY_WINDOW,
        }
    }
}

impl RecoveryConfig {
    /// Builds a config from a flat option map. Keys not listed here are
    /// ignored; values that fail to parse or are out of range fall back to
    /// the defaults with a logged warning.
    pub fn from_options(options: &HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let health_check_interval = duration_option(
            options,
            "healthCheckInterval",
            defaults.health_check_interval,
            false,
        );
        let recovery_delay =
            duration_option(options, "recoveryDelay", defaults.recovery_delay, true);

        Self {
            debug_mode_enabled: bool_option(
                options,
                "debugModeEnabled",
                defaults.debug_mode_enabled,
            ),
            debug_level: enum_option(
                options,
                "debugLevel",
                defaults.debug_level,
                DebugLevel::parse,
            ),
            show_debug_alerts: bool_option(
                options,
                "showDebugAlerts",
                defaults.show_debug_alerts,
            ),
            log_to_javascript: bool_option(
                options,
                "logToJavaScript",
                defaults.log_to_javascript,
            ),
            health_check_interval,
            recovery_delay,
            recovery_method: enum_option(
                options,
                "recoveryMethod",
                defaults.recovery_method,
                RecoveryMethod::parse,
            ),
            max_recreate_attempts: int_option(
                options,
                "maxRecreateAttempts",
                defaults.max_recreate_attempts,
            ),
            recreate_retry_window: duration_option(
                options,
                "recreateRetryWindow",
                defaults.recreate_retry_window,
                false,
            ),
        }
    }

    /// Reads the same options from `RENDERGUARD_*` environment variables.
    pub fn from_env() -> Self {
        const VARS: [(&str, &str); 9] = [
            ("debugModeEnabled", "RENDERGUARD_DEBUG_MODE_ENABLED"),
            ("debugLevel", "RENDERGUARD_DEBUG_LEVEL"),
            ("showDebugAlerts", "RENDERGUARD_SHOW_DEBUG_ALERTS"),
            ("logToJavaScript", "RENDERGUARD_LOG_TO_JAVASCRIPT"),
            ("healthCheckInterval", "RENDERGUARD_HEALTH_CHECK_INTERVAL"),
            ("recoveryDelay", "RENDERGUARD_RECOVERY_DELAY"),
            ("recoveryMethod", "RENDERGUARD_RECOVERY_METHOD"),
            ("maxRecreateAttempts", "RENDERGUARD_MAX_RECREATE_ATTEMPTS"),
            ("recreateRetryWindow", "RENDERGUARD_RECREATE_RETRY_WINDOW"),
        ];

        let mut options = HashMap::new();
        for (key, var) in VARS {
            if let Ok(value) = std::env::var(var) {
                options.insert(key.to_string(), value);
            }
        }
        Self::from_options(&options)
    }

    /// Bounded timeout for a single liveness probe: half the health-check
    /// interval, so it can never exceed it.
    pub fn probe_timeout(&self) -> Duration {
        self.health_check_interval / 2
    }

    /// Diagnostics verbosity actually applied: the `debug_mode_enabled`
    /// master switch drops the sink to `Quiet` (failures only) regardless of
    /// the configured level.
    pub fn effective_debug_level(&self) -> DebugLevel {
        if self.debug_mode_enabled {
            self.debug_level
        } else {
            DebugLevel::Quiet
        }
    }
}

fn bool_option(options: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match options.get(key) {
        None => default,
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                warn!(key, value = other, "unparseable boolean option, using default");
                default
            }
        },
    }
}

fn enum_option<T: Copy>(
    options: &HashMap<String, String>,
    key: &str,
    default: T,
    parse: fn(&str) -> Option<T>,
) -> T {
    match options.get(key) {
        None => default,
        Some(value) => parse(value).unwrap_or_else(|| {
            warn!(key, value = value.as_str(), "unknown option value, using default");
            default
        }),
    }
}

fn int_option(options: &HashMap<String, String>, key: &str, default: u32) -> u32 {
    match options.get(key) {
        None => default,
        Some(value) => match value.parse::<u32>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(key, value = value.as_str(), "unparseable integer option, using default");
                default
            }
        },
    }
}

/// Durations arrive as seconds. Intervals must be strictly positive; delays
/// may be zero (`allow_zero`). Anything else falls back to the default.
fn duration_option(
    options: &HashMap<String, String>,
    key: &str,
    default: Duration,
    allow_zero: bool,
) -> Duration {
    match options.get(key) {
        None => default,
        Some(value) => match value.parse::<f64>() {
            // try_from catches non-finite and overflowing seconds, which
            // parse fine as f64 ("inf", "1e300") but have no Duration.
            Ok(secs) if secs > 0.0 => match Duration::try_from_secs_f64(secs) {
                Ok(parsed) => parsed,
                Err(_) => {
                    warn!(key, value = value.as_str(), "out-of-range duration option, using default");
                    default
                }
            },
            Ok(secs) if secs == 0.0 && allow_zero => Duration::ZERO,
            Ok(_) => {
                warn!(key, value = value.as_str(), "out-of-range duration option, using default");
                default
            }
            Err(_) => {
                warn!(key, value = value.as_str(), "unparseable duration option, using default");
                default
            }
        },
    }
}
