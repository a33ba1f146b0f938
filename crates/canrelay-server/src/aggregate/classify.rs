use serde::Deserialize;

use canrelay_core::error::{RelayError, Result};
use canrelay_core::protocol::{EventType, MetricsSnapshot};

/// Discrete bus health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HealthStatus {
    Nominal,
    Warning,
    Error,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Nominal => "NOMINAL",
            HealthStatus::Warning => "WARNING",
            HealthStatus::Error => "ERROR",
        }
    }
}

/// Classification thresholds (`classifier:` config section).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    #[serde(default = "default_warn_load")]
    pub warn_load_percent: f64,

    #[serde(default = "default_error_load")]
    pub error_load_percent: f64,

    /// Error frames per second above which the bus is at least WARNING.
    #[serde(default = "default_error_rate_warn")]
    pub error_frame_rate_warn: f64,

    /// Error frames per second above which the bus is ERROR.
    #[serde(default = "default_error_rate_error")]
    pub error_frame_rate_error: f64,

    #[serde(default = "default_dropped_rate_warn")]
    pub dropped_frame_rate_warn: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn_load_percent: default_warn_load(),
            error_load_percent: default_error_load(),
            error_frame_rate_warn: default_error_rate_warn(),
            error_frame_rate_error: default_error_rate_error(),
            dropped_frame_rate_warn: default_dropped_rate_warn(),
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        let load_ok = 0.0 <= self.warn_load_percent
            && self.warn_load_percent < self.error_load_percent
            && self.error_load_percent <= 100.0;
        if !load_ok {
            return Err(RelayError::Configuration(
                "classifier: require 0 <= warn_load_percent < error_load_percent <= 100".into(),
            ));
        }
        if !(0.0 <= self.error_frame_rate_warn
            && self.error_frame_rate_warn <= self.error_frame_rate_error)
        {
            return Err(RelayError::Configuration(
                "classifier: require 0 <= error_frame_rate_warn <= error_frame_rate_error".into(),
            ));
        }
        if self.dropped_frame_rate_warn.is_nan() || self.dropped_frame_rate_warn < 0.0 {
            return Err(RelayError::Configuration(
                "classifier: dropped_frame_rate_warn must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_warn_load() -> f64 {
    50.0
}
fn default_error_load() -> f64 {
    80.0
}
fn default_error_rate_warn() -> f64 {
    0.1
}
fn default_error_rate_error() -> f64 {
    1.0
}
fn default_dropped_rate_warn() -> f64 {
    0.1
}

/// Classify one snapshot plus the events seen since the previous one.
///
/// Stateless: the same inputs always give the same status.
pub fn classify(snapshot: &MetricsSnapshot, events: &[EventType], t: &Thresholds) -> HealthStatus {
    let load = snapshot.bus_load_percent;

    if load >= t.error_load_percent
        || events.iter().any(|e| e.is_terminal())
        || snapshot.error_frame_rate > t.error_frame_rate_error
    {
        return HealthStatus::Error;
    }

    if load >= t.warn_load_percent
        || !events.is_empty()
        || snapshot.error_frame_rate > t.error_frame_rate_warn
        || snapshot.dropped_frame_rate > t.dropped_frame_rate_warn
    {
        return HealthStatus::Warning;
    }

    HealthStatus::Nominal
}

/// One-line dashboard text for a status.
pub fn status_message(status: HealthStatus, snapshot: &MetricsSnapshot) -> String {
    match status {
        HealthStatus::Error => format!(
            "CAN Critical: Load {:.1}%, Errors {:.1}/s",
            snapshot.bus_load_percent, snapshot.error_frame_rate
        ),
        HealthStatus::Warning => format!("CAN Warning: Load {:.1}%", snapshot.bus_load_percent),
        HealthStatus::Nominal => "CAN Nominal".to_string(),
    }
}
