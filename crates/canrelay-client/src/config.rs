//! Client config (strict parsing).

use serde::Deserialize;
use tokio::time::Duration;

use canrelay_core::error::{RelayError, Result};
use canrelay_core::protocol::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Fixed delay between a failed/closed connection and the next attempt.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Capacity of the event/ping ring; the oldest entry is dropped on overflow.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Largest inbound frame accepted from the server.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Send a `ping` after this long without any write, so an idle producer
    /// stays inside the server's idle timeout. 0 disables.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            event_queue_capacity: default_event_queue_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if !(10..=600_000).contains(&self.retry_interval_ms) {
            return Err(RelayError::Configuration(
                "client: retry_interval_ms must be within 10..=600000".into(),
            ));
        }
        if !(1..=60_000).contains(&self.connect_timeout_ms) {
            return Err(RelayError::Configuration(
                "client: connect_timeout_ms must be within 1..=60000".into(),
            ));
        }
        if !(1..=60_000).contains(&self.write_timeout_ms) {
            return Err(RelayError::Configuration(
                "client: write_timeout_ms must be within 1..=60000".into(),
            ));
        }
        if !(1..=65_536).contains(&self.event_queue_capacity) {
            return Err(RelayError::Configuration(
                "client: event_queue_capacity must be within 1..=65536".into(),
            ));
        }
        if !(256..=1_048_576).contains(&self.max_frame_bytes) {
            return Err(RelayError::Configuration(
                "client: max_frame_bytes must be within 256..=1048576".into(),
            ));
        }
        if self.keepalive_interval_ms != 0 && !(100..=600_000).contains(&self.keepalive_interval_ms) {
            return Err(RelayError::Configuration(
                "client: keepalive_interval_ms must be 0 or within 100..=600000".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// `None` when keepalive is disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }
}

pub fn load_from_str(s: &str) -> Result<ClientConfig> {
    let cfg: ClientConfig = serde_yaml::from_str(s)
        .map_err(|e| RelayError::Configuration(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

fn default_retry_interval_ms() -> u64 {
    5_000
}
fn default_connect_timeout_ms() -> u64 {
    2_000
}
fn default_write_timeout_ms() -> u64 {
    2_000
}
fn default_event_queue_capacity() -> usize {
    256
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_keepalive_interval_ms() -> u64 {
    20_000
}
