use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use canrelay_core::error::{RelayError, Result};

use crate::aggregate::{HealthStatus, RttSummary};
use crate::sink::{BusSample, ChannelSample, PairSample, Severity, TelemetrySink};

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    Bus(BusSample),
    Rtt(RttSummary),
    Pair(PairSample),
    Channel(ChannelSample),
    Status { status: HealthStatus, message: String },
    Event { severity: Severity, message: String },
}

/// In-memory sink that keeps every call, in arrival order.
///
/// Used by embedders that poll instead of push, and by the integration tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<SinkRecord>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call return `RelayError::Sink` (still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn bus_samples(&self) -> Vec<BusSample> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                SinkRecord::Bus(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn rtt_summaries(&self) -> Vec<RttSummary> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                SinkRecord::Rtt(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<HealthStatus> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                SinkRecord::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<(Severity, String)> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                SinkRecord::Event { severity, message } => Some((severity, message)),
                _ => None,
            })
            .collect()
    }

    /// Poll until `pred` holds over the recorded calls or `timeout` elapses.
    pub async fn wait_for<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&[SinkRecord]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
                if pred(&records) {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn push(&self, record: SinkRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        if self.failing.load(Ordering::Relaxed) {
            return Err(RelayError::Sink("memory sink set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn record_bus(&self, _timestamp: u64, bus: &BusSample) -> Result<()> {
        self.push(SinkRecord::Bus(bus.clone()))
    }

    async fn record_rtt(&self, _timestamp: u64, rtt: &RttSummary) -> Result<()> {
        self.push(SinkRecord::Rtt(*rtt))
    }

    async fn record_channel(&self, _timestamp: u64, channel: &ChannelSample) -> Result<()> {
        self.push(SinkRecord::Channel(channel.clone()))
    }

    async fn log_event(&self, _timestamp: u64, severity: Severity, message: &str) -> Result<()> {
        self.push(SinkRecord::Event {
            severity,
            message: message.to_string(),
        })
    }

    async fn record_pair(&self, _timestamp: u64, pair: &PairSample) -> Result<()> {
        self.push(SinkRecord::Pair(pair.clone()))
    }

    async fn record_status(&self, _timestamp: u64, status: HealthStatus, message: &str) -> Result<()> {
        self.push(SinkRecord::Status {
            status,
            message: message.to_string(),
        })
    }
}
