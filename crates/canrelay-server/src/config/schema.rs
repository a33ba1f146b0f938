use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::Deserialize;
use canrelay_core::error::{RelayError, Result};

use crate::aggregate::Thresholds;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub classifier: Thresholds,

    #[serde(default)]
    pub mapping: MappingSection,

    #[serde(default)]
    pub ops: OpsSection,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(RelayError::Configuration(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.server.validate()?;
        self.classifier.validate()?;
        self.ops.validate()?;

        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSection::default(),
            classifier: Thresholds::default(),
            mapping: MappingSection::default(),
            ops: OpsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// 0 disables the server-initiated mapping request.
    #[serde(default = "default_mapping_grace_ms")]
    pub mapping_grace_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_frame_bytes: default_max_frame_bytes(),
            idle_timeout_ms: default_idle_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            mapping_grace_ms: default_mapping_grace_ms(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RelayError::Configuration("server.host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(RelayError::Configuration("server.port must be non-zero".into()));
        }
        if !(256..=1_048_576).contains(&self.max_frame_bytes) {
            return Err(RelayError::Configuration(
                "server.max_frame_bytes must be between 256 and 1048576".into(),
            ));
        }
        if !(1000..=3_600_000).contains(&self.idle_timeout_ms) {
            return Err(RelayError::Configuration(
                "server.idle_timeout_ms must be between 1000 and 3600000".into(),
            ));
        }
        if !(100..=60_000).contains(&self.write_timeout_ms) {
            return Err(RelayError::Configuration(
                "server.write_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        if self.mapping_grace_ms > 600_000 {
            return Err(RelayError::Configuration(
                "server.mapping_grace_ms must be at most 600000".into(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    9877
}
fn default_max_frame_bytes() -> usize {
    canrelay_core::protocol::DEFAULT_MAX_FRAME_BYTES
}
fn default_idle_timeout_ms() -> u64 {
    60000
}
fn default_write_timeout_ms() -> u64 {
    2000
}
fn default_mapping_grace_ms() -> u64 {
    3000
}

/// Static channel label source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingSection {
    /// YAML file with a `labels:` table. Must exist when set.
    #[serde(default)]
    pub file: Option<String>,

    /// Inline labels; the file wins on conflicts.
    #[serde(default)]
    pub labels: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpsSection {
    /// `/healthz` + `/metrics` listener. Disabled when absent.
    #[serde(default)]
    pub listen: Option<String>,
}

impl OpsSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.listen
            .as_deref()
            .map(|s| {
                s.parse::<SocketAddr>().map_err(|e| {
                    RelayError::Configuration(format!("ops.listen must be a valid SocketAddr: {e}"))
                })
            })
            .transpose()
    }
}
