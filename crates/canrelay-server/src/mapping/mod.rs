//! Channel id → label resolution.
//!
//! The static layer comes from config (inline `mapping.labels` and/or the
//! YAML file named by `mapping.file`); the learned layer comes from the
//! producer over the wire.

mod resolver;

use std::collections::BTreeMap;
use std::fs;

use serde::Deserialize;

use canrelay_core::error::{RelayError, Result};

use crate::config::MappingSection;

pub use resolver::{fallback_label, MappingResolver};

/// On-disk shape of a static mapping file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticMappingFile {
    #[serde(default)]
    labels: BTreeMap<u32, String>,
}

/// Parse a static mapping document.
pub fn parse_static_labels(s: &str) -> Result<BTreeMap<u32, String>> {
    let file: StaticMappingFile = serde_yaml::from_str(s)
        .map_err(|e| RelayError::Configuration(format!("invalid static mapping: {e}")))?;
    Ok(file.labels)
}

/// Load the static layer described by `section`.
///
/// A configured file that cannot be read is fatal; there is no retry.
pub fn load_static_labels(section: &MappingSection) -> Result<BTreeMap<u32, String>> {
    let mut labels = section.labels.clone();
    if let Some(path) = section.file.as_deref() {
        let s = fs::read_to_string(path).map_err(|e| {
            RelayError::Configuration(format!("static mapping {path} unreadable: {e}"))
        })?;
        labels.extend(parse_static_labels(&s)?);
    }
    tracing::info!(labels = labels.len(), "static channel mapping loaded");
    Ok(labels)
}

impl MappingResolver {
    /// Build a resolver from config, loading the static layer once.
    pub fn from_config(section: &MappingSection) -> Result<Self> {
        Ok(Self::new(load_static_labels(section)?))
    }
}
