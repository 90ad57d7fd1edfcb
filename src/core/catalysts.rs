//! Catalyst rule sources
//!
//! The monitor does not own catalyst persistence. It polls a
//! `CatalystSource` for the currently open catalysts and resyncs the
//! evaluator with the result.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::core::types::AlertRule;
use crate::error::{MonitorError, MonitorResult};

/// Provider of the active alert rules
#[async_trait]
pub trait CatalystSource: Send + Sync {
    /// Every rule that should be active right now. Rules missing from the
    /// result are removed from the evaluator.
    async fn active_rules(&self) -> MonitorResult<Vec<AlertRule>>;

    fn source_name(&self) -> &str;
}

/// In-memory source; the application pushes rule sets into it.
#[derive(Debug, Default)]
pub struct StaticCatalystSource {
    rules: RwLock<Vec<AlertRule>>,
}

impl StaticCatalystSource {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn set_rules(&self, rules: Vec<AlertRule>) {
        *self.rules.write() = rules;
    }
}

#[async_trait]
impl CatalystSource for StaticCatalystSource {
    async fn active_rules(&self) -> MonitorResult<Vec<AlertRule>> {
        Ok(self.rules.read().clone())
    }

    fn source_name(&self) -> &str {
        "static"
    }
}

#[derive(Debug, Deserialize)]
struct CatalystEntry {
    #[serde(flatten)]
    rule: AlertRule,
    /// Closed catalysts stay in the file but produce no rule
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct CatalystFile {
    #[serde(default)]
    catalysts: Vec<CatalystEntry>,
}

/// Parse a catalyst YAML document into the active rules.
///
/// ```yaml
/// catalysts:
///   - ticker: AAPL
///     catalyst_id: c1
///     catalyst_title: Earnings beat
///     price_at_catalyst: 150.00
///     tolerance_points: 2.0
///     minimum_move: 1.0
///   - ticker: TSLA
///     catalyst_id: c7
///     price_at_catalyst: 210
///     tolerance_points: 5
///     minimum_move: 2
///     active: false
/// ```
pub fn parse_catalysts(yaml: &str) -> MonitorResult<Vec<AlertRule>> {
    let file: CatalystFile = serde_yaml::from_str(yaml)
        .map_err(|e| MonitorError::CatalystSource(format!("invalid catalyst YAML: {}", e)))?;
    Ok(file
        .catalysts
        .into_iter()
        .filter(|entry| entry.active)
        .map(|entry| entry.rule)
        .collect())
}

/// Re-reads a YAML file on every poll, so edits are picked up live.
#[derive(Debug, Clone)]
pub struct YamlCatalystSource {
    path: PathBuf,
}

impl YamlCatalystSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CatalystSource for YamlCatalystSource {
    async fn active_rules(&self) -> MonitorResult<Vec<AlertRule>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MonitorError::CatalystSource(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))
        })?;
        parse_catalysts(&contents)
    }

    fn source_name(&self) -> &str {
        "yaml"
    }
}
