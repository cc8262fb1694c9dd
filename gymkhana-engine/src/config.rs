//! Race Configuration
//!
//! A race is described by a YAML or JSON file holding the tracker settings,
//! the starting grid by rider name and where to store the summary:
//!
//! ```yaml
//! tracker:
//!   start_gate_id: 0
//!   end_gate_id: 1
//!   end_match_timeout_secs: 10
//! riders: [Martijn, Richard, Bert]
//! summary_path: race.json
//! ```

use crate::{EngineError, EngineResult};
use ahash::AHashSet;
use gymkhana_schema::{Rider, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Race configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    /// Gate ids and end match window
    pub tracker: TrackerConfig,

    /// Starting grid, in order
    pub riders: Vec<String>,

    /// Where the summary is written when the race stops
    pub summary_path: Option<PathBuf>,
}

impl RaceConfig {
    /// Load a configuration file, choosing the format by extension
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                EngineError::Config(format!("{}: missing file extension", path.display()))
            })?;

        let content = std::fs::read_to_string(path)?;
        let config = match extension {
            "json" => Self::from_json(&content),
            "yaml" | "yml" => Self::from_yaml(&content),
            other => Err(EngineError::Config(format!(
                "{}: unsupported format '{}'",
                path.display(),
                other
            ))),
        }?;

        config.validate()?;
        info!(
            path = %path.display(),
            riders = config.riders.len(),
            "Loaded race configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> EngineResult<Self> {
        serde_yaml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_json(content: &str) -> EngineResult<Self> {
        serde_json::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Check tracker settings and rider names
    ///
    /// Names identify riders in the summary, so they must be unique and non-empty.
    pub fn validate(&self) -> EngineResult<()> {
        self.tracker
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let mut seen = AHashSet::with_capacity(self.riders.len());
        for name in &self.riders {
            if name.trim().is_empty() {
                return Err(EngineError::Config("empty rider name".to_string()));
            }
            if !seen.insert(name.as_str()) {
                return Err(EngineError::Config(format!("duplicate rider name '{}'", name)));
            }
        }
        Ok(())
    }

    /// Riders for the configured grid, each with a fresh id
    pub fn grid(&self) -> Vec<Rider> {
        self.riders.iter().map(Rider::new).collect()
    }
}
