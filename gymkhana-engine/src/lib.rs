//! Gymkhana Race Engine
//!
//! Race lifecycle around the tracker: loading the race configuration,
//! starting and stopping races, stamping staff actions with the wall clock,
//! feeding adapter channels into the tracker and replaying stored summaries.

pub mod config;
pub mod manager;
pub mod replay;

pub use config::RaceConfig;
pub use manager::{IngestStats, RaceManager};
pub use replay::{ReplayConfig, ReplayReport, Replayer};

use gymkhana_core::{RaceSummary, SummaryError};
use gymkhana_tracker::TrackerError;
use std::path::PathBuf;
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Summary error: {0}")]
    Summary(#[from] SummaryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A race is already running")]
    AlreadyRunning,

    #[error("No race is running")]
    NotRunning,

    /// The race stopped but its summary could not be stored
    #[error("Race summary not written to {}: {source}", .path.display())]
    SummaryNotWritten {
        path: PathBuf,
        summary: Box<RaceSummary>,
        source: SummaryError,
    },
}

impl EngineError {
    /// True when the request was rejected because no race accepts events
    pub fn is_not_running(&self) -> bool {
        matches!(
            self,
            EngineError::NotRunning | EngineError::Tracker(TrackerError::NotRunning)
        )
    }

    /// Summary of a stopped race whose file could not be written
    pub fn into_summary(self) -> Option<RaceSummary> {
        match self {
            EngineError::SummaryNotWritten { summary, .. } => Some(*summary),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
