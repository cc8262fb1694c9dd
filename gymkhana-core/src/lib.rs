//! Gymkhana Core
//!
//! Race summary persistence and time sources shared by the tracker, the race
//! manager and the replay harness.

pub mod summary;
pub mod time;

/// Re-export common types
pub use summary::{RaceSummary, SummaryError, SUMMARY_VERSION};
pub use time::{MockTimeProvider, RealTimeProvider, TimeProvider};
