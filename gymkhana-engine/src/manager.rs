//! Race Manager
//!
//! Owns the tracker of the current race. A race is started from a tracker
//! configuration and a grid, accepts events until it is stopped, and yields
//! its summary on stop. Staff actions and box identifications are stamped
//! with the manager's clock; gate triggers carry their own device time.

use crate::{EngineError, EngineResult, RaceConfig};
use gymkhana_core::{RaceSummary, RealTimeProvider, TimeProvider};
use gymkhana_event::Lap;
use gymkhana_schema::{DeviceMicros, EventId, GateId, Rider, RiderId, TrackerConfig};
use gymkhana_tracker::{
    Notification, RaceTracker, Submission, TrackerMetricsSnapshot, TrackerState,
};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of draining an adapter channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Lifecycle owner for races
pub struct RaceManager {
    tracker: RwLock<Option<Arc<RaceTracker>>>,
    clock: Arc<dyn TimeProvider>,
    summary_path: RwLock<Option<PathBuf>>,
}

impl Default for RaceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RaceManager {
    /// Manager stamping events with the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RealTimeProvider))
    }

    pub fn with_clock(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            tracker: RwLock::new(None),
            clock,
            summary_path: RwLock::new(None),
        }
    }

    /// Start a race
    pub fn start(
        &self,
        config: TrackerConfig,
        riders: impl IntoIterator<Item = Rider>,
    ) -> EngineResult<Arc<RaceTracker>> {
        let mut slot = self.tracker.write();
        if slot.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let tracker = Arc::new(RaceTracker::new(config, riders)?);
        *slot = Some(tracker.clone());
        info!("Race started");
        Ok(tracker)
    }

    /// Start a race from a loaded configuration
    pub fn start_with(&self, config: &RaceConfig) -> EngineResult<Arc<RaceTracker>> {
        config.validate()?;
        let tracker = self.start(config.tracker.clone(), config.grid())?;
        *self.summary_path.write() = config.summary_path.clone();
        Ok(tracker)
    }

    /// Stop the race and return its summary, writing it out when a path is configured
    ///
    /// A failed write is reported as `SummaryNotWritten`, which still carries
    /// the summary.
    pub fn stop(&self) -> EngineResult<RaceSummary> {
        let tracker = self.tracker.write().take().ok_or(EngineError::NotRunning)?;
        let summary = tracker.stop()?;
        info!(events = summary.events.len(), "Race stopped");

        if let Some(path) = self.summary_path.write().take() {
            if let Err(source) = summary.write_file(&path) {
                error!(path = %path.display(), error = %source, "Failed to write race summary");
                return Err(EngineError::SummaryNotWritten {
                    path,
                    summary: Box::new(summary),
                    source,
                });
            }
        }
        Ok(summary)
    }

    pub fn is_running(&self) -> bool {
        self.tracker.read().is_some()
    }

    /// Tracker of the running race
    pub fn tracker(&self) -> EngineResult<Arc<RaceTracker>> {
        self.tracker.read().clone().ok_or(EngineError::NotRunning)
    }

    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    // ------------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------------

    pub fn submit(&self, submission: Submission) -> EngineResult<()> {
        Ok(self.tracker()?.submit(submission)?)
    }

    /// Rider confirmed in the start box now
    pub fn rider_ready(&self, rider: RiderId, staff: &str) -> EngineResult<EventId> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.submit_rider_ready(rider, now, staff)?)
    }

    /// Gate trigger received now
    pub fn gate_trigger(&self, gate_id: GateId, micros: DeviceMicros) -> EngineResult<Option<EventId>> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.submit_gate_trigger(gate_id, micros, now)?)
    }

    /// Rider identified in the end box now
    pub fn end_identification(&self, rider: RiderId) -> EngineResult<()> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.submit_end_identification(rider, now)?)
    }

    pub fn penalty(&self, rider: RiderId, seconds: i64, reason: &str, staff: &str) -> EngineResult<()> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.penalty(rider, seconds, reason, staff, now)?)
    }

    pub fn disqualify(&self, rider: RiderId, reason: &str, staff: &str) -> EngineResult<()> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.disqualify(rider, reason, staff, now)?)
    }

    pub fn manual_dnf(&self, rider: RiderId, staff: &str) -> EngineResult<()> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.manual_dnf(rider, staff, now)?)
    }

    pub fn clear_ready(&self, rider: RiderId, staff: &str) -> EngineResult<()> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.clear_ready(rider, staff, now)?)
    }

    pub fn delete_pending_time(&self, target: EventId, staff: &str) -> EngineResult<bool> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.delete_pending_time(target, staff, now)?)
    }

    pub fn confirm_finish(&self, target: EventId, rider: RiderId, staff: &str) -> EngineResult<()> {
        let now = self.clock.wall_ns();
        Ok(self.tracker()?.confirm_finish(target, rider, staff, now)?)
    }

    pub fn add_rider(&self, rider: Rider) -> EngineResult<()> {
        Ok(self.tracker()?.add_rider(rider)?)
    }

    pub fn remove_rider(&self, rider: &RiderId) -> EngineResult<bool> {
        Ok(self.tracker()?.remove_rider(rider)?)
    }

    pub fn reposition_rider(&self, rider: &RiderId, position: i64) -> EngineResult<()> {
        Ok(self.tracker()?.reposition_rider(rider, position)?)
    }

    /// Feed an adapter channel into the running race until the channel closes
    ///
    /// Rejected submissions are logged and counted; a stopped race rejects
    /// everything that is still queued.
    pub fn ingest(&self, mut rx: mpsc::Receiver<Submission>) -> EngineResult<JoinHandle<IngestStats>> {
        let tracker = self.tracker()?;

        Ok(tokio::spawn(async move {
            let mut stats = IngestStats::default();
            while let Some(submission) = rx.recv().await {
                match tracker.submit(submission) {
                    Ok(()) => stats.accepted += 1,
                    Err(e) => {
                        warn!(error = %e, "Submission rejected");
                        stats.rejected += 1;
                    }
                }
            }
            debug!(
                accepted = stats.accepted,
                rejected = stats.rejected,
                "Ingest channel closed"
            );
            stats
        }))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn laps(&self, start: usize) -> EngineResult<Vec<Lap>> {
        Ok(self.tracker()?.laps(start))
    }

    pub fn best_laps(&self) -> EngineResult<Vec<Lap>> {
        Ok(self.tracker()?.best_laps())
    }

    pub fn state(&self) -> EngineResult<TrackerState> {
        Ok(self.tracker()?.state())
    }

    pub fn metrics(&self) -> EngineResult<TrackerMetricsSnapshot> {
        Ok(self.tracker()?.metrics())
    }

    pub fn subscribe_channel(&self) -> EngineResult<mpsc::UnboundedReceiver<Notification>> {
        Ok(self.tracker()?.subscribe_channel())
    }
}

impl std::fmt::Debug for RaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceManager")
            .field("running", &self.is_running())
            .field("summary_path", &*self.summary_path.read())
            .finish()
    }
}
