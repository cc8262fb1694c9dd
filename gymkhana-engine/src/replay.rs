//! Summary Replay
//!
//! Re-runs a stored race through a fresh tracker:
//! - Raw sensor and staff events are submitted in recorded order with their
//!   recorded wall clock times
//! - Finishes and inferred DNFs are recomputed by the tracker, not replayed
//! - Event ids referenced by staff actions are translated to the ids of the
//!   new run
//!
//! Replaying a race reproduces its laps, which makes stored summaries usable
//! as regression fixtures for the matching rules.

use crate::{EngineError, EngineResult};
use ahash::AHashMap;
use gymkhana_core::RaceSummary;
use gymkhana_event::{Lap, RaceEvent};
use gymkhana_schema::{EventId, TimestampWall};
use gymkhana_tracker::{RaceTracker, TrackerResult};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Replay configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Replay speed multiplier (1.0 = real-time, 2.0 = 2x fast, 0 = no pacing)
    pub speed_multiplier: f64,

    /// Whether to stop on the first rejected event
    pub stop_on_error: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed_multiplier: 0.0,
            stop_on_error: false,
        }
    }
}

/// Outcome of a replay
#[derive(Debug, Clone)]
pub struct ReplayReport {
    /// Events submitted to the tracker and accepted
    pub submitted: usize,
    /// Derived events that were recomputed instead of replayed
    pub skipped: usize,
    /// Events the tracker rejected
    pub failed: usize,
    /// Laps of the replayed race in completion order
    pub laps: Vec<Lap>,
    /// Fastest lap per rider, leaderboard order
    pub best_laps: Vec<Lap>,
    /// Summary of the replayed race
    pub summary: RaceSummary,
}

/// Replays summaries into fresh trackers
#[derive(Debug, Clone, Default)]
pub struct Replayer {
    config: ReplayConfig,
}

impl Replayer {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    /// Replay a summary with the recorded configuration and riders
    pub async fn replay(&self, summary: &RaceSummary) -> EngineResult<ReplayReport> {
        let tracker = RaceTracker::new(summary.config.clone(), summary.riders.clone())?;
        info!(events = summary.events.len(), "Starting replay");

        // recorded timing event id -> id assigned by this run
        let mut timing_ids: AHashMap<EventId, EventId> = AHashMap::default();
        let mut previous: Option<TimestampWall> = None;
        let (mut submitted, mut skipped, mut failed) = (0, 0, 0);

        for event in &summary.events {
            if event.kind().is_derived() {
                skipped += 1;
                continue;
            }

            self.pace(previous, event.time()).await;
            previous = Some(event.time());

            match Self::apply(&tracker, &mut timing_ids, event) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    error!(error = %e, kind = %event.kind(), event_id = %event.event_id(), "Replayed event rejected");
                    failed += 1;
                    if self.config.stop_on_error {
                        return Err(EngineError::Tracker(e));
                    }
                }
            }
        }

        let laps = tracker.laps(0);
        let best_laps = tracker.best_laps();
        let summary = tracker.stop()?;
        info!(submitted, skipped, failed, laps = laps.len(), "Replay completed");

        Ok(ReplayReport {
            submitted,
            skipped,
            failed,
            laps,
            best_laps,
            summary,
        })
    }

    async fn pace(&self, previous: Option<TimestampWall>, next: TimestampWall) {
        if self.config.speed_multiplier <= 0.0 {
            return;
        }
        let Some(previous) = previous else {
            return;
        };

        let delay_ns = next.saturating_sub(previous);
        let delay_ms = (delay_ns as f64 / 1_000_000.0 / self.config.speed_multiplier) as u64;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    fn apply(
        tracker: &RaceTracker,
        timing_ids: &mut AHashMap<EventId, EventId>,
        event: &RaceEvent,
    ) -> TrackerResult<()> {
        match event {
            RaceEvent::RiderReady(e) => {
                tracker.submit_rider_ready(e.rider.id, e.time, e.staff.as_str())?;
            }
            RaceEvent::Timing(e) => {
                if let Some(id) = tracker.submit_gate_trigger(e.gate_id, e.micros, e.time)? {
                    timing_ids.insert(e.event_id, id);
                }
            }
            RaceEvent::RiderFinished(e) => match (&e.staff, e.time_end.get()) {
                (Some(staff), Some(target)) => {
                    let target = Self::translate(timing_ids, target);
                    tracker.confirm_finish(target, e.rider.id, staff.as_str(), e.time)?;
                }
                _ => tracker.submit_end_identification(e.rider.id, e.time)?,
            },
            RaceEvent::ManualDnf(e) => {
                tracker.manual_dnf(e.this_rider.rider.id, e.staff.as_str(), e.time)?;
            }
            RaceEvent::Dsq(e) => {
                tracker.disqualify(e.rider.id, e.reason.as_str(), e.staff.as_str(), e.time)?;
            }
            RaceEvent::Penalty(e) => {
                tracker.penalty(
                    e.rider.id,
                    i64::from(e.seconds),
                    e.reason.as_str(),
                    e.staff.as_str(),
                    e.time,
                )?;
            }
            RaceEvent::ClearReady(e) => {
                tracker.clear_ready(e.rider.id, e.staff.as_str(), e.time)?;
            }
            RaceEvent::DeleteTime(e) => {
                let target = Self::translate(timing_ids, &e.target_event_id);
                if !tracker.delete_pending_time(target, e.staff.as_str(), e.time)? {
                    warn!(event_id = %e.target_event_id, "Replayed delete found no pending time");
                }
            }
            RaceEvent::Finished(_) | RaceEvent::UnitDnf(_) => {
                debug!(kind = %event.kind(), "Derived event not replayed");
            }
        }
        Ok(())
    }

    fn translate(timing_ids: &AHashMap<EventId, EventId>, recorded: &EventId) -> EventId {
        timing_ids.get(recorded).copied().unwrap_or(*recorded)
    }
}
