// Tracker metrics
//
// Counters for recorded events and for the sensor noise the tracker absorbs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live tracker counters
#[derive(Debug, Default)]
pub struct TrackerMetrics {
    /// Events appended to the race log
    pub events_recorded: AtomicU64,

    /// Start gate triggers discarded because the start box was empty
    pub stray_start_triggers: AtomicU64,

    /// End events that found counterparts, but none inside the match window
    pub end_window_misses: AtomicU64,

    /// End box identifications of riders not on track
    pub ignored_end_ids: AtomicU64,

    /// Stale pending end events dropped after a match
    pub pending_pruned: AtomicU64,

    /// Pending end gate triggers deleted by staff
    pub pending_times_deleted: AtomicU64,

    /// Completed laps
    pub laps_finished: AtomicU64,

    /// Inferred and manual DNF laps
    pub laps_dnf: AtomicU64,
}

impl TrackerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn event_recorded(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stray_start_trigger(&self) {
        self.stray_start_triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end_window_miss(&self) {
        self.end_window_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ignored_end_id(&self) {
        self.ignored_end_ids.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pruned(&self, count: usize) {
        self.pending_pruned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn pending_time_deleted(&self) {
        self.pending_times_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lap_finished(&self) {
        self.laps_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lap_dnf(&self) {
        self.laps_dnf.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrackerMetricsSnapshot {
        TrackerMetricsSnapshot {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            stray_start_triggers: self.stray_start_triggers.load(Ordering::Relaxed),
            end_window_misses: self.end_window_misses.load(Ordering::Relaxed),
            ignored_end_ids: self.ignored_end_ids.load(Ordering::Relaxed),
            pending_pruned: self.pending_pruned.load(Ordering::Relaxed),
            pending_times_deleted: self.pending_times_deleted.load(Ordering::Relaxed),
            laps_finished: self.laps_finished.load(Ordering::Relaxed),
            laps_dnf: self.laps_dnf.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `TrackerMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerMetricsSnapshot {
    pub events_recorded: u64,
    pub stray_start_triggers: u64,
    pub end_window_misses: u64,
    pub ignored_end_ids: u64,
    pub pending_pruned: u64,
    pub pending_times_deleted: u64,
    pub laps_finished: u64,
    pub laps_dnf: u64,
}
