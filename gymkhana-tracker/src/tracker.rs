// Race tracker - stateful matching of all race event streams
//
// Each subsystem has its own lock so unrelated producers do not serialize:
// - running: held shared by every mutating call, exclusively by stop
// - riders: the starting grid
// - start: the single-rider start box
// - on_track: riders between start gate and end box, oldest start first
// - end: end box identifications and end gate triggers waiting for a match
// - results: laps and buffered penalties/disqualifications
// - log: every accepted event in order
// Operations that touch several subsystems always lock them in the order above.

use crate::metrics::{TrackerMetrics, TrackerMetricsSnapshot};
use crate::notify::{Notification, Notifier};
use crate::queue::IndexedQueue;
use crate::{ManualEvent, Submission, TrackerError, TrackerResult};
use ahash::{AHashMap, AHashSet};
use gymkhana_core::RaceSummary;
use gymkhana_event::*;
use gymkhana_schema::*;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Rider on course: start box confirmation and start gate trigger
#[derive(Debug, Clone)]
pub struct OnTrack {
    pub ready: Arc<RiderReadyEvent>,
    pub start: Arc<TimingEvent>,
}

/// Consistent snapshot of the live race
#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    /// Rider in the start box
    pub waiting: Option<Arc<RiderReadyEvent>>,
    /// Riders on course, oldest start first
    pub on_track: Vec<OnTrack>,
    /// End box identifications without a gate trigger yet
    pub pending_end_ids: Vec<Arc<RiderFinishedEvent>>,
    /// End gate triggers without an identification yet
    pub pending_end_times: Vec<Arc<TimingEvent>>,
}

#[derive(Debug, Default)]
struct EndPending {
    ids: Vec<Arc<RiderFinishedEvent>>,
    times: Vec<Arc<TimingEvent>>,
}

#[derive(Debug, Default)]
struct Results {
    laps: Vec<Lap>,
    /// Penalties waiting for the rider's next lap
    penalties: Vec<Arc<PenaltyEvent>>,
    /// Disqualifications waiting for the rider's next lap
    disqualifications: Vec<Arc<DsqEvent>>,
}

impl Results {
    /// Move buffered penalties and disqualification for the lap's rider onto the lap
    fn apply_pending(&mut self, lap: &mut Lap) -> TrackerResult<()> {
        let rider_id = lap.rider().id;

        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.penalties)
            .into_iter()
            .partition(|p| p.rider.id == rider_id);
        self.penalties = rest;
        if !mine.is_empty() {
            debug!(rider = %lap.rider(), count = mine.len(), "Applying buffered penalties");
            lap.add_penalties(mine);
        }

        if let Some(pos) = self
            .disqualifications
            .iter()
            .position(|d| d.rider.id == rider_id)
        {
            let dsq = self.disqualifications.remove(pos);
            debug!(rider = %lap.rider(), "Applying buffered disqualification");
            lap.set_dsq(dsq)?;
        }
        Ok(())
    }

    fn last_lap_mut(&mut self, rider_id: &RiderId) -> Option<&mut Lap> {
        self.laps.iter_mut().rev().find(|l| l.rider().id == *rider_id)
    }
}

/// Index of the accepted entry nearest to `time`, if it lies within `window`
/// nanoseconds
fn nearest<T>(
    entries: &[Arc<T>],
    time: TimestampWall,
    window: u64,
    time_of: impl Fn(&T) -> TimestampWall,
    accept: impl Fn(&T) -> bool,
) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|&(_, e)| accept(&**e))
        .map(|(i, e)| (i, time_of(e).abs_diff(time)))
        .min_by_key(|(_, delta)| *delta)
        .filter(|(_, delta)| *delta <= window)
        .map(|(i, _)| i)
}

/// Summaries refer to riders by name, so a name identifies one rider
fn name_in_use(name: &str) -> TrackerError {
    TrackerError::Conflict(format!("rider name {} is already in use", name))
}

/// Correlation engine for one race
pub struct RaceTracker {
    config: TrackerConfig,
    riders: RwLock<RiderRegistry>,
    start: Mutex<Option<Arc<RiderReadyEvent>>>,
    on_track: Mutex<IndexedQueue<RiderId, OnTrack>>,
    end: Mutex<EndPending>,
    results: Mutex<Results>,
    log: Mutex<Vec<RaceEvent>>,
    notifier: Notifier,
    metrics: TrackerMetrics,
    running: RwLock<bool>,
}

impl RaceTracker {
    /// Create a running tracker with an initial starting grid
    pub fn new<I>(config: TrackerConfig, riders: I) -> TrackerResult<Self>
    where
        I: IntoIterator<Item = Rider>,
    {
        config
            .validate()
            .map_err(|e| TrackerError::InvalidArgument(e.to_string()))?;

        let mut registry = RiderRegistry::new();
        for rider in riders {
            match registry.find_by_name(&rider.name) {
                Some(other) if other.id != rider.id => return Err(name_in_use(&rider.name)),
                _ => registry.add(rider)?,
            }
        }

        info!(
            start_gate = config.start_gate_id,
            end_gate = config.end_gate_id,
            timeout_secs = config.end_match_timeout_secs,
            riders = registry.len(),
            "Race tracker started"
        );

        Ok(Self {
            config,
            riders: RwLock::new(registry),
            start: Mutex::new(None),
            on_track: Mutex::new(IndexedQueue::new()),
            end: Mutex::new(EndPending::default()),
            results: Mutex::new(Results::default()),
            log: Mutex::new(Vec::new()),
            notifier: Notifier::new(),
            metrics: TrackerMetrics::new(),
            running: RwLock::new(true),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    pub fn metrics(&self) -> TrackerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Register a notification callback
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback);
    }

    /// Register a notification channel
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Notification> {
        self.notifier.channel()
    }

    /// Stop accepting events and produce the race summary
    ///
    /// Waits for submissions in flight; anything submitted afterwards is
    /// rejected with `NotRunning`, so the summary holds every accepted event.
    pub fn stop(&self) -> TrackerResult<RaceSummary> {
        let mut running = self.running.write();
        if !*running {
            return Err(TrackerError::NotRunning);
        }
        *running = false;
        let summary = self.summary();
        info!(events = summary.events.len(), "Race tracker stopped");
        Ok(summary)
    }

    /// Guard that keeps `stop` out until the calling submission is done
    fn ensure_running(&self) -> TrackerResult<RwLockReadGuard<'_, bool>> {
        let running = self.running.read();
        if *running {
            Ok(running)
        } else {
            Err(TrackerError::NotRunning)
        }
    }

    fn record(&self, log: &mut Vec<RaceEvent>, event: RaceEvent) {
        trace!(kind = %event.kind(), event_id = %event.event_id(), "Recording event");
        log.push(event);
        self.metrics.event_recorded();
    }

    // ------------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------------

    /// Single ingestion point for adapters
    pub fn submit(&self, submission: Submission) -> TrackerResult<()> {
        match submission {
            Submission::RiderReady { rider, time, staff } => {
                self.submit_rider_ready(rider, time, staff).map(|_| ())
            }
            Submission::GateTrigger {
                gate_id,
                micros,
                received,
            } => self.submit_gate_trigger(gate_id, micros, received).map(|_| ()),
            Submission::EndIdentification { rider, time } => {
                self.submit_end_identification(rider, time)
            }
            Submission::Manual(event) => self.submit_manual(event),
        }
    }

    /// Apply a staff action
    pub fn submit_manual(&self, event: ManualEvent) -> TrackerResult<()> {
        match event {
            ManualEvent::Penalty {
                rider,
                seconds,
                reason,
                staff,
                time,
            } => self.penalty(rider, seconds, reason, staff, time),
            ManualEvent::Dsq {
                rider,
                reason,
                staff,
                time,
            } => self.disqualify(rider, reason, staff, time),
            ManualEvent::ManualDnf { rider, staff, time } => self.manual_dnf(rider, staff, time),
            ManualEvent::ClearReady { rider, staff, time } => self.clear_ready(rider, staff, time),
            ManualEvent::DeleteTime {
                target,
                staff,
                time,
            } => self.delete_pending_time(target, staff, time).map(|_| ()),
            ManualEvent::ConfirmFinish {
                target,
                rider,
                staff,
                time,
            } => self.confirm_finish(target, rider, staff, time),
            ManualEvent::AddRider { rider } => self.add_rider(rider),
            ManualEvent::RemoveRider { rider } => self.remove_rider(&rider).map(|_| ()),
            ManualEvent::Reposition { rider, position } => self.reposition_rider(&rider, position),
        }
    }

    /// Rider confirmed in the start box; returns the id of the recorded event
    pub fn submit_rider_ready(
        &self,
        rider_id: RiderId,
        time: TimestampWall,
        staff: impl Into<String>,
    ) -> TrackerResult<EventId> {
        let _running = self.ensure_running()?;

        let riders = self.riders.read();
        let rider = riders
            .get(&rider_id)
            .cloned()
            .ok_or(TrackerError::RiderNotFound(rider_id))?;

        let mut start = self.start.lock();
        if let Some(occupant) = start.as_ref() {
            return Err(TrackerError::StartBoxOccupied(occupant.rider.name.clone()));
        }
        let on_track = self.on_track.lock();
        if on_track.contains(&rider_id) {
            return Err(TrackerError::Conflict(format!(
                "rider {} is already on track",
                rider.name
            )));
        }

        let ready = Arc::new(RiderReadyEvent::new(rider, time, staff));
        *start = Some(ready.clone());

        let mut log = self.log.lock();
        self.record(&mut log, RaceEvent::RiderReady(ready.clone()));
        info!(rider = %ready.rider, "Rider waiting at start");
        self.notifier
            .notify(&Notification::RiderWaiting(ready.rider.clone()));

        Ok(ready.event_id)
    }

    /// Timing gate trigger; returns the id of the recorded timing event, or
    /// `None` when a start trigger was discarded because the start box was empty
    pub fn submit_gate_trigger(
        &self,
        gate_id: GateId,
        micros: DeviceMicros,
        received: TimestampWall,
    ) -> TrackerResult<Option<EventId>> {
        let _running = self.ensure_running()?;

        if micros < 0 {
            return Err(TrackerError::InvalidArgument(format!(
                "negative reading {} from timing gate {}",
                micros, gate_id
            )));
        }

        if gate_id == self.config.start_gate_id {
            self.start_trigger(micros, received)
        } else if gate_id == self.config.end_gate_id {
            self.end_trigger(micros, received).map(Some)
        } else {
            Err(TrackerError::InvalidArgument(format!(
                "unknown timing gate {}",
                gate_id
            )))
        }
    }

    fn start_trigger(
        &self,
        micros: DeviceMicros,
        received: TimestampWall,
    ) -> TrackerResult<Option<EventId>> {
        let mut start = self.start.lock();
        let Some(ready) = start.take() else {
            debug!(micros, "Discarding start gate trigger, start box is empty");
            self.metrics.stray_start_trigger();
            return Ok(None);
        };

        let timing = Arc::new(TimingEvent::with_rider(
            self.config.start_gate_id,
            micros,
            received,
            ready.rider.clone(),
        ));
        let entry = OnTrack {
            ready: ready.clone(),
            start: timing.clone(),
        };

        let mut on_track = self.on_track.lock();
        if !on_track.push_back(ready.rider.id, entry) {
            let name = ready.rider.name.clone();
            *start = Some(ready);
            return Err(TrackerError::Invariant(format!(
                "rider {} started twice",
                name
            )));
        }

        let mut log = self.log.lock();
        self.record(&mut log, RaceEvent::Timing(timing.clone()));
        info!(rider = %ready.rider, micros, "Rider started");
        self.notifier.notify(&Notification::StartEmpty);

        Ok(Some(timing.event_id))
    }

    fn end_trigger(&self, micros: DeviceMicros, received: TimestampWall) -> TrackerResult<EventId> {
        let timing = Arc::new(TimingEvent::unmatched(
            self.config.end_gate_id,
            micros,
            received,
        ));

        let mut on_track = self.on_track.lock();
        let mut end = self.end.lock();
        let mut results = self.results.lock();
        let mut log = self.log.lock();
        self.record(&mut log, RaceEvent::Timing(timing.clone()));

        let window = self.config.end_match_timeout_ns();
        let started_before = |e: &RiderFinishedEvent| {
            on_track
                .get(&e.rider.id)
                .map_or(true, |entry| entry.start.micros <= micros)
        };
        match nearest(&end.ids, received, window, |e| e.time, started_before) {
            Some(index) => {
                let left = end.ids.remove(index);
                timing.rider.set(left.rider.clone())?;
                left.time_end.set(timing.event_id)?;
                debug!(rider = %left.rider, micros, "End gate trigger matched identification");
                self.complete_lap(
                    &mut on_track,
                    &mut end,
                    &mut results,
                    &mut log,
                    left,
                    timing.clone(),
                )?;
            }
            None => {
                if !end.ids.is_empty() {
                    debug!(micros, "No end box identification within match window");
                    self.metrics.end_window_miss();
                }
                end.times.push(timing.clone());
            }
        }

        Ok(timing.event_id)
    }

    /// Rider identified leaving through the end box
    ///
    /// Identifications of riders that are not on track are logged and ignored.
    pub fn submit_end_identification(
        &self,
        rider_id: RiderId,
        time: TimestampWall,
    ) -> TrackerResult<()> {
        let _running = self.ensure_running()?;

        let mut on_track = self.on_track.lock();
        let Some((rider, start_micros)) = on_track
            .get(&rider_id)
            .map(|e| (e.ready.rider.clone(), e.start.micros))
        else {
            debug!(rider_id = %rider_id, "Ignoring end box identification, rider is not on track");
            self.metrics.ignored_end_id();
            return Ok(());
        };

        let left = Arc::new(RiderFinishedEvent::new(rider, time));

        let mut end = self.end.lock();
        let mut results = self.results.lock();
        let mut log = self.log.lock();
        self.record(&mut log, RaceEvent::RiderFinished(left.clone()));

        let window = self.config.end_match_timeout_ns();
        match nearest(
            &end.times,
            time,
            window,
            |t| t.time,
            |t| t.micros >= start_micros,
        ) {
            Some(index) => {
                let timing = end.times.remove(index);
                timing.rider.set(left.rider.clone())?;
                left.time_end.set(timing.event_id)?;
                debug!(rider = %left.rider, "End box identification matched gate trigger");
                self.complete_lap(&mut on_track, &mut end, &mut results, &mut log, left, timing)?;
            }
            None => {
                if !end.times.is_empty() {
                    debug!(rider = %left.rider, "No end gate trigger within match window");
                    self.metrics.end_window_miss();
                }
                end.ids.push(left);
            }
        }

        Ok(())
    }

    /// Record the lap for a matched end pair, inferring DNFs for riders that
    /// started before the finisher and are still on track
    fn complete_lap(
        &self,
        on_track: &mut IndexedQueue<RiderId, OnTrack>,
        end: &mut EndPending,
        results: &mut Results,
        log: &mut Vec<RaceEvent>,
        left: Arc<RiderFinishedEvent>,
        time_end: Arc<TimingEvent>,
    ) -> TrackerResult<()> {
        let rider_id = left.rider.id;
        if !on_track.contains(&rider_id) {
            warn!(rider = %left.rider, "Matched rider is no longer on track, no lap recorded");
            self.prune(end, time_end.time, left.time);
            return Ok(());
        }

        let mut skipped = Vec::new();
        let entry = loop {
            match on_track.pop_front() {
                Some((id, entry)) if id == rider_id => break entry,
                Some((_, entry)) => skipped.push(entry),
                None => {
                    return Err(TrackerError::Invariant(format!(
                        "on-track queue drained before rider {}",
                        left.rider
                    )))
                }
            }
        };

        let finished = Arc::new(FinishedEvent::new(entry.ready, entry.start, left, time_end));
        let mut lap = Lap::new(LapEnd::Finished(finished.clone()));
        results.apply_pending(&mut lap)?;
        self.record(log, RaceEvent::Finished(finished.clone()));
        info!(
            rider = %finished.rider(),
            lap_time_us = finished.lap_time(),
            "Rider finished"
        );
        results.laps.push(lap.clone());
        self.metrics.lap_finished();
        self.notifier.notify(&Notification::RiderMatched(lap));

        for entry in skipped {
            let dnf = Arc::new(UnitDnfEvent::new(finished.clone(), entry.ready));
            let mut lap = Lap::new(LapEnd::UnitDnf(dnf.clone()));
            results.apply_pending(&mut lap)?;
            self.record(log, RaceEvent::UnitDnf(dnf.clone()));
            info!(
                rider = %dnf.this_rider.rider,
                witness = %finished.rider(),
                "Rider did not finish"
            );
            results.laps.push(lap.clone());
            self.metrics.lap_dnf();
            self.notifier.notify(&Notification::RiderDnf(lap));
        }

        self.prune(end, finished.time_end.time, finished.left.time);
        Ok(())
    }

    /// Drop pending end events too old to match anything after a resolved pair
    fn prune(&self, end: &mut EndPending, end_time: TimestampWall, left_time: TimestampWall) {
        let window = self.config.end_match_timeout_ns();
        let before = end.ids.len() + end.times.len();

        end.ids.retain(|e| e.time.saturating_add(window) > end_time);
        end.times.retain(|t| t.time.saturating_add(window) > left_time);

        let pruned = before - (end.ids.len() + end.times.len());
        if pruned > 0 {
            debug!(pruned, "Pruned stale end events");
            self.metrics.pruned(pruned);
        }
    }

    // ------------------------------------------------------------------------
    // Staff actions
    // ------------------------------------------------------------------------

    /// Known rider by id: the grid first, then riders on course or with laps
    fn resolve_rider(
        riders: &RiderRegistry,
        on_track: &IndexedQueue<RiderId, OnTrack>,
        results: &Results,
        rider_id: &RiderId,
    ) -> Option<Rider> {
        riders
            .get(rider_id)
            .cloned()
            .or_else(|| on_track.get(rider_id).map(|e| e.ready.rider.clone()))
            .or_else(|| {
                results
                    .laps
                    .iter()
                    .rev()
                    .find(|l| l.rider().id == *rider_id)
                    .map(|l| l.rider().clone())
            })
    }

    /// Time penalty; buffered while the rider is on course or has no lap yet,
    /// otherwise attached to the rider's most recent lap
    pub fn penalty(
        &self,
        rider_id: RiderId,
        seconds: i64,
        reason: impl Into<String>,
        staff: impl Into<String>,
        time: TimestampWall,
    ) -> TrackerResult<()> {
        let _running = self.ensure_running()?;
        let seconds = u32::try_from(seconds).map_err(|_| {
            TrackerError::InvalidArgument(format!("penalty of {} seconds", seconds))
        })?;

        let riders = self.riders.read();
        let on_track = self.on_track.lock();
        let mut results = self.results.lock();
        let rider = Self::resolve_rider(&riders, &on_track, &results, &rider_id)
            .ok_or(TrackerError::RiderNotFound(rider_id))?;

        let penalty = Arc::new(PenaltyEvent::new(rider, time, staff, reason, seconds));
        if on_track.contains(&rider_id) {
            debug!(rider = %penalty.rider, seconds, "Buffering penalty until lap ends");
            results.penalties.push(penalty.clone());
        } else if let Some(lap) = results.last_lap_mut(&rider_id) {
            lap.add_penalty(penalty.clone());
        } else {
            debug!(rider = %penalty.rider, seconds, "Buffering penalty until a lap exists");
            results.penalties.push(penalty.clone());
        }

        let mut log = self.log.lock();
        self.record(&mut log, RaceEvent::Penalty(penalty.clone()));
        info!(rider = %penalty.rider, seconds, reason = %penalty.reason, "Penalty issued");
        Ok(())
    }

    /// Disqualification; buffered while the rider is on course or has no lap
    /// that is not disqualified yet, otherwise attached to the most recent such lap
    pub fn disqualify(
        &self,
        rider_id: RiderId,
        reason: impl Into<String>,
        staff: impl Into<String>,
        time: TimestampWall,
    ) -> TrackerResult<()> {
        let _running = self.ensure_running()?;

        let riders = self.riders.read();
        let on_track = self.on_track.lock();
        let mut results = self.results.lock();
        let rider = Self::resolve_rider(&riders, &on_track, &results, &rider_id)
            .ok_or(TrackerError::RiderNotFound(rider_id))?;

        let target = if on_track.contains(&rider_id) {
            None
        } else {
            results
                .laps
                .iter()
                .rposition(|l| l.rider().id == rider_id && !l.is_disqualified())
        };
        if target.is_none()
            && results
                .disqualifications
                .iter()
                .any(|d| d.rider.id == rider_id)
        {
            return Err(TrackerError::Conflict(format!(
                "rider {} already has a pending disqualification",
                rider.name
            )));
        }

        let dsq = Arc::new(DsqEvent::new(rider, time, staff, reason));
        match target {
            Some(index) => results.laps[index].set_dsq(dsq.clone())?,
            None => {
                debug!(rider = %dsq.rider, "Buffering disqualification until next lap");
                results.disqualifications.push(dsq.clone());
            }
        }

        let mut log = self.log.lock();
        self.record(&mut log, RaceEvent::Dsq(dsq.clone()));
        info!(rider = %dsq.rider, reason = %dsq.reason, "Rider disqualified");
        Ok(())
    }

    /// Staff confirmed a rider on course will not finish
    pub fn manual_dnf(
        &self,
        rider_id: RiderId,
        staff: impl Into<String>,
        time: TimestampWall,
    ) -> TrackerResult<()> {
        let _running = self.ensure_running()?;

        let mut on_track = self.on_track.lock();
        let entry = on_track
            .remove(&rider_id)
            .ok_or(TrackerError::NotOnTrack(rider_id))?;

        let mut results = self.results.lock();
        let mut log = self.log.lock();

        let dnf = Arc::new(ManualDnfEvent::new(entry.ready, time, staff));
        let mut lap = Lap::new(LapEnd::ManualDnf(dnf.clone()));
        results.apply_pending(&mut lap)?;
        self.record(&mut log, RaceEvent::ManualDnf(dnf.clone()));
        info!(rider = %dnf.this_rider.rider, staff = %dnf.staff, "Rider marked DNF");
        results.laps.push(lap.clone());
        self.metrics.lap_dnf();
        self.notifier.notify(&Notification::RiderDnf(lap));
        Ok(())
    }

    /// Remove the waiting rider from the start box
    pub fn clear_ready(
        &self,
        rider_id: RiderId,
        staff: impl Into<String>,
        time: TimestampWall,
    ) -> TrackerResult<()> {
        let _running = self.ensure_running()?;

        let mut start = self.start.lock();
        let ready = match start.take() {
            Some(ready) if ready.rider.id == rider_id => ready,
            other => {
                *start = other;
                return Err(TrackerError::NotWaiting(rider_id));
            }
        };

        let cleared = Arc::new(ClearReadyEvent::new(ready.rider.clone(), time, staff));
        let mut log = self.log.lock();
        self.record(&mut log, RaceEvent::ClearReady(cleared));
        info!(rider = %ready.rider, "Start box cleared");
        self.notifier.notify(&Notification::StartEmpty);
        Ok(())
    }

    /// Delete a pending end gate trigger; returns whether anything was removed
    ///
    /// Deleting a trigger that was already matched or deleted is a no-op.
    pub fn delete_pending_time(
        &self,
        target: EventId,
        staff: impl Into<String>,
        time: TimestampWall,
    ) -> TrackerResult<bool> {
        let _running = self.ensure_running()?;

        let mut end = self.end.lock();
        let Some(index) = end.times.iter().position(|t| t.event_id == target) else {
            debug!(event_id = %target, "Pending end time not found, nothing to delete");
            return Ok(false);
        };
        end.times.remove(index);

        let mut log = self.log.lock();
        self.record(
            &mut log,
            RaceEvent::DeleteTime(Arc::new(DeleteTimeEvent::new(target, time, staff))),
        );
        info!(event_id = %target, "Pending end time deleted");
        self.metrics.pending_time_deleted();
        Ok(true)
    }

    /// Staff matched a pending end gate trigger to a rider on course
    pub fn confirm_finish(
        &self,
        target: EventId,
        rider_id: RiderId,
        staff: impl Into<String>,
        time: TimestampWall,
    ) -> TrackerResult<()> {
        let _running = self.ensure_running()?;

        let mut on_track = self.on_track.lock();
        let (rider, start_micros) = on_track
            .get(&rider_id)
            .map(|e| (e.ready.rider.clone(), e.start.micros))
            .ok_or(TrackerError::NotOnTrack(rider_id))?;

        let mut end = self.end.lock();
        let index = end
            .times
            .iter()
            .position(|t| t.event_id == target)
            .ok_or(TrackerError::EventNotFound(target))?;
        if end.times[index].micros < start_micros {
            return Err(TrackerError::InvalidArgument(format!(
                "end reading {} precedes the start reading {} of rider {}",
                end.times[index].micros, start_micros, rider.name
            )));
        }

        let mut results = self.results.lock();
        let mut log = self.log.lock();

        let timing = end.times.remove(index);
        let left = Arc::new(RiderFinishedEvent::confirmed(rider, time, staff));
        self.record(&mut log, RaceEvent::RiderFinished(left.clone()));
        timing.rider.set(left.rider.clone())?;
        left.time_end.set(timing.event_id)?;
        info!(rider = %left.rider, event_id = %target, "Finish confirmed by staff");

        self.complete_lap(&mut on_track, &mut end, &mut results, &mut log, left, timing)
    }

    /// Append a rider to the starting grid
    ///
    /// The name must not belong to another rider, on the grid or anywhere in
    /// the log.
    pub fn add_rider(&self, rider: Rider) -> TrackerResult<()> {
        let _running = self.ensure_running()?;
        let mut riders = self.riders.write();
        let log = self.log.lock();

        let owner = riders.find_by_name(&rider.name).map(|r| r.id).or_else(|| {
            log.iter()
                .filter_map(RaceEvent::rider)
                .find(|r| r.name == rider.name)
                .map(|r| r.id)
        });
        if owner.is_some_and(|id| id != rider.id) {
            return Err(name_in_use(&rider.name));
        }

        let name = rider.name.clone();
        riders.add(rider)?;
        debug!(rider = %name, "Rider added");
        Ok(())
    }

    /// Remove a rider from the grid; history is left untouched
    pub fn remove_rider(&self, rider_id: &RiderId) -> TrackerResult<bool> {
        let _running = self.ensure_running()?;
        let removed = self.riders.write().remove(rider_id);
        debug!(rider_id = %rider_id, removed, "Rider removed");
        Ok(removed)
    }

    /// Move a rider to another grid position
    pub fn reposition_rider(&self, rider_id: &RiderId, position: i64) -> TrackerResult<()> {
        let _running = self.ensure_running()?;
        self.riders.write().reposition(rider_id, position)?;
        debug!(rider_id = %rider_id, position, "Rider repositioned");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Snapshot of start box, course and pending end events
    pub fn state(&self) -> TrackerState {
        let start = self.start.lock();
        let on_track = self.on_track.lock();
        let end = self.end.lock();

        TrackerState {
            waiting: start.clone(),
            on_track: on_track.iter().map(|(_, e)| e.clone()).collect(),
            pending_end_ids: end.ids.clone(),
            pending_end_times: end.times.clone(),
        }
    }

    /// Laps from `start` onwards, in completion order
    pub fn laps(&self, start: usize) -> Vec<Lap> {
        let results = self.results.lock();
        results
            .laps
            .get(start..)
            .map(<[Lap]>::to_vec)
            .unwrap_or_default()
    }

    /// Fastest lap per rider, penalties included, sorted fastest first
    pub fn best_laps(&self) -> Vec<Lap> {
        let results = self.results.lock();

        let mut index: AHashMap<RiderId, usize> = AHashMap::default();
        let mut best: Vec<Lap> = Vec::new();
        for lap in &results.laps {
            match index.get(&lap.rider().id) {
                Some(&i) => {
                    if lap.compare(&best[i], true) == CmpOrdering::Less {
                        best[i] = lap.clone();
                    }
                }
                None => {
                    index.insert(lap.rider().id, best.len());
                    best.push(lap.clone());
                }
            }
        }

        best.sort_by(|a, b| a.compare(b, true));
        best
    }

    /// Penalties not yet attached to a lap
    pub fn pending_penalties(&self) -> Vec<Arc<PenaltyEvent>> {
        self.results.lock().penalties.clone()
    }

    /// Disqualifications not yet attached to a lap
    pub fn pending_disqualifications(&self) -> Vec<Arc<DsqEvent>> {
        self.results.lock().disqualifications.clone()
    }

    /// Starting grid in order
    pub fn riders(&self) -> Vec<Rider> {
        self.riders.read().to_vec()
    }

    /// All recorded events
    pub fn events(&self) -> Vec<RaceEvent> {
        self.log.lock().clone()
    }

    /// Recorded events from `start` onwards
    pub fn events_from(&self, start: usize) -> Vec<RaceEvent> {
        let log = self.log.lock();
        log.get(start..).map(<[RaceEvent]>::to_vec).unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.log.lock().len()
    }

    /// Summary of the race so far
    ///
    /// The rider list is the grid followed by any rider referenced by an event
    /// who has since been removed from the grid.
    pub fn summary(&self) -> RaceSummary {
        let riders = self.riders.read();
        let log = self.log.lock();

        let mut list = riders.to_vec();
        let mut known: AHashSet<RiderId> = list.iter().map(|r| r.id).collect();
        for event in log.iter() {
            if let Some(rider) = event.rider() {
                if known.insert(rider.id) {
                    list.push(rider.clone());
                }
            }
        }

        RaceSummary::new(list, log.clone(), self.config.clone())
    }
}

impl std::fmt::Debug for RaceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceTracker")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}
