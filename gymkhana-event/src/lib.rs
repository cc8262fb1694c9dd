//! Gymkhana Event Model
//!
//! This module defines the race events produced by the sensors, the staff and the
//! tracker itself, and the `Lap` outcome derived from them.
//! Events are immutable once created, except for the two write-once fields that
//! are filled in when the tracker matches an end gate trigger to an end box
//! identification. Events are shared behind `Arc` between the race log, the
//! tracker queues and the laps, so a late assignment is visible everywhere.

mod lap;
mod once;

pub use lap::{Lap, LapEnd, LapError};
pub use once::{AlreadyAssigned, WriteOnce};

use gymkhana_schema::*;
use std::sync::Arc;
use uuid::Uuid;

/// Rider confirmed present in the start box
#[derive(Debug, Clone)]
pub struct RiderReadyEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    pub rider: Rider,
    /// Staff member or unit that confirmed the rider
    pub staff: String,
}

impl RiderReadyEvent {
    pub fn new(rider: Rider, time: TimestampWall, staff: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            rider,
            staff: staff.into(),
        }
    }
}

/// Timing gate trigger
///
/// Start gate triggers carry the rider from the start box; end gate triggers are
/// rider-less until matched to an end box identification.
#[derive(Debug, Clone)]
pub struct TimingEvent {
    pub event_id: EventId,
    /// Wall clock time the trigger was received
    pub time: TimestampWall,
    pub gate_id: GateId,
    /// Device clock reading at the trigger
    pub micros: DeviceMicros,
    pub rider: WriteOnce<Rider>,
}

impl TimingEvent {
    /// Trigger with a known rider (start gate)
    pub fn with_rider(gate_id: GateId, micros: DeviceMicros, time: TimestampWall, rider: Rider) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            gate_id,
            micros,
            rider: WriteOnce::with_value("rider", rider),
        }
    }

    /// Trigger awaiting a rider (end gate)
    pub fn unmatched(gate_id: GateId, micros: DeviceMicros, time: TimestampWall) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            gate_id,
            micros,
            rider: WriteOnce::new("rider"),
        }
    }
}

/// Rider identified leaving through the end box
#[derive(Debug, Clone)]
pub struct RiderFinishedEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    pub rider: Rider,
    /// Set when staff confirmed the finish by hand
    pub staff: Option<String>,
    /// Event id of the end gate trigger this identification was matched to
    pub time_end: WriteOnce<EventId>,
}

impl RiderFinishedEvent {
    pub fn new(rider: Rider, time: TimestampWall) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            rider,
            staff: None,
            time_end: WriteOnce::new("time_end"),
        }
    }

    /// Finish confirmed by a staff member
    pub fn confirmed(rider: Rider, time: TimestampWall, staff: impl Into<String>) -> Self {
        Self {
            staff: Some(staff.into()),
            ..Self::new(rider, time)
        }
    }
}

/// A complete lap: start box, start gate, end box and end gate
#[derive(Debug, Clone)]
pub struct FinishedEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    pub entered: Arc<RiderReadyEvent>,
    pub time_start: Arc<TimingEvent>,
    pub left: Arc<RiderFinishedEvent>,
    pub time_end: Arc<TimingEvent>,
}

impl FinishedEvent {
    pub fn new(
        entered: Arc<RiderReadyEvent>,
        time_start: Arc<TimingEvent>,
        left: Arc<RiderFinishedEvent>,
        time_end: Arc<TimingEvent>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time: time_end.time.max(left.time),
            entered,
            time_start,
            left,
            time_end,
        }
    }

    pub fn rider(&self) -> &Rider {
        &self.entered.rider
    }

    /// Gate to gate time in device microseconds, saturating at the `i64` range
    pub fn lap_time(&self) -> DeviceMicros {
        self.time_end.micros.saturating_sub(self.time_start.micros)
    }
}

/// Rider inferred not to finish because a later starter finished first
#[derive(Debug, Clone)]
pub struct UnitDnfEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    /// Finish of the later starter that proves this rider missing
    pub other: Arc<FinishedEvent>,
    pub this_rider: Arc<RiderReadyEvent>,
}

impl UnitDnfEvent {
    pub fn new(other: Arc<FinishedEvent>, this_rider: Arc<RiderReadyEvent>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time: other.time,
            other,
            this_rider,
        }
    }
}

/// Rider marked as not finishing by staff
#[derive(Debug, Clone)]
pub struct ManualDnfEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    pub this_rider: Arc<RiderReadyEvent>,
    pub staff: String,
}

impl ManualDnfEvent {
    pub fn new(this_rider: Arc<RiderReadyEvent>, time: TimestampWall, staff: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            this_rider,
            staff: staff.into(),
        }
    }
}

/// Disqualification issued by staff
#[derive(Debug, Clone)]
pub struct DsqEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    pub rider: Rider,
    pub staff: String,
    pub reason: String,
}

impl DsqEvent {
    pub fn new(
        rider: Rider,
        time: TimestampWall,
        staff: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            rider,
            staff: staff.into(),
            reason: reason.into(),
        }
    }
}

/// Time penalty issued by staff
#[derive(Debug, Clone)]
pub struct PenaltyEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    pub rider: Rider,
    pub staff: String,
    pub reason: String,
    pub seconds: u32,
}

impl PenaltyEvent {
    pub fn new(
        rider: Rider,
        time: TimestampWall,
        staff: impl Into<String>,
        reason: impl Into<String>,
        seconds: u32,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            rider,
            staff: staff.into(),
            reason: reason.into(),
            seconds,
        }
    }

    /// Penalty expressed in lap time units
    pub fn micros(&self) -> DeviceMicros {
        i64::from(self.seconds) * MICROS_PER_SECOND
    }
}

/// Staff removed a rider from the start box
#[derive(Debug, Clone)]
pub struct ClearReadyEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    pub rider: Rider,
    pub staff: String,
}

impl ClearReadyEvent {
    pub fn new(rider: Rider, time: TimestampWall, staff: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            rider,
            staff: staff.into(),
        }
    }
}

/// Staff deleted an accidental end gate trigger
#[derive(Debug, Clone)]
pub struct DeleteTimeEvent {
    pub event_id: EventId,
    pub time: TimestampWall,
    pub target_event_id: EventId,
    pub staff: String,
}

impl DeleteTimeEvent {
    pub fn new(target_event_id: EventId, time: TimestampWall, staff: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            time,
            target_event_id,
            staff: staff.into(),
        }
    }
}

/// Any event recorded in the race log
#[derive(Debug, Clone)]
pub enum RaceEvent {
    RiderReady(Arc<RiderReadyEvent>),
    Timing(Arc<TimingEvent>),
    RiderFinished(Arc<RiderFinishedEvent>),
    Finished(Arc<FinishedEvent>),
    UnitDnf(Arc<UnitDnfEvent>),
    ManualDnf(Arc<ManualDnfEvent>),
    Dsq(Arc<DsqEvent>),
    Penalty(Arc<PenaltyEvent>),
    ClearReady(Arc<ClearReadyEvent>),
    DeleteTime(Arc<DeleteTimeEvent>),
}

impl RaceEvent {
    pub fn event_id(&self) -> EventId {
        match self {
            RaceEvent::RiderReady(e) => e.event_id,
            RaceEvent::Timing(e) => e.event_id,
            RaceEvent::RiderFinished(e) => e.event_id,
            RaceEvent::Finished(e) => e.event_id,
            RaceEvent::UnitDnf(e) => e.event_id,
            RaceEvent::ManualDnf(e) => e.event_id,
            RaceEvent::Dsq(e) => e.event_id,
            RaceEvent::Penalty(e) => e.event_id,
            RaceEvent::ClearReady(e) => e.event_id,
            RaceEvent::DeleteTime(e) => e.event_id,
        }
    }

    pub fn time(&self) -> TimestampWall {
        match self {
            RaceEvent::RiderReady(e) => e.time,
            RaceEvent::Timing(e) => e.time,
            RaceEvent::RiderFinished(e) => e.time,
            RaceEvent::Finished(e) => e.time,
            RaceEvent::UnitDnf(e) => e.time,
            RaceEvent::ManualDnf(e) => e.time,
            RaceEvent::Dsq(e) => e.time,
            RaceEvent::Penalty(e) => e.time,
            RaceEvent::ClearReady(e) => e.time,
            RaceEvent::DeleteTime(e) => e.time,
        }
    }

    /// Rider the event refers to, if any
    pub fn rider(&self) -> Option<&Rider> {
        match self {
            RaceEvent::RiderReady(e) => Some(&e.rider),
            RaceEvent::Timing(e) => e.rider.get(),
            RaceEvent::RiderFinished(e) => Some(&e.rider),
            RaceEvent::Finished(e) => Some(e.rider()),
            RaceEvent::UnitDnf(e) => Some(&e.this_rider.rider),
            RaceEvent::ManualDnf(e) => Some(&e.this_rider.rider),
            RaceEvent::Dsq(e) => Some(&e.rider),
            RaceEvent::Penalty(e) => Some(&e.rider),
            RaceEvent::ClearReady(e) => Some(&e.rider),
            RaceEvent::DeleteTime(_) => None,
        }
    }

    pub fn kind(&self) -> RaceEventKind {
        match self {
            RaceEvent::RiderReady(_) => RaceEventKind::RiderReady,
            RaceEvent::Timing(_) => RaceEventKind::Timing,
            RaceEvent::RiderFinished(_) => RaceEventKind::RiderFinished,
            RaceEvent::Finished(_) => RaceEventKind::Finished,
            RaceEvent::UnitDnf(_) => RaceEventKind::UnitDnf,
            RaceEvent::ManualDnf(_) => RaceEventKind::ManualDnf,
            RaceEvent::Dsq(_) => RaceEventKind::Dsq,
            RaceEvent::Penalty(_) => RaceEventKind::Penalty,
            RaceEvent::ClearReady(_) => RaceEventKind::ClearReady,
            RaceEvent::DeleteTime(_) => RaceEventKind::DeleteTime,
        }
    }
}

/// Discriminant of a `RaceEvent`, also used as the persisted type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaceEventKind {
    RiderReady,
    Timing,
    RiderFinished,
    Finished,
    UnitDnf,
    ManualDnf,
    Dsq,
    Penalty,
    ClearReady,
    DeleteTime,
}

impl RaceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaceEventKind::RiderReady => "RiderReadyEvent",
            RaceEventKind::Timing => "TimingEvent",
            RaceEventKind::RiderFinished => "RiderFinishedEvent",
            RaceEventKind::Finished => "FinishedEvent",
            RaceEventKind::UnitDnf => "UnitDNFEvent",
            RaceEventKind::ManualDnf => "ManualDNFEvent",
            RaceEventKind::Dsq => "DSQEvent",
            RaceEventKind::Penalty => "PenaltyEvent",
            RaceEventKind::ClearReady => "ClearReadyEvent",
            RaceEventKind::DeleteTime => "DeleteTimeEvent",
        }
    }

    /// Derived events are produced by the tracker, not submitted to it
    pub fn is_derived(&self) -> bool {
        matches!(self, RaceEventKind::Finished | RaceEventKind::UnitDnf)
    }
}

impl std::fmt::Display for RaceEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}


// Re-export gymkhana_schema for convenience
pub use gymkhana_schema;
