// Gymkhana Race Tracker - correlation engine for a live time-trial
//
// This crate turns four independent sensor streams and the staff actions into
// laps. It handles:
// - The single-rider start box and the start gate
// - Nearest-neighbour matching of end gate triggers and end box identifications
// - Cascading DNF inference for riders overtaken by a later finisher
// - Penalties, disqualifications and manual DNFs
// - The append-only race log

mod metrics;
mod notify;
mod queue;
mod tracker;

pub use metrics::{TrackerMetrics, TrackerMetricsSnapshot};
pub use notify::{Notification, Notifier};
pub use queue::IndexedQueue;
pub use tracker::{OnTrack, RaceTracker, TrackerState};

use gymkhana_event::{AlreadyAssigned, LapError};
use gymkhana_schema::{DeviceMicros, EventId, GateId, RegistryError, Rider, RiderId, TimestampWall};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while tracking a race
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Rider not found: {0}")]
    RiderNotFound(RiderId),

    #[error("Rider is not on track: {0}")]
    NotOnTrack(RiderId),

    #[error("Rider is not waiting in the start box: {0}")]
    NotWaiting(RiderId),

    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    #[error("Start box occupied by {0}")]
    StartBoxOccupied(String),

    #[error("Rider already exists: {0}")]
    DuplicateRider(RiderId),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Race is not running")]
    NotRunning,

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

/// Coarse error classes reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    NotRunning,
    /// Programming error inside the tracker, never caused by input alone
    Invariant,
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            TrackerError::RiderNotFound(_)
            | TrackerError::NotOnTrack(_)
            | TrackerError::NotWaiting(_)
            | TrackerError::EventNotFound(_) => ErrorKind::NotFound,
            TrackerError::StartBoxOccupied(_)
            | TrackerError::DuplicateRider(_)
            | TrackerError::Conflict(_) => ErrorKind::Conflict,
            TrackerError::NotRunning => ErrorKind::NotRunning,
            TrackerError::Invariant(_) => ErrorKind::Invariant,
        }
    }
}

impl From<RegistryError> for TrackerError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateId(id) => TrackerError::DuplicateRider(id),
            RegistryError::NotFound(id) => TrackerError::RiderNotFound(id),
            RegistryError::InvalidArgument(msg) => TrackerError::InvalidArgument(msg),
        }
    }
}

impl From<AlreadyAssigned> for TrackerError {
    fn from(err: AlreadyAssigned) -> Self {
        TrackerError::Invariant(err.to_string())
    }
}

impl From<LapError> for TrackerError {
    fn from(err: LapError) -> Self {
        TrackerError::Invariant(err.to_string())
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Input accepted by `RaceTracker::submit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    /// Rider confirmed in the start box
    RiderReady {
        rider: RiderId,
        time: TimestampWall,
        staff: String,
    },
    /// Timing gate trigger
    GateTrigger {
        gate_id: GateId,
        micros: DeviceMicros,
        received: TimestampWall,
    },
    /// Rider identified leaving through the end box
    EndIdentification { rider: RiderId, time: TimestampWall },
    /// Staff action
    Manual(ManualEvent),
}

/// Staff actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ManualEvent {
    Penalty {
        rider: RiderId,
        seconds: i64,
        reason: String,
        staff: String,
        time: TimestampWall,
    },
    Dsq {
        rider: RiderId,
        reason: String,
        staff: String,
        time: TimestampWall,
    },
    ManualDnf {
        rider: RiderId,
        staff: String,
        time: TimestampWall,
    },
    /// Remove the rider waiting in the start box
    ClearReady {
        rider: RiderId,
        staff: String,
        time: TimestampWall,
    },
    /// Delete an accidental end gate trigger that is still pending
    DeleteTime {
        target: EventId,
        staff: String,
        time: TimestampWall,
    },
    /// Match a pending end gate trigger to a rider on track by hand
    ConfirmFinish {
        target: EventId,
        rider: RiderId,
        staff: String,
        time: TimestampWall,
    },
    AddRider { rider: Rider },
    RemoveRider { rider: RiderId },
    Reposition { rider: RiderId, position: i64 },
}
