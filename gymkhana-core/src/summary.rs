//! Race Summary
//!
//! The race summary is the only persisted artifact of a race: the rider list,
//! the tracker configuration and every accepted event in recorded order.
//! It is stored as a JSON document. Events carry a `type` discriminant and refer
//! to riders by name; names are resolved against the rider list on read.
//! Nested events (the parts of a finish, the ready event of a DNF) are embedded
//! in full and re-linked to the same shared instance when the event id was seen
//! before, so a decoded finish points at the very timing events of the log.

use ahash::AHashMap;
use gymkhana_event::*;
use gymkhana_schema::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Current summary document version
pub const SUMMARY_VERSION: u32 = 1;

/// Summary error types
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid summary format: {0}")]
    InvalidFormat(String),

    #[error("Event refers to unknown rider: {0}")]
    UnknownRider(String),

    #[error("Rider name is not unique: {0}")]
    AmbiguousRider(String),
}

/// Record of one race
#[derive(Debug, Clone, Default)]
pub struct RaceSummary {
    pub riders: Vec<Rider>,
    pub events: Vec<RaceEvent>,
    pub config: TrackerConfig,
}

impl RaceSummary {
    pub fn new(riders: Vec<Rider>, events: Vec<RaceEvent>, config: TrackerConfig) -> Self {
        Self {
            riders,
            events,
            config,
        }
    }

    /// Find a rider by display name
    pub fn rider_by_name(&self, name: &str) -> Option<&Rider> {
        self.riders.iter().find(|r| r.name == name)
    }

    /// Write the summary as JSON
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), SummaryError> {
        let document = self.to_document()?;
        serde_json::to_writer_pretty(writer, &document)
            .map_err(|e| SummaryError::Serialization(e.to_string()))
    }

    /// Read a summary from JSON
    pub fn read_from<R: Read>(reader: R) -> Result<Self, SummaryError> {
        let document: SummaryDocument = serde_json::from_reader(reader)
            .map_err(|e| SummaryError::Serialization(e.to_string()))?;
        Self::from_document(document)
    }

    pub fn to_json(&self) -> Result<String, SummaryError> {
        let document = self.to_document()?;
        serde_json::to_string_pretty(&document)
            .map_err(|e| SummaryError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, SummaryError> {
        let document: SummaryDocument = serde_json::from_str(json)
            .map_err(|e| SummaryError::Serialization(e.to_string()))?;
        Self::from_document(document)
    }

    /// Write the summary to a file, replacing it if present
    ///
    /// The document is serialized before the file is opened, so a summary that
    /// cannot be encoded leaves an existing file untouched.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), SummaryError> {
        let path = path.as_ref();
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        fs::write(path, buffer)?;

        info!(path = %path.display(), events = self.events.len(), "Wrote race summary");
        Ok(())
    }

    /// Read a summary from a file
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, SummaryError> {
        let path = path.as_ref();
        let summary = Self::read_from(BufReader::new(File::open(path)?))?;

        info!(path = %path.display(), events = summary.events.len(), "Read race summary");
        Ok(summary)
    }

    fn to_document(&self) -> Result<SummaryDocument, SummaryError> {
        let mut seen = AHashMap::with_capacity(self.riders.len());
        for rider in &self.riders {
            if seen.insert(rider.name.as_str(), rider.id).is_some() {
                return Err(SummaryError::AmbiguousRider(rider.name.clone()));
            }
        }

        Ok(SummaryDocument {
            version: SUMMARY_VERSION,
            riders: self.riders.clone(),
            config: self.config.clone(),
            events: self.events.iter().map(SerializedEvent::from).collect(),
        })
    }

    fn from_document(document: SummaryDocument) -> Result<Self, SummaryError> {
        if document.version > SUMMARY_VERSION {
            return Err(SummaryError::InvalidFormat(format!(
                "unsupported version {}",
                document.version
            )));
        }

        let events = {
            let mut decoder = Decoder::new(&document.riders)?;
            document
                .events
                .into_iter()
                .map(|event| decoder.event(event))
                .collect::<Result<Vec<_>, _>>()?
        };

        debug!(
            riders = document.riders.len(),
            events = events.len(),
            "Decoded race summary"
        );

        Ok(Self {
            riders: document.riders,
            events,
            config: document.config,
        })
    }
}

// ============================================================================
// Persisted layout
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct SummaryDocument {
    version: u32,
    riders: Vec<Rider>,
    config: TrackerConfig,
    events: Vec<SerializedEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum SerializedEvent {
    #[serde(rename = "RiderReadyEvent")]
    RiderReady(SerializedReady),
    #[serde(rename = "TimingEvent")]
    Timing(SerializedTiming),
    #[serde(rename = "RiderFinishedEvent")]
    RiderFinished(SerializedRiderFinished),
    #[serde(rename = "FinishedEvent")]
    Finished(SerializedFinished),
    #[serde(rename = "UnitDNFEvent")]
    UnitDnf(SerializedUnitDnf),
    #[serde(rename = "ManualDNFEvent")]
    ManualDnf(SerializedManualDnf),
    #[serde(rename = "DSQEvent")]
    Dsq(SerializedDsq),
    #[serde(rename = "PenaltyEvent")]
    Penalty(SerializedPenalty),
    #[serde(rename = "ClearReadyEvent")]
    ClearReady(SerializedClearReady),
    #[serde(rename = "DeleteTimeEvent")]
    DeleteTime(SerializedDeleteTime),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedReady {
    event_id: EventId,
    time: TimestampWall,
    rider: String,
    staff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedTiming {
    event_id: EventId,
    time: TimestampWall,
    gate_id: GateId,
    micros: DeviceMicros,
    rider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedRiderFinished {
    event_id: EventId,
    time: TimestampWall,
    rider: String,
    #[serde(default)]
    staff: Option<String>,
    #[serde(default)]
    time_end: Option<EventId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedFinished {
    event_id: EventId,
    time: TimestampWall,
    entered: SerializedReady,
    time_start: SerializedTiming,
    left: SerializedRiderFinished,
    time_end: SerializedTiming,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedUnitDnf {
    event_id: EventId,
    time: TimestampWall,
    other: SerializedFinished,
    this_rider: SerializedReady,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedManualDnf {
    event_id: EventId,
    time: TimestampWall,
    this_rider: SerializedReady,
    staff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedDsq {
    event_id: EventId,
    time: TimestampWall,
    rider: String,
    staff: String,
    reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedPenalty {
    event_id: EventId,
    time: TimestampWall,
    rider: String,
    staff: String,
    reason: String,
    seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedClearReady {
    event_id: EventId,
    time: TimestampWall,
    rider: String,
    staff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedDeleteTime {
    event_id: EventId,
    time: TimestampWall,
    target_event_id: EventId,
    staff: String,
}

impl From<&RiderReadyEvent> for SerializedReady {
    fn from(e: &RiderReadyEvent) -> Self {
        Self {
            event_id: e.event_id,
            time: e.time,
            rider: e.rider.name.clone(),
            staff: e.staff.clone(),
        }
    }
}

impl From<&TimingEvent> for SerializedTiming {
    fn from(e: &TimingEvent) -> Self {
        Self {
            event_id: e.event_id,
            time: e.time,
            gate_id: e.gate_id,
            micros: e.micros,
            rider: e.rider.get().map(|r| r.name.clone()),
        }
    }
}

impl From<&RiderFinishedEvent> for SerializedRiderFinished {
    fn from(e: &RiderFinishedEvent) -> Self {
        Self {
            event_id: e.event_id,
            time: e.time,
            rider: e.rider.name.clone(),
            staff: e.staff.clone(),
            time_end: e.time_end.get().copied(),
        }
    }
}

impl From<&FinishedEvent> for SerializedFinished {
    fn from(e: &FinishedEvent) -> Self {
        Self {
            event_id: e.event_id,
            time: e.time,
            entered: e.entered.as_ref().into(),
            time_start: e.time_start.as_ref().into(),
            left: e.left.as_ref().into(),
            time_end: e.time_end.as_ref().into(),
        }
    }
}

impl From<&RaceEvent> for SerializedEvent {
    fn from(event: &RaceEvent) -> Self {
        match event {
            RaceEvent::RiderReady(e) => Self::RiderReady(e.as_ref().into()),
            RaceEvent::Timing(e) => Self::Timing(e.as_ref().into()),
            RaceEvent::RiderFinished(e) => Self::RiderFinished(e.as_ref().into()),
            RaceEvent::Finished(e) => Self::Finished(e.as_ref().into()),
            RaceEvent::UnitDnf(e) => Self::UnitDnf(SerializedUnitDnf {
                event_id: e.event_id,
                time: e.time,
                other: e.other.as_ref().into(),
                this_rider: e.this_rider.as_ref().into(),
            }),
            RaceEvent::ManualDnf(e) => Self::ManualDnf(SerializedManualDnf {
                event_id: e.event_id,
                time: e.time,
                this_rider: e.this_rider.as_ref().into(),
                staff: e.staff.clone(),
            }),
            RaceEvent::Dsq(e) => Self::Dsq(SerializedDsq {
                event_id: e.event_id,
                time: e.time,
                rider: e.rider.name.clone(),
                staff: e.staff.clone(),
                reason: e.reason.clone(),
            }),
            RaceEvent::Penalty(e) => Self::Penalty(SerializedPenalty {
                event_id: e.event_id,
                time: e.time,
                rider: e.rider.name.clone(),
                staff: e.staff.clone(),
                reason: e.reason.clone(),
                seconds: e.seconds,
            }),
            RaceEvent::ClearReady(e) => Self::ClearReady(SerializedClearReady {
                event_id: e.event_id,
                time: e.time,
                rider: e.rider.name.clone(),
                staff: e.staff.clone(),
            }),
            RaceEvent::DeleteTime(e) => Self::DeleteTime(SerializedDeleteTime {
                event_id: e.event_id,
                time: e.time,
                target_event_id: e.target_event_id,
                staff: e.staff.clone(),
            }),
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Resolves rider names and re-links shared sub-events while decoding
struct Decoder<'a> {
    riders: AHashMap<&'a str, &'a Rider>,
    ready: AHashMap<EventId, Arc<RiderReadyEvent>>,
    timing: AHashMap<EventId, Arc<TimingEvent>>,
    left: AHashMap<EventId, Arc<RiderFinishedEvent>>,
    finished: AHashMap<EventId, Arc<FinishedEvent>>,
}

impl<'a> Decoder<'a> {
    fn new(riders: &'a [Rider]) -> Result<Self, SummaryError> {
        let mut by_name = AHashMap::with_capacity(riders.len());
        for rider in riders {
            if by_name.insert(rider.name.as_str(), rider).is_some() {
                return Err(SummaryError::AmbiguousRider(rider.name.clone()));
            }
        }

        Ok(Self {
            riders: by_name,
            ready: AHashMap::default(),
            timing: AHashMap::default(),
            left: AHashMap::default(),
            finished: AHashMap::default(),
        })
    }

    fn rider(&self, name: &str) -> Result<Rider, SummaryError> {
        self.riders
            .get(name)
            .map(|r| (*r).clone())
            .ok_or_else(|| SummaryError::UnknownRider(name.to_string()))
    }

    fn event(&mut self, event: SerializedEvent) -> Result<RaceEvent, SummaryError> {
        Ok(match event {
            SerializedEvent::RiderReady(e) => RaceEvent::RiderReady(self.ready(e)?),
            SerializedEvent::Timing(e) => RaceEvent::Timing(self.timing(e)?),
            SerializedEvent::RiderFinished(e) => RaceEvent::RiderFinished(self.left(e)?),
            SerializedEvent::Finished(e) => RaceEvent::Finished(self.finished(e)?),
            SerializedEvent::UnitDnf(e) => RaceEvent::UnitDnf(Arc::new(UnitDnfEvent {
                event_id: e.event_id,
                time: e.time,
                other: self.finished(e.other)?,
                this_rider: self.ready(e.this_rider)?,
            })),
            SerializedEvent::ManualDnf(e) => RaceEvent::ManualDnf(Arc::new(ManualDnfEvent {
                event_id: e.event_id,
                time: e.time,
                this_rider: self.ready(e.this_rider)?,
                staff: e.staff,
            })),
            SerializedEvent::Dsq(e) => RaceEvent::Dsq(Arc::new(DsqEvent {
                event_id: e.event_id,
                time: e.time,
                rider: self.rider(&e.rider)?,
                staff: e.staff,
                reason: e.reason,
            })),
            SerializedEvent::Penalty(e) => RaceEvent::Penalty(Arc::new(PenaltyEvent {
                event_id: e.event_id,
                time: e.time,
                rider: self.rider(&e.rider)?,
                staff: e.staff,
                reason: e.reason,
                seconds: e.seconds,
            })),
            SerializedEvent::ClearReady(e) => RaceEvent::ClearReady(Arc::new(ClearReadyEvent {
                event_id: e.event_id,
                time: e.time,
                rider: self.rider(&e.rider)?,
                staff: e.staff,
            })),
            SerializedEvent::DeleteTime(e) => RaceEvent::DeleteTime(Arc::new(DeleteTimeEvent {
                event_id: e.event_id,
                time: e.time,
                target_event_id: e.target_event_id,
                staff: e.staff,
            })),
        })
    }

    fn ready(&mut self, e: SerializedReady) -> Result<Arc<RiderReadyEvent>, SummaryError> {
        if let Some(known) = self.ready.get(&e.event_id) {
            return Ok(known.clone());
        }
        let event = Arc::new(RiderReadyEvent {
            event_id: e.event_id,
            time: e.time,
            rider: self.rider(&e.rider)?,
            staff: e.staff,
        });
        self.ready.insert(event.event_id, event.clone());
        Ok(event)
    }

    fn timing(&mut self, e: SerializedTiming) -> Result<Arc<TimingEvent>, SummaryError> {
        if let Some(known) = self.timing.get(&e.event_id) {
            return Ok(known.clone());
        }
        let rider = match &e.rider {
            Some(name) => Some(self.rider(name)?),
            None => None,
        };
        let event = Arc::new(TimingEvent {
            event_id: e.event_id,
            time: e.time,
            gate_id: e.gate_id,
            micros: e.micros,
            rider: WriteOnce::from_option("rider", rider),
        });
        self.timing.insert(event.event_id, event.clone());
        Ok(event)
    }

    fn left(&mut self, e: SerializedRiderFinished) -> Result<Arc<RiderFinishedEvent>, SummaryError> {
        if let Some(known) = self.left.get(&e.event_id) {
            return Ok(known.clone());
        }
        let event = Arc::new(RiderFinishedEvent {
            event_id: e.event_id,
            time: e.time,
            rider: self.rider(&e.rider)?,
            staff: e.staff,
            time_end: WriteOnce::from_option("time_end", e.time_end),
        });
        self.left.insert(event.event_id, event.clone());
        Ok(event)
    }

    fn finished(&mut self, e: SerializedFinished) -> Result<Arc<FinishedEvent>, SummaryError> {
        if let Some(known) = self.finished.get(&e.event_id) {
            return Ok(known.clone());
        }
        let event = Arc::new(FinishedEvent {
            event_id: e.event_id,
            time: e.time,
            entered: self.ready(e.entered)?,
            time_start: self.timing(e.time_start)?,
            left: self.left(e.left)?,
            time_end: self.timing(e.time_end)?,
        });
        self.finished.insert(event.event_id, event.clone());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RaceSummary {
        let martijn = Rider::new("Martijn");
        let ready = Arc::new(RiderReadyEvent::new(martijn.clone(), 1_000, "start"));
        let start = Arc::new(TimingEvent::with_rider(0, 100, 2_000, martijn.clone()));
        let end = Arc::new(TimingEvent::unmatched(1, 500, 62_000));
        let left = Arc::new(RiderFinishedEvent::new(martijn.clone(), 61_000));
        end.rider.set(martijn.clone()).unwrap();
        left.time_end.set(end.event_id).unwrap();
        let finished = Arc::new(FinishedEvent::new(ready.clone(), start.clone(), left.clone(), end.clone()));

        RaceSummary::new(
            vec![martijn],
            vec![
                RaceEvent::RiderReady(ready),
                RaceEvent::Timing(start),
                RaceEvent::Timing(end),
                RaceEvent::RiderFinished(left),
                RaceEvent::Finished(finished),
            ],
            TrackerConfig::default(),
        )
    }

    #[test]
    fn test_type_discriminant_and_rider_names() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["events"][0]["type"], "RiderReadyEvent");
        assert_eq!(value["events"][0]["rider"], "Martijn");
        assert_eq!(value["events"][4]["type"], "FinishedEvent");
        assert_eq!(value["events"][4]["time_end"]["rider"], "Martijn");
        assert_eq!(value["config"]["end_match_timeout_secs"], 10);
    }

    #[test]
    fn test_decoded_finish_shares_logged_events() {
        let summary = sample();
        let decoded = RaceSummary::from_json(&summary.to_json().unwrap()).unwrap();

        let (end, finished) = match (&decoded.events[2], &decoded.events[4]) {
            (RaceEvent::Timing(end), RaceEvent::Finished(finished)) => (end, finished),
            other => panic!("unexpected events {:?}", other),
        };
        assert!(Arc::ptr_eq(end, &finished.time_end));
        assert_eq!(finished.lap_time(), 400);
        assert_eq!(finished.left.time_end.get(), Some(&end.event_id));
    }

    #[test]
    fn test_unknown_rider_rejected() {
        let mut summary = sample();
        summary.riders.clear();
        let json = summary.to_json().unwrap();

        let result = RaceSummary::from_json(&json);
        assert!(matches!(result, Err(SummaryError::UnknownRider(name)) if name == "Martijn"));
    }

    #[test]
    fn test_duplicate_names_rejected_on_write() {
        let mut summary = sample();
        summary.riders.push(Rider::new("Martijn"));

        assert!(matches!(summary.to_json(), Err(SummaryError::AmbiguousRider(_))));
    }

    #[test]
    fn test_future_version_rejected() {
        let json = sample().to_json().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["version"] = serde_json::json!(SUMMARY_VERSION + 1);

        let result = RaceSummary::from_json(&value.to_string());
        assert!(matches!(result, Err(SummaryError::InvalidFormat(_))));
    }
}
