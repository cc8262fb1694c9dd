// Lap outcome and its leaderboard ordering
//
// A lap wraps exactly one terminal event (finish, manual DNF or inferred DNF)
// and accumulates staff penalties and at most one disqualification.

use crate::{DsqEvent, FinishedEvent, ManualDnfEvent, PenaltyEvent, UnitDnfEvent};
use gymkhana_schema::{DeviceMicros, EventId, Rider};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;

/// Terminal event of a lap
#[derive(Debug, Clone)]
pub enum LapEnd {
    Finished(Arc<FinishedEvent>),
    ManualDnf(Arc<ManualDnfEvent>),
    UnitDnf(Arc<UnitDnfEvent>),
}

impl LapEnd {
    pub fn event_id(&self) -> EventId {
        match self {
            LapEnd::Finished(e) => e.event_id,
            LapEnd::ManualDnf(e) => e.event_id,
            LapEnd::UnitDnf(e) => e.event_id,
        }
    }
}

/// Lap errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LapError {
    #[error("Lap {0} is already disqualified")]
    AlreadyDisqualified(EventId),
}

/// Outcome of one attempt by one rider
#[derive(Debug, Clone)]
pub struct Lap {
    end: LapEnd,
    penalties: SmallVec<[Arc<PenaltyEvent>; 2]>,
    dsq: Option<Arc<DsqEvent>>,
}

impl Lap {
    pub fn new(end: LapEnd) -> Self {
        Self {
            end,
            penalties: SmallVec::new(),
            dsq: None,
        }
    }

    pub fn end(&self) -> &LapEnd {
        &self.end
    }

    pub fn rider(&self) -> &Rider {
        match &self.end {
            LapEnd::Finished(e) => e.rider(),
            LapEnd::ManualDnf(e) => &e.this_rider.rider,
            LapEnd::UnitDnf(e) => &e.this_rider.rider,
        }
    }

    /// True for manual and inferred non-finishes
    pub fn is_dnf(&self) -> bool {
        !matches!(self.end, LapEnd::Finished(_))
    }

    pub fn is_disqualified(&self) -> bool {
        self.dsq.is_some()
    }

    pub fn penalties(&self) -> &[Arc<PenaltyEvent>] {
        &self.penalties
    }

    pub fn dsq(&self) -> Option<&Arc<DsqEvent>> {
        self.dsq.as_ref()
    }

    pub fn add_penalty(&mut self, penalty: Arc<PenaltyEvent>) {
        self.penalties.push(penalty);
    }

    pub fn add_penalties<I>(&mut self, penalties: I)
    where
        I: IntoIterator<Item = Arc<PenaltyEvent>>,
    {
        self.penalties.extend(penalties);
    }

    pub fn set_dsq(&mut self, dsq: Arc<DsqEvent>) -> Result<(), LapError> {
        if self.dsq.is_some() {
            return Err(LapError::AlreadyDisqualified(self.end.event_id()));
        }
        self.dsq = Some(dsq);
        Ok(())
    }

    /// Sum of attached penalties in microseconds
    pub fn penalty_micros(&self) -> DeviceMicros {
        self.penalties
            .iter()
            .fold(0, |total: DeviceMicros, p| total.saturating_add(p.micros()))
    }

    /// Lap time in microseconds, `None` for a DNF
    pub fn lap_time(&self, include_penalties: bool) -> Option<DeviceMicros> {
        match &self.end {
            LapEnd::Finished(e) => {
                let raw = e.lap_time();
                if include_penalties {
                    Some(raw.saturating_add(self.penalty_micros()))
                } else {
                    Some(raw)
                }
            }
            LapEnd::ManualDnf(_) | LapEnd::UnitDnf(_) => None,
        }
    }

    /// 0 for a clean finish, 1 for a disqualified finish, 2 for a DNF
    pub fn class_rank(&self) -> u8 {
        if self.is_dnf() {
            2
        } else if self.is_disqualified() {
            1
        } else {
            0
        }
    }

    /// Leaderboard ordering; `Less` means `self` ranks ahead of `other`
    ///
    /// Two DNF laps compare equal, so a stable sort keeps them in the order the
    /// laps were completed.
    pub fn compare(&self, other: &Lap, consider_penalties: bool) -> Ordering {
        self.class_rank()
            .cmp(&other.class_rank())
            .then_with(|| {
                match (
                    self.lap_time(consider_penalties),
                    other.lap_time(consider_penalties),
                ) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    _ => Ordering::Equal,
                }
            })
    }
}
