//! Gymkhana Race Schema
//!
//! This module defines the identifiers, time domains and rider types shared by the
//! whole timing system, together with the starting grid and the tracker configuration.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique rider identifier
pub type RiderId = Uuid;

/// Unique race event identifier
pub type EventId = Uuid;

/// Timing gate identifier as reported by the timing unit
pub type GateId = u32;

/// Elapsed microseconds on the timing device clock (monotonic per device)
pub type DeviceMicros = i64;

/// Timestamp in nanoseconds since the UNIX epoch (wall clock)
pub type TimestampWall = u64;

/// Microseconds per second, the unit of lap times and penalties
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Nanoseconds per second, the unit of wall clock timestamps
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

// ============================================================================
// Riders
// ============================================================================

/// A rider taking part in the race
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rider {
    /// Unique rider identifier
    pub id: RiderId,
    /// Display name, also used to reference the rider in race summaries
    pub name: String,
}

impl Rider {
    /// Create a rider with a freshly generated id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    /// Create a rider with a known id
    pub fn with_id(id: RiderId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Rider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ============================================================================
// Tracker Configuration
// ============================================================================

/// Configuration of the timing gates and the end matching window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Gate id of the start timing gate
    pub start_gate_id: GateId,
    /// Gate id of the end timing gate
    pub end_gate_id: GateId,
    /// Maximum distance in seconds between an end gate trigger and an end box identification
    pub end_match_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            start_gate_id: 0,
            end_gate_id: 1,
            end_match_timeout_secs: 10,
        }
    }
}

impl TrackerConfig {
    /// End match window in wall clock nanoseconds
    pub fn end_match_timeout_ns(&self) -> u64 {
        self.end_match_timeout_secs.saturating_mul(NANOS_PER_SECOND)
    }

    /// Check the configuration for impossible values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_gate_id == self.end_gate_id {
            return Err(ConfigError::Invalid(format!(
                "start and end gate share id {}",
                self.start_gate_id
            )));
        }
        if self.end_match_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "end match timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid tracker configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Rider Registry
// ============================================================================

/// Ordered set of known riders, representing the starting grid
///
/// Lookups by id go through a hash map, the grid order is kept in a separate
/// id list. The registry is not synchronised; owners wrap it in a lock.
#[derive(Debug, Clone, Default)]
pub struct RiderRegistry {
    /// Rider ID to rider mapping
    riders: AHashMap<RiderId, Rider>,
    /// Grid order
    order: Vec<RiderId>,
}

impl RiderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rider to the end of the grid
    pub fn add(&mut self, rider: Rider) -> Result<(), RegistryError> {
        if self.riders.contains_key(&rider.id) {
            return Err(RegistryError::DuplicateId(rider.id));
        }
        self.order.push(rider.id);
        self.riders.insert(rider.id, rider);
        Ok(())
    }

    /// Remove a rider, returning whether it was known
    pub fn remove(&mut self, id: &RiderId) -> bool {
        if self.riders.remove(id).is_none() {
            return false;
        }
        self.order.retain(|r| r != id);
        true
    }

    /// Move a rider to `target` in the grid, shifting the riders in between
    ///
    /// `target` may equal the current count, which places the rider last.
    pub fn reposition(&mut self, id: &RiderId, target: i64) -> Result<(), RegistryError> {
        let current = self
            .order
            .iter()
            .position(|r| r == id)
            .ok_or(RegistryError::NotFound(*id))?;

        if target < 0 {
            return Err(RegistryError::InvalidArgument(format!(
                "position {} is negative",
                target
            )));
        }
        let target = target as usize;
        if target > self.order.len() {
            return Err(RegistryError::InvalidArgument(format!(
                "position {} exceeds rider count {}",
                target,
                self.order.len()
            )));
        }

        let rider = self.order.remove(current);
        let target = target.min(self.order.len());
        self.order.insert(target, rider);
        Ok(())
    }

    /// Get a rider by id
    pub fn get(&self, id: &RiderId) -> Option<&Rider> {
        self.riders.get(id)
    }

    /// Find a rider by display name
    pub fn find_by_name(&self, name: &str) -> Option<&Rider> {
        self.ordered().find(|r| r.name == name)
    }

    /// Check whether a rider is registered
    pub fn contains(&self, id: &RiderId) -> bool {
        self.riders.contains_key(id)
    }

    /// Iterate riders in grid order
    pub fn ordered(&self) -> impl Iterator<Item = &Rider> + '_ {
        self.order.iter().filter_map(|id| self.riders.get(id))
    }

    /// Snapshot of the grid
    pub fn to_vec(&self) -> Vec<Rider> {
        self.ordered().cloned().collect()
    }

    /// Number of registered riders
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Remove every rider
    pub fn clear(&mut self) {
        self.riders.clear();
        self.order.clear();
    }
}

/// Rider registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Rider already exists: {0}")]
    DuplicateId(RiderId),

    #[error("Rider not found: {0}")]
    NotFound(RiderId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
