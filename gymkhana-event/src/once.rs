// Write-once cells for fields that are filled in after an event is created
//
// Timing events are recorded before the rider crossing the gate is known, and
// end box identifications before the matching gate trigger is known. Both
// fields are assigned exactly once by the tracker when the match is made.

use std::sync::OnceLock;
use thiserror::Error;

/// A field was assigned a second time
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Field already assigned: {0}")]
pub struct AlreadyAssigned(pub &'static str);

/// Thread-safe optional value that can be set at most once
#[derive(Debug, Clone)]
pub struct WriteOnce<T> {
    name: &'static str,
    cell: OnceLock<T>,
}

impl<T> WriteOnce<T> {
    /// Create an empty cell; `name` identifies the field in errors
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceLock::new(),
        }
    }

    /// Create a cell that already holds a value
    pub fn with_value(name: &'static str, value: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self { name, cell }
    }

    /// Create a cell from an optional value
    pub fn from_option(name: &'static str, value: Option<T>) -> Self {
        match value {
            Some(value) => Self::with_value(name, value),
            None => Self::new(name),
        }
    }

    /// Assign the value; fails if one was assigned before
    pub fn set(&self, value: T) -> Result<(), AlreadyAssigned> {
        self.cell.set(value).map_err(|_| AlreadyAssigned(self.name))
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_set(&self) -> bool {
        self.cell.get().is_some()
    }
}
