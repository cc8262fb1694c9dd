//! Wall Clock Sources
//!
//! Staff actions and box identifications are stamped with wall clock time.
//! The race manager takes its timestamps from a `TimeProvider` so tests and
//! replays can run against a controlled clock.

use gymkhana_schema::TimestampWall;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Time provider trait
pub trait TimeProvider: Send + Sync {
    /// Get current wall clock timestamp in nanoseconds
    fn wall_ns(&self) -> TimestampWall;

    /// Advance time by a duration (for mock time)
    fn advance(&self, _duration: Duration) {}

    /// Set absolute time (for mock time)
    fn set_time(&self, _wall_ns: TimestampWall) {}
}

/// Real time provider using the system clock
#[derive(Debug, Clone, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn wall_ns(&self) -> TimestampWall {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Mock time provider for testing and replay
///
/// Clones share the same underlying clock.
#[derive(Debug, Clone, Default)]
pub struct MockTimeProvider {
    wall: Arc<AtomicU64>,
}

impl MockTimeProvider {
    /// Create a new mock time provider starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new mock time provider with a specific starting value
    pub fn with_wall(wall_ns: TimestampWall) -> Self {
        Self {
            wall: Arc::new(AtomicU64::new(wall_ns)),
        }
    }
}

impl TimeProvider for MockTimeProvider {
    fn wall_ns(&self) -> TimestampWall {
        self.wall.load(Ordering::SeqCst)
    }

    fn advance(&self, duration: Duration) {
        self.wall
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    fn set_time(&self, wall_ns: TimestampWall) {
        self.wall.store(wall_ns, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_time_provider() {
        let provider = RealTimeProvider;
        assert!(provider.wall_ns() > 0);
    }

    #[test]
    fn test_mock_time_provider_advance() {
        let provider = MockTimeProvider::with_wall(1_000);

        provider.advance(Duration::from_nanos(500));
        assert_eq!(provider.wall_ns(), 1_500);

        provider.set_time(10);
        provider.advance(Duration::from_secs(1));
        assert_eq!(provider.wall_ns(), 1_000_000_010);
    }

    #[test]
    fn test_mock_time_provider_clone_shares_clock() {
        let a = MockTimeProvider::new();
        let b = a.clone();

        b.advance(Duration::from_nanos(100));
        assert_eq!(a.wall_ns(), 100);
    }
}
