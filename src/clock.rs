//! Wall-clock access and start-instant synchronization
//!
//! Peers share no clock source, so the host picks a start instant on a
//! coarse grid some time in the future. Every peer derives all round
//! boundaries from that single broadcast instant.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use web_time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time
pub trait Clock {
    /// Returns the current wall-clock time
    fn now(&self) -> SystemTime;
}

/// The system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Wall clock that follows the tokio timer
///
/// Elapsed time is measured with the runtime's clock, so a paused test
/// runtime moves this clock and the reactor's sleeps together.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    origin: SystemTime,
    started: tokio::time::Instant,
}

impl RuntimeClock {
    /// Creates a clock anchored at the current wall-clock time
    pub fn new() -> Self {
        Self {
            origin: SystemTime::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> SystemTime {
        self.origin + self.started.elapsed()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same instant, so a test can hold one handle while the
/// code under test reads another.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<SystemTime>>);

impl ManualClock {
    /// Creates a clock frozen at `now`
    pub fn new(now: SystemTime) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    /// Creates a clock frozen `secs` seconds after the unix epoch
    pub fn at_unix(secs: u64) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Moves the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    /// Moves the clock to an absolute instant
    pub fn set(&self, to: SystemTime) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Computes the shared session start instant
///
/// Returns the first grid boundary strictly after `now + lead_time`, on
/// whole unix seconds. A zero grid is treated as a one-second grid.
pub fn compute_start_instant(
    now: SystemTime,
    lead_time: Duration,
    grid_alignment: Duration,
) -> SystemTime {
    let grid = grid_alignment.as_secs().max(1);
    let earliest = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(lead_time)
        .as_secs();

    UNIX_EPOCH + Duration::from_secs(earliest + (grid - earliest % grid))
}

/// Seconds since the unix epoch, clamped at zero
pub fn unix_seconds(instant: SystemTime) -> u64 {
    instant
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
