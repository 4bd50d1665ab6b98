//! Engine clock.
//!
//! All timestamps written by the engine (create time, last-updated, event
//! and comment times) and the `now()`/`dateTime()` query expressions read
//! from a single [`Clock`]. Tests freeze or shift it through [`EngineClock`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use parking_lot::RwLock;

/// Source of "now" for the engine.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current engine time.
    fn now(&self) -> DateTime<Utc>;

    /// Freezes the clock at `instant`.
    fn set(&self, instant: DateTime<Utc>);

    /// Moves the clock by `by`. A frozen clock stays frozen at the new instant.
    fn offset(&self, by: Duration);

    /// Returns to wall-clock time with no offset.
    fn reset(&self);
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Live { offset: Duration },
    Frozen(DateTime<Utc>),
}

/// Default [`Clock`]: wall time plus an optional offset, or a frozen instant.
///
/// Time is truncated to millisecond precision so that persisted timestamps
/// compare equal to the values callers observe.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use taskscope::clock::{Clock, EngineClock};
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
/// let clock = EngineClock::frozen_at(start);
/// clock.offset(Duration::minutes(5));
/// assert_eq!(clock.now(), start + Duration::minutes(5));
/// ```
#[derive(Debug)]
pub struct EngineClock {
    mode: RwLock<Mode>,
}

impl EngineClock {
    /// A live clock following wall time.
    pub fn system() -> Self {
        Self {
            mode: RwLock::new(Mode::Live {
                offset: Duration::zero(),
            }),
        }
    }

    /// A clock frozen at `instant`.
    pub fn frozen_at(instant: DateTime<Utc>) -> Self {
        let clock = Self::system();
        clock.set(instant);
        clock
    }

    /// Wraps the clock for sharing with an engine.
    pub fn shared(self) -> Arc<dyn Clock> {
        Arc::new(self)
    }

    /// Returns `true` if the clock is frozen.
    pub fn is_frozen(&self) -> bool {
        matches!(*self.mode.read(), Mode::Frozen(_))
    }
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::system()
    }
}

fn truncate_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(Duration::milliseconds(1))
        .unwrap_or(instant)
}

impl Clock for EngineClock {
    fn now(&self) -> DateTime<Utc> {
        match *self.mode.read() {
            Mode::Live { offset } => truncate_millis(Utc::now() + offset),
            Mode::Frozen(instant) => instant,
        }
    }

    fn set(&self, instant: DateTime<Utc>) {
        *self.mode.write() = Mode::Frozen(truncate_millis(instant));
    }

    fn offset(&self, by: Duration) {
        let mut mode = self.mode.write();
        *mode = match *mode {
            Mode::Live { offset } => Mode::Live { offset: offset + by },
            Mode::Frozen(instant) => Mode::Frozen(truncate_millis(instant + by)),
        };
    }

    fn reset(&self) {
        *self.mode.write() = Mode::Live {
            offset: Duration::zero(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn frozen_clock_does_not_move() {
        let clock = EngineClock::frozen_at(start());
        assert_eq!(clock.now(), start());
        assert_eq!(clock.now(), start());
        assert!(clock.is_frozen());
    }

    #[test]
    fn offset_moves_frozen_clock() {
        let clock = EngineClock::frozen_at(start());
        clock.offset(Duration::days(1));
        assert_eq!(clock.now(), start() + Duration::days(1));
    }

    #[test]
    fn offset_moves_live_clock_forward() {
        let clock = EngineClock::system();
        clock.offset(Duration::days(365));
        assert!(clock.now() > Utc::now() + Duration::days(364));
    }

    #[test]
    fn reset_returns_to_wall_time() {
        let clock = EngineClock::frozen_at(start());
        clock.reset();
        assert!(!clock.is_frozen());
        assert!(clock.now() > start());
    }

    #[test]
    fn set_truncates_to_millis() {
        let clock = EngineClock::system();
        let instant = start() + Duration::nanoseconds(1_500_000);
        clock.set(instant);
        assert_eq!(clock.now(), start() + Duration::milliseconds(1));
    }
}
