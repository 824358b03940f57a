//! Time sources for clock-reading expressions.

use std::sync::Mutex;

use chrono::{Duration, Local, NaiveDateTime};

/// Supplies the current local date and time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    at: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self { at: Mutex::new(at) }
    }

    pub fn set(&self, at: NaiveDateTime) {
        match self.at.lock() {
            Ok(mut guard) => *guard = at,
            Err(poisoned) => *poisoned.into_inner() = at,
        }
    }

    /// Move the clock forward by `by`. Saturates instead of overflowing.
    pub fn advance(&self, by: Duration) {
        let current = self.now();
        self.set(current.checked_add_signed(by).unwrap_or(current));
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        match self.at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
