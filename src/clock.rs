//! Time source injected into the workflow service
use chrono::Duration;
use parking_lot::Mutex;

use crate::types::TimeStamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<TimeStamp>,
}

impl ManualClock {
    pub fn new(start: TimeStamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }
    pub fn set(&self, to: TimeStamp) {
        *self.now.lock() = to;
    }
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = now.plus(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp {
        *self.now.lock()
    }
}
