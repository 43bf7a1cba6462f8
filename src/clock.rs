use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::lock_utils::lock_or_recover;

/// Time source for every temporal rule (voting window, timelock)
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *lock_or_recover(&self.now, "manual clock") = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock_or_recover(&self.now, "manual clock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock_or_recover(&self.now, "manual clock")
    }
}
