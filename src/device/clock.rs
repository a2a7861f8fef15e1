//! Sleeping, abstracted so timeouts and hardware settle delays can be tested
//! without waiting on a wall clock.

use std::time::Duration;

pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
