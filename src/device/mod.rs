//! One physical board across its reboots.
//!
//! A board re-enumerates on the USB bus every time the bootstrap sequence
//! resets it, so its bus address is only good until the next reset. The chip
//! id read from the silicon is what ties the appearances together.
//!
//! The discovery loop and the board's engine share a [`DeviceSession`]:
//!
//! ```text
//! engine thread                      discovery thread
//! ─────────────                      ────────────────
//! mark = reconnect_mark()
//! send reset / run
//! wait_for_reconnect(mark)
//!   pending = true
//!   sleep / check ...                 board seen at new address,
//!                                     same chip id
//!                                   mark_reconnected(addr)
//!                                     address = addr
//!   generation != mark  <──────────     generation += 1
//! continue on new address
//! ```
//!
//! The engine takes its mark before the command that makes the board drop
//! off the bus, so a reappearance seen before the wait starts still counts.

pub mod client;
pub mod clock;

pub use client::{parse_bus_addresses, probe_chip_id, scan_bus, UpdateClient};
pub use clock::{Clock, SystemClock};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{FlashError, FlashResult};

#[derive(Debug)]
struct Link {
    bus_address: String,
    generation: u64,
    reconnect_pending: bool,
}

/// Reconnect count at some instant; see [`DeviceSession::reconnect_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectMark(u64);

/// Identity and current bus location of one board.
#[derive(Debug)]
pub struct DeviceSession {
    chip_id: String,
    link: Mutex<Link>,
}

impl DeviceSession {
    pub fn new(chip_id: impl Into<String>, bus_address: impl Into<String>) -> Self {
        Self {
            chip_id: chip_id.into(),
            link: Mutex::new(Link {
                bus_address: bus_address.into(),
                generation: 0,
                reconnect_pending: false,
            }),
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        // Plain values behind the lock; a panicked holder cannot leave them torn.
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn chip_id(&self) -> &str {
        &self.chip_id
    }

    pub fn bus_address(&self) -> String {
        self.link().bus_address.clone()
    }

    /// Whether an engine is currently blocked in [`Self::wait_for_reconnect`].
    pub fn reconnect_pending(&self) -> bool {
        self.link().reconnect_pending
    }

    /// Snapshot of how many times the board has reappeared so far.
    pub fn reconnect_mark(&self) -> ReconnectMark {
        ReconnectMark(self.link().generation)
    }

    /// `[<bus address> <chip id>]`, used as the prefix of every log line
    /// about this board.
    pub fn describe(&self) -> String {
        let link = self.link();
        if link.bus_address.is_empty() {
            format!("[{}]", self.chip_id)
        } else {
            format!("[{} {}]", link.bus_address, self.chip_id)
        }
    }

    /// Block until the discovery loop reports this board at a new address
    /// after `since` was taken.
    ///
    /// Checks once per `poll` until `timeout` has elapsed. Only the calling
    /// engine's thread blocks.
    pub fn wait_for_reconnect(
        &self,
        since: ReconnectMark,
        clock: &dyn Clock,
        poll: Duration,
        timeout: Duration,
    ) -> FlashResult<()> {
        let polls = poll_count(poll, timeout);
        for _ in 0..polls {
            if self.arm_or_release(since) {
                return Ok(());
            }
            clock.sleep(poll);
        }

        let mut link = self.link();
        link.reconnect_pending = false;
        if link.generation != since.0 {
            return Ok(());
        }
        drop(link);

        Err(FlashError::ReconnectTimeout {
            device: self.describe(),
            waited: timeout,
        })
    }

    /// Record the board's new address and release a pending wait.
    ///
    /// Returns whether a wait was pending.
    pub fn mark_reconnected(&self, new_bus_address: &str) -> bool {
        let mut link = self.link();
        link.bus_address = new_bus_address.to_string();
        link.generation = link.generation.wrapping_add(1);
        std::mem::replace(&mut link.reconnect_pending, false)
    }

    /// `true` once the board has reappeared since `since`; otherwise mark the
    /// wait as pending.
    fn arm_or_release(&self, since: ReconnectMark) -> bool {
        let mut link = self.link();
        let reappeared = link.generation != since.0;
        link.reconnect_pending = !reappeared;
        reappeared
    }
}

fn poll_count(poll: Duration, timeout: Duration) -> u32 {
    if poll.is_zero() {
        return 1;
    }
    let polls = timeout.as_nanos().div_ceil(poll.as_nanos());
    u32::try_from(polls).unwrap_or(u32::MAX).max(1)
}
