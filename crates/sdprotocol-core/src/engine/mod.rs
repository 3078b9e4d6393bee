//! Execution engines
//!
//! Two ways of driving a run over a [`SerialLink`](crate::link::SerialLink):
//!
//! - [`PacedEngine`] sends a protocol step by step, sleeping each command's
//!   motor duration plus a settle buffer, and honours pause/stop requests at
//!   step boundaries.
//! - [`DeviceSyncEngine`] waits for `CONTINUE` lines from the device before
//!   each phase of a [`DeviceCycle`](crate::catalog::DeviceCycle) and ends on
//!   `STOP`.
//!
//! Engines borrow the link for the duration of a run and never close it.

mod device_sync;
mod paced;

pub use device_sync::DeviceSyncEngine;
pub use paced::PacedEngine;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::command::Command;

/// Sentinel sent by the device when its button is pressed
pub const SENTINEL_CONTINUE: &str = "CONTINUE";

/// Sentinel sent by the device to end a button-driven run
pub const SENTINEL_STOP: &str = "STOP";

/// Blocking wait used for all pacing
///
/// Production code uses [`ThreadPacer`]; tests substitute a recording or
/// accelerated implementation.
pub trait Pacer: Send + Sync {
    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Pacer backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Timing parameters shared by both engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Wall-clock length of one declared duration unit
    pub time_unit_ms: u64,
    /// Extra wait after each command's motor duration
    pub settle_buffer_ms: u64,
    /// Poll interval while a run is paused
    pub pause_poll_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            time_unit_ms: 1000,
            settle_buffer_ms: 100,
            pause_poll_ms: 500,
        }
    }
}

impl PacingConfig {
    /// Length of one duration unit
    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms)
    }

    /// Pad added after every command
    pub fn settle_buffer(&self) -> Duration {
        Duration::from_millis(self.settle_buffer_ms)
    }

    /// Pause poll interval, at least 1 ms
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    /// Wait after sending `command` before the next one may go out
    pub fn step_wait(&self, command: &Command) -> Duration {
        command.motor_time(self.time_unit()) + self.settle_buffer()
    }
}
