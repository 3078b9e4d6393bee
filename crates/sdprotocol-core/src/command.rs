//! Device commands
//!
//! Defines the actuation instructions understood by the device firmware and
//! their fixed ASCII wire form: `"<MOVEMENT> <motor> LED <led>\n"`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Motor movement understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[non_exhaustive]
pub enum Movement {
    /// Drive the motor forward
    Forward,
}

impl Movement {
    /// Keyword sent on the wire
    pub fn keyword(&self) -> &'static str {
        match self {
            Movement::Forward => "FORWARD",
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for Movement {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FORWARD" => Ok(Movement::Forward),
            _ => Err(ValidationError::new("movement", s, "unknown movement")),
        }
    }
}

/// Rejected operator input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field} '{input}': {reason}")]
pub struct ValidationError {
    /// Which input was rejected
    pub field: &'static str,
    /// The text as entered
    pub input: String,
    /// Why it was rejected
    pub reason: &'static str,
}

impl ValidationError {
    pub(crate) fn new(field: &'static str, input: &str, reason: &'static str) -> Self {
        Self {
            field,
            input: input.to_string(),
            reason,
        }
    }
}

/// One actuation instruction
///
/// Both durations are whole seconds (time units). A `Command` is immutable
/// once built; validation of operator text happens in [`parse_duration`]
/// before a value is ever constructed, so encoding never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    movement: Movement,
    motor_duration: u32,
    led_duration: u32,
}

impl Command {
    /// Create a command
    pub const fn new(movement: Movement, motor_duration: u32, led_duration: u32) -> Self {
        Self {
            movement,
            motor_duration,
            led_duration,
        }
    }

    /// Shorthand for a `FORWARD` command
    pub const fn forward(motor_duration: u32, led_duration: u32) -> Self {
        Self::new(Movement::Forward, motor_duration, led_duration)
    }

    /// Build a command from operator text, validating both durations
    pub fn from_input(movement: Movement, motor: &str, led: &str) -> Result<Self, ValidationError> {
        let motor_duration = parse_duration("motor duration", motor)?;
        let led_duration = parse_duration("LED duration", led)?;
        Ok(Self::new(movement, motor_duration, led_duration))
    }

    /// Direction keyword
    pub fn movement(&self) -> Movement {
        self.movement
    }

    /// Motor on-time in time units
    pub fn motor_duration(&self) -> u32 {
        self.motor_duration
    }

    /// LED on-time in time units
    pub fn led_duration(&self) -> u32 {
        self.led_duration
    }

    /// Wall-clock motor on-time for a given time unit
    pub fn motor_time(&self, unit: Duration) -> Duration {
        unit.saturating_mul(self.motor_duration)
    }

    /// Wire form, newline terminated
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }
}

/// Formats without the trailing newline
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} LED {}",
            self.movement, self.motor_duration, self.led_duration
        )
    }
}

/// Parse a duration typed by the operator
///
/// Only plain decimal digits are accepted (no sign, no fraction). Surrounding
/// whitespace from text fields is ignored.
pub fn parse_duration(field: &'static str, input: &str) -> Result<u32, ValidationError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(ValidationError::new(field, input, "value is required"));
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new(
            field,
            input,
            "must be a non-negative whole number",
        ));
    }
    text.parse::<u32>()
        .map_err(|_| ValidationError::new(field, input, "value is too large"))
}
