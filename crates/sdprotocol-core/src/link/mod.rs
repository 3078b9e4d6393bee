//! Serial link to the device
//!
//! Line-oriented ASCII transport: one command per line towards the device,
//! sentinel lines (`CONTINUE`, `STOP`) back from it.

mod channel;
mod connection;
mod error;
pub mod serial;

pub use channel::{Channel, SerialChannel};
pub use connection::{CloseSignal, LinkConfig, LinkState, OpenOutcome, SerialLink};
pub use error::LinkError;
pub use serial::{auto_select_port, list_ports, PortInfo};

/// Baud rate fixed by the device firmware
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Per-read timeout of the underlying port in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Settle delay after opening, covering the Arduino-style reset on connect
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Longest unterminated fragment kept while waiting for a newline
pub const MAX_LINE_LEN: usize = 256;
