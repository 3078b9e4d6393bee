//! Link errors

use thiserror::Error;

/// Errors that can occur on the serial link
#[derive(Error, Debug)]
pub enum LinkError {
    /// The port could not be opened (missing, busy, or refused by the driver)
    #[error("Failed to connect to {port}: {message}")]
    Connection {
        /// Port that failed to open
        port: String,
        /// Reason reported by the OS or driver
        message: String,
    },

    /// The link was never opened
    #[error("Not connected to device")]
    NotConnected,

    /// The link was closed or asked to close
    #[error("Link closed")]
    Closed,

    /// The device end hung up (read returned end of stream)
    #[error("Device disconnected")]
    Disconnected,

    /// Read or write failed on the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// True for failures while opening, as opposed to failures mid-run
    pub fn is_connection_error(&self) -> bool {
        matches!(self, LinkError::Connection { .. })
    }
}
