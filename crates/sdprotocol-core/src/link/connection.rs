//! Link lifecycle
//!
//! Owns the physical connection to the device and frames text lines over it.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    serial::open_port, Channel, LinkError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_SETTLE_DELAY_MS, MAX_LINE_LEN,
};
use crate::command::Command;

/// Link state
///
/// `Closed` is terminal: a closed link is never reopened, a new one is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Not yet opened
    Disconnected,
    /// Port open and settled
    Connected,
    /// Handle released
    Closed,
}

/// Result of a successful [`SerialLink::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The channel was opened and settled
    Opened,
    /// The link was already connected; nothing was done
    AlreadyConnected,
}

/// Link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name; `None` lets the controller pick the only port present
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout of the underlying port in milliseconds
    pub read_timeout_ms: u64,
    /// Delay after opening before the first write, covering the device reset
    pub settle_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }
}

impl LinkConfig {
    /// Per-read timeout of the port
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Wait between open and first use
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Out-of-band close request for a link that may be busy on another thread
///
/// Raising it makes the next read or write on the link fail with
/// [`LinkError::Closed`]. A write already in progress is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal(Arc<AtomicBool>);

impl CloseSignal {
    /// Request closure; cannot be undone
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once raised
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Line-oriented serial link to the device
pub struct SerialLink {
    /// Transport handle, present only while connected
    channel: Option<Box<dyn Channel>>,
    state: LinkState,
    config: LinkConfig,
    port_name: String,
    close_signal: CloseSignal,
    /// Bytes received but not yet terminated by a newline
    pending: Vec<u8>,
    lines_sent: u64,
    lines_received: u64,
}

impl SerialLink {
    /// Create a new link (not yet connected)
    pub fn new(config: LinkConfig) -> Self {
        Self {
            channel: None,
            state: LinkState::Disconnected,
            port_name: config.port.clone().unwrap_or_default(),
            config,
            close_signal: CloseSignal::default(),
            pending: Vec::new(),
            lines_sent: 0,
            lines_received: 0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// True when open and not asked to close
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && !self.close_signal.is_raised()
    }

    /// Port the link was opened on (empty before the first open)
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Settings the link was built with
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Handle that can close this link's traffic from another thread
    pub fn close_signal(&self) -> CloseSignal {
        self.close_signal.clone()
    }

    /// Lines sent and received since open
    pub fn counters(&self) -> (u64, u64) {
        (self.lines_sent, self.lines_received)
    }

    /// Open the named serial port
    pub fn open(&mut self, port: &str) -> Result<OpenOutcome, LinkError> {
        self.open_with(port, |name, config| {
            let channel = open_port(name, config.baud_rate, config.read_timeout())?;
            Ok(Box::new(channel) as Box<dyn Channel>)
        })
    }

    /// Open using a custom transport opener
    ///
    /// Blocks for the configured settle delay after the channel is opened and
    /// discards whatever the device printed while booting.
    pub fn open_with<F>(&mut self, port: &str, opener: F) -> Result<OpenOutcome, LinkError>
    where
        F: FnOnce(&str, &LinkConfig) -> Result<Box<dyn Channel>, LinkError>,
    {
        match self.state {
            LinkState::Connected => {
                tracing::info!(port = %self.port_name, "Already connected");
                return Ok(OpenOutcome::AlreadyConnected);
            }
            LinkState::Closed => return Err(LinkError::Closed),
            LinkState::Disconnected => {}
        }

        let mut channel = opener(port, &self.config)?;
        let connection_error = |e: std::io::Error| LinkError::Connection {
            port: port.to_string(),
            message: e.to_string(),
        };
        channel
            .set_timeout(self.config.read_timeout())
            .map_err(connection_error)?;

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            tracing::debug!(port, "Waiting {}ms for device to settle", settle.as_millis());
            std::thread::sleep(settle);
        }
        channel.clear_input().map_err(connection_error)?;

        self.channel = Some(channel);
        self.port_name = port.to_string();
        self.state = LinkState::Connected;
        self.pending.clear();
        tracing::info!(port, baud = self.config.baud_rate, "Link connected");
        Ok(OpenOutcome::Opened)
    }

    /// Release the handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.close_signal.raise();
        if self.state == LinkState::Connected {
            tracing::info!(port = %self.port_name, "Link closed");
        }
        self.channel = None;
        self.pending.clear();
        self.state = LinkState::Closed;
    }

    fn usable_channel(&mut self) -> Result<&mut Box<dyn Channel>, LinkError> {
        if self.close_signal.is_raised() {
            return Err(LinkError::Closed);
        }
        match self.state {
            LinkState::Connected => self.channel.as_mut().ok_or(LinkError::NotConnected),
            LinkState::Disconnected => Err(LinkError::NotConnected),
            LinkState::Closed => Err(LinkError::Closed),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let channel = self.usable_channel()?;
        channel.write_all(bytes)?;
        channel.flush()?;
        self.lines_sent = self.lines_sent.saturating_add(1);
        let text = String::from_utf8_lossy(bytes);
        tracing::debug!(line = %text.trim_end(), "Sent");
        Ok(())
    }

    /// Write `text` followed by a newline
    pub fn write_line(&mut self, text: &str) -> Result<(), LinkError> {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        self.write_bytes(&bytes)
    }

    /// Write a command in its wire form
    pub fn send_command(&mut self, command: &Command) -> Result<(), LinkError> {
        self.write_bytes(command.encode().as_bytes())
    }

    /// Pop one complete line from the reassembly buffer
    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        self.lines_received = self.lines_received.saturating_add(1);
        Some(String::from_utf8_lossy(&raw).trim().to_string())
    }

    /// Read one newline-terminated line, trimmed
    ///
    /// With `timeout = None` this blocks until a line arrives or the link is
    /// closed. With a timeout, `Ok(None)` means no complete line arrived in
    /// time; any partial line stays buffered for the next call.
    pub fn read_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>, LinkError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut chunk = [0u8; 64];

        loop {
            if let Some(line) = self.take_line() {
                tracing::debug!(%line, "Received");
                return Ok(Some(line));
            }

            let channel = self.usable_channel()?;
            match channel.read(&mut chunk) {
                Ok(0) => return Err(LinkError::Disconnected),
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    if self.pending.len() > MAX_LINE_LEN && !self.pending.contains(&b'\n') {
                        tracing::warn!(
                            bytes = self.pending.len(),
                            "Discarding unterminated fragment"
                        );
                        self.pending.clear();
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(LinkError::Io(e)),
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(self.take_line());
                }
            }
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
