use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Byte transport underneath a [`SerialLink`](super::SerialLink)
///
/// Reads are expected to honour a per-call timeout and report it as
/// `ErrorKind::TimedOut` (or `WouldBlock`); `Ok(0)` means the far end is gone.
pub trait Channel: Read + Write + Send {
    /// Set timeout for read operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop any bytes received but not yet read
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Serial port wrapper implementing [`Channel`]
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Channel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}
