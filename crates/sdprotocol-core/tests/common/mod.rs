//! Shared test doubles: a scripted in-memory channel and a recording pacer
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sdprotocol_core::engine::Pacer;
use sdprotocol_core::link::{Channel, LinkConfig, LinkError, OpenOutcome, SerialLink};

/// Something observable that happened during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(String),
    Sleep(Duration),
}

/// Ordered log shared by the channel and the pacer
pub type EventLog = Arc<Mutex<Vec<Event>>>;

#[derive(Default)]
struct WireState {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<String>,
    reads_past_end: usize,
    fail_writes_after: Option<usize>,
    eof_when_empty: bool,
}

/// Device end of a mock serial line
///
/// Chunks queued with [`Wire::feed`] are returned by reads in order; once the
/// script runs dry reads time out (or report EOF when configured) and are
/// counted in [`Wire::reads_past_end`].
#[derive(Clone, Default)]
pub struct Wire {
    state: Arc<Mutex<WireState>>,
    events: EventLog,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines(lines: &[&str]) -> Self {
        let wire = Self::new();
        for line in lines {
            wire.feed(format!("{line}\n").as_bytes());
        }
        wire
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.state.lock().unwrap().incoming.push_back(bytes.to_vec());
    }

    pub fn fail_writes_after(&self, successful: usize) {
        self.state.lock().unwrap().fail_writes_after = Some(successful);
    }

    pub fn eof_when_empty(&self) {
        self.state.lock().unwrap().eof_when_empty = true;
    }

    /// Every line written so far, newline included
    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn reads_past_end(&self) -> usize {
        self.state.lock().unwrap().reads_past_end
    }

    pub fn events(&self) -> EventLog {
        Arc::clone(&self.events)
    }

    pub fn event_snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn channel(&self) -> Box<dyn Channel> {
        Box::new(MockChannel(self.clone()))
    }

    /// Open `link` on this wire as port `mock`
    pub fn connect(&self, link: &mut SerialLink) -> Result<OpenOutcome, LinkError> {
        let wire = self.clone();
        link.open_with("mock", move |_, _| Ok(wire.channel()))
    }
}

struct MockChannel(Wire);

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.state.lock().unwrap();
        match state.incoming.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.incoming.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None => {
                state.reads_past_end += 1;
                if state.eof_when_empty {
                    return Ok(0);
                }
                drop(state);
                std::thread::sleep(Duration::from_millis(1));
                Err(io::Error::new(ErrorKind::TimedOut, "no data"))
            }
        }
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.state.lock().unwrap();
        if let Some(limit) = state.fail_writes_after {
            if state.written.len() >= limit {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
            }
        }
        let line = String::from_utf8_lossy(buf).into_owned();
        state.written.push(line.clone());
        self.0.events.lock().unwrap().push(Event::Write(line));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for MockChannel {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pacer that logs every sleep and optionally runs a hook
///
/// The hook receives the zero-based call index and the requested duration;
/// tests use it to pause or stop a run at a precise point.
pub struct RecordingPacer {
    events: EventLog,
    real_sleep: Duration,
    calls: Mutex<usize>,
    hook: Option<Box<dyn Fn(usize, Duration) + Send + Sync>>,
}

impl RecordingPacer {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            real_sleep: Duration::ZERO,
            calls: Mutex::new(0),
            hook: None,
        }
    }

    /// Actually sleep this long on every call, whatever was requested
    pub fn with_real_sleep(mut self, real_sleep: Duration) -> Self {
        self.real_sleep = real_sleep;
        self
    }

    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Sleep(d) => Some(*d),
                Event::Write(_) => None,
            })
            .collect()
    }
}

impl Pacer for RecordingPacer {
    fn sleep(&self, duration: Duration) {
        self.events.lock().unwrap().push(Event::Sleep(duration));
        let index = {
            let mut calls = self.calls.lock().unwrap();
            let index = *calls;
            *calls += 1;
            index
        };
        if let Some(hook) = &self.hook {
            hook(index, duration);
        }
        if !self.real_sleep.is_zero() {
            std::thread::sleep(self.real_sleep);
        }
    }
}

/// Route engine and link logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sdprotocol_core=debug")
        .with_test_writer()
        .try_init();
}

/// Link settings with no settle delay and a short read timeout
pub fn fast_link_config() -> LinkConfig {
    LinkConfig {
        port: None,
        read_timeout_ms: 10,
        settle_delay_ms: 0,
        ..LinkConfig::default()
    }
}

/// A link already connected to `wire`
pub fn connected_link(wire: &Wire) -> SerialLink {
    init_tracing();
    let mut link = SerialLink::new(fast_link_config());
    let outcome = wire.connect(&mut link).unwrap();
    assert_eq!(outcome, OpenOutcome::Opened);
    link
}

pub fn line(motor: u32, led: u32) -> String {
    format!("FORWARD {motor} LED {led}\n")
}
