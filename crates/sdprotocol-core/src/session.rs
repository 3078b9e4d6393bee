//! Execution session
//!
//! Runtime record of one protocol run. The worker thread updates progress
//! and status; the controller only raises or clears the stop/pause flags.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Which engine drives a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Paced by declared durations, controllable from software
    SoftwarePaced,
    /// Gated by sentinel lines from the device
    DeviceSynchronized,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::SoftwarePaced => f.write_str("software-paced"),
            RunMode::DeviceSynchronized => f.write_str("device-synchronized"),
        }
    }
}

/// Run status as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created, not yet started
    Idle,
    /// Sending step `step` of `total` (1-based)
    Running {
        /// One-based step being executed
        step: usize,
        /// Steps in the current protocol or phase pair
        total: usize,
    },
    /// Held at a step boundary
    Paused,
    /// Blocked until the device sends `CONTINUE`
    WaitingForDevice,
    /// All steps sent
    Completed,
    /// Halted by a stop request
    Stopped,
    /// Device sent `STOP`
    Finished,
    /// Halted by a link failure
    Failed(String),
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => f.write_str("idle"),
            RunStatus::Running { step, total } => write!(f, "running step {step}/{total}"),
            RunStatus::Paused => f.write_str("paused"),
            RunStatus::WaitingForDevice => f.write_str("waiting for CONTINUE"),
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Stopped => f.write_str("stopped"),
            RunStatus::Finished => f.write_str("finished"),
            RunStatus::Failed(detail) => write!(f, "failed: {detail}"),
        }
    }
}

/// Final result of a run, delivered once to the completion callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Terminal status of the run
    pub status: RunStatus,
    /// Commands written to the link
    pub steps_sent: usize,
    /// Device cycles completed (device-synchronized runs only)
    pub cycles: usize,
    /// When the session was created
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal status
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// Wall-clock length of the run
    pub fn elapsed(&self) -> TimeDelta {
        self.finished_at - self.started_at
    }
}

/// Live record of one run, shared between the controller and the worker
#[derive(Debug)]
pub struct ExecutionSession {
    id: Uuid,
    protocol: String,
    mode: RunMode,
    total_steps: usize,
    started_at: DateTime<Utc>,
    stop_requested: AtomicBool,
    paused: AtomicBool,
    running: AtomicBool,
    current_step: AtomicUsize,
    steps_sent: AtomicUsize,
    cycles: AtomicUsize,
    status: Mutex<RunStatus>,
}

impl ExecutionSession {
    /// Record for a run that is about to start
    pub fn new(protocol: impl Into<String>, mode: RunMode, total_steps: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            protocol: protocol.into(),
            mode,
            total_steps,
            started_at: Utc::now(),
            stop_requested: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(true),
            current_step: AtomicUsize::new(0),
            steps_sent: AtomicUsize::new(0),
            cycles: AtomicUsize::new(0),
            status: Mutex::new(RunStatus::Idle),
        }
    }

    /// Unique run identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the protocol or cycle being run
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Engine driving this run
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Steps per pass (both phases for a device cycle)
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// When the session was created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Ask the run to end at the next step boundary
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// True once a stop was requested
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Set or clear the pause request
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// True while a pause is requested
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// False once the run reached a terminal status
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Index of the next step to send
    pub fn current_step(&self) -> usize {
        self.current_step.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_step(&self) -> usize {
        self.current_step.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_step(&self) {
        self.current_step.store(0, Ordering::SeqCst);
    }

    /// Commands written to the link so far, across all cycles
    pub fn steps_sent(&self) -> usize {
        self.steps_sent.load(Ordering::SeqCst)
    }

    pub(crate) fn record_sent(&self) -> usize {
        self.steps_sent.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Device cycles completed so far
    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    pub(crate) fn complete_cycle(&self) -> usize {
        self.cycles.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Latest status
    pub fn status(&self) -> RunStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_status(&self, status: RunStatus) {
        match self.status.lock() {
            Ok(mut current) => *current = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    /// Record the final status and mark the session no longer running
    pub(crate) fn finish(&self, status: RunStatus) -> RunOutcome {
        self.set_status(status.clone());
        self.running.store(false, Ordering::SeqCst);
        RunOutcome {
            status,
            steps_sent: self.steps_sent(),
            cycles: self.cycles(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
