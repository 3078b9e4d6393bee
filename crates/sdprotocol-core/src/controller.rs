//! Session controller
//!
//! Front-end facing glue: owns the serial link, starts at most one run at a
//! time on a background worker, relays pause/resume/stop as session flags and
//! exposes the status text to show.
//!
//! Shutdown order is fixed: signal stop, wait (bounded) for the worker to
//! exit, and only then close the link, so a write is never cut short.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{CatalogError, DeviceCycle, Protocol, ProtocolCatalog};
use crate::command::{Command, Movement, ValidationError};
use crate::config::ControllerConfig;
use crate::engine::{DeviceSyncEngine, PacedEngine, Pacer, ThreadPacer};
use crate::link::{
    auto_select_port, list_ports, Channel, CloseSignal, LinkConfig, LinkError, LinkState,
    OpenOutcome, SerialLink,
};
use crate::session::{ExecutionSession, RunMode, RunOutcome, RunStatus};

/// Poll interval while waiting for the worker to exit
const JOIN_POLL: Duration = Duration::from_millis(20);

/// Called exactly once with the final outcome when a worker exits
pub type CompletionCallback = Box<dyn FnOnce(RunOutcome) + Send + 'static>;

/// Errors returned by the controller
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Serial link failure
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Operator input rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Unknown or invalid catalog entry
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Another run is still active
    #[error("A protocol is already running")]
    ConcurrentRun,

    /// The link is not open
    #[error("Not connected; connect to a serial port first")]
    NotConnected,

    /// Auto-select needs exactly one port
    #[error("Cannot pick a port automatically ({available} available); select one")]
    PortSelectionRequired {
        /// Ports found at selection time
        available: usize,
    },

    /// No run to pause, resume or stop
    #[error("No protocol is running")]
    NoActiveRun,

    /// Resume requested on a run that is not paused
    #[error("The protocol is not paused")]
    NotPaused,

    /// Control not offered by this run mode
    #[error("{action} is not available for {mode} runs")]
    Unsupported {
        /// The rejected control, e.g. "pause"
        action: &'static str,
        /// Mode of the active run
        mode: RunMode,
    },

    /// The worker outlived the shutdown bound
    #[error("Worker did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    /// The OS refused to spawn the worker thread
    #[error("Failed to start worker thread: {0}")]
    Worker(#[source] std::io::Error),
}

struct ActiveRun {
    session: Arc<ExecutionSession>,
    worker: Option<JoinHandle<()>>,
}

fn lock_link(link: &Mutex<SerialLink>) -> MutexGuard<'_, SerialLink> {
    match link.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Single-flight run controller
pub struct SessionController {
    config: ControllerConfig,
    catalog: ProtocolCatalog,
    pacer: Arc<dyn Pacer>,
    link: Arc<Mutex<SerialLink>>,
    close_signal: CloseSignal,
    active: Option<ActiveRun>,
    /// Status shown when no run has started since the last connect
    message: String,
}

impl SessionController {
    /// Create a controller pacing with real sleeps
    pub fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        Self::with_pacer(config, Arc::new(ThreadPacer))
    }

    /// Create a controller with a custom pacer
    pub fn with_pacer(
        config: ControllerConfig,
        pacer: Arc<dyn Pacer>,
    ) -> Result<Self, ControllerError> {
        let catalog = config.catalog()?;
        let link = SerialLink::new(config.link.clone());
        let close_signal = link.close_signal();
        Ok(Self {
            config,
            catalog,
            pacer,
            link: Arc::new(Mutex::new(link)),
            close_signal,
            active: None,
            message: "Select a serial port and connect.".to_string(),
        })
    }

    /// Configuration the controller was built with
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Protocols and cycles available to start
    pub fn catalog(&self) -> &ProtocolCatalog {
        &self.catalog
    }

    /// Session of the current or most recent run
    pub fn session(&self) -> Option<Arc<ExecutionSession>> {
        self.active.as_ref().map(|a| Arc::clone(&a.session))
    }

    /// True while a worker is executing a run
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.session.is_running())
    }

    /// Status text for display
    pub fn status(&self) -> String {
        match &self.active {
            Some(active) => active.session.status().to_string(),
            None => self.message.clone(),
        }
    }

    /// True when the link is open (or busy with a run)
    pub fn is_connected(&self) -> bool {
        self.is_running() || lock_link(&self.link).is_connected()
    }

    /// Reject while a run is live; forget a finished one
    fn ensure_idle(&mut self) -> Result<(), ControllerError> {
        if let Some(active) = &self.active {
            if active.session.is_running() {
                tracing::warn!(
                    running = active.session.protocol(),
                    "Rejected request: a protocol is already running"
                );
                return Err(ControllerError::ConcurrentRun);
            }
        }
        if let Some(finished) = self.active.take() {
            self.message = finished.session.status().to_string();
            if let Some(worker) = finished.worker.filter(|w| w.is_finished()) {
                let _ = worker.join();
            }
        }
        Ok(())
    }

    /// Open the serial link on `port`
    pub fn connect(&mut self, port: &str) -> Result<OpenOutcome, ControllerError> {
        self.connect_with(port, |name, config| {
            let channel =
                crate::link::serial::open_port(name, config.baud_rate, config.read_timeout())?;
            Ok(Box::new(channel) as Box<dyn Channel>)
        })
    }

    /// Open the serial link through a custom transport opener
    pub fn connect_with<F>(
        &mut self,
        port: &str,
        opener: F,
    ) -> Result<OpenOutcome, ControllerError>
    where
        F: FnOnce(&str, &LinkConfig) -> Result<Box<dyn Channel>, LinkError>,
    {
        if self.is_running() {
            return Ok(OpenOutcome::AlreadyConnected);
        }
        self.ensure_idle()?;

        let mut link = lock_link(&self.link);
        if link.state() == LinkState::Closed {
            *link = SerialLink::new(self.config.link.clone());
            self.close_signal = link.close_signal();
        }

        match link.open_with(port, opener) {
            Ok(outcome) => {
                self.message = format!("Connected to {}.", link.port_name());
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(port, "Connection failed: {e}");
                self.message = "Connection failed.".to_string();
                Err(e.into())
            }
        }
    }

    /// Connect to the configured port, or to the only port present
    pub fn connect_auto(&mut self) -> Result<OpenOutcome, ControllerError> {
        if let Some(port) = self.config.link.port.clone() {
            return self.connect(&port);
        }
        let ports = list_ports();
        match auto_select_port(&ports) {
            Some(port) => {
                let name = port.name.clone();
                self.connect(&name)
            }
            None => {
                self.message = "Please select a serial port to connect.".to_string();
                Err(ControllerError::PortSelectionRequired {
                    available: ports.len(),
                })
            }
        }
    }

    fn spawn_worker<B>(
        &mut self,
        session: Arc<ExecutionSession>,
        on_complete: CompletionCallback,
        body: B,
    ) -> Result<Uuid, ControllerError>
    where
        B: FnOnce(&mut SerialLink, &ExecutionSession) -> RunOutcome + Send + 'static,
    {
        let link = Arc::clone(&self.link);
        let worker_session = Arc::clone(&session);
        let worker = thread::Builder::new()
            .name(format!("run-{}", session.protocol()))
            .spawn(move || {
                let outcome = {
                    let mut guard = lock_link(&link);
                    let result =
                        catch_unwind(AssertUnwindSafe(|| body(&mut guard, &worker_session)));
                    result.unwrap_or_else(|panic| {
                        let detail = format!("engine panicked: {}", panic_message(&*panic));
                        tracing::error!("{detail}");
                        worker_session.finish(RunStatus::Failed(detail))
                    })
                };
                on_complete(outcome);
            })
            .map_err(|e| {
                session.finish(RunStatus::Failed(e.to_string()));
                ControllerError::Worker(e)
            })?;

        let id = session.id();
        self.active = Some(ActiveRun {
            session,
            worker: Some(worker),
        });
        Ok(id)
    }

    fn prepare_start(&mut self) -> Result<(), ControllerError> {
        self.ensure_idle()?;
        if !lock_link(&self.link).is_connected() {
            tracing::warn!("Rejected start: not connected");
            return Err(ControllerError::NotConnected);
        }
        Ok(())
    }

    /// Start a catalog protocol on the software-paced engine
    pub fn start<F>(&mut self, name: &str, on_complete: F) -> Result<Uuid, ControllerError>
    where
        F: FnOnce(RunOutcome) + Send + 'static,
    {
        let protocol = self.catalog.protocol(name)?.clone();
        self.start_protocol(protocol, on_complete)
    }

    /// Start an arbitrary protocol on the software-paced engine
    pub fn start_protocol<F>(
        &mut self,
        protocol: Protocol,
        on_complete: F,
    ) -> Result<Uuid, ControllerError>
    where
        F: FnOnce(RunOutcome) + Send + 'static,
    {
        self.prepare_start()?;
        let session = Arc::new(ExecutionSession::new(
            protocol.name(),
            RunMode::SoftwarePaced,
            protocol.len(),
        ));
        session.set_status(RunStatus::Running {
            step: 0,
            total: protocol.len(),
        });
        let engine = PacedEngine::new(self.config.pacing.clone(), Arc::clone(&self.pacer));
        self.spawn_worker(session, Box::new(on_complete), move |link, session| {
            engine.run(&protocol, link, session)
        })
    }

    /// Start a catalog cycle on the device-synchronized engine
    pub fn start_device_sync<F>(
        &mut self,
        name: &str,
        on_complete: F,
    ) -> Result<Uuid, ControllerError>
    where
        F: FnOnce(RunOutcome) + Send + 'static,
    {
        let cycle = self.catalog.cycle(name)?.clone();
        self.start_cycle(cycle, on_complete)
    }

    /// Start an arbitrary cycle on the device-synchronized engine
    pub fn start_cycle<F>(
        &mut self,
        cycle: DeviceCycle,
        on_complete: F,
    ) -> Result<Uuid, ControllerError>
    where
        F: FnOnce(RunOutcome) + Send + 'static,
    {
        self.prepare_start()?;
        let total = cycle.phase_a().len() + cycle.phase_b().len();
        let session = Arc::new(ExecutionSession::new(
            cycle.name(),
            RunMode::DeviceSynchronized,
            total,
        ));
        session.set_status(RunStatus::WaitingForDevice);
        let engine = DeviceSyncEngine::new(self.config.pacing.clone(), Arc::clone(&self.pacer));
        self.spawn_worker(session, Box::new(on_complete), move |link, session| {
            engine.run(&cycle, link, session)
        })
    }

    fn running_session(&self, action: &'static str) -> Result<&ExecutionSession, ControllerError> {
        let session = match &self.active {
            Some(active) if active.session.is_running() => active.session.as_ref(),
            _ => {
                tracing::warn!(action, "No protocol is running");
                return Err(ControllerError::NoActiveRun);
            }
        };
        if session.mode() != RunMode::SoftwarePaced {
            return Err(ControllerError::Unsupported {
                action,
                mode: session.mode(),
            });
        }
        Ok(session)
    }

    /// Hold the run at the next step boundary
    pub fn pause(&self) -> Result<(), ControllerError> {
        let session = self.running_session("pause")?;
        session.set_paused(true);
        tracing::info!(protocol = session.protocol(), "Pause requested");
        Ok(())
    }

    /// Release a paused run
    pub fn resume(&self) -> Result<(), ControllerError> {
        let session = self.running_session("resume")?;
        if !session.is_paused() {
            return Err(ControllerError::NotPaused);
        }
        session.set_paused(false);
        tracing::info!(protocol = session.protocol(), "Resume requested");
        Ok(())
    }

    /// End the run at the next step boundary
    pub fn stop(&self) -> Result<(), ControllerError> {
        let session = self.running_session("stop")?;
        session.request_stop();
        tracing::info!(protocol = session.protocol(), "Stop requested");
        Ok(())
    }

    /// Validate operator text and send one command immediately
    pub fn send_single(&mut self, motor: &str, led: &str) -> Result<Command, ControllerError> {
        let command = Command::from_input(Movement::Forward, motor, led)?;
        self.ensure_idle()?;

        let mut link = lock_link(&self.link);
        if !link.is_connected() {
            return Err(ControllerError::NotConnected);
        }
        match link.send_command(&command) {
            Ok(()) => {
                self.message = format!("Command sent: {command}");
                Ok(command)
            }
            Err(e) => {
                self.message = "Failed to send command.".to_string();
                Err(e.into())
            }
        }
    }

    /// Wait up to `timeout` for the worker to exit
    fn join_worker(&mut self, timeout: Duration) -> Result<(), ControllerError> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        if let Some(worker) = active.worker.take() {
            let deadline = Instant::now() + timeout;
            while !worker.is_finished() {
                if Instant::now() >= deadline {
                    tracing::warn!(
                        protocol = active.session.protocol(),
                        "Worker still busy after {timeout:?}; leaving link open"
                    );
                    active.worker = Some(worker);
                    self.active = Some(active);
                    return Err(ControllerError::ShutdownTimeout(timeout));
                }
                thread::sleep(JOIN_POLL);
            }
            if worker.join().is_err() {
                tracing::warn!("Worker exited by panic");
            }
        }
        self.message = active.session.status().to_string();
        Ok(())
    }

    /// Stop any run, wait for the worker, then close the link
    ///
    /// A paced run stops at its next step boundary; a device-synchronized
    /// run is cancelled by failing its pending read. If the worker does not
    /// exit in time the link is left to it and `ShutdownTimeout` is returned.
    pub fn disconnect(&mut self) -> Result<(), ControllerError> {
        if let Some(active) = &self.active {
            if active.session.is_running() {
                active.session.request_stop();
                active.session.set_paused(false);
                // Only a device wait can block indefinitely
                if active.session.mode() == RunMode::DeviceSynchronized {
                    self.close_signal.raise();
                }
            }
        }
        self.join_worker(self.config.shutdown_timeout())?;

        lock_link(&self.link).close();
        self.message = "Disconnected.".to_string();
        Ok(())
    }

    /// Application exit: same sequence as [`disconnect`](Self::disconnect)
    pub fn shutdown(&mut self) -> Result<(), ControllerError> {
        self.disconnect()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Shutdown incomplete: {e}");
        }
    }
}
