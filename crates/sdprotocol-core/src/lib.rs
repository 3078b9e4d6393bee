//! # SD Protocol Core Library
//!
//! Drives a motor + LED actuator over a serial link.
//!
//! This library provides:
//! - The command model and its ASCII wire form
//! - A line-oriented serial link with settle delay and line reassembly
//! - A catalog of named protocols and button-driven device cycles
//! - A software-paced engine with cooperative pause/resume/stop
//! - A device-synchronized engine gated by `CONTINUE`/`STOP` lines
//! - A single-flight session controller for front-ends
//!
//! ## Example
//!
//! ```rust,ignore
//! use sdprotocol_core::prelude::*;
//!
//! let mut controller = SessionController::new(ControllerConfig::default())?;
//! controller.connect("/dev/ttyACM0")?;
//!
//! controller.start(STEP_1, |outcome| println!("done: {}", outcome.status))?;
//! println!("{}", controller.status());
//!
//! controller.shutdown()?;
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod catalog;
pub mod command;
pub mod config;
pub mod controller;
pub mod engine;
pub mod link;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::{DeviceCycle, Protocol, ProtocolCatalog, SD_CYCLE, STEP_1, STEP_2};
    pub use crate::command::{Command, Movement, ValidationError};
    pub use crate::config::ControllerConfig;
    pub use crate::controller::{ControllerError, SessionController};
    pub use crate::engine::{DeviceSyncEngine, PacedEngine, Pacer, PacingConfig, ThreadPacer};
    pub use crate::link::{LinkError, LinkState, SerialLink};
    pub use crate::session::{ExecutionSession, RunMode, RunOutcome, RunStatus};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
