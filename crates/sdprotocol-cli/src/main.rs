//! `sdctl`: operator front-end for the SD protocol controller
//!
//! While a run is active, type a letter and Enter:
//! `p` pause, `r` resume, `s` stop, `q` disconnect.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use sdprotocol_core::link::list_ports;
use sdprotocol_core::prelude::*;

/// How often the status line is refreshed while waiting
const STATUS_POLL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/sdprotocol/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand)]
enum Action {
    /// List serial ports
    Ports,
    /// List protocols and device cycles
    Protocols,
    /// Run a software-paced protocol
    Run {
        /// Protocol name, e.g. "Step 1"
        name: String,
        #[arg(long)]
        port: Option<String>,
    },
    /// Run a button-driven device cycle until the device sends STOP
    Button {
        #[arg(long, default_value = SD_CYCLE)]
        cycle: String,
        #[arg(long)]
        port: Option<String>,
    },
    /// Send a single FORWARD command
    Send {
        /// Motor duration in whole units
        #[arg(allow_hyphen_values = true)]
        motor: String,
        /// LED duration in whole units
        #[arg(allow_hyphen_values = true)]
        led: String,
        #[arg(long)]
        port: Option<String>,
    },
}

enum Event {
    Input(String),
    Done(RunOutcome),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<ControllerConfig> {
    let Some(path) = path.or_else(ControllerConfig::default_path) else {
        tracing::debug!("No config directory on this platform, using defaults");
        return Ok(ControllerConfig::default());
    };
    ControllerConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn connect(controller: &mut SessionController, port: Option<String>) -> Result<()> {
    let result = match port {
        Some(port) => controller.connect(&port),
        None => controller.connect_auto(),
    };
    if let Err(e) = result {
        println!("{}", controller.status());
        return Err(e).context("Could not open the serial link");
    }
    println!("{}", controller.status());
    Ok(())
}

fn list_serial_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found.");
        return;
    }
    for port in ports {
        let detail: Vec<&str> = [port.manufacturer.as_deref(), port.product.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if detail.is_empty() {
            println!("{}", port.name);
        } else {
            println!("{}  ({})", port.name, detail.join(" "));
        }
    }
}

fn list_catalog(catalog: &ProtocolCatalog) {
    println!("Software-paced protocols:");
    for protocol in catalog.protocols() {
        println!(
            "  {:<12} {} steps, {} motor units",
            protocol.name(),
            protocol.len(),
            protocol.total_motor_units()
        );
    }
    println!("Device cycles:");
    for cycle in catalog.cycles() {
        println!(
            "  {:<12} phase A {} steps, phase B {} steps",
            cycle.name(),
            cycle.phase_a().len(),
            cycle.phase_b().len()
        );
    }
}

/// Forward stdin lines as events; ends quietly when stdin closes
fn spawn_input_reader(events: mpsc::Sender<Event>) {
    let spawned = thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if events.send(Event::Input(line.trim().to_lowercase())).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Keyboard control unavailable: {e}");
    }
}

fn handle_input(controller: &mut SessionController, input: &str) {
    let result = match input {
        "p" => controller.pause(),
        "r" => controller.resume(),
        "s" => controller.stop(),
        "q" => controller.disconnect(),
        "" => return,
        other => {
            println!("Unknown input {other:?}: p = pause, r = resume, s = stop, q = disconnect");
            return;
        }
    };
    if let Err(e) = result {
        println!("{e}");
    }
}

/// Relay keyboard input and print status changes until the run ends
///
/// `None` means every sender hung up without delivering an outcome.
fn supervise(
    controller: &mut SessionController,
    events: mpsc::Receiver<Event>,
) -> Option<RunOutcome> {
    let mut shown = controller.status();
    println!("{shown}");
    loop {
        match events.recv_timeout(STATUS_POLL) {
            Ok(Event::Input(input)) => handle_input(controller, &input),
            Ok(Event::Done(outcome)) => return Some(outcome),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return None,
        }
        let status = controller.status();
        if status != shown {
            println!("{status}");
            shown = status;
        }
    }
}

fn run_to_completion<F>(controller: &mut SessionController, start: F) -> Result<ExitCode>
where
    F: FnOnce(&mut SessionController, mpsc::Sender<Event>) -> Result<(), ControllerError>,
{
    let (tx, rx) = mpsc::channel();
    spawn_input_reader(tx.clone());
    start(controller, tx)?;

    let Some(outcome) = supervise(controller, rx) else {
        println!("Run ended without a result");
        controller.shutdown()?;
        return Ok(ExitCode::FAILURE);
    };
    let elapsed = outcome.elapsed();
    println!(
        "Run {}: {} commands sent{} in {}m {:02}s",
        outcome.status,
        outcome.steps_sent,
        if outcome.cycles > 0 {
            format!(", {} cycles", outcome.cycles)
        } else {
            String::new()
        },
        elapsed.num_minutes(),
        elapsed.num_seconds() % 60
    );
    controller.shutdown()?;

    Ok(match outcome.status {
        RunStatus::Failed(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn execute(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config)?;
    let mut controller = SessionController::new(config).context("Invalid protocol catalog")?;

    match cli.command {
        Action::Ports => list_serial_ports(),
        Action::Protocols => list_catalog(controller.catalog()),
        Action::Run { name, port } => {
            controller
                .catalog()
                .protocol(&name)
                .with_context(|| format!("Cannot run {name:?}"))?;
            connect(&mut controller, port)?;
            println!("Keys: p = pause, r = resume, s = stop, q = disconnect");
            return run_to_completion(&mut controller, |controller, tx| {
                controller
                    .start(&name, move |outcome| {
                        let _ = tx.send(Event::Done(outcome));
                    })
                    .map(|_| ())
            });
        }
        Action::Button { cycle, port } => {
            controller
                .catalog()
                .cycle(&cycle)
                .with_context(|| format!("Cannot run {cycle:?}"))?;
            connect(&mut controller, port)?;
            println!("Press the device button to begin; q = disconnect");
            return run_to_completion(&mut controller, |controller, tx| {
                controller
                    .start_device_sync(&cycle, move |outcome| {
                        let _ = tx.send(Event::Done(outcome));
                    })
                    .map(|_| ())
            });
        }
        Action::Send { motor, led, port } => {
            // Reject bad input before touching the port
            Command::from_input(Movement::Forward, &motor, &led)?;
            connect(&mut controller, port)?;
            controller.send_single(&motor, &led)?;
            println!("{}", controller.status());
            controller.shutdown()?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
