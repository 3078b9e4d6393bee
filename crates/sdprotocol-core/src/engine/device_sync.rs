use std::sync::Arc;

use super::{Pacer, PacingConfig, SENTINEL_CONTINUE, SENTINEL_STOP};
use crate::catalog::{DeviceCycle, Protocol};
use crate::link::{LinkError, SerialLink};
use crate::session::{ExecutionSession, RunOutcome, RunStatus};

/// Runs a device cycle, advancing only on sentinel lines from the device
///
/// Sentinel reads block without a timeout because a person has to press the
/// button. The only way to cancel is to close the link, which fails the
/// pending read and ends the run as `Failed`.
pub struct DeviceSyncEngine {
    pacing: PacingConfig,
    pacer: Arc<dyn Pacer>,
}

impl DeviceSyncEngine {
    /// Create an engine sleeping through `pacer`
    pub fn new(pacing: PacingConfig, pacer: Arc<dyn Pacer>) -> Self {
        Self { pacing, pacer }
    }

    /// Block until the device sends `CONTINUE`; other lines are noise
    fn await_continue(
        &self,
        link: &mut SerialLink,
        session: &ExecutionSession,
    ) -> Result<(), LinkError> {
        session.set_status(RunStatus::WaitingForDevice);
        loop {
            match link.read_line(None)? {
                Some(line) if line == SENTINEL_CONTINUE => return Ok(()),
                Some(line) => tracing::debug!(%line, "Ignoring line while waiting for CONTINUE"),
                None => {}
            }
        }
    }

    fn send_phase(
        &self,
        phase: &Protocol,
        link: &mut SerialLink,
        session: &ExecutionSession,
    ) -> Result<(), LinkError> {
        tracing::info!(phase = phase.name(), "Phase started");
        for command in phase.commands() {
            session.set_status(RunStatus::Running {
                step: session.current_step() + 1,
                total: session.total_steps(),
            });
            link.send_command(command)?;
            session.record_sent();
            self.pacer.sleep(self.pacing.step_wait(command));
            session.advance_step();
        }
        Ok(())
    }

    fn run_cycles(
        &self,
        cycle: &DeviceCycle,
        link: &mut SerialLink,
        session: &ExecutionSession,
    ) -> Result<(), LinkError> {
        loop {
            session.reset_step();
            tracing::info!(cycle = cycle.name(), "Press button to start");
            self.await_continue(link, session)?;
            self.send_phase(cycle.phase_a(), link, session)?;

            tracing::info!(cycle = cycle.name(), "Rotate device, press button for next step");
            self.await_continue(link, session)?;
            self.send_phase(cycle.phase_b(), link, session)?;

            let cycles = session.complete_cycle();
            tracing::info!(cycle = cycle.name(), cycles, "Cycle complete");

            // Anything other than STOP starts another cycle; that line is consumed
            match link.read_line(None)? {
                Some(line) if line == SENTINEL_STOP => return Ok(()),
                Some(line) => tracing::debug!(%line, "No STOP after cycle, repeating"),
                None => {}
            }
        }
    }

    /// Loop over `cycle` until the device sends `STOP` or the link fails
    pub fn run(
        &self,
        cycle: &DeviceCycle,
        link: &mut SerialLink,
        session: &ExecutionSession,
    ) -> RunOutcome {
        tracing::info!(
            cycle = cycle.name(),
            started_at = %session.started_at(),
            "Device-synchronized run started"
        );

        match self.run_cycles(cycle, link, session) {
            Ok(()) => {
                let outcome = session.finish(RunStatus::Finished);
                tracing::info!(
                    cycle = cycle.name(),
                    sent = outcome.steps_sent,
                    cycles = outcome.cycles,
                    elapsed_ms = outcome.elapsed().num_milliseconds(),
                    "Device requested STOP"
                );
                outcome
            }
            Err(e) => {
                let outcome = session.finish(RunStatus::Failed(e.to_string()));
                tracing::error!(
                    cycle = cycle.name(),
                    sent = outcome.steps_sent,
                    elapsed_ms = outcome.elapsed().num_milliseconds(),
                    "Run aborted: {e}"
                );
                outcome
            }
        }
    }
}
