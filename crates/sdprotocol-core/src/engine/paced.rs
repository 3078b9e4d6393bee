use std::sync::Arc;

use super::{Pacer, PacingConfig};
use crate::catalog::Protocol;
use crate::link::SerialLink;
use crate::session::{ExecutionSession, RunOutcome, RunStatus};

/// Runs a protocol paced by each command's declared duration
///
/// Pause and stop are cooperative: both are observed only at step
/// boundaries, so a command and its settle wait always complete once begun.
pub struct PacedEngine {
    pacing: PacingConfig,
    pacer: Arc<dyn Pacer>,
}

impl PacedEngine {
    /// Create an engine sleeping through `pacer`
    pub fn new(pacing: PacingConfig, pacer: Arc<dyn Pacer>) -> Self {
        Self { pacing, pacer }
    }

    /// Hold while paused. Returns false if a stop arrived meanwhile.
    fn wait_while_paused(&self, session: &ExecutionSession) -> bool {
        if !session.is_paused() {
            return true;
        }
        tracing::info!(step = session.current_step(), "Run paused");
        session.set_status(RunStatus::Paused);
        while session.is_paused() {
            if session.stop_requested() {
                return false;
            }
            self.pacer.sleep(self.pacing.pause_poll());
        }
        tracing::info!(step = session.current_step(), "Run resumed");
        true
    }

    /// Execute `protocol` to completion, stop, or the first link failure
    pub fn run(
        &self,
        protocol: &Protocol,
        link: &mut SerialLink,
        session: &ExecutionSession,
    ) -> RunOutcome {
        let total = protocol.len();
        tracing::info!(
            protocol = protocol.name(),
            steps = total,
            started_at = %session.started_at(),
            "Run started"
        );

        for (index, command) in protocol.commands().iter().enumerate() {
            if session.stop_requested() || !self.wait_while_paused(session) {
                let outcome = session.finish(RunStatus::Stopped);
                tracing::info!(
                    protocol = protocol.name(),
                    sent = outcome.steps_sent,
                    elapsed_ms = outcome.elapsed().num_milliseconds(),
                    "Run stopped"
                );
                return outcome;
            }

            session.set_status(RunStatus::Running {
                step: index + 1,
                total,
            });
            if let Err(e) = link.send_command(command) {
                tracing::error!(protocol = protocol.name(), step = index + 1, "Send failed: {e}");
                return session.finish(RunStatus::Failed(e.to_string()));
            }
            session.record_sent();

            self.pacer.sleep(self.pacing.step_wait(command));
            session.advance_step();
        }

        let outcome = session.finish(RunStatus::Completed);
        tracing::info!(
            protocol = protocol.name(),
            sent = outcome.steps_sent,
            elapsed_ms = outcome.elapsed().num_milliseconds(),
            "Run completed"
        );
        outcome
    }
}
