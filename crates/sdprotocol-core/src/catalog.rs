//! Protocol catalog
//!
//! Named, immutable command sequences. The built-in entries are the
//! procedures the device is used for; more can be added from configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::command::Command;

/// Catalog lookup and registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No protocol with this name
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// No device cycle with this name
    #[error("Unknown device cycle: {0}")]
    UnknownCycle(String),

    /// Name already used by a protocol or cycle
    #[error("Duplicate catalog entry: {0}")]
    Duplicate(String),

    /// Entry has no commands
    #[error("Protocol '{0}' has no steps")]
    Empty(String),
}

/// An ordered, named sequence of commands
///
/// Cloning shares the command list; a protocol is never mutated after it is
/// built, so several runs may hold the same one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    name: String,
    commands: Arc<[Command]>,
}

impl Protocol {
    /// Build a protocol from its steps
    pub fn new(name: impl Into<String>, commands: impl Into<Arc<[Command]>>) -> Self {
        Self {
            name: name.into(),
            commands: commands.into(),
        }
    }

    /// Catalog name, e.g. "Step 1"
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in send order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when there are no steps
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sum of declared motor durations, in time units
    pub fn total_motor_units(&self) -> u64 {
        self.commands.iter().map(|c| c.motor_duration() as u64).sum()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} steps)", self.name, self.commands.len())
    }
}

/// Two-phase procedure gated by the device's button
///
/// Phase A runs after the first `CONTINUE`, phase B after the second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCycle {
    name: String,
    phase_a: Protocol,
    phase_b: Protocol,
}

impl DeviceCycle {
    /// Build a cycle; phases are named after it
    pub fn new(name: impl Into<String>, phase_a: Vec<Command>, phase_b: Vec<Command>) -> Self {
        let name = name.into();
        Self {
            phase_a: Protocol::new(format!("{name} / phase A"), phase_a),
            phase_b: Protocol::new(format!("{name} / phase B"), phase_b),
            name,
        }
    }

    /// Catalog name, e.g. "SD"
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sent after the first `CONTINUE`
    pub fn phase_a(&self) -> &Protocol {
        &self.phase_a
    }

    /// Sent after the second `CONTINUE`
    pub fn phase_b(&self) -> &Protocol {
        &self.phase_b
    }
}

/// Serialized form of a protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDef {
    /// Unique catalog name
    pub name: String,
    /// Commands in send order
    pub steps: Vec<Command>,
}

/// Serialized form of a device cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleDef {
    /// Unique catalog name
    pub name: String,
    /// Commands sent after the first `CONTINUE`
    pub phase_a: Vec<Command>,
    /// Commands sent after the second `CONTINUE`
    pub phase_b: Vec<Command>,
}

/// Name of the first built-in software-paced protocol
pub const STEP_1: &str = "Step 1";
/// Name of the second built-in software-paced protocol
pub const STEP_2: &str = "Step 2";
/// Name of the built-in button-driven cycle
pub const SD_CYCLE: &str = "SD";

const HALF: u32 = 30;

fn step_1() -> Protocol {
    let mut steps = vec![Command::forward(HALF, 0); 3];
    steps.extend(vec![Command::forward(HALF, HALF); 4]);
    steps.push(Command::forward(0, 0));
    Protocol::new(STEP_1, steps)
}

fn step_2() -> Protocol {
    let mut steps = vec![Command::forward(HALF, HALF); 4];
    steps.extend(vec![Command::forward(HALF, 0); 3]);
    steps.push(Command::forward(0, 0));
    Protocol::new(STEP_2, steps)
}

fn sd_cycle() -> DeviceCycle {
    let one = 6;
    let two = 12;
    DeviceCycle::new(
        SD_CYCLE,
        vec![Command::forward(two, 0), Command::forward(one, one)],
        vec![Command::forward(one, one), Command::forward(two, 0)],
    )
}

/// Lookup table of protocols and device cycles
#[derive(Debug, Clone, Default)]
pub struct ProtocolCatalog {
    protocols: Vec<Protocol>,
    cycles: Vec<DeviceCycle>,
}

impl ProtocolCatalog {
    /// Catalog with no entries
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog with the built-in procedures
    pub fn builtin() -> Self {
        Self {
            protocols: vec![step_1(), step_2()],
            cycles: vec![sd_cycle()],
        }
    }

    fn name_taken(&self, name: &str) -> bool {
        self.protocols.iter().any(|p| p.name() == name)
            || self.cycles.iter().any(|c| c.name() == name)
    }

    /// Register a software-paced protocol
    pub fn add_protocol(&mut self, protocol: Protocol) -> Result<(), CatalogError> {
        if protocol.is_empty() {
            return Err(CatalogError::Empty(protocol.name().to_string()));
        }
        if self.name_taken(protocol.name()) {
            return Err(CatalogError::Duplicate(protocol.name().to_string()));
        }
        self.protocols.push(protocol);
        Ok(())
    }

    /// Register a device cycle
    pub fn add_cycle(&mut self, cycle: DeviceCycle) -> Result<(), CatalogError> {
        if cycle.phase_a().is_empty() && cycle.phase_b().is_empty() {
            return Err(CatalogError::Empty(cycle.name().to_string()));
        }
        if self.name_taken(cycle.name()) {
            return Err(CatalogError::Duplicate(cycle.name().to_string()));
        }
        self.cycles.push(cycle);
        Ok(())
    }

    /// Register serialized definitions, stopping at the first bad entry
    pub fn extend_from_defs(
        &mut self,
        protocols: &[ProtocolDef],
        cycles: &[CycleDef],
    ) -> Result<(), CatalogError> {
        for def in protocols {
            self.add_protocol(Protocol::new(def.name.clone(), def.steps.clone()))?;
        }
        for def in cycles {
            self.add_cycle(DeviceCycle::new(
                def.name.clone(),
                def.phase_a.clone(),
                def.phase_b.clone(),
            ))?;
        }
        Ok(())
    }

    /// Look up a software-paced protocol
    pub fn protocol(&self, name: &str) -> Result<&Protocol, CatalogError> {
        self.protocols
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| CatalogError::UnknownProtocol(name.to_string()))
    }

    /// Look up a device cycle
    pub fn cycle(&self, name: &str) -> Result<&DeviceCycle, CatalogError> {
        self.cycles
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| CatalogError::UnknownCycle(name.to_string()))
    }

    /// All protocols in registration order
    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// All device cycles in registration order
    pub fn cycles(&self) -> &[DeviceCycle] {
        &self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_step_1() {
        let catalog = ProtocolCatalog::builtin();
        let lines: Vec<String> = catalog
            .protocol(STEP_1)
            .unwrap()
            .commands()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(
            lines,
            vec![
                "FORWARD 30 LED 0",
                "FORWARD 30 LED 0",
                "FORWARD 30 LED 0",
                "FORWARD 30 LED 30",
                "FORWARD 30 LED 30",
                "FORWARD 30 LED 30",
                "FORWARD 30 LED 30",
                "FORWARD 0 LED 0",
            ]
        );
    }

    #[test]
    fn test_builtin_step_2_mirrors_step_1() {
        let catalog = ProtocolCatalog::builtin();
        let step_2 = catalog.protocol(STEP_2).unwrap();
        assert_eq!(step_2.len(), 8);
        assert_eq!(step_2.commands()[0], Command::forward(30, 30));
        assert_eq!(step_2.commands()[4], Command::forward(30, 0));
        assert_eq!(step_2.commands()[7], Command::forward(0, 0));
        assert_eq!(step_2.total_motor_units(), 210);
    }

    #[test]
    fn test_builtin_sd_cycle() {
        let catalog = ProtocolCatalog::builtin();
        let cycle = catalog.cycle(SD_CYCLE).unwrap();
        assert_eq!(
            cycle.phase_a().commands(),
            &[Command::forward(12, 0), Command::forward(6, 6)]
        );
        assert_eq!(
            cycle.phase_b().commands(),
            &[Command::forward(6, 6), Command::forward(12, 0)]
        );
    }

    #[test]
    fn test_unknown_names() {
        let catalog = ProtocolCatalog::builtin();
        assert_eq!(
            catalog.protocol("Step 9").unwrap_err(),
            CatalogError::UnknownProtocol("Step 9".into())
        );
        assert!(catalog.cycle(STEP_1).is_err());
    }

    #[test]
    fn test_duplicate_and_empty_rejected() {
        let mut catalog = ProtocolCatalog::builtin();
        let dup = Protocol::new(SD_CYCLE, vec![Command::forward(1, 1)]);
        assert_eq!(
            catalog.add_protocol(dup),
            Err(CatalogError::Duplicate(SD_CYCLE.into()))
        );
        assert_eq!(
            catalog.add_protocol(Protocol::new("nothing", Vec::<Command>::new())),
            Err(CatalogError::Empty("nothing".into()))
        );
    }

    #[test]
    fn test_extend_from_defs() {
        let json = r#"[{"name": "Rinse", "steps": [
            {"movement": "FORWARD", "motor_duration": 5, "led_duration": 0}
        ]}]"#;
        let defs: Vec<ProtocolDef> = serde_json::from_str(json).unwrap();

        let mut catalog = ProtocolCatalog::empty();
        catalog.extend_from_defs(&defs, &[]).unwrap();
        assert_eq!(
            catalog.protocol("Rinse").unwrap().commands(),
            &[Command::forward(5, 0)]
        );
    }

    #[test]
    fn test_clone_shares_commands() {
        let catalog = ProtocolCatalog::builtin();
        let a = catalog.protocol(STEP_1).unwrap().clone();
        let b = a.clone();
        assert!(std::ptr::eq(a.commands().as_ptr(), b.commands().as_ptr()));
    }
}
