mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{connected_link, line, Event, RecordingPacer, Wire};
use pretty_assertions::assert_eq;
use sdprotocol_core::catalog::{Protocol, ProtocolCatalog, STEP_1, STEP_2};
use sdprotocol_core::command::Command;
use sdprotocol_core::engine::{PacedEngine, PacingConfig};
use sdprotocol_core::session::{ExecutionSession, RunMode, RunStatus};

fn session_for(protocol: &Protocol) -> Arc<ExecutionSession> {
    Arc::new(ExecutionSession::new(
        protocol.name(),
        RunMode::SoftwarePaced,
        protocol.len(),
    ))
}

#[test]
fn test_two_step_scenario_sends_then_waits() {
    let wire = Wire::new();
    let mut link = connected_link(&wire);
    let pacer = Arc::new(RecordingPacer::new(wire.events()));
    let engine = PacedEngine::new(PacingConfig::default(), pacer);

    let protocol = Protocol::new("P", vec![Command::forward(30, 0), Command::forward(0, 0)]);
    let session = session_for(&protocol);
    let outcome = engine.run(&protocol, &mut link, &session);

    assert_eq!(
        wire.event_snapshot(),
        vec![
            Event::Write(line(30, 0)),
            Event::Sleep(Duration::from_millis(30_100)),
            Event::Write(line(0, 0)),
            Event::Sleep(Duration::from_millis(100)),
        ]
    );
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.steps_sent, 2);
    assert_eq!(session.current_step(), 2);
    assert!(!session.is_running());
    assert_eq!(session.status().to_string(), "completed");
}

#[test]
fn test_builtin_protocols_send_every_line_in_order() {
    let catalog = ProtocolCatalog::builtin();
    for name in [STEP_1, STEP_2] {
        let protocol = catalog.protocol(name).unwrap();
        let wire = Wire::new();
        let mut link = connected_link(&wire);
        let engine = PacedEngine::new(
            PacingConfig::default(),
            Arc::new(RecordingPacer::new(wire.events())),
        );

        let outcome = engine.run(protocol, &mut link, &session_for(protocol));

        let expected: Vec<String> = protocol.commands().iter().map(|c| c.encode()).collect();
        assert_eq!(wire.written(), expected);
        assert_eq!(outcome.steps_sent, protocol.len());
        assert_eq!(outcome.status, RunStatus::Completed);
    }
}

#[test]
fn test_stop_before_first_step_sends_nothing() {
    let wire = Wire::new();
    let mut link = connected_link(&wire);
    let engine = PacedEngine::new(
        PacingConfig::default(),
        Arc::new(RecordingPacer::new(wire.events())),
    );
    let protocol = ProtocolCatalog::builtin().protocol(STEP_1).unwrap().clone();
    let session = session_for(&protocol);
    session.request_stop();

    let outcome = engine.run(&protocol, &mut link, &session);

    assert!(wire.written().is_empty());
    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.steps_sent, 0);
}

#[test]
fn test_stop_is_honoured_at_next_boundary() {
    let wire = Wire::new();
    let mut link = connected_link(&wire);
    let protocol = ProtocolCatalog::builtin().protocol(STEP_2).unwrap().clone();
    let session = session_for(&protocol);

    let hook_session = Arc::clone(&session);
    let pacer = RecordingPacer::new(wire.events()).with_hook(move |call, _| {
        if call == 2 {
            hook_session.request_stop();
        }
    });
    let engine = PacedEngine::new(PacingConfig::default(), Arc::new(pacer));

    let outcome = engine.run(&protocol, &mut link, &session);

    // The step in flight when stop arrived still completes its wait
    assert_eq!(wire.written().len(), 3);
    assert_eq!(outcome.steps_sent, 3);
    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(session.current_step(), 3);
}

#[test]
fn test_pause_holds_then_resume_continues_in_order() {
    let wire = Wire::new();
    let mut link = connected_link(&wire);
    let protocol = Protocol::new(
        "P",
        vec![
            Command::forward(1, 0),
            Command::forward(2, 2),
            Command::forward(0, 0),
        ],
    );
    let session = session_for(&protocol);

    // Pause during step 1's wait; resume on the third poll
    let hook_session = Arc::clone(&session);
    let pacer = RecordingPacer::new(wire.events()).with_hook(move |call, _| match call {
        0 => hook_session.set_paused(true),
        3 => hook_session.set_paused(false),
        _ => {}
    });
    let engine = PacedEngine::new(PacingConfig::default(), Arc::new(pacer));

    let outcome = engine.run(&protocol, &mut link, &session);

    let poll = Duration::from_millis(500);
    assert_eq!(
        wire.event_snapshot(),
        vec![
            Event::Write(line(1, 0)),
            Event::Sleep(Duration::from_millis(1_100)),
            Event::Sleep(poll),
            Event::Sleep(poll),
            Event::Sleep(poll),
            Event::Write(line(2, 2)),
            Event::Sleep(Duration::from_millis(2_100)),
            Event::Write(line(0, 0)),
            Event::Sleep(Duration::from_millis(100)),
        ]
    );
    assert_eq!(outcome.status, RunStatus::Completed);
}

#[test]
fn test_stop_while_paused_ends_run() {
    let wire = Wire::new();
    let mut link = connected_link(&wire);
    let protocol = ProtocolCatalog::builtin().protocol(STEP_1).unwrap().clone();
    let session = session_for(&protocol);

    let hook_session = Arc::clone(&session);
    let pacer = RecordingPacer::new(wire.events()).with_hook(move |call, _| match call {
        0 => hook_session.set_paused(true),
        2 => hook_session.request_stop(),
        _ => {}
    });
    let engine = PacedEngine::new(PacingConfig::default(), Arc::new(pacer));

    let outcome = engine.run(&protocol, &mut link, &session);

    assert_eq!(wire.written(), vec![line(30, 0)]);
    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.steps_sent, 1);
}

#[test]
fn test_write_failure_halts_run() {
    let wire = Wire::new();
    wire.fail_writes_after(2);
    let mut link = connected_link(&wire);
    let pacer = Arc::new(RecordingPacer::new(wire.events()));
    let engine = PacedEngine::new(PacingConfig::default(), pacer.clone());
    let protocol = ProtocolCatalog::builtin().protocol(STEP_1).unwrap().clone();

    let outcome = engine.run(&protocol, &mut link, &session_for(&protocol));

    assert_eq!(wire.written().len(), 2);
    assert_eq!(outcome.steps_sent, 2);
    assert!(matches!(outcome.status, RunStatus::Failed(_)));
    // No wait is scheduled for the step that failed to send
    assert_eq!(pacer.sleeps().len(), 2);
}

#[test]
fn test_closed_link_fails_without_writing() {
    let wire = Wire::new();
    let mut link = connected_link(&wire);
    link.close();
    let engine = PacedEngine::new(
        PacingConfig::default(),
        Arc::new(RecordingPacer::new(wire.events())),
    );
    let protocol = Protocol::new("P", vec![Command::forward(1, 1)]);

    let outcome = engine.run(&protocol, &mut link, &session_for(&protocol));

    assert!(wire.written().is_empty());
    assert_eq!(outcome.status, RunStatus::Failed("Link closed".into()));
}

#[test]
fn test_time_unit_scales_waits() {
    let wire = Wire::new();
    let mut link = connected_link(&wire);
    let pacer = Arc::new(RecordingPacer::new(wire.events()));
    let pacing = PacingConfig {
        time_unit_ms: 10,
        settle_buffer_ms: 5,
        ..PacingConfig::default()
    };
    let engine = PacedEngine::new(pacing, pacer.clone());
    let protocol = Protocol::new("P", vec![Command::forward(3, 0), Command::forward(0, 9)]);

    engine.run(&protocol, &mut link, &session_for(&protocol));

    assert_eq!(
        pacer.sleeps(),
        vec![Duration::from_millis(35), Duration::from_millis(5)]
    );
}
