//! Helpers shared by the coordinator integration tests.

#![allow(dead_code, clippy::panic)]

use std::fmt::Debug;
use std::time::Duration;

use consort_core::{CoordinatorServer, Mailboxes, ServerConfig, ServerHandle, TurnMode};
use consort_envs::{Board, Countdown, CountdownConfig, Move, TicTacToe};
use consort_types::{Delivery, Fault, Message, ParticipantId, Reply};

/// Upper bound on any blocking wait in a test.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// How long to listen before concluding nothing was sent.
pub const QUIET: Duration = Duration::from_millis(100);

/// The moves 0, 1, 0, 1, 0 play in the reference game; participant 0 wins
/// down the first column.
pub const TIC_TAC_TOE_MOVES: [[usize; 2]; 5] = [[0, 0], [0, 1], [1, 0], [1, 1], [2, 0]];

/// Actions used with the countdown game.
pub const COUNTDOWN_ACTIONS: [u64; 8] = [0, 1, 2, 3, 0, 1, 2, 3];

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Start a tic-tac-toe coordinator driven through raw messages.
pub fn start_tic_tac_toe() -> ServerHandle<Move, Board> {
    init_tracing();
    let handle = CoordinatorServer::new(TicTacToe::default(), &ServerConfig::default())
        .start()
        .unwrap();
    assert!(handle.is_running());
    handle
}

/// Start a countdown coordinator driven through raw messages.
pub fn start_countdown(config: CountdownConfig, mode: TurnMode) -> ServerHandle<u64, u64> {
    init_tracing();
    let handle = CoordinatorServer::new(
        Countdown::new(config),
        &ServerConfig::default().with_mode(mode),
    )
    .start()
    .unwrap();
    assert!(handle.is_running());
    handle
}

/// Reset request from participant `p`.
pub fn reset<A>(p: usize) -> Message<A> {
    Message::ResetRequested {
        participant: ParticipantId(p),
    }
}

/// Action from participant `p`.
pub fn act<A>(p: usize, action: A) -> Message<A> {
    Message::ActionSubmitted {
        participant: ParticipantId(p),
        action: Some(action),
    }
}

/// No-op check-in from participant `p`.
pub fn pass<A>(p: usize) -> Message<A> {
    Message::ActionSubmitted {
        participant: ParticipantId(p),
        action: None,
    }
}

/// The next reply for `p`, failing the test after [`TIMEOUT`].
pub fn next_reply<A, O>(boxes: &Mailboxes<A, O>, p: usize) -> Reply<O> {
    boxes
        .recv_out_timeout(ParticipantId(p), TIMEOUT)
        .unwrap_or_else(|| panic!("no reply for participant {p} within {TIMEOUT:?}"))
}

/// The next reply for `p`, which must be an observation.
pub fn expect_observation<A, O: Debug>(boxes: &Mailboxes<A, O>, p: usize) -> Delivery<O> {
    match next_reply(boxes, p) {
        Reply::Observation(delivery) => delivery,
        other => panic!("expected an observation for participant {p}, got {other:?}"),
    }
}

/// The next reply for `p`, which must be an error.
pub fn expect_fault<A, O: Debug>(boxes: &Mailboxes<A, O>, p: usize) -> Fault {
    match next_reply(boxes, p) {
        Reply::Error(fault) => fault,
        other => panic!("expected an error for participant {p}, got {other:?}"),
    }
}

/// Nothing arrives for `p` within [`QUIET`].
pub fn assert_silent<A, O: Debug>(boxes: &Mailboxes<A, O>, p: usize) {
    if let Some(reply) = boxes.recv_out_timeout(ParticipantId(p), QUIET) {
        panic!("participant {p} unexpectedly received {reply:?}");
    }
}
