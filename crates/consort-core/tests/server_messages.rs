//! Message-level tests for the coordinator control loop.
//!
//! Each test starts a real control-loop thread and drives it by writing
//! [`Message`]s straight into the inbound channel and reading each
//! participant's outbound channel with a timeout, so ordering bugs fail
//! instead of hanging.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::arithmetic_side_effects,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::too_many_lines
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use consort_core::{CoordinatorServer, LoopExit, ServerConfig, TurnMode};
use consort_envs::{CountdownConfig, Move};
use consort_types::{
    Fault, Info, Message, ParticipantId, Reply, ResetOutcome, Simulation, SimulationError, Space,
    StepOutcome,
};

use common::{
    COUNTDOWN_ACTIONS, QUIET, TIC_TAC_TOE_MOVES, TIMEOUT, act, assert_silent, expect_fault,
    expect_observation, next_reply, pass, reset, start_countdown, start_tic_tac_toe,
};

fn mv(i: usize) -> Move {
    Move::from(TIC_TAC_TOE_MOVES[i])
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn start_and_stop() {
    let handle = start_tic_tac_toe();
    let boxes = Arc::clone(handle.mailboxes());
    assert!(boxes.is_started());
    assert!(!boxes.is_finished());

    handle.stop(true);
    assert!(!handle.is_running());
    assert!(boxes.is_finished());
    assert_eq!(handle.exit(), Some(LoopExit::Shutdown));
    assert_eq!(handle.join(), Some(LoopExit::Shutdown));
}

#[test]
fn stop_is_idempotent() {
    let handle = start_tic_tac_toe();
    handle.stop(true);
    handle.stop(true);
    handle.stop(false);
    assert_eq!(handle.exit(), Some(LoopExit::Shutdown));
}

#[test]
fn stop_releases_every_participant() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    expect_observation(boxes, 0);

    handle.stop(true);
    for p in 0..2 {
        assert_eq!(next_reply(boxes, p), Reply::Shutdown);
    }
}

#[test]
fn external_error_ends_the_loop_and_releases_sessions() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    expect_observation(boxes, 0);

    handle.report_error("disk full");
    let expected = Fault::External {
        message: String::from("disk full"),
    };
    for p in 0..2 {
        assert_eq!(expect_fault(boxes, p), expected);
    }
    assert!(boxes.wait_finished(TIMEOUT));
    assert!(!handle.is_running());
    assert_eq!(handle.exit(), Some(LoopExit::Faulted(expected)));
}

#[test]
fn unknown_participant_is_ignored() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(act(9, mv(0)));
    boxes.send_in(reset(9));
    boxes.send_in(reset(0));
    expect_observation(boxes, 0);
    assert!(handle.is_running());
}

// ---------------------------------------------------------------------------
// Reset and transitions
// ---------------------------------------------------------------------------

#[test]
fn reset_delivers_the_initial_observation() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    let delivery = expect_observation(boxes, 0);
    let board = delivery.observation.as_ref().unwrap();
    assert_eq!(board.num_empty(), 9);
    assert_eq!(delivery.reward, 0.0);
    assert!(!delivery.is_terminal());
}

#[test]
fn action_before_reset_is_rejected() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(act(0, mv(0)));
    assert_eq!(
        expect_fault(boxes, 0),
        Fault::ActedWithoutReset {
            participant: ParticipantId(0)
        }
    );
    assert!(handle.is_running());
}

#[test]
fn transition() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);

    boxes.send_in(act(0, mv(0)));
    let first = expect_observation(boxes, 1);
    assert_eq!(first.observation.unwrap().get(0, 0), Some(0));

    boxes.send_in(act(1, mv(1)));
    let second = expect_observation(boxes, 0);
    assert_eq!(second.observation.unwrap().num_empty(), 7);
}

#[test]
fn transition_before_second_reset() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    expect_observation(boxes, 0);
    boxes.send_in(act(0, mv(0)));

    // Participant 1's delivery waits in its buffer until it resets.
    assert_silent(boxes, 1);
    boxes.send_in(reset(1));
    let delivery = expect_observation(boxes, 1);
    assert_eq!(delivery.observation.unwrap().get(0, 0), Some(0));

    boxes.send_in(act(1, mv(1)));
    expect_observation(boxes, 0);
}

#[test]
fn transition_countdown() {
    let handle = start_countdown(CountdownConfig::default(), TurnMode::Asynchronous);
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    assert_eq!(expect_observation(boxes, 0).observation, Some(0));

    boxes.send_in(act(0, COUNTDOWN_ACTIONS[2]));
    let delivery = expect_observation(boxes, 1);
    assert_eq!(delivery.observation, Some(1));
    assert_eq!(delivery.reward, 0.0);

    boxes.send_in(act(1, COUNTDOWN_ACTIONS[3]));
    let delivery = expect_observation(boxes, 0);
    assert_eq!(delivery.observation, Some(2));
    // Participant 0 did not act in this transition.
    assert_eq!(delivery.reward, 0.0);
}

#[test]
fn consecutive_resets_interrupt_the_episode() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    expect_observation(boxes, 0);

    boxes.send_in(reset(1));
    boxes.send_in(reset(0));
    let restarted = expect_observation(boxes, 0);
    assert_eq!(restarted.observation.unwrap().num_empty(), 9);

    boxes.send_in(act(0, mv(0)));
    // Participant 1's pending reset is answered now.
    let delivery = expect_observation(boxes, 1);
    assert!(!delivery.is_terminal());
    assert_eq!(delivery.observation.unwrap().num_empty(), 8);

    boxes.send_in(act(1, mv(1)));
    expect_observation(boxes, 0);
}

#[test]
fn repeated_reset_before_the_other_participant_joins() {
    let handle = start_countdown(CountdownConfig::default(), TurnMode::Asynchronous);
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    expect_observation(boxes, 0);

    boxes.send_in(reset(0));
    expect_observation(boxes, 0);

    boxes.send_in(reset(1));
    boxes.send_in(act(0, COUNTDOWN_ACTIONS[0]));
    expect_observation(boxes, 1);

    boxes.send_in(act(1, COUNTDOWN_ACTIONS[1]));
    expect_observation(boxes, 0);
}

// ---------------------------------------------------------------------------
// Protocol violations
// ---------------------------------------------------------------------------

#[test]
fn out_of_turn_action_is_rejected() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);

    boxes.send_in(act(1, mv(1)));
    assert_eq!(
        expect_fault(boxes, 1),
        Fault::OutOfTurn {
            participant: ParticipantId(1)
        }
    );

    // The round is unaffected.
    boxes.send_in(act(0, mv(0)));
    expect_observation(boxes, 1);
}

#[test]
fn duplicate_action_is_rejected() {
    let config = CountdownConfig {
        simultaneous: true,
        ..CountdownConfig::default()
    };
    let handle = start_countdown(config, TurnMode::Asynchronous);
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);
    expect_observation(boxes, 1);

    boxes.send_in(act(0, 1));
    boxes.send_in(act(0, 2));
    assert_eq!(
        expect_fault(boxes, 0),
        Fault::DuplicateAction {
            participant: ParticipantId(0)
        }
    );
    assert_silent(boxes, 1);

    boxes.send_in(act(1, 3));
    let first = expect_observation(boxes, 0);
    let second = expect_observation(boxes, 1);
    // The first submission counts.
    assert_eq!(first.reward, 1.0);
    assert_eq!(second.reward, 3.0);
}

#[test]
fn no_op_is_rejected_in_asynchronous_mode() {
    let handle = start_countdown(CountdownConfig::default(), TurnMode::Asynchronous);
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    expect_observation(boxes, 0);
    boxes.send_in(pass(0));
    assert_eq!(
        expect_fault(boxes, 0),
        Fault::ActionExpected {
            participant: ParticipantId(0)
        }
    );
}

#[test]
fn rejected_interruption_keeps_the_pending_reset() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);

    // Participant 1 is not armed, so its reset cannot join the round.
    boxes.send_in(reset(1));
    assert_eq!(
        expect_fault(boxes, 1),
        Fault::OutOfTurn {
            participant: ParticipantId(1)
        }
    );

    boxes.send_in(act(0, mv(0)));
    let delivery = expect_observation(boxes, 1);
    assert!(!delivery.is_terminal());
    assert!(!delivery.info.interrupted());
}

// ---------------------------------------------------------------------------
// Interruption
// ---------------------------------------------------------------------------

#[test]
fn mid_episode_reset_interrupts_the_others() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);
    boxes.send_in(act(0, mv(0)));
    expect_observation(boxes, 1);

    // It is participant 1's turn; its reset ends the episode.
    boxes.send_in(reset(1));
    let interrupted = expect_observation(boxes, 0);
    assert!(interrupted.terminated);
    assert!(interrupted.truncated);
    assert!(interrupted.info.interrupted());
    assert_eq!(interrupted.reward, 0.0);
    assert_eq!(interrupted.observation.unwrap().get(0, 0), Some(0));
    assert_silent(boxes, 1);

    // Participant 0 must reset before acting again.
    boxes.send_in(act(0, mv(0)));
    assert_eq!(
        expect_fault(boxes, 0),
        Fault::ActedWithoutReset {
            participant: ParticipantId(0)
        }
    );

    boxes.send_in(reset(0));
    let fresh = expect_observation(boxes, 0);
    assert_eq!(fresh.observation.unwrap().num_empty(), 9);
    assert!(!fresh.info.interrupted());

    boxes.send_in(act(0, mv(0)));
    let delivery = expect_observation(boxes, 1);
    assert!(!delivery.is_terminal());
    assert_eq!(delivery.observation.unwrap().num_empty(), 8);
}

// ---------------------------------------------------------------------------
// Simulation faults
// ---------------------------------------------------------------------------

#[test]
fn illegal_move_is_reported_and_the_round_retried() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);
    boxes.send_in(act(0, Move::new(0, 0)));
    expect_observation(boxes, 1);

    boxes.send_in(act(1, Move::new(0, 0)));
    let fault = expect_fault(boxes, 1);
    assert_eq!(
        fault,
        Fault::Simulation {
            message: String::from("illegal action: cell 0, 0 is not empty")
        }
    );
    assert_silent(boxes, 0);

    boxes.send_in(act(1, Move::new(1, 1)));
    let delivery = expect_observation(boxes, 0);
    assert_eq!(delivery.observation.unwrap().get(1, 1), Some(1));
}

#[test]
fn planned_fault_reaches_every_contributor() {
    let config = CountdownConfig {
        simultaneous: true,
        fault_at: Some(2),
        ..CountdownConfig::default()
    };
    let handle = start_countdown(config, TurnMode::Asynchronous);
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);
    expect_observation(boxes, 1);

    for round in 1..=2 {
        boxes.send_in(act(0, 1));
        boxes.send_in(act(1, 2));
        assert_eq!(expect_observation(boxes, 0).observation, Some(round));
        assert_eq!(expect_observation(boxes, 1).observation, Some(round));
    }

    boxes.send_in(act(0, 1));
    boxes.send_in(act(1, 2));
    for p in 0..2 {
        assert!(matches!(expect_fault(boxes, p), Fault::Simulation { .. }));
    }

    boxes.send_in(act(0, 3));
    boxes.send_in(act(1, 0));
    let first = expect_observation(boxes, 0);
    let second = expect_observation(boxes, 1);
    assert_eq!(first.observation, Some(3));
    assert_eq!(first.reward, 3.0);
    assert_eq!(second.reward, 0.0);
}

/// Panics on the first step, then behaves.
struct Fragile {
    steps: Arc<AtomicUsize>,
}

impl Simulation for Fragile {
    type Observation = u8;
    type Action = u8;

    fn num_agents(&self) -> usize {
        1
    }

    fn agent_turn(&self) -> Vec<ParticipantId> {
        vec![ParticipantId(0)]
    }

    fn reset(&mut self) -> ResetOutcome<u8> {
        ResetOutcome {
            observations: vec![0],
            infos: vec![Info::new()],
        }
    }

    fn step(&mut self, actions: Vec<u8>) -> Result<StepOutcome<u8>, SimulationError> {
        if self.steps.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("fragile simulation broke");
        }
        Ok(StepOutcome {
            observations: actions,
            rewards: vec![1.0],
            terminated: vec![false],
            truncated: vec![false],
            infos: vec![Info::new()],
        })
    }

    fn observation_spaces(&self) -> Vec<Space> {
        vec![Space::Discrete { n: 256 }]
    }

    fn action_spaces(&self) -> Vec<Space> {
        vec![Space::Discrete { n: 256 }]
    }
}

#[test]
fn panicking_step_is_a_simulation_fault() {
    common::init_tracing();
    let steps = Arc::new(AtomicUsize::new(0));
    let sim = Fragile {
        steps: Arc::clone(&steps),
    };
    let handle = CoordinatorServer::new(sim, &ServerConfig::default())
        .start()
        .unwrap();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    expect_observation(boxes, 0);

    boxes.send_in(act(0, 7));
    assert_eq!(
        expect_fault(boxes, 0),
        Fault::Simulation {
            message: String::from("fragile simulation broke")
        }
    );
    assert!(handle.is_running());

    boxes.send_in(act(0, 7));
    assert_eq!(expect_observation(boxes, 0).observation, Some(7));
    assert_eq!(steps.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Episode end
// ---------------------------------------------------------------------------

#[test]
fn finished_game_terminates_both_participants() {
    let handle = start_tic_tac_toe();
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);

    for i in 0..4 {
        let p = i % 2;
        boxes.send_in(act(p, mv(i)));
        assert!(!expect_observation(boxes, 1 - p).is_terminal());
    }
    boxes.send_in(act(0, mv(4)));

    let winner = expect_observation(boxes, 0);
    let loser = expect_observation(boxes, 1);
    assert!(winner.terminated && loser.terminated);
    assert_eq!(winner.reward, 1.0);
    assert_eq!(loser.reward, -1.0);
    assert_eq!(winner.info.get("winner"), Some(&serde_json::json!(0)));
    assert_eq!(winner.info.get("winner"), loser.info.get("winner"));
    assert_eq!(winner.observation, loser.observation);

    // Both must reset; the next episode starts fresh.
    boxes.send_in(act(1, mv(0)));
    assert!(matches!(expect_fault(boxes, 1), Fault::ActedWithoutReset { .. }));
    boxes.send_in(reset(1));
    boxes.send_in(reset(0));
    assert_eq!(expect_observation(boxes, 0).observation.unwrap().num_empty(), 9);
    assert_silent(boxes, 1);
}

#[test]
fn terminal_delivery_answers_a_pending_reset() {
    let config = CountdownConfig {
        num_steps: 1,
        ..CountdownConfig::default()
    };
    let handle = start_countdown(config, TurnMode::Asynchronous);
    let boxes = handle.mailboxes();
    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    expect_observation(boxes, 0);

    boxes.send_in(act(0, 2));
    assert!(expect_observation(boxes, 0).terminated);
    assert!(expect_observation(boxes, 1).terminated);

    boxes.send_in(reset(0));
    boxes.send_in(reset(1));
    assert_eq!(expect_observation(boxes, 0).observation, Some(0));
    assert_silent(boxes, 1);
    boxes.send_in(act(0, 1));
    assert_eq!(expect_observation(boxes, 0).reward, 1.0);
    assert!(expect_observation(boxes, 1).terminated);
    assert_silent(boxes, 1);
}

// ---------------------------------------------------------------------------
// Synchronous mode
// ---------------------------------------------------------------------------

#[test]
fn synchronous_mode_delivers_to_everyone_each_round() {
    let config = CountdownConfig {
        num_agents: 3,
        num_steps: 2,
        ..CountdownConfig::default()
    };
    let handle = start_countdown(config, TurnMode::Synchronous);
    let boxes = handle.mailboxes();
    for p in 0..3 {
        boxes.send_in(reset(p));
    }
    assert_eq!(expect_observation(boxes, 0).observation, Some(0));
    assert_eq!(expect_observation(boxes, 1).observation, None);
    assert_eq!(expect_observation(boxes, 2).observation, None);

    // Round 0: participant 0 acts, the others check in.
    boxes.send_in(act(1, 3));
    assert_eq!(
        expect_fault(boxes, 1),
        Fault::OutOfTurn {
            participant: ParticipantId(1)
        }
    );
    boxes.send_in(pass(0));
    assert_eq!(
        expect_fault(boxes, 0),
        Fault::ActionExpected {
            participant: ParticipantId(0)
        }
    );
    boxes.send_in(pass(1));
    boxes.send_in(act(0, 2));
    assert_silent(boxes, 0);
    boxes.send_in(pass(2));

    let d0 = expect_observation(boxes, 0);
    let d1 = expect_observation(boxes, 1);
    let d2 = expect_observation(boxes, 2);
    assert_eq!(d0.observation, None);
    assert_eq!(d0.reward, 2.0);
    assert_eq!(d1.observation, Some(1));
    assert_eq!(d2.observation, None);

    // Round 1 ends the episode; terminal deliveries carry real observations.
    boxes.send_in(pass(0));
    boxes.send_in(act(1, 3));
    boxes.send_in(pass(2));
    for p in 0..3 {
        let delivery = expect_observation(boxes, p);
        assert!(delivery.terminated);
        assert_eq!(delivery.observation, Some(2));
    }
}

#[test]
fn synchronous_interruption_releases_checked_in_participants() {
    let config = CountdownConfig {
        num_agents: 3,
        ..CountdownConfig::default()
    };
    let handle = start_countdown(config, TurnMode::Synchronous);
    let boxes = handle.mailboxes();
    for p in 0..3 {
        boxes.send_in(reset(p));
    }
    for p in 0..3 {
        expect_observation(boxes, p);
    }

    boxes.send_in(pass(1));
    boxes.send_in(reset(2));
    boxes.send_in(act(0, 1));

    for p in 0..2 {
        let delivery = expect_observation(boxes, p);
        assert!(delivery.info.interrupted());
        assert!(delivery.is_terminal());
    }
    // The requester receives the first delivery of the new episode.
    let fresh = expect_observation(boxes, 2);
    assert_eq!(fresh.observation, None);
    assert!(!fresh.is_terminal());

    boxes.send_in(reset(0));
    assert_eq!(expect_observation(boxes, 0).observation, Some(0));
    boxes.send_in(reset(1));
    assert_eq!(expect_observation(boxes, 1).observation, None);
}

#[test]
fn messages_queued_before_start_are_discarded() {
    common::init_tracing();
    let server = CoordinatorServer::new(
        consort_envs::Countdown::new(CountdownConfig::default()),
        &ServerConfig::default(),
    );
    let boxes = Arc::clone(server.mailboxes());
    boxes.send_in(Message::ShutdownRequested);
    let handle = server.start().unwrap();
    assert!(handle.is_running());
    assert!(boxes.recv_out_timeout(ParticipantId(0), QUIET).is_none());
    boxes.send_in(reset(0));
    expect_observation(&boxes, 0);
}
