//! The coordinator's control loop.
//!
//! A [`CoordinatorServer`] owns the simulation and is the only code that
//! touches it. It runs on one thread, reading [`Message`]s from the shared
//! inbound channel one at a time and answering each participant on its own
//! outbound channel. All per-round and per-episode bookkeeping lives here:
//!
//! - the [`TurnLedger`] collecting the current round;
//! - a single-slot delivery buffer per participant, holding the delivery a
//!   participant will receive once it calls reset;
//! - `reset_expected`: the participant must reset before it may act again;
//! - `reset_requested`: the participant is blocked in a reset awaiting its
//!   first delivery of the new episode;
//! - the last observations and infos, repeated on interruption.
//!
//! The loop ends on [`Message::ShutdownRequested`] or
//! [`Message::ErrorReported`]. Protocol violations and simulation failures
//! are answered with [`Reply::Error`] and never end the loop.

use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use consort_types::{
    CoordinatorId, Delivery, Fault, Info, Message, ParticipantId, Reply, ResetOutcome, Simulation,
    SimulationError, StepOutcome,
};
use tracing::{debug, info, warn};

use crate::bootstrap::{ServerHandle, SpawnError};
use crate::config::ServerConfig;
use crate::ledger::{Slot, TurnLedger};
use crate::mailbox::{LoopExit, Mailboxes};

const START_POLL: Duration = Duration::from_millis(50);

/// One boolean per participant.
#[derive(Debug, Clone)]
struct Flags(Vec<bool>);

impl Flags {
    fn new(len: usize, value: bool) -> Self {
        Self(vec![value; len])
    }

    fn get(&self, participant: ParticipantId) -> bool {
        self.0.get(participant.index()).copied().unwrap_or(false)
    }

    fn set(&mut self, participant: ParticipantId, value: bool) {
        if let Some(flag) = self.0.get_mut(participant.index()) {
            *flag = value;
        }
    }

    fn fill(&mut self, value: bool) {
        self.0.fill(value);
    }

    fn all(&self) -> bool {
        self.0.iter().all(|flag| *flag)
    }
}

fn flag_at(flags: &[bool], participant: ParticipantId) -> bool {
    flags.get(participant.index()).copied().unwrap_or(false)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("panic with non-string payload"))
}

/// Serializes access to one shared simulation on behalf of N participants.
pub struct CoordinatorServer<S: Simulation> {
    simulation: S,
    mailboxes: Arc<Mailboxes<S::Action, S::Observation>>,
    ledger: TurnLedger<S::Action>,
    buffered: Vec<Option<Delivery<S::Observation>>>,
    reset_expected: Flags,
    reset_requested: Flags,
    observations: Vec<S::Observation>,
    infos: Vec<Info>,
    thread_name: String,
    wait_for_start: bool,
}

impl<S: Simulation> CoordinatorServer<S> {
    /// Create a coordinator for `simulation` with fresh mailboxes.
    ///
    /// Every participant starts out owing a reset, so the first reset from
    /// anyone resets the simulation.
    pub fn new(simulation: S, config: &ServerConfig) -> Self {
        let num_participants = simulation.num_agents();
        let mailboxes = Arc::new(Mailboxes::new(CoordinatorId::new(), num_participants));
        Self {
            simulation,
            mailboxes,
            ledger: TurnLedger::new(config.mode, num_participants),
            buffered: (0..num_participants).map(|_| None).collect(),
            reset_expected: Flags::new(num_participants, true),
            reset_requested: Flags::new(num_participants, false),
            observations: Vec::new(),
            infos: Vec::new(),
            thread_name: config.thread_name.clone(),
            wait_for_start: config.wait_for_start,
        }
    }

    /// The coordinator's identifier.
    pub fn id(&self) -> CoordinatorId {
        self.mailboxes.id()
    }

    /// The mailboxes sessions use to reach this coordinator.
    pub const fn mailboxes(&self) -> &Arc<Mailboxes<S::Action, S::Observation>> {
        &self.mailboxes
    }

    fn num_participants(&self) -> usize {
        self.mailboxes.num_participants()
    }

    /// Run the control loop on a new named thread.
    ///
    /// When configured to wait for start, returns only once the loop is
    /// ready to receive (or has already ended).
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::Thread`] if the OS refuses to create the thread.
    pub fn start(self) -> Result<ServerHandle<S::Action, S::Observation>, SpawnError> {
        let mailboxes = Arc::clone(&self.mailboxes);
        let wait_for_start = self.wait_for_start;
        let thread = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || self.run())?;

        if wait_for_start {
            while !mailboxes.wait_started(START_POLL) {
                if mailboxes.is_finished() || thread.is_finished() {
                    break;
                }
            }
        }
        Ok(ServerHandle::attach(mailboxes, thread))
    }

    /// Run the control loop on the current thread until it is told to stop.
    pub fn run(mut self) -> LoopExit {
        let id = self.id();
        let stale = self
            .mailboxes
            .drain_inbound()
            .saturating_add(self.mailboxes.drain_outbound());
        if stale > 0 {
            warn!(coordinator = %id, stale, "discarded messages queued before start");
        }

        self.mailboxes.mark_started();
        info!(
            coordinator = %id,
            participants = self.num_participants(),
            mode = %self.ledger.mode(),
            "coordinator started"
        );

        let exit = if self.mailboxes.take_stop_pending() {
            debug!(coordinator = %id, "stop was requested before start");
            self.mailboxes.refill_outbound(|| Reply::Shutdown);
            LoopExit::Shutdown
        } else {
            self.dispatch_until_exit()
        };

        if let LoopExit::Faulted(fault) = &exit {
            warn!(coordinator = %id, error = %fault, "coordinator faulted, releasing sessions");
            // Hold the gate so a session stopping in reaction to the fault
            // cannot overwrite these replies; mark_finished reopens it.
            let _ = self.mailboxes.try_acquire_stop();
            self.mailboxes.refill_outbound(|| Reply::Error(fault.clone()));
        }
        info!(coordinator = %id, clean = exit.is_clean(), "coordinator finished");
        self.mailboxes.mark_finished(exit.clone());
        exit
    }

    fn dispatch_until_exit(&mut self) -> LoopExit {
        let id = self.id();
        loop {
            let message = self.mailboxes.recv_in();
            debug!(
                coordinator = %id,
                kind = message.kind(),
                participant = ?message.participant(),
                "dispatching message"
            );
            match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(message))) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(exit)) => break exit,
                Err(payload) => {
                    break LoopExit::Faulted(Fault::External {
                        message: format!("control loop panicked: {}", panic_message(&*payload)),
                    });
                }
            }
        }
    }

    fn dispatch(&mut self, message: Message<S::Action>) -> ControlFlow<LoopExit> {
        match message {
            Message::ActionSubmitted {
                participant,
                action,
            } => {
                if self.is_known(participant) {
                    self.handle_action(participant, action.map_or(Slot::Pass, Slot::Action));
                }
            }
            Message::ResetRequested { participant } => {
                if self.is_known(participant) {
                    self.handle_reset(participant);
                }
            }
            Message::ErrorReported { error } => {
                return ControlFlow::Break(LoopExit::Faulted(error));
            }
            Message::ShutdownRequested => return ControlFlow::Break(LoopExit::Shutdown),
        }
        ControlFlow::Continue(())
    }

    fn is_known(&self, participant: ParticipantId) -> bool {
        let known = participant.index() < self.num_participants();
        if !known {
            warn!(
                coordinator = %self.id(),
                participant = %participant,
                "ignoring message from unknown participant"
            );
        }
        known
    }

    fn handle_reset(&mut self, participant: ParticipantId) {
        if self.reset_expected.all() {
            self.start_episode();
            self.reset_expected.set(participant, false);
            self.redeem_or_request(participant);
        } else if self.reset_expected.get(participant) {
            self.reset_expected.set(participant, false);
            self.redeem_or_request(participant);
        } else {
            // Mid-episode: the reset is the participant's contribution to
            // the current round.
            let previously = self.reset_requested.get(participant);
            self.reset_requested.set(participant, true);
            if !self.handle_action(participant, Slot::Interrupt) {
                self.reset_requested.set(participant, previously);
            }
        }
    }

    fn redeem_or_request(&mut self, participant: ParticipantId) {
        let buffered = self
            .buffered
            .get_mut(participant.index())
            .and_then(Option::take);
        match buffered {
            Some(delivery) => self.deliver(participant, delivery),
            None => self.reset_requested.set(participant, true),
        }
    }

    /// Returns whether the submission was accepted.
    fn handle_action(&mut self, participant: ParticipantId, slot: Slot<S::Action>) -> bool {
        if self.reset_expected.get(participant) {
            self.reject(participant, Fault::ActedWithoutReset { participant });
            return false;
        }
        if let Err(err) = self.ledger.collect(participant, slot) {
            self.reject(participant, err.into());
            return false;
        }
        if self.ledger.all_collected() {
            self.finish_round();
        }
        true
    }

    fn finish_round(&mut self) {
        let interrupted = self.ledger.interrupted();
        let round = match self.ledger.get_actions() {
            Ok(round) => round,
            Err(err) => {
                warn!(coordinator = %self.id(), error = %err, "round finished early");
                return;
            }
        };
        if interrupted {
            self.interrupt_episode(&round);
        } else {
            self.step_round(round);
        }
    }

    fn interrupt_episode(&mut self, round: &[(ParticipantId, Slot<S::Action>)]) {
        let requesters: Vec<ParticipantId> = round
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Interrupt))
            .map(|(participant, _)| *participant)
            .collect();
        info!(coordinator = %self.id(), requesters = ?requesters, "episode interrupted");

        for participant in ParticipantId::all(self.num_participants()) {
            if requesters.contains(&participant)
                || self.reset_expected.get(participant)
                || self.reset_requested.get(participant)
            {
                continue;
            }
            let delivery =
                Delivery::interrupted(self.last_observation(participant), self.info_for(participant));
            self.deliver(participant, delivery);
        }

        self.start_episode();
    }

    fn start_episode(&mut self) {
        let ResetOutcome {
            observations,
            infos,
        } = self.simulation.reset();
        self.observations = observations;
        self.infos = infos;

        let turn = self.simulation.agent_turn();
        self.ledger.reset(&turn);
        self.reset_expected.fill(true);
        self.buffered.iter_mut().for_each(|slot| *slot = None);

        for participant in ParticipantId::all(self.num_participants()) {
            if self.reset_requested.get(participant) {
                self.reset_expected.set(participant, false);
            }
        }

        for participant in self.ledger.agent_turn().to_vec() {
            let delivery =
                Delivery::initial(self.visible_observation(participant), self.info_for(participant));
            if self.reset_requested.get(participant) {
                self.reset_requested.set(participant, false);
                self.deliver(participant, delivery);
            } else {
                self.buffer(participant, delivery);
            }
        }

        info!(coordinator = %self.id(), turn = ?turn, "episode started");
    }

    fn step_round(&mut self, round: Vec<(ParticipantId, Slot<S::Action>)>) {
        let contributors: Vec<ParticipantId> = round.iter().map(|(p, _)| *p).collect();

        let mut by_participant: Vec<Option<S::Action>> =
            (0..self.num_participants()).map(|_| None).collect();
        for (participant, slot) in round {
            if let Some(entry) = by_participant.get_mut(participant.index()) {
                *entry = slot.into_action();
            }
        }
        let actions: Vec<S::Action> = self
            .ledger
            .true_turn()
            .iter()
            .filter_map(|p| by_participant.get_mut(p.index()).and_then(Option::take))
            .collect();

        let simulation = &mut self.simulation;
        let result = panic::catch_unwind(AssertUnwindSafe(|| simulation.step(actions)))
            .unwrap_or_else(|payload| Err(SimulationError::new(panic_message(&*payload))));

        match result {
            Ok(outcome) => self.apply_step(outcome),
            Err(err) => {
                let fault = Fault::Simulation {
                    message: err.message,
                };
                warn!(
                    coordinator = %self.id(),
                    error = %fault,
                    contributors = ?contributors,
                    "simulation rejected the round"
                );
                for participant in contributors {
                    self.mailboxes.send_out(participant, Reply::Error(fault.clone()));
                }
                self.ledger.rearm();
            }
        }
    }

    fn apply_step(&mut self, outcome: StepOutcome<S::Observation>) {
        let StepOutcome {
            observations,
            rewards,
            terminated,
            truncated,
            infos,
        } = outcome;
        self.observations = observations;
        self.infos = infos;

        let terminal: Vec<bool> = ParticipantId::all(self.num_participants())
            .map(|p| flag_at(&terminated, p) || flag_at(&truncated, p))
            .collect();
        let is_terminal = |p: ParticipantId| flag_at(&terminal, p);

        let next_turn = self.simulation.agent_turn();
        self.ledger.reset_within(&next_turn, |p| !is_terminal(p));

        let newly_terminal: Vec<ParticipantId> = ParticipantId::all(self.num_participants())
            .filter(|p| is_terminal(*p) && !self.reset_expected.get(*p))
            .collect();
        for &participant in &newly_terminal {
            // Also answers a reset this participant may be blocked in.
            self.reset_requested.set(participant, false);
            let delivery = self.step_delivery(participant, &rewards, &terminated, &truncated);
            self.deliver(participant, delivery);
        }
        for participant in ParticipantId::all(self.num_participants()) {
            if is_terminal(participant) {
                self.reset_expected.set(participant, true);
            }
        }

        for participant in self.ledger.agent_turn().to_vec() {
            if newly_terminal.contains(&participant) {
                continue;
            }
            let delivery = self.step_delivery(participant, &rewards, &terminated, &truncated);
            if self.reset_requested.get(participant) {
                self.reset_requested.set(participant, false);
                self.deliver(participant, delivery);
            } else if self.reset_expected.get(participant) {
                self.buffer(participant, delivery);
            } else {
                self.deliver(participant, delivery);
            }
        }

        debug!(
            coordinator = %self.id(),
            turn = ?next_turn,
            finished = ?newly_terminal,
            "round applied"
        );
    }

    fn step_delivery(
        &self,
        participant: ParticipantId,
        rewards: &[f64],
        terminated: &[bool],
        truncated: &[bool],
    ) -> Delivery<S::Observation> {
        let terminated = flag_at(terminated, participant);
        let truncated = flag_at(truncated, participant);
        let observation = if terminated || truncated {
            self.last_observation(participant)
        } else {
            self.visible_observation(participant)
        };
        Delivery {
            observation,
            reward: rewards.get(participant.index()).copied().unwrap_or(0.0),
            terminated,
            truncated,
            info: self.info_for(participant),
        }
    }

    fn last_observation(&self, participant: ParticipantId) -> Option<S::Observation> {
        self.observations.get(participant.index()).cloned()
    }

    /// Suppressed for participants outside the true turn, which only
    /// happens in synchronous mode.
    fn visible_observation(&self, participant: ParticipantId) -> Option<S::Observation> {
        if self.ledger.in_true_turn(participant) {
            self.last_observation(participant)
        } else {
            None
        }
    }

    fn info_for(&self, participant: ParticipantId) -> Info {
        self.infos
            .get(participant.index())
            .cloned()
            .unwrap_or_default()
    }

    fn buffer(&mut self, participant: ParticipantId, delivery: Delivery<S::Observation>) {
        if let Some(slot) = self.buffered.get_mut(participant.index()) {
            *slot = Some(delivery);
        }
    }

    fn deliver(&self, participant: ParticipantId, delivery: Delivery<S::Observation>) {
        debug!(
            coordinator = %self.id(),
            participant = %participant,
            terminated = delivery.terminated,
            truncated = delivery.truncated,
            "delivering observation"
        );
        self.mailboxes.send_out(participant, Reply::Observation(delivery));
    }

    fn reject(&self, participant: ParticipantId, fault: Fault) {
        warn!(
            coordinator = %self.id(),
            participant = %participant,
            error = %fault,
            "rejected submission"
        );
        self.mailboxes.send_out(participant, Reply::Error(fault));
    }
}
