//! Per-round collection of participant submissions.
//!
//! The [`TurnLedger`] is armed with the set of participants expected to
//! submit this round. Each armed participant fills its slot exactly once;
//! when every slot is filled the coordinator takes the round with
//! [`TurnLedger::get_actions`] and either steps the simulation or, if any
//! slot holds an [`Slot::Interrupt`], restarts the episode.
//!
//! In asynchronous mode the armed set is exactly the simulation's turn. In
//! synchronous mode it is wider: every participant still in the episode
//! checks in, and only the *true turn* submits real actions.

use consort_types::{Fault, ParticipantId};

use crate::config::TurnMode;

/// One participant's contribution to a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<A> {
    /// A real action.
    Action(A),
    /// An explicit no-op from a participant outside the true turn.
    Pass,
    /// A request to end the episode early.
    Interrupt,
}

impl<A> Slot<A> {
    /// The action, if this slot holds one.
    pub fn into_action(self) -> Option<A> {
        match self {
            Self::Action(action) => Some(action),
            Self::Pass | Self::Interrupt => None,
        }
    }
}

/// Why a submission was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CollectError {
    /// The participant is not armed for this round, or submitted a real
    /// action while outside the true turn.
    #[error("it is currently not participant {participant}'s turn")]
    OutOfTurn {
        /// The rejected participant.
        participant: ParticipantId,
    },

    /// The participant already filled its slot this round.
    #[error("an action has already been collected for participant {participant}")]
    Duplicate {
        /// The rejected participant.
        participant: ParticipantId,
    },

    /// The participant is in the true turn but submitted a no-op.
    #[error("participant {participant} must act this round")]
    ActionExpected {
        /// The rejected participant.
        participant: ParticipantId,
    },
}

impl From<CollectError> for Fault {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::OutOfTurn { participant } => Self::OutOfTurn { participant },
            CollectError::Duplicate { participant } => Self::DuplicateAction { participant },
            CollectError::ActionExpected { participant } => Self::ActionExpected { participant },
        }
    }
}

/// The round was taken before every armed slot was filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("round incomplete: {collected} of {armed} submissions collected")]
pub struct IncompleteRound {
    /// Filled slots.
    pub collected: usize,
    /// Armed slots.
    pub armed: usize,
}

/// Collects one submission per armed participant.
#[derive(Debug, Clone)]
pub struct TurnLedger<A> {
    mode: TurnMode,
    num_participants: usize,
    armed: Vec<ParticipantId>,
    slots: Vec<Option<Slot<A>>>,
    true_turn: Vec<ParticipantId>,
    collected: usize,
    interrupted: bool,
}

impl<A> TurnLedger<A> {
    /// Create an unarmed ledger.
    pub const fn new(mode: TurnMode, num_participants: usize) -> Self {
        Self {
            mode,
            num_participants,
            armed: Vec::new(),
            slots: Vec::new(),
            true_turn: Vec::new(),
            collected: 0,
            interrupted: false,
        }
    }

    /// Arm the ledger for a new round with `turn` as the true turn.
    ///
    /// Asynchronous: `turn` itself is armed, in its order. Synchronous: every
    /// participant is armed, in index order.
    pub fn reset(&mut self, turn: &[ParticipantId]) {
        self.reset_within(turn, |_| true);
    }

    /// Like [`reset`](Self::reset), but in synchronous mode only arms the
    /// true turn plus the participants for which `active` holds.
    pub fn reset_within<F>(&mut self, turn: &[ParticipantId], active: F)
    where
        F: Fn(ParticipantId) -> bool,
    {
        self.true_turn = turn.to_vec();
        self.armed = if self.mode.is_synchronous() {
            ParticipantId::all(self.num_participants)
                .filter(|p| turn.contains(p) || active(*p))
                .collect()
        } else {
            turn.to_vec()
        };
        self.rearm();
    }

    /// Clear every slot, keeping the armed set and the true turn.
    pub fn rearm(&mut self) {
        self.slots = self.armed.iter().map(|_| None).collect();
        self.collected = 0;
        self.interrupted = false;
    }

    /// Fill `participant`'s slot.
    ///
    /// # Errors
    ///
    /// - [`CollectError::OutOfTurn`] if the participant is not armed, or
    ///   submits a real action from outside the true turn.
    /// - [`CollectError::Duplicate`] if its slot is already filled.
    /// - [`CollectError::ActionExpected`] if it is in the true turn and
    ///   submits [`Slot::Pass`].
    pub fn collect(&mut self, participant: ParticipantId, slot: Slot<A>) -> Result<(), CollectError> {
        let position = self
            .armed
            .iter()
            .position(|p| *p == participant)
            .ok_or(CollectError::OutOfTurn { participant })?;
        let in_true_turn = self.true_turn.contains(&participant);
        let entry = self
            .slots
            .get_mut(position)
            .ok_or(CollectError::OutOfTurn { participant })?;
        if entry.is_some() {
            return Err(CollectError::Duplicate { participant });
        }
        match slot {
            Slot::Action(_) if !in_true_turn => {
                return Err(CollectError::OutOfTurn { participant });
            }
            Slot::Pass if in_true_turn => {
                return Err(CollectError::ActionExpected { participant });
            }
            Slot::Interrupt => self.interrupted = true,
            Slot::Action(_) | Slot::Pass => {}
        }
        *entry = Some(slot);
        self.collected = self.collected.saturating_add(1);
        Ok(())
    }

    /// Whether every armed slot is filled.
    pub fn all_collected(&self) -> bool {
        self.collected == self.armed.len()
    }

    /// Take the filled slots in arming order, leaving the ledger empty
    /// until the next [`reset`](Self::reset) or [`rearm`](Self::rearm).
    ///
    /// # Errors
    ///
    /// Returns [`IncompleteRound`] if a slot is still empty; nothing is
    /// taken in that case.
    pub fn get_actions(&mut self) -> Result<Vec<(ParticipantId, Slot<A>)>, IncompleteRound> {
        if !self.all_collected() {
            return Err(IncompleteRound {
                collected: self.collected,
                armed: self.armed.len(),
            });
        }
        let round = self
            .armed
            .iter()
            .zip(self.slots.iter_mut())
            .filter_map(|(p, slot)| slot.take().map(|slot| (*p, slot)))
            .collect();
        self.collected = 0;
        Ok(round)
    }

    /// The armed participants, in arming order.
    pub fn agent_turn(&self) -> &[ParticipantId] {
        &self.armed
    }

    /// The participants due to submit real actions.
    pub fn true_turn(&self) -> &[ParticipantId] {
        &self.true_turn
    }

    /// Whether `participant` is in the true turn.
    pub fn in_true_turn(&self, participant: ParticipantId) -> bool {
        self.true_turn.contains(&participant)
    }

    /// Whether any slot of the current round holds an interrupt.
    pub const fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// The collection mode.
    pub const fn mode(&self) -> TurnMode {
        self.mode
    }
}
