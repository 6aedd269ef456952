//! The contract a shared multi-participant simulation must fulfil.
//!
//! The coordinator consumes a simulation only through this trait. State
//! representation, legality, rewards, and termination are entirely the
//! simulation's business; the coordinator just orders calls to it.

use crate::ids::ParticipantId;
use crate::info::Info;
use crate::spaces::{RewardRange, Space};

/// Error raised by [`Simulation::step`].
///
/// The coordinator reports it to every participant whose action was part
/// of the failed round and re-arms the round. It performs no rollback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SimulationError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl SimulationError {
    /// Create a simulation error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of [`Simulation::reset`]: one entry per participant.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetOutcome<O> {
    /// Initial observations.
    pub observations: Vec<O>,
    /// Initial auxiliary data.
    pub infos: Vec<Info>,
}

/// Result of [`Simulation::step`]: one entry per participant in each field.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome<O> {
    /// Observations after the transition.
    pub observations: Vec<O>,
    /// Rewards for the transition.
    pub rewards: Vec<f64>,
    /// Participants whose episode ended.
    pub terminated: Vec<bool>,
    /// Participants whose episode was cut short.
    pub truncated: Vec<bool>,
    /// Auxiliary data.
    pub infos: Vec<Info>,
}

impl<O> StepOutcome<O> {
    /// Whether `participant` is in a terminal state after this step.
    ///
    /// Missing entries count as not terminal.
    pub fn is_terminal(&self, participant: ParticipantId) -> bool {
        let index = participant.index();
        self.terminated.get(index).copied().unwrap_or(false)
            || self.truncated.get(index).copied().unwrap_or(false)
    }
}

/// A shared simulation stepped by exactly one control thread.
///
/// `Send + 'static` because it is moved onto the coordinator's thread and
/// lives there for the coordinator's lifetime.
pub trait Simulation: Send + 'static {
    /// What each participant observes.
    type Observation: Clone + Send + 'static;

    /// What each participant submits.
    type Action: Send + 'static;

    /// Number of participants.
    fn num_agents(&self) -> usize;

    /// Participants due to act next, in the order their actions are passed
    /// to [`step`](Self::step).
    fn agent_turn(&self) -> Vec<ParticipantId>;

    /// Start a new episode.
    fn reset(&mut self) -> ResetOutcome<Self::Observation>;

    /// Apply the actions of the participants in [`agent_turn`](Self::agent_turn),
    /// in that order.
    fn step(
        &mut self,
        actions: Vec<Self::Action>,
    ) -> Result<StepOutcome<Self::Observation>, SimulationError>;

    /// Per-participant observation spaces.
    fn observation_spaces(&self) -> Vec<Space>;

    /// Per-participant action spaces.
    fn action_spaces(&self) -> Vec<Space>;

    /// Per-participant reward ranges. Unbounded unless overridden.
    fn reward_ranges(&self) -> Vec<RewardRange> {
        vec![RewardRange::default(); self.num_agents()]
    }
}
