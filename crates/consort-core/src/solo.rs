//! Thread-free adapter for simulations with exactly one participant.

use consort_types::{Delivery, Info, RewardRange, Simulation, SimulationError, Space};

/// Errors from the [`Solo`] adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SoloError {
    /// The wrapped simulation does not have exactly one participant.
    #[error("a simulation with exactly one participant was expected, got {num_agents}")]
    NotSingleAgent {
        /// Participants reported by the simulation.
        num_agents: usize,
    },

    /// The simulation returned no entry for the participant.
    #[error("simulation returned no {field} for the participant")]
    MissingEntry {
        /// The empty outcome field.
        field: &'static str,
    },

    /// The simulation rejected the step.
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// A one-participant simulation used as a plain step/reset environment.
#[derive(Debug)]
pub struct Solo<S: Simulation> {
    simulation: S,
    observation_space: Space,
    action_space: Space,
    reward_range: RewardRange,
}

impl<S: Simulation> Solo<S> {
    /// Wrap `simulation`.
    ///
    /// # Errors
    ///
    /// Returns [`SoloError::NotSingleAgent`] unless the simulation reports
    /// exactly one participant, or [`SoloError::MissingEntry`] if it has no
    /// spaces for it.
    pub fn new(simulation: S) -> Result<Self, SoloError> {
        let num_agents = simulation.num_agents();
        if num_agents != 1 {
            return Err(SoloError::NotSingleAgent { num_agents });
        }
        let observation_space = first(simulation.observation_spaces(), "observation space")?;
        let action_space = first(simulation.action_spaces(), "action space")?;
        let reward_range = simulation
            .reward_ranges()
            .into_iter()
            .next()
            .unwrap_or_default();
        Ok(Self {
            simulation,
            observation_space,
            action_space,
            reward_range,
        })
    }

    /// Start a new episode.
    ///
    /// # Errors
    ///
    /// Returns [`SoloError::MissingEntry`] if the simulation returns no
    /// observation.
    pub fn reset(&mut self) -> Result<(S::Observation, Info), SoloError> {
        let outcome = self.simulation.reset();
        let observation = first(outcome.observations, "observation")?;
        let info = outcome.infos.into_iter().next().unwrap_or_default();
        Ok((observation, info))
    }

    /// Apply one action.
    ///
    /// # Errors
    ///
    /// Returns [`SoloError::Simulation`] if the simulation rejects the
    /// action, or [`SoloError::MissingEntry`] if it returns no observation.
    pub fn step(&mut self, action: S::Action) -> Result<Delivery<S::Observation>, SoloError> {
        let mut outcome = self.simulation.step(vec![action])?;
        let terminated = outcome.terminated.first().copied().unwrap_or(false);
        let truncated = outcome.truncated.first().copied().unwrap_or(false);
        let reward = outcome.rewards.first().copied().unwrap_or(0.0);
        let info = std::mem::take(&mut outcome.infos).into_iter().next().unwrap_or_default();
        let observation = first(outcome.observations, "observation")?;
        tracing::trace!(reward, terminated, truncated, "solo step");
        Ok(Delivery {
            observation: Some(observation),
            reward,
            terminated,
            truncated,
            info,
        })
    }

    /// The participant's observation space.
    pub const fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    /// The participant's action space.
    pub const fn action_space(&self) -> &Space {
        &self.action_space
    }

    /// The participant's reward range.
    pub const fn reward_range(&self) -> RewardRange {
        self.reward_range
    }

    /// The wrapped simulation.
    pub const fn inner(&self) -> &S {
        &self.simulation
    }

    /// Unwrap the simulation.
    pub fn into_inner(self) -> S {
        self.simulation
    }
}

fn first<T>(items: Vec<T>, field: &'static str) -> Result<T, SoloError> {
    items
        .into_iter()
        .next()
        .ok_or(SoloError::MissingEntry { field })
}
