//! A scripted game for exercising the coordinator.
//!
//! Participants take turns one at a time (or all act every step when
//! `simultaneous`). Each acting participant is rewarded with the value of
//! its action. Every participant observes the step counter, and the episode
//! ends for everyone once `num_steps` steps have been applied. `fault_at`
//! makes the step with that index fail exactly once, so that a retry of the
//! same round succeeds.

use consort_types::{
    Info, ParticipantId, ResetOutcome, RewardRange, Simulation, SimulationError, Space,
    StepOutcome,
};

/// Construction parameters for [`Countdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownConfig {
    /// Number of participants.
    pub num_agents: usize,
    /// Steps per episode.
    pub num_steps: u64,
    /// Actions are `0..num_actions`.
    pub num_actions: u64,
    /// Step index at which `step` fails once.
    pub fault_at: Option<u64>,
    /// Every participant acts every step.
    pub simultaneous: bool,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            num_agents: 2,
            num_steps: 5,
            num_actions: 4,
            fault_at: None,
            simultaneous: false,
        }
    }
}

/// Turn-based or simultaneous counting game.
#[derive(Debug, Clone)]
pub struct Countdown {
    config: CountdownConfig,
    step: u64,
    fault_pending: bool,
}

impl Countdown {
    /// Create a game. Call [`reset`](Simulation::reset) before stepping.
    pub const fn new(config: CountdownConfig) -> Self {
        Self {
            config,
            step: 0,
            fault_pending: config.fault_at.is_some(),
        }
    }

    /// The step counter.
    pub const fn current_step(&self) -> u64 {
        self.step
    }

    /// Whether the current episode has ended.
    pub const fn is_over(&self) -> bool {
        self.step >= self.config.num_steps
    }

    fn acting(&self) -> Vec<ParticipantId> {
        if self.config.simultaneous {
            return ParticipantId::all(self.config.num_agents).collect();
        }
        let n = u64::try_from(self.config.num_agents).unwrap_or(u64::MAX);
        let index = self
            .step
            .checked_rem(n)
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(0);
        vec![ParticipantId(index)]
    }
}

impl Simulation for Countdown {
    type Observation = u64;
    type Action = u64;

    fn num_agents(&self) -> usize {
        self.config.num_agents
    }

    fn agent_turn(&self) -> Vec<ParticipantId> {
        self.acting()
    }

    fn reset(&mut self) -> ResetOutcome<u64> {
        self.step = 0;
        ResetOutcome {
            observations: vec![self.step; self.config.num_agents],
            infos: vec![Info::new(); self.config.num_agents],
        }
    }

    fn step(&mut self, actions: Vec<u64>) -> Result<StepOutcome<u64>, SimulationError> {
        if self.is_over() {
            return Err(SimulationError::new("the episode is over"));
        }
        let acting = self.acting();
        if actions.len() != acting.len() {
            return Err(SimulationError::new(format!(
                "expected {} actions, got {}",
                acting.len(),
                actions.len()
            )));
        }
        if let Some(bad) = actions.iter().find(|a| **a >= self.config.num_actions) {
            return Err(SimulationError::new(format!("invalid action: {bad}")));
        }
        if self.fault_pending && self.config.fault_at == Some(self.step) {
            self.fault_pending = false;
            return Err(SimulationError::new(format!(
                "planned fault at step {}",
                self.step
            )));
        }

        let mut rewards = vec![0.0; self.config.num_agents];
        for (participant, action) in acting.iter().zip(&actions) {
            if let Some(reward) = rewards.get_mut(participant.index()) {
                *reward = u32::try_from(*action).map_or(f64::MAX, f64::from);
            }
        }

        self.step = self.step.saturating_add(1);
        let over = self.is_over();
        tracing::trace!(step = self.step, over, "countdown step applied");
        Ok(StepOutcome {
            observations: vec![self.step; self.config.num_agents],
            rewards,
            terminated: vec![over; self.config.num_agents],
            truncated: vec![false; self.config.num_agents],
            infos: vec![Info::new().with("step", self.step); self.config.num_agents],
        })
    }

    fn observation_spaces(&self) -> Vec<Space> {
        let space = Space::Discrete {
            n: self.config.num_steps.saturating_add(1),
        };
        vec![space; self.config.num_agents]
    }

    fn action_spaces(&self) -> Vec<Space> {
        let space = Space::Discrete {
            n: self.config.num_actions,
        };
        vec![space; self.config.num_agents]
    }

    fn reward_ranges(&self) -> Vec<RewardRange> {
        let max = u32::try_from(self.config.num_actions.saturating_sub(1)).map_or(f64::MAX, f64::from);
        vec![RewardRange::new(0.0, max); self.config.num_agents]
    }
}
