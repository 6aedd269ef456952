//! Cumulative per-participant scores across episodes.

use serde::{Deserialize, Serialize};

/// Running reward totals, one per participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreTracker {
    totals: Vec<f64>,
}

impl ScoreTracker {
    /// Create a tracker with every total at zero.
    pub fn new(num_participants: usize) -> Self {
        Self {
            totals: vec![0.0; num_participants],
        }
    }

    /// Add one transition's rewards. Extra entries are ignored.
    pub fn update(&mut self, rewards: &[f64]) {
        for (total, reward) in self.totals.iter_mut().zip(rewards) {
            *total += reward;
        }
    }

    /// Totals in participant order.
    pub fn scores(&self) -> &[f64] {
        &self.totals
    }

    /// Total for one participant.
    pub fn score(&self, participant: usize) -> Option<f64> {
        self.totals.get(participant).copied()
    }

    /// Zero every total.
    pub fn clear(&mut self) {
        self.totals.fill(0.0);
    }
}
