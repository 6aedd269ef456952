//! Observation/action space descriptors and reward ranges.
//!
//! The coordinator never validates values against these descriptors; they
//! are carried from the simulation to each session so that callers
//! (policies, test harnesses) can check and sample values. Values are
//! represented as flat integer slices, which covers every discrete and
//! integer-box space the reference simulations use.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape and bounds of the values a participant observes or submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Space {
    /// A single integer in `0..n`.
    Discrete {
        /// Number of distinct values.
        n: u64,
    },
    /// A vector of integers where component `i` lies in `0..nvec[i]`.
    MultiDiscrete {
        /// Per-component number of distinct values.
        nvec: Vec<u64>,
    },
    /// A row-major integer array with inclusive bounds shared by every cell.
    IntBox {
        /// Array dimensions.
        shape: Vec<usize>,
        /// Inclusive lower bound.
        low: i64,
        /// Inclusive upper bound.
        high: i64,
    },
}

impl Space {
    /// Number of integers in one flattened value of this space.
    ///
    /// Returns `None` if the box shape overflows `usize`.
    pub fn flat_len(&self) -> Option<usize> {
        match self {
            Self::Discrete { .. } => Some(1),
            Self::MultiDiscrete { nvec } => Some(nvec.len()),
            Self::IntBox { shape, .. } => shape
                .iter()
                .try_fold(1_usize, |acc, dim| acc.checked_mul(*dim)),
        }
    }

    /// Check whether a flattened value belongs to this space.
    pub fn contains(&self, value: &[i64]) -> bool {
        if self.flat_len() != Some(value.len()) {
            return false;
        }

        match self {
            Self::Discrete { n } => value.iter().all(|v| below(*v, *n)),
            Self::MultiDiscrete { nvec } => {
                value.iter().zip(nvec).all(|(v, n)| below(*v, *n))
            }
            Self::IntBox { low, high, .. } => value.iter().all(|v| (*low..=*high).contains(v)),
        }
    }

    /// Draw a uniformly random value from this space.
    ///
    /// Empty spaces (a zero-sized discrete range, or a box whose bounds are
    /// inverted) yield an empty vector, which [`contains`](Self::contains)
    /// rejects.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<i64> {
        match self {
            Self::Discrete { n } => sample_below(rng, *n).into_iter().collect(),
            Self::MultiDiscrete { nvec } => {
                let drawn: Option<Vec<i64>> = nvec.iter().map(|n| sample_below(rng, *n)).collect();
                drawn.unwrap_or_default()
            }
            Self::IntBox { low, high, .. } => {
                if low > high {
                    return Vec::new();
                }
                let len = self.flat_len().unwrap_or(0);
                (0..len).map(|_| rng.random_range(*low..=*high)).collect()
            }
        }
    }
}

fn below(value: i64, n: u64) -> bool {
    u64::try_from(value).is_ok_and(|v| v < n)
}

fn sample_below<R: Rng + ?Sized>(rng: &mut R, n: u64) -> Option<i64> {
    if n == 0 {
        return None;
    }
    i64::try_from(rng.random_range(0..n)).ok()
}

/// Inclusive range of rewards a participant can receive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardRange {
    /// Smallest possible reward.
    pub min: f64,
    /// Largest possible reward.
    pub max: f64,
}

impl RewardRange {
    /// Create a reward range.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Check whether `reward` lies within the range.
    pub fn contains(&self, reward: f64) -> bool {
        (self.min..=self.max).contains(&reward)
    }
}

impl Default for RewardRange {
    fn default() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }
}
