//! Type-safe identifiers.
//!
//! A [`CoordinatorId`] names one coordinator instance (one control loop and
//! the simulation it owns) and is attached to every log line it emits. It
//! uses UUID v7 so ids carry their creation time.
//!
//! A [`ParticipantId`] is the index of a participant in the simulation's
//! per-participant sequences (observations, rewards, spaces). It is a plain
//! index, never a random id, because the simulation contract is positional.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one coordinator instance in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoordinatorId(Uuid);

impl CoordinatorId {
    /// A fresh time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CoordinatorId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for CoordinatorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Positional index of a participant in the shared simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub usize);

impl ParticipantId {
    /// Return the index into per-participant sequences.
    pub const fn index(self) -> usize {
        self.0
    }

    /// Iterate over the ids `0..count`.
    pub fn all(count: usize) -> impl Iterator<Item = Self> {
        (0..count).map(Self)
    }
}

impl core::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for ParticipantId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}
