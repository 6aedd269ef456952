//! Faults reported back to participants.
//!
//! A [`Fault`] is a value, not a panic: the coordinator sends it to the
//! affected participants through their outbound channels and keeps running.
//! Only [`Fault::External`] ends the control loop, and only when it arrives
//! through the inbound channel.

use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// Everything that can go wrong on behalf of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    /// The participant submitted while it was not armed in the ledger.
    #[error("it is currently not participant {participant}'s turn")]
    OutOfTurn {
        /// The offending participant.
        participant: ParticipantId,
    },

    /// The participant already submitted for the current round.
    #[error("an action has already been collected for participant {participant}")]
    DuplicateAction {
        /// The offending participant.
        participant: ParticipantId,
    },

    /// The participant submitted a no-op although it is its turn to act.
    #[error("participant {participant} must act this round, a no-op was submitted")]
    ActionExpected {
        /// The offending participant.
        participant: ParticipantId,
    },

    /// The participant acted after a terminal observation without resetting.
    #[error("participant {participant} did not call reset at the beginning of a new episode")]
    ActedWithoutReset {
        /// The offending participant.
        participant: ParticipantId,
    },

    /// The simulation rejected the round.
    #[error("simulation fault: {message}")]
    Simulation {
        /// Description supplied by the simulation.
        message: String,
    },

    /// An error reported from outside the control loop.
    #[error("external fault: {message}")]
    External {
        /// Description supplied by the reporter.
        message: String,
    },
}

impl Fault {
    /// Whether this fault is a participant protocol violation, recoverable
    /// by the participant alone.
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::OutOfTurn { .. }
                | Self::DuplicateAction { .. }
                | Self::ActionExpected { .. }
                | Self::ActedWithoutReset { .. }
        )
    }
}
