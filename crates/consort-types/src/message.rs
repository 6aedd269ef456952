//! Messages exchanged between sessions and the coordinator.
//!
//! [`Message`] travels on the single shared inbound channel; [`Reply`]
//! travels on a participant's dedicated outbound channel. Both are closed
//! enums so the control loop and sessions match them exhaustively. They
//! derive serde so that a transport other than in-process channels can be
//! layered behind the same contract.

use serde::{Deserialize, Serialize};

use crate::fault::Fault;
use crate::ids::ParticipantId;
use crate::info::Info;

/// Inbound control message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message<A> {
    /// A participant's contribution to the current round.
    ///
    /// `None` is an explicit no-op, used in synchronous mode by participants
    /// whose turn it is not.
    ActionSubmitted {
        /// The submitting participant.
        participant: ParticipantId,
        /// The action, or `None` for a no-op check-in.
        action: Option<A>,
    },

    /// A participant asks for a fresh episode (or to end the current one).
    ResetRequested {
        /// The requesting participant.
        participant: ParticipantId,
    },

    /// An error raised outside the control loop; ends the loop.
    ErrorReported {
        /// The reported fault.
        error: Fault,
    },

    /// Ends the control loop cleanly.
    ShutdownRequested,
}

impl<A> Message<A> {
    /// The participant this message is keyed by, if any.
    pub const fn participant(&self) -> Option<ParticipantId> {
        match self {
            Self::ActionSubmitted { participant, .. } | Self::ResetRequested { participant } => {
                Some(*participant)
            }
            Self::ErrorReported { .. } | Self::ShutdownRequested => None,
        }
    }

    /// Short tag for log fields.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ActionSubmitted { .. } => "action_submitted",
            Self::ResetRequested { .. } => "reset_requested",
            Self::ErrorReported { .. } => "error_reported",
            Self::ShutdownRequested => "shutdown_requested",
        }
    }
}

/// One participant's view of a transition or reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery<O> {
    /// The participant's observation; `None` when it is suppressed because
    /// the participant is not due to act (synchronous mode only).
    pub observation: Option<O>,
    /// Reward for the last transition.
    pub reward: f64,
    /// The episode ended for this participant.
    pub terminated: bool,
    /// The episode was cut short for this participant.
    pub truncated: bool,
    /// Auxiliary data.
    pub info: Info,
}

impl<O> Delivery<O> {
    /// Delivery for the first observation of an episode.
    pub const fn initial(observation: Option<O>, info: Info) -> Self {
        Self {
            observation,
            reward: 0.0,
            terminated: false,
            truncated: false,
            info,
        }
    }

    /// Synthetic terminal delivery for a participant whose episode was
    /// ended early by someone else. Repeats its last-known observation.
    pub fn interrupted(observation: Option<O>, info: Info) -> Self {
        Self {
            observation,
            reward: 0.0,
            terminated: true,
            truncated: true,
            info: info.with_interrupted(),
        }
    }

    /// Whether the participant's episode has ended.
    pub const fn is_terminal(&self) -> bool {
        self.terminated || self.truncated
    }

    /// Flatten into the conventional step return shape.
    pub fn into_parts(self) -> (Option<O>, f64, bool, bool, Info) {
        (
            self.observation,
            self.reward,
            self.terminated,
            self.truncated,
            self.info,
        )
    }
}

/// Outbound message to exactly one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply<O> {
    /// An observation (with reward and flags).
    Observation(Delivery<O>),
    /// The participant's last request failed.
    Error(Fault),
    /// The coordinator is shutting down.
    Shutdown,
}
