//! A participant's blocking view of the shared simulation.
//!
//! A [`SessionHandle`] looks like an ordinary single-participant
//! environment: [`reset`](SessionHandle::reset) returns the first
//! observation of an episode and [`step`](SessionHandle::step) returns the
//! participant's next [`Delivery`]. Each call sends one message to the
//! coordinator and blocks on the participant's own outbound channel until
//! the reply arrives, which may take as long as the other participants
//! need to act.
//!
//! A session is meant to be driven from one thread. Handles for different
//! participants may live on different threads.

use std::sync::Arc;

use consort_types::{Delivery, Fault, Message, ParticipantId, Reply, RewardRange, Space};

use crate::mailbox::Mailboxes;

/// Errors returned by [`SessionHandle`] calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The coordinator was not running when the call was made.
    #[error("coordinator is not running")]
    NotRunning,

    /// The coordinator shut down while the call was waiting.
    #[error("coordinator stopped")]
    Stopped,

    /// The coordinator rejected the call.
    #[error(transparent)]
    Fault(#[from] Fault),
}

/// What a session should do about a fault before returning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResponse {
    /// Stop the coordinator, waiting for it to finish.
    StopServer,
    /// Leave the coordinator running.
    Propagate,
}

/// Decides how a session reacts to a fault reported by the coordinator.
///
/// The session always returns the fault to its caller as
/// [`SessionError::Fault`]; the handler only chooses whether the
/// coordinator is stopped first.
pub trait ErrorHandler: Send + Sync {
    /// React to `fault`, reported to `participant`.
    fn on_fault(&self, participant: ParticipantId, fault: &Fault) -> ErrorResponse;
}

/// Stops the coordinator on any fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOnError;

impl ErrorHandler for StopOnError {
    fn on_fault(&self, participant: ParticipantId, fault: &Fault) -> ErrorResponse {
        tracing::warn!(participant = %participant, error = %fault, "stopping coordinator after fault");
        ErrorResponse::StopServer
    }
}

/// Leaves the coordinator running so that the caller can recover.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagateError;

impl ErrorHandler for PropagateError {
    fn on_fault(&self, participant: ParticipantId, fault: &Fault) -> ErrorResponse {
        tracing::debug!(participant = %participant, error = %fault, "propagating fault");
        ErrorResponse::Propagate
    }
}

/// One participant's session with a coordinator.
pub struct SessionHandle<A, O> {
    participant: ParticipantId,
    mailboxes: Arc<Mailboxes<A, O>>,
    observation_space: Space,
    action_space: Space,
    reward_range: RewardRange,
    error_handler: Box<dyn ErrorHandler>,
    ignore_multiple_reset: bool,
    acted_since_reset: bool,
    cached_reset: Option<Option<O>>,
    closed: bool,
}

impl<A, O> std::fmt::Debug for SessionHandle<A, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("participant", &self.participant)
            .field("coordinator", &self.mailboxes.id())
            .field("observation_space", &self.observation_space)
            .field("action_space", &self.action_space)
            .field("ignore_multiple_reset", &self.ignore_multiple_reset)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<A, O: Clone> SessionHandle<A, O> {
    /// Create a session for `participant`, stopping the coordinator on
    /// faults and with an unbounded reward range.
    pub fn new(
        participant: ParticipantId,
        mailboxes: Arc<Mailboxes<A, O>>,
        observation_space: Space,
        action_space: Space,
    ) -> Self {
        Self {
            participant,
            mailboxes,
            observation_space,
            action_space,
            reward_range: RewardRange::default(),
            error_handler: Box::new(StopOnError),
            ignore_multiple_reset: false,
            acted_since_reset: true,
            cached_reset: None,
            closed: false,
        }
    }

    /// Replace the error handler.
    #[must_use]
    pub fn with_error_handler(mut self, handler: Box<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Answer repeated resets from the cache.
    #[must_use]
    pub const fn with_ignore_multiple_reset(mut self, ignore: bool) -> Self {
        self.ignore_multiple_reset = ignore;
        self
    }

    /// Set the reported reward range.
    #[must_use]
    pub const fn with_reward_range(mut self, reward_range: RewardRange) -> Self {
        self.reward_range = reward_range;
        self
    }

    /// Start (or restart) this participant's episode and return its first
    /// observation.
    ///
    /// Mid-episode this ends the episode for everyone: other participants
    /// receive an interrupted terminal delivery once the round completes.
    /// The observation is `None` for a participant that is not due to act
    /// first in synchronous mode.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub fn reset(&mut self) -> Result<Option<O>, SessionError> {
        self.ensure_running()?;
        if self.ignore_multiple_reset && !self.acted_since_reset {
            if let Some(observation) = &self.cached_reset {
                return Ok(observation.clone());
            }
        }

        self.mailboxes.send_in(Message::ResetRequested {
            participant: self.participant,
        });
        let delivery = self.await_delivery()?;
        self.acted_since_reset = false;
        if self.ignore_multiple_reset {
            self.cached_reset = Some(delivery.observation.clone());
        }
        Ok(delivery.observation)
    }

    /// Submit an action and wait for the participant's next delivery.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub fn step(&mut self, action: A) -> Result<Delivery<O>, SessionError> {
        self.submit(Some(action))
    }

    /// Check in without acting, as participants outside the current turn
    /// do in synchronous mode.
    ///
    /// # Errors
    ///
    /// See [`SessionError`]. Fails with [`Fault::ActionExpected`] when it
    /// is this participant's turn, and always in asynchronous mode.
    pub fn pass(&mut self) -> Result<Delivery<O>, SessionError> {
        self.submit(None)
    }

    fn submit(&mut self, action: Option<A>) -> Result<Delivery<O>, SessionError> {
        self.ensure_running()?;
        self.mailboxes.send_in(Message::ActionSubmitted {
            participant: self.participant,
            action,
        });
        let delivery = self.await_delivery()?;
        self.acted_since_reset = true;
        Ok(delivery)
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.mailboxes.is_running() {
            Ok(())
        } else {
            Err(SessionError::NotRunning)
        }
    }

    fn await_delivery(&self) -> Result<Delivery<O>, SessionError> {
        match self.mailboxes.recv_out(self.participant) {
            Reply::Observation(delivery) => Ok(delivery),
            Reply::Shutdown => Err(SessionError::Stopped),
            Reply::Error(fault) => {
                if self.error_handler.on_fault(self.participant, &fault) == ErrorResponse::StopServer {
                    self.mailboxes.stop(true);
                }
                Err(SessionError::Fault(fault))
            }
        }
    }
}

impl<A, O> SessionHandle<A, O> {
    /// The participant this session acts for.
    pub const fn participant(&self) -> ParticipantId {
        self.participant
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

    /// Whether the coordinator is running.
    pub fn is_running(&self) -> bool {
        self.mailboxes.is_running()
    }

    /// Stop the coordinator, once per handle, waiting for it to finish.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.mailboxes.stop(true);
        }
    }
}

impl<A, O> Drop for SessionHandle<A, O> {
    fn drop(&mut self) {
        self.close();
    }
}
