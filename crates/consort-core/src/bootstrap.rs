//! Wiring a simulation to a running coordinator and N sessions.
//!
//! [`spawn`] is the usual entry point: it builds the coordinator, starts its
//! control loop on a dedicated thread, and hands back one
//! [`SessionHandle`] per participant together with a [`ServerHandle`] for
//! lifecycle control.

use std::sync::Arc;
use std::thread::JoinHandle;

use consort_types::{CoordinatorId, ParticipantId, Simulation, Space};

use crate::config::ServerConfig;
use crate::mailbox::{LoopExit, Mailboxes};
use crate::server::CoordinatorServer;
use crate::session::SessionHandle;

/// Errors that can occur while bringing a coordinator up.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The control-loop thread could not be created.
    #[error("failed to spawn coordinator thread: {source}")]
    Thread {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The simulation reports no participants.
    #[error("simulation has no participants")]
    NoParticipants,
}

/// Lifecycle control for a running coordinator.
///
/// Dropping an attached handle stops the coordinator and joins its thread.
/// After [`detach`](Self::detach) the coordinator runs until a session or
/// a fault stops it.
pub struct ServerHandle<A, O> {
    mailboxes: Arc<Mailboxes<A, O>>,
    thread: Option<JoinHandle<LoopExit>>,
}

impl<A, O> std::fmt::Debug for ServerHandle<A, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("mailboxes", &self.mailboxes)
            .field("attached", &self.thread.is_some())
            .finish()
    }
}

impl<A, O> ServerHandle<A, O> {
    pub(crate) const fn attach(mailboxes: Arc<Mailboxes<A, O>>, thread: JoinHandle<LoopExit>) -> Self {
        Self {
            mailboxes,
            thread: Some(thread),
        }
    }

    /// The coordinator's identifier.
    pub fn id(&self) -> CoordinatorId {
        self.mailboxes.id()
    }

    /// The coordinator's mailboxes, for driving it with raw messages.
    pub const fn mailboxes(&self) -> &Arc<Mailboxes<A, O>> {
        &self.mailboxes
    }

    /// Whether the control loop is running.
    pub fn is_running(&self) -> bool {
        self.mailboxes.is_running()
    }

    /// Stop the coordinator. See [`Mailboxes::stop`].
    pub fn stop(&self, wait: bool) {
        self.mailboxes.stop(wait);
    }

    /// Report an error from outside the control loop, ending it with
    /// [`LoopExit::Faulted`].
    pub fn report_error(&self, message: impl Into<String>) {
        self.mailboxes.report_error(message);
    }

    /// How the control loop ended, once it has.
    pub fn exit(&self) -> Option<LoopExit> {
        self.mailboxes.exit()
    }

    /// Wait for the control loop to end on its own and return how it ended.
    ///
    /// Does not request a stop. Returns `None` if the handle was already
    /// detached or the thread panicked outside the loop's own recovery.
    pub fn join(mut self) -> Option<LoopExit> {
        self.thread.take().and_then(|thread| thread.join().ok())
    }

    /// Let the coordinator outlive this handle.
    pub fn detach(mut self) {
        self.thread.take();
    }
}

impl<A, O> Drop for ServerHandle<A, O> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.mailboxes.stop(true);
            if thread.join().is_err() {
                tracing::warn!(coordinator = %self.mailboxes.id(), "coordinator thread panicked");
            }
        }
    }
}

/// A started coordinator and its sessions.
pub struct Spawned<S: Simulation> {
    /// One session per participant, in participant order.
    pub sessions: Vec<SessionHandle<S::Action, S::Observation>>,
    /// Lifecycle control for the coordinator.
    pub server: ServerHandle<S::Action, S::Observation>,
}

impl<S: Simulation> std::fmt::Debug for Spawned<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawned")
            .field("sessions", &self.sessions.len())
            .field("server", &self.server)
            .finish()
    }
}

/// Start a coordinator for `simulation` and create one session per
/// participant.
///
/// Sessions take their spaces from the simulation and their error handling
/// and reset caching from `config`.
///
/// # Errors
///
/// - [`SpawnError::NoParticipants`] if the simulation has no participants.
/// - [`SpawnError::Thread`] if the control-loop thread cannot be created.
pub fn spawn<S: Simulation>(simulation: S, config: &ServerConfig) -> Result<Spawned<S>, SpawnError> {
    let num_agents = simulation.num_agents();
    if num_agents == 0 {
        return Err(SpawnError::NoParticipants);
    }

    let observation_spaces = simulation.observation_spaces();
    let action_spaces = simulation.action_spaces();
    let reward_ranges = simulation.reward_ranges();

    let server = CoordinatorServer::new(simulation, config);
    let mailboxes = Arc::clone(server.mailboxes());
    let sessions = ParticipantId::all(num_agents)
        .map(|participant| {
            let index = participant.index();
            SessionHandle::new(
                participant,
                Arc::clone(&mailboxes),
                observation_spaces.get(index).cloned().unwrap_or(Space::Discrete { n: 0 }),
                action_spaces.get(index).cloned().unwrap_or(Space::Discrete { n: 0 }),
            )
            .with_reward_range(reward_ranges.get(index).copied().unwrap_or_default())
            .with_error_handler(config.error_policy.handler())
            .with_ignore_multiple_reset(config.ignore_multiple_reset)
        })
        .collect();

    let server = server.start()?;
    tracing::info!(coordinator = %server.id(), participants = num_agents, "coordinator spawned");
    Ok(Spawned { sessions, server })
}
