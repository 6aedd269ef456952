//! Turn coordination for shared multi-participant simulations.
//!
//! A [`CoordinatorServer`] owns one [`Simulation`](consort_types::Simulation)
//! on a dedicated control thread. Each participant drives it through its own
//! [`SessionHandle`], a blocking reset/step interface indistinguishable from
//! a single-participant environment. The coordinator collects a round of
//! submissions in a [`TurnLedger`], steps the simulation once the round is
//! complete, and routes each participant its own result.
//!
//! # Modules
//!
//! - [`bootstrap`] -- [`spawn`], [`Spawned`], and the [`ServerHandle`]
//! - [`config`] -- [`ServerConfig`] loading from YAML
//! - [`ledger`] -- Per-round submission collection
//! - [`mailbox`] -- Shared channels and lifecycle signals
//! - [`server`] -- The control loop
//! - [`session`] -- Participant sessions and error handlers
//! - [`solo`] -- Thread-free adapter for one-participant simulations

pub mod bootstrap;
pub mod config;
pub mod ledger;
pub mod mailbox;
pub mod server;
pub mod session;
pub mod solo;

pub use bootstrap::{ServerHandle, SpawnError, Spawned, spawn};
pub use config::{ConfigError, ErrorPolicy, ServerConfig, TurnMode};
pub use ledger::{CollectError, IncompleteRound, Slot, TurnLedger};
pub use mailbox::{LoopExit, Mailboxes, Signal, StopGate};
pub use server::CoordinatorServer;
pub use session::{ErrorHandler, ErrorResponse, PropagateError, SessionError, SessionHandle, StopOnError};
pub use solo::{Solo, SoloError};
