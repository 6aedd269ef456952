//! Shared type definitions for the Consort turn coordinator.
//!
//! Consort turns one shared multi-participant simulation into N blocking,
//! single-participant sessions. This crate holds the vocabulary every other
//! crate speaks: identifiers, the simulation contract, the inbound and
//! outbound message enums, and the fault taxonomy.
//!
//! # Modules
//!
//! - [`ids`] -- Coordinator and participant identifiers
//! - [`spaces`] -- Observation/action space descriptors and reward ranges
//! - [`info`] -- Per-participant auxiliary data
//! - [`fault`] -- Faults reported back to participants
//! - [`message`] -- Inbound [`Message`], outbound [`Reply`], and [`Delivery`]
//! - [`simulation`] -- The [`Simulation`] trait

pub mod fault;
pub mod ids;
pub mod info;
pub mod message;
pub mod simulation;
pub mod spaces;

pub use fault::Fault;
pub use ids::{CoordinatorId, ParticipantId};
pub use info::{INTERRUPTED_KEY, Info};
pub use message::{Delivery, Message, Reply};
pub use simulation::{ResetOutcome, Simulation, SimulationError, StepOutcome};
pub use spaces::{RewardRange, Space};
