//! Reference simulations for the Consort coordinator.
//!
//! # Modules
//!
//! - [`tic_tac_toe`] -- Two-player tic-tac-toe on an N by N board
//! - [`countdown`] -- A scripted counting game with fault injection
//! - [`score`] -- Cumulative per-participant scores

pub mod countdown;
pub mod score;
pub mod tic_tac_toe;

pub use countdown::{Countdown, CountdownConfig};
pub use score::ScoreTracker;
pub use tic_tac_toe::{Board, Move, MoveError, TicTacToe};
