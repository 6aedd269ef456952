//! Two-player tic-tac-toe on a square board.
//!
//! Participant 0 moves first. Each move is a [`Move`] naming an empty cell.
//! The game ends when a participant completes a row, a column, or one of
//! the two diagonals, or when the board is full. On a win the winner gets
//! `+1` and the loser `-1`; a draw pays `0` to both. Once the game is over
//! both participants are terminated and `info` carries `winner` (the
//! winner's index, or `null` for a draw) and `winning_seq` (the completed
//! line as `[row, col]` pairs).

use consort_types::{
    Info, ParticipantId, ResetOutcome, RewardRange, Simulation, SimulationError, Space,
    StepOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::score::ScoreTracker;

/// Value of an empty cell.
pub const EMPTY: i64 = -1;

const NUM_PLAYERS: usize = 2;

/// A cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// Zero-based row.
    pub row: usize,
    /// Zero-based column.
    pub col: usize,
}

impl Move {
    /// Create a move.
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl From<[usize; 2]> for Move {
    fn from([row, col]: [usize; 2]) -> Self {
        Self::new(row, col)
    }
}

/// Why a move was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    /// The game has already ended.
    #[error("illegal action: the game is over")]
    GameOver,

    /// The cell is already taken.
    #[error("illegal action: cell {row}, {col} is not empty")]
    Occupied {
        /// Row of the taken cell.
        row: usize,
        /// Column of the taken cell.
        col: usize,
    },

    /// The cell lies outside the board.
    #[error("illegal action: cell {row}, {col} is off the board")]
    OffBoard {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },

    /// Not exactly one move was supplied.
    #[error("expected exactly one move, got {got}")]
    WrongArity {
        /// Number of moves supplied.
        got: usize,
    },
}

impl From<MoveError> for SimulationError {
    fn from(err: MoveError) -> Self {
        Self::new(err.to_string())
    }
}

/// Row-major board contents: [`EMPTY`] or the index of the participant that
/// took the cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    size: usize,
    cells: Vec<i64>,
}

impl Board {
    /// An empty `size` by `size` board.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![EMPTY; size.saturating_mul(size)],
        }
    }

    /// Side length.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Cell contents, or `None` off the board.
    pub fn get(&self, row: usize, col: usize) -> Option<i64> {
        self.offset(row, col).and_then(|i| self.cells.get(i).copied())
    }

    /// Whether a cell is on the board and empty.
    pub fn is_free(&self, row: usize, col: usize) -> bool {
        self.get(row, col) == Some(EMPTY)
    }

    /// Number of empty cells.
    pub fn num_empty(&self) -> usize {
        self.cells.iter().filter(|c| **c == EMPTY).count()
    }

    /// Every empty cell, in row-major order.
    pub fn free_cells(&self) -> Vec<Move> {
        (0..self.size)
            .flat_map(|row| (0..self.size).map(move |col| Move::new(row, col)))
            .filter(|m| self.is_free(m.row, m.col))
            .collect()
    }

    /// The flat row-major contents.
    pub fn cells(&self) -> &[i64] {
        &self.cells
    }

    fn offset(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.size || col >= self.size {
            return None;
        }
        row.checked_mul(self.size)?.checked_add(col)
    }

    fn set(&mut self, row: usize, col: usize, value: i64) {
        if let Some(cell) = self.offset(row, col).and_then(|i| self.cells.get_mut(i)) {
            *cell = value;
        }
    }

    /// The line through `(row, col)` completely owned by `owner`, if any.
    fn completed_line(&self, row: usize, col: usize, owner: i64) -> Option<Vec<Move>> {
        let n = self.size;
        let last = n.checked_sub(1)?;
        let mut lines: Vec<Vec<Move>> = vec![
            (0..n).map(|c| Move::new(row, c)).collect(),
            (0..n).map(|r| Move::new(r, col)).collect(),
        ];
        if row == col {
            lines.push((0..n).map(|i| Move::new(i, i)).collect());
        }
        if row.checked_add(col) == Some(last) {
            lines.push(
                (0..n)
                    .filter_map(|i| last.checked_sub(i).map(|c| Move::new(i, c)))
                    .collect(),
            );
        }
        lines
            .into_iter()
            .find(|line| line.iter().all(|m| self.get(m.row, m.col) == Some(owner)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    InProgress,
    Won { winner: usize, line: Vec<Move> },
    Draw,
}

/// Tic-tac-toe for two participants.
#[derive(Debug, Clone)]
pub struct TicTacToe {
    board: Board,
    to_move: usize,
    outcome: Outcome,
    scores: ScoreTracker,
}

impl Default for TicTacToe {
    fn default() -> Self {
        Self::new(3)
    }
}

impl TicTacToe {
    /// A game on a `size` by `size` board.
    pub fn new(size: usize) -> Self {
        Self {
            board: Board::new(size),
            to_move: 0,
            outcome: Outcome::InProgress,
            scores: ScoreTracker::new(NUM_PLAYERS),
        }
    }

    /// Current board.
    pub const fn board(&self) -> &Board {
        &self.board
    }

    /// Whether the game has ended.
    pub fn is_over(&self) -> bool {
        self.outcome != Outcome::InProgress
    }

    /// Winner of a finished game; `None` for a draw or a game in progress.
    pub const fn winner(&self) -> Option<usize> {
        match &self.outcome {
            Outcome::Won { winner, .. } => Some(*winner),
            Outcome::InProgress | Outcome::Draw => None,
        }
    }

    /// Scores accumulated over every game played.
    pub const fn scores(&self) -> &ScoreTracker {
        &self.scores
    }

    /// Legal moves for the participant to move.
    pub fn legal_moves(&self) -> Vec<Move> {
        if self.is_over() {
            Vec::new()
        } else {
            self.board.free_cells()
        }
    }

    fn play(&mut self, mv: Move) -> Result<(), MoveError> {
        if self.is_over() {
            return Err(MoveError::GameOver);
        }
        let Move { row, col } = mv;
        match self.board.get(row, col) {
            None => return Err(MoveError::OffBoard { row, col }),
            Some(EMPTY) => {}
            Some(_) => return Err(MoveError::Occupied { row, col }),
        }

        let owner = i64::try_from(self.to_move).unwrap_or(EMPTY);
        self.board.set(row, col, owner);

        if let Some(line) = self.board.completed_line(row, col, owner) {
            self.outcome = Outcome::Won {
                winner: self.to_move,
                line,
            };
        } else if self.board.num_empty() == 0 {
            self.outcome = Outcome::Draw;
        }
        self.to_move = usize::from(self.to_move == 0);
        Ok(())
    }

    fn rewards(&self) -> Vec<f64> {
        match &self.outcome {
            Outcome::Won { winner, .. } => (0..NUM_PLAYERS)
                .map(|p| if p == *winner { 1.0 } else { -1.0 })
                .collect(),
            Outcome::InProgress | Outcome::Draw => vec![0.0; NUM_PLAYERS],
        }
    }

    fn info(&self) -> Info {
        match &self.outcome {
            Outcome::InProgress => Info::new(),
            Outcome::Won { winner, line } => Info::new().with("winner", *winner).with(
                "winning_seq",
                line.iter().map(|m| json!([m.row, m.col])).collect::<Vec<_>>(),
            ),
            Outcome::Draw => Info::new()
                .with("winner", serde_json::Value::Null)
                .with("winning_seq", json!([])),
        }
    }
}

impl Simulation for TicTacToe {
    type Observation = Board;
    type Action = Move;

    fn num_agents(&self) -> usize {
        NUM_PLAYERS
    }

    fn agent_turn(&self) -> Vec<ParticipantId> {
        vec![ParticipantId(self.to_move)]
    }

    fn reset(&mut self) -> ResetOutcome<Board> {
        self.board = Board::new(self.board.size());
        self.to_move = 0;
        self.outcome = Outcome::InProgress;
        ResetOutcome {
            observations: vec![self.board.clone(); NUM_PLAYERS],
            infos: vec![Info::new(); NUM_PLAYERS],
        }
    }

    fn step(&mut self, actions: Vec<Move>) -> Result<StepOutcome<Board>, SimulationError> {
        let [mv] = actions.as_slice() else {
            return Err(MoveError::WrongArity { got: actions.len() }.into());
        };
        self.play(*mv)?;

        let rewards = self.rewards();
        self.scores.update(&rewards);
        let over = self.is_over();
        if over {
            tracing::debug!(winner = ?self.winner(), "game over");
        }
        Ok(StepOutcome {
            observations: vec![self.board.clone(); NUM_PLAYERS],
            rewards,
            terminated: vec![over; NUM_PLAYERS],
            truncated: vec![false; NUM_PLAYERS],
            infos: vec![self.info(); NUM_PLAYERS],
        })
    }

    fn observation_spaces(&self) -> Vec<Space> {
        let space = Space::IntBox {
            shape: vec![self.board.size(), self.board.size()],
            low: EMPTY,
            high: 1,
        };
        vec![space; NUM_PLAYERS]
    }

    fn action_spaces(&self) -> Vec<Space> {
        let high = i64::try_from(self.board.size().saturating_sub(1)).unwrap_or(i64::MAX);
        let space = Space::IntBox {
            shape: vec![2],
            low: 0,
            high,
        };
        vec![space; NUM_PLAYERS]
    }

    fn reward_ranges(&self) -> Vec<RewardRange> {
        vec![RewardRange::new(-1.0, 1.0); NUM_PLAYERS]
    }
}
