//! Round resolution and the per-game state machine.
//!
//! `resolve` is a pure function over one round's two choices. `Game`
//! wraps it with the bookkeeping a match needs: an append-only choice
//! history per player, scores, the current round index and the win
//! threshold.
//!
//! # State machine
//!
//! ```text
//!   AwaitingChoices ──(both slots filled, resolve_round)──▶ RoundResolved
//!         ▲                                                   │
//!         └───────────────────────(open_round)────────────────┘
//!                                  │
//!               (winner reaches threshold on resolve)
//!                                  ▼
//!                               Finished
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::choice::Choice;
use crate::error::{GameError, GameResult};

/// Number of seats in a game.
pub const PLAYERS: usize = 2;

// ============================================================================
// Round Resolver
// ============================================================================

/// Outcome of resolving a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundResult {
    /// Index of the round winner; `None` on stalemate.
    pub winner: Option<usize>,
    /// Index of the player who lost a point to the JOKER rule, if any.
    pub penalized: Option<usize>,
    /// Scores after the round.
    pub scores: [u32; PLAYERS],
}

/// Resolves one round.
///
/// - Equal non-JOKER cards are a stalemate: no score change.
/// - JOKER vs SCISSORS: the SCISSORS holder takes the round but is
///   charged one point instead of scoring.
/// - JOKER vs JOKER: a fair coin picks the winner, who scores; the
///   other player loses one point.
/// - Everything else follows [`Choice::beats`]; the winner scores one.
///
/// Scores never go below zero.
pub fn resolve<R: Rng + ?Sized>(
    first: Choice,
    second: Choice,
    scores: [u32; PLAYERS],
    rng: &mut R,
) -> RoundResult {
    let mut scores = scores;

    let (winner, penalized) = match (first, second) {
        (a, b) if a == b && a != Choice::Joker => return RoundResult {
            winner: None,
            penalized: None,
            scores,
        },
        (Choice::Joker, Choice::Joker) => {
            let winner = if rng.random_bool(0.5) { 1 } else { 0 };
            let loser = PLAYERS - 1 - winner;
            award(&mut scores, winner);
            penalize(&mut scores, loser);
            (winner, Some(loser))
        }
        (Choice::Joker, Choice::Scissors) => {
            penalize(&mut scores, 1);
            (1, Some(1))
        }
        (Choice::Scissors, Choice::Joker) => {
            penalize(&mut scores, 0);
            (0, Some(0))
        }
        (a, b) => {
            let winner = if a.beats(b) { 0 } else { 1 };
            award(&mut scores, winner);
            (winner, None)
        }
    };

    RoundResult {
        winner: Some(winner),
        penalized,
        scores,
    }
}

fn award(scores: &mut [u32; PLAYERS], player: usize) {
    if let Some(score) = scores.get_mut(player) {
        *score = score.saturating_add(1);
    }
}

fn penalize(scores: &mut [u32; PLAYERS], player: usize) {
    if let Some(score) = scores.get_mut(player) {
        *score = score.saturating_sub(1);
    }
}

// ============================================================================
// Game
// ============================================================================

/// Game progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    /// The current round is collecting choices.
    AwaitingChoices,
    /// The previous round was resolved and the next one is not open yet.
    RoundResolved,
    /// A player reached the win threshold.
    Finished,
}

/// A resolved round as reported to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Index of the round that was resolved.
    pub round: usize,
    pub result: RoundResult,
    /// True if this round ended the game.
    pub finished: bool,
}

/// Per-player snapshot for the game-state query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub score: u32,
    pub choices: Vec<Choice>,
}

/// One match between two seated players.
#[derive(Debug, Clone)]
pub struct Game {
    /// Append-only; index = round number.
    history: [Vec<Choice>; PLAYERS],
    scores: [u32; PLAYERS],
    round: usize,
    win_threshold: u32,
    state: GameState,
}

impl Game {
    /// Default number of round wins needed to take the game.
    pub const DEFAULT_WIN_THRESHOLD: u32 = 3;

    /// Creates a game with round 0 open for choices.
    ///
    /// A threshold of 0 is raised to 1 so the game can terminate.
    pub fn new(win_threshold: u32) -> Self {
        Self {
            history: [Vec::new(), Vec::new()],
            scores: [0; PLAYERS],
            round: 0,
            win_threshold: win_threshold.max(1),
            state: GameState::AwaitingChoices,
        }
    }

    /// Records `player`'s choice for the current round.
    ///
    /// Returns `true` when this submission filled the last empty slot, at
    /// which point the round is ready to resolve.
    ///
    /// # Errors
    /// - `GameError::InvalidPlayer` for an index outside the seats
    /// - `GameError::Finished` once the game is over
    /// - `GameError::NotAccepting` between rounds
    /// - `GameError::AlreadySubmitted` for a duplicate or late submission
    pub fn submit(&mut self, player: usize, choice: Choice) -> GameResult<bool> {
        let round = self.round;
        match self.state {
            GameState::Finished => return Err(GameError::Finished),
            GameState::RoundResolved => return Err(GameError::NotAccepting { round }),
            GameState::AwaitingChoices => {}
        }

        let choices = self
            .history
            .get_mut(player)
            .ok_or(GameError::InvalidPlayer { player })?;

        if choices.len() > round {
            return Err(GameError::AlreadySubmitted { player, round });
        }

        choices.push(choice);
        debug!(player, round, choice = %choice, "Choice recorded");

        Ok(self.is_round_ready())
    }

    /// Returns true if every player has a choice for the current round.
    #[must_use]
    pub fn is_round_ready(&self) -> bool {
        self.state == GameState::AwaitingChoices
            && self.history.iter().all(|c| c.len() > self.round)
    }

    /// Resolves the current round and advances the round index.
    ///
    /// # Errors
    /// - `GameError::Finished` once the game is over
    /// - `GameError::RoundIncomplete` if a slot is still empty
    pub fn resolve_round<R: Rng + ?Sized>(&mut self, rng: &mut R) -> GameResult<RoundOutcome> {
        let round = self.round;
        if self.state == GameState::Finished {
            return Err(GameError::Finished);
        }
        if !self.is_round_ready() {
            return Err(GameError::RoundIncomplete { round });
        }

        let [first_history, second_history] = &self.history;
        let (first, second) = match (first_history.get(round), second_history.get(round)) {
            (Some(a), Some(b)) => (*a, *b),
            _ => return Err(GameError::RoundIncomplete { round }),
        };

        let result = resolve(first, second, self.scores, rng);
        self.scores = result.scores;
        self.round += 1;

        let finished = result
            .winner
            .and_then(|w| self.scores.get(w))
            .is_some_and(|score| *score >= self.win_threshold);

        self.state = if finished {
            GameState::Finished
        } else {
            GameState::RoundResolved
        };

        debug!(
            round,
            first = %first,
            second = %second,
            winner = ?result.winner,
            penalized = ?result.penalized,
            scores = ?self.scores,
            "Round resolved"
        );

        Ok(RoundOutcome {
            round,
            result,
            finished,
        })
    }

    /// Opens the next round for submissions.
    ///
    /// No-op unless the previous round was resolved.
    pub fn open_round(&mut self) {
        if self.state == GameState::RoundResolved {
            self.state = GameState::AwaitingChoices;
        }
    }

    /// Returns the game winner once finished: highest score, first index on ties.
    pub fn winner(&self) -> Option<usize> {
        if self.state != GameState::Finished {
            return None;
        }
        self.leader()
    }

    /// Returns the player currently ahead (first index on ties).
    pub fn leader(&self) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (i, score) in self.scores.iter().enumerate() {
            match best {
                Some((_, s)) if *score <= s => {}
                _ => best = Some((i, *score)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Returns the current scores.
    pub fn scores(&self) -> [u32; PLAYERS] {
        self.scores
    }

    /// Returns the current round index.
    pub fn current_round(&self) -> usize {
        self.round
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == GameState::Finished
    }

    pub fn win_threshold(&self) -> u32 {
        self.win_threshold
    }

    /// Returns `player`'s submitted choices, oldest first.
    pub fn history(&self, player: usize) -> Option<&[Choice]> {
        self.history.get(player).map(Vec::as_slice)
    }

    /// Snapshot of every seat's score and choice history.
    pub fn records(&self) -> Vec<PlayerRecord> {
        self.history
            .iter()
            .zip(self.scores.iter())
            .map(|(choices, score)| PlayerRecord {
                score: *score,
                choices: choices.clone(),
            })
            .collect()
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WIN_THRESHOLD)
    }
}
