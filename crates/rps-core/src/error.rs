//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors raised by the game state machine.
///
/// None of these are fatal: the coordinator turns each one into a
/// rejection reply for the participant that caused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// Player index outside the seated players
    #[error("Invalid player index: {player}")]
    InvalidPlayer { player: usize },

    /// The player already has a choice recorded for this round
    #[error("Player {player} already submitted a choice for round {round}")]
    AlreadySubmitted { player: usize, round: usize },

    /// Submissions arrived between rounds
    #[error("Round {round} is not accepting choices")]
    NotAccepting { round: usize },

    /// Resolution requested before every slot was filled
    #[error("Round {round} is missing choices")]
    RoundIncomplete { round: usize },

    /// The game already reached its win threshold
    #[error("Game is finished")]
    Finished,
}

/// Errors parsing a submitted choice.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChoiceError {
    /// The submission was not an integer
    #[error("Choice is not a number: {0:?}")]
    NotNumeric(String),

    /// The submission was an integer outside 0..=3
    #[error("Choice out of range: {0} (expected 0-3)")]
    OutOfRange(i64),
}

/// Result type for game operations.
pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_error_display() {
        let err = GameError::AlreadySubmitted { player: 1, round: 4 };
        assert_eq!(
            err.to_string(),
            "Player 1 already submitted a choice for round 4"
        );

        let err = GameError::NotAccepting { round: 2 };
        assert_eq!(err.to_string(), "Round 2 is not accepting choices");
    }

    #[test]
    fn test_choice_error_display() {
        assert_eq!(
            ChoiceError::OutOfRange(7).to_string(),
            "Choice out of range: 7 (expected 0-3)"
        );
        assert!(ChoiceError::NotNumeric("rock".into())
            .to_string()
            .contains("rock"));
    }
}
