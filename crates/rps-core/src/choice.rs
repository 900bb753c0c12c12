//! The four playable cards.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ChoiceError;

/// A card played in one round.
///
/// Discriminants are the wire values a client submits (`0`..=`3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Choice {
    Rock = 0,
    Paper = 1,
    Scissors = 2,
    /// The dangerous card: beats ROCK and PAPER, loses to SCISSORS at a cost.
    Joker = 3,
}

impl Choice {
    /// All choices in wire order.
    pub const ALL: [Choice; 4] = [Choice::Rock, Choice::Paper, Choice::Scissors, Choice::Joker];

    /// Returns the wire value.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Maps a wire value back to a choice.
    pub fn from_index(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Rock),
            1 => Some(Self::Paper),
            2 => Some(Self::Scissors),
            3 => Some(Self::Joker),
            _ => None,
        }
    }

    /// Parses a text submission.
    ///
    /// Surrounding whitespace is ignored. Distinguishes non-numeric input
    /// from numbers outside the card range so each can be answered with
    /// its own rejection.
    pub fn parse(text: &str) -> Result<Self, ChoiceError> {
        let trimmed = text.trim();
        let value: i64 = trimmed
            .parse()
            .map_err(|_| ChoiceError::NotNumeric(trimmed.to_string()))?;
        Self::from_index(value).ok_or(ChoiceError::OutOfRange(value))
    }

    /// Returns true if `self` takes the round against `other`.
    ///
    /// Equal cards never beat each other; JOKER against JOKER is decided
    /// by the resolver, not by this table.
    pub fn beats(self, other: Choice) -> bool {
        matches!(
            (self, other),
            (Choice::Rock, Choice::Scissors)
                | (Choice::Paper, Choice::Rock)
                | (Choice::Scissors, Choice::Paper)
                | (Choice::Scissors, Choice::Joker)
                | (Choice::Joker, Choice::Rock)
                | (Choice::Joker, Choice::Paper)
        )
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Rock => "ROCK",
            Self::Paper => "PAPER",
            Self::Scissors => "SCISSORS",
            Self::Joker => "JOKER",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        assert_eq!(Choice::parse("0"), Ok(Choice::Rock));
        assert_eq!(Choice::parse(" 3\n"), Ok(Choice::Joker));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        assert!(matches!(
            Choice::parse("rock"),
            Err(ChoiceError::NotNumeric(_))
        ));
        assert!(matches!(Choice::parse(""), Err(ChoiceError::NotNumeric(_))));
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert_eq!(Choice::parse("4"), Err(ChoiceError::OutOfRange(4)));
        assert_eq!(Choice::parse("-1"), Err(ChoiceError::OutOfRange(-1)));
    }

    #[test]
    fn test_index_roundtrip() {
        for choice in Choice::ALL {
            assert_eq!(Choice::from_index(i64::from(choice.index())), Some(choice));
        }
    }

    #[test]
    fn test_beats_is_antisymmetric() {
        for a in Choice::ALL {
            assert!(!a.beats(a));
            for b in Choice::ALL {
                if a != b {
                    assert!(a.beats(b) != b.beats(a), "{a} vs {b}");
                }
            }
        }
    }
}
