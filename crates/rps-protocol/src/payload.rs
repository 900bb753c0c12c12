//! Content payloads carried inside messages.
//!
//! Snapshot formats:
//!
//! ```text
//! lobby state   <lobby>#<client>_<0|1>;<client>_<0|1>
//! game details  <client>=[<score>,<choice>,...];<client>=[<score>,...]
//! ```
//!
//! Neither format contains the frame delimiter, so both decode cleanly
//! inside a command.

use rps_core::{ClientId, LobbyId, Participant, PlayerRecord};

// ============================================================================
// Signals and fixed replies
// ============================================================================

/// Broadcast at the start of every round.
pub const TURN_START: &str = "0";

/// Broadcast once the game is over.
pub const GAME_OVER: &str = "1";

/// Reply to an accepted choice.
pub const CHOICE_ACCEPTED: &str = "OK";

/// Reply to a non-numeric choice.
pub const CHOICE_NOT_NUMERIC: &str = "Invalid choice type";

/// Reply to a number outside the card range.
pub const CHOICE_OUT_OF_RANGE: &str = "Invalid choice";

/// Reply to a duplicate or late choice.
pub const CHOICE_NOT_ACCEPTED: &str = "Choice not accepted";

/// Reply to a keepalive.
pub const PONG: &str = "Pong";

/// Sent after a corrupted frame to check the peer is still there.
pub const LIVENESS_PROBE: &str = "IS_ALIVE";

/// Sent to each player when the round barrier gives up on an idle player.
pub const IDLE_TIMEOUT: &str = "Opponent timed out";

/// Sent to the remaining players when a disconnect ends the game.
pub const GAME_ABANDONED: &str = "Game abandoned";

/// Greeting sent on attach.
pub fn welcome(lobby: &LobbyId) -> String {
    format!("Welcome to lobby {lobby}")
}

/// Notice sent to everyone else when a participant connects.
pub fn joined(client: &ClientId) -> String {
    format!("JOINED {client}")
}

/// Notice sent to the remaining participants when one leaves.
pub fn exited(client: &ClientId) -> String {
    format!("EXIT {client}")
}

/// Boolean acceptance reply for ready/unready.
pub fn acceptance(ok: bool) -> String {
    ok.to_string()
}

/// Round outcome; stalemate is reported as `-1`.
pub fn round_outcome(winner: Option<usize>) -> String {
    match winner {
        Some(w) => format!("Winner: {w}"),
        None => "Winner: -1".to_string(),
    }
}

/// Final result announcement.
pub fn game_won(winner: usize) -> String {
    format!("Player {winner} WON THE GAME!")
}

// ============================================================================
// Snapshots
// ============================================================================

/// Formats the roster snapshot.
pub fn lobby_state(lobby: &LobbyId, roster: &[Participant]) -> String {
    let players: Vec<String> = roster
        .iter()
        .map(|p| format!("{}_{}", p.client_id, u8::from(p.ready)))
        .collect();
    format!("{lobby}#{}", players.join(";"))
}

/// Parses a roster snapshot back into `(lobby, [(client, ready)])`.
pub fn parse_lobby_state(payload: &str) -> Option<(LobbyId, Vec<(ClientId, bool)>)> {
    let (lobby, players) = payload.split_once('#')?;
    let mut roster = Vec::new();
    for entry in players.split(';').filter(|e| !e.is_empty()) {
        let (client, ready) = entry.rsplit_once('_')?;
        let ready = match ready {
            "0" => false,
            "1" => true,
            _ => return None,
        };
        roster.push((ClientId::new(client), ready));
    }
    Some((LobbyId::new(lobby), roster))
}

/// Formats per-player scores and choice histories.
///
/// Players are listed in seat order; `clients` and `records` are zipped.
pub fn game_details(clients: &[ClientId], records: &[PlayerRecord]) -> String {
    let entries: Vec<String> = clients
        .iter()
        .zip(records.iter())
        .map(|(client, record)| {
            let mut fields = vec![record.score.to_string()];
            fields.extend(record.choices.iter().map(|c| c.index().to_string()));
            format!("{client}=[{}]", fields.join(","))
        })
        .collect();
    entries.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode, Command, Message};
    use rps_core::Choice;

    #[test]
    fn test_lobby_state_format() {
        let roster = vec![
            Participant {
                client_id: ClientId::new("alice"),
                ready: true,
            },
            Participant::new(ClientId::new("bob")),
        ];
        assert_eq!(
            lobby_state(&LobbyId::new("arena"), &roster),
            "arena#alice_1;bob_0"
        );
        assert_eq!(lobby_state(&LobbyId::new("empty"), &[]), "empty#");
    }

    #[test]
    fn test_parse_lobby_state() {
        let (lobby, roster) = parse_lobby_state("arena#al_ice_1;bob_0").unwrap();
        assert_eq!(lobby.as_str(), "arena");
        assert_eq!(
            roster,
            vec![(ClientId::new("al_ice"), true), (ClientId::new("bob"), false)]
        );

        let (_, roster) = parse_lobby_state("empty#").unwrap();
        assert!(roster.is_empty());

        assert!(parse_lobby_state("no-hash").is_none());
        assert!(parse_lobby_state("x#bob_2").is_none());
    }

    #[test]
    fn test_game_details_format() {
        let clients = vec![ClientId::new("alice"), ClientId::new("bob")];
        let records = vec![
            PlayerRecord {
                score: 2,
                choices: vec![Choice::Rock, Choice::Joker],
            },
            PlayerRecord {
                score: 0,
                choices: vec![],
            },
        ];
        assert_eq!(
            game_details(&clients, &records),
            "alice=[2,0,3];bob=[0]"
        );
    }

    #[test]
    fn test_game_details_survive_the_codec() {
        let clients = vec![ClientId::new("alice"), ClientId::new("bob")];
        let records = vec![
            PlayerRecord {
                score: 1,
                choices: vec![Choice::Paper],
            },
            PlayerRecord {
                score: 0,
                choices: vec![Choice::Scissors],
            },
        ];
        let msg = Message::command(Command::GameState, game_details(&clients, &records));
        assert_eq!(encode(&msg), "0:6:alice=[1,1];bob=[0,2]");
        assert_eq!(decode(encode(&msg).as_bytes()), msg);
    }

    #[test]
    fn test_round_outcome() {
        assert_eq!(round_outcome(Some(1)), "Winner: 1");
        assert_eq!(round_outcome(None), "Winner: -1");
    }

    #[test]
    fn test_notices() {
        let bob = ClientId::new("bob");
        assert_eq!(joined(&bob), "JOINED bob");
        assert_eq!(exited(&bob), "EXIT bob");
        assert_eq!(welcome(&LobbyId::new("arena")), "Welcome to lobby arena");
        assert_eq!(game_won(0), "Player 0 WON THE GAME!");
        assert_eq!(acceptance(false), "false");
    }
}
