//! Protocol message types for lobby sessions.

use std::fmt;

/// Command opcodes.
///
/// A closed set: frames carrying any other opcode decode as
/// [`Message::Corrupted`] so an unknown command can never reach the
/// round protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Leave the lobby and close the session
    LobbyExit,
    /// Mark the sender ready
    Ready,
    /// Clear the sender's ready flag
    Unready,
    /// Server notice: the game starts after the warm-up delay
    GameStarting,
    /// Server notice: roster snapshot
    LobbyState,
    /// Choice submission (choices normally travel as text)
    ChoiceSubmit,
    /// Request (client) or report (server) of scores and choice history
    GameState,
    /// Placeholder opcode carried by text frames
    Nil,
    /// Keepalive
    Ping,
}

impl Command {
    /// Every opcode, in wire order.
    pub const ALL: [Command; 9] = [
        Command::LobbyExit,
        Command::Ready,
        Command::Unready,
        Command::GameStarting,
        Command::LobbyState,
        Command::ChoiceSubmit,
        Command::GameState,
        Command::Nil,
        Command::Ping,
    ];

    /// Returns the numeric wire code.
    pub const fn code(self) -> u16 {
        match self {
            Self::LobbyExit => 0,
            Self::Ready => 1,
            Self::Unready => 2,
            Self::GameStarting => 3,
            Self::LobbyState => 4,
            Self::ChoiceSubmit => 5,
            Self::GameState => 6,
            Self::Nil => 7,
            Self::Ping => 123,
        }
    }

    /// Maps a wire code back to an opcode.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LobbyExit => "lobby_exit",
            Self::Ready => "ready",
            Self::Unready => "unready",
            Self::GameStarting => "game_starting",
            Self::LobbyState => "lobby_state",
            Self::ChoiceSubmit => "choice_submit",
            Self::GameState => "game_state",
            Self::Nil => "nil",
            Self::Ping => "ping",
        };
        f.write_str(name)
    }
}

/// Discriminant of a [`Message`], for logging and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Text,
    Corrupted,
}

impl MessageKind {
    /// Returns the numeric kind written on the wire.
    pub const fn code(self) -> u8 {
        match self {
            Self::Command => 0,
            Self::Text => 1,
            Self::Corrupted => 2,
        }
    }
}

/// A single protocol frame.
///
/// Each variant carries only the fields valid for it: a command always
/// has an opcode, text never does, and a corrupted frame keeps the raw
/// bytes for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Command { command: Command, content: String },
    Text { content: String },
    Corrupted { raw: Vec<u8> },
}

impl Message {
    /// Creates a command message.
    pub fn command(command: Command, content: impl Into<String>) -> Self {
        Self::Command {
            command,
            content: content.into(),
        }
    }

    /// Creates a text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Creates a corrupted message from the offending frame.
    pub fn corrupted(raw: impl Into<Vec<u8>>) -> Self {
        Self::Corrupted { raw: raw.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Command { .. } => MessageKind::Command,
            Self::Text { .. } => MessageKind::Text,
            Self::Corrupted { .. } => MessageKind::Corrupted,
        }
    }

    /// Returns the content payload; `None` for corrupted frames.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Command { content, .. } | Self::Text { content } => Some(content),
            Self::Corrupted { .. } => None,
        }
    }

    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}
