//! Frame encoding and decoding.
//!
//! Wire form is colon-delimited UTF-8 text:
//!
//! ```text
//! 0:<opcode>:<content>    command
//! 0:<opcode>              command with empty content
//! 1:7:<content>           text (carries the nil opcode)
//! 1:<content>             text, short form (accepted on decode)
//! ```
//!
//! `decode` never fails. Anything that does not fit the shapes above
//! comes back as [`Message::Corrupted`] holding the original bytes.
//! Content containing the delimiter cannot be represented and decodes
//! as corrupted.

use tracing::debug;

use crate::message::{Command, Message, MessageKind};

/// Field delimiter.
pub const DELIMITER: char = ':';

/// Encodes a message into its wire form.
pub fn encode(msg: &Message) -> String {
    match msg {
        Message::Command { command, content } if content.is_empty() => {
            format!("{}{DELIMITER}{}", MessageKind::Command.code(), command.code())
        }
        Message::Command { command, content } => format!(
            "{}{DELIMITER}{}{DELIMITER}{content}",
            MessageKind::Command.code(),
            command.code()
        ),
        Message::Text { content } => format!(
            "{}{DELIMITER}{}{DELIMITER}{content}",
            MessageKind::Text.code(),
            Command::Nil.code()
        ),
        Message::Corrupted { raw } => format!(
            "{}{DELIMITER}{}",
            MessageKind::Corrupted.code(),
            String::from_utf8_lossy(raw)
        ),
    }
}

/// Decodes a frame. Malformed input yields [`Message::Corrupted`].
pub fn decode(bytes: &[u8]) -> Message {
    match try_decode(bytes) {
        Some(msg) => msg,
        None => {
            debug!(raw = %String::from_utf8_lossy(bytes), "Corrupted frame");
            Message::corrupted(bytes)
        }
    }
}

fn try_decode(bytes: &[u8]) -> Option<Message> {
    let text = std::str::from_utf8(bytes).ok()?;
    let parts: Vec<&str> = text.split(DELIMITER).collect();

    let (kind, rest) = match parts.as_slice() {
        [kind, rest @ ..] if rest.len() == 1 || rest.len() == 2 => (*kind, rest),
        _ => return None,
    };

    match kind {
        "0" => {
            let (code, content) = match rest {
                [code] => (*code, ""),
                [code, content] => (*code, *content),
                _ => return None,
            };
            let command = Command::from_code(code.parse().ok()?)?;
            Some(Message::command(command, content))
        }
        "1" => match rest {
            [content] => Some(Message::text(*content)),
            [code, content] => {
                code.parse::<u16>().ok()?;
                Some(Message::text(*content))
            }
            _ => None,
        },
        _ => None,
    }
}
