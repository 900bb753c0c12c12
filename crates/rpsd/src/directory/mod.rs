//! Lobby directory using the actor pattern.
//!
//! The directory is the single owner of the lobby-id → lobby map. Every
//! lookup and mutation goes through its command channel; lobbies report
//! their own disband back through a weak sender so a lobby never keeps
//! the directory alive.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  DirectoryCommand  ┌─────────────────┐
//! │  GameServer     │───────────────────▶│ DirectoryActor  │
//! │ (per connection)│   (mpsc channel)   │                 │
//! └─────────────────┘                    │ HashMap<LobbyId,│
//!                                        │     Arc<Lobby>> │
//! ┌─────────────────┐   Remove { id }    │                 │
//! │      Lobby      │───────────────────▶│                 │
//! │ (on disband)    │   (weak sender)    └─────────────────┘
//! └─────────────────┘
//! ```

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::DirectoryActor;
pub use commands::{DirectoryCommand, DirectoryError};
pub use handle::DirectoryHandle;

use crate::config::LobbySettings;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawns the directory actor and returns a handle to it.
///
/// Every lobby the directory creates uses `settings`; at most
/// `max_lobbies` live lobbies are held at once.
pub fn spawn_directory(settings: LobbySettings, max_lobbies: usize) -> DirectoryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let actor = DirectoryActor::new(cmd_rx, cmd_tx.downgrade(), settings, max_lobbies);
    tokio::spawn(actor.run());
    DirectoryHandle::new(cmd_tx)
}
