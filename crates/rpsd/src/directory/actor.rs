//! Directory actor - the single owner of the lobby map.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Responses to dropped requesters are ignored

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use rps_core::{ClientId, LobbyId, LobbySummary};

use super::commands::{DirectoryCommand, DirectoryError};
use crate::config::LobbySettings;
use crate::lobby::Lobby;

/// The directory actor.
///
/// Processes commands sequentially; every mutation of the lobby map
/// happens inside this task.
pub struct DirectoryActor {
    receiver: mpsc::Receiver<DirectoryCommand>,

    /// Given to each lobby so it can report its own disband
    self_sender: mpsc::WeakSender<DirectoryCommand>,

    lobbies: HashMap<LobbyId, Arc<Lobby>>,

    settings: LobbySettings,

    max_lobbies: usize,
}

impl DirectoryActor {
    pub fn new(
        receiver: mpsc::Receiver<DirectoryCommand>,
        self_sender: mpsc::WeakSender<DirectoryCommand>,
        settings: LobbySettings,
        max_lobbies: usize,
    ) -> Self {
        Self {
            receiver,
            self_sender,
            lobbies: HashMap::new(),
            settings,
            max_lobbies,
        }
    }

    /// Runs until every handle is dropped.
    pub async fn run(mut self) {
        info!(max_lobbies = self.max_lobbies, "Lobby directory starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(lobbies = self.lobbies.len(), "Lobby directory stopped");
    }

    fn handle_command(&mut self, cmd: DirectoryCommand) {
        match cmd {
            DirectoryCommand::Create { id, respond_to } => {
                let _ = respond_to.send(self.handle_create(id));
            }
            DirectoryCommand::Get { id, respond_to } => {
                let _ = respond_to.send(self.live(&id));
            }
            DirectoryCommand::List { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            DirectoryCommand::FindClient { client, respond_to } => {
                let _ = respond_to.send(self.handle_find_client(&client));
            }
            DirectoryCommand::Remove { id } => self.handle_remove(&id),
            DirectoryCommand::Shutdown { respond_to } => {
                let lobbies: Vec<Arc<Lobby>> = self.lobbies.drain().map(|(_, l)| l).collect();
                info!(lobbies = lobbies.len(), "Lobby directory shutting down");
                let _ = respond_to.send(lobbies);
            }
        }
    }

    fn handle_create(&mut self, id: LobbyId) -> Result<Arc<Lobby>, DirectoryError> {
        self.prune();

        if self.lobbies.contains_key(&id) {
            return Err(DirectoryError::LobbyExists(id));
        }
        if self.lobbies.len() >= self.max_lobbies {
            return Err(DirectoryError::DirectoryFull {
                max: self.max_lobbies,
            });
        }

        let lobby = Lobby::with_directory(
            id.clone(),
            self.settings.clone(),
            self.self_sender.clone(),
        );
        self.lobbies.insert(id.clone(), Arc::clone(&lobby));
        info!(lobby = %id, total = self.lobbies.len(), "Lobby created");
        Ok(lobby)
    }

    fn handle_list(&mut self) -> Vec<LobbySummary> {
        self.prune();
        let mut summaries: Vec<LobbySummary> =
            self.lobbies.values().map(|lobby| lobby.summary()).collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        summaries
    }

    fn handle_find_client(&self, client: &ClientId) -> Option<Arc<Lobby>> {
        self.lobbies
            .values()
            .find(|lobby| !lobby.is_disbanded() && lobby.has_participant(client))
            .cloned()
    }

    /// Removes `id` only if that lobby is disbanded; a replacement created
    /// under the same id stays.
    fn handle_remove(&mut self, id: &LobbyId) {
        if self.lobbies.get(id).is_some_and(|lobby| lobby.is_disbanded()) {
            self.lobbies.remove(id);
            debug!(lobby = %id, remaining = self.lobbies.len(), "Lobby removed");
        }
    }

    fn live(&self, id: &LobbyId) -> Option<Arc<Lobby>> {
        self.lobbies
            .get(id)
            .filter(|lobby| !lobby.is_disbanded())
            .cloned()
    }

    fn prune(&mut self) {
        self.lobbies.retain(|_, lobby| !lobby.is_disbanded());
    }

    #[cfg(test)]
    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }
}
