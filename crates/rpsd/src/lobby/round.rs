//! Round collection.
//!
//! Each participant's text inbox is drained by a forwarder task into one
//! merged channel tagged with the seat index. The game loop then runs a
//! barrier per round: it waits on the merged channel (and on cancellation
//! and the idle timeout) until both slots of the current round are
//! filled, resolves, broadcasts, and opens the next round.
//!
//! The lobby's `TurnGate` is opened just before each `TURN_START` and
//! closed as soon as the barrier releases. Every text carries the round
//! that was open when its session read it; a choice stamped for any
//! other round is refused, however late the barrier gets to it.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rps_core::{Choice, ChoiceError, ClientId, PLAYERS};
use rps_protocol::{payload, Command, Message};

use super::{DisbandReason, Lobby};
use crate::bus::{InboundText, SessionId};

/// One text message from a seated player.
#[derive(Debug)]
struct Submission {
    seat: usize,
    session: SessionId,
    text: String,
    /// Round open when the text was read
    round: Option<usize>,
}

/// Why a round barrier gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarrierExit {
    Cancelled,
    IdleTimeout,
    InboxesClosed,
}

/// Plays the game to the end, then disbands the lobby.
pub(super) async fn run_game(lobby: &Arc<Lobby>, seats: Vec<ClientId>) {
    let (tx, mut submissions) = mpsc::channel(lobby.settings.inbox_capacity.max(1) * PLAYERS);

    for (seat, client) in seats.iter().enumerate() {
        let inbox = lobby
            .bus
            .session_for(client)
            .and_then(|session| session.take_text_inbox().map(|inbox| (session.id(), inbox)));
        let Some((session, mut inbox)) = inbox else {
            warn!(lobby = %lobby.id, client_id = %client, "Player has no live session");
            lobby.bus.publish(&Message::text(payload::GAME_ABANDONED));
            lobby.disband(DisbandReason::ParticipantLeft);
            return;
        };
        // Drained here, before the first TURN_START goes out
        discard_stale(seat, &mut inbox);
        lobby.tasks.spawn(forward_choices(
            seat,
            session,
            inbox,
            tx.clone(),
            lobby.cancel.clone(),
        ));
    }
    drop(tx);

    let mut rng = StdRng::from_os_rng();

    loop {
        let Some(round) = lobby.with_game(|game| {
            game.open_round();
            game.current_round()
        }) else {
            return;
        };
        debug!(lobby = %lobby.id, round, "Round open");
        lobby.turn.open(round);
        lobby.bus.publish(&Message::text(payload::TURN_START));

        let collected = collect_round(lobby, &mut submissions).await;
        lobby.turn.close();
        match collected {
            Ok(()) => {}
            Err(BarrierExit::Cancelled) => return,
            Err(BarrierExit::IdleTimeout) => {
                warn!(lobby = %lobby.id, round, "Round timed out waiting for choices");
                lobby.bus.publish(&Message::text(payload::IDLE_TIMEOUT));
                lobby.disband(DisbandReason::IdleTimeout);
                return;
            }
            Err(BarrierExit::InboxesClosed) => {
                lobby.bus.publish(&Message::text(payload::GAME_ABANDONED));
                lobby.disband(DisbandReason::ParticipantLeft);
                return;
            }
        }

        let outcome = match lobby.with_game(|game| game.resolve_round(&mut rng)) {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                error!(lobby = %lobby.id, round, error = %e, "Round failed to resolve");
                lobby.disband(DisbandReason::ParticipantLeft);
                return;
            }
            None => return,
        };
        lobby.bus.publish(&Message::text(payload::round_outcome(
            outcome.result.winner,
        )));

        // Anything queued now is late for the round that just closed
        while let Ok(late) = submissions.try_recv() {
            handle_submission(lobby, late);
        }

        if outcome.finished {
            break;
        }
    }

    finish(lobby).await;
}

/// Waits until every seat has a valid choice for the current round.
async fn collect_round(
    lobby: &Lobby,
    submissions: &mut mpsc::Receiver<Submission>,
) -> Result<(), BarrierExit> {
    let idle = lobby.settings.idle_timeout();
    let deadline = async move {
        match idle {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            _ = lobby.cancel.cancelled() => return Err(BarrierExit::Cancelled),

            submission = submissions.recv() => {
                let Some(submission) = submission else {
                    return Err(BarrierExit::InboxesClosed);
                };
                if handle_submission(lobby, submission) {
                    return Ok(());
                }
            }

            _ = &mut deadline => return Err(BarrierExit::IdleTimeout),
        }
    }
}

/// Validates and records one submission, replying to its sender.
///
/// Returns true if it completed the round.
fn handle_submission(lobby: &Lobby, submission: Submission) -> bool {
    let Submission {
        seat,
        session,
        text,
        round,
    } = submission;

    let open = lobby.with_game(|game| game.current_round());
    if round.is_none() || round != open {
        debug!(lobby = %lobby.id, seat, stamped = ?round, open = ?open, "Choice outside its round");
        lobby
            .bus
            .publish_to_session(&Message::text(payload::CHOICE_NOT_ACCEPTED), session);
        return false;
    }

    let (reply, complete) = match Choice::parse(&text) {
        Err(ChoiceError::NotNumeric(_)) => (payload::CHOICE_NOT_NUMERIC, false),
        Err(ChoiceError::OutOfRange(_)) => (payload::CHOICE_OUT_OF_RANGE, false),
        Ok(choice) => match lobby.with_game(|game| game.submit(seat, choice)) {
            Some(Ok(complete)) => (payload::CHOICE_ACCEPTED, complete),
            Some(Err(e)) => {
                debug!(lobby = %lobby.id, seat, error = %e, "Choice rejected");
                (payload::CHOICE_NOT_ACCEPTED, false)
            }
            None => (payload::CHOICE_NOT_ACCEPTED, false),
        },
    };

    lobby.bus.publish_to_session(&Message::text(reply), session);
    complete
}

/// Announces the result, holds the grace delay and disbands.
async fn finish(lobby: &Lobby) {
    let winner = lobby.with_game(|game| game.winner()).flatten();
    let scores = lobby.scores();

    if let Some(details) = lobby.game_details() {
        lobby
            .bus
            .publish(&Message::command(Command::GameState, details));
    }
    if let Some(winner) = winner {
        lobby.bus.publish(&Message::text(payload::game_won(winner)));
    }
    lobby.bus.publish(&Message::text(payload::GAME_OVER));
    info!(lobby = %lobby.id, winner = ?winner, scores = ?scores, "Game finished");

    tokio::select! {
        _ = lobby.cancel.cancelled() => return,
        _ = tokio::time::sleep(lobby.settings.grace()) => {}
    }
    lobby.disband(DisbandReason::GameOver);
}

/// Text sent before the game started is chatter, not a choice.
fn discard_stale(seat: usize, inbox: &mut mpsc::Receiver<InboundText>) {
    let mut stale = 0usize;
    while inbox.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        debug!(seat, stale, "Discarded text received before the game");
    }
}

/// Moves one player's text into the merged submission channel.
async fn forward_choices(
    seat: usize,
    session: SessionId,
    mut inbox: mpsc::Receiver<InboundText>,
    submissions: mpsc::Sender<Submission>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            text = inbox.recv() => {
                let Some(InboundText { content, round }) = text else { break };
                let submission = Submission {
                    seat,
                    session,
                    text: content,
                    round,
                };
                if submissions.send(submission).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(seat, session, "Choice forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::bus::SessionHandle;
    use crate::config::{LobbySettings, Timing};
    use rps_core::LobbyState;

    struct Seat {
        session: SessionId,
        outbox: mpsc::Receiver<String>,
        text: mpsc::Sender<InboundText>,
    }

    fn create_game_lobby(idle_timeout: Option<Duration>) -> (Arc<Lobby>, Vec<Seat>) {
        let settings = LobbySettings::default().with_timing(Timing {
            warmup: Duration::from_millis(1),
            grace: Duration::from_millis(1),
            idle_timeout,
            write_timeout: Duration::from_millis(100),
        });
        let lobby = Lobby::new("arena", settings);
        let mut seats = Vec::new();
        for (i, name) in ["alice", "bob"].into_iter().enumerate() {
            lobby.join(ClientId::new(name)).unwrap();
            let (out_tx, outbox) = mpsc::channel(64);
            let (text, text_rx) = mpsc::channel(16);
            let handle = SessionHandle::new(
                i as SessionId,
                ClientId::new(name),
                out_tx,
                text_rx,
                lobby.cancel.child_token(),
            );
            lobby.bus.register(Arc::new(handle));
            seats.push(Seat {
                session: i as SessionId,
                outbox,
                text,
            });
        }
        {
            let mut inner = lobby.inner.lock();
            inner.state = LobbyState::InProgress;
            inner.game = Some(rps_core::Game::new(lobby.settings.win_threshold));
        }
        (lobby, seats)
    }

    fn submission(seat: usize, text: &str) -> Submission {
        stamped(seat, text, Some(0))
    }

    fn stamped(seat: usize, text: &str, round: Option<usize>) -> Submission {
        Submission {
            seat,
            session: seat as SessionId,
            text: text.to_string(),
            round,
        }
    }

    fn inbound(content: &str, round: Option<usize>) -> InboundText {
        InboundText {
            content: content.to_string(),
            round,
        }
    }

    fn drain(outbox: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = outbox.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_submission_replies() {
        let (lobby, mut seats) = create_game_lobby(None);

        assert!(!handle_submission(&lobby, submission(0, "rock")));
        assert!(!handle_submission(&lobby, submission(0, "9")));
        assert!(!handle_submission(&lobby, submission(0, "0")));
        assert!(!handle_submission(&lobby, submission(0, "1")));
        assert!(handle_submission(&lobby, submission(1, "2")));

        let alice = drain(&mut seats[0].outbox);
        assert_eq!(
            alice,
            vec![
                "1:7:Invalid choice type",
                "1:7:Invalid choice",
                "1:7:OK",
                "1:7:Choice not accepted",
            ]
        );
        assert_eq!(drain(&mut seats[1].outbox), vec!["1:7:OK"]);
    }

    #[test]
    fn test_late_submission_after_resolve_is_rejected() {
        let (lobby, mut seats) = create_game_lobby(None);
        handle_submission(&lobby, submission(0, "0"));
        handle_submission(&lobby, submission(1, "2"));
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = lobby
            .with_game(|g| g.resolve_round(&mut rng))
            .unwrap()
            .unwrap();
        assert_eq!(outcome.result.winner, Some(0));

        drain(&mut seats[1].outbox);
        assert!(!handle_submission(&lobby, submission(1, "1")));
        assert_eq!(drain(&mut seats[1].outbox), vec!["1:7:Choice not accepted"]);
        assert_eq!(lobby.with_game(|g| g.current_round()), Some(1));
        assert_eq!(lobby.scores(), Some([1, 0]));
    }

    #[test]
    fn test_choice_stamped_for_another_round_is_refused() {
        let (lobby, mut seats) = create_game_lobby(None);
        handle_submission(&lobby, submission(0, "0"));
        assert!(handle_submission(&lobby, submission(1, "2")));
        let mut rng = StdRng::seed_from_u64(7);
        lobby.with_game(|g| g.resolve_round(&mut rng)).unwrap().unwrap();
        lobby.with_game(|g| g.open_round());
        drain(&mut seats[0].outbox);

        // Read while round 0 was open, handled after round 1 opened
        assert!(!handle_submission(&lobby, stamped(0, "1", Some(0))));
        // Read between rounds
        assert!(!handle_submission(&lobby, stamped(0, "1", None)));
        assert_eq!(
            drain(&mut seats[0].outbox),
            vec!["1:7:Choice not accepted", "1:7:Choice not accepted"]
        );
        assert_eq!(
            lobby.with_game(|g| g.history(0).map(<[Choice]>::to_vec)),
            Some(Some(vec![Choice::Rock]))
        );

        assert!(!handle_submission(&lobby, stamped(0, "1", Some(1))));
        assert_eq!(drain(&mut seats[0].outbox), vec!["1:7:OK"]);
    }

    #[tokio::test]
    async fn test_barrier_observes_cancellation() {
        let (lobby, _seats) = create_game_lobby(None);
        let (_tx, mut rx) = mpsc::channel(4);

        let barrier = {
            let lobby = Arc::clone(&lobby);
            tokio::spawn(async move { collect_round(&lobby, &mut rx).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        lobby.disband(DisbandReason::Shutdown);

        let result = tokio::time::timeout(Duration::from_secs(1), barrier)
            .await
            .expect("barrier must wake on cancel")
            .unwrap();
        assert_eq!(result, Err(BarrierExit::Cancelled));
    }

    #[tokio::test]
    async fn test_barrier_idle_timeout() {
        let (lobby, _seats) = create_game_lobby(Some(Duration::from_millis(20)));
        let (_tx, mut rx) = mpsc::channel(4);
        assert_eq!(
            collect_round(&lobby, &mut rx).await,
            Err(BarrierExit::IdleTimeout)
        );
    }

    #[tokio::test]
    async fn test_barrier_resolves_exactly_once_per_round() {
        let (lobby, _seats) = create_game_lobby(None);
        let (tx, mut rx) = mpsc::channel(8);

        tx.send(submission(0, "0")).await.unwrap();
        tx.send(submission(0, "1")).await.unwrap();
        tx.send(submission(1, "2")).await.unwrap();
        assert_eq!(collect_round(&lobby, &mut rx).await, Ok(()));
        assert_eq!(lobby.with_game(|g| g.is_round_ready()), Some(true));
        assert_eq!(
            lobby.with_game(|g| g.history(0).map(<[Choice]>::to_vec)),
            Some(Some(vec![Choice::Rock]))
        );
    }

    #[tokio::test]
    async fn test_stale_text_is_not_forwarded() {
        let (lobby, seats) = create_game_lobby(None);
        let seat = seats.into_iter().next().unwrap();
        let mut inbox = lobby
            .bus
            .session_for(&ClientId::new("alice"))
            .and_then(|s| s.take_text_inbox())
            .unwrap();

        seat.text.send(inbound("hello", None)).await.unwrap();
        discard_stale(0, &mut inbox);

        let (tx, mut rx) = mpsc::channel(4);
        lobby.tasks.spawn(forward_choices(
            0,
            seat.session,
            inbox,
            tx,
            lobby.cancel.clone(),
        ));
        seat.text.send(inbound("1", Some(0))).await.unwrap();

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.text, "1");
        assert_eq!(forwarded.seat, 0);
        assert_eq!(forwarded.round, Some(0));
    }
}
