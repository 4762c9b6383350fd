//! Registry of all active rooms: lazy creation, simulation task ownership,
//! and teardown

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::config::Config;
use crate::game::ai::AiController;
use crate::game::state::MatchRules;
use crate::game::{GameSession, Participant, SessionEnd, SessionSeats};
use crate::outcome::MatchOutcome;
use crate::ws::protocol::{Outbound, Side};

use super::{Room, RoomMode};

/// Successful join: the caller's view into the room
pub struct JoinGrant {
    pub room: Arc<Room>,
    pub slot: Side,
    pub reconnected: bool,
    pub is_new_room: bool,
    pub events_rx: broadcast::Receiver<Outbound>,
}

/// Join refusals surfaced to the connection handler
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("room {room_id} is full")]
    RoomFull { room_id: String },
}

/// Sole owner of room existence. Creation happens lazily on first join;
/// deletion happens once a room has no open connections.
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
    config: Arc<Config>,
    outcome_tx: mpsc::Sender<MatchOutcome>,
}

impl RoomRegistry {
    pub fn new(config: Arc<Config>, outcome_tx: mpsc::Sender<MatchOutcome>) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
            outcome_tx,
        }
    }

    /// Join (or lazily create) a room and, when it becomes ready, start its
    /// simulation task exactly once.
    pub fn join(
        self: &Arc<Self>,
        mode: RoomMode,
        room_id: &str,
        who: &Participant,
    ) -> Result<JoinGrant, JoinError> {
        let key = format!("{}/{}", mode.prefix(), room_id);

        let mut is_new_room = false;
        let room = self
            .rooms
            .entry(key)
            .or_insert_with(|| {
                is_new_room = true;
                Arc::new(Room::new(room_id.to_string(), mode))
            })
            .clone();

        let (slot, reconnected) = room.join(who).map_err(|_| JoinError::RoomFull {
            room_id: room_id.to_string(),
        })?;

        info!(
            room_id = %room_id,
            mode = mode.prefix(),
            user_id = %who.user_id,
            handle = %who.handle,
            ?slot,
            reconnected,
            is_new_room,
            "player joined room"
        );

        self.maybe_start_simulation(&room);

        Ok(JoinGrant {
            events_rx: room.subscribe(),
            room,
            slot,
            reconnected,
            is_new_room,
        })
    }

    /// Drop one socket; tears the room down once nobody is connected
    pub fn leave(self: &Arc<Self>, room: &Arc<Room>, user_id: uuid::Uuid) {
        let summary = room.leave(user_id);

        info!(
            room_id = %room.id,
            user_id = %user_id,
            identity_disconnected = summary.identity_disconnected,
            room_empty = summary.room_empty,
            "player left room"
        );

        if summary.room_empty {
            room.stop();
            self.drop_room(room);
        }
    }

    fn drop_room(&self, room: &Arc<Room>) {
        if self.rooms.remove(&room.registry_key()).is_some() {
            let age_secs = (chrono::Utc::now() - room.created_at).num_seconds();
            info!(room_id = %room.id, mode = room.mode.prefix(), age_secs, "room removed");
        }
    }

    /// Start the per-room tick loop (and AI task for AI rooms) once the
    /// room is ready. Guarded so concurrent joins race safely: the first
    /// caller past the fullness check wins, late callers observe the task
    /// already claimed.
    fn maybe_start_simulation(self: &Arc<Self>, room: &Arc<Room>) {
        let ready = match room.mode {
            RoomMode::Duel => room.is_full(),
            // AI and local matches are playable from the first join
            RoomMode::Ai | RoomMode::Local => true,
        };
        if !ready || !room.claim_simulation_start() {
            return;
        }

        let Some((commands_rx, state_tx)) = room.take_session_channels() else {
            error!(room_id = %room.id, "room channels already claimed");
            return;
        };

        let (left, right) = room.occupants();
        let Some(left) = left else {
            error!(room_id = %room.id, "cannot start a simulation with no seated player");
            return;
        };

        let session = GameSession::new(
            room.id.clone(),
            SessionSeats { left, right },
            self.rules_for(room.mode),
            Duration::from_millis(self.config.tick_ms),
            commands_rx,
            room.events_sender(),
            state_tx,
            room.running_handle(),
            self.outcome_tx.clone(),
        );

        if room.mode == RoomMode::Ai {
            let ai = AiController::new(
                room.state_rx(),
                room.commands(),
                room.running_handle(),
                rand::random::<u64>(),
                Duration::from_millis(self.config.ai_think_ms),
            );
            tokio::spawn(ai.run());
        }

        room.mark_running();

        let registry = Arc::clone(self);
        let room = Arc::clone(room);
        tokio::spawn(async move {
            let end = session.run().await;

            if let SessionEnd::Finished { .. } = end {
                room.mark_finished();
            }

            // Connections may outlive the match to read the final frames;
            // the last disconnect removes the room otherwise
            if room.connection_count() == 0 {
                registry.drop_room(&room);
            }

            info!(room_id = %room.id, ?end, "simulation task retired");
        });
    }

    fn rules_for(&self, mode: RoomMode) -> MatchRules {
        let base = MatchRules {
            winning_score: self.config.winning_score,
            settle_ticks: (self.config.settle_ms / self.config.tick_ms.max(1)) as u32,
            rally_speedup: self.config.rally_speedup,
            ..MatchRules::default()
        };

        match mode {
            // The reference AI opponent serves at the human with a flatter
            // opening angle
            RoomMode::Ai => MatchRules {
                opening_serve: Side::Left,
                serve_vy: 0.7,
                ..base
            },
            RoomMode::Duel | RoomMode::Local => base,
        }
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_connections(&self) -> usize {
        self.rooms
            .iter()
            .map(|entry| entry.value().connection_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use crate::game::RoomCommand;
    use crate::room::RoomPhase;
    use crate::ws::protocol::ServerMsg;

    use super::*;

    fn test_registry() -> (Arc<RoomRegistry>, mpsc::Receiver<MatchOutcome>) {
        let config = Arc::new(Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            client_origin: "http://localhost:3000".to_string(),
            winning_score: 3,
            tick_ms: 2,
            ai_think_ms: 20,
            settle_ms: 10,
            rally_speedup: 0.0,
        });
        let (outcome_tx, outcome_rx) = crate::outcome::channel();
        (Arc::new(RoomRegistry::new(config, outcome_tx)), outcome_rx)
    }

    fn player(handle: &str) -> Participant {
        Participant {
            user_id: Uuid::new_v4(),
            handle: handle.to_string(),
        }
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn duel_simulation_starts_once_room_is_full() {
        let (registry, _outcome_rx) = test_registry();
        let (ada, grace) = (player("ada"), player("grace"));

        let grant_a = registry.join(RoomMode::Duel, "arena", &ada).unwrap();
        assert!(grant_a.is_new_room);
        assert_eq!(grant_a.slot, Side::Left);
        assert_eq!(grant_a.room.phase(), RoomPhase::AwaitingSecondPlayer);

        let grant_b = registry.join(RoomMode::Duel, "arena", &grace).unwrap();
        assert!(!grant_b.is_new_room);
        assert_eq!(grant_b.slot, Side::Right);
        assert_eq!(grant_b.room.phase(), RoomPhase::Running);

        grant_a
            .room
            .commands()
            .send(RoomCommand::StartGame)
            .await
            .unwrap();

        // Both subscribers observe per-tick game updates, in order
        let mut events_rx = grant_b.events_rx;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no game update broadcast"
            );
            let frame = events_rx.recv().await.unwrap();
            if matches!(frame.msg, ServerMsg::GameUpdate { .. }) {
                break;
            }
        }

        registry.leave(&grant_a.room, ada.user_id);
        registry.leave(&grant_b.room, grace.user_id);
        wait_for("room teardown", || registry.active_rooms() == 0).await;
        assert!(!grant_a.room.is_running());
    }

    #[tokio::test]
    async fn reconnection_preserves_slot_and_paddle_position() {
        let (registry, _outcome_rx) = test_registry();
        let (ada, grace) = (player("ada"), player("grace"));

        let grant_a = registry.join(RoomMode::Duel, "arena", &ada).unwrap();
        let _grant_b = registry.join(RoomMode::Duel, "arena", &grace).unwrap();

        grant_a
            .room
            .commands()
            .send(RoomCommand::MovePaddleTo {
                side: grant_a.slot,
                position: 30.0,
            })
            .await
            .unwrap();

        let room = grant_a.room.clone();
        wait_for("paddle intent applied", || {
            room.latest_state().paddle_left == 30.0
        })
        .await;

        // Drop ada's only socket; the running room keeps her seat
        registry.leave(&grant_a.room, ada.user_id);
        assert_eq!(registry.active_rooms(), 1);

        let regrant = registry.join(RoomMode::Duel, "arena", &ada).unwrap();
        assert_eq!(regrant.slot, Side::Left);
        assert!(regrant.reconnected);
        assert_eq!(regrant.room.latest_state().paddle_left, 30.0);

        registry.leave(&regrant.room, ada.user_id);
        registry.leave(&regrant.room, grace.user_id);
        wait_for("room teardown", || registry.active_rooms() == 0).await;
    }

    #[tokio::test]
    async fn third_identity_is_refused_at_join() {
        let (registry, _outcome_rx) = test_registry();

        registry
            .join(RoomMode::Duel, "arena", &player("ada"))
            .unwrap();
        registry
            .join(RoomMode::Duel, "arena", &player("grace"))
            .unwrap();

        let refusal = registry.join(RoomMode::Duel, "arena", &player("lin"));
        assert!(matches!(refusal, Err(JoinError::RoomFull { .. })));
    }

    #[tokio::test]
    async fn ai_room_starts_immediately_and_plays() {
        let (registry, _outcome_rx) = test_registry();
        let ada = player("ada");

        let grant = registry.join(RoomMode::Ai, "solo", &ada).unwrap();
        assert_eq!(grant.room.phase(), RoomPhase::Running);

        grant
            .room
            .commands()
            .send(RoomCommand::StartGame)
            .await
            .unwrap();

        let room = grant.room.clone();
        wait_for("ball in motion", || room.latest_state().ball_x != 50.0).await;

        // Opening serve heads toward the human on the left
        assert!(grant.room.latest_state().ball_vx < 0.0);

        registry.leave(&grant.room, ada.user_id);
        wait_for("room teardown", || registry.active_rooms() == 0).await;
    }

    #[tokio::test]
    async fn mode_namespaces_do_not_collide() {
        let (registry, _outcome_rx) = test_registry();
        let (ada, grace) = (player("ada"), player("grace"));

        let duel = registry.join(RoomMode::Duel, "arena", &ada).unwrap();
        let solo = registry.join(RoomMode::Ai, "arena", &grace).unwrap();

        assert!(duel.is_new_room);
        assert!(solo.is_new_room);
        assert_eq!(registry.active_rooms(), 2);

        registry.leave(&duel.room, ada.user_id);
        registry.leave(&solo.room, grace.user_id);
        wait_for("room teardown", || registry.active_rooms() == 0).await;
    }

    #[tokio::test]
    async fn abandoned_waiting_room_is_removed() {
        let (registry, _outcome_rx) = test_registry();
        let ada = player("ada");

        let grant = registry.join(RoomMode::Duel, "arena", &ada).unwrap();
        registry.leave(&grant.room, ada.user_id);

        assert_eq!(registry.active_rooms(), 0);
        assert!(!grant.room.is_running());
    }
}
