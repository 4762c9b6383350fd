//! Match session and authoritative tick loop
//!
//! One session task per room owns the `MatchState`. Connection handlers and
//! the AI controller never touch it directly; they submit `RoomCommand`
//! intents that the loop drains at the top of each tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::outcome::MatchOutcome;
use crate::ws::protocol::{Outbound, ServerMsg, Side};

use super::physics::{self, StepEvent};
use super::state::{MatchRules, MatchState, PaddleControl, StateSnapshot};
use super::Participant;

/// Intent submitted to a room's simulation task
#[derive(Debug, Clone)]
pub enum RoomCommand {
    /// Continuous velocity for a human-driven paddle
    SetPaddleVelocity { side: Side, speed: f32 },
    /// Absolute reposition (clamped by the engine)
    MovePaddleTo { side: Side, position: f32 },
    /// AI target intent; the paddle seeks it at a capped rate
    SetAiTarget { target: f32 },
    /// Serve the ball and begin ticking physics
    StartGame,
    /// Cooperative cancellation; idempotent
    Stop,
}

/// Who sits where for the duration of a session
#[derive(Debug, Clone)]
pub struct SessionSeats {
    pub left: Participant,
    /// None when the right paddle is AI-controlled
    pub right: Option<Participant>,
}

impl SessionSeats {
    fn winner_handle(&self, winner: Side) -> String {
        match winner {
            Side::Left => self.left.handle.clone(),
            Side::Right => self
                .right
                .as_ref()
                .map(|p| p.handle.clone())
                .unwrap_or_else(|| "AI".to_string()),
        }
    }

    fn winner_id(&self, winner: Side) -> Option<uuid::Uuid> {
        match winner {
            Side::Left => Some(self.left.user_id),
            Side::Right => self.right.as_ref().map(|p| p.user_id),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// A score reached the winning threshold
    Finished { winner: Side },
    /// The room was torn down before a win
    Cancelled,
}

/// The authoritative per-room simulation task
pub struct GameSession {
    room_id: String,
    state: MatchState,
    rules: MatchRules,
    seats: SessionSeats,
    started: bool,
    tick: Duration,
    commands_rx: mpsc::Receiver<RoomCommand>,
    events_tx: broadcast::Sender<Outbound>,
    state_tx: watch::Sender<StateSnapshot>,
    running: Arc<AtomicBool>,
    outcome_tx: mpsc::Sender<MatchOutcome>,
}

impl GameSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        room_id: String,
        seats: SessionSeats,
        rules: MatchRules,
        tick: Duration,
        commands_rx: mpsc::Receiver<RoomCommand>,
        events_tx: broadcast::Sender<Outbound>,
        state_tx: watch::Sender<StateSnapshot>,
        running: Arc<AtomicBool>,
        outcome_tx: mpsc::Sender<MatchOutcome>,
    ) -> Self {
        Self {
            room_id,
            state: MatchState::new(),
            rules,
            seats,
            started: false,
            tick,
            commands_rx,
            events_tx,
            state_tx,
            running,
            outcome_tx,
        }
    }

    /// Run the fixed-cadence tick loop until a win or cancellation.
    ///
    /// The running flag is re-checked every iteration so a stop request
    /// never leaves a zombie loop broadcasting into a torn-down room.
    pub async fn run(mut self) -> SessionEnd {
        info!(room_id = %self.room_id, "simulation task started");

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            self.drain_commands();

            if !self.running.load(Ordering::Relaxed) {
                info!(room_id = %self.room_id, "simulation task cancelled");
                return SessionEnd::Cancelled;
            }

            let events = if self.started {
                physics::step(&mut self.state, &self.rules)
            } else {
                Vec::new()
            };

            // Publish the snapshot every tick so the AI controller and
            // late-joining connections always read fresh kinematics
            let _ = self
                .state_tx
                .send(self.state.snapshot(self.started && !self.state.finished));

            if self.started {
                self.broadcast_game_update();
            }

            for event in events {
                match event {
                    StepEvent::Goal { scorer } => {
                        debug!(
                            room_id = %self.room_id,
                            ?scorer,
                            score_left = self.state.score_left,
                            score_right = self.state.score_right,
                            "goal"
                        );
                    }
                    StepEvent::BallServed => {
                        debug!(room_id = %self.room_id, "ball served");
                    }
                    StepEvent::Finished { winner } => {
                        self.finish(winner).await;
                        self.running.store(false, Ordering::Relaxed);
                        return SessionEnd::Finished { winner };
                    }
                    StepEvent::PaddleHit(_) => {}
                }
            }
        }
    }

    /// Apply all pending intents. Only this method and `physics::step`
    /// ever mutate the match state.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                RoomCommand::SetPaddleVelocity { side, speed } => {
                    self.state.set_control(side, PaddleControl::Velocity(speed));
                }
                RoomCommand::MovePaddleTo { side, position } => {
                    self.state.set_paddle(side, position);
                    let _ = self.events_tx.send(Outbound::broadcast(ServerMsg::UpdatePaddle {
                        paddle: side,
                        position: self.state.paddle(side),
                    }));
                }
                RoomCommand::SetAiTarget { target } => {
                    self.state
                        .set_control(Side::Right, PaddleControl::Seeking(target));
                }
                RoomCommand::StartGame => {
                    if !self.started {
                        self.started = true;
                        physics::serve_ball(&mut self.state, &self.rules, self.rules.opening_serve);
                        info!(room_id = %self.room_id, "match started");
                    }
                }
                RoomCommand::Stop => {
                    self.running.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    fn broadcast_game_update(&self) {
        let _ = self.events_tx.send(Outbound::broadcast(ServerMsg::GameUpdate {
            ball_x: self.state.ball_x,
            ball_y: self.state.ball_y,
            paddle_left: self.state.paddle_left,
            paddle_right: self.state.paddle_right,
            score_left: self.state.score_left,
            score_right: self.state.score_right,
        }));
    }

    async fn finish(&mut self, winner: Side) {
        info!(
            room_id = %self.room_id,
            score_left = self.state.score_left,
            score_right = self.state.score_right,
            winner = %self.seats.winner_handle(winner),
            "match finished"
        );

        let _ = self.events_tx.send(Outbound::broadcast(ServerMsg::GameOver {
            score_left: self.state.score_left,
            score_right: self.state.score_right,
            winner: Some(self.seats.winner_handle(winner)),
        }));

        let outcome = MatchOutcome {
            room_id: self.room_id.clone(),
            left_player: self.seats.left.user_id,
            right_player: self.seats.right.as_ref().map(|p| p.user_id),
            score_left: self.state.score_left,
            score_right: self.state.score_right,
            winner: self.seats.winner_id(winner),
            finished_at: Utc::now(),
        };

        if self.outcome_tx.send(outcome).await.is_err() {
            debug!(room_id = %self.room_id, "outcome recorder unavailable");
        }
    }
}
