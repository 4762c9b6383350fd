//! AI opponent: periodic trajectory prediction for the right paddle
//!
//! The controller runs on its own 1-second cadence, decoupled from the
//! physics tick: it only ever writes a target intent, and the paddle glides
//! toward it smoothly every tick via target-seeking movement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

use super::r#match::RoomCommand;
use super::state::{
    clamp_paddle, StateSnapshot, FIELD_MAX, FIELD_MIN, LEFT_PADDLE_FACE, RIGHT_PADDLE_FACE,
};

/// Uniform noise added to a prediction so play is imperfect
const PREDICTION_NOISE: f32 = 3.0;

/// Chance per decision cycle of deliberately picking a random target
const BLUNDER_CHANCE: f64 = 0.10;

/// Upper bound on simulation steps; past this the prediction is abandoned
/// and the paddle holds position
const MAX_SIM_STEPS: u32 = 10_000;

/// Periodic decision task for an AI room.
///
/// Reads ball kinematics from the tick loop's watch channel and submits a
/// single target intent per cycle through the room command channel.
pub struct AiController {
    state_rx: watch::Receiver<StateSnapshot>,
    commands_tx: mpsc::Sender<RoomCommand>,
    running: Arc<AtomicBool>,
    rng: ChaCha8Rng,
    think_interval: Duration,
}

impl AiController {
    pub fn new(
        state_rx: watch::Receiver<StateSnapshot>,
        commands_tx: mpsc::Sender<RoomCommand>,
        running: Arc<AtomicBool>,
        seed: u64,
        think_interval: Duration,
    ) -> Self {
        Self {
            state_rx,
            commands_tx,
            running,
            rng: ChaCha8Rng::seed_from_u64(seed),
            think_interval,
        }
    }

    pub async fn run(mut self) {
        let mut think = interval(self.think_interval);
        think.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            think.tick().await;

            if !self.running.load(Ordering::Relaxed) {
                debug!("ai controller stopping");
                break;
            }

            let snapshot = *self.state_rx.borrow();
            if !snapshot.running {
                continue;
            }

            let target = decide_target(&snapshot, &mut self.rng);
            debug!(ai_target = target, "ai target updated");

            if self
                .commands_tx
                .send(RoomCommand::SetAiTarget { target })
                .await
                .is_err()
            {
                // Session is gone; nothing left to steer
                break;
            }
        }
    }
}

/// Choose the next paddle target for the given snapshot.
///
/// Falls back to holding the current paddle position when no deterministic
/// intercept exists; the result is always within the paddle range.
pub fn decide_target(snapshot: &StateSnapshot, rng: &mut ChaCha8Rng) -> f32 {
    if rng.gen_bool(BLUNDER_CHANCE) {
        // Intentional human-like error: anywhere in the paddle range
        return clamp_paddle(rng.gen_range(FIELD_MIN..FIELD_MAX));
    }

    match predict_intercept_y(snapshot) {
        Some(predicted) => {
            let noise = rng.gen_range(-PREDICTION_NOISE..PREDICTION_NOISE);
            clamp_paddle(predicted + noise)
        }
        None => clamp_paddle(snapshot.paddle_right),
    }
}

/// Simulate the ball forward until it reaches the AI paddle plane.
///
/// A ball moving away is first bounced off the left paddle plane, with the
/// y-coordinate reflecting at the field bounds. Returns `None` when the
/// trajectory cannot reach the AI plane (stationary ball, or a rally that
/// will end at the far goal first).
pub fn predict_intercept_y(snapshot: &StateSnapshot) -> Option<f32> {
    let mut x = snapshot.ball_x;
    let mut y = snapshot.ball_y;
    let mut vx = snapshot.ball_vx;
    let mut vy = snapshot.ball_vy;

    if vx == 0.0 {
        return None;
    }

    let mut steps = 0u32;

    // Phase 1: ball heading away; ride it to the left paddle plane and
    // assume a return bounce
    if vx < 0.0 {
        while x > LEFT_PADDLE_FACE {
            x += vx;
            y = reflect_y(y, &mut vy);
            steps += 1;
            if steps > MAX_SIM_STEPS {
                return None;
            }
        }
        vx = vx.abs();
    }

    // Phase 2: heading toward the AI plane
    while x < RIGHT_PADDLE_FACE {
        x += vx;
        y = reflect_y(y, &mut vy);
        steps += 1;
        if steps > MAX_SIM_STEPS {
            return None;
        }
    }

    Some(y)
}

fn reflect_y(y: f32, vy: &mut f32) -> f32 {
    let y = y + *vy;
    if y <= FIELD_MIN {
        *vy = -*vy;
        -y
    } else if y >= FIELD_MAX {
        *vy = -*vy;
        2.0 * FIELD_MAX - y
    } else {
        y
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;

    use crate::game::state::{MatchState, PADDLE_HALF_HEIGHT};

    use super::*;

    fn snapshot(ball: (f32, f32), vel: (f32, f32)) -> StateSnapshot {
        let mut state = MatchState::new();
        state.ball_x = ball.0;
        state.ball_y = ball.1;
        state.ball_vx = vel.0;
        state.ball_vy = vel.1;
        state.snapshot(true)
    }

    #[test]
    fn straight_ball_is_intercepted_at_its_height() {
        let snap = snapshot((50.0, 42.0), (1.0, 0.0));
        let predicted = predict_intercept_y(&snap).unwrap();
        assert_approx_eq!(predicted, 42.0);
    }

    #[test]
    fn outbound_ball_is_simulated_through_the_return_bounce() {
        // Moving away from the AI: the prediction assumes a bounce off the
        // left paddle plane and still produces an intercept
        let snap = snapshot((50.0, 50.0), (-1.0, 0.0));
        let predicted = predict_intercept_y(&snap).unwrap();
        assert_approx_eq!(predicted, 50.0);
    }

    #[test]
    fn wall_bounces_are_reflected_in_the_prediction() {
        let snap = snapshot((90.0, 98.0), (1.0, 1.0));
        let predicted = predict_intercept_y(&snap).unwrap();
        assert!(
            (FIELD_MIN..=FIELD_MAX).contains(&predicted),
            "prediction {predicted} escaped the field"
        );
    }

    #[test]
    fn stationary_ball_has_no_deterministic_target() {
        let snap = snapshot((50.0, 50.0), (0.0, 0.0));
        assert!(predict_intercept_y(&snap).is_none());
    }

    #[test]
    fn no_prediction_holds_current_paddle_position() {
        let mut snap = snapshot((50.0, 50.0), (0.0, 0.0));
        snap.paddle_right = 63.0;

        // Any non-blunder cycle must hold the paddle exactly where it is;
        // sample several seeds so the 10% blunder roll cannot mask the
        // hold behavior
        let held = (0..20u64).any(|seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            decide_target(&snap, &mut rng) == 63.0
        });
        assert!(held, "no seed produced the hold-position target");
    }

    #[test]
    fn targets_stay_within_paddle_range_across_many_cycles() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let snap = snapshot((10.0, 5.0), (1.5, -2.0));

        for _ in 0..500 {
            let target = decide_target(&snap, &mut rng);
            assert!(
                (PADDLE_HALF_HEIGHT..=FIELD_MAX - PADDLE_HALF_HEIGHT).contains(&target),
                "target {target} out of paddle range"
            );
        }
    }
}
