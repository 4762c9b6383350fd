//! Authoritative match state and rule configuration

use crate::ws::protocol::Side;

/// Normalized playfield bounds; the engine is resolution independent
pub const FIELD_MIN: f32 = 0.0;
pub const FIELD_MAX: f32 = 100.0;

/// Paddle geometry in normalized units
pub const PADDLE_HEIGHT: f32 = 20.0;
pub const PADDLE_HALF_HEIGHT: f32 = PADDLE_HEIGHT / 2.0;

/// Ball radius (10px of an 800px reference canvas)
pub const BALL_RADIUS: f32 = 1.25;

/// Paddle face planes the ball bounces off
pub const LEFT_PADDLE_FACE: f32 = 6.25;
pub const RIGHT_PADDLE_FACE: f32 = 93.75;

/// Goal-line thresholds behind each paddle
pub const LEFT_GOAL_LINE: f32 = 2.0;
pub const RIGHT_GOAL_LINE: f32 = 98.0;

/// Fastest a human paddle is allowed to move, units per tick
pub const MAX_PADDLE_SPEED: f32 = 5.0;

/// How a paddle is driven each tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaddleControl {
    /// Direct velocity integration (human input)
    Velocity(f32),
    /// Move toward a target at a capped rate, snapping within an epsilon
    /// (AI input)
    Seeking(f32),
}

impl Default for PaddleControl {
    fn default() -> Self {
        PaddleControl::Velocity(0.0)
    }
}

/// Sub-state of the serve cycle after a goal.
///
/// `Rally` is normal play. After a goal the ball keeps travelling until it
/// leaves the field (`Scoring`), waits out a settle delay (`Settling`), then
/// re-serves from center. Each variant advances exactly one frame per tick so
/// cancellation and broadcast cadence stay uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServePhase {
    Rally,
    Scoring { conceded: Side },
    Settling { conceded: Side, ticks_left: u32 },
}

/// Tunable match rules, derived from `Config` per room mode
#[derive(Debug, Clone, Copy)]
pub struct MatchRules {
    /// First score to reach this wins
    pub winning_score: u32,
    /// Ticks to wait between the ball leaving the field and the re-serve
    pub settle_ticks: u32,
    /// Service velocity applied at match start and after each settle
    pub serve_vx: f32,
    pub serve_vy: f32,
    /// Fixed speed increment added to both velocity components on each
    /// paddle hit, preserving sign; 0.0 disables rally acceleration
    pub rally_speedup: f32,
    /// Side the opening serve travels toward (AI rooms serve at the human)
    pub opening_serve: Side,
    /// Cap on AI target-seeking movement, units per tick
    pub max_seek_step: f32,
    /// Distance at which a seeking paddle snaps onto its target
    pub snap_epsilon: f32,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            winning_score: 5,
            settle_ticks: 60,
            serve_vx: 1.0,
            serve_vy: 1.0,
            rally_speedup: 0.0,
            opening_serve: Side::Right,
            max_seek_step: 2.0,
            snap_epsilon: 0.5,
        }
    }
}

/// Match state, owned and mutated exclusively by the room's tick loop.
/// Everything else submits intent through the room command channel.
#[derive(Debug, Clone)]
pub struct MatchState {
    pub ball_x: f32,
    pub ball_y: f32,
    pub ball_vx: f32,
    pub ball_vy: f32,

    pub paddle_left: f32,
    pub paddle_right: f32,
    pub control_left: PaddleControl,
    pub control_right: PaddleControl,

    pub score_left: u32,
    pub score_right: u32,

    pub phase: ServePhase,
    /// Set once a score reaches the winning threshold; no further ticks apply
    pub finished: bool,
}

impl MatchState {
    pub fn new() -> Self {
        Self {
            ball_x: 50.0,
            ball_y: 50.0,
            ball_vx: 0.0,
            ball_vy: 0.0,
            paddle_left: 50.0,
            paddle_right: 50.0,
            control_left: PaddleControl::default(),
            control_right: PaddleControl::default(),
            score_left: 0,
            score_right: 0,
            phase: ServePhase::Rally,
            finished: false,
        }
    }

    pub fn paddle(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.paddle_left,
            Side::Right => self.paddle_right,
        }
    }

    pub fn set_paddle(&mut self, side: Side, position: f32) {
        let clamped = clamp_paddle(position);
        match side {
            Side::Left => self.paddle_left = clamped,
            Side::Right => self.paddle_right = clamped,
        }
    }

    pub fn set_control(&mut self, side: Side, control: PaddleControl) {
        match side {
            Side::Left => self.control_left = control,
            Side::Right => self.control_right = control,
        }
    }

    pub fn score(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.score_left,
            Side::Right => self.score_right,
        }
    }

    /// Read-only copy published to the AI task and connection handlers
    pub fn snapshot(&self, running: bool) -> StateSnapshot {
        StateSnapshot {
            ball_x: self.ball_x,
            ball_y: self.ball_y,
            ball_vx: self.ball_vx,
            ball_vy: self.ball_vy,
            paddle_left: self.paddle_left,
            paddle_right: self.paddle_right,
            score_left: self.score_left,
            score_right: self.score_right,
            running,
        }
    }
}

impl Default for MatchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a match, published over a `watch` channel.
/// Consumers (AI controller, connection handlers) never write state back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    pub ball_x: f32,
    pub ball_y: f32,
    pub ball_vx: f32,
    pub ball_vy: f32,
    pub paddle_left: f32,
    pub paddle_right: f32,
    pub score_left: u32,
    pub score_right: u32,
    pub running: bool,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        MatchState::new().snapshot(false)
    }
}

/// Clamp a paddle center to the playfield
pub fn clamp_paddle(position: f32) -> f32 {
    position.clamp(PADDLE_HALF_HEIGHT, FIELD_MAX - PADDLE_HALF_HEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paddle_positions_are_clamped_to_field() {
        let mut state = MatchState::new();
        state.set_paddle(Side::Left, -40.0);
        assert_eq!(state.paddle_left, PADDLE_HALF_HEIGHT);

        state.set_paddle(Side::Right, 400.0);
        assert_eq!(state.paddle_right, FIELD_MAX - PADDLE_HALF_HEIGHT);
    }

    #[test]
    fn snapshot_mirrors_match_state() {
        let mut state = MatchState::new();
        state.ball_x = 42.0;
        state.score_right = 3;

        let snap = state.snapshot(true);
        assert_eq!(snap.ball_x, 42.0);
        assert_eq!(snap.score_right, 3);
        assert!(snap.running);
    }
}
