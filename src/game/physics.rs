//! Ball and paddle kinematics, collision resolution, scoring
//!
//! `step` is a pure function of the match state and rules; the tick loop is
//! its only caller. All positional inputs are clamped, never rejected.

use crate::ws::protocol::Side;

use super::state::{
    clamp_paddle, MatchRules, MatchState, PaddleControl, ServePhase, BALL_RADIUS, FIELD_MAX,
    FIELD_MIN, LEFT_GOAL_LINE, LEFT_PADDLE_FACE, MAX_PADDLE_SPEED, PADDLE_HALF_HEIGHT,
    RIGHT_GOAL_LINE, RIGHT_PADDLE_FACE,
};

/// What happened during one simulation step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepEvent {
    PaddleHit(Side),
    Goal { scorer: Side },
    BallServed,
    Finished { winner: Side },
}

/// Advance the match by one tick.
///
/// Order within a tick is fixed for determinism: paddles move first, then
/// the ball, then wall reflection, then paddle collision (left before
/// right), then goal detection (left goal line before right).
pub fn step(state: &mut MatchState, rules: &MatchRules) -> Vec<StepEvent> {
    let mut events = Vec::new();

    if state.finished {
        return events;
    }

    move_paddles(state, rules);

    match state.phase {
        ServePhase::Rally => {
            advance_ball(state);
            resolve_paddle_collisions(state, rules, &mut events);
            resolve_goals(state, rules, &mut events);
        }
        ServePhase::Scoring { conceded } => {
            // Ball keeps travelling one frame per tick until fully off-field
            advance_ball(state);
            if state.ball_x < FIELD_MIN - BALL_RADIUS || state.ball_x > FIELD_MAX + BALL_RADIUS {
                state.phase = ServePhase::Settling {
                    conceded,
                    ticks_left: rules.settle_ticks,
                };
            }
        }
        ServePhase::Settling {
            conceded,
            ticks_left,
        } => {
            if ticks_left <= 1 {
                serve_ball(state, rules, conceded);
                events.push(StepEvent::BallServed);
            } else {
                state.phase = ServePhase::Settling {
                    conceded,
                    ticks_left: ticks_left - 1,
                };
            }
        }
    }

    events
}

/// Apply per-paddle intent: direct velocity for humans, capped
/// target-seeking for the AI
fn move_paddles(state: &mut MatchState, rules: &MatchRules) {
    state.paddle_left = moved_paddle(state.paddle_left, state.control_left, rules);
    state.paddle_right = moved_paddle(state.paddle_right, state.control_right, rules);
}

fn moved_paddle(position: f32, control: PaddleControl, rules: &MatchRules) -> f32 {
    match control {
        PaddleControl::Velocity(speed) => {
            let speed = speed.clamp(-MAX_PADDLE_SPEED, MAX_PADDLE_SPEED);
            clamp_paddle(position + speed)
        }
        PaddleControl::Seeking(target) => {
            let target = clamp_paddle(target);
            let dist = target - position;
            if dist.abs() < rules.snap_epsilon {
                target
            } else {
                clamp_paddle(position + dist.clamp(-rules.max_seek_step, rules.max_seek_step))
            }
        }
    }
}

fn advance_ball(state: &mut MatchState) {
    state.ball_x += state.ball_vx;
    state.ball_y += state.ball_vy;

    // Vertical wall reflection: clamp in, flip vy
    if state.ball_y <= FIELD_MIN {
        state.ball_y = FIELD_MIN;
        state.ball_vy = state.ball_vy.abs();
    } else if state.ball_y >= FIELD_MAX {
        state.ball_y = FIELD_MAX;
        state.ball_vy = -state.ball_vy.abs();
    }
}

fn resolve_paddle_collisions(state: &mut MatchState, rules: &MatchRules, events: &mut Vec<StepEvent>) {
    // Left paddle: requires an approaching ball; the flush snap below also
    // prevents re-triggering while still overlapping the face plane
    if state.ball_vx < 0.0
        && state.ball_x - BALL_RADIUS <= LEFT_PADDLE_FACE
        && (state.ball_y - state.paddle_left).abs() <= PADDLE_HALF_HEIGHT
    {
        state.ball_vx = state.ball_vx.abs() + rules.rally_speedup;
        state.ball_vy += rules.rally_speedup * state.ball_vy.signum();
        state.ball_x = LEFT_PADDLE_FACE + BALL_RADIUS;
        events.push(StepEvent::PaddleHit(Side::Left));
    }

    if state.ball_vx > 0.0
        && state.ball_x + BALL_RADIUS >= RIGHT_PADDLE_FACE
        && (state.ball_y - state.paddle_right).abs() <= PADDLE_HALF_HEIGHT
    {
        state.ball_vx = -(state.ball_vx.abs() + rules.rally_speedup);
        state.ball_vy += rules.rally_speedup * state.ball_vy.signum();
        state.ball_x = RIGHT_PADDLE_FACE - BALL_RADIUS;
        events.push(StepEvent::PaddleHit(Side::Right));
    }
}

/// Goal detection, left goal line first so any simultaneous crossing is
/// resolved deterministically
fn resolve_goals(state: &mut MatchState, rules: &MatchRules, events: &mut Vec<StepEvent>) {
    if state.ball_x - BALL_RADIUS <= LEFT_GOAL_LINE {
        score_goal(state, rules, Side::Right, events);
    } else if state.ball_x + BALL_RADIUS >= RIGHT_GOAL_LINE {
        score_goal(state, rules, Side::Left, events);
    }
}

fn score_goal(state: &mut MatchState, rules: &MatchRules, scorer: Side, events: &mut Vec<StepEvent>) {
    match scorer {
        Side::Left => state.score_left += 1,
        Side::Right => state.score_right += 1,
    }
    events.push(StepEvent::Goal { scorer });

    if state.score(scorer) >= rules.winning_score {
        state.finished = true;
        events.push(StepEvent::Finished { winner: scorer });
        return;
    }

    state.phase = ServePhase::Scoring {
        conceded: scorer.opposite(),
    };
}

/// Reset the ball to center and serve toward the given side. After a goal
/// that is the side that conceded; at match start it is the configured
/// opening side.
pub fn serve_ball(state: &mut MatchState, rules: &MatchRules, toward: Side) {
    state.ball_x = 50.0;
    state.ball_y = 50.0;
    state.ball_vx = match toward {
        Side::Left => -rules.serve_vx.abs(),
        Side::Right => rules.serve_vx.abs(),
    };
    state.ball_vy = rules.serve_vy;
    state.phase = ServePhase::Rally;
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    fn rules() -> MatchRules {
        MatchRules::default()
    }

    fn rally_state(ball: (f32, f32), vel: (f32, f32)) -> MatchState {
        let mut state = MatchState::new();
        state.ball_x = ball.0;
        state.ball_y = ball.1;
        state.ball_vx = vel.0;
        state.ball_vy = vel.1;
        state
    }

    #[test]
    fn free_flight_advances_by_velocity() {
        let mut state = rally_state((50.0, 50.0), (1.0, 1.0));
        step(&mut state, &rules());
        assert_approx_eq!(state.ball_x, 51.0);
        assert_approx_eq!(state.ball_y, 51.0);
    }

    #[test]
    fn ceiling_and_floor_reflect_and_clamp() {
        let mut state = rally_state((50.0, 99.8), (0.5, 1.0));
        step(&mut state, &rules());
        assert_approx_eq!(state.ball_y, 100.0);
        assert!(state.ball_vy < 0.0);

        let mut state = rally_state((50.0, 0.3), (0.5, -1.0));
        step(&mut state, &rules());
        assert_approx_eq!(state.ball_y, 0.0);
        assert!(state.ball_vy > 0.0);
    }

    #[test]
    fn left_paddle_reflects_and_snaps_flush() {
        // Ball at x=6 moving left; after advancing to x=5 its leading edge
        // (3.75) is past the face plane and within the paddle band
        let mut state = rally_state((6.0, 50.0), (-1.0, 0.0));
        state.paddle_left = 50.0;

        let events = step(&mut state, &rules());

        assert!(events.contains(&StepEvent::PaddleHit(Side::Left)));
        assert_approx_eq!(state.ball_vx, 1.0);
        assert_approx_eq!(state.ball_x, LEFT_PADDLE_FACE + BALL_RADIUS);
    }

    #[test]
    fn paddle_hit_does_not_re_reverse_while_overlapping() {
        let mut state = rally_state((6.0, 50.0), (-1.0, 0.0));
        step(&mut state, &rules());
        let vx_after_hit = state.ball_vx;

        // Repeated steps move the ball away without flipping vx again
        step(&mut state, &rules());
        step(&mut state, &rules());
        assert_approx_eq!(state.ball_vx, vx_after_hit);
        assert!(state.ball_x > LEFT_PADDLE_FACE + BALL_RADIUS);
    }

    #[test]
    fn ball_outside_paddle_band_is_not_saved() {
        let mut state = rally_state((6.0, 90.0), (-1.0, 0.0));
        state.paddle_left = 50.0;

        let events = step(&mut state, &rules());
        assert!(events.is_empty());
        assert!(state.ball_vx < 0.0);
    }

    #[test]
    fn missed_ball_scores_for_the_opposing_side() {
        let mut state = rally_state((3.5, 90.0), (-1.0, 0.0));
        state.paddle_left = 20.0;

        let events = step(&mut state, &rules());

        assert!(events.contains(&StepEvent::Goal { scorer: Side::Right }));
        assert_eq!(state.score_right, 1);
        assert_eq!(state.score_left, 0);
        assert!(matches!(
            state.phase,
            ServePhase::Scoring { conceded: Side::Left }
        ));
    }

    #[test]
    fn goal_increments_exactly_once_per_crossing() {
        let mut state = rally_state((3.5, 90.0), (-1.0, 0.0));
        state.paddle_left = 20.0;
        step(&mut state, &rules());
        assert_eq!(state.score_right, 1);

        // Further ticks ride out the Scoring and Settling phases without
        // any additional goal event
        for _ in 0..200 {
            let events = step(&mut state, &rules());
            assert!(!events
                .iter()
                .any(|e| matches!(e, StepEvent::Goal { .. })));
            if matches!(state.phase, ServePhase::Rally) {
                break;
            }
        }
        assert_eq!(state.score_right, 1);
    }

    #[test]
    fn scoring_pause_exits_field_then_settles_then_serves() {
        let mut state = rally_state((3.5, 50.0), (-1.0, 0.0));
        state.paddle_left = 90.0;
        let r = rules();

        step(&mut state, &r);
        assert!(matches!(state.phase, ServePhase::Scoring { .. }));

        // Ball travels off-field one frame at a time
        while matches!(state.phase, ServePhase::Scoring { .. }) {
            step(&mut state, &r);
        }
        assert!(matches!(state.phase, ServePhase::Settling { .. }));

        let mut served = false;
        for _ in 0..=r.settle_ticks {
            if step(&mut state, &r).contains(&StepEvent::BallServed) {
                served = true;
                break;
            }
        }
        assert!(served);
        assert_approx_eq!(state.ball_x, 50.0);
        assert_approx_eq!(state.ball_y, 50.0);
        // Service is directed toward the side that conceded
        assert!(state.ball_vx < 0.0);
    }

    #[test]
    fn serve_direction_targets_conceding_side() {
        let mut state = MatchState::new();
        let r = rules();

        state.phase = ServePhase::Settling {
            conceded: Side::Right,
            ticks_left: 1,
        };
        step(&mut state, &r);
        assert!(state.ball_vx > 0.0);

        state.phase = ServePhase::Settling {
            conceded: Side::Left,
            ticks_left: 1,
        };
        step(&mut state, &r);
        assert!(state.ball_vx < 0.0);
    }

    #[test]
    fn match_finishes_exactly_at_winning_score() {
        let mut state = rally_state((3.5, 90.0), (-1.0, 0.0));
        state.paddle_left = 20.0;
        state.score_right = 3;
        let r = MatchRules {
            winning_score: 5,
            ..rules()
        };

        let events = step(&mut state, &r);
        assert_eq!(state.score_right, 4);
        assert!(!state.finished);
        assert!(!events
            .iter()
            .any(|e| matches!(e, StepEvent::Finished { .. })));

        // Replay the same approach for the final point
        state.phase = ServePhase::Rally;
        state.ball_x = 3.5;
        state.ball_y = 90.0;
        state.ball_vx = -1.0;
        let events = step(&mut state, &r);
        assert_eq!(state.score_right, 5);
        assert!(state.finished);
        assert!(events.contains(&StepEvent::Finished {
            winner: Side::Right
        }));
    }

    #[test]
    fn finished_match_ignores_further_steps() {
        let mut state = rally_state((50.0, 50.0), (1.0, 1.0));
        state.finished = true;

        let events = step(&mut state, &rules());
        assert!(events.is_empty());
        assert_approx_eq!(state.ball_x, 50.0);
    }

    #[test]
    fn human_paddle_integrates_velocity_with_clamp() {
        let mut state = rally_state((50.0, 50.0), (0.0, 0.0));
        state.control_left = PaddleControl::Velocity(3.0);
        step(&mut state, &rules());
        assert_approx_eq!(state.paddle_left, 53.0);

        // Excessive speed intent is capped, position stays in the field
        state.control_left = PaddleControl::Velocity(1000.0);
        for _ in 0..40 {
            step(&mut state, &rules());
        }
        assert_approx_eq!(state.paddle_left, FIELD_MAX - PADDLE_HALF_HEIGHT);
    }

    #[test]
    fn seeking_paddle_moves_at_capped_rate_and_snaps() {
        let mut state = rally_state((50.0, 50.0), (0.0, 0.0));
        state.control_right = PaddleControl::Seeking(60.0);
        let r = rules();

        step(&mut state, &r);
        assert_approx_eq!(state.paddle_right, 52.0);

        for _ in 0..10 {
            step(&mut state, &r);
        }
        assert_approx_eq!(state.paddle_right, 60.0);
    }

    #[test]
    fn rally_speedup_escalates_both_components() {
        let r = MatchRules {
            rally_speedup: 0.25,
            ..rules()
        };
        let mut state = rally_state((6.0, 50.0), (-1.0, 0.5));
        step(&mut state, &r);

        assert_approx_eq!(state.ball_vx, 1.25);
        assert_approx_eq!(state.ball_vy, 0.75);
    }
}
