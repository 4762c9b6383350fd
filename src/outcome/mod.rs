//! Terminal match outcome events
//!
//! The simulation core emits one `MatchOutcome` per finished match; the
//! persistence collaborator consumes them from the recorder channel. History
//! is never read back into the simulation.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Final result of a match, ready for the match-history log
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub room_id: String,
    pub left_player: Uuid,
    /// None for an AI opponent
    pub right_player: Option<Uuid>,
    pub score_left: u32,
    pub score_right: u32,
    /// None when the AI won or the match was aborted
    pub winner: Option<Uuid>,
    pub finished_at: DateTime<Utc>,
}

/// Channel capacity; outcomes are tiny and consumed immediately
const OUTCOME_BUFFER: usize = 64;

pub fn channel() -> (mpsc::Sender<MatchOutcome>, mpsc::Receiver<MatchOutcome>) {
    mpsc::channel(OUTCOME_BUFFER)
}

/// Drain outcome events until every sender is gone.
///
/// This is the hand-off point to the persistence collaborator; the recorder
/// logs each outcome so an external consumer can tail or replace this task.
pub async fn run_recorder(mut outcome_rx: mpsc::Receiver<MatchOutcome>) {
    while let Some(outcome) = outcome_rx.recv().await {
        info!(
            room_id = %outcome.room_id,
            left_player = %outcome.left_player,
            right_player = ?outcome.right_player,
            score_left = outcome.score_left,
            score_right = outcome.score_right,
            winner = ?outcome.winner,
            finished_at = %outcome.finished_at,
            "match outcome recorded"
        );
    }
}
