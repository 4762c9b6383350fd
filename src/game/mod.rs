//! Game simulation modules

pub mod ai;
pub mod r#match;
pub mod physics;
pub mod state;

pub use r#match::{GameSession, RoomCommand, SessionEnd, SessionSeats};

use uuid::Uuid;

/// A resolved, already-authenticated participant.
/// Supplied by the identity collaborator; the core never validates tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: Uuid,
    pub handle: String,
}
