//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::outcome::{self, MatchOutcome};
use crate::room::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    /// Build the shared state. Returns the outcome receiver so `main` can
    /// spawn the recorder task for the persistence collaborator.
    pub fn new(config: Config) -> (Self, mpsc::Receiver<MatchOutcome>) {
        let config = Arc::new(config);

        let (outcome_tx, outcome_rx) = outcome::channel();
        let rooms = Arc::new(RoomRegistry::new(config.clone(), outcome_tx));

        (Self { config, rooms }, outcome_rx)
    }
}
