//! Room state: slot assignment, connection bookkeeping, lifecycle
//!
//! A room is the unit of isolation: two paddle slots, a command channel
//! into its simulation task, and a broadcast channel out to every socket
//! joined to it. Rooms are owned exclusively by the [`RoomRegistry`].

mod registry;

pub use registry::{JoinError, JoinGrant, RoomRegistry};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};

use crate::game::state::StateSnapshot;
use crate::game::{Participant, RoomCommand};
use crate::ws::protocol::{Outbound, RoomRoster, Side};

/// Distinct address namespaces so AI and local rooms never collide with
/// two-player rooms of the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMode {
    /// Two human players
    Duel,
    /// One human against the server AI
    Ai,
    /// One socket driving both paddles
    Local,
}

impl RoomMode {
    pub fn prefix(self) -> &'static str {
        match self {
            RoomMode::Duel => "duel",
            RoomMode::Ai => "ai",
            RoomMode::Local => "local",
        }
    }

    /// Number of human identities the room seats
    pub fn capacity(self) -> usize {
        match self {
            RoomMode::Duel => 2,
            RoomMode::Ai | RoomMode::Local => 1,
        }
    }
}

/// Room lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Empty,
    AwaitingSecondPlayer,
    Running,
    Finished,
}

/// Slot assignment and connection counts, serialized by one mutex
struct Seats {
    left: Option<Participant>,
    right: Option<Participant>,
    /// Open sockets per identity; occupancy count, not presence, decides
    /// whether a slot is vacant (multi-tab reconnects)
    connections: HashMap<uuid::Uuid, usize>,
    phase: RoomPhase,
}

impl Seats {
    fn side_of(&self, user_id: uuid::Uuid) -> Option<Side> {
        if self.left.as_ref().is_some_and(|p| p.user_id == user_id) {
            Some(Side::Left)
        } else if self.right.as_ref().is_some_and(|p| p.user_id == user_id) {
            Some(Side::Right)
        } else {
            None
        }
    }

    fn occupied(&self) -> usize {
        usize::from(self.left.is_some()) + usize::from(self.right.is_some())
    }

    fn vacate(&mut self, user_id: uuid::Uuid) {
        if self.left.as_ref().is_some_and(|p| p.user_id == user_id) {
            self.left = None;
        } else if self.right.as_ref().is_some_and(|p| p.user_id == user_id) {
            self.right = None;
        }
    }
}

/// Result of a disconnect, used by the registry for teardown decisions
#[derive(Debug, Clone, Copy)]
pub struct LeaveSummary {
    /// The identity's last socket closed
    pub identity_disconnected: bool,
    /// No identity holds any open socket anymore
    pub room_empty: bool,
}

const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 128;

/// An isolated match context addressed by an opaque id
pub struct Room {
    pub id: String,
    pub mode: RoomMode,
    pub created_at: DateTime<Utc>,

    seats: Mutex<Seats>,

    commands_tx: mpsc::Sender<RoomCommand>,
    /// Held until the simulation task claims it
    commands_rx: Mutex<Option<mpsc::Receiver<RoomCommand>>>,
    events_tx: broadcast::Sender<Outbound>,
    state_tx: Mutex<Option<watch::Sender<StateSnapshot>>>,
    state_rx: watch::Receiver<StateSnapshot>,

    /// Authoritative running flag, re-checked by the tick loop every
    /// iteration; `stop` is an idempotent store
    running: Arc<AtomicBool>,
    /// Guard so concurrent joins cannot start two simulation tasks
    sim_started: AtomicBool,
}

impl Room {
    pub fn new(id: String, mode: RoomMode) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(StateSnapshot::default());

        Self {
            id,
            mode,
            created_at: Utc::now(),
            seats: Mutex::new(Seats {
                left: None,
                right: None,
                connections: HashMap::new(),
                phase: RoomPhase::Empty,
            }),
            commands_tx,
            commands_rx: Mutex::new(Some(commands_rx)),
            events_tx,
            state_tx: Mutex::new(Some(state_tx)),
            state_rx,
            running: Arc::new(AtomicBool::new(true)),
            sim_started: AtomicBool::new(false),
        }
    }

    /// Registry key, namespaced by mode
    pub fn registry_key(&self) -> String {
        format!("{}/{}", self.mode.prefix(), self.id)
    }

    /// Seat an identity, or add a connection to its existing seat.
    /// Returns the slot and whether this was a reconnect.
    pub fn join(&self, who: &Participant) -> Result<(Side, bool), RoomFull> {
        let mut seats = self.seats.lock();

        if let Some(side) = seats.side_of(who.user_id) {
            *seats.connections.entry(who.user_id).or_insert(0) += 1;
            return Ok((side, true));
        }

        let slot = if seats.left.is_none() {
            Side::Left
        } else if self.mode.capacity() > 1 && seats.right.is_none() {
            Side::Right
        } else {
            return Err(RoomFull);
        };

        match slot {
            Side::Left => seats.left = Some(who.clone()),
            Side::Right => seats.right = Some(who.clone()),
        }
        seats.connections.insert(who.user_id, 1);

        if self.mode == RoomMode::Duel && seats.occupied() == 1 {
            seats.phase = RoomPhase::AwaitingSecondPlayer;
        }

        Ok((slot, false))
    }

    /// Drop one socket for an identity.
    ///
    /// Grace policy: while a match is running the seat is preserved so a
    /// brief reconnect keeps paddle position and score; outside of a running
    /// match the seat is vacated immediately.
    pub fn leave(&self, user_id: uuid::Uuid) -> LeaveSummary {
        let mut seats = self.seats.lock();

        let mut identity_disconnected = false;
        if let Some(count) = seats.connections.get_mut(&user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                seats.connections.remove(&user_id);
                identity_disconnected = true;
                if seats.phase != RoomPhase::Running {
                    seats.vacate(user_id);
                }
            }
        }

        LeaveSummary {
            identity_disconnected,
            room_empty: seats.connections.is_empty(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.seats.lock().occupied() >= self.mode.capacity()
    }

    pub fn phase(&self) -> RoomPhase {
        self.seats.lock().phase
    }

    pub fn mark_running(&self) {
        self.seats.lock().phase = RoomPhase::Running;
    }

    pub fn mark_finished(&self) {
        self.seats.lock().phase = RoomPhase::Finished;
    }

    /// Current slot occupancy by display handle
    pub fn roster(&self) -> RoomRoster {
        let seats = self.seats.lock();
        RoomRoster {
            left: seats.left.as_ref().map(|p| p.handle.clone()),
            right: seats.right.as_ref().map(|p| p.handle.clone()),
        }
    }

    pub fn occupants(&self) -> (Option<Participant>, Option<Participant>) {
        let seats = self.seats.lock();
        (seats.left.clone(), seats.right.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.seats.lock().connections.values().sum()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.events_tx.subscribe()
    }

    /// Fan a frame out to every socket in the room
    pub fn publish(&self, frame: Outbound) {
        let _ = self.events_tx.send(frame);
    }

    pub fn commands(&self) -> mpsc::Sender<RoomCommand> {
        self.commands_tx.clone()
    }

    pub fn state_rx(&self) -> watch::Receiver<StateSnapshot> {
        self.state_rx.clone()
    }

    pub fn latest_state(&self) -> StateSnapshot {
        *self.state_rx.borrow()
    }

    pub fn running_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Idempotent cancellation of the room's tasks
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Atomically claim the right to start the simulation task; the first
    /// caller past the fullness check wins
    pub(crate) fn claim_simulation_start(&self) -> bool {
        self.sim_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Hand the session its exclusive ends of the room channels
    pub(crate) fn take_session_channels(
        &self,
    ) -> Option<(mpsc::Receiver<RoomCommand>, watch::Sender<StateSnapshot>)> {
        let commands_rx = self.commands_rx.lock().take()?;
        let state_tx = self.state_tx.lock().take()?;
        Some((commands_rx, state_tx))
    }

    pub fn events_sender(&self) -> broadcast::Sender<Outbound> {
        self.events_tx.clone()
    }
}

/// Join refused: both slots held by other identities
#[derive(Debug, thiserror::Error)]
#[error("room is full")]
pub struct RoomFull;
