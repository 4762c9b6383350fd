//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The two paddle-owning sides of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// The side that defends the opposite goal line
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Absolute paddle reposition: `position + direction`, clamped server-side
    MovePaddle {
        /// Signed step applied to `position`
        direction: i32,
        /// Current paddle center in normalized [0,100] space
        position: f32,
    },

    /// Begin the match (serves the ball, starts the AI in AI rooms)
    StartGame,

    /// Continuous paddle velocity in normalized units per tick
    PaddleInput {
        speed: f32,
        /// Explicit paddle selection; only honored in local rooms where
        /// one socket drives both paddles
        #[serde(default, skip_serializing_if = "Option::is_none")]
        paddle: Option<Side>,
    },

    /// Opaque passthrough for client-authoritative room variants
    Relay { data: Value },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Slot occupancy, sent while a room is filling up
    RoomUpdate { players: RoomRoster },

    /// Full snapshot sent to a connection right after it joins
    InitialState {
        ball_x: f32,
        ball_y: f32,
        paddle_left: f32,
        paddle_right: f32,
        score_left: u32,
        score_right: u32,
    },

    /// Single-paddle delta (absolute repositioning)
    UpdatePaddle { paddle: Side, position: f32 },

    /// Per-tick simulation state while a match is running
    GameUpdate {
        ball_x: f32,
        ball_y: f32,
        paddle_left: f32,
        paddle_right: f32,
        score_left: u32,
        score_right: u32,
    },

    /// Terminal outcome; `winner` is a display handle, or null on abort
    GameOver {
        score_left: u32,
        score_right: u32,
        winner: Option<String>,
    },

    /// Echo of an opaque client relay frame
    Relay { data: Value },
}

/// Slot occupancy by display handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRoster {
    pub left: Option<String>,
    pub right: Option<String>,
}

/// A broadcast frame, optionally addressed to a single identity.
/// The per-connection writer drops frames targeted at someone else.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Option<Uuid>,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn broadcast(msg: ServerMsg) -> Self {
        Self { target: None, msg }
    }

    pub fn to(target: Uuid, msg: ServerMsg) -> Self {
        Self {
            target: Some(target),
            msg,
        }
    }

    /// Whether this frame should be delivered to `user_id`'s socket
    pub fn is_for(&self, user_id: Uuid) -> bool {
        self.target.map_or(true, |t| t == user_id)
    }
}

/// Protocol decode failure. Only malformed frames are errors; unknown
/// message kinds decode to `Ok(None)` and are skipped by the caller.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingKind,

    #[error("malformed `{kind}` payload: {source}")]
    BadPayload {
        kind: String,
        source: serde_json::Error,
    },
}

/// Message kinds this server understands
const KNOWN_KINDS: &[&str] = &["move_paddle", "start_game", "paddle_input", "relay"];

/// Decode an inbound text frame.
///
/// Returns `Ok(None)` for well-formed frames of an unknown kind so the
/// connection survives protocol additions it does not understand.
pub fn decode_client_msg(text: &str) -> Result<Option<ClientMsg>, DecodeError> {
    let value: Value = serde_json::from_str(text)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingKind)?;

    if !KNOWN_KINDS.contains(&kind) {
        return Ok(None);
    }

    let kind = kind.to_string();
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| DecodeError::BadPayload { kind, source })
}
