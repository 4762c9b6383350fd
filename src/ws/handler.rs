//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{Participant, RoomCommand};
use crate::room::{JoinError, JoinGrant, Room, RoomMode, RoomPhase};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{decode_client_msg, ClientMsg, Outbound, ServerMsg, Side};

/// Identity resolved by the fronting gateway.
/// The core trusts these values; token validation happens upstream.
#[derive(Debug, Deserialize)]
pub struct IdentityQuery {
    pub user_id: Option<Uuid>,
    pub handle: Option<String>,
}

/// Two-player room upgrade
pub async fn duel_ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<IdentityQuery>,
    State(state): State<AppState>,
) -> Response {
    serve_room(ws, RoomMode::Duel, room_id, query, state)
}

/// AI-opponent room upgrade
pub async fn ai_ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<IdentityQuery>,
    State(state): State<AppState>,
) -> Response {
    serve_room(ws, RoomMode::Ai, room_id, query, state)
}

/// Local (one socket, both paddles) room upgrade
pub async fn local_ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<IdentityQuery>,
    State(state): State<AppState>,
) -> Response {
    serve_room(ws, RoomMode::Local, room_id, query, state)
}

fn serve_room(
    ws: WebSocketUpgrade,
    mode: RoomMode,
    room_id: String,
    query: IdentityQuery,
    state: AppState,
) -> Response {
    let (Some(user_id), Some(handle)) = (query.user_id, query.handle) else {
        warn!(room_id = %room_id, "rejected unauthenticated WebSocket upgrade");
        return Response::builder()
            .status(401)
            .body("Unauthorized".into())
            .unwrap();
    };

    let who = Participant { user_id, handle };
    ws.on_upgrade(move |socket| handle_socket(socket, mode, room_id, who, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    mut socket: WebSocket,
    mode: RoomMode,
    room_id: String,
    who: Participant,
    state: AppState,
) {
    let JoinGrant {
        room,
        slot,
        events_rx,
        ..
    } = match state.rooms.join(mode, &room_id, &who) {
        Ok(grant) => grant,
        Err(JoinError::RoomFull { .. }) => {
            warn!(room_id = %room_id, user_id = %who.user_id, "join refused, room is full");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut ws_sink, ws_stream) = socket.split();

    // Full snapshot so the client can render immediately; a reconnecting
    // player sees their preserved paddle and score
    let snapshot = room.latest_state();
    let initial = ServerMsg::InitialState {
        ball_x: snapshot.ball_x,
        ball_y: snapshot.ball_y,
        paddle_left: snapshot.paddle_left,
        paddle_right: snapshot.paddle_right,
        score_left: snapshot.score_left,
        score_right: snapshot.score_right,
    };
    if let Err(e) = send_msg(&mut ws_sink, &initial).await {
        error!(user_id = %who.user_id, error = %e, "failed to send initial state");
        state.rooms.leave(&room, who.user_id);
        return;
    }

    publish_roster(&room);

    run_session(&room, slot, &who, events_rx, ws_sink, ws_stream).await;

    // Cleanup on disconnect
    state.rooms.leave(&room, who.user_id);
    publish_roster(&room);

    info!(room_id = %room_id, user_id = %who.user_id, "WebSocket connection closed");
}

/// Announce slot occupancy while the room is still filling up
fn publish_roster(room: &Room) {
    if room.phase() != RoomPhase::Running {
        room.publish(Outbound::broadcast(ServerMsg::RoomUpdate {
            players: room.roster(),
        }));
    }
}

/// Run the WebSocket session with read/write split
async fn run_session(
    room: &Room,
    slot: Side,
    who: &Participant,
    mut events_rx: broadcast::Receiver<Outbound>,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    let commands_tx = room.commands();

    // Writer task: room broadcasts -> this socket, dropping frames
    // addressed to another identity
    let writer_user_id = who.user_id;
    let writer_handle = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(frame) => {
                    if !frame.is_for(writer_user_id) {
                        continue;
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &frame.msg).await {
                        debug!(user_id = %writer_user_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        user_id = %writer_user_id,
                        lagged_count = n,
                        "client lagged, skipping {} frames", n
                    );
                    // Continue - don't disconnect for lag
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(user_id = %writer_user_id, "event channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: this socket -> room command channel
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(user_id = %who.user_id, "rate limited inbound frame");
                    continue;
                }

                match decode_client_msg(&text) {
                    Ok(Some(msg)) => dispatch(msg, room, slot, &commands_tx, who),
                    Ok(None) => {
                        debug!(user_id = %who.user_id, "ignoring unknown message kind");
                    }
                    Err(e) => {
                        warn!(user_id = %who.user_id, error = %e, "dropped malformed frame");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %who.user_id, "received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(user_id = %who.user_id, "client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %who.user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Route one decoded frame to the right mutation
fn dispatch(
    msg: ClientMsg,
    room: &Room,
    slot: Side,
    commands_tx: &tokio::sync::mpsc::Sender<RoomCommand>,
    who: &Participant,
) {
    let command = match msg {
        ClientMsg::MovePaddle {
            direction,
            position,
        } => Some(RoomCommand::MovePaddleTo {
            side: slot,
            position: position + direction as f32,
        }),

        ClientMsg::StartGame => Some(RoomCommand::StartGame),

        ClientMsg::PaddleInput { speed, paddle } => {
            // Only local rooms may steer a paddle other than their own slot
            let side = match (room.mode, paddle) {
                (RoomMode::Local, Some(side)) => side,
                _ => slot,
            };
            Some(RoomCommand::SetPaddleVelocity { side, speed })
        }

        ClientMsg::Relay { data } => {
            // Opaque passthrough: fan out to the room, no simulation involved
            room.publish(Outbound::broadcast(ServerMsg::Relay { data }));
            None
        }
    };

    if let Some(command) = command {
        // Intent is fire-and-forget; a saturated queue drops the frame
        // rather than stalling the reader
        if commands_tx.try_send(command).is_err() {
            debug!(user_id = %who.user_id, "room command queue unavailable, frame dropped");
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
