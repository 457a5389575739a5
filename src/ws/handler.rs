//! WebSocket session gateway
//!
//! One task per session for reads, one for writes. Session tasks never touch
//! room state directly: client messages are validated here and routed into
//! the owning room's inbox through the manager.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{InputFrame, RoomCommand};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{codes, rejected_input_alias, ClientMsg, ServerMsg};

/// Query parameters for the WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Previous session id, to resume within the disconnect window
    pub session: Option<Uuid>,
}

/// Nickname rule: 2-16 chars from [A-Za-z0-9_-]
pub fn valid_nickname(nickname: &str) -> bool {
    (2..=16).contains(&nickname.len())
        && nickname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query.session, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, resume: Option<Uuid>, state: AppState) {
    // A session may resume its previous id while its room seat is held and
    // no live connection owns the id.
    let session_id = match resume {
        Some(id) if state.rooms.room_of(id).is_some() && !state.registry.contains_key(&id) => id,
        _ => Uuid::new_v4(),
    };
    let resumed = resume == Some(session_id);

    info!(session_id = %session_id, resumed, "websocket connected");

    let (ws_sink, ws_stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<ServerMsg>();
    state.registry.insert(session_id, tx.clone());

    let _ = tx.send(ServerMsg::Welcome {
        player_id: session_id,
        server_time: unix_millis(),
    });

    if resumed {
        state.rooms.resume(session_id).await;
    }

    let writer = tokio::spawn(write_loop(session_id, ws_sink, rx));

    read_loop(session_id, ws_stream, &state, &tx).await;

    // Disconnect: free the sender slot, arm the deferred eviction
    state.registry.remove(&session_id);
    state.rooms.on_disconnect(session_id);
    writer.abort();

    info!(session_id = %session_id, "websocket closed");
}

/// Pump server messages from the session channel onto the socket
async fn write_loop(
    session_id: Uuid,
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerMsg>,
) {
    while let Some(msg) = rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "failed to serialize message");
                continue;
            }
        };
        if sink.send(Message::Text(json)).await.is_err() {
            debug!(session_id = %session_id, "websocket send failed");
            break;
        }
    }
}

/// Parse and route client messages until the socket closes
async fn read_loop(
    session_id: Uuid,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerMsg>,
) {
    let limiter = SessionRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let raw: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "unparseable client message");
                        continue;
                    }
                };
                if let Some(alias) = rejected_input_alias(&raw) {
                    warn!(session_id = %session_id, alias, "dropping input with legacy alias field");
                    continue;
                }
                match serde_json::from_value::<ClientMsg>(raw) {
                    Ok(msg) => handle_msg(session_id, msg, state, tx, &limiter).await,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "client initiated close");
                break;
            }
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "websocket error");
                break;
            }
        }
    }
}

async fn handle_msg(
    session_id: Uuid,
    msg: ClientMsg,
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerMsg>,
    limiter: &SessionRateLimiter,
) {
    match msg {
        ClientMsg::CreateRoom {
            settings,
            nickname,
            preferred_color,
        } => {
            if !valid_nickname(&nickname) {
                let _ = tx.send(ServerMsg::error(
                    codes::INVALID_NICKNAME,
                    "Nickname must be 2-16 characters of letters, digits, _ or -",
                ));
                return;
            }
            if let Err(reason) = state
                .rooms
                .create_room(session_id, nickname, preferred_color, settings)
                .await
            {
                let _ = tx.send(ServerMsg::error(codes::CREATE_FAILED, reason));
            }
        }

        ClientMsg::JoinRoom {
            room_id,
            code,
            nickname,
            preferred_color,
        } => {
            if !valid_nickname(&nickname) {
                let _ = tx.send(ServerMsg::error(
                    codes::INVALID_NICKNAME,
                    "Nickname must be 2-16 characters of letters, digits, _ or -",
                ));
                return;
            }
            if let Err(rejection) = state
                .rooms
                .join_room(session_id, room_id, code.as_deref(), nickname, preferred_color)
                .await
            {
                let _ = tx.send(ServerMsg::error(codes::JOIN_FAILED, rejection.message()));
            }
        }

        ClientMsg::LeaveRoom => state.rooms.leave(session_id).await,

        ClientMsg::SetReady { ready } => {
            route_or_no_room(
                state,
                tx,
                session_id,
                RoomCommand::SetReady { session_id, ready },
            )
            .await;
        }

        ClientMsg::StartGame => {
            route_or_no_room(state, tx, session_id, RoomCommand::StartGame { session_id }).await;
        }

        ClientMsg::Input {
            player_id,
            sequence,
            timestamp,
            accelerate,
            brake,
            steer_left,
            steer_right,
            steer_value,
            nitro,
            handbrake,
            respawn,
        } => {
            if !limiter.check_input() {
                debug!(session_id = %session_id, "input rate limited");
                return;
            }
            // inputs only drive the sender's own car
            if player_id != session_id {
                warn!(session_id = %session_id, claimed = %player_id, "input for foreign player dropped");
                return;
            }
            if !steer_value.is_finite() {
                warn!(session_id = %session_id, "non-finite steerValue dropped");
                return;
            }
            let frame = InputFrame {
                sequence,
                timestamp,
                accelerate,
                brake,
                steer_left,
                steer_right,
                steer_value: steer_value.clamp(-1.0, 1.0),
                nitro,
                handbrake,
                respawn,
            };
            // a roomless input is stale, not an error
            let _ = state
                .rooms
                .send_to_room(session_id, RoomCommand::Input { session_id, frame })
                .await;
        }

        ClientMsg::Chat { message } => {
            route_or_no_room(
                state,
                tx,
                session_id,
                RoomCommand::Chat {
                    session_id,
                    message,
                },
            )
            .await;
        }

        ClientMsg::Emote { emote } => {
            if !limiter.check_emote() {
                debug!(session_id = %session_id, "emote on cooldown");
                return;
            }
            route_or_no_room(
                state,
                tx,
                session_id,
                RoomCommand::Emote { session_id, emote },
            )
            .await;
        }

        ClientMsg::RequestRoomList => {
            let _ = tx.send(ServerMsg::RoomList {
                rooms: state.rooms.public_rooms(),
            });
        }

        ClientMsg::RequestTrackList => {
            let _ = tx.send(ServerMsg::TrackList {
                tracks: state.tracks.summaries(),
            });
        }

        ClientMsg::Ping { timestamp } => {
            let _ = tx.send(ServerMsg::Pong {
                client_timestamp: timestamp,
                server_timestamp: unix_millis(),
            });
        }
    }
}

async fn route_or_no_room(
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerMsg>,
    session_id: Uuid,
    cmd: RoomCommand,
) {
    if !state.rooms.send_to_room(session_id, cmd).await {
        let _ = tx.send(ServerMsg::error(codes::NO_ROOM, "Not in a room"));
    }
}
