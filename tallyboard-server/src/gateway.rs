use std::collections::{HashMap, HashSet};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tallyboard_collab::{CollabEvent, ConnectionId, PrimaryKey};
use tokio::sync::mpsc;

use crate::{
    context::ServerContext,
    errors::ServerError,
    serialized::{Player, Room, ToSerialized, Transaction},
    Router,
};

/// Manages websocket connections and their room subscriptions
pub struct Gateway {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
}

struct Connection {
    sender: mpsc::UnboundedSender<Message>,
    rooms: HashSet<PrimaryKey>,
}

/// Events sent to clients over the gateway
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case", tag = "type", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// The player roster of a room changed
    PlayersUpdated {
        room_id: i32,
        players: Vec<Player>,
    },
    /// A room's metadata or lifecycle state changed
    RoomUpdated { room_id: i32, room: Room },
    /// A transfer was committed
    TransactionUpdated {
        room_id: i32,
        transaction: Transaction,
        players: Vec<Player>,
    },
    /// This connection was displaced by a newer login
    ForcedKick { room_id: i32 },
    /// The room a join was attempted against no longer runs
    RoomDissolved { room_id: i32 },
    /// Reply to an exit-room request, correlated by its ack
    ExitAck {
        ack: u32,
        success: bool,
        message: Option<String>,
    },
    /// A client event failed
    Error { code: String, message: String },
}

/// Events clients send over the gateway
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type", rename_all_fields = "camelCase")]
enum ClientEvent {
    /// Joins a room, authenticating the connection with a session token
    JoinRoom { room_id: i32, token: String },
    /// Goes offline in a room without giving up membership
    LeaveRoom { room_id: i32 },
    /// Leaves a room for good. Acked so the client can navigate away once
    /// the exit has actually applied.
    ExitRoom { room_id: i32, ack: u32 },
    /// Asks for a fresh roster broadcast
    RefreshRoom { room_id: i32 },
    /// Notifies everyone in the room about a committed transaction
    TransactionCommitted { room_id: i32, transaction_id: i32 },
}

impl Gateway {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, connection_id: ConnectionId, sender: mpsc::UnboundedSender<Message>) {
        self.connections.lock().insert(
            connection_id,
            Connection {
                sender,
                rooms: HashSet::new(),
            },
        );
    }

    fn unregister(&self, connection_id: ConnectionId) {
        self.connections.lock().remove(&connection_id);
    }

    fn subscribe(&self, connection_id: ConnectionId, room_id: PrimaryKey) {
        if let Some(connection) = self.connections.lock().get_mut(&connection_id) {
            connection.rooms.insert(room_id);
        }
    }

    fn unsubscribe(&self, connection_id: ConnectionId, room_id: PrimaryKey) {
        if let Some(connection) = self.connections.lock().get_mut(&connection_id) {
            connection.rooms.remove(&room_id);
        }
    }

    fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) {
        let connections = self.connections.lock();

        if let Some(connection) = connections.get(&connection_id) {
            Self::deliver(connection, event);
        }
    }

    fn broadcast(&self, room_id: PrimaryKey, event: &ServerEvent) {
        let connections = self.connections.lock();

        for connection in connections.values().filter(|c| c.rooms.contains(&room_id)) {
            Self::deliver(connection, event);
        }
    }

    /// Closes a connection by dropping its outbound channel, which ends its
    /// writer task and with it the socket
    fn close(&self, connection_id: ConnectionId) {
        let mut connections = self.connections.lock();

        if let Some(connection) = connections.remove(&connection_id) {
            let _ = connection.sender.send(Message::Close(None));
        }
    }

    fn deliver(connection: &Connection, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                // Failure means the connection is going away, the reader side
                // cleans it up
                let _ = connection.sender.send(Message::Text(json));
            }
            Err(e) => error!("Failed to serialize gateway event: {e}"),
        }
    }

    /// Translates a collab event into gateway traffic
    pub fn dispatch(&self, event: CollabEvent) {
        match event {
            CollabEvent::PlayersUpdated { room_id, players } => self.broadcast(
                room_id,
                &ServerEvent::PlayersUpdated {
                    room_id,
                    players: players.to_serialized(),
                },
            ),
            CollabEvent::RoomUpdated { room_id, room } => self.broadcast(
                room_id,
                &ServerEvent::RoomUpdated {
                    room_id,
                    room: room.to_serialized(),
                },
            ),
            CollabEvent::TransactionUpdated {
                room_id,
                transaction,
                players,
            } => self.broadcast(
                room_id,
                &ServerEvent::TransactionUpdated {
                    room_id,
                    transaction: transaction.to_serialized(),
                    players: players.to_serialized(),
                },
            ),
            CollabEvent::ForcedKick {
                connection_id,
                room_id,
                ..
            } => self.send_to(connection_id, &ServerEvent::ForcedKick { room_id }),
            CollabEvent::RoomDissolved {
                connection_id,
                room_id,
            } => self.send_to(connection_id, &ServerEvent::RoomDissolved { room_id }),
            CollabEvent::ForceDisconnect { connection_id } => self.close(connection_id),
        }
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

async fn gateway_handler(ws: WebSocketUpgrade, State(context): State<ServerContext>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, context))
}

async fn handle_socket(socket: WebSocket, context: ServerContext) {
    let connection_id = ConnectionId::new();
    let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();

    context.gateway.register(connection_id, sender);
    debug!("Gateway connection {connection_id} opened");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let is_close = matches!(message, Message::Close(_));

            if sink.send(message).await.is_err() || is_close {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(connection_id, event, &context).await,
                Err(e) => {
                    context.gateway.send_to(
                        connection_id,
                        &ServerEvent::Error {
                            code: "invalid-event".to_string(),
                            message: e.to_string(),
                        },
                    );
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    debug!("Gateway connection {connection_id} closed");

    context.gateway.unregister(connection_id);
    writer.abort();

    if let Err(e) = context.collab.rooms.handle_disconnect(connection_id).await {
        warn!("Failed to handle disconnect of {connection_id}: {e}");
    }
}

async fn handle_client_event(
    connection_id: ConnectionId,
    event: ClientEvent,
    context: &ServerContext,
) {
    let result = match event {
        ClientEvent::JoinRoom { room_id, token } => {
            join_room(connection_id, room_id, &token, context).await
        }
        ClientEvent::LeaveRoom { room_id } => leave_room(connection_id, room_id, context).await,
        ClientEvent::ExitRoom { room_id, ack } => {
            let result = exit_room(connection_id, room_id, context).await;

            let (success, message) = match &result {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            };

            context.gateway.send_to(
                connection_id,
                &ServerEvent::ExitAck {
                    ack,
                    success,
                    message,
                },
            );

            // The ack already carried the outcome
            Ok(())
        }
        ClientEvent::RefreshRoom { room_id } => context
            .collab
            .rooms
            .refresh_room(room_id)
            .await
            .map_err(Into::into),
        ClientEvent::TransactionCommitted {
            room_id,
            transaction_id,
        } => context
            .collab
            .ledger
            .broadcast_committed(room_id, transaction_id)
            .await
            .map_err(Into::into),
    };

    if let Err(e) = result {
        context.gateway.send_to(
            connection_id,
            &ServerEvent::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        );
    }
}

async fn join_room(
    connection_id: ConnectionId,
    room_id: i32,
    token: &str,
    context: &ServerContext,
) -> Result<(), ServerError> {
    let session = context
        .collab
        .auth
        .session(token)
        .await
        .map_err(|_| ServerError::InvalidRequest("Session does not exist".to_string()))?;

    context
        .collab
        .rooms
        .join_connected(room_id, session.user.id, connection_id)
        .await?;

    context.gateway.subscribe(connection_id, room_id);
    Ok(())
}

async fn leave_room(
    connection_id: ConnectionId,
    room_id: i32,
    context: &ServerContext,
) -> Result<(), ServerError> {
    let (user_id, _) = context
        .collab
        .rooms
        .connection_user(connection_id)
        .ok_or(ServerError::UserNotInRoom)?;

    context.collab.rooms.leave_room(room_id, user_id).await?;
    context.gateway.unsubscribe(connection_id, room_id);

    Ok(())
}

async fn exit_room(
    connection_id: ConnectionId,
    room_id: i32,
    context: &ServerContext,
) -> Result<(), ServerError> {
    let (user_id, _) = context
        .collab
        .rooms
        .connection_user(connection_id)
        .ok_or(ServerError::UserNotInRoom)?;

    context.collab.rooms.exit_room(room_id, user_id).await?;
    context.gateway.unsubscribe(connection_id, room_id);

    Ok(())
}

pub fn router() -> Router {
    Router::new().route("/", get(gateway_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_events_parse_from_the_wire_format() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"join-room","roomId":3,"token":"abc"}"#).unwrap();

        assert!(matches!(
            event,
            ClientEvent::JoinRoom { room_id: 3, ref token } if token == "abc"
        ));

        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"exit-room","roomId":3,"ack":7}"#).unwrap();

        assert!(matches!(event, ClientEvent::ExitRoom { room_id: 3, ack: 7 }));
    }

    #[test]
    fn test_server_events_use_kebab_case_tags() {
        let json = serde_json::to_string(&ServerEvent::ExitAck {
            ack: 1,
            success: true,
            message: None,
        })
        .unwrap();

        assert!(json.contains(r#""type":"exit-ack""#));

        let json = serde_json::to_string(&ServerEvent::ForcedKick { room_id: 5 }).unwrap();

        assert!(json.contains(r#""type":"forced-kick""#));
        assert!(json.contains(r#""roomId":5"#));
    }
}
