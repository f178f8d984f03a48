use std::time::Duration;

use log::info;
use thiserror::Error;

use crate::{
    settlement::{settle, TransferInstruction},
    util::{normalize_avatar, random_room_code},
    CollabContext, CollabEvent, ConnectionId, DatabaseError, NewPlayer, NewRoom, NewSecurityEvent,
    PlayerData, PrimaryKey, RoomData, RoomStatus, UpdatedPlayer, KIND_DUPLICATE_LOGIN_KICK,
};

/// How long a join may hold its lock before it is presumed dead
const JOIN_LOCK_TTL: Duration = Duration::from_secs(5);

const DEFAULT_MAX_PLAYERS: i32 = 4;

/// Attempts at generating an unused room code before giving up
const CODE_ATTEMPTS: usize = 16;

/// Runs the lifecycle of every room: joining, leaving, ownership, and
/// dissolution.
pub struct RoomManager {
    context: CollabContext,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room does not exist")]
    RoomNotFound,
    #[error("Wrong room password")]
    WrongPassword,
    #[error("Room is full")]
    RoomFull,
    #[error("Room is finished")]
    RoomFinished,
    #[error("Another join for this user is in progress")]
    Busy,
    #[error("User is already connected to this room elsewhere")]
    DuplicateSession,
    #[error("User is not a member of this room")]
    UserNotInRoom,
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Where a join request came from. Realtime joins register the connection in
/// the session registry, request joins never do.
#[derive(Debug, Clone, Copy)]
pub enum JoinOrigin {
    Realtime(ConnectionId),
    Request,
}

#[derive(Debug)]
pub struct CreateRoom {
    pub user_id: PrimaryKey,
    pub name: String,
    pub password: Option<String>,
    pub max_players: Option<i32>,
}

#[derive(Debug)]
pub struct JoinByCode {
    pub user_id: PrimaryKey,
    pub code: String,
    pub password: Option<String>,
}

#[derive(Debug)]
pub struct NewMockPlayer {
    pub room_id: PrimaryKey,
    pub nickname: String,
    pub avatar: Option<String>,
}

impl RoomManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a new room with a fresh code and the creating user as owner
    /// and first player.
    pub async fn create_room(
        &self,
        new_room: CreateRoom,
    ) -> Result<(RoomData, Vec<PlayerData>), RoomError> {
        let db = &self.context.database;
        let user = db.user_by_id(new_room.user_id).await?;

        let max_players = new_room.max_players.unwrap_or(DEFAULT_MAX_PLAYERS);

        let mut attempts = 0;
        let room = loop {
            let result = db
                .create_room(NewRoom {
                    code: random_room_code(),
                    name: new_room.name.clone(),
                    password: new_room.password.clone(),
                    owner_id: user.id,
                    max_players,
                })
                .await;

            match result {
                Ok(room) => break room,
                Err(DatabaseError::Conflict { .. }) if attempts < CODE_ATTEMPTS => {
                    attempts += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        db.create_player(NewPlayer {
            room_id: room.id,
            user_id: Some(user.id),
            nickname: user.nickname,
            avatar: user.avatar,
        })
        .await?;

        info!("Room {} created with code {}", room.id, room.code);

        let players = db.players_in_room(room.id).await?;
        Ok((room, players))
    }

    /// Joins a room by its code, checking the password. Used by the request
    /// path, where no realtime connection exists yet.
    pub async fn join_by_code(
        &self,
        join: JoinByCode,
    ) -> Result<(RoomData, Vec<PlayerData>), RoomError> {
        let room = self
            .context
            .database
            .room_by_code(&join.code)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => RoomError::RoomNotFound,
                e => e.into(),
            })?;

        if room.password.is_some() && room.password != join.password {
            return Err(RoomError::WrongPassword);
        }

        self.join_inner(room, join.user_id, JoinOrigin::Request)
            .await
    }

    /// Joins a room over an established realtime connection, registering it
    /// in the session registry.
    pub async fn join_connected(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
        connection_id: ConnectionId,
    ) -> Result<(RoomData, Vec<PlayerData>), RoomError> {
        let room = self
            .context
            .database
            .room_by_id(room_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => RoomError::RoomNotFound,
                e => e.into(),
            })?;

        self.join_inner(room, user_id, JoinOrigin::Realtime(connection_id))
            .await
    }

    async fn join_inner(
        &self,
        room: RoomData,
        user_id: PrimaryKey,
        origin: JoinOrigin,
    ) -> Result<(RoomData, Vec<PlayerData>), RoomError> {
        let db = &self.context.database;

        if room.status.is_finished() {
            if let JoinOrigin::Realtime(connection_id) = origin {
                self.context.emit(CollabEvent::RoomDissolved {
                    connection_id,
                    room_id: room.id,
                });
            }

            return Err(RoomError::RoomFinished);
        }

        let existing = match db.player_by_user(room.id, user_id).await {
            Ok(player) => Some(player),
            Err(DatabaseError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        // Capacity only applies to genuinely new members
        if existing.is_none() {
            let players = db.players_in_room(room.id).await?;

            if players.len() as i32 >= room.max_players {
                return Err(RoomError::RoomFull);
            }
        }

        let lock_key = format!("join:{}:{}", user_id, room.id);

        if !self.context.locks.acquire(&lock_key, JOIN_LOCK_TTL) {
            return Err(RoomError::Busy);
        }

        let result = self.join_locked(&room, user_id, existing, origin).await;
        self.context.locks.release(&lock_key);

        result
    }

    async fn join_locked(
        &self,
        room: &RoomData,
        user_id: PrimaryKey,
        existing: Option<PlayerData>,
        origin: JoinOrigin,
    ) -> Result<(RoomData, Vec<PlayerData>), RoomError> {
        let db = &self.context.database;

        if let Some(displaced) = self.context.sessions.lookup(user_id, room.id) {
            match origin {
                // The stale connection is evicted either way, but a request
                // path join has no connection to claim the slot with, so the
                // caller retries against the now vacated slot
                JoinOrigin::Request => {
                    self.kick_displaced(user_id, room.id, displaced, "request path join");
                    return Err(RoomError::DuplicateSession);
                }
                JoinOrigin::Realtime(connection_id) if connection_id != displaced => {
                    self.kick_displaced(
                        user_id,
                        room.id,
                        displaced,
                        &format!("realtime connection {connection_id}"),
                    );
                }
                // The same connection joining again is a no-op
                JoinOrigin::Realtime(_) => {}
            }
        }

        if let JoinOrigin::Realtime(connection_id) = origin {
            self.context.sessions.register(user_id, room.id, connection_id);
        }

        match existing {
            Some(player) => {
                db.update_player(UpdatedPlayer {
                    id: player.id,
                    is_online: Some(true),
                    ..Default::default()
                })
                .await?;
            }
            None => {
                let user = db.user_by_id(user_id).await?;

                db.create_player(NewPlayer {
                    room_id: room.id,
                    user_id: Some(user.id),
                    nickname: user.nickname,
                    avatar: user.avatar,
                })
                .await?;
            }
        }

        let players = self.publish_players(room.id).await?;
        Ok((room.clone(), players))
    }

    fn kick_displaced(
        &self,
        user_id: PrimaryKey,
        room_id: PrimaryKey,
        displaced: ConnectionId,
        trigger: &str,
    ) {
        info!(
            "User {user_id} logged into room {room_id} again, kicking connection {displaced}"
        );

        self.context.sessions.remove(user_id, room_id);

        self.context.emit(CollabEvent::ForcedKick {
            connection_id: displaced,
            user_id,
            room_id,
        });

        self.context.emit(CollabEvent::ForceDisconnect {
            connection_id: displaced,
        });

        self.context.audit.record(NewSecurityEvent {
            kind: KIND_DUPLICATE_LOGIN_KICK.to_string(),
            user_id: Some(user_id),
            room_id: Some(room_id),
            detail: format!("connection {displaced} displaced by {trigger}"),
        });
    }

    /// Marks a user offline without removing their membership.
    pub async fn leave_room(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<(), RoomError> {
        let db = &self.context.database;

        let player = db
            .player_by_user(room_id, user_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => RoomError::UserNotInRoom,
                e => e.into(),
            })?;

        db.update_player(UpdatedPlayer {
            id: player.id,
            is_online: Some(false),
            ..Default::default()
        })
        .await?;

        self.context.sessions.remove(user_id, room_id);
        self.publish_players(room_id).await?;

        Ok(())
    }

    /// Removes a user from a room for good, handing off ownership and
    /// dissolving the room when they were the last one in it.
    pub async fn exit_room(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<(), RoomError> {
        let db = &self.context.database;

        let room = db.room_by_id(room_id).await.map_err(|e| match e {
            DatabaseError::NotFound { .. } => RoomError::RoomNotFound,
            e => e.into(),
        })?;

        let player = db
            .player_by_user(room_id, user_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => RoomError::UserNotInRoom,
                e => e.into(),
            })?;

        let was_owner = room.owner_id == Some(user_id);

        match db.delete_player(player.id).await {
            Ok(()) => {}
            // Players referenced by transactions stay, as an offline row
            Err(DatabaseError::ForeignKeyViolation { .. }) => {
                db.update_player(UpdatedPlayer {
                    id: player.id,
                    is_online: Some(false),
                    ..Default::default()
                })
                .await?;
            }
            Err(e) => return Err(e.into()),
        }

        self.context.sessions.remove(user_id, room_id);

        let players = db.players_in_room(room_id).await?;
        let dissolved = self.maybe_dissolve(&room, &players).await?;

        if was_owner && !dissolved {
            let successor = players
                .iter()
                .filter(|p| p.user_id.is_some() && p.user_id != Some(user_id))
                .min_by_key(|p| (p.joined_at, p.id));

            if let Some(successor) = successor {
                let updated = db.set_room_owner(room_id, successor.user_id).await?;

                info!(
                    "Room {} ownership passed to player {}",
                    room_id, successor.id
                );

                self.context.emit(CollabEvent::RoomUpdated {
                    room_id,
                    room: updated,
                });
            }
        }

        self.context.emit(CollabEvent::PlayersUpdated { room_id, players });
        Ok(())
    }

    /// Handles a connection dropping without a leave or exit. The user is
    /// marked offline but keeps their membership and any ownership.
    pub async fn handle_disconnect(&self, connection_id: ConnectionId) -> Result<(), RoomError> {
        let Some((user_id, room_id)) = self.context.sessions.remove_connection(connection_id)
        else {
            return Ok(());
        };

        let db = &self.context.database;

        let player = match db.player_by_user(room_id, user_id).await {
            Ok(player) => player,
            Err(DatabaseError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        db.update_player(UpdatedPlayer {
            id: player.id,
            is_online: Some(false),
            ..Default::default()
        })
        .await?;

        let room = db.room_by_id(room_id).await?;
        let players = db.players_in_room(room_id).await?;

        self.maybe_dissolve(&room, &players).await?;
        self.context.emit(CollabEvent::PlayersUpdated { room_id, players });

        Ok(())
    }

    /// Finishes a room when no online user-backed players remain. Returns
    /// whether the room was dissolved.
    async fn maybe_dissolve(&self, room: &RoomData, players: &[PlayerData]) -> Result<bool, RoomError> {
        let anyone_left = players.iter().any(|p| p.is_active());

        if room.status.is_finished() || anyone_left {
            return Ok(false);
        }

        let db = &self.context.database;

        db.set_room_status(room.id, RoomStatus::Finished).await?;
        let updated = db.set_room_owner(room.id, None).await?;

        info!("Room {} dissolved", room.id);

        self.context.emit(CollabEvent::RoomUpdated {
            room_id: room.id,
            room: updated,
        });

        Ok(true)
    }

    /// Adds a synthetic player with no backing account, so a table can track
    /// someone who isn't using the app.
    pub async fn add_mock_player(
        &self,
        new_player: NewMockPlayer,
    ) -> Result<(PlayerData, Vec<PlayerData>), RoomError> {
        let db = &self.context.database;

        let room = db
            .room_by_id(new_player.room_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => RoomError::RoomNotFound,
                e => e.into(),
            })?;

        if room.status.is_finished() {
            return Err(RoomError::RoomFinished);
        }

        let players = db.players_in_room(room.id).await?;

        if players.len() as i32 >= room.max_players {
            return Err(RoomError::RoomFull);
        }

        let player = db
            .create_player(NewPlayer {
                room_id: room.id,
                user_id: None,
                nickname: new_player.nickname,
                avatar: normalize_avatar(new_player.avatar.as_deref()),
            })
            .await?;

        let players = self.publish_players(room.id).await?;
        Ok((player, players))
    }

    /// A room and its full roster
    pub async fn room_with_players(
        &self,
        room_id: PrimaryKey,
    ) -> Result<(RoomData, Vec<PlayerData>), RoomError> {
        let db = &self.context.database;

        let room = db.room_by_id(room_id).await.map_err(|e| match e {
            DatabaseError::NotFound { .. } => RoomError::RoomNotFound,
            e => e.into(),
        })?;

        let players = db.players_in_room(room_id).await?;
        Ok((room, players))
    }

    /// Suggested repayments that would zero out the room's balances
    pub async fn settlement(
        &self,
        room_id: PrimaryKey,
    ) -> Result<Vec<TransferInstruction>, RoomError> {
        let (_, players) = self.room_with_players(room_id).await?;
        Ok(settle(&players))
    }

    /// Rebroadcasts the current roster of a room
    pub async fn refresh_room(&self, room_id: PrimaryKey) -> Result<(), RoomError> {
        self.publish_players(room_id).await?;
        Ok(())
    }

    /// The (user, room) pair a realtime connection is registered under
    pub fn connection_user(&self, connection_id: ConnectionId) -> Option<(PrimaryKey, PrimaryKey)> {
        self.context.sessions.connection_entry(connection_id)
    }

    async fn publish_players(&self, room_id: PrimaryKey) -> Result<Vec<PlayerData>, DatabaseError> {
        let players = self.context.database.players_in_room(room_id).await?;

        self.context.emit(CollabEvent::PlayersUpdated {
            room_id,
            players: players.clone(),
        });

        Ok(players)
    }
}
