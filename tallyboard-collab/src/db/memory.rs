use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    Database, DatabaseError, DatabaseResult, NewPlayer, NewRoom, NewSecurityEvent, NewSession,
    NewTransaction, NewUser, PlayerData, PrimaryKey, Result, RoomData, RoomStatus,
    SecurityEventData, SessionData, TransactionData, UpdatedPlayer, UpdatedUser, UserData,
};

/// An in-memory database, used by tests and development setups without a
/// Postgres instance.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

#[derive(Debug, Clone)]
struct StoredSession {
    id: PrimaryKey,
    token: String,
    user_id: PrimaryKey,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    next_id: PrimaryKey,
    users: HashMap<PrimaryKey, UserData>,
    sessions: HashMap<PrimaryKey, StoredSession>,
    rooms: HashMap<PrimaryKey, RoomData>,
    players: HashMap<PrimaryKey, PlayerData>,
    transactions: HashMap<PrimaryKey, TransactionData>,
    security_events: Vec<SecurityEventData>,
}

impl State {
    fn alloc(&mut self) -> PrimaryKey {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded security events, exposed for assertions in tests
    pub fn security_events(&self) -> Vec<SecurityEventData> {
        self.state.lock().security_events.clone()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        self.state
            .lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })
    }

    async fn user_by_openid(&self, openid: &str) -> Result<UserData> {
        self.state
            .lock()
            .users
            .values()
            .find(|u| u.openid == openid)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "openid",
            })
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_openid(&new_user.openid)
            .await
            .conflict_or_ok("user", "openid", &new_user.openid)?;

        let mut state = self.state.lock();
        let now = Utc::now();

        let user = UserData {
            id: state.alloc(),
            openid: new_user.openid,
            nickname: new_user.nickname,
            avatar: new_user.avatar,
            created_at: now,
            updated_at: now,
        };

        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, updated_user: UpdatedUser) -> Result<UserData> {
        let mut state = self.state.lock();

        let user = state
            .users
            .get_mut(&updated_user.id)
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })?;

        user.nickname = updated_user.nickname;
        user.avatar = updated_user.avatar;
        user.updated_at = Utc::now();

        Ok(user.clone())
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        let state = self.state.lock();

        let session = state
            .sessions
            .values()
            .find(|s| s.token == token)
            .ok_or(DatabaseError::NotFound {
                resource: "session",
                identifier: "token",
            })?;

        let user = state
            .users
            .get(&session.user_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })?;

        Ok(SessionData {
            id: session.id,
            token: session.token.clone(),
            expires_at: session.expires_at,
            user,
        })
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        self.session_by_token(&new_session.token)
            .await
            .conflict_or_ok("session", "token", &new_session.token)?;

        let token = {
            let mut state = self.state.lock();

            let session = StoredSession {
                id: state.alloc(),
                token: new_session.token,
                user_id: new_session.user_id,
                expires_at: new_session.expires_at,
            };

            let token = session.token.clone();
            state.sessions.insert(session.id, session);
            token
        };

        self.session_by_token(&token).await
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.sessions.retain(|_, s| s.token != token);
        Ok(())
    }

    async fn clear_expired_sessions(&self) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock();
        state.sessions.retain(|_, s| s.expires_at > now);
        Ok(())
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData> {
        self.state
            .lock()
            .rooms
            .get(&room_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            })
    }

    async fn room_by_code(&self, code: &str) -> Result<RoomData> {
        self.state
            .lock()
            .rooms
            .values()
            .find(|r| r.code == code)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "code",
            })
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        self.room_by_code(&new_room.code)
            .await
            .conflict_or_ok("room", "code", &new_room.code)?;

        let mut state = self.state.lock();

        let room = RoomData {
            id: state.alloc(),
            code: new_room.code,
            name: new_room.name,
            password: new_room.password,
            owner_id: Some(new_room.owner_id),
            max_players: new_room.max_players,
            status: RoomStatus::Active,
            created_at: Utc::now(),
        };

        state.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn set_room_owner(
        &self,
        room_id: PrimaryKey,
        owner_id: Option<PrimaryKey>,
    ) -> Result<RoomData> {
        let mut state = self.state.lock();

        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            })?;

        room.owner_id = owner_id;
        Ok(room.clone())
    }

    async fn set_room_status(&self, room_id: PrimaryKey, status: RoomStatus) -> Result<RoomData> {
        let mut state = self.state.lock();

        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            })?;

        room.status = status;
        Ok(room.clone())
    }

    async fn players_in_room(&self, room_id: PrimaryKey) -> Result<Vec<PlayerData>> {
        let mut players: Vec<_> = self
            .state
            .lock()
            .players
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();

        players.sort_by_key(|p| (p.joined_at, p.id));
        Ok(players)
    }

    async fn player_by_id(&self, player_id: PrimaryKey) -> Result<PlayerData> {
        self.state
            .lock()
            .players
            .get(&player_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "player",
                identifier: "id",
            })
    }

    async fn player_by_user(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<PlayerData> {
        self.state
            .lock()
            .players
            .values()
            .find(|p| p.room_id == room_id && p.user_id == Some(user_id))
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "player",
                identifier: "room_id:user_id",
            })
    }

    async fn create_player(&self, new_player: NewPlayer) -> Result<PlayerData> {
        if let Some(user_id) = new_player.user_id {
            self.player_by_user(new_player.room_id, user_id)
                .await
                .conflict_or_ok(
                    "player",
                    "room:user",
                    format!("{}:{}", new_player.room_id, user_id).as_str(),
                )?;
        }

        let mut state = self.state.lock();

        let player = PlayerData {
            id: state.alloc(),
            room_id: new_player.room_id,
            user_id: new_player.user_id,
            nickname: new_player.nickname,
            avatar: new_player.avatar,
            is_online: true,
            balance: 0,
            joined_at: Utc::now(),
        };

        state.players.insert(player.id, player.clone());
        Ok(player)
    }

    async fn update_player(&self, updated_player: UpdatedPlayer) -> Result<PlayerData> {
        let mut state = self.state.lock();

        let player = state
            .players
            .get_mut(&updated_player.id)
            .ok_or(DatabaseError::NotFound {
                resource: "player",
                identifier: "id",
            })?;

        if let Some(is_online) = updated_player.is_online {
            player.is_online = is_online;
        }

        if let Some(balance) = updated_player.balance {
            player.balance = balance;
        }

        Ok(player.clone())
    }

    async fn delete_player(&self, player_id: PrimaryKey) -> Result<()> {
        let mut state = self.state.lock();

        if !state.players.contains_key(&player_id) {
            return Err(DatabaseError::NotFound {
                resource: "player",
                identifier: "id",
            });
        }

        let referenced = state
            .transactions
            .values()
            .any(|t| t.from_player_id == player_id || t.to_player_id == player_id);

        if referenced {
            return Err(DatabaseError::ForeignKeyViolation { resource: "player" });
        }

        state.players.remove(&player_id);
        Ok(())
    }

    async fn transactions_in_room(&self, room_id: PrimaryKey) -> Result<Vec<TransactionData>> {
        let mut transactions: Vec<_> = self
            .state
            .lock()
            .transactions
            .values()
            .filter(|t| t.room_id == room_id)
            .cloned()
            .collect();

        transactions.sort_by_key(|t| std::cmp::Reverse((t.created_at, t.id)));
        Ok(transactions)
    }

    async fn transaction_by_id(&self, transaction_id: PrimaryKey) -> Result<TransactionData> {
        self.state
            .lock()
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "transaction",
                identifier: "id",
            })
    }

    async fn create_transaction(
        &self,
        new_transaction: NewTransaction,
    ) -> Result<TransactionData> {
        let mut state = self.state.lock();

        for player_id in [new_transaction.from_player_id, new_transaction.to_player_id] {
            if !state.players.contains_key(&player_id) {
                return Err(DatabaseError::NotFound {
                    resource: "player",
                    identifier: "id",
                });
            }
        }

        let transaction = TransactionData {
            id: state.alloc(),
            room_id: new_transaction.room_id,
            from_player_id: new_transaction.from_player_id,
            to_player_id: new_transaction.to_player_id,
            amount: new_transaction.amount,
            description: new_transaction.description,
            created_at: Utc::now(),
        };

        state.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn create_security_event(&self, event: NewSecurityEvent) -> Result<SecurityEventData> {
        let mut state = self.state.lock();

        let event = SecurityEventData {
            id: state.alloc(),
            kind: event.kind,
            user_id: event.user_id,
            room_id: event.room_id,
            detail: event.detail,
            created_at: Utc::now(),
        };

        state.security_events.push(event.clone());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            openid: format!("openid_{name}"),
            nickname: name.to_string(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn test_create_user_conflicts_on_openid() {
        let db = MemoryDatabase::new();
        db.create_user(new_user("alice")).await.unwrap();

        let result = db.create_user(new_user("alice")).await;

        assert!(matches!(result, Err(DatabaseError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_delete_player_with_transactions_fails_with_fk_violation() {
        let db = MemoryDatabase::new();
        let user = db.create_user(new_user("alice")).await.unwrap();

        let room = db
            .create_room(NewRoom {
                code: "123456".to_string(),
                name: "test".to_string(),
                password: None,
                owner_id: user.id,
                max_players: 4,
            })
            .await
            .unwrap();

        let first = db
            .create_player(NewPlayer {
                room_id: room.id,
                user_id: Some(user.id),
                nickname: "alice".to_string(),
                avatar: None,
            })
            .await
            .unwrap();

        let second = db
            .create_player(NewPlayer {
                room_id: room.id,
                user_id: None,
                nickname: "bot".to_string(),
                avatar: None,
            })
            .await
            .unwrap();

        db.create_transaction(NewTransaction {
            room_id: room.id,
            from_player_id: first.id,
            to_player_id: second.id,
            amount: 10,
            description: None,
        })
        .await
        .unwrap();

        let result = db.delete_player(first.id).await;

        assert!(matches!(
            result,
            Err(DatabaseError::ForeignKeyViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_players_in_room_are_ordered_by_join_time() {
        let db = MemoryDatabase::new();
        let user = db.create_user(new_user("alice")).await.unwrap();

        let room = db
            .create_room(NewRoom {
                code: "654321".to_string(),
                name: "test".to_string(),
                password: None,
                owner_id: user.id,
                max_players: 8,
            })
            .await
            .unwrap();

        for name in ["a", "b", "c"] {
            db.create_player(NewPlayer {
                room_id: room.id,
                user_id: None,
                nickname: name.to_string(),
                avatar: None,
            })
            .await
            .unwrap();
        }

        let players = db.players_in_room(room.id).await.unwrap();
        let names: Vec<_> = players.iter().map(|p| p.nickname.as_str()).collect();

        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
