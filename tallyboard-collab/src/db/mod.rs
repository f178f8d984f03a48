use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;
pub type SharedDatabase = Arc<dyn Database>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    /// A row could not be deleted because other rows still reference it
    #[error("{resource} is still referenced by other rows")]
    ForeignKeyViolation { resource: &'static str },
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
}

impl<T> DatabaseResult for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(e) => match e {
                DatabaseError::NotFound {
                    resource: _,
                    identifier: _,
                } => Ok(()),
                e => Err(e),
            },
        }
    }
}

/// Represents a type that can fetch and store tallyboard data.
///
/// The core assumes single-row conditional updates only, no multi-row
/// transaction guarantees.
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_openid(&self, openid: &str) -> Result<UserData>;
    async fn create_user(&self, new_user: NewUser) -> Result<UserData>;
    async fn update_user(&self, updated_user: UpdatedUser) -> Result<UserData>;

    async fn session_by_token(&self, token: &str) -> Result<SessionData>;
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData>;
    async fn delete_session_by_token(&self, token: &str) -> Result<()>;
    async fn clear_expired_sessions(&self) -> Result<()>;

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData>;
    async fn room_by_code(&self, code: &str) -> Result<RoomData>;
    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData>;
    async fn set_room_owner(
        &self,
        room_id: PrimaryKey,
        owner_id: Option<PrimaryKey>,
    ) -> Result<RoomData>;
    async fn set_room_status(&self, room_id: PrimaryKey, status: RoomStatus) -> Result<RoomData>;

    /// Players of a room, ordered by join time ascending
    async fn players_in_room(&self, room_id: PrimaryKey) -> Result<Vec<PlayerData>>;
    async fn player_by_id(&self, player_id: PrimaryKey) -> Result<PlayerData>;
    async fn player_by_user(&self, room_id: PrimaryKey, user_id: PrimaryKey)
        -> Result<PlayerData>;
    async fn create_player(&self, new_player: NewPlayer) -> Result<PlayerData>;
    async fn update_player(&self, updated_player: UpdatedPlayer) -> Result<PlayerData>;
    /// Fails with [DatabaseError::ForeignKeyViolation] when transactions
    /// still reference the player
    async fn delete_player(&self, player_id: PrimaryKey) -> Result<()>;

    /// Transactions of a room, newest first
    async fn transactions_in_room(&self, room_id: PrimaryKey) -> Result<Vec<TransactionData>>;
    async fn transaction_by_id(&self, transaction_id: PrimaryKey) -> Result<TransactionData>;
    async fn create_transaction(&self, new_transaction: NewTransaction)
        -> Result<TransactionData>;

    async fn create_security_event(&self, event: NewSecurityEvent) -> Result<SecurityEventData>;
}

#[derive(Debug)]
pub struct NewUser {
    pub openid: String,
    pub nickname: String,
    pub avatar: Option<String>,
}

#[derive(Debug)]
pub struct UpdatedUser {
    pub id: PrimaryKey,
    pub nickname: String,
    pub avatar: Option<String>,
}

#[derive(Debug)]
pub struct NewSession {
    pub token: String,
    pub user_id: PrimaryKey,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewRoom {
    pub code: String,
    pub name: String,
    pub password: Option<String>,
    /// The owner of the new room
    pub owner_id: PrimaryKey,
    pub max_players: i32,
}

#[derive(Debug)]
pub struct NewPlayer {
    pub room_id: PrimaryKey,
    /// None creates a synthetic player without a backing account
    pub user_id: Option<PrimaryKey>,
    pub nickname: String,
    pub avatar: Option<String>,
}

/// Fields set to None are left unchanged
#[derive(Debug, Default)]
pub struct UpdatedPlayer {
    pub id: PrimaryKey,
    pub is_online: Option<bool>,
    pub balance: Option<i32>,
}

#[derive(Debug)]
pub struct NewTransaction {
    pub room_id: PrimaryKey,
    pub from_player_id: PrimaryKey,
    pub to_player_id: PrimaryKey,
    pub amount: i32,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSecurityEvent {
    pub kind: String,
    pub user_id: Option<PrimaryKey>,
    pub room_id: Option<PrimaryKey>,
    pub detail: String,
}
