use std::str::FromStr;

use chrono::{DateTime, Utc};

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

/// A tallyboard account, created on first login and refreshed on every login
#[derive(Debug, Clone)]
pub struct UserData {
    pub id: PrimaryKey,
    /// The stable identifier handed out by the external identity provider
    pub openid: String,
    pub nickname: String,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Login session data for authentication
#[derive(Debug, Clone)]
pub struct SessionData {
    pub id: PrimaryKey,
    /// The session token, or key if you will
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// The user that is logged in
    pub user: UserData,
}

/// The lifecycle state of a room. Finished is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Active,
    Finished,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Finished => "finished",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// A finished room never reactivates.
    pub fn can_transition_to(&self, next: RoomStatus) -> bool {
        match (self, next) {
            (Self::Active, _) => true,
            (Self::Finished, Self::Finished) => true,
            (Self::Finished, Self::Active) => false,
        }
    }
}

impl FromStr for RoomStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "finished" => Ok(Self::Finished),
            other => Err(format!("unknown room status: {other}")),
        }
    }
}

/// A scorekeeping room
#[derive(Debug, Clone)]
pub struct RoomData {
    pub id: PrimaryKey,
    /// A 6 digit code used to join the room
    pub code: String,
    pub name: String,
    /// An optional 6 digit password required to join
    pub password: Option<String>,
    /// The owning user, or None once the room has been dissolved
    pub owner_id: Option<PrimaryKey>,
    pub max_players: i32,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
}

/// A membership row linking a room to a user, or to a synthetic entry when
/// `user_id` is None
#[derive(Debug, Clone)]
pub struct PlayerData {
    pub id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub user_id: Option<PrimaryKey>,
    /// Nickname snapshot taken at join time
    pub nickname: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub balance: i32,
    /// Orders player lists and breaks ties during owner succession
    pub joined_at: DateTime<Utc>,
}

impl PlayerData {
    /// A player that counts towards active membership: backed by a real user
    /// and currently online.
    pub fn is_active(&self) -> bool {
        self.user_id.is_some() && self.is_online
    }
}

/// An immutable record of a point transfer between two players
#[derive(Debug, Clone)]
pub struct TransactionData {
    pub id: PrimaryKey,
    pub room_id: PrimaryKey,
    pub from_player_id: PrimaryKey,
    pub to_player_id: PrimaryKey,
    pub amount: i32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A best-effort security audit record
#[derive(Debug, Clone)]
pub struct SecurityEventData {
    pub id: PrimaryKey,
    pub kind: String,
    pub user_id: Option<PrimaryKey>,
    pub room_id: Option<PrimaryKey>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
