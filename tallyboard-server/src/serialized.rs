//! All schemas that are exposed from endpoints are defined here
//! along with the [ToSerialized] impls

use chrono::{DateTime, Utc};
use serde::Serialize;
use tallyboard_collab::{
    PlayerData, RoomData, SessionData, TransactionData, TransferInstruction, UserData,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: i32,
    nickname: String,
    avatar: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    token: String,
    user: User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    id: i32,
    code: String,
    name: String,
    owner_id: Option<i32>,
    max_players: i32,
    status: String,
    has_password: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    id: i32,
    user_id: Option<i32>,
    nickname: String,
    avatar: Option<String>,
    is_online: bool,
    balance: i32,
    joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetails {
    room: Room,
    players: Vec<Player>,
}

impl RoomDetails {
    pub fn new(room: &RoomData, players: &[PlayerData]) -> Self {
        Self {
            room: room.to_serialized(),
            players: players.to_vec().to_serialized(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    id: i32,
    room_id: i32,
    from_player_id: i32,
    to_player_id: i32,
    amount: i32,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCommitted {
    pub transaction: Transaction,
    pub players: Vec<Player>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementInstruction {
    from_player_id: i32,
    from_nickname: String,
    from_avatar: Option<String>,
    to_player_id: i32,
    to_nickname: String,
    to_avatar: Option<String>,
    amount: i32,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id,
            nickname: self.nickname.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

impl ToSerialized<LoginResult> for SessionData {
    fn to_serialized(&self) -> LoginResult {
        LoginResult {
            token: self.token.clone(),
            user: self.user.to_serialized(),
        }
    }
}

impl ToSerialized<Room> for RoomData {
    fn to_serialized(&self) -> Room {
        Room {
            id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
            owner_id: self.owner_id,
            max_players: self.max_players,
            status: self.status.as_str().to_string(),
            // The password itself never leaves the server
            has_password: self.password.is_some(),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Player> for PlayerData {
    fn to_serialized(&self) -> Player {
        Player {
            id: self.id,
            user_id: self.user_id,
            nickname: self.nickname.clone(),
            avatar: self.avatar.clone(),
            is_online: self.is_online,
            balance: self.balance,
            joined_at: self.joined_at,
        }
    }
}

impl ToSerialized<Transaction> for TransactionData {
    fn to_serialized(&self) -> Transaction {
        Transaction {
            id: self.id,
            room_id: self.room_id,
            from_player_id: self.from_player_id,
            to_player_id: self.to_player_id,
            amount: self.amount,
            description: self.description.clone(),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<SettlementInstruction> for TransferInstruction {
    fn to_serialized(&self) -> SettlementInstruction {
        SettlementInstruction {
            from_player_id: self.from_player_id,
            from_nickname: self.from_nickname.clone(),
            from_avatar: self.from_avatar.clone(),
            to_player_id: self.to_player_id,
            to_nickname: self.to_nickname.clone(),
            to_avatar: self.to_avatar.clone(),
            amount: self.amount,
        }
    }
}
