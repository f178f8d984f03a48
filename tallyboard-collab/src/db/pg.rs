use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, query, query_as, Error as SqlxError, FromRow, PgPool};

use crate::{
    Database, DatabaseError, DatabaseResult, IntoDatabaseError, NewPlayer, NewRoom,
    NewSecurityEvent, NewSession, NewTransaction, NewUser, PlayerData, PrimaryKey, Result,
    RoomData, RoomStatus, SecurityEventData, SessionData, TransactionData, UpdatedPlayer,
    UpdatedUser, UserData,
};

/// A postgres database implementation for tallyboard
pub struct PgDatabase {
    pool: PgPool,
}

/// The postgres error code raised when a delete breaks a foreign key
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(FromRow)]
struct UserRow {
    id: PrimaryKey,
    openid: String,
    nickname: String,
    avatar: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SessionRow {
    id: PrimaryKey,
    token: String,
    expires_at: DateTime<Utc>,
    user_id: PrimaryKey,
    openid: String,
    nickname: String,
    avatar: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct RoomRow {
    id: PrimaryKey,
    code: String,
    name: String,
    password: Option<String>,
    owner_id: Option<PrimaryKey>,
    max_players: i32,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct PlayerRow {
    id: PrimaryKey,
    room_id: PrimaryKey,
    user_id: Option<PrimaryKey>,
    nickname: String,
    avatar: Option<String>,
    is_online: bool,
    balance: i32,
    joined_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct TransactionRow {
    id: PrimaryKey,
    room_id: PrimaryKey,
    from_player_id: PrimaryKey,
    to_player_id: PrimaryKey,
    amount: i32,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SecurityEventRow {
    id: PrimaryKey,
    kind: String,
    user_id: Option<PrimaryKey>,
    room_id: Option<PrimaryKey>,
    detail: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserData {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            openid: row.openid,
            nickname: row.nickname,
            avatar: row.avatar,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<PlayerRow> for PlayerData {
    fn from(row: PlayerRow) -> Self {
        Self {
            id: row.id,
            room_id: row.room_id,
            user_id: row.user_id,
            nickname: row.nickname,
            avatar: row.avatar,
            is_online: row.is_online,
            balance: row.balance,
            joined_at: row.joined_at,
        }
    }
}

impl From<TransactionRow> for TransactionData {
    fn from(row: TransactionRow) -> Self {
        Self {
            id: row.id,
            room_id: row.room_id,
            from_player_id: row.from_player_id,
            to_player_id: row.to_player_id,
            amount: row.amount,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

impl From<SecurityEventRow> for SecurityEventData {
    fn from(row: SecurityEventRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            user_id: row.user_id,
            room_id: row.room_id,
            detail: row.detail,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<RoomRow> for RoomData {
    type Error = DatabaseError;

    fn try_from(row: RoomRow) -> Result<Self> {
        let status: RoomStatus = row
            .status
            .parse()
            .map_err(|e: String| DatabaseError::Internal(e.into()))?;

        Ok(Self {
            id: row.id,
            code: row.code,
            name: row.name,
            password: row.password,
            owner_id: row.owner_id,
            max_players: row.max_players,
            status,
            created_at: row.created_at,
        })
    }
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("user", "id"))
    }

    async fn user_by_openid(&self, openid: &str) -> Result<UserData> {
        query_as::<_, UserRow>("SELECT * FROM users WHERE openid = $1")
            .bind(openid)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("user", "openid"))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_openid(&new_user.openid)
            .await
            .conflict_or_ok("user", "openid", &new_user.openid)?;

        query_as::<_, UserRow>(
            "INSERT INTO users (openid, nickname, avatar) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&new_user.openid)
        .bind(&new_user.nickname)
        .bind(&new_user.avatar)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn update_user(&self, updated_user: UpdatedUser) -> Result<UserData> {
        // Ensure user exists
        let _ = self.user_by_id(updated_user.id).await?;

        query(
            "UPDATE users SET
                nickname = $1,
                avatar = $2,
                updated_at = timezone('UTC', now())
            WHERE id = $3",
        )
        .bind(&updated_user.nickname)
        .bind(&updated_user.avatar)
        .bind(updated_user.id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.user_by_id(updated_user.id).await
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        let row = query_as::<_, SessionRow>(
            "SELECT
                sessions.id,
                sessions.token,
                sessions.expires_at,
                sessions.user_id,
                users.openid,
                users.nickname,
                users.avatar,
                users.created_at,
                users.updated_at
            FROM sessions
                INNER JOIN users ON sessions.user_id = users.id
            WHERE token = $1",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("session", "token"))?;

        Ok(SessionData {
            id: row.id,
            token: row.token,
            expires_at: row.expires_at,
            user: UserData {
                id: row.user_id,
                openid: row.openid,
                nickname: row.nickname,
                avatar: row.avatar,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        })
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        self.session_by_token(&new_session.token)
            .await
            .conflict_or_ok("session", "token", &new_session.token)?;

        query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&new_session.token)
            .bind(new_session.user_id)
            .bind(new_session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        self.session_by_token(&new_session.token).await
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<()> {
        query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn clear_expired_sessions(&self) -> Result<()> {
        query("DELETE FROM sessions WHERE timezone('UTC', now()) > expires_at")
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData> {
        query_as::<_, RoomRow>("SELECT * FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "id"))?
            .try_into()
    }

    async fn room_by_code(&self, code: &str) -> Result<RoomData> {
        query_as::<_, RoomRow>("SELECT * FROM rooms WHERE code = $1")
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "code"))?
            .try_into()
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        self.room_by_code(&new_room.code)
            .await
            .conflict_or_ok("room", "code", &new_room.code)?;

        query_as::<_, RoomRow>(
            "INSERT INTO rooms (code, name, password, owner_id, max_players, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *",
        )
        .bind(&new_room.code)
        .bind(&new_room.name)
        .bind(&new_room.password)
        .bind(new_room.owner_id)
        .bind(new_room.max_players)
        .bind(RoomStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?
        .try_into()
    }

    async fn set_room_owner(
        &self,
        room_id: PrimaryKey,
        owner_id: Option<PrimaryKey>,
    ) -> Result<RoomData> {
        // Ensure room exists
        let _ = self.room_by_id(room_id).await?;

        query("UPDATE rooms SET owner_id = $1 WHERE id = $2")
            .bind(owner_id)
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        self.room_by_id(room_id).await
    }

    async fn set_room_status(&self, room_id: PrimaryKey, status: RoomStatus) -> Result<RoomData> {
        // Ensure room exists
        let _ = self.room_by_id(room_id).await?;

        query("UPDATE rooms SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        self.room_by_id(room_id).await
    }

    async fn players_in_room(&self, room_id: PrimaryKey) -> Result<Vec<PlayerData>> {
        let rows = query_as::<_, PlayerRow>(
            "SELECT * FROM players WHERE room_id = $1 ORDER BY joined_at ASC, id ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn player_by_id(&self, player_id: PrimaryKey) -> Result<PlayerData> {
        query_as::<_, PlayerRow>("SELECT * FROM players WHERE id = $1")
            .bind(player_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("player", "id"))
    }

    async fn player_by_user(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<PlayerData> {
        query_as::<_, PlayerRow>("SELECT * FROM players WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("player", "room_id:user_id"))
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

        query_as::<_, PlayerRow>(
            "INSERT INTO players (room_id, user_id, nickname, avatar)
            VALUES ($1, $2, $3, $4)
            RETURNING *",
        )
        .bind(new_player.room_id)
        .bind(new_player.user_id)
        .bind(&new_player.nickname)
        .bind(&new_player.avatar)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn update_player(&self, updated_player: UpdatedPlayer) -> Result<PlayerData> {
        let player = self.player_by_id(updated_player.id).await?;

        query("UPDATE players SET is_online = $1, balance = $2 WHERE id = $3")
            .bind(updated_player.is_online.unwrap_or(player.is_online))
            .bind(updated_player.balance.unwrap_or(player.balance))
            .bind(updated_player.id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        self.player_by_id(updated_player.id).await
    }

    async fn delete_player(&self, player_id: PrimaryKey) -> Result<()> {
        // Ensure player exists
        let _ = self.player_by_id(player_id).await?;

        query("DELETE FROM players WHERE id = $1")
            .bind(player_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                let is_fk_violation = e
                    .as_database_error()
                    .and_then(|d| d.code())
                    .map(|code| code == FOREIGN_KEY_VIOLATION)
                    .unwrap_or(false);

                if is_fk_violation {
                    DatabaseError::ForeignKeyViolation { resource: "player" }
                } else {
                    e.any()
                }
            })
            .map(|_| ())
    }

    async fn transactions_in_room(&self, room_id: PrimaryKey) -> Result<Vec<TransactionData>> {
        let rows = query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE room_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn transaction_by_id(&self, transaction_id: PrimaryKey) -> Result<TransactionData> {
        query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(transaction_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("transaction", "id"))
    }

    async fn create_transaction(
        &self,
        new_transaction: NewTransaction,
    ) -> Result<TransactionData> {
        query_as::<_, TransactionRow>(
            "INSERT INTO transactions (room_id, from_player_id, to_player_id, amount, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *",
        )
        .bind(new_transaction.room_id)
        .bind(new_transaction.from_player_id)
        .bind(new_transaction.to_player_id)
        .bind(new_transaction.amount)
        .bind(&new_transaction.description)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }

    async fn create_security_event(&self, event: NewSecurityEvent) -> Result<SecurityEventData> {
        query_as::<_, SecurityEventRow>(
            "INSERT INTO security_log (kind, user_id, room_id, detail)
            VALUES ($1, $2, $3, $4)
            RETURNING *",
        )
        .bind(&event.kind)
        .bind(event.user_id)
        .bind(event.room_id)
        .bind(&event.detail)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.any())
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}
