use std::sync::Arc;

use chrono::{Duration, Utc};
use log::warn;
use thiserror::Error;

use crate::{
    util::{normalize_avatar, random_string},
    DatabaseError, IdentityError, IdentityProvider, NewSession, NewUser, SessionData,
    SharedDatabase, UpdatedUser, UserData,
};

pub struct Auth {
    db: SharedDatabase,
    identity: Arc<dyn IdentityProvider>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity provider refused the login code
    #[error("Invalid login code: {0}")]
    InvalidCode(String),
    /// The identity provider could not be reached
    #[error("Identity provider unavailable: {0}")]
    IdentityUnavailable(String),
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
}

/// Profile fields supplied by the client at login time
#[derive(Debug)]
pub struct LoginProfile {
    pub nickname: String,
    pub avatar: Option<String>,
}

impl Auth {
    const SESSION_DURATION_IN_DAYS: usize = 7;

    pub fn new(db: SharedDatabase, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { db, identity }
    }

    /// Logs in a user, creating the account on first login and refreshing its
    /// profile on every later one. Returns a new session.
    pub async fn login(&self, code: &str, profile: LoginProfile) -> Result<SessionData, AuthError> {
        self.clear_expired().await;

        let openid = self.identity.exchange_code(code).await.map_err(|e| match e {
            IdentityError::Rejected(reason) => AuthError::InvalidCode(reason),
            IdentityError::Transport(e) => AuthError::IdentityUnavailable(e.to_string()),
        })?;

        let avatar = normalize_avatar(profile.avatar.as_deref());
        let user = self.upsert_user(&openid, profile.nickname, avatar).await?;

        let expires_at = Utc::now() + Duration::days(Self::SESSION_DURATION_IN_DAYS as i64);

        let new_session = NewSession {
            token: random_string(32),
            user_id: user.id,
            expires_at,
        };

        self.db
            .create_session(new_session)
            .await
            .map_err(AuthError::Db)
    }

    /// Deletes the associated session, if it exists
    pub async fn logout(&self, token: &str) -> Result<(), DatabaseError> {
        self.db.delete_session_by_token(token).await
    }

    /// Returns a session if it exists
    pub async fn session(&self, token: &str) -> Result<SessionData, DatabaseError> {
        self.db.session_by_token(token).await
    }

    async fn upsert_user(
        &self,
        openid: &str,
        nickname: String,
        avatar: Option<String>,
    ) -> Result<UserData, AuthError> {
        let existing = self.db.user_by_openid(openid).await;

        match existing {
            Ok(user) => self
                .db
                .update_user(UpdatedUser {
                    id: user.id,
                    nickname,
                    // Keep the stored avatar when the client sent nothing usable
                    avatar: avatar.or(user.avatar),
                })
                .await
                .map_err(AuthError::Db),
            Err(DatabaseError::NotFound { .. }) => self
                .db
                .create_user(NewUser {
                    openid: openid.to_string(),
                    nickname,
                    avatar,
                })
                .await
                .map_err(AuthError::Db),
            Err(e) => Err(AuthError::Db(e)),
        }
    }

    async fn clear_expired(&self) {
        // A failed sweep should not block a login
        if let Err(e) = self.db.clear_expired_sessions().await {
            warn!("Failed to clear expired sessions: {e}");
        }
    }
}
