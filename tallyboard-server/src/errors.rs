use std::fmt::Display;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde_json::json;
use tallyboard_collab::{AuthError, DatabaseError, LedgerError, RoomError};
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
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
    #[error("Invalid login code")]
    InvalidCode,
    #[error("{0}")]
    InvalidRequest(String),
    /// The source text stays server-side, clients only see the generic
    /// message
    #[error("Internal server error")]
    Unknown(String),
}

impl ServerError {
    fn internal(source: impl Display) -> Self {
        error!("Internal server error: {source}");
        Self::Unknown(source.to_string())
    }
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } | Self::RoomNotFound => StatusCode::NOT_FOUND,
            Self::Conflict { .. } | Self::DuplicateSession => StatusCode::CONFLICT,
            Self::WrongPassword => StatusCode::FORBIDDEN,
            Self::Busy => StatusCode::TOO_MANY_REQUESTS,
            Self::RoomFull
            | Self::RoomFinished
            | Self::UserNotInRoom
            | Self::InvalidCode
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A stable machine readable code, so clients can branch without parsing
    /// messages
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::RoomNotFound => "not-found",
            Self::Conflict { .. } => "conflict",
            Self::WrongPassword => "wrong-password",
            Self::RoomFull => "room-full",
            Self::RoomFinished => "room-finished",
            Self::Busy => "busy",
            Self::DuplicateSession => "duplicate-session",
            Self::UserNotInRoom => "not-in-room",
            Self::InvalidCode => "invalid-code",
            Self::InvalidRequest(_) => "invalid-request",
            Self::Unknown(_) => "internal",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "code": self.code(),
            "message": self.to_string(),
        });

        (self.as_status_code(), Json(body)).into_response()
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            DatabaseError::Conflict {
                resource,
                field,
                value,
            } => Self::Conflict {
                resource,
                field,
                value,
            },
            e => Self::internal(e),
        }
    }
}

impl From<RoomError> for ServerError {
    fn from(value: RoomError) -> Self {
        match value {
            RoomError::RoomNotFound => Self::RoomNotFound,
            RoomError::WrongPassword => Self::WrongPassword,
            RoomError::RoomFull => Self::RoomFull,
            RoomError::RoomFinished => Self::RoomFinished,
            RoomError::Busy => Self::Busy,
            RoomError::DuplicateSession => Self::DuplicateSession,
            RoomError::UserNotInRoom => Self::UserNotInRoom,
            RoomError::Db(e) => e.into(),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCode(_) => Self::InvalidCode,
            AuthError::IdentityUnavailable(e) => Self::internal(e),
            AuthError::Db(e) => e.into(),
        }
    }
}

impl From<LedgerError> for ServerError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Db(e) => e.into(),
            LedgerError::RoomFinished => Self::RoomFinished,
            LedgerError::PlayerNotInRoom => Self::UserNotInRoom,
            e => Self::InvalidRequest(e.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_internal_errors_do_not_expose_their_source() {
        let error = ServerError::from(DatabaseError::Internal(
            "connection refused at 10.0.0.7:5432".into(),
        ));

        assert_eq!(error.code(), "internal");
        assert_eq!(error.to_string(), "Internal server error");
    }
}
