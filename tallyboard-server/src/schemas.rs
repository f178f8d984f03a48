use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use validator::{Validate, ValidationError};

/// Room codes and passwords are exactly six ascii digits
fn six_digits(value: &str) -> Result<(), ValidationError> {
    if value.len() == 6 && value.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("six_digits"))
    }
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginSchema {
    #[validate(length(min = 1, max = 128))]
    pub code: String,
    #[validate(length(min = 1, max = 64))]
    pub nickname: String,
    #[validate(length(max = 512))]
    pub avatar: Option<String>,
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewRoomSchema {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(custom(function = six_digits))]
    pub password: Option<String>,
    #[validate(range(min = 2, max = 12))]
    pub max_players: Option<i32>,
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinRoomSchema {
    #[validate(custom(function = six_digits))]
    pub code: String,
    #[validate(custom(function = six_digits))]
    pub password: Option<String>,
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewMockPlayerSchema {
    #[validate(length(min = 1, max = 64))]
    pub nickname: String,
    #[validate(length(max = 512))]
    pub avatar: Option<String>,
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewTransactionSchema {
    pub room_id: i32,
    pub from_player_id: i32,
    pub to_player_id: i32,
    /// Validated against the ledger range by the collab, i64 here so an out
    /// of range value reaches that validation
    pub amount: i64,
    #[validate(length(max = 256))]
    pub description: Option<String>,
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "JSON parse failed"))?;

        extracted_json
            .0
            .validate()
            .map_err(|_| (StatusCode::BAD_REQUEST, "Request body is invalid"))?;

        Ok(Self(extracted_json.0))
    }
}
