use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Exchanges a client supplied login code for a stable openid.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError>;
}

#[derive(Debug, Error)]
pub enum IdentityError {
    /// The provider understood the request but refused the code
    #[error("login code rejected: {0}")]
    Rejected(String),
    /// The provider could not be reached
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Resolves login codes against the WeChat jscode2session endpoint.
pub struct WechatIdentity {
    client: reqwest::Client,
    app_id: String,
    app_secret: String,
}

#[derive(Debug, Deserialize)]
struct Jscode2SessionResponse {
    openid: Option<String>,
    errcode: Option<i32>,
    errmsg: Option<String>,
}

impl WechatIdentity {
    pub fn new(app_id: String, app_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            app_id,
            app_secret,
        }
    }
}

#[async_trait]
impl IdentityProvider for WechatIdentity {
    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError> {
        let response: Jscode2SessionResponse = self
            .client
            .get("https://api.weixin.qq.com/sns/jscode2session")
            .query(&[
                ("appid", self.app_id.as_str()),
                ("secret", self.app_secret.as_str()),
                ("js_code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?
            .json()
            .await?;

        match response.openid {
            Some(openid) => Ok(openid),
            None => {
                let errcode = response.errcode.unwrap_or_default();
                let errmsg = response.errmsg.unwrap_or_else(|| "unknown error".to_string());

                Err(IdentityError::Rejected(format!("{errcode}: {errmsg}")))
            }
        }
    }
}

/// Derives a deterministic openid from the code itself, for development
/// setups without WeChat credentials.
pub struct MockIdentity;

#[async_trait]
impl IdentityProvider for MockIdentity {
    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError> {
        Ok(format!("mock_openid_{code}"))
    }
}
