//! Service-account credentials and OAuth2 access tokens for Google APIs
//! (JWT bearer grant, RFC 7523).

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
/// Assertions are valid for one hour, the maximum Google accepts.
const ASSERTION_TTL_SECS: i64 = 3600;
/// Refresh cached access tokens this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum GoogleAuthError {
    #[error("invalid service account private key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign token assertion: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// The subset of a Firebase service-account JSON file this service needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Mints and caches OAuth2 access tokens for one service account and scope.
pub struct AccessTokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenSource {
    pub fn new(
        key: ServiceAccountKey,
        scope: &str,
        timeout: Duration,
    ) -> Result<Self, GoogleAuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(GoogleAuthError::InvalidKey)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            key,
            encoding_key,
            scope: scope.to_string(),
            http,
            cached: Mutex::new(None),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.key.project_id
    }

    /// A valid access token, minting a new one when the cached token is close to expiry.
    pub async fn access_token(&self) -> Result<String, GoogleAuthError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS) > now {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.sign_assertion(now)?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GoogleAuthError::Status { status, body });
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(
            client_email = %self.key.client_email,
            expires_in = token.expires_in,
            "Minted service account access token"
        );
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        });
        Ok(value)
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, GoogleAuthError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &self.encoding_key).map_err(GoogleAuthError::Sign)
    }
}
