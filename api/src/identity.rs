//! Firebase ID token verification.
//!
//! Tokens are RS256 JWTs signed by Google's `securetoken` service account.
//! Signing keys come from Google's JWKS endpoint and are cached for an hour.
//! A kid missing from a fresh cache triggers at most one refetch per minute.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashboard_core::auth::CallerIdentity;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

const SECURETOKEN_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const JWKS_CACHE_SECS: i64 = 3600;
const MIN_REFETCH_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The token itself is unacceptable. The message is safe to show the caller.
    #[error("{0}")]
    Rejected(String),

    /// Signing keys could not be fetched.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Turns an opaque bearer token into a verified identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<CallerIdentity, VerifyError>;
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    #[serde(default)]
    admin: Option<bool>,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: DateTime<Utc>,
}

pub struct FirebaseTokenVerifier {
    project_id: String,
    jwks_url: String,
    http: reqwest::Client,
    keys: RwLock<Option<CachedKeys>>,
}

impl FirebaseTokenVerifier {
    pub fn new(project_id: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            project_id: project_id.into(),
            jwks_url: SECURETOKEN_JWKS_URL.to_string(),
            http: reqwest::Client::builder().timeout(timeout).build()?,
            keys: RwLock::new(None),
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);
        validation.set_required_spec_claims(&["exp", "iat", "aud", "iss", "sub"]);
        validation
    }

    /// Decoding key for `kid`, refetching the key set when it is stale or
    /// does not know the kid (Google rotates keys). Unknown kids against a
    /// set fetched under a minute ago are rejected without a refetch.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        {
            let cached = self.keys.read().await;
            if let Some(cached) = cached.as_ref() {
                let age = Utc::now() - cached.fetched_at;
                if age < chrono::Duration::seconds(JWKS_CACHE_SECS) {
                    if let Some(jwk) = cached.keys.find(kid) {
                        return key_from_jwk(jwk);
                    }
                }
                if age < chrono::Duration::seconds(MIN_REFETCH_SECS) {
                    tracing::debug!(kid, "Unknown signing key, refetch suppressed");
                    return Err(unknown_key());
                }
            }
        }

        let keys = self.fetch_keys().await?;
        let result = match keys.find(kid) {
            Some(jwk) => key_from_jwk(jwk),
            None => Err(unknown_key()),
        };
        *self.keys.write().await = Some(CachedKeys {
            keys,
            fetched_at: Utc::now(),
        });
        result
    }

    async fn fetch_keys(&self) -> Result<JwkSet, VerifyError> {
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VerifyError::Unavailable(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let keys = response
            .json::<JwkSet>()
            .await
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;
        tracing::debug!(key_count = keys.keys.len(), "Refreshed Firebase signing keys");
        Ok(keys)
    }
}

fn unknown_key() -> VerifyError {
    VerifyError::Rejected("ID token was signed with an unknown key".to_string())
}

fn key_from_jwk(jwk: &jsonwebtoken::jwk::Jwk) -> Result<DecodingKey, VerifyError> {
    DecodingKey::from_jwk(jwk).map_err(|e| VerifyError::Unavailable(format!("unusable signing key: {e}")))
}

#[async_trait]
impl IdentityVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<CallerIdentity, VerifyError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| VerifyError::Rejected(format!("Malformed ID token: {e}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::Rejected(
                "ID token must be signed with RS256".to_string(),
            ));
        }
        let kid = header
            .kid
            .ok_or_else(|| VerifyError::Rejected("ID token has no key id".to_string()))?;

        let key = self.decoding_key(&kid).await?;
        let data = jsonwebtoken::decode::<FirebaseClaims>(token, &key, &self.validation())
            .map_err(|e| VerifyError::Rejected(format!("Invalid ID token: {e}")))?;

        if data.claims.sub.is_empty() {
            return Err(VerifyError::Rejected("ID token has an empty subject".to_string()));
        }

        Ok(CallerIdentity {
            uid: data.claims.sub,
            admin_claim: data.claims.admin.unwrap_or(false),
        })
    }
}
