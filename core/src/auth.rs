use rand::Rng;
use sha2::{Digest, Sha256};

const SESSION_TOKEN_PREFIX: &str = "dash_ss_";

/// Identity of a caller whose bearer token has been verified by the
/// identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Provider-assigned user id (the token's `sub` claim)
    pub uid: String,
    /// True when the token carries the `admin: true` custom claim
    pub admin_claim: bool,
}

impl CallerIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            admin_claim: false,
        }
    }
}

/// Generate a chat session token. Returns `(full_token, sha256_hash)`.
/// Format: `dash_ss_` + 32 random bytes hex-encoded.
pub fn generate_session_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("{SESSION_TOKEN_PREFIX}{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// Cheap shape check so obviously foreign strings never reach the store.
pub fn is_session_token(token: &str) -> bool {
    token
        .strip_prefix(SESSION_TOKEN_PREFIX)
        .is_some_and(|rest| rest.len() == 64 && rest.chars().all(|c| c.is_ascii_hexdigit()))
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate `n` random bytes and return as hex string.
fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}
