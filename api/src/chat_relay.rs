use std::sync::Arc;

use dashboard_core::auth::{generate_session_token, hash_token, is_session_token};
use dashboard_core::chat::{SessionStore, StatContext, build_prompt, clean_reply, greeting};
use dashboard_core::store::StoreError;

use crate::llm::{ChatModel, LlmError};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] LlmError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    /// Token the client presents on its next call to keep accumulating stats
    pub session_token: String,
}

/// Stateless-per-request relay to the chat model; only the stat context
/// survives between calls, keyed by a server-issued session token.
pub struct ChatRelay {
    sessions: Arc<dyn SessionStore>,
    model: Arc<dyn ChatModel>,
}

impl ChatRelay {
    pub fn new(sessions: Arc<dyn SessionStore>, model: Arc<dyn ChatModel>) -> Self {
        Self { sessions, model }
    }

    pub async fn reply(
        &self,
        message: &str,
        stats: &StatContext,
        session_token: Option<&str>,
    ) -> Result<ChatReply, ChatError> {
        let (session_token, context) = self.resolve_session(session_token, stats).await?;
        tracing::debug!(stat_context = ?context, "Chat stat context");

        if message.trim().is_empty() {
            return Ok(ChatReply {
                reply: greeting(&context),
                session_token,
            });
        }

        let prompt = build_prompt(&context, message);
        let raw = self.model.generate(&prompt).await?;
        tracing::info!(
            model = self.model.model_name(),
            reply_length = raw.len(),
            "Chat model replied"
        );

        Ok(ChatReply {
            reply: clean_reply(&raw),
            session_token,
        })
    }

    /// Merge `stats` into the presented session, or into a fresh one when the
    /// token is absent or unknown.
    async fn resolve_session(
        &self,
        presented: Option<&str>,
        stats: &StatContext,
    ) -> Result<(String, StatContext), StoreError> {
        if let Some(token) = presented.filter(|token| is_session_token(token)) {
            match self.sessions.merge(&hash_token(token), stats).await {
                Ok(context) => return Ok((token.to_string(), context)),
                Err(StoreError::NotFound { .. }) => {
                    tracing::debug!("Unknown chat session token, opening a new session");
                }
                Err(err) => return Err(err),
            }
        }

        let (token, key) = generate_session_token();
        self.sessions.open(key.clone()).await?;
        let context = self.sessions.merge(&key, stats).await?;
        Ok((token, context))
    }
}
