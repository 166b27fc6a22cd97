//! Paginated user listing from the Firebase Auth user database
//! (Identity Toolkit `accounts:batchGet`).

use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use dashboard_core::users::{DirectoryUser, UserSummary};
use serde::Deserialize;

use crate::google_auth::{AccessTokenSource, GoogleAuthError};

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
/// Largest page the Identity Toolkit API serves.
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Auth(#[from] GoogleAuthError),

    #[error("user listing request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("user listing returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct UserPage {
    pub users: Vec<DirectoryUser>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetch one page. `None` requests the first page.
    async fn list_page(&self, page_token: Option<&str>) -> Result<UserPage, DirectoryError>;
}

enum PagerState {
    Start,
    Next(String),
    Done,
}

/// Lazily walks a directory page by page. Not restartable: once exhausted it
/// keeps returning `None`.
pub struct UserPager<'a> {
    directory: &'a dyn UserDirectory,
    state: PagerState,
}

impl<'a> UserPager<'a> {
    pub fn new(directory: &'a dyn UserDirectory) -> Self {
        Self {
            directory,
            state: PagerState::Start,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<DirectoryUser>>, DirectoryError> {
        let token = match &self.state {
            PagerState::Start => None,
            PagerState::Next(token) => Some(token.clone()),
            PagerState::Done => return Ok(None),
        };

        let page = self.directory.list_page(token.as_deref()).await?;
        // A provider echoing the same token would otherwise loop forever.
        self.state = match page.next_page_token {
            Some(next) if !next.is_empty() && Some(&next) != token.as_ref() => PagerState::Next(next),
            _ => PagerState::Done,
        };
        Ok(Some(page.users))
    }
}

/// Every user in the directory, flattened across pages and projected for display.
pub async fn list_all_users(
    directory: &dyn UserDirectory,
    tz: Tz,
) -> Result<Vec<UserSummary>, DirectoryError> {
    let mut pager = UserPager::new(directory);
    let mut users = Vec::new();
    let mut pages = 0usize;
    while let Some(page) = pager.next_page().await? {
        pages += 1;
        users.extend(page.into_iter().map(|user| UserSummary::from_directory(user, tz)));
    }
    tracing::debug!(pages, users = users.len(), "Listed directory users");
    Ok(users)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<ToolkitUser>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Timestamps arrive as decimal strings of epoch milliseconds.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolkitUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    last_login_at: Option<String>,
}

impl From<ToolkitUser> for DirectoryUser {
    fn from(user: ToolkitUser) -> Self {
        DirectoryUser {
            uid: user.local_id,
            email: user.email,
            email_verified: user.email_verified,
            disabled: user.disabled,
            created_at_ms: user.created_at.and_then(|ms| ms.parse().ok()),
            last_sign_in_ms: user.last_login_at.and_then(|ms| ms.parse().ok()),
        }
    }
}

pub struct FirebaseUserDirectory {
    tokens: AccessTokenSource,
    http: reqwest::Client,
    base_url: String,
}

impl FirebaseUserDirectory {
    pub fn new(tokens: AccessTokenSource, timeout: Duration) -> Result<Self, DirectoryError> {
        Ok(Self {
            tokens,
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: IDENTITY_TOOLKIT_URL.to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for FirebaseUserDirectory {
    async fn list_page(&self, page_token: Option<&str>) -> Result<UserPage, DirectoryError> {
        let access_token = self.tokens.access_token().await?;
        let url = format!(
            "{}/projects/{}/accounts:batchGet",
            self.base_url,
            self.tokens.project_id()
        );

        let mut request = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(&[("maxResults", MAX_PAGE_SIZE.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("nextPageToken", token)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status { status, body });
        }

        let batch: BatchGetResponse = response.json().await?;
        Ok(UserPage {
            users: batch.users.into_iter().map(DirectoryUser::from).collect(),
            next_page_token: batch.next_page_token,
        })
    }
}
