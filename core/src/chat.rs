//! Stat-context sessions, prompt rendering and model reply cleanup for the
//! dashboard chat assistant.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use crate::store::StoreError;

/// Ephemeral per-session counters shown on the dashboard stat cards.
pub type StatContext = BTreeMap<String, i64>;

pub const GREETING: &str = "Hello! I am your virtual assistant. How can I assist you today?";

/// Stat card keys rendered first, with their display labels.
const KNOWN_STATS: [(&str, &str); 4] = [
    ("totalUsers", "Total Users"),
    ("activeErrors", "Active Errors"),
    ("apiRequests", "API Requests"),
    ("databaseOps", "Database Operations"),
];

/// Tags leaked from chat-message object dumps, removed from replies together with their value.
const LEAKED_TAGS: [&str; 5] = [
    "additional_kwargs",
    "response_metadata",
    "usage_metadata",
    "invalid_tool_calls",
    "tool_calls",
];

/// Idle sessions older than this are dropped on the next `open`.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Live session cap; the least recently used session is evicted beyond it.
pub const SESSION_CAPACITY: usize = 10_000;

static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid bold regex"));
static LEAKED_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b(?:{})=", LEAKED_TAGS.join("|"))).expect("valid leaked tag regex")
});
// Dumped message ids are always quoted; a bare `id=42` is ordinary prose.
static LEAKED_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bid=(?:'[^']*'|"[^"]*")"#).expect("valid leaked id regex")
});
static CONTENT_WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^\s*content=(?:'(.*)'|"(.*)")\s*$"#).expect("valid content wrapper regex")
});
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Render the stat block prepended to every model prompt.
pub fn render_stat_block(context: &StatContext) -> String {
    let mut block = String::from("Here are some system stats:\n");
    for (key, label) in KNOWN_STATS {
        match context.get(key) {
            Some(value) => block.push_str(&format!("- {label}: {value}\n")),
            None => block.push_str(&format!("- {label}: N/A\n")),
        }
    }
    for (key, value) in context {
        if KNOWN_STATS.iter().any(|(known, _)| known == key) {
            continue;
        }
        block.push_str(&format!("- {key}: {value}\n"));
    }
    block
}

/// Fixed reply for an empty message, embedding the current stat context.
pub fn greeting(context: &StatContext) -> String {
    format!("{GREETING}\n\n{}", render_stat_block(context))
}

/// Prompt sent to the model: stat block, blank line, user message.
pub fn build_prompt(context: &StatContext, message: &str) -> String {
    format!("{}\n\n{}", render_stat_block(context), message.trim())
}

/// Normalize a raw model reply for display in the chat widget.
pub fn clean_reply(raw: &str) -> String {
    let reply = BOLD_RE.replace_all(raw, "$1");
    let reply = strip_leaked_tags(&reply);
    let reply = LEAKED_ID_RE.replace_all(&reply, "").into_owned();
    let reply = match CONTENT_WRAPPER_RE.captures(&reply) {
        Some(caps) => caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        None => reply,
    };
    WHITESPACE_RE.replace_all(&reply, " ").trim().to_string()
}

/// Remove `tag=<value>` fragments, where the value is a balanced `{...}` /
/// `[...]` group, a quoted string, or a bare token.
fn strip_leaked_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(found) = LEAKED_TAG_RE.find(rest) {
        out.push_str(&rest[..found.start()]);
        let value = &rest[found.end()..];
        rest = &value[leaked_value_len(value)..];
    }
    out.push_str(rest);
    out
}

fn leaked_value_len(value: &str) -> usize {
    let mut chars = value.char_indices();
    let Some((_, first)) = chars.next() else {
        return 0;
    };

    match first {
        '{' | '[' => {
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            for (idx, ch) in value.char_indices() {
                match (quote, ch) {
                    (Some(q), c) if c == q => quote = None,
                    (Some(_), _) => {}
                    (None, '\'' | '"') => quote = Some(ch),
                    (None, '{' | '[') => depth += 1,
                    (None, '}' | ']') => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            return idx + ch.len_utf8();
                        }
                    }
                    _ => {}
                }
            }
            value.len()
        }
        '\'' | '"' => chars
            .find(|(_, ch)| *ch == first)
            .map(|(idx, ch)| idx + ch.len_utf8())
            .unwrap_or(value.len()),
        _ => value.find(char::is_whitespace).unwrap_or(value.len()),
    }
}

/// Per-session stat context accumulation behind a trait so a shared backend
/// can replace the in-memory map. Keys are hashed session tokens.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a new, empty session.
    async fn open(&self, key: String) -> Result<(), StoreError>;

    /// Merge `update` into the session's context and return the merged result.
    /// Unknown keys fail with [`StoreError::NotFound`].
    async fn merge(&self, key: &str, update: &StatContext) -> Result<StatContext, StoreError>;
}

struct Session {
    context: StatContext,
    last_seen: Instant,
}

/// Merges run under the map lock, so concurrent updates to one session
/// never lose values. Sessions idle past `idle_ttl` are swept when a new one
/// opens, and the map never holds more than `capacity` entries.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    idle_ttl: Duration,
    capacity: usize,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::with_limits(SESSION_IDLE_TTL, SESSION_CAPACITY)
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(idle_ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
            capacity: capacity.max(1),
        }
    }

    /// Number of sessions currently held.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

fn evict_least_recent(sessions: &mut HashMap<String, Session>) {
    let oldest = sessions
        .iter()
        .min_by_key(|(_, session)| session.last_seen)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        sessions.remove(&key);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn open(&self, key: String) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&key) {
            return Err(StoreError::Duplicate {
                entity: "chat_session",
                id: key,
            });
        }

        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, session| now.duration_since(session.last_seen) < self.idle_ttl);
        while sessions.len() >= self.capacity {
            evict_least_recent(&mut sessions);
        }
        let dropped = before - sessions.len();
        if dropped > 0 {
            tracing::debug!(dropped, live = sessions.len(), "chat sessions dropped");
        }

        sessions.insert(
            key,
            Session {
                context: StatContext::new(),
                last_seen: now,
            },
        );
        Ok(())
    }

    async fn merge(&self, key: &str, update: &StatContext) -> Result<StatContext, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let expired = sessions
            .get(key)
            .is_some_and(|session| now.duration_since(session.last_seen) >= self.idle_ttl);
        if expired {
            sessions.remove(key);
        }
        let session = sessions.get_mut(key).ok_or_else(|| StoreError::NotFound {
            entity: "chat_session",
            id: key.to_string(),
        })?;
        session.context.extend(update.iter().map(|(k, v)| (k.clone(), *v)));
        session.last_seen = now;
        Ok(session.context.clone())
    }
}
