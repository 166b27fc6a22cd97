//! Rule storage behind a trait so a persistent backend can replace the
//! in-memory one without touching callers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::alerts::AlertRule;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    #[error("Store: {entity} already exists (id={id})")]
    Duplicate { entity: &'static str, id: String },

    /// Failure reported by the backing store.
    #[error("Store: {0}")]
    Backend(String),
}

/// In-place mutation applied to a single rule while its lock is held.
/// Returns `true` when the rule was changed.
pub type RuleMutation<'a> = &'a (dyn Fn(&mut AlertRule) -> bool + Send + Sync);

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Append a rule. Ids are unique; the store never reorders.
    async fn insert(&self, rule: AlertRule) -> Result<AlertRule, StoreError>;

    /// Rules owned by `user_id`, in insertion order.
    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<AlertRule>, StoreError>;

    /// Ids of every stored rule, in insertion order.
    async fn rule_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Apply `mutate` to one rule under that rule's lock.
    /// Returns the updated rule if `mutate` reported a change, `None` otherwise.
    async fn update_with(
        &self,
        id: Uuid,
        mutate: RuleMutation<'_>,
    ) -> Result<Option<AlertRule>, StoreError>;
}

/// Process-lifetime rule store. The index lock guards membership, and each
/// rule has its own mutex so concurrent evaluations serialize per rule.
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<Vec<(Uuid, Arc<Mutex<AlertRule>>)>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn handle(&self, id: Uuid) -> Option<Arc<Mutex<AlertRule>>> {
        self.rules
            .read()
            .await
            .iter()
            .find(|(rule_id, _)| *rule_id == id)
            .map(|(_, handle)| Arc::clone(handle))
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn insert(&self, rule: AlertRule) -> Result<AlertRule, StoreError> {
        let mut rules = self.rules.write().await;
        if rules.iter().any(|(id, _)| *id == rule.id) {
            return Err(StoreError::Duplicate {
                entity: "alert_rule",
                id: rule.id.to_string(),
            });
        }
        rules.push((rule.id, Arc::new(Mutex::new(rule.clone()))));
        Ok(rule)
    }

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<AlertRule>, StoreError> {
        let rules = self.rules.read().await;
        let mut owned = Vec::new();
        for (_, handle) in rules.iter() {
            let rule = handle.lock().await;
            if rule.user_id == user_id {
                owned.push(rule.clone());
            }
        }
        Ok(owned)
    }

    async fn rule_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.rules.read().await.iter().map(|(id, _)| *id).collect())
    }

    async fn update_with(
        &self,
        id: Uuid,
        mutate: RuleMutation<'_>,
    ) -> Result<Option<AlertRule>, StoreError> {
        // Index lock is released before the rule lock is taken.
        let handle = self.handle(id).await.ok_or_else(|| StoreError::NotFound {
            entity: "alert_rule",
            id: id.to_string(),
        })?;

        let mut rule = handle.lock().await;
        if mutate(&mut *rule) {
            Ok(Some(rule.clone()))
        } else {
            Ok(None)
        }
    }
}
