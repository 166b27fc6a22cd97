use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alerts::{
    AlertError, AlertRule, Condition, EvaluationReport, NewAlertRule, Observations, RuleFailure,
    TriggeredAlert,
};
use crate::auth::CallerIdentity;
use crate::store::RuleStore;

/// Orchestrates rule creation, owner-scoped listing and evaluation passes
/// over a [`RuleStore`].
#[derive(Clone)]
pub struct AlertService {
    store: Arc<dyn RuleStore>,
}

impl AlertService {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    pub async fn add_rule(
        &self,
        draft: NewAlertRule,
        caller: &CallerIdentity,
    ) -> Result<AlertRule, AlertError> {
        self.add_rule_at(draft, caller, Utc::now()).await
    }

    /// Validate, schedule and store a rule owned by `caller`.
    pub async fn add_rule_at(
        &self,
        draft: NewAlertRule,
        caller: &CallerIdentity,
        now: DateTime<Utc>,
    ) -> Result<AlertRule, AlertError> {
        if draft.user_id != caller.uid {
            tracing::warn!(
                caller_uid = %caller.uid,
                requested_owner = %draft.user_id,
                decision = "deny",
                "alert rule ownership check"
            );
            return Err(AlertError::Forbidden {
                message: "You can only add rules for your own account.".to_string(),
            });
        }

        let condition = Condition::try_from(draft.condition)?;
        let rule = AlertRule {
            id: Uuid::now_v7(),
            user_id: draft.user_id,
            condition,
            frequency: draft.frequency,
            notification_message: draft.notification_message,
            next_alert_time: Some(draft.frequency.initial_schedule(now)),
        };

        let stored = self.store.insert(rule).await?;
        tracing::info!(
            rule_id = %stored.id,
            user_id = %stored.user_id,
            field = stored.condition.field(),
            frequency = stored.frequency.as_str(),
            "alert rule created"
        );
        Ok(stored)
    }

    pub async fn list_rules(&self, caller: &CallerIdentity) -> Result<Vec<AlertRule>, AlertError> {
        Ok(self.store.list_by_owner(&caller.uid).await?)
    }

    /// Evaluate every stored rule, whatever its schedule, against `observations`.
    pub async fn evaluate(&self, observations: &Observations) -> Result<EvaluationReport, AlertError> {
        self.evaluate_at(observations, Utc::now()).await
    }

    pub async fn evaluate_at(
        &self,
        observations: &Observations,
        now: DateTime<Utc>,
    ) -> Result<EvaluationReport, AlertError> {
        self.run_pass(observations, now, false).await
    }

    /// Evaluate only the rules whose `next_alert_time` has elapsed at `now`.
    pub async fn evaluate_due(
        &self,
        observations: &Observations,
        now: DateTime<Utc>,
    ) -> Result<EvaluationReport, AlertError> {
        self.run_pass(observations, now, true).await
    }

    async fn run_pass(
        &self,
        observations: &Observations,
        now: DateTime<Utc>,
        due_only: bool,
    ) -> Result<EvaluationReport, AlertError> {
        let ids = self.store.rule_ids().await?;
        let mut report = EvaluationReport::default();

        let mutate = |rule: &mut AlertRule| {
            if due_only && !rule.is_due(now) {
                return false;
            }
            rule.fire_if_satisfied(observations, now)
        };

        for id in ids {
            match self.store.update_with(id, &mutate).await {
                Ok(Some(fired)) => {
                    tracing::info!(
                        rule_id = %fired.id,
                        user_id = %fired.user_id,
                        field = fired.condition.field(),
                        next_alert_time = ?fired.next_alert_time,
                        "alert rule triggered"
                    );
                    report.triggered_alerts.push(TriggeredAlert::from_rule(&fired));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(rule_id = %id, error = %err, "alert rule evaluation failed");
                    report.failures.push(RuleFailure {
                        rule_id: id,
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            triggered = report.triggered_alerts.len(),
            failed = report.failures.len(),
            due_only,
            "evaluation pass complete"
        );
        Ok(report)
    }
}
