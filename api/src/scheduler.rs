//! Periodic evaluation of rules whose schedule has elapsed.
//!
//! Runs on its own interval, independent of the HTTP-triggered pass. Triggered
//! alerts are logged, not delivered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashboard_core::alert_service::AlertService;
use dashboard_core::alerts::{EvaluationReport, Observations};
use tokio::time;

/// Where the scheduler gets the observation snapshot for each tick.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn snapshot(&self) -> Observations;
}

/// The same snapshot on every tick.
pub struct FixedObservations(pub Observations);

#[async_trait]
impl ObservationSource for FixedObservations {
    async fn snapshot(&self) -> Observations {
        self.0.clone()
    }
}

pub struct AlertScheduler {
    alerts: AlertService,
    source: Arc<dyn ObservationSource>,
    tick_interval: Duration,
}

impl AlertScheduler {
    pub fn new(alerts: AlertService, source: Arc<dyn ObservationSource>, tick_interval: Duration) -> Self {
        Self {
            alerts,
            source,
            tick_interval,
        }
    }

    pub async fn start(self) {
        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.tick_interval.as_secs(), "alert scheduler started");

        loop {
            ticker.tick().await;
            self.tick_at(Utc::now()).await;
        }
    }

    /// One scheduler cycle. Returns the report, or `None` when the pass failed.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Option<EvaluationReport> {
        let observations = self.source.snapshot().await;
        let report = match self.alerts.evaluate_due(&observations, now).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "alert scheduler tick failed");
                return None;
            }
        };

        for alert in &report.triggered_alerts {
            tracing::info!(
                rule_id = %alert.rule_id,
                user_id = %alert.user_id,
                field = alert.condition.field(),
                message = %alert.alert_message,
                "alert triggered"
            );
        }
        for failure in &report.failures {
            tracing::warn!(rule_id = %failure.rule_id, error = %failure.message, "scheduled rule evaluation failed");
        }
        tracing::debug!(
            triggered = report.triggered_alerts.len(),
            failures = report.failures.len(),
            "alert scheduler cycle complete"
        );
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use dashboard_core::alerts::{ConditionSpec, ConditionValue, Frequency, NewAlertRule};
    use dashboard_core::auth::CallerIdentity;
    use dashboard_core::store::InMemoryRuleStore;

    use super::*;

    fn draft(frequency: Frequency) -> NewAlertRule {
        NewAlertRule {
            user_id: "alice".to_string(),
            condition: ConditionSpec {
                field: "temperature".to_string(),
                operator: ">".to_string(),
                value: ConditionValue::Text("30".to_string()),
            },
            frequency,
            notification_message: "Too hot".to_string(),
        }
    }

    #[tokio::test]
    async fn only_due_rules_fire_on_a_tick() {
        let alerts = AlertService::new(Arc::new(InMemoryRuleStore::new()));
        let created = Utc::now();
        alerts
            .add_rule_at(draft(Frequency::Once), &CallerIdentity::new("alice"), created)
            .await
            .unwrap();
        alerts
            .add_rule_at(draft(Frequency::Recurring), &CallerIdentity::new("alice"), created)
            .await
            .unwrap();

        let observations: Observations = [("temperature".to_string(), 32.0)].into_iter().collect();
        let scheduler = AlertScheduler::new(
            alerts,
            Arc::new(FixedObservations(observations)),
            Duration::from_secs(60),
        );

        // Before the once rule's first minute has passed nothing is due.
        let early = scheduler.tick_at(created + chrono::Duration::seconds(30)).await.unwrap();
        assert!(early.triggered_alerts.is_empty());

        let later = scheduler.tick_at(created + chrono::Duration::minutes(2)).await.unwrap();
        assert_eq!(later.triggered_alerts.len(), 1);

        let after_hour = scheduler.tick_at(created + chrono::Duration::minutes(61)).await.unwrap();
        assert_eq!(after_hour.triggered_alerts.len(), 1);
        assert_eq!(after_hour.triggered_alerts[0].alert_message, "Too hot");
    }
}
