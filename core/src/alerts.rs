use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::StoreError;

/// Flat field -> value mapping an evaluation pass runs against.
pub type Observations = HashMap<String, f64>;

/// Delay before a freshly created `once` rule is considered due.
pub const ONCE_DELAY_MINUTES: i64 = 1;
/// Re-arm interval for `recurring` rules, applied at creation and after every trigger.
pub const RECURRING_INTERVAL_HOURS: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("{message}")]
    Forbidden { message: String },

    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
        received: Option<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How often a rule may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Fires at most once, then becomes terminal
    Once,
    /// Re-arms one hour after every trigger
    Recurring,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Once => "once",
            Frequency::Recurring => "recurring",
        }
    }

    /// Schedule assigned when a rule is created.
    pub fn initial_schedule(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frequency::Once => now + Duration::minutes(ONCE_DELAY_MINUTES),
            Frequency::Recurring => now + Duration::hours(RECURRING_INTERVAL_HOURS),
        }
    }

    /// Schedule after a trigger at `now`. `None` means the rule is spent.
    pub fn rearm(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Frequency::Once => None,
            Frequency::Recurring => Some(now + Duration::hours(RECURRING_INTERVAL_HOURS)),
        }
    }
}

/// Threshold value as it appears on the wire. Numeric strings are canonical;
/// bare JSON numbers are accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Text(String),
    Number(f64),
}

/// Wire shape of a condition: `{"field": "temperature", "operator": ">", "value": "30"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConditionSpec {
    pub field: String,
    #[schema(example = ">")]
    pub operator: String,
    #[schema(value_type = String, example = "30")]
    pub value: ConditionValue,
}

/// A validated condition. Only operators listed here can be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConditionSpec", into = "ConditionSpec")]
pub enum Condition {
    GreaterThan { field: String, threshold: f64 },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::GreaterThan { field, .. } => field,
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            Condition::GreaterThan { .. } => ">",
        }
    }

    /// Whether the observation snapshot satisfies this condition.
    ///
    /// A missing field and an observed `0` are both treated as "no data".
    pub fn is_satisfied(&self, observations: &Observations) -> bool {
        let observed = match observations.get(self.field()) {
            Some(value) if *value != 0.0 => *value,
            _ => return false,
        };

        match self {
            Condition::GreaterThan { threshold, .. } => observed > *threshold,
        }
    }
}

impl TryFrom<ConditionSpec> for Condition {
    type Error = AlertError;

    fn try_from(spec: ConditionSpec) -> Result<Self, Self::Error> {
        let field = spec.field.trim();
        if field.is_empty() {
            return Err(AlertError::Validation {
                field: "condition.field",
                message: "field name must not be empty".to_string(),
                received: Some(spec.field),
            });
        }

        let threshold = parse_threshold(&spec.value)?;

        match spec.operator.trim() {
            ">" => Ok(Condition::GreaterThan {
                field: field.to_string(),
                threshold,
            }),
            other => Err(AlertError::Validation {
                field: "condition.operator",
                message: "unsupported operator, only '>' is available".to_string(),
                received: Some(other.to_string()),
            }),
        }
    }
}

impl From<Condition> for ConditionSpec {
    fn from(condition: Condition) -> Self {
        let operator = condition.operator().to_string();
        match condition {
            Condition::GreaterThan { field, threshold } => ConditionSpec {
                field,
                operator,
                value: ConditionValue::Text(threshold.to_string()),
            },
        }
    }
}

fn parse_threshold(value: &ConditionValue) -> Result<f64, AlertError> {
    let (parsed, received) = match value {
        ConditionValue::Number(n) => (Some(*n), n.to_string()),
        ConditionValue::Text(text) => (text.trim().parse::<f64>().ok(), text.clone()),
    };

    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(AlertError::Validation {
            field: "condition.value",
            message: "value must be a finite number".to_string(),
            received: Some(received),
        }),
    }
}

/// A stored, user-owned threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AlertRule {
    pub id: Uuid,
    pub user_id: String,
    #[schema(value_type = ConditionSpec)]
    pub condition: Condition,
    pub frequency: Frequency,
    pub notification_message: String,
    /// Derived by the server; absent once a `once` rule has fired
    pub next_alert_time: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// A `once` rule that has already fired.
    pub fn is_exhausted(&self) -> bool {
        self.frequency == Frequency::Once && self.next_alert_time.is_none()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_alert_time.is_some_and(|at| at <= now)
    }

    /// Evaluate against `observations` and re-arm in place when the rule fires.
    /// Returns whether it fired.
    pub fn fire_if_satisfied(&mut self, observations: &Observations, now: DateTime<Utc>) -> bool {
        if self.is_exhausted() || !self.condition.is_satisfied(observations) {
            return false;
        }
        self.next_alert_time = self.frequency.rearm(now);
        true
    }
}

/// Request body for creating a rule. Any `next_alert_time` sent by the
/// client is ignored; the schedule is always derived from `frequency`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewAlertRule {
    pub user_id: String,
    pub condition: ConditionSpec,
    pub frequency: Frequency,
    pub notification_message: String,
}

/// One rule firing during an evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TriggeredAlert {
    pub rule_id: Uuid,
    pub user_id: String,
    pub alert_message: String,
    #[schema(value_type = ConditionSpec)]
    pub condition: Condition,
}

impl TriggeredAlert {
    pub fn from_rule(rule: &AlertRule) -> Self {
        Self {
            rule_id: rule.id,
            user_id: rule.user_id.clone(),
            alert_message: rule.notification_message.clone(),
            condition: rule.condition.clone(),
        }
    }
}

/// A rule whose evaluation could not be completed. The pass continued without it.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RuleFailure {
    pub rule_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct EvaluationReport {
    pub triggered_alerts: Vec<TriggeredAlert>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RuleFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(operator: &str, value: ConditionValue) -> ConditionSpec {
        ConditionSpec {
            field: "temperature".to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    fn gt(threshold: f64) -> Condition {
        Condition::GreaterThan {
            field: "temperature".to_string(),
            threshold,
        }
    }

    fn obs(pairs: &[(&str, f64)]) -> Observations {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn numeric_string_condition_parses() {
        let condition = Condition::try_from(spec(">", ConditionValue::Text(" 30 ".into()))).unwrap();
        assert_eq!(condition, gt(30.0));
    }

    #[test]
    fn json_number_condition_parses() {
        let condition = Condition::try_from(spec(">", ConditionValue::Number(12.5))).unwrap();
        assert_eq!(condition, gt(12.5));
    }

    #[test]
    fn unparseable_value_is_rejected_at_creation() {
        let err = Condition::try_from(spec(">", ConditionValue::Text("hot".into()))).unwrap_err();
        match err {
            AlertError::Validation { field, received, .. } => {
                assert_eq!(field, "condition.value");
                assert_eq!(received.as_deref(), Some("hot"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let err = Condition::try_from(spec(">", ConditionValue::Text("inf".into()))).unwrap_err();
        assert!(matches!(err, AlertError::Validation { field: "condition.value", .. }));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = Condition::try_from(spec("<", ConditionValue::Text("30".into()))).unwrap_err();
        assert!(matches!(err, AlertError::Validation { field: "condition.operator", .. }));
    }

    #[test]
    fn empty_field_is_rejected() {
        let mut raw = spec(">", ConditionValue::Text("30".into()));
        raw.field = "   ".to_string();
        let err = Condition::try_from(raw).unwrap_err();
        assert!(matches!(err, AlertError::Validation { field: "condition.field", .. }));
    }

    #[test]
    fn condition_serializes_to_wire_shape() {
        let json = serde_json::to_value(gt(30.0)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"field": "temperature", "operator": ">", "value": "30"})
        );
    }

    #[test]
    fn condition_deserialization_validates() {
        let ok: Condition =
            serde_json::from_value(serde_json::json!({"field": "temperature", "operator": ">", "value": "30"}))
                .unwrap();
        assert_eq!(ok, gt(30.0));

        let bad = serde_json::from_value::<Condition>(
            serde_json::json!({"field": "temperature", "operator": ">", "value": "warm"}),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn greater_than_is_strict() {
        let condition = gt(30.0);
        assert!(condition.is_satisfied(&obs(&[("temperature", 32.0)])));
        assert!(!condition.is_satisfied(&obs(&[("temperature", 30.0)])));
        assert!(!condition.is_satisfied(&obs(&[("temperature", 12.0)])));
    }

    #[test]
    fn missing_and_zero_observations_never_satisfy() {
        let condition = gt(-5.0);
        assert!(!condition.is_satisfied(&obs(&[])));
        assert!(!condition.is_satisfied(&obs(&[("humidity", 90.0)])));
        assert!(!condition.is_satisfied(&obs(&[("temperature", 0.0)])));
    }

    #[test]
    fn schedule_policy() {
        let now = Utc::now();
        assert_eq!(Frequency::Once.initial_schedule(now), now + Duration::minutes(1));
        assert_eq!(Frequency::Recurring.initial_schedule(now), now + Duration::hours(1));
        assert_eq!(Frequency::Once.rearm(now), None);
        assert_eq!(Frequency::Recurring.rearm(now), Some(now + Duration::hours(1)));
    }

    #[test]
    fn once_rule_fires_a_single_time() {
        let now = Utc::now();
        let mut rule = AlertRule {
            id: Uuid::now_v7(),
            user_id: "u1".to_string(),
            condition: gt(30.0),
            frequency: Frequency::Once,
            notification_message: "hot".to_string(),
            next_alert_time: Some(Frequency::Once.initial_schedule(now)),
        };
        let hot = obs(&[("temperature", 40.0)]);

        assert!(rule.fire_if_satisfied(&hot, now));
        assert!(rule.is_exhausted());
        assert!(!rule.fire_if_satisfied(&obs(&[("temperature", 90.0)]), now));
        assert_eq!(rule.next_alert_time, None);
    }

    #[test]
    fn is_due_compares_against_schedule() {
        let now = Utc::now();
        let mut rule = AlertRule {
            id: Uuid::now_v7(),
            user_id: "u1".to_string(),
            condition: gt(30.0),
            frequency: Frequency::Recurring,
            notification_message: "hot".to_string(),
            next_alert_time: Some(now + Duration::hours(1)),
        };
        assert!(!rule.is_due(now));
        assert!(rule.is_due(now + Duration::hours(1)));
        rule.next_alert_time = None;
        assert!(!rule.is_due(now + Duration::days(1)));
    }

    #[test]
    fn exhausted_rule_serializes_with_null_schedule() {
        let rule = AlertRule {
            id: Uuid::now_v7(),
            user_id: "u1".to_string(),
            condition: gt(30.0),
            frequency: Frequency::Once,
            notification_message: "hot".to_string(),
            next_alert_time: None,
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["frequency"], "once");
        assert_eq!(json["condition"]["value"], "30");
        assert!(json["next_alert_time"].is_null());
    }
}
