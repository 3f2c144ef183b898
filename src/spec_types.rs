//! Wire models for the config-specs endpoint.
//!
//! The payload is loosely typed JSON; everything is re-validated on ingress. A payload that
//! fails to parse rejects the whole snapshot, with one deliberate exception: unknown condition
//! types parse into [`ConditionKind::Unknown`] so that a single forward-incompatible condition
//! fails closed instead of taking down the entire ruleset.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a config spec.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecType {
    FeatureGate,
    DynamicConfig,
    Layer,
}

/// A server-authored definition of a gate, dynamic config, or layer.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub spec_type: SpecType,
    pub salt: String,
    pub enabled: bool,
    pub default_value: Value,
    pub rules: Vec<Rule>,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub explicit_parameters: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl ConfigSpec {
    /// Whether this spec represents a running experiment.
    pub fn is_experiment(&self) -> bool {
        self.entity == "experiment"
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub pass_percentage: f64,
    pub conditions: Vec<Condition>,
    pub return_value: Value,
    /// Rules without a salt of their own bucket on their id.
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    #[serde(default)]
    pub group_name: Option<String>,
    /// Layer rule → experiment link.
    #[serde(default)]
    pub config_delegate: Option<String>,
    #[serde(default)]
    pub is_experiment_group: Option<bool>,
}

impl Rule {
    /// The salt used for pass/fail bucketing: the rule's own salt, or its id.
    pub fn bucketing_salt(&self) -> &str {
        self.salt.as_deref().unwrap_or(&self.id)
    }
}

/// Possible condition types.
///
/// The server may introduce new types at any time; those parse into [`ConditionKind::Unknown`]
/// and evaluate as a non-match.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Public,
    FailGate,
    PassGate,
    IpBased,
    UaBased,
    UserField,
    CurrencyCode,
    EnvironmentField,
    UserBucket,
    UnitId,
    MultiPassGate,
    MultiFailGate,
    #[serde(other)]
    Unknown,
}

/// `Condition` is a check of one user field (or derived value) against `target_value` under
/// `operator`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub target_value: Value,
    /// Operators are matched by name at evaluation time; unknown operators fail closed.
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub additional_values: HashMap<String, Value>,
    #[serde(default = "default_id_type")]
    pub id_type: String,
}

/// Response format of the config-specs endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpecsResponse {
    #[serde(default)]
    pub has_updates: bool,
    #[serde(default)]
    pub time: u64,
    /// `None` when the payload carries no update. A payload with `has_updates` set and any of
    /// the three spec arrays missing is rejected by the store.
    #[serde(default)]
    pub feature_gates: Option<Vec<ConfigSpec>>,
    #[serde(default)]
    pub dynamic_configs: Option<Vec<ConfigSpec>>,
    #[serde(default)]
    pub layer_configs: Option<Vec<ConfigSpec>>,
    /// Layer name → member experiment names. Inverted into the experiment→layer map.
    #[serde(default)]
    pub layers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub sdk_keys_to_app_ids: HashMap<String, String>,
    /// Diagnostics sampling rates. Non-numeric values are ignored; numeric values are clamped.
    #[serde(default)]
    pub diagnostics: HashMap<String, Value>,
}

/// A secondary exposure recorded while evaluating nested gates.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SecondaryExposure {
    pub gate: String,
    #[serde(rename = "gateValue")]
    pub gate_value: String,
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

fn default_id_type() -> String {
    "userID".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_gate_spec() {
        let spec: ConfigSpec = serde_json::from_str(
            r#"{
                "name": "nfl",
                "type": "feature_gate",
                "salt": "na",
                "enabled": true,
                "defaultValue": false,
                "rules": [{
                    "id": "rule_id_gate",
                    "name": "email match",
                    "passPercentage": 100,
                    "conditions": [{
                        "type": "user_field",
                        "field": "email",
                        "operator": "str_contains_any",
                        "targetValue": ["packers.com", "nfl.com"]
                    }],
                    "returnValue": true
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(spec.spec_type, SpecType::FeatureGate);
        assert_eq!(spec.id_type, "userID");
        assert_eq!(spec.rules.len(), 1);
        assert_eq!(spec.rules[0].bucketing_salt(), "rule_id_gate");
        assert_eq!(spec.rules[0].conditions[0].kind, ConditionKind::UserField);
    }

    #[test]
    fn rule_salt_overrides_id() {
        let rule: Rule = serde_json::from_str(
            r#"{"id": "r1", "salt": "custom", "passPercentage": 50, "conditions": [], "returnValue": {}}"#,
        )
        .unwrap();
        assert_eq!(rule.bucketing_salt(), "custom");
    }

    #[test]
    fn unknown_condition_type_parses_as_unknown() {
        let condition: Condition = serde_json::from_str(
            r#"{"type": "quantum_entanglement", "targetValue": 1}"#,
        )
        .unwrap();
        assert_eq!(condition.kind, ConditionKind::Unknown);
    }

    #[test]
    fn unknown_spec_type_is_a_parse_error() {
        let result: std::result::Result<ConfigSpec, _> = serde_json::from_str(
            r#"{"name": "x", "type": "hologram", "salt": "s", "enabled": true,
                "defaultValue": false, "rules": []}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn no_update_response_parses_without_arrays() {
        let response: SpecsResponse =
            serde_json::from_str(r#"{"has_updates": false}"#).unwrap();
        assert!(!response.has_updates);
        assert!(response.feature_gates.is_none());
    }
}
