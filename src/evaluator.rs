//! The rule engine.
//!
//! Evaluation is a pure function of the captured snapshot and the user: the evaluator clones
//! the snapshot `Arc` once at construction and never takes a lock afterwards, so concurrent
//! syncs can replace the store's snapshot without affecting in-flight evaluations.
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::hashing;
use crate::operators;
use crate::spec_store::{SpecStore, SpecsSnapshot};
use crate::spec_types::{Condition, ConditionKind, ConfigSpec, SecondaryExposure};
use crate::user::StatsigUser;

/// Nested gate references (`pass_gate`, `fail_gate`) are bounded to this depth; anything
/// deeper is assumed to be a reference cycle and evaluates as a non-match.
pub const MAX_GATE_RECURSION_DEPTH: usize = 20;

static DEPTH_WARNING: std::sync::Once = std::sync::Once::new();

/// Result of evaluating a spec for a user.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: Value,
    pub rule_id: String,
    pub group_name: Option<String>,
    /// Exposures accumulated from nested gate evaluations, delegate included.
    pub secondary_exposures: Vec<SecondaryExposure>,
    /// The exposure list as it stood before layer delegation, for layer exposure logging.
    pub undelegated_secondary_exposures: Option<Vec<SecondaryExposure>>,
    /// Name of the experiment a layer rule delegated to, if any.
    pub config_delegate: Option<String>,
    pub explicit_parameters: Option<Vec<String>>,
    pub is_experiment_group: bool,
    pub is_experiment_active: bool,
    /// Set when the spec used a condition type or operator this SDK does not recognize.
    pub unsupported: bool,
}

impl Evaluation {
    fn empty(value: Value, rule_id: &str) -> Evaluation {
        Evaluation {
            value,
            rule_id: rule_id.to_string(),
            group_name: None,
            secondary_exposures: Vec::new(),
            undelegated_secondary_exposures: None,
            config_delegate: None,
            explicit_parameters: None,
            is_experiment_group: false,
            is_experiment_active: false,
            unsupported: false,
        }
    }

    /// Result for a spec name the snapshot does not know.
    fn unrecognized(value: Value) -> Evaluation {
        Evaluation::empty(value, "")
    }

    /// The evaluation result as a gate decision.
    pub fn bool_value(&self) -> bool {
        self.value.as_bool().unwrap_or(false)
    }
}

struct ConditionOutcome {
    matched: bool,
    unsupported: bool,
}

impl ConditionOutcome {
    fn matched(matched: bool) -> ConditionOutcome {
        ConditionOutcome {
            matched,
            unsupported: false,
        }
    }

    fn unsupported() -> ConditionOutcome {
        ConditionOutcome {
            matched: false,
            unsupported: true,
        }
    }
}

/// Evaluates users against a single consistent snapshot of the spec store.
pub struct Evaluator<'a> {
    store: &'a SpecStore,
    snapshot: Arc<SpecsSnapshot>,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a SpecStore) -> Evaluator<'a> {
        Evaluator {
            snapshot: store.current_snapshot(),
            store,
        }
    }

    /// Evaluate the named feature gate. Unknown gates evaluate to `false` with an empty rule.
    pub fn check_gate(&self, user: &StatsigUser, gate_name: &str) -> Evaluation {
        match self.snapshot.gates.get(gate_name) {
            Some(spec) => self.eval_spec(user, spec, 0),
            None => Evaluation::unrecognized(Value::Bool(false)),
        }
    }

    /// Evaluate the named dynamic config or experiment.
    pub fn get_config(&self, user: &StatsigUser, config_name: &str) -> Evaluation {
        match self.snapshot.configs.get(config_name) {
            Some(spec) => self.eval_spec(user, spec, 0),
            None => Evaluation::unrecognized(Value::Object(Map::new())),
        }
    }

    /// Evaluate the named layer, following the config delegate when a rule names one.
    pub fn get_layer(&self, user: &StatsigUser, layer_name: &str) -> Evaluation {
        match self.snapshot.layers.get(layer_name) {
            Some(spec) => self.eval_spec(user, spec, 0),
            None => Evaluation::unrecognized(Value::Object(Map::new())),
        }
    }

    /// Evaluate a spec directly. Exposed for callers that resolve specs themselves.
    pub fn evaluate_spec(&self, user: &StatsigUser, spec: &ConfigSpec) -> Evaluation {
        self.eval_spec(user, spec, 0)
    }

    fn eval_spec(&self, user: &StatsigUser, spec: &ConfigSpec, depth: usize) -> Evaluation {
        if !spec.enabled {
            let mut result = Evaluation::empty(spec.default_value.clone(), "disabled");
            result.is_experiment_active = spec.is_active.unwrap_or(false);
            return result;
        }

        let mut exposures: Vec<SecondaryExposure> = Vec::new();
        let mut unsupported = false;

        'rules: for rule in &spec.rules {
            for condition in &rule.conditions {
                let outcome = self.eval_condition(user, condition, spec, depth, &mut exposures);
                unsupported |= outcome.unsupported;
                if !outcome.matched {
                    continue 'rules;
                }
            }

            // Every condition matched; the bucketing decision belongs to this rule whether
            // it passes or not.
            let unit_id = user.get_unit_id(&rule.id_type).unwrap_or("");
            let passed = hashing::passes_percentage(
                &spec.salt,
                rule.bucketing_salt(),
                unit_id,
                rule.pass_percentage,
            );

            let mut result = if passed {
                if let Some(delegated) = self.eval_delegate(user, spec, rule, &exposures, depth) {
                    return delegated;
                }
                Evaluation::empty(rule.return_value.clone(), &rule.id)
            } else {
                Evaluation::empty(spec.default_value.clone(), &rule.id)
            };
            result.group_name = rule.group_name.clone();
            result.is_experiment_group = passed && rule.is_experiment_group.unwrap_or(false);
            result.is_experiment_active = spec.is_active.unwrap_or(false);
            result.secondary_exposures = exposures;
            result.unsupported = unsupported;
            return result;
        }

        let mut result = Evaluation::empty(spec.default_value.clone(), "default");
        result.is_experiment_active = spec.is_active.unwrap_or(false);
        result.secondary_exposures = exposures;
        result.unsupported = unsupported;
        result
    }

    /// Layer delegation: a passing layer rule that names a `configDelegate` takes its value
    /// (and exposures) from that experiment instead.
    fn eval_delegate(
        &self,
        user: &StatsigUser,
        spec: &ConfigSpec,
        rule: &crate::spec_types::Rule,
        exposures: &[SecondaryExposure],
        depth: usize,
    ) -> Option<Evaluation> {
        let delegate_name = rule.config_delegate.as_deref()?;
        let delegate = self.snapshot.configs.get(delegate_name)?;

        let mut result = self.eval_spec(user, delegate, depth + 1);
        result.config_delegate = Some(delegate_name.to_string());
        result.explicit_parameters = spec.explicit_parameters.clone();
        result.is_experiment_active = delegate.is_active.unwrap_or(false);
        result.undelegated_secondary_exposures = Some(exposures.to_vec());
        let delegate_exposures = std::mem::take(&mut result.secondary_exposures);
        result.secondary_exposures = exposures
            .iter()
            .cloned()
            .chain(delegate_exposures)
            .collect();
        Some(result)
    }

    fn eval_condition(
        &self,
        user: &StatsigUser,
        condition: &Condition,
        spec: &ConfigSpec,
        depth: usize,
        exposures: &mut Vec<SecondaryExposure>,
    ) -> ConditionOutcome {
        let value: Option<Value> = match condition.kind {
            ConditionKind::Public => return ConditionOutcome::matched(true),

            ConditionKind::PassGate | ConditionKind::FailGate => {
                let Some(gate_name) = condition.target_value.as_str() else {
                    return ConditionOutcome::unsupported();
                };
                let passed = self.eval_nested_gate(user, gate_name, depth, exposures);
                let want_pass = condition.kind == ConditionKind::PassGate;
                return ConditionOutcome::matched(passed == want_pass);
            }

            ConditionKind::MultiPassGate | ConditionKind::MultiFailGate => {
                let Some(gate_names) = condition.target_value.as_array() else {
                    return ConditionOutcome::unsupported();
                };
                let want_pass = condition.kind == ConditionKind::MultiPassGate;
                for name in gate_names {
                    let Some(gate_name) = name.as_str() else {
                        continue;
                    };
                    let passed = self.eval_nested_gate(user, gate_name, depth, exposures);
                    if passed == want_pass {
                        return ConditionOutcome::matched(true);
                    }
                }
                return ConditionOutcome::matched(false);
            }

            ConditionKind::IpBased => self
                .field_value(user, condition)
                .or_else(|| user.ip.clone().map(Value::String)),

            ConditionKind::UaBased => self
                .field_value(user, condition)
                .or_else(|| user.user_agent.clone().map(Value::String)),

            ConditionKind::UserField | ConditionKind::CurrencyCode => {
                self.field_value(user, condition)
            }

            ConditionKind::EnvironmentField => condition
                .field
                .as_deref()
                .and_then(|field| user.get_environment_field(field))
                .map(|value| Value::String(value.to_string())),

            ConditionKind::UserBucket => {
                let salt = condition
                    .additional_values
                    .get("salt")
                    .and_then(Value::as_str)
                    .unwrap_or(&spec.salt);
                let unit_id = user.get_unit_id(&condition.id_type).unwrap_or("");
                Some(Value::from(hashing::user_bucket(salt, unit_id)))
            }

            ConditionKind::UnitId => user
                .get_unit_id(&condition.id_type)
                .map(|id| Value::String(id.to_string())),

            ConditionKind::Unknown => {
                log::warn!(target: "statsig", "fetched condition with unrecognized type; evaluating as non-match");
                return ConditionOutcome::unsupported();
            }
        };

        let Some(operator) = condition.operator.as_deref() else {
            log::warn!(target: "statsig", "condition is missing an operator; evaluating as non-match");
            return ConditionOutcome::unsupported();
        };

        let outcome = match operator {
            "in_segment_list" => Some(self.in_segment_list(value.as_ref(), &condition.target_value)),
            "not_in_segment_list" => {
                Some(!self.in_segment_list(value.as_ref(), &condition.target_value))
            }
            _ => operators::apply(operator, value.as_ref(), &condition.target_value),
        };

        match outcome {
            Some(matched) => ConditionOutcome::matched(matched),
            None => {
                log::warn!(target: "statsig",
                    "fetched condition with unrecognized operator {operator:?}; evaluating as non-match");
                ConditionOutcome::unsupported()
            }
        }
    }

    fn field_value(&self, user: &StatsigUser, condition: &Condition) -> Option<Value> {
        condition
            .field
            .as_deref()
            .and_then(|field| user.get_user_value(field))
    }

    /// Evaluate a nested gate reference and record its exposure.
    ///
    /// Depth is bounded rather than pre-detecting cycles at ingestion; past the bound the
    /// reference evaluates as a failing gate.
    fn eval_nested_gate(
        &self,
        user: &StatsigUser,
        gate_name: &str,
        depth: usize,
        exposures: &mut Vec<SecondaryExposure>,
    ) -> bool {
        if depth >= MAX_GATE_RECURSION_DEPTH {
            DEPTH_WARNING.call_once(|| {
                log::warn!(target: "statsig",
                    "gate references exceed depth limit {MAX_GATE_RECURSION_DEPTH}; possible cycle, evaluating as non-match");
            });
            return false;
        }

        let result = match self.snapshot.gates.get(gate_name) {
            Some(spec) => self.eval_spec(user, spec, depth + 1),
            None => Evaluation::unrecognized(Value::Bool(false)),
        };

        exposures.extend(result.secondary_exposures.iter().cloned());
        exposures.push(SecondaryExposure {
            gate: gate_name.to_string(),
            gate_value: result.bool_value().to_string(),
            rule_id: result.rule_id.clone(),
        });
        result.bool_value()
    }

    fn in_segment_list(&self, value: Option<&Value>, target: &Value) -> bool {
        let Some(list_name) = target.as_str() else {
            return false;
        };
        let Some(unit_id) = value.and_then(Value::as_str) else {
            return false;
        };
        self.store
            .id_list_contains(list_name, &hashing::segment_list_token(unit_id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::{Evaluator, MAX_GATE_RECURSION_DEPTH};
    use crate::id_lists::IdList;
    use crate::spec_store::{SpecStore, SpecStoreConfig};
    use crate::specs_fetcher::{IdListChunk, SpecsFetcher};
    use crate::user::StatsigUser;
    use crate::{Error, Result};

    struct NoopFetcher;

    #[async_trait::async_trait]
    impl SpecsFetcher for NoopFetcher {
        async fn download_config_specs(&self, _since_time: u64) -> Result<String> {
            Err(Error::LocalModeNetwork)
        }
        async fn get_id_lists(&self) -> Result<String> {
            Err(Error::LocalModeNetwork)
        }
        async fn get_id_list_changes(&self, _url: &str, _read_bytes: u64) -> Result<IdListChunk> {
            Err(Error::LocalModeNetwork)
        }
    }

    fn make_store(
        gates: Vec<Value>,
        configs: Vec<Value>,
        layers: Vec<Value>,
    ) -> Arc<SpecStore> {
        let payload = json!({
            "has_updates": true,
            "time": 1631638014811u64,
            "feature_gates": gates,
            "dynamic_configs": configs,
            "layer_configs": layers,
            "layers": {},
            "sdk_keys_to_app_ids": {},
        });
        let store = Arc::new(SpecStore::new(
            Arc::new(NoopFetcher),
            None,
            SpecStoreConfig::new(),
        ));
        store
            .process_specs_payload(&payload.to_string())
            .expect("payload should apply");
        store
    }

    fn email_gate(enabled: bool) -> Value {
        json!({
            "name": "nfl",
            "type": "feature_gate",
            "salt": "na",
            "enabled": enabled,
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
        })
    }

    fn user_with_email(email: &str) -> StatsigUser {
        StatsigUser {
            email: Some(email.to_string()),
            ..StatsigUser::default()
        }
    }

    #[test]
    fn gate_passes_by_matching_rule() {
        let _ = env_logger::builder().is_test(true).try_init();

        let store = make_store(vec![email_gate(true)], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&user_with_email("tore@packers.com"), "nfl");
        assert_eq!(result.value, json!(true));
        assert_eq!(result.rule_id, "rule_id_gate");

        let result = evaluator.check_gate(&StatsigUser::default(), "nfl");
        assert_eq!(result.value, json!(false));
        assert_eq!(result.rule_id, "default");
    }

    #[test]
    fn disabled_gate_returns_default_with_disabled_rule() {
        let store = make_store(vec![email_gate(false)], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&user_with_email("tore@packers.com"), "nfl");
        assert_eq!(result.value, json!(false));
        assert_eq!(result.rule_id, "disabled");
    }

    #[test]
    fn unknown_gate_fails_closed() {
        let store = make_store(vec![], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&StatsigUser::with_user_id("u"), "missing");
        assert!(!result.bool_value());
        assert_eq!(result.rule_id, "");
    }

    #[test]
    fn dynamic_config_with_public_fallback() {
        let config = json!({
            "name": "teams",
            "type": "dynamic_config",
            "salt": "config_salt",
            "enabled": true,
            "defaultValue": {"seed": 0},
            "rules": [
                {
                    "id": "rule_id_config",
                    "passPercentage": 100,
                    "conditions": [{
                        "type": "user_field",
                        "field": "level",
                        "operator": "gte",
                        "targetValue": 9
                    }],
                    "returnValue": {"tier": "pro"}
                },
                {
                    "id": "rule_id_config_public",
                    "passPercentage": 100,
                    "conditions": [{"type": "public"}],
                    "returnValue": {}
                }
            ]
        });
        let store = make_store(vec![], vec![config], vec![]);
        let evaluator = Evaluator::new(&store);

        let power_user = StatsigUser {
            user_id: Some("jkw".to_string()),
            custom: Some(HashMap::from([("level".to_string(), json!(10))])),
            ..StatsigUser::default()
        };
        let result = evaluator.get_config(&power_user, "teams");
        assert_eq!(result.value, json!({"tier": "pro"}));
        assert_eq!(result.rule_id, "rule_id_config");

        let casual_user = StatsigUser {
            custom: Some(HashMap::from([("level".to_string(), json!(5))])),
            ..StatsigUser::default()
        };
        let result = evaluator.get_config(&casual_user, "teams");
        assert_eq!(result.value, json!({}));
        assert_eq!(result.rule_id, "rule_id_config_public");
    }

    #[test]
    fn failed_bucketing_keeps_the_rule_id() {
        // The first fully-matching rule decides even when bucketing fails; later rules are
        // not consulted.
        let gate = json!({
            "name": "rollout",
            "type": "feature_gate",
            "salt": "rollout_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [
                {
                    "id": "zero_percent",
                    "passPercentage": 0,
                    "conditions": [{"type": "public"}],
                    "returnValue": true
                },
                {
                    "id": "everyone",
                    "passPercentage": 100,
                    "conditions": [{"type": "public"}],
                    "returnValue": true
                }
            ]
        });
        let store = make_store(vec![gate], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&StatsigUser::with_user_id("u"), "rollout");
        assert_eq!(result.value, json!(false));
        assert_eq!(result.rule_id, "zero_percent");
    }

    #[test]
    fn nested_gate_records_secondary_exposures() {
        let child = json!({
            "name": "child",
            "type": "feature_gate",
            "salt": "child_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "child_rule",
                "passPercentage": 100,
                "conditions": [{"type": "public"}],
                "returnValue": true
            }]
        });
        let parent = json!({
            "name": "parent",
            "type": "feature_gate",
            "salt": "parent_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "parent_rule",
                "passPercentage": 100,
                "conditions": [{"type": "pass_gate", "targetValue": "child"}],
                "returnValue": true
            }]
        });
        let store = make_store(vec![child, parent], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&StatsigUser::with_user_id("u"), "parent");
        assert!(result.bool_value());
        assert_eq!(result.secondary_exposures.len(), 1);
        assert_eq!(result.secondary_exposures[0].gate, "child");
        assert_eq!(result.secondary_exposures[0].gate_value, "true");
        assert_eq!(result.secondary_exposures[0].rule_id, "child_rule");
    }

    #[test]
    fn fail_gate_inverts_the_nested_result() {
        let child = json!({
            "name": "child",
            "type": "feature_gate",
            "salt": "child_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "child_rule",
                "passPercentage": 100,
                "conditions": [{"type": "public"}],
                "returnValue": true
            }]
        });
        let parent = json!({
            "name": "parent",
            "type": "feature_gate",
            "salt": "parent_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "parent_rule",
                "passPercentage": 100,
                "conditions": [{"type": "fail_gate", "targetValue": "child"}],
                "returnValue": true
            }]
        });
        let store = make_store(vec![child, parent], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&StatsigUser::with_user_id("u"), "parent");
        assert!(!result.bool_value());
        assert_eq!(result.rule_id, "default");
    }

    #[test]
    fn cyclic_gate_references_evaluate_as_non_match() {
        let gate_a = json!({
            "name": "gate_a",
            "type": "feature_gate",
            "salt": "a_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "a_rule",
                "passPercentage": 100,
                "conditions": [{"type": "pass_gate", "targetValue": "gate_b"}],
                "returnValue": true
            }]
        });
        let gate_b = json!({
            "name": "gate_b",
            "type": "feature_gate",
            "salt": "b_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "b_rule",
                "passPercentage": 100,
                "conditions": [{"type": "pass_gate", "targetValue": "gate_a"}],
                "returnValue": true
            }]
        });
        let store = make_store(vec![gate_a, gate_b], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&StatsigUser::with_user_id("u"), "gate_a");
        assert!(!result.bool_value());
        assert_eq!(result.rule_id, "default");
        // Bounded by the depth limit, not the stack.
        assert!(result.secondary_exposures.len() <= MAX_GATE_RECURSION_DEPTH + 1);
    }

    #[test]
    fn user_bucket_condition() {
        // user_bucket("bucket_salt", "user-7") == 994.
        let gate = |target: u64| {
            json!({
                "name": "bucketed",
                "type": "feature_gate",
                "salt": "gate_salt",
                "enabled": true,
                "defaultValue": false,
                "rules": [{
                    "id": "bucket_rule",
                    "passPercentage": 100,
                    "conditions": [{
                        "type": "user_bucket",
                        "operator": "lt",
                        "targetValue": target,
                        "additionalValues": {"salt": "bucket_salt"}
                    }],
                    "returnValue": true
                }]
            })
        };
        let user = StatsigUser::with_user_id("user-7");

        let store = make_store(vec![gate(995)], vec![], vec![]);
        assert!(Evaluator::new(&store).check_gate(&user, "bucketed").bool_value());

        let store = make_store(vec![gate(994)], vec![], vec![]);
        assert!(!Evaluator::new(&store).check_gate(&user, "bucketed").bool_value());
    }

    #[test]
    fn segment_list_membership() {
        let gate = json!({
            "name": "employees_only",
            "type": "feature_gate",
            "salt": "seg_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "segment_rule",
                "passPercentage": 100,
                "conditions": [{
                    "type": "unit_id",
                    "idType": "userID",
                    "operator": "in_segment_list",
                    "targetValue": "employees"
                }],
                "returnValue": true
            }]
        });
        let store = make_store(vec![gate], vec![], vec![]);
        // base64(sha256("marcos"))[..8]
        let mut list = IdList::default();
        list.ids.insert("Q/Hv7NMw".to_string());
        store.replace_id_lists(HashMap::from([("employees".to_string(), list)]));
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&StatsigUser::with_user_id("marcos"), "employees_only");
        assert!(result.bool_value());

        let result = evaluator.check_gate(&StatsigUser::with_user_id("stranger"), "employees_only");
        assert!(!result.bool_value());

        // A list that disappeared means "not a member".
        store.replace_id_lists(HashMap::new());
        let evaluator = Evaluator::new(&store);
        let result = evaluator.check_gate(&StatsigUser::with_user_id("marcos"), "employees_only");
        assert!(!result.bool_value());
    }

    #[test]
    fn environment_field_condition() {
        let gate = json!({
            "name": "staging_only",
            "type": "feature_gate",
            "salt": "env_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "env_rule",
                "passPercentage": 100,
                "conditions": [{
                    "type": "environment_field",
                    "field": "tier",
                    "operator": "any",
                    "targetValue": ["staging"]
                }],
                "returnValue": true
            }]
        });
        let store = make_store(vec![gate], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let staging_user = StatsigUser {
            user_id: Some("u".to_string()),
            statsig_environment: Some(HashMap::from([(
                "tier".to_string(),
                "staging".to_string(),
            )])),
            ..StatsigUser::default()
        };
        assert!(evaluator.check_gate(&staging_user, "staging_only").bool_value());
        assert!(!evaluator
            .check_gate(&StatsigUser::with_user_id("u"), "staging_only")
            .bool_value());
    }

    #[test]
    fn ip_based_condition_falls_back_to_the_ip_field() {
        let gate = json!({
            "name": "office",
            "type": "feature_gate",
            "salt": "ip_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [{
                "id": "ip_rule",
                "passPercentage": 100,
                "conditions": [{
                    "type": "ip_based",
                    "field": "ip",
                    "operator": "any",
                    "targetValue": ["10.0.0.1"]
                }],
                "returnValue": true
            }]
        });
        let store = make_store(vec![gate], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let user = StatsigUser {
            ip: Some("10.0.0.1".to_string()),
            ..StatsigUser::default()
        };
        assert!(evaluator.check_gate(&user, "office").bool_value());
    }

    #[test]
    fn unknown_condition_and_operator_fail_closed() {
        let gate = json!({
            "name": "future",
            "type": "feature_gate",
            "salt": "f_salt",
            "enabled": true,
            "defaultValue": false,
            "rules": [
                {
                    "id": "new_type",
                    "passPercentage": 100,
                    "conditions": [{"type": "quantum_entanglement", "targetValue": 1}],
                    "returnValue": true
                },
                {
                    "id": "new_operator",
                    "passPercentage": 100,
                    "conditions": [{
                        "type": "user_field",
                        "field": "email",
                        "operator": "telepathy",
                        "targetValue": "x"
                    }],
                    "returnValue": true
                }
            ]
        });
        let store = make_store(vec![gate], vec![], vec![]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.check_gate(&user_with_email("a@b.com"), "future");
        assert!(!result.bool_value());
        assert_eq!(result.rule_id, "default");
        assert!(result.unsupported);
    }

    #[test]
    fn layer_delegates_to_the_experiment() {
        let experiment = json!({
            "name": "exp_a",
            "type": "dynamic_config",
            "salt": "exp_salt",
            "enabled": true,
            "entity": "experiment",
            "isActive": true,
            "defaultValue": {"title": "exp control"},
            "rules": [{
                "id": "exp_rule",
                "passPercentage": 100,
                "groupName": "Test",
                "isExperimentGroup": true,
                "conditions": [{"type": "public"}],
                "returnValue": {"title": "treatment"}
            }]
        });
        let layer = json!({
            "name": "homepage",
            "type": "layer",
            "salt": "layer_salt",
            "enabled": true,
            "defaultValue": {"title": "control"},
            "explicitParameters": ["title"],
            "rules": [{
                "id": "layer_rule",
                "passPercentage": 100,
                "conditions": [{"type": "public"}],
                "returnValue": {"title": "layer rule"},
                "configDelegate": "exp_a"
            }]
        });
        let store = make_store(vec![], vec![experiment], vec![layer]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.get_layer(&StatsigUser::with_user_id("u"), "homepage");
        assert_eq!(result.value, json!({"title": "treatment"}));
        assert_eq!(result.rule_id, "exp_rule");
        assert_eq!(result.group_name.as_deref(), Some("Test"));
        assert_eq!(result.config_delegate.as_deref(), Some("exp_a"));
        assert_eq!(
            result.explicit_parameters,
            Some(vec!["title".to_string()])
        );
        assert!(result.is_experiment_active);
        assert!(result.is_experiment_group);
        assert_eq!(result.undelegated_secondary_exposures, Some(vec![]));
    }

    #[test]
    fn layer_rule_without_delegate_returns_its_own_value() {
        let layer = json!({
            "name": "plain",
            "type": "layer",
            "salt": "layer_salt",
            "enabled": true,
            "defaultValue": {"title": "control"},
            "rules": [{
                "id": "layer_rule",
                "passPercentage": 100,
                "conditions": [{"type": "public"}],
                "returnValue": {"title": "layer rule"}
            }]
        });
        let store = make_store(vec![], vec![], vec![layer]);
        let evaluator = Evaluator::new(&store);

        let result = evaluator.get_layer(&StatsigUser::with_user_id("u"), "plain");
        assert_eq!(result.value, json!({"title": "layer rule"}));
        assert_eq!(result.rule_id, "layer_rule");
        assert!(result.config_delegate.is_none());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let store = make_store(vec![email_gate(true)], vec![], vec![]);
        let evaluator = Evaluator::new(&store);
        let user = user_with_email("tore@packers.com");

        let first = evaluator.check_gate(&user, "nfl");
        let second = evaluator.check_gate(&user, "nfl");
        assert_eq!(first, second);
    }
}
