//! User context for evaluation.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `StatsigUser` is the unit of evaluation: a bag of well-known fields plus free-form custom
/// attributes.
///
/// Field lookup is case-insensitive and `private_attributes` win over everything else, so a
/// server can target on attributes that are never logged upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsigUser {
    #[serde(rename = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_attributes: Option<HashMap<String, Value>>,
    #[serde(rename = "customIDs", skip_serializing_if = "Option::is_none")]
    pub custom_ids: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statsig_environment: Option<HashMap<String, String>>,
}

impl StatsigUser {
    /// Create a user with just a `userID`.
    pub fn with_user_id(user_id: impl Into<String>) -> StatsigUser {
        StatsigUser {
            user_id: Some(user_id.into()),
            ..StatsigUser::default()
        }
    }

    /// Look up a targeting field on the user.
    ///
    /// Precedence: `private_attributes`, then the well-known top-level fields, then `custom`.
    /// Matching is ASCII case-insensitive throughout.
    pub fn get_user_value(&self, field: &str) -> Option<Value> {
        if let Some(private) = &self.private_attributes {
            if let Some(value) = lookup_insensitive(private, field) {
                return Some(value.clone());
            }
        }

        let top_level = match field.to_ascii_lowercase().as_str() {
            "userid" | "user_id" => &self.user_id,
            "email" => &self.email,
            "ip" | "ip_address" | "ipaddress" => &self.ip,
            "useragent" | "user_agent" => &self.user_agent,
            "country" => &self.country,
            "locale" => &self.locale,
            "appversion" | "app_version" => &self.app_version,
            _ => &None,
        };
        if let Some(value) = top_level {
            return Some(Value::String(value.clone()));
        }

        if let Some(custom) = &self.custom {
            if let Some(value) = lookup_insensitive(custom, field) {
                return Some(value.clone());
            }
        }

        None
    }

    /// Resolve the unit of randomization for `id_type`. `userID` reads the top-level user ID;
    /// anything else reads `custom_ids`.
    pub fn get_unit_id(&self, id_type: &str) -> Option<&str> {
        if id_type.eq_ignore_ascii_case("userid") {
            return self.user_id.as_deref();
        }

        let custom_ids = self.custom_ids.as_ref()?;
        if let Some(id) = custom_ids.get(id_type) {
            return Some(id.as_str());
        }
        custom_ids
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(id_type))
            .map(|(_, id)| id.as_str())
    }

    /// Look up a field of the SDK environment attached to this user (e.g. `tier`).
    pub fn get_environment_field(&self, field: &str) -> Option<&str> {
        let environment = self.statsig_environment.as_ref()?;
        if let Some(value) = environment.get(field) {
            return Some(value.as_str());
        }
        environment
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, value)| value.as_str())
    }
}

fn lookup_insensitive<'a>(map: &'a HashMap<String, Value>, field: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(field) {
        return Some(value);
    }
    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(field))
        .map(|(_, value)| value)
}
