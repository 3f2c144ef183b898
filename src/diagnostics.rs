//! Diagnostics marker emission.
//!
//! The core only emits markers; sampling and transport are the observer's concern.
use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Upper bound for server-provided diagnostics sampling rates.
pub const MAX_SAMPLING_RATE: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKey {
    Overall,
    DownloadConfigSpecs,
    GetIdLists,
    Bootstrap,
    DataStoreConfigSpecs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerAction {
    Start,
    End,
}

/// A single timing/outcome marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub key: MarkerKey,
    pub action: MarkerAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub timestamp: i64,
}

impl Marker {
    pub fn start(key: MarkerKey) -> Marker {
        Marker {
            key,
            action: MarkerAction::Start,
            success: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn end(key: MarkerKey, success: bool) -> Marker {
        Marker {
            key,
            action: MarkerAction::End,
            success: Some(success),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Sink for markers. Implemented by the diagnostics collaborator outside this crate.
pub trait MarkerObserver: Send + Sync {
    fn mark(&self, marker: Marker);
}

/// Default observer that drops all markers.
pub struct NoopMarkerObserver;

impl MarkerObserver for NoopMarkerObserver {
    fn mark(&self, _marker: Marker) {}
}

/// Extract sampling rates from the server's `diagnostics` map. Non-numeric values are
/// ignored; numeric values are clamped to `[0, MAX_SAMPLING_RATE]`.
pub(crate) fn clamp_sampling_rates(raw: &HashMap<String, Value>) -> HashMap<String, u64> {
    raw.iter()
        .filter_map(|(key, value)| {
            let rate = value.as_f64()?;
            let clamped = rate.clamp(0.0, MAX_SAMPLING_RATE as f64) as u64;
            Some((key.clone(), clamped))
        })
        .collect()
}
