//! Error boundary around SDK entry points.
//!
//! The boundary keeps unexpected failures from reaching callers: work that fails is recovered
//! to a caller-supplied fallback, and the failure is reported to the exception endpoint at
//! most once per error name (or explicit key) for the process lifetime. A small set of error
//! kinds is exempt: caller mistakes propagate unchanged, and local-mode network errors are
//! recovered without any telemetry.
use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;

use crate::{Error, Result, SdkMetadata};

pub const DEFAULT_EXCEPTION_ENDPOINT: &str = "https://statsigapi.net/v1/sdk_exception";

pub struct ErrorBoundary {
    api_key: String,
    sdk_metadata: SdkMetadata,
    endpoint: String,
    client: reqwest::Client,
    seen: Mutex<HashSet<String>>,
}

impl ErrorBoundary {
    pub fn new(api_key: impl Into<String>, sdk_metadata: SdkMetadata) -> ErrorBoundary {
        ErrorBoundary {
            api_key: api_key.into(),
            sdk_metadata,
            endpoint: DEFAULT_EXCEPTION_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Override the exception endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> ErrorBoundary {
        self.endpoint = endpoint.into();
        self
    }

    /// Run `work`; on failure, report the error (once per kind) and recover with `recover`.
    ///
    /// `Uninitialized`, `InvalidArgument` and `TooManyRequests` are returned to the caller
    /// unchanged. `LocalModeNetwork` recovers silently.
    pub async fn capture<T, Fut, R>(&self, work: Fut, recover: R) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
        R: FnOnce(&Error) -> T,
    {
        match work.await {
            Ok(value) => Ok(value),
            Err(err) if err.propagates() => Err(err),
            Err(err) if err.is_silent() => Ok(recover(&err)),
            Err(err) => {
                self.log_exception(None, &err).await;
                Ok(recover(&err))
            }
        }
    }

    /// Report `error` to the exception endpoint. Returns `false` if this error key was
    /// already reported. Transport failures are swallowed.
    pub async fn log_exception(&self, key: Option<&str>, error: &Error) -> bool {
        let dedupe_key = key.unwrap_or_else(|| error.name());
        {
            let mut seen = self
                .seen
                .lock()
                .expect("thread holding exception dedup lock should not panic");
            if !seen.insert(dedupe_key.to_string()) {
                return false;
            }
        }

        log::warn!(target: "statsig", "captured unexpected error: {error}");

        let body = serde_json::json!({
            "exception": error.name(),
            "info": error.to_string(),
            "statsigMetadata": {
                "sdkType": self.sdk_metadata.sdk_type,
                "sdkVersion": self.sdk_metadata.sdk_version,
            },
        });
        let result = self
            .client
            .post(&self.endpoint)
            .header("STATSIG-API-KEY", &self.api_key)
            .header("STATSIG-SDK-TYPE", self.sdk_metadata.sdk_type)
            .header("STATSIG-SDK-VERSION", self.sdk_metadata.sdk_version)
            .json(&body)
            .send()
            .await;
        if let Err(err) = result {
            log::debug!(target: "statsig", "failed to report exception to the server: {err}");
        }
        true
    }
}
