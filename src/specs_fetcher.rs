//! An HTTP client that fetches config specs and ID lists from the server.
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{header, StatusCode, Url};

use crate::{Error, Result, SdkMetadata};

/// One ranged ID-list response: the raw body plus the `Content-Length` the server reported.
/// A missing or malformed `Content-Length` is surfaced as `None`; the store invalidates the
/// list in that case.
#[derive(Debug, Clone)]
pub struct IdListChunk {
    pub body: String,
    pub content_length: Option<u64>,
}

/// Network collaborator of the spec store.
#[async_trait]
pub trait SpecsFetcher: Send + Sync {
    /// Fetch the config-specs payload with updates since `since_time`.
    async fn download_config_specs(&self, since_time: u64) -> Result<String>;

    /// Fetch the ID-list lookup table.
    async fn get_id_lists(&self) -> Result<String>;

    /// Ranged GET of one ID list's body starting at byte `read_bytes`.
    async fn get_id_list_changes(&self, url: &str, read_bytes: u64) -> Result<IdListChunk>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecsFetcherConfig {
    pub api_url: String,
    pub api_key: String,
    /// In local mode all network calls short-circuit with [`Error::LocalModeNetwork`].
    pub local_mode: bool,
    pub sdk_metadata: SdkMetadata,
}

pub const DEFAULT_API_URL: &str = "https://statsigapi.net/v1";

const CONFIG_SPECS_ENDPOINT: &str = "/download_config_specs";
const ID_LISTS_ENDPOINT: &str = "/get_id_lists";

/// The default [`SpecsFetcher`] implementation.
pub struct HttpSpecsFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: SpecsFetcherConfig,
    /// If we receive a 401 Unauthorized error during a request, it means the API key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: AtomicBool,
}

impl HttpSpecsFetcher {
    pub fn new(config: SpecsFetcherConfig) -> HttpSpecsFetcher {
        let client = reqwest::Client::new();

        HttpSpecsFetcher {
            client,
            config,
            unauthorized: AtomicBool::new(false),
        }
    }

    fn check_network_allowed(&self) -> Result<()> {
        if self.config.local_mode {
            return Err(Error::LocalModeNetwork);
        }
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    fn sdk_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("STATSIG-API-KEY", &self.config.api_key)
            .header("STATSIG-SDK-TYPE", self.config.sdk_metadata.sdk_type)
            .header("STATSIG-SDK-VERSION", self.config.sdk_metadata.sdk_version)
    }

    fn map_status_error(&self, err: reqwest::Error) -> Error {
        match err.status() {
            Some(StatusCode::UNAUTHORIZED) => {
                log::warn!(target: "statsig", "client is not authorized. Check your API key");
                self.unauthorized.store(true, Ordering::Relaxed);
                Error::Unauthorized
            }
            Some(StatusCode::TOO_MANY_REQUESTS) => Error::TooManyRequests,
            _ => {
                log::warn!(target: "statsig", "received non-200 response from the server: {err:?}");
                Error::from(err)
            }
        }
    }
}

#[async_trait]
impl SpecsFetcher for HttpSpecsFetcher {
    async fn download_config_specs(&self, since_time: u64) -> Result<String> {
        self.check_network_allowed()?;

        let url = Url::parse_with_params(
            &format!(
                "{}{}/{}.json",
                self.config.api_url, CONFIG_SPECS_ENDPOINT, self.config.api_key
            ),
            &[("sinceTime", since_time.to_string())],
        )
        .map_err(Error::InvalidBaseUrl)?;

        log::debug!(target: "statsig", "fetching config specs since {since_time}");
        let response = self.sdk_headers(self.client.get(url)).send().await?;
        let response = response
            .error_for_status()
            .map_err(|err| self.map_status_error(err))?;

        let body = response.text().await?;
        log::debug!(target: "statsig", "successfully fetched config specs");
        Ok(body)
    }

    async fn get_id_lists(&self) -> Result<String> {
        self.check_network_allowed()?;

        let url = Url::parse(&format!("{}{}", self.config.api_url, ID_LISTS_ENDPOINT))
            .map_err(Error::InvalidBaseUrl)?;

        log::debug!(target: "statsig", "fetching ID list lookup");
        let response = self
            .sdk_headers(self.client.post(url))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let response = response
            .error_for_status()
            .map_err(|err| self.map_status_error(err))?;

        let body = response.text().await?;
        log::debug!(target: "statsig", "successfully fetched ID list lookup");
        Ok(body)
    }

    async fn get_id_list_changes(&self, url: &str, read_bytes: u64) -> Result<IdListChunk> {
        self.check_network_allowed()?;

        log::debug!(target: "statsig", "fetching ID list bytes from offset {read_bytes}");
        let response = self
            .client
            .get(url)
            .header(header::RANGE, format!("bytes={read_bytes}-"))
            .send()
            .await?;
        let response = response
            .error_for_status()
            .map_err(|err| self.map_status_error(err))?;

        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let body = response.text().await?;

        Ok(IdListChunk {
            body,
            content_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(local_mode: bool) -> HttpSpecsFetcher {
        HttpSpecsFetcher::new(SpecsFetcherConfig {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: "secret-key".to_string(),
            local_mode,
            sdk_metadata: SdkMetadata {
                sdk_type: "statsig-core-test",
                sdk_version: "0.0.0",
            },
        })
    }

    #[tokio::test]
    async fn local_mode_short_circuits_all_requests() {
        let fetcher = fetcher(true);
        assert!(matches!(
            fetcher.download_config_specs(0).await,
            Err(Error::LocalModeNetwork)
        ));
        assert!(matches!(
            fetcher.get_id_lists().await,
            Err(Error::LocalModeNetwork)
        ));
        assert!(matches!(
            fetcher.get_id_list_changes("https://example.com/list_1", 0).await,
            Err(Error::LocalModeNetwork)
        ));
    }

    #[tokio::test]
    async fn cached_unauthorized_skips_the_network() {
        let fetcher = fetcher(false);
        fetcher.unauthorized.store(true, Ordering::Relaxed);
        assert!(matches!(
            fetcher.download_config_specs(0).await,
            Err(Error::Unauthorized)
        ));
    }
}
