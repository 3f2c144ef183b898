use std::sync::Arc;

/// Represents a result type for operations in the Statsig SDK core.
///
/// This type alias is used throughout the crate to indicate the result of operations that may
/// return errors specific to the SDK core.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the SDK core.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The SDK was used before initialization completed.
    #[error("SDK is not initialized")]
    Uninitialized,

    /// A caller-supplied argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server responded with 429.
    #[error("too many requests")]
    TooManyRequests,

    /// A network operation was attempted while the SDK runs in local mode.
    #[error("network request skipped in local mode")]
    LocalModeNetwork,

    /// The initial network sync failed. The store keeps serving whatever it has.
    #[error("failed to initialize from the network")]
    InitializeFromNetwork,

    /// ID list initialization failed.
    #[error("failed to initialize ID lists")]
    InitializeIdLists,

    /// Bootstrap values could not be parsed or applied.
    #[error("invalid bootstrap values")]
    InvalidBootstrapValues,

    /// The config specs payload was malformed.
    #[error("invalid config specs response: {0}")]
    InvalidConfigSpecsResponse(String),

    /// The ID lists lookup or a ranged list response was malformed.
    #[error("invalid ID lists response: {0}")]
    InvalidIdListsResponse(String),

    /// A data adapter returned values the store could not use.
    #[error("invalid data adapter values: {0}")]
    InvalidDataAdapterValues(String),

    /// One or both sync timers stopped ticking and were rescheduled by the watchdog.
    #[error("sync timers stalled and were reset: {0}")]
    StalledSyncTimer(String),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api key is likely invalid")]
    Unauthorized,

    /// Invalid base URL configuration.
    #[error("invalid api_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl Error {
    /// Stable name for this error, used as the deduplication key when reporting to the
    /// exception endpoint.
    pub fn name(&self) -> &'static str {
        match self {
            Error::Uninitialized => "Uninitialized",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::TooManyRequests => "TooManyRequests",
            Error::LocalModeNetwork => "LocalModeNetwork",
            Error::InitializeFromNetwork => "InitializeFromNetwork",
            Error::InitializeIdLists => "InitializeIdLists",
            Error::InvalidBootstrapValues => "InvalidBootstrapValues",
            Error::InvalidConfigSpecsResponse(_) => "InvalidConfigSpecsResponse",
            Error::InvalidIdListsResponse(_) => "InvalidIdListsResponse",
            Error::InvalidDataAdapterValues(_) => "InvalidDataAdapterValues",
            Error::StalledSyncTimer(_) => "StalledSyncTimer",
            Error::Unauthorized => "Unauthorized",
            Error::InvalidBaseUrl(_) => "InvalidBaseUrl",
            Error::Io(_) => "Io",
            Error::Network(_) => "Network",
        }
    }

    /// Return `true` if the error must be returned to the caller unchanged instead of being
    /// recovered by the error boundary.
    pub fn propagates(&self) -> bool {
        matches!(
            self,
            Error::Uninitialized | Error::InvalidArgument(_) | Error::TooManyRequests
        )
    }

    /// Return `true` if the error is a normal running condition that should be recovered
    /// without logging or telemetry.
    pub fn is_silent(&self) -> bool {
        matches!(self, Error::LocalModeNetwork)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
