use std::sync::Arc;

use reqwest::StatusCode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PrefetchError {
    /// The request was superseded or explicitly cancelled.
    #[error("prefetch cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("request failed with HTTP {status} for {url}")]
    Fetch { status: StatusCode, url: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("request timed out for {url}")]
    Timeout { url: String },

    #[error("playlist {url} is empty or not valid UTF-8")]
    EmptyDocument { url: String },

    #[error("playlist parse error: {reason}")]
    Parse { reason: String },

    #[error("cache error: {reason}")]
    Cache { reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl PrefetchError {
    pub fn invalid_url(input: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    pub fn fetch(status: StatusCode, url: impl Into<String>) -> Self {
        Self::Fetch {
            status,
            url: url.into(),
        }
    }

    pub fn empty_document(url: impl Into<String>) -> Self {
        Self::EmptyDocument { url: url.into() }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub fn cache(reason: impl Into<String>) -> Self {
        Self::Cache {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Maps a transport error, keeping timeouts distinguishable from other failures.
    pub fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_owned(),
            }
        } else {
            Self::Network {
                source: Arc::new(err),
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { source } => {
                source.is_connect() || source.is_request() || source.is_body()
            }
            Self::Timeout { .. } => true,
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::EmptyDocument { .. }
            | Self::Parse { .. }
            | Self::Cache { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => false,
        }
    }

    /// Short machine-readable code used on the event stream.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::InvalidUrl { .. } => "INVALID_URL",
            Self::Fetch { .. } | Self::Network { .. } | Self::Timeout { .. } => "FETCH_ERROR",
            Self::EmptyDocument { .. } => "EMPTY_DOCUMENT",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::Cache { .. } => "CACHE_ERROR",
            Self::Configuration { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
