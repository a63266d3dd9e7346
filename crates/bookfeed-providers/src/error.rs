//! Error type shared by page fetchers and configuration providers.
//!
//! A [`ProviderError`] carries a coarse [`ProviderErrorCode`] to branch on, a
//! message for logs and, when known, the name of the provider that failed.
//! None of it is meant for feed subscribers; the server replaces it with a
//! generic message.

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// What went wrong, coarsely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// 401/403 from the portal, browser service or config store.
    Rejected,
    NotFound,
    /// Our timeout fired, or the upstream reported one (408/504).
    Timeout,
    /// Connect, DNS or TLS failure.
    Network,
    /// Any other non-success status.
    Upstream,
    /// Body unreadable or not in the expected shape.
    InvalidResponse,
    /// Missing or malformed configuration, unresolvable secret.
    Configuration,
}

impl ProviderErrorCode {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Rejected,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::Timeout,
            _ => Self::Upstream,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Upstream => "upstream",
            Self::InvalidResponse => "invalid_response",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    provider: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            source: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Network, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Upstream, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Configuration, message)
    }

    /// Error for a non-success response. `detail` is a body excerpt, if any.
    pub fn from_status(status: StatusCode, detail: &str) -> Self {
        let detail = detail.trim();
        let message = if detail.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, truncate(detail, 200))
        };
        Self::new(ProviderErrorCode::from_status(status), message)
    }

    /// Maps a `reqwest` transport error, keeping it as the source.
    pub fn from_request(context: &str, err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ProviderErrorCode::Timeout
        } else if err.is_decode() || err.is_body() {
            ProviderErrorCode::InvalidResponse
        } else {
            ProviderErrorCode::Network
        };
        Self::new(code, format!("{}: {}", context, err)).with_source(err)
    }

    /// Builder: name of the failing provider ("direct", "browser", "file", ...).
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(ref provider) => write!(f, "{} ({}): {}", provider, self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
