//! Server error types.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bookfeed_core::EncodeError;
use bookfeed_providers::ProviderError;
use thiserror::Error;

use crate::access::AccessError;

/// Result type for server setup.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (bind, accept, ...).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Provider could not be built.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Tracing setup failed.
    #[error("Tracing error: {0}")]
    Tracing(#[from] bookfeed_core::TracingError),

    /// Invalid server configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Why a feed request could not be answered with a calendar.
#[derive(Debug, Error)]
pub enum FeedError {
    /// No configuration, no access token, or no booking URL.
    #[error("not configured")]
    NotConfigured,

    #[error("invalid token")]
    AccessDenied,

    /// The configuration provider itself failed.
    #[error("configuration unavailable: {0}")]
    Config(#[source] ProviderError),

    /// The page could not be fetched and nothing was cached.
    #[error("fetch failed: {0}")]
    Fetch(#[from] ProviderError),

    #[error("calendar encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

impl FeedError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConfigured | Self::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::AccessDenied => StatusCode::UNAUTHORIZED,
            Self::Fetch(_) | Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text sent to the client. Never includes upstream details.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not configured",
            Self::AccessDenied => "invalid token",
            Self::Config(_) => "configuration unavailable",
            Self::Fetch(_) | Self::Encode(_) => "calendar generation failed",
        }
    }
}

impl From<AccessError> for FeedError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotConfigured => Self::NotConfigured,
            AccessError::Denied => Self::AccessDenied,
        }
    }
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        (self.status_code(), self.public_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(FeedError::NotConfigured.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(FeedError::AccessDenied.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            FeedError::Fetch(ProviderError::network("down")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            FeedError::Config(ProviderError::configuration("bad toml")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn public_message_hides_details() {
        let err = FeedError::Fetch(ProviderError::upstream("secret upstream detail"));
        assert_eq!(err.public_message(), "calendar generation failed");
        assert!(err.to_string().contains("secret upstream detail"));
    }

    #[test]
    fn access_errors_map() {
        assert!(matches!(
            FeedError::from(AccessError::Denied),
            FeedError::AccessDenied
        ));
        assert!(matches!(
            FeedError::from(AccessError::NotConfigured),
            FeedError::NotConfigured
        ));
    }

    #[test]
    fn config_error_message() {
        let err = ServerError::config("bad listen address");
        assert_eq!(err.to_string(), "Configuration error: bad listen address");
    }
}
