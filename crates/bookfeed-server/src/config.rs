//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bookfeed_providers::{
    ConfigProvider, DEFAULT_FETCH_TIMEOUT, FetcherSelector, FileConfigProvider,
    RemoteConfigProvider,
};
use tracing::debug;

use crate::error::{ServerError, ServerResult};

/// Address used when none is given.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen: SocketAddr,

    /// Path to `booking.toml`; defaults to the user config directory.
    pub config_path: Option<PathBuf>,

    /// Key-value store holding the booking configuration. Wins over the file.
    pub remote_config_url: Option<String>,

    /// Bearer token for the store.
    pub remote_config_token: Option<String>,

    /// Upper bound on a single page load.
    pub fetch_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            config_path: None,
            remote_config_url: None,
            remote_config_token: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration listening on `listen`.
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            ..Default::default()
        }
    }

    /// Builder: set the booking config file.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Builder: read the booking config from a remote store.
    pub fn with_remote_config(mut self, url: impl Into<String>, token: Option<String>) -> Self {
        self.remote_config_url = Some(url.into());
        self.remote_config_token = token;
        self
    }

    /// Builder: set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Builds the configuration provider: remote store if set, file otherwise.
    pub fn config_provider(&self) -> ServerResult<Arc<dyn ConfigProvider>> {
        if let Some(ref url) = self.remote_config_url {
            let mut provider = RemoteConfigProvider::new(url, self.fetch_timeout)?;
            if let Some(ref token) = self.remote_config_token {
                provider = provider.with_token(token);
            }
            debug!(url = %url, "Using remote configuration");
            return Ok(Arc::new(provider));
        }

        let path = self
            .config_path
            .clone()
            .or_else(FileConfigProvider::default_path)
            .ok_or_else(|| {
                ServerError::config("no config path given and no user config directory")
            })?;
        debug!(path = %path.display(), "Using configuration file");
        Ok(Arc::new(FileConfigProvider::new(path)))
    }

    /// Builds the fetcher selector; the fetcher itself is picked per request
    /// from the booking configuration.
    pub fn fetcher_selector(&self) -> FetcherSelector {
        FetcherSelector::new(self.fetch_timeout)
    }
}
