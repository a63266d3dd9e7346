//! Booking configuration and where it comes from.
//!
//! The feed needs a handful of settings (portal URL, access token, time
//! zone, ...) that live outside the process. A [`ConfigProvider`] hands back a
//! [`BookingConfig`] snapshot on every request, or `None` when nothing has
//! been configured yet.
//!
//! Example `~/.config/bookfeed/booking.toml`:
//!
//! ```toml
//! username = "student@example.edu"
//! password = "pass::portal/booking"
//! booking_url = "https://portal.example.edu/appointments"
//! access_token = "env::BOOKFEED_ACCESS_TOKEN"
//! display_name = "Tutoring"
//! timezone = "America/New_York"
//! venue = "Learning Center"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::error::{ProviderError, ProviderResult};
use crate::fetch::{BoxFuture, Cookie, PageRequest, read_body};
use crate::secret;

/// Calendar name used when none is configured.
pub const DEFAULT_DISPLAY_NAME: &str = "Tutoring Appointments";

/// Zone assumed for the portal's wall-clock times.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Venue written into each event when none is configured.
pub const DEFAULT_VENUE: &str = "Learning Center";

fn default_display_name() -> String {
    DEFAULT_DISPLAY_NAME.to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_venue() -> String {
    DEFAULT_VENUE.to_string()
}

/// Settings for one booking portal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub booking_url: Option<String>,
    /// Shared secret callers must present to read the feed.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// IANA zone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_venue")]
    pub venue: String,
    /// Headless-browser service base URL.
    #[serde(default)]
    pub browser_endpoint: Option<String>,
    #[serde(default)]
    pub browser_token: Option<String>,
    /// `name=value` cookie forwarded with every page fetch.
    #[serde(default)]
    pub session_cookie: Option<String>,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            booking_url: None,
            access_token: None,
            display_name: default_display_name(),
            timezone: default_timezone(),
            venue: default_venue(),
            browser_endpoint: None,
            browser_token: None,
            session_cookie: None,
        }
    }
}

impl fmt::Debug for BookingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() { "<set>" } else { "<unset>" }
        }
        f.debug_struct("BookingConfig")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("booking_url", &self.booking_url)
            .field("access_token", &redact(&self.access_token))
            .field("display_name", &self.display_name)
            .field("timezone", &self.timezone)
            .field("venue", &self.venue)
            .field("browser_endpoint", &self.browser_endpoint)
            .field("browser_token", &redact(&self.browser_token))
            .field("session_cookie", &redact(&self.session_cookie))
            .finish()
    }
}

/// Which settings are present. Never carries the values themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConfigCompleteness {
    pub has_credentials: bool,
    pub has_booking_url: bool,
    pub has_access_token: bool,
    pub has_browser_endpoint: bool,
    pub has_session_cookie: bool,
}

impl ConfigCompleteness {
    /// True when the feed can be served: a page to scrape and a token to check.
    pub fn is_complete(&self) -> bool {
        self.has_booking_url && self.has_access_token
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl BookingConfig {
    /// Builder: portal URL.
    pub fn with_booking_url(mut self, url: impl Into<String>) -> Self {
        self.booking_url = Some(url.into());
        self
    }

    /// Builder: feed access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Builder: time zone name.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Builder: session cookie (`name=value`).
    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub fn completeness(&self) -> ConfigCompleteness {
        ConfigCompleteness {
            has_credentials: present(&self.username) && present(&self.password),
            has_booking_url: present(&self.booking_url),
            has_access_token: present(&self.access_token),
            has_browser_endpoint: present(&self.browser_endpoint),
            has_session_cookie: present(&self.session_cookie),
        }
    }

    /// The configured access token, if non-blank.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    /// Builds the page request for the booking page, if a URL is configured.
    pub fn page_request(&self) -> Option<PageRequest> {
        let url = self.booking_url.as_deref().filter(|u| !u.trim().is_empty())?;
        let mut request = PageRequest::new(url);
        if let Some(cookie) = self.session_cookie.as_deref().and_then(Cookie::parse) {
            request = request.with_cookie(cookie);
        }
        Some(request)
    }

    /// Replaces secret references (`env::`, `pass::`) with their values.
    pub fn resolve_secrets(mut self) -> ProviderResult<Self> {
        self.username = secret::resolve_optional(self.username.as_deref())?;
        self.password = secret::resolve_optional(self.password.as_deref())?;
        self.access_token = secret::resolve_optional(self.access_token.as_deref())?;
        self.browser_token = secret::resolve_optional(self.browser_token.as_deref())?;
        self.session_cookie = secret::resolve_optional(self.session_cookie.as_deref())?;
        Ok(self)
    }
}

/// Source of the booking configuration.
pub trait ConfigProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Loads the current configuration; `None` means not configured.
    fn load(&self) -> BoxFuture<'_, ProviderResult<Option<BookingConfig>>>;
}

/// A fixed, in-memory configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: Option<BookingConfig>,
}

impl StaticConfigProvider {
    pub fn new(config: BookingConfig) -> Self {
        Self {
            config: Some(config),
        }
    }

    /// A provider that reports "not configured".
    pub fn empty() -> Self {
        Self { config: None }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn load(&self) -> BoxFuture<'_, ProviderResult<Option<BookingConfig>>> {
        let config = self.config.clone();
        Box::pin(async move { Ok(config) })
    }
}

/// Reads `booking.toml` on every load.
///
/// Secret references are resolved off the async runtime, once per distinct
/// file content; an unchanged file reuses the last resolved config.
#[derive(Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
    resolved: Arc<Mutex<Option<ResolvedFile>>>,
}

struct ResolvedFile {
    contents: String,
    config: BookingConfig,
}

impl fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileConfigProvider")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            resolved: Arc::new(Mutex::new(None)),
        }
    }

    /// `~/.config/bookfeed/booking.toml`, or `None` without a config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bookfeed").join("booking.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn load(&self) -> BoxFuture<'_, ProviderResult<Option<BookingConfig>>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "Config file not found");
                    return Ok(None);
                }
                Err(e) => {
                    return Err(ProviderError::configuration(format!(
                        "Failed to read {}",
                        self.path.display()
                    ))
                    .with_source(e)
                    .with_provider("file"));
                }
            };

            let mut resolved = self.resolved.lock().await;
            if let Some(ref cached) = *resolved {
                if cached.contents == contents {
                    return Ok(Some(cached.config.clone()));
                }
            }

            let config: BookingConfig = toml::from_str(&contents).map_err(|e| {
                ProviderError::configuration(format!(
                    "Failed to parse {}: {}",
                    self.path.display(),
                    e
                ))
                .with_provider("file")
            })?;

            // `pass show` may block on gpg
            let config = tokio::task::spawn_blocking(move || config.resolve_secrets())
                .await
                .map_err(|e| {
                    ProviderError::configuration("Secret resolution task failed")
                        .with_source(e)
                        .with_provider("file")
                })?
                .map_err(|e| e.with_provider("file"))?;

            debug!(path = %self.path.display(), "Loaded configuration file");
            *resolved = Some(ResolvedFile {
                contents,
                config: config.clone(),
            });
            Ok(Some(config))
        })
    }
}

/// Reads the configuration as a JSON document from a key-value store.
///
/// Issues `GET {base_url}/{key}` with an optional bearer token. A 404 means
/// nothing has been stored yet.
#[derive(Debug, Clone)]
pub struct RemoteConfigProvider {
    client: Client,
    base_url: Url,
    key: String,
    token: Option<String>,
}

impl RemoteConfigProvider {
    /// Key used when none is given.
    pub const DEFAULT_KEY: &'static str = "booking-config";

    pub fn new(base_url: &str, timeout: Duration) -> ProviderResult<Self> {
        let mut base_url = Url::parse(base_url).map_err(|e| {
            ProviderError::configuration(format!("Invalid remote config URL: {}", base_url))
                .with_source(e)
                .with_provider("remote")
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            key: Self::DEFAULT_KEY.to_string(),
            token: None,
        })
    }

    /// Builder: bearer token for the store.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builder: key the document is stored under.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    fn document_url(&self) -> ProviderResult<Url> {
        let encoded = urlencoding::encode(&self.key);
        self.base_url.join(&encoded).map_err(|e| {
            ProviderError::configuration(format!("Invalid config key: {}", self.key))
                .with_source(e)
                .with_provider("remote")
        })
    }
}

impl ConfigProvider for RemoteConfigProvider {
    fn name(&self) -> &str {
        "remote"
    }

    fn load(&self) -> BoxFuture<'_, ProviderResult<Option<BookingConfig>>> {
        Box::pin(async move {
            let url = self.document_url()?;
            let mut request = self.client.get(url.clone());
            if let Some(ref token) = self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|e| {
                ProviderError::from_request("Config request failed", e).with_provider("remote")
            })?;

            if response.status() == StatusCode::NOT_FOUND {
                info!(url = %url, "No configuration stored");
                return Ok(None);
            }

            let body = read_body(response)
                .await
                .map_err(|e| e.with_provider("remote"))?;

            let config: BookingConfig = serde_json::from_str(&body).map_err(|e| {
                ProviderError::invalid_response(format!("Invalid config document: {}", e))
                    .with_provider("remote")
            })?;
            Ok(Some(config))
        })
    }
}
