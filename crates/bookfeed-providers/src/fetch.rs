//! Page fetchers.
//!
//! A [`PageFetcher`] turns a URL (plus optional session cookies) into the
//! page body the extractor works on. Two implementations are provided:
//!
//! - [`DirectFetcher`] issues a plain HTTP GET. Good enough for portals that
//!   render appointments server-side.
//! - [`BrowserFetcher`] asks a headless-browser rendering service (the
//!   browserless `/content` API) to load the page and return the rendered
//!   HTML, for portals that build the page with JavaScript.
//!
//! [`FetcherSelector`] picks between them from the current booking
//! configuration.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::BookingConfig;
use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};

/// A boxed future for async trait methods.
///
/// Keeps [`PageFetcher`] object-safe so the server can hold an
/// `Arc<dyn PageFetcher>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default upper bound on a single page load.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(90);

/// Upper bound on a reachability check.
pub const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("bookfeed/", env!("CARGO_PKG_VERSION"));

/// A name/value cookie pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parses `name=value`, ignoring any attributes after the first `;`.
    ///
    /// Used both for `Set-Cookie` headers and for a configured session cookie.
    pub fn parse(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?.trim();
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, value.trim()))
    }
}

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub cookies: Vec<Cookie>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cookies: Vec::new(),
        }
    }

    /// Builder: attach a cookie.
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// A fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    /// Cookies set by the response.
    pub cookies: Vec<Cookie>,
    /// Raw HTML (or text) body.
    pub body: String,
}

/// Retrieves booking pages.
pub trait PageFetcher: Send + Sync {
    /// Short name used in logs and the health report.
    fn name(&self) -> &str;

    /// Loads the page described by `request`.
    fn fetch(&self, request: PageRequest) -> BoxFuture<'_, ProviderResult<FetchedPage>>;

    /// Returns true if whatever this fetcher depends on answers.
    ///
    /// `page_url` is the booking page, when one is configured.
    fn is_reachable<'a>(&'a self, page_url: Option<&'a str>) -> BoxFuture<'a, bool>;
}

/// Fetches pages with a plain HTTP GET.
#[derive(Debug, Clone)]
pub struct DirectFetcher {
    client: Client,
}

impl DirectFetcher {
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

impl PageFetcher for DirectFetcher {
    fn name(&self) -> &str {
        "direct"
    }

    fn fetch(&self, request: PageRequest) -> BoxFuture<'_, ProviderResult<FetchedPage>> {
        Box::pin(async move {
            let mut builder = self.client.get(&request.url);
            if let Some(cookies) = request.cookie_header() {
                builder = builder.header(COOKIE, cookies);
            }

            trace!(url = %request.url, cookies = request.cookies.len(), "Fetching page");

            let response = builder
                .send()
                .await
                .map_err(|e| ProviderError::from_request("Request failed", e).with_provider("direct"))?;

            let final_url = response.url().to_string();
            let cookies = response_cookies(&response);
            let body = read_body(response)
                .await
                .map_err(|e| e.with_provider("direct"))?;

            debug!(url = %final_url, bytes = body.len(), "Fetched page");
            Ok(FetchedPage {
                final_url,
                cookies,
                body,
            })
        })
    }

    /// Sends a HEAD to the booking page. Any answer short of a 5xx counts;
    /// portals commonly refuse HEAD or demand a login.
    fn is_reachable<'a>(&'a self, page_url: Option<&'a str>) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(url) = page_url else {
                return false;
            };
            match self.client.head(url).timeout(REACHABILITY_TIMEOUT).send().await {
                Ok(response) => !response.status().is_server_error(),
                Err(e) => {
                    debug!(url = %url, error = %e, "Booking portal unreachable");
                    false
                }
            }
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cookies: Vec<BrowserCookie<'a>>,
    goto_options: GotoOptions,
}

#[derive(Debug, Serialize)]
struct BrowserCookie<'a> {
    name: &'a str,
    value: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

/// Renders pages through a headless-browser service.
#[derive(Debug, Clone)]
pub struct BrowserFetcher {
    client: Client,
    endpoint: Url,
    token: Option<String>,
    timeout: Duration,
}

impl BrowserFetcher {
    /// Creates a fetcher for the service at `endpoint`.
    pub fn new(endpoint: &str, timeout: Duration) -> ProviderResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            ProviderError::configuration(format!("Invalid browser endpoint: {}", endpoint))
                .with_source(e)
                .with_provider("browser")
        })?;
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
            token: None,
            timeout,
        })
    }

    /// Builder: service token, sent as the `token` query parameter.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn api_url(&self, path: &str) -> ProviderResult<Url> {
        let mut url = self.endpoint.join(path).map_err(|e| {
            ProviderError::configuration(format!("Invalid browser API path: {}", path))
                .with_source(e)
                .with_provider("browser")
        })?;
        if let Some(ref token) = self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

impl PageFetcher for BrowserFetcher {
    fn name(&self) -> &str {
        "browser"
    }

    fn fetch(&self, request: PageRequest) -> BoxFuture<'_, ProviderResult<FetchedPage>> {
        Box::pin(async move {
            let api = self.api_url("content")?;
            let body = ContentRequest {
                url: &request.url,
                cookies: request
                    .cookies
                    .iter()
                    .map(|c| BrowserCookie {
                        name: &c.name,
                        value: &c.value,
                        url: &request.url,
                    })
                    .collect(),
                goto_options: GotoOptions {
                    wait_until: "networkidle2",
                    timeout: self.timeout.as_millis() as u64,
                },
            };

            trace!(url = %request.url, endpoint = %self.endpoint, "Rendering page");

            let response = self
                .client
                .post(api)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    ProviderError::from_request("Browser request failed", e).with_provider("browser")
                })?;

            let html = read_body(response)
                .await
                .map_err(|e| e.with_provider("browser"))?;

            debug!(url = %request.url, bytes = html.len(), "Rendered page");
            Ok(FetchedPage {
                final_url: request.url.clone(),
                cookies: request.cookies,
                body: html,
            })
        })
    }

    fn is_reachable<'a>(&'a self, _page_url: Option<&'a str>) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Ok(url) = self.api_url("json/version") else {
                return false;
            };
            match self.client.get(url).timeout(REACHABILITY_TIMEOUT).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!(error = %e, "Browser service unreachable");
                    false
                }
            }
        })
    }
}

/// A fetcher that always fails.
///
/// Stands in when no usable fetcher could be built, and in tests.
#[derive(Debug)]
pub struct ErrorFetcher {
    name: String,
    error: ProviderError,
}

impl ErrorFetcher {
    pub fn new(name: impl Into<String>, error: ProviderError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

impl PageFetcher for ErrorFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, _request: PageRequest) -> BoxFuture<'_, ProviderResult<FetchedPage>> {
        let error =
            ProviderError::new(self.error.code(), self.error.message()).with_provider(&self.name);
        Box::pin(async move { Err(error) })
    }

    fn is_reachable<'a>(&'a self, _page_url: Option<&'a str>) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FetcherKey {
    endpoint: Option<String>,
    token: Option<String>,
}

impl FetcherKey {
    fn of(config: Option<&BookingConfig>) -> Self {
        let endpoint = config
            .and_then(|c| c.browser_endpoint.as_deref())
            .map(str::trim)
            .filter(|e| !e.is_empty());
        Self {
            endpoint: endpoint.map(str::to_string),
            token: endpoint.and(config.and_then(|c| c.browser_token.clone())),
        }
    }
}

/// Chooses the fetcher for the current booking configuration.
///
/// A non-blank `browser_endpoint` selects [`BrowserFetcher`] with the
/// configured `browser_token`; anything else gets a [`DirectFetcher`]. The
/// last fetcher is kept and rebuilt only when the endpoint or token changes.
pub struct FetcherSelector {
    timeout: Duration,
    current: Mutex<Option<(FetcherKey, Arc<dyn PageFetcher>)>>,
}

impl FetcherSelector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            current: Mutex::new(None),
        }
    }

    pub async fn select(
        &self,
        config: Option<&BookingConfig>,
    ) -> ProviderResult<Arc<dyn PageFetcher>> {
        let key = FetcherKey::of(config);
        let mut current = self.current.lock().await;
        if let Some((ref cached, ref fetcher)) = *current {
            if *cached == key {
                return Ok(fetcher.clone());
            }
        }

        let fetcher: Arc<dyn PageFetcher> = match key.endpoint {
            Some(ref endpoint) => {
                let mut fetcher = BrowserFetcher::new(endpoint, self.timeout)?;
                if let Some(ref token) = key.token {
                    fetcher = fetcher.with_token(token);
                }
                Arc::new(fetcher)
            }
            None => Arc::new(DirectFetcher::new(self.timeout)?),
        };
        info!(fetcher = fetcher.name(), "Selected page fetcher");
        *current = Some((key, fetcher.clone()));
        Ok(fetcher)
    }
}

impl std::fmt::Debug for FetcherSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherSelector")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn build_client(timeout: Duration) -> ProviderResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {}", e)))
}

fn response_cookies(response: &Response) -> Vec<Cookie> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(Cookie::parse)
        .collect()
}

/// Maps the status to an error or reads the body.
pub(crate) async fn read_body(response: Response) -> ProviderResult<String> {
    let status = response.status();
    trace!(status = %status, "Received response");

    if status.is_success() {
        return response
            .text()
            .await
            .map_err(|e| ProviderError::from_request("Failed to read response", e));
    }

    let detail = response.text().await.unwrap_or_default();
    let err = ProviderError::from_status(status, &detail);
    if err.code() == ProviderErrorCode::Upstream && !status.is_server_error() {
        warn!(status = %status, "Unexpected response status");
    }
    Err(err)
}
