//! Collaborators of the feed service: page fetchers and configuration providers.
//!
//! - [`PageFetcher`] loads the booking page ([`DirectFetcher`], [`BrowserFetcher`]),
//!   [`FetcherSelector`] picks one from the configuration
//! - [`ConfigProvider`] supplies the [`BookingConfig`] ([`StaticConfigProvider`],
//!   [`FileConfigProvider`], [`RemoteConfigProvider`])
//! - [`ProviderError`] is the error type both report
//!
//! ```ignore
//! use bookfeed_providers::{ConfigProvider, FileConfigProvider, PageFetcher};
//!
//! async fn load_page(config: &dyn ConfigProvider, fetcher: &dyn PageFetcher) -> Option<String> {
//!     let booking = config.load().await.ok()??;
//!     let page = fetcher.fetch(booking.page_request()?).await.ok()?;
//!     Some(page.body)
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod secret;

pub use config::{
    BookingConfig, ConfigCompleteness, ConfigProvider, FileConfigProvider, RemoteConfigProvider,
    StaticConfigProvider,
};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use fetch::{
    BoxFuture, BrowserFetcher, Cookie, DEFAULT_FETCH_TIMEOUT, DirectFetcher, ErrorFetcher,
    FetchedPage, FetcherSelector, PageFetcher, PageRequest, REACHABILITY_TIMEOUT,
};
