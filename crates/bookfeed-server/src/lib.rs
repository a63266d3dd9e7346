//! HTTP server publishing booking-portal appointments as an iCalendar feed.
//!
//! - token-gated `GET /calendar` with a 15 minute cache and stale fallback
//! - `GET /health` reporting configuration completeness and cache state
//! - graceful shutdown on SIGTERM/SIGINT
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bookfeed_providers::{BookingConfig, DirectFetcher, StaticConfigProvider, DEFAULT_FETCH_TIMEOUT};
//! use bookfeed_server::{AppState, FeedService, Shutdown, build_router, serve};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BookingConfig::default()
//!         .with_booking_url("https://portal.example.edu/appointments")
//!         .with_access_token("secret");
//!     let feed = FeedService::new(
//!         Arc::new(StaticConfigProvider::new(config)),
//!         Arc::new(DirectFetcher::new(DEFAULT_FETCH_TIMEOUT)?),
//!     );
//!     let router = build_router(AppState::new(Arc::new(feed)));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     let shutdown = Shutdown::new();
//!     shutdown.spawn_listener();
//!     serve(listener, router, shutdown.wait()).await?;
//!     Ok(())
//! }
//! ```

mod access;
mod cache;
pub mod cli;
mod clock;
mod config;
mod error;
mod feed;
mod routes;
mod shutdown;

use std::future::Future;
use std::io;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

pub use access::{AccessError, check_token, check_token_with, constant_time_eq};
pub use cache::{CACHE_TTL, CacheEntry, CacheState, CacheStatus, FeedCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_LISTEN, ServerConfig};
pub use error::{FeedError, ServerError, ServerResult};
pub use feed::{CacheHealth, FeedResponse, FeedService, FetcherHealth, HealthReport};
pub use routes::{AppState, CalendarQuery, build_router};
pub use shutdown::Shutdown;

/// Serves `router` on `listener` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Server stopped");
    Ok(())
}
