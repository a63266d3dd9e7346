//! Feed orchestration.
//!
//! [`FeedService`] answers a calendar request end to end: load the
//! configuration, check the caller's token, consult the cache and, on a miss,
//! fetch the booking page and run it through extraction, normalization and
//! encoding.
//!
//! The page fetcher is chosen per request, so a configuration that gains a
//! browser endpoint or rotates its token takes effect without a restart.
//!
//! The cache lock is never held while fetching. Two concurrent misses both
//! fetch and the later store wins; the content is the same either way.

use std::sync::Arc;

use bookfeed_core::{
    AppointmentDefaults, CalendarDocument, CalendarOptions, Extractor, build_appointments,
    encode_calendar,
};
use bookfeed_providers::{
    BookingConfig, ConfigCompleteness, ConfigProvider, ErrorFetcher, FetcherSelector, PageFetcher,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::access::check_token;
use crate::cache::{CacheState, CacheStatus, FeedCache};
use crate::clock::{Clock, SystemClock};
use crate::error::FeedError;

/// A calendar plus how it was obtained.
#[derive(Debug, Clone)]
pub struct FeedResponse {
    pub document: CalendarDocument,
    pub status: CacheStatus,
}

/// Cache section of the health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub state: CacheState,
    pub generated_at: Option<DateTime<Utc>>,
    pub age_seconds: Option<u64>,
    pub events: Option<usize>,
}

/// Fetcher section of the health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetcherHealth {
    pub name: String,
    pub reachable: bool,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `ok` when configured and the fetcher is reachable, `degraded` otherwise.
    pub status: &'static str,
    pub version: &'static str,
    pub configured: bool,
    pub config: ConfigCompleteness,
    pub fetcher: FetcherHealth,
    pub cache: CacheHealth,
}

enum Fetchers {
    Fixed(Arc<dyn PageFetcher>),
    /// Chosen from the booking configuration on every request.
    Selected(FetcherSelector),
}

/// Serves calendar feeds.
pub struct FeedService {
    config: Arc<dyn ConfigProvider>,
    fetchers: Fetchers,
    cache: RwLock<FeedCache>,
    clock: Arc<dyn Clock>,
    extractor: Extractor,
}

impl FeedService {
    /// Creates a service that always fetches with `fetcher`.
    pub fn new(config: Arc<dyn ConfigProvider>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::with_fetchers(config, Fetchers::Fixed(fetcher))
    }

    /// Creates a service that picks its fetcher from each loaded configuration.
    pub fn selecting(config: Arc<dyn ConfigProvider>, selector: FetcherSelector) -> Self {
        Self::with_fetchers(config, Fetchers::Selected(selector))
    }

    fn with_fetchers(config: Arc<dyn ConfigProvider>, fetchers: Fetchers) -> Self {
        Self {
            config,
            fetchers,
            cache: RwLock::new(FeedCache::default()),
            clock: Arc::new(SystemClock),
            extractor: Extractor::default(),
        }
    }

    /// Builder: replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the calendar for a caller presenting `token`.
    ///
    /// `force` skips a fresh cache entry. If regeneration fails and an older
    /// document exists it is returned with [`CacheStatus::Stale`].
    #[instrument(skip(self, token))]
    pub async fn calendar(
        &self,
        token: Option<&str>,
        force: bool,
    ) -> Result<FeedResponse, FeedError> {
        let config = self
            .config
            .load()
            .await
            .map_err(FeedError::Config)?
            .ok_or(FeedError::NotConfigured)?;

        check_token(config.access_token(), token).inspect_err(|e| {
            debug!(reason = %e, "Rejected feed request");
        })?;

        if let Some(document) = self.cache.read().await.lookup(self.clock.now(), force) {
            debug!("Serving cached calendar");
            return Ok(FeedResponse {
                document,
                status: CacheStatus::Hit,
            });
        }

        match self.generate(&config).await {
            Ok(document) => {
                self.cache
                    .write()
                    .await
                    .store(document.clone(), self.clock.now());
                info!(events = document.event_count(), "Regenerated calendar");
                Ok(FeedResponse {
                    document,
                    status: CacheStatus::Miss,
                })
            }
            Err(FeedError::NotConfigured) => Err(FeedError::NotConfigured),
            Err(err) => {
                let fallback = self.cache.read().await.fallback();
                match fallback {
                    Some(document) => {
                        warn!(error = %err, "Regeneration failed, serving stale calendar");
                        Ok(FeedResponse {
                            document,
                            status: CacheStatus::Stale,
                        })
                    }
                    None => {
                        warn!(error = %err, "Regeneration failed with nothing cached");
                        Err(err)
                    }
                }
            }
        }
    }

    /// The fetcher for `config`; an [`ErrorFetcher`] if none can be built.
    async fn fetcher(&self, config: Option<&BookingConfig>) -> Arc<dyn PageFetcher> {
        match self.fetchers {
            Fetchers::Fixed(ref fetcher) => fetcher.clone(),
            Fetchers::Selected(ref selector) => match selector.select(config).await {
                Ok(fetcher) => fetcher,
                Err(e) => {
                    warn!(error = %e, "Could not build page fetcher");
                    Arc::new(ErrorFetcher::new("unavailable", e))
                }
            },
        }
    }

    async fn generate(&self, config: &BookingConfig) -> Result<CalendarDocument, FeedError> {
        let request = config.page_request().ok_or(FeedError::NotConfigured)?;
        let options = CalendarOptions::new(&config.display_name, &config.timezone)?;

        let fetcher = self.fetcher(Some(config)).await;
        let page = fetcher.fetch(request).await?;

        let matches = self.extractor.extract(&page.body);
        let defaults = AppointmentDefaults::default().with_location(&config.venue);
        let appointments = build_appointments(&matches, &defaults);
        debug!(
            fetcher = %fetcher.name(),
            candidates = matches.len(),
            appointments = appointments.len(),
            "Extracted appointments"
        );

        Ok(encode_calendar(&appointments, &options, self.clock.now()))
    }

    /// Builds the health report.
    pub async fn health(&self) -> HealthReport {
        let config = self.config.load().await.unwrap_or_else(|e| {
            warn!(error = %e, "Config provider failed during health check");
            None
        });
        let completeness = config
            .as_ref()
            .map(BookingConfig::completeness)
            .unwrap_or_default();

        let fetcher = self.fetcher(config.as_ref()).await;
        let page_url = config.as_ref().and_then(|c| c.booking_url.as_deref());
        let reachable = fetcher.is_reachable(page_url).await;

        let now = self.clock.now();
        let cache = {
            let cache = self.cache.read().await;
            let entry = cache.entry();
            CacheHealth {
                state: cache.state(now),
                generated_at: entry.map(|e| e.document.generated_at()),
                age_seconds: entry.map(|e| e.age(now).as_secs()),
                events: entry.map(|e| e.document.event_count()),
            }
        };

        let configured = completeness.is_complete();
        HealthReport {
            status: if configured && reachable { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            configured,
            config: completeness,
            fetcher: FetcherHealth {
                name: fetcher.name().to_string(),
                reachable,
            },
            cache,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use bookfeed_providers::{
        BoxFuture, FetchedPage, PageRequest, ProviderError, ProviderErrorCode, ProviderResult,
        StaticConfigProvider,
    };
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) const TOKEN: &str = "feed-token";

    pub(crate) const PAGE: &str = r#"<html><body>
        <div class="appointment">
          <h3>Algebra Review</h3>
          <p>Monday, January 15, 2026</p>
          <p>4:00 PM - 5:00 PM</p>
        </div>
    </body></html>"#;

    /// Serves a fixed page until told to fail.
    pub(crate) struct FakeFetcher {
        body: Mutex<String>,
        failing: AtomicBool,
        calls: AtomicUsize,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl FakeFetcher {
        pub(crate) fn new(body: &str) -> Self {
            Self {
                body: Mutex::new(body.to_string()),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_body(&self, body: &str) {
            *self.body.lock().unwrap() = body.to_string();
        }
    }

    impl PageFetcher for FakeFetcher {
        fn name(&self) -> &str {
            "fake"
        }

        fn fetch(&self, request: PageRequest) -> BoxFuture<'_, ProviderResult<FetchedPage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            let result = if self.failing.load(Ordering::SeqCst) {
                Err(ProviderError::network("portal unreachable").with_provider("fake"))
            } else {
                Ok(FetchedPage {
                    final_url: request.url,
                    cookies: Vec::new(),
                    body: self.body.lock().unwrap().clone(),
                })
            };
            Box::pin(async move { result })
        }

        fn is_reachable<'a>(&'a self, _page_url: Option<&'a str>) -> BoxFuture<'a, bool> {
            let reachable = !self.failing.load(Ordering::SeqCst);
            Box::pin(async move { reachable })
        }
    }

    /// Configuration that can be edited while the service runs.
    struct EditableConfigProvider {
        config: Mutex<BookingConfig>,
    }

    impl EditableConfigProvider {
        fn new(config: BookingConfig) -> Self {
            Self {
                config: Mutex::new(config),
            }
        }

        fn edit(&self, f: impl FnOnce(&mut BookingConfig)) {
            f(&mut self.config.lock().unwrap());
        }
    }

    impl ConfigProvider for EditableConfigProvider {
        fn name(&self) -> &str {
            "editable"
        }

        fn load(&self) -> BoxFuture<'_, ProviderResult<Option<BookingConfig>>> {
            let config = self.config.lock().unwrap().clone();
            Box::pin(async move { Ok(Some(config)) })
        }
    }

    pub(crate) fn booking() -> BookingConfig {
        BookingConfig::default()
            .with_booking_url("https://portal.example.edu/appointments")
            .with_access_token(TOKEN)
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    fn service(config: Option<BookingConfig>) -> (FeedService, Arc<FakeFetcher>, Arc<ManualClock>) {
        let fetcher = Arc::new(FakeFetcher::new(PAGE));
        let clock = Arc::new(ManualClock::new(t0()));
        let provider = match config {
            Some(c) => StaticConfigProvider::new(c),
            None => StaticConfigProvider::empty(),
        };
        let service = FeedService::new(Arc::new(provider), fetcher.clone()).with_clock(clock.clone());
        (service, fetcher, clock)
    }

    #[tokio::test]
    async fn first_request_generates() {
        let (service, fetcher, _) = service(Some(booking()));
        let response = service.calendar(Some(TOKEN), false).await.unwrap();

        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(response.document.event_count(), 1);
        assert_eq!(response.document.generated_at(), t0());
        assert!(response.document.as_str().contains("Algebra Review"));
        assert!(response.document.as_str().contains("DTSTART:20260115T210000Z"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn hit_within_ttl_then_refetch_after() {
        let (service, fetcher, clock) = service(Some(booking()));
        service.calendar(Some(TOKEN), false).await.unwrap();

        clock.advance(chrono::Duration::minutes(10));
        let response = service.calendar(Some(TOKEN), false).await.unwrap();
        assert_eq!(response.status, CacheStatus::Hit);
        assert_eq!(fetcher.calls(), 1);

        clock.advance(chrono::Duration::minutes(10));
        let response = service.calendar(Some(TOKEN), false).await.unwrap();
        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(response.document.generated_at(), t0() + chrono::Duration::minutes(20));
    }

    #[tokio::test]
    async fn force_refresh_bypasses_fresh_cache() {
        let (service, fetcher, _) = service(Some(booking()));
        service.calendar(Some(TOKEN), false).await.unwrap();
        let response = service.calendar(Some(TOKEN), true).await.unwrap();
        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn stale_fallback_on_failure() {
        let (service, fetcher, clock) = service(Some(booking()));
        let first = service.calendar(Some(TOKEN), false).await.unwrap();

        clock.advance(chrono::Duration::minutes(20));
        fetcher.fail(true);
        let response = service.calendar(Some(TOKEN), false).await.unwrap();
        assert_eq!(response.status, CacheStatus::Stale);
        assert_eq!(response.document.as_str(), first.document.as_str());

        // Forced refresh that fails also falls back.
        let response = service.calendar(Some(TOKEN), true).await.unwrap();
        assert_eq!(response.status, CacheStatus::Stale);
    }

    #[tokio::test]
    async fn failure_with_empty_cache_is_an_error() {
        let (service, fetcher, _) = service(Some(booking()));
        fetcher.fail(true);
        let err = service.calendar(Some(TOKEN), false).await.unwrap_err();
        assert!(matches!(err, FeedError::Fetch(_)));

        // Still empty: the next success is a miss.
        fetcher.fail(false);
        let response = service.calendar(Some(TOKEN), false).await.unwrap();
        assert_eq!(response.status, CacheStatus::Miss);
    }

    #[tokio::test]
    async fn empty_page_serves_empty_calendar() {
        let (service, fetcher, _) = service(Some(booking()));
        fetcher.set_body("<html><body>No upcoming appointments.</body></html>");
        let response = service.calendar(Some(TOKEN), false).await.unwrap();
        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(response.document.event_count(), 0);
        assert!(response.document.as_str().contains("BEGIN:VCALENDAR"));
    }

    #[tokio::test]
    async fn bad_token_is_denied_before_fetching() {
        let (service, fetcher, _) = service(Some(booking()));
        let err = service.calendar(Some("wrong-token"), false).await.unwrap_err();
        assert!(matches!(err, FeedError::AccessDenied));
        let err = service.calendar(None, false).await.unwrap_err();
        assert!(matches!(err, FeedError::AccessDenied));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn not_configured() {
        let (service, _, _) = service(None);
        let err = service.calendar(Some(TOKEN), false).await.unwrap_err();
        assert!(matches!(err, FeedError::NotConfigured));

        let mut no_url = booking();
        no_url.booking_url = None;
        let (service, fetcher, _) = self::service(Some(no_url));
        let err = service.calendar(Some(TOKEN), false).await.unwrap_err();
        assert!(matches!(err, FeedError::NotConfigured));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn venue_and_session_cookie_flow_through() {
        let mut config = booking().with_session_cookie("JSESSIONID=abc");
        config.venue = "Room 204".to_string();
        let (service, fetcher, _) = service(Some(config));

        let response = service.calendar(Some(TOKEN), false).await.unwrap();
        assert!(response.document.as_str().contains("LOCATION:Room 204"));

        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(requests[0].cookies.len(), 1);
        assert_eq!(requests[0].cookies[0].name, "JSESSIONID");
    }

    #[tokio::test]
    async fn invalid_timezone_is_a_generation_failure() {
        let (service, _, _) = service(Some(booking().with_timezone("Mars/Olympus")));
        let err = service.calendar(Some(TOKEN), false).await.unwrap_err();
        assert!(matches!(err, FeedError::Encode(_)));
    }

    #[tokio::test]
    async fn health_report() {
        let (service, fetcher, clock) = service(Some(booking()));
        let report = service.health().await;
        assert_eq!(report.status, "ok");
        assert!(report.configured);
        assert_eq!(report.cache.state, CacheState::Empty);
        assert_eq!(report.fetcher.name, "fake");

        service.calendar(Some(TOKEN), false).await.unwrap();
        clock.advance(chrono::Duration::minutes(16));
        fetcher.fail(true);
        let report = service.health().await;
        assert_eq!(report.status, "degraded");
        assert!(!report.fetcher.reachable);
        assert_eq!(report.cache.state, CacheState::Stale);
        assert_eq!(report.cache.age_seconds, Some(16 * 60));
        assert_eq!(report.cache.events, Some(1));
        assert_eq!(report.cache.generated_at, Some(t0()));
    }

    #[tokio::test]
    async fn health_when_unconfigured() {
        let (service, _, _) = service(None);
        let report = service.health().await;
        assert_eq!(report.status, "degraded");
        assert!(!report.configured);
        assert!(!report.config.has_access_token);
    }

    #[tokio::test]
    async fn browser_endpoint_added_after_startup_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/appointments"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .and(query_param("token", "svc-token"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .and(query_param("token", "svc-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let page_url = format!("{}/appointments", server.uri());
        let provider = Arc::new(EditableConfigProvider::new(
            booking().with_booking_url(&page_url),
        ));
        let service = FeedService::selecting(
            provider.clone(),
            FetcherSelector::new(Duration::from_secs(5)),
        )
        .with_clock(Arc::new(ManualClock::new(t0())));

        let report = service.health().await;
        assert_eq!(report.fetcher.name, "direct");
        assert!(report.fetcher.reachable);

        provider.edit(|config| {
            config.browser_endpoint = Some(server.uri());
            config.browser_token = Some("svc-token".into());
        });

        let report = service.health().await;
        assert_eq!(report.fetcher.name, "browser");
        assert!(report.fetcher.reachable);
        assert_eq!(report.status, "ok");

        let response = service.calendar(Some(TOKEN), false).await.unwrap();
        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(response.document.event_count(), 1);
    }

    #[tokio::test]
    async fn unusable_browser_endpoint_degrades() {
        let provider = Arc::new(EditableConfigProvider::new(booking()));
        provider.edit(|config| config.browser_endpoint = Some("not a url".into()));
        let service = FeedService::selecting(provider, FetcherSelector::new(Duration::from_secs(5)))
            .with_clock(Arc::new(ManualClock::new(t0())));

        let report = service.health().await;
        assert_eq!(report.status, "degraded");
        assert_eq!(report.fetcher.name, "unavailable");
        assert!(!report.fetcher.reachable);

        let err = service.calendar(Some(TOKEN), false).await.unwrap_err();
        match err {
            FeedError::Fetch(e) => assert_eq!(e.code(), ProviderErrorCode::Configuration),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
