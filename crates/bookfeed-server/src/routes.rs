//! HTTP routes.
//!
//! - `GET /calendar/{token}` and `GET /calendar?token=...`, both accepting
//!   `refresh=true`
//! - `GET /health`

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::{self, HeaderName};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::error::FeedError;
use crate::feed::{FeedResponse, FeedService, HealthReport};

const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";
const CALENDAR_CACHE_CONTROL: &str = "private, max-age=900";
const CALENDAR_DISPOSITION: &str = "inline; filename=\"calendar.ics\"";
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedService>,
}

impl AppState {
    pub fn new(feed: Arc<FeedService>) -> Self {
        Self { feed }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CalendarQuery {
    pub token: Option<String>,
    pub refresh: Option<String>,
}

impl CalendarQuery {
    /// Only the literal `true` forces a refresh.
    fn force(&self) -> bool {
        self.refresh.as_deref() == Some("true")
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/calendar", get(calendar_by_query))
        .route("/calendar/{token}", get(calendar_by_path))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.feed.health().await)
}

async fn calendar_by_path(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<CalendarQuery>,
) -> Result<impl IntoResponse, FeedError> {
    let response = state.feed.calendar(Some(&token), query.force()).await?;
    Ok(calendar_response(response))
}

async fn calendar_by_query(
    State(state): State<AppState>,
    Query(query): Query<CalendarQuery>,
) -> Result<impl IntoResponse, FeedError> {
    let response = state
        .feed
        .calendar(query.token.as_deref(), query.force())
        .await?;
    Ok(calendar_response(response))
}

fn calendar_response(response: FeedResponse) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, CALENDAR_CONTENT_TYPE),
            (header::CACHE_CONTROL, CALENDAR_CACHE_CONTROL),
            (header::CONTENT_DISPOSITION, CALENDAR_DISPOSITION),
            (X_CACHE, response.status.as_str()),
        ],
        response.document.into_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feed::tests::{FakeFetcher, PAGE, TOKEN, booking, t0};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use bookfeed_providers::{ProviderError, StaticConfigProvider};
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        fetcher: Arc<FakeFetcher>,
    }

    fn harness(provider: StaticConfigProvider) -> Harness {
        let fetcher = Arc::new(FakeFetcher::new(PAGE));
        let feed = FeedService::new(Arc::new(provider), fetcher.clone())
            .with_clock(Arc::new(ManualClock::new(t0())));
        Harness {
            router: build_router(AppState::new(Arc::new(feed))),
            fetcher,
        }
    }

    fn configured() -> Harness {
        harness(StaticConfigProvider::new(booking()))
    }

    async fn send(router: &Router, uri: &str) -> Response {
        router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn calendar_by_path_miss_then_hit() {
        let h = configured();
        let uri = format!("/calendar/{TOKEN}");

        let first = send(&h.router, &uri).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(header_str(&first, "content-type"), CALENDAR_CONTENT_TYPE);
        assert_eq!(header_str(&first, "x-cache"), "MISS");
        assert_eq!(header_str(&first, "cache-control"), CALENDAR_CACHE_CONTROL);
        assert_eq!(header_str(&first, "content-disposition"), CALENDAR_DISPOSITION);
        let body = body_text(first).await;
        assert!(body.starts_with("BEGIN:VCALENDAR"));
        assert!(body.contains("SUMMARY:Algebra Review"));

        let second = send(&h.router, &uri).await;
        assert_eq!(header_str(&second, "x-cache"), "HIT");
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn calendar_by_query() {
        let h = configured();
        let response = send(&h.router, &format!("/calendar?token={TOKEN}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "x-cache"), "MISS");
    }

    #[tokio::test]
    async fn refresh_true_forces_regeneration() {
        let h = configured();
        send(&h.router, &format!("/calendar/{TOKEN}")).await;

        let response = send(&h.router, &format!("/calendar/{TOKEN}?refresh=true")).await;
        assert_eq!(header_str(&response, "x-cache"), "MISS");
        assert_eq!(h.fetcher.calls(), 2);

        let response = send(&h.router, &format!("/calendar?token={TOKEN}&refresh=1")).await;
        assert_eq!(header_str(&response, "x-cache"), "HIT");
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn stale_on_upstream_failure() {
        let h = configured();
        send(&h.router, &format!("/calendar/{TOKEN}")).await;
        h.fetcher.fail(true);

        let response = send(&h.router, &format!("/calendar/{TOKEN}?refresh=true")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "x-cache"), "STALE");
    }

    #[tokio::test]
    async fn wrong_or_missing_token_is_unauthorized() {
        let h = configured();

        let response = send(&h.router, "/calendar/not-the-token").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "invalid token");

        let response = send(&h.router, "/calendar").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn unconfigured_is_unavailable() {
        let h = harness(StaticConfigProvider::empty());
        let response = send(&h.router, &format!("/calendar/{TOKEN}")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "not configured");
    }

    #[tokio::test]
    async fn failure_without_cache_is_internal_error() {
        let h = configured();
        h.fetcher.fail(true);
        let response = send(&h.router, &format!("/calendar/{TOKEN}")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "calendar generation failed");
    }

    #[tokio::test]
    async fn health_reports_json() {
        let h = configured();
        send(&h.router, &format!("/calendar/{TOKEN}")).await;

        let response = send(&h.router, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();

        assert_eq!(json["status"], "ok");
        assert_eq!(json["configured"], true);
        assert_eq!(json["config"]["has_access_token"], true);
        assert_eq!(json["fetcher"]["name"], "fake");
        assert_eq!(json["cache"]["state"], "fresh");
        assert_eq!(json["cache"]["events"], 1);
        assert!(!json.to_string().contains(TOKEN));
    }

    #[test]
    fn feed_error_response_has_no_detail() {
        let response = FeedError::Fetch(ProviderError::upstream("upstream said 502")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
