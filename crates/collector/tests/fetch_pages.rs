//! Integration tests for paginated collection against an in-process mock API.
//!
//! The mock serves `/items?pages=N` as an N-page collection with GitHub-style
//! `Link` headers, `/broken` with an unreadable `Link`, `/flaky?fail=N` which
//! answers 503 N times before succeeding, and `/missing` which always 404s.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use lake_collector::{
    ApiClient, ApiClientConfig, ApiResponse, CollectorError, PageHandler, WorkerScheduler,
};

#[derive(Debug, Clone)]
struct Hit {
    path: String,
    page: Option<u32>,
    auth: String,
}

#[derive(Clone)]
struct MockState {
    base: String,
    hits: Arc<Mutex<Vec<Hit>>>,
    flaky_calls: Arc<AtomicU32>,
}

impl MockState {
    fn record(&self, path: &str, params: &HashMap<String, String>, headers: &HeaderMap) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.hits.lock().unwrap().push(Hit {
            path: path.to_string(),
            page: params.get("page").and_then(|p| p.parse().ok()),
            auth,
        });
    }
}

async fn items(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.record("/items", &params, &headers);
    let pages: u32 = params.get("pages").and_then(|p| p.parse().ok()).unwrap_or(1);
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page: u32 = params.get("per_page").and_then(|p| p.parse().ok()).unwrap_or(30);

    let body = Json(serde_json::json!({ "page": page, "items": [page * 10, page * 10 + 1] }));
    if pages <= 1 {
        return body.into_response();
    }
    let link = format!(
        "<{base}items?pages={pages}&page={next}&per_page={per_page}>; rel=\"next\", \
         <{base}items?pages={pages}&page={pages}&per_page={per_page}>; rel=\"last\"",
        base = state.base,
        next = (page + 1).min(pages),
    );
    ([(header::LINK, link)], body).into_response()
}

async fn broken(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.record("/broken", &params, &headers);
    (
        [(header::LINK, "this is not a link header".to_string())],
        Json(serde_json::json!([])),
    )
        .into_response()
}

async fn flaky(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.record("/flaky", &params, &headers);
    let fail: u32 = params.get("fail").and_then(|p| p.parse().ok()).unwrap_or(0);
    let call = state.flaky_calls.fetch_add(1, Ordering::SeqCst);
    if call < fail {
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}

async fn missing(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.record("/missing", &params, &headers);
    (StatusCode::NOT_FOUND, "no such thing").into_response()
}

async fn spawn_mock() -> MockState {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let state = MockState {
        base: format!("http://{addr}/"),
        hits: Arc::new(Mutex::new(Vec::new())),
        flaky_calls: Arc::new(AtomicU32::new(0)),
    };
    let app = Router::new()
        .route("/items", get(items))
        .route("/broken", get(broken))
        .route("/flaky", get(flaky))
        .route("/missing", get(missing))
        .with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    state
}

fn client(state: &MockState, credentials: &[&str]) -> ApiClient {
    let config = ApiClientConfig::new(
        state.base.clone(),
        credentials.iter().map(|c| c.to_string()).collect(),
    )
    .with_timeout(Duration::from_secs(5))
    .with_retry_backoff(Duration::from_millis(5));
    ApiClient::new(config, None).unwrap()
}

fn pages_query(pages: u32) -> Vec<(String, String)> {
    vec![("pages".to_string(), pages.to_string())]
}

/// Records the page number of every response it sees.
#[derive(Default)]
struct RecordingHandler {
    pages: Mutex<Vec<u32>>,
    fail_on: Option<u32>,
}

#[async_trait]
impl PageHandler for RecordingHandler {
    async fn handle(&self, response: ApiResponse) -> Result<(), CollectorError> {
        let page = response.page.unwrap_or(0);
        let body: serde_json::Value = response.json()?;
        assert_eq!(body["page"], page);
        self.pages.lock().unwrap().push(page);
        if self.fail_on == Some(page) {
            return Err(CollectorError::Job(format!("handler rejected page {page}")));
        }
        Ok(())
    }
}

#[tokio::test]
async fn every_page_handled_exactly_once_at_any_concurrency() {
    let state = spawn_mock().await;
    let api = client(&state, &["t"]);

    for pages in [1u32, 3, 7] {
        for concurrency in 1..=pages as usize {
            let scheduler = WorkerScheduler::new(concurrency);
            let handler = Arc::new(RecordingHandler::default());
            let fetched = api
                .fetch_pages("items", &pages_query(pages), 2, &scheduler, handler.clone())
                .await
                .unwrap();
            assert_eq!(fetched, pages);

            let seen = handler.pages.lock().unwrap().clone();
            assert_eq!(seen.len(), pages as usize, "pages={pages} conc={concurrency}");
            let unique: BTreeSet<u32> = seen.into_iter().collect();
            assert_eq!(unique, (1..=pages).collect::<BTreeSet<u32>>());
        }
    }
}

#[tokio::test]
async fn page_requests_carry_page_and_per_page() {
    let state = spawn_mock().await;
    let api = client(&state, &["t"]);
    let scheduler = WorkerScheduler::new(2);
    api.fetch_pages("items", &pages_query(3), 25, &scheduler, Arc::new(RecordingHandler::default()))
        .await
        .unwrap();

    let hits = state.hits.lock().unwrap().clone();
    let pages: BTreeSet<Option<u32>> = hits.iter().map(|h| h.page).collect();
    assert_eq!(pages, BTreeSet::from([Some(1), Some(2), Some(3)]));
    assert!(hits.iter().all(|h| h.path == "/items"));
}

#[tokio::test]
async fn credentials_rotate_round_robin_across_pages() {
    let state = spawn_mock().await;
    let api = client(&state, &["a", "b", "c"]);
    let scheduler = WorkerScheduler::new(1);
    api.fetch_pages("items", &pages_query(7), 1, &scheduler, Arc::new(RecordingHandler::default()))
        .await
        .unwrap();

    let auths: Vec<String> = state.hits.lock().unwrap().iter().map(|h| h.auth.clone()).collect();
    assert_eq!(
        auths,
        vec![
            "Bearer a", "Bearer b", "Bearer c", "Bearer a", "Bearer b", "Bearer c", "Bearer a"
        ]
    );
}

#[tokio::test]
async fn rotation_stays_balanced_under_concurrency() {
    let state = spawn_mock().await;
    let api = client(&state, &["a", "b"]);
    let scheduler = WorkerScheduler::new(4);
    api.fetch_pages("items", &pages_query(8), 1, &scheduler, Arc::new(RecordingHandler::default()))
        .await
        .unwrap();

    let hits = state.hits.lock().unwrap().clone();
    let a = hits.iter().filter(|h| h.auth == "Bearer a").count();
    let b = hits.iter().filter(|h| h.auth == "Bearer b").count();
    assert_eq!((a, b), (4, 4));
}

#[tokio::test]
async fn handler_error_on_first_page_stops_collection() {
    let state = spawn_mock().await;
    let api = client(&state, &["t"]);
    let scheduler = WorkerScheduler::new(2);
    let handler = Arc::new(RecordingHandler { fail_on: Some(1), ..Default::default() });

    let err = api
        .fetch_pages("items", &pages_query(5), 1, &scheduler, handler)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectorError::Job(_)));
    assert_eq!(state.hits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn handler_error_in_a_job_is_reported() {
    let state = spawn_mock().await;
    let api = client(&state, &["t"]);
    let scheduler = WorkerScheduler::new(1);
    let handler = Arc::new(RecordingHandler { fail_on: Some(3), ..Default::default() });

    let err = api
        .fetch_pages("items", &pages_query(6), 1, &scheduler, handler.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CollectorError::Job(msg) if msg.contains("page 3")));
    // Sequential pool: nothing after the failing page is dispatched.
    let max_page = handler.pages.lock().unwrap().iter().copied().max().unwrap();
    assert!(max_page <= 4);
}

#[tokio::test]
async fn malformed_link_is_treated_as_single_page() {
    let state = spawn_mock().await;
    let api = client(&state, &["t"]);
    let scheduler = WorkerScheduler::new(2);
    let calls = Arc::new(AtomicU32::new(0));

    struct Counting(Arc<AtomicU32>);
    #[async_trait]
    impl PageHandler for Counting {
        async fn handle(&self, _response: ApiResponse) -> Result<(), CollectorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let fetched = api
        .fetch_pages("broken", &[], 10, &scheduler, Arc::new(Counting(calls.clone())))
        .await
        .unwrap();
    assert_eq!(fetched, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_link_fails_in_strict_mode() {
    let state = spawn_mock().await;
    let config = ApiClientConfig::new(state.base.clone(), vec!["t".into()])
        .with_strict_pagination(true);
    let api = ApiClient::new(config, None).unwrap();
    let scheduler = WorkerScheduler::new(2);

    struct Accept;
    #[async_trait]
    impl PageHandler for Accept {
        async fn handle(&self, _response: ApiResponse) -> Result<(), CollectorError> {
            Ok(())
        }
    }

    let err = api
        .fetch_pages("broken", &[], 10, &scheduler, Arc::new(Accept))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectorError::Paging(_)));
}

#[tokio::test]
async fn server_errors_are_retried_with_fresh_credentials() {
    let state = spawn_mock().await;
    let config = ApiClientConfig::new(state.base.clone(), vec!["a".into(), "b".into()])
        .with_max_retries(3)
        .with_retry_backoff(Duration::from_millis(1));
    let api = ApiClient::new(config, None).unwrap();

    let query = vec![("fail".to_string(), "2".to_string())];
    let response = api.get("flaky", &query).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.attempts, 3);

    let auths: Vec<String> = state.hits.lock().unwrap().iter().map(|h| h.auth.clone()).collect();
    assert_eq!(auths, vec!["Bearer a", "Bearer b", "Bearer a"]);
}

#[tokio::test]
async fn retries_are_bounded() {
    let state = spawn_mock().await;
    let config = ApiClientConfig::new(state.base.clone(), vec!["t".into()])
        .with_max_retries(1)
        .with_retry_backoff(Duration::from_millis(1));
    let api = ApiClient::new(config, None).unwrap();

    let query = vec![("fail".to_string(), "10".to_string())];
    let err = api.get("flaky", &query).await.unwrap_err();
    assert!(matches!(err, CollectorError::Api { status: 503, .. }));
    assert_eq!(state.hits.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let state = spawn_mock().await;
    let api = client(&state, &["t"]);
    let err = api.get("missing", &[]).await.unwrap_err();
    assert!(matches!(err, CollectorError::Api { status: 404, ref body, .. } if body == "no such thing"));
    assert_eq!(state.hits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn transport_errors_surface_after_retries() {
    // Nothing listens on this port once the listener is dropped.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ApiClientConfig::new(format!("http://{addr}/"), vec!["t".into()])
        .with_max_retries(2)
        .with_retry_backoff(Duration::from_millis(1));
    let api = ApiClient::new(config, None).unwrap();
    let err = api.get("items", &[]).await.unwrap_err();
    assert!(matches!(err, CollectorError::Transport { attempts: 3, .. }));
}

#[tokio::test]
async fn cancelled_client_sends_nothing() {
    let state = spawn_mock().await;
    let cancel = CancellationToken::new();
    let config = ApiClientConfig::new(state.base.clone(), vec!["t".into()]);
    let api = ApiClient::new(config, Some(cancel.clone())).unwrap();
    cancel.cancel();

    let scheduler = WorkerScheduler::with_cancellation(2, &cancel);
    let err = api
        .fetch_pages("items", &pages_query(3), 1, &scheduler, Arc::new(RecordingHandler::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectorError::Cancelled));
    assert!(state.hits.lock().unwrap().is_empty());
}
