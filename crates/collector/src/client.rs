//! Authenticated HTTP client for one source API.
//!
//! Every outgoing request (retries included) takes the next credential from
//! the pool, round-robin. Collection endpoints are paged with
//! `page`/`per_page`; the `Link` header of page 1 tells how many pages remain,
//! and those are fanned out onto a [`WorkerScheduler`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, AUTHORIZATION, LINK};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use lake_core::config::CollectorConfig;

use crate::error::CollectorError;
use crate::paging::parse_link_header;
use crate::scheduler::WorkerScheduler;

/// Longest wait between two retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Client construction parameters.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub endpoint: String,
    pub credentials: Vec<String>,
    /// Prepended to the credential in the `Authorization` header.
    pub auth_prefix: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub strict_pagination: bool,
    pub headers: Vec<(String, String)>,
}

impl ApiClientConfig {
    pub fn new(endpoint: impl Into<String>, credentials: Vec<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials,
            auth_prefix: "Bearer ".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            strict_pagination: false,
            headers: Vec::new(),
        }
    }

    /// Take timeout, retry and pagination settings from the collector config.
    pub fn from_collector(
        endpoint: impl Into<String>,
        credentials: Vec<String>,
        collector: &CollectorConfig,
    ) -> Self {
        Self::new(endpoint, credentials)
            .with_timeout(collector.timeout())
            .with_max_retries(collector.max_retries)
            .with_retry_backoff(collector.retry_backoff())
            .with_strict_pagination(collector.strict_pagination)
    }

    pub fn with_auth_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.auth_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_strict_pagination(mut self, strict: bool) -> Self {
        self.strict_pagination = strict;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Page number when the response belongs to a paged collection.
    pub page: Option<u32>,
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// HTTP requests sent to obtain this response, retries included.
    pub attempts: u32,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, CollectorError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Caller-supplied consumer of fetched pages.
///
/// Called once per page, possibly from several pages concurrently. The
/// client knows nothing about persistence; handlers turn responses into raw
/// records.
#[async_trait]
pub trait PageHandler: Send + Sync {
    async fn handle(&self, response: ApiResponse) -> Result<(), CollectorError>;
}

struct Inner {
    http: Client,
    base: Url,
    credentials: Vec<String>,
    next_credential: AtomicUsize,
    config: ApiClientConfig,
    cancel: CancellationToken,
}

/// Cheaply cloneable handle; clones share the credential rotation.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn new(
        config: ApiClientConfig,
        cancel: Option<CancellationToken>,
    ) -> Result<Self, CollectorError> {
        if config.credentials.is_empty() {
            return Err(CollectorError::Config("credential pool is empty".into()));
        }

        let mut endpoint = config.endpoint.clone();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let base = Url::parse(&endpoint)?;

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CollectorError::Config(format!("http client: {e}")))?;

        info!(
            endpoint = %base,
            credentials = config.credentials.len(),
            timeout = ?config.timeout,
            max_retries = config.max_retries,
            "api client ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base,
                credentials: config.credentials.clone(),
                next_credential: AtomicUsize::new(0),
                config,
                cancel: cancel.unwrap_or_default(),
            }),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.base
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Take the next credential, round-robin over the pool.
    fn next_credential(&self) -> &str {
        let creds = &self.inner.credentials;
        let idx = self.inner.next_credential.fetch_add(1, Ordering::Relaxed) % creds.len();
        &creds[idx]
    }

    fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, CollectorError> {
        let mut url = self.inner.base.join(path.trim_start_matches('/'))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Issue one GET, retrying transport failures and 5xx responses.
    pub async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<ApiResponse, CollectorError> {
        let url = self.build_url(path, query)?;
        let max_retries = self.inner.config.max_retries;
        let mut attempt: u32 = 0;

        loop {
            if self.inner.cancel.is_cancelled() {
                return Err(CollectorError::Cancelled);
            }

            let mut request = self.inner.http.get(url.clone()).header(
                AUTHORIZATION,
                format!("{}{}", self.inner.config.auth_prefix, self.next_credential()),
            );
            for (name, value) in &self.inner.config.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let outcome = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return Err(CollectorError::Cancelled),
                outcome = read_response(request) => outcome,
            };

            match outcome {
                Ok((status, headers, body)) if (200..300).contains(&status) => {
                    debug!(url = %url, status, bytes = body.len(), "request ok");
                    return Ok(ApiResponse {
                        page: None,
                        url: url.to_string(),
                        status,
                        headers,
                        body,
                        attempts: attempt + 1,
                    });
                }
                Ok((status, _, body)) if status < 500 || attempt >= max_retries => {
                    return Err(CollectorError::Api {
                        status,
                        url: url.to_string(),
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                }
                Ok((status, _, _)) => {
                    warn!(url = %url, status, attempt, "server error, retrying");
                }
                Err(e) if attempt >= max_retries => {
                    return Err(CollectorError::Transport {
                        url: url.to_string(),
                        attempts: attempt + 1,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "transport error, retrying");
                }
            }

            let delay = retry_delay(self.inner.config.retry_backoff, attempt);
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return Err(CollectorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Fetch every page of a collection endpoint, calling `handler` once per page.
    ///
    /// Page 1 is fetched inline; a handler error there aborts immediately.
    /// The remaining pages, as announced by the `Link` header's `last`
    /// relation, run as jobs on `scheduler`. Returns the number of pages
    /// fetched once the scheduler has drained.
    pub async fn fetch_pages(
        &self,
        path: &str,
        query: &[(String, String)],
        page_size: u32,
        scheduler: &WorkerScheduler,
        handler: Arc<dyn PageHandler>,
    ) -> Result<u32, CollectorError> {
        let first = self.get_page(path, query, 1, page_size).await?;
        let paging = self.last_page(&first);
        handler.handle(first).await?;
        let last_page = paging?;

        if last_page <= 1 {
            return Ok(1);
        }
        debug!(path, last_page, "fanning out remaining pages");

        let mut submit_error = None;
        for page in 2..=last_page {
            let client = self.clone();
            let path = path.to_string();
            let query = query.to_vec();
            let handler = Arc::clone(&handler);
            let submitted = scheduler
                .submit(move || async move {
                    let response = client.get_page(&path, &query, page, page_size).await?;
                    handler.handle(response).await
                })
                .await;
            if let Err(e) = submitted {
                submit_error = Some(e);
                break;
            }
        }

        scheduler.wait_until_finish().await?;
        match submit_error {
            Some(e) => Err(e),
            None => Ok(last_page),
        }
    }

    async fn get_page(
        &self,
        path: &str,
        query: &[(String, String)],
        page: u32,
        page_size: u32,
    ) -> Result<ApiResponse, CollectorError> {
        let query = with_page(query, page, page_size);
        let mut response = self.get(path, &query).await?;
        response.page = Some(page);
        Ok(response)
    }

    /// Last page number announced by a response; 1 when there is no `Link`.
    fn last_page(&self, response: &ApiResponse) -> Result<u32, CollectorError> {
        let Some(link) = response.headers.get(LINK) else {
            return Ok(1);
        };
        let parsed = link
            .to_str()
            .map_err(|e| CollectorError::Paging(e.to_string()))
            .and_then(parse_link_header);
        match parsed {
            // No `last` relation means we are already on the last page.
            Ok(info) => Ok(info.last.unwrap_or(1).max(1)),
            Err(e) if self.inner.config.strict_pagination => Err(e),
            Err(e) => {
                warn!(url = %response.url, error = %e, "unreadable pagination metadata, assuming a single page");
                Ok(1)
            }
        }
    }
}

async fn read_response(
    request: reqwest::RequestBuilder,
) -> Result<(u16, HeaderMap, Bytes), reqwest::Error> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    Ok((status, headers, body))
}

fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16)).min(MAX_RETRY_DELAY)
}

/// Copy `query`, replacing any `page`/`per_page` with the given values.
fn with_page(query: &[(String, String)], page: u32, page_size: u32) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = query
        .iter()
        .filter(|(k, _)| k != "page" && k != "per_page")
        .cloned()
        .collect();
    out.push(("page".into(), page.to_string()));
    out.push(("per_page".into(), page_size.to_string()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_credential_pool_is_rejected() {
        let err = ApiClient::new(ApiClientConfig::new("http://localhost/", vec![]), None);
        assert!(matches!(err, Err(CollectorError::Config(_))));
    }

    #[test]
    fn credentials_rotate_with_wraparound() {
        let config = ApiClientConfig::new(
            "http://localhost",
            vec!["a".into(), "b".into(), "c".into()],
        );
        let client = ApiClient::new(config, None).unwrap();
        let seen: Vec<String> = (0..7).map(|_| client.next_credential().to_string()).collect();
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn clones_share_rotation() {
        let config = ApiClientConfig::new("http://localhost", vec!["a".into(), "b".into()]);
        let client = ApiClient::new(config, None).unwrap();
        let other = client.clone();
        assert_eq!(client.next_credential(), "a");
        assert_eq!(other.next_credential(), "b");
    }

    #[test]
    fn urls_join_onto_endpoint() {
        let config = ApiClientConfig::new("http://localhost:8080/api/v3", vec!["t".into()]);
        let client = ApiClient::new(config, None).unwrap();
        let url = client
            .build_url("/repos/o/r/actions/runs", &with_page(&[], 2, 50))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/v3/repos/o/r/actions/runs?page=2&per_page=50"
        );
    }

    #[test]
    fn with_page_replaces_existing_paging() {
        let query = vec![
            ("status".to_string(), "completed".to_string()),
            ("page".to_string(), "9".to_string()),
        ];
        let q = with_page(&query, 3, 20);
        assert_eq!(
            q,
            vec![
                ("status".to_string(), "completed".to_string()),
                ("page".to_string(), "3".to_string()),
                ("per_page".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_delay(base, 0), Duration::from_millis(100));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(800));
        assert_eq!(retry_delay(base, 30), MAX_RETRY_DELAY);
    }
}
