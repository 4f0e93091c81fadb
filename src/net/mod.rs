//! Every outbound HTTP request in the system goes through a [`Scraper`]
//! (spec §4.B). It wraps four concerns: a fingerprint-keyed response cache,
//! rate limiting, retry/backoff, and silent-throttle detection.

pub mod fingerprint;
pub mod ratelimit;
pub mod throttle;

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::blobstore::BlobStore;
use crate::context::OpContext;
use crate::error::{BlobError, ScrapeError};
use ratelimit::RateLimiter;

/// Current envelope schema version (spec §6: "version this envelope so
/// future changes to the cache format can be detected and treated as
/// miss").
const CACHE_ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    /// Only headers the caller marks cacheable participate in the
    /// fingerprint and get persisted; everything else (auth tokens, etc.)
    /// never touches the cache key or the stored envelope.
    pub cacheable_headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub replace_cache: bool,
    pub cacheable: bool,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Request {
            method: Method::GET,
            url,
            cacheable_headers: Vec::new(),
            body: None,
            replace_cache: false,
            cacheable: true,
        }
    }

    pub fn form_post(url: Url, body: Vec<u8>) -> Self {
        Request {
            method: Method::POST,
            url,
            cacheable_headers: vec![("content-type".into(), "application/x-www-form-urlencoded".into())],
            body: Some(body),
            replace_cache: false,
            cacheable: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub final_url: Url,
    pub fetched_at: DateTime<Utc>,
    pub from_cache: bool,
    pub redirects: Vec<Url>,
}

/// The on-disk shape of a cached [`Response`] (spec §6). Does not carry
/// `from_cache` — that's set to `true` by the reader, never stored.
#[derive(Debug, Serialize, Deserialize)]
struct CachedEnvelope {
    envelope_version: u32,
    status_code: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    final_url: Url,
    fetched_at: DateTime<Utc>,
    redirects: Vec<Url>,
}

/// Mirrors the state diagram in spec §4.B. Logged at each transition so the
/// retry trace in a `Transient` error is reconstructable from logs alone.
#[derive(Debug)]
enum FetchState {
    New,
    RateWait,
    Sent,
    Decoded { status: u16 },
    Retryable { reason: String },
    Backoff { attempt: u32, delay: Duration },
}

pub struct ScraperConfig {
    pub rate_limit_per_minute: u32,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub user_agent: String,
    pub throttle_patterns: Vec<Regex>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig {
            rate_limit_per_minute: 100,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 7,
            user_agent: concat!("cardharvest/", env!("CARGO_PKG_VERSION")).to_owned(),
            throttle_patterns: Vec::new(),
        }
    }
}

pub struct Scraper {
    client: reqwest::Client,
    store: BlobStore,
    limiter: RateLimiter,
    throttle_patterns: Vec<Regex>,
    max_retries: u32,
}

impl Scraper {
    pub fn new(config: ScraperConfig, store: BlobStore) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            // Every run gets a fresh connection pool; nothing is kept
            // silently open across invocations of the binary (spec §4.B).
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ScrapeError::Fatal(format!("building http client: {e}")))?;

        Ok(Scraper {
            client,
            store,
            limiter: RateLimiter::new(config.rate_limit_per_minute),
            throttle_patterns: config.throttle_patterns,
            max_retries: config.max_retries,
        })
    }

    fn cache_key(&self, req: &Request) -> String {
        let host = req.url.host_str().unwrap_or("unknown-host");
        let fp = fingerprint::compute(
            req.method.as_str(),
            &req.url,
            &req.cacheable_headers,
            req.body.as_deref(),
        );
        format!("scraper/{host}/{fp}")
    }

    /// Implements spec §4.B's `Fetch(ctx, req) -> Response`.
    pub async fn fetch(&self, ctx: &OpContext, req: Request) -> Result<Response, ScrapeError> {
        let key = self.cache_key(&req);
        let mut state = FetchState::New;
        tracing::debug!(?state, url = %req.url, "fetch starting");

        if !req.replace_cache {
            match self.store.read(&key).await {
                Ok(bytes) => match serde_json::from_slice::<CachedEnvelope>(&bytes) {
                    Ok(envelope) if envelope.envelope_version == CACHE_ENVELOPE_VERSION => {
                        tracing::debug!(url = %req.url, "cache hit");
                        return Ok(Response {
                            status_code: envelope.status_code,
                            headers: envelope.headers,
                            body: envelope.body,
                            final_url: envelope.final_url,
                            fetched_at: envelope.fetched_at,
                            from_cache: true,
                            redirects: envelope.redirects,
                        });
                    }
                    _ => {
                        tracing::debug!(url = %req.url, "cache entry stale or unreadable, refetching");
                    }
                },
                Err(BlobError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(error = %e, url = %req.url, "cache read failed, refetching");
                }
            }
        }

        let mut attempt: u32 = 0;
        let mut last_reason = String::new();

        loop {
            state = FetchState::RateWait;
            tracing::trace!(?state, attempt, url = %req.url);
            self.limiter.acquire(ctx).await?;

            state = FetchState::Sent;
            tracing::trace!(?state, attempt, url = %req.url);

            let sent_at = Utc::now();
            let outcome = ctx.race(self.send_once(&req)).await;
            let Some(outcome) = outcome else {
                return Err(ScrapeError::Cancelled);
            };

            match outcome {
                Err(network_err) => {
                    last_reason = network_err.clone();
                    state = FetchState::Retryable { reason: network_err };
                    tracing::debug!(?state, attempt, url = %req.url);
                }
                Ok((response, redirects)) => {
                    state = FetchState::Decoded {
                        status: response.status_code,
                    };
                    tracing::trace!(?state, attempt, url = %req.url);

                    let is_throttled = response.status_code < 300
                        && throttle::is_throttled(&self.throttle_patterns, &response.body);

                    if is_throttled {
                        last_reason = "silent throttle match".to_owned();
                        state = FetchState::Retryable {
                            reason: last_reason.clone(),
                        };
                        tracing::debug!(?state, attempt, url = %req.url);
                    } else if is_retryable_status(response.status_code) {
                        last_reason = format!("status {}", response.status_code);
                        state = FetchState::Retryable {
                            reason: last_reason.clone(),
                        };
                        tracing::debug!(?state, attempt, url = %req.url);
                    } else if is_fatal_status(response.status_code) {
                        return Err(ScrapeError::Fatal(format!(
                            "status {} (not retried)",
                            response.status_code
                        )));
                    } else {
                        let mut response = response;
                        response.fetched_at = sent_at;
                        response.redirects = redirects;

                        if req.cacheable && is_cacheable_status(response.status_code) {
                            if let Err(e) = self.cache_response(&key, &response).await {
                                tracing::warn!(error = %e, url = %req.url, "cache write failed, returning uncached response");
                            }
                        }
                        return Ok(response);
                    }
                }
            }

            if attempt >= self.max_retries {
                return Err(ScrapeError::Transient {
                    attempts: attempt + 1,
                    reason: last_reason,
                });
            }

            let delay = backoff_delay(attempt);
            attempt += 1;
            state = FetchState::Backoff { attempt, delay };
            tracing::debug!(?state, url = %req.url);
            if ctx.race(tokio::time::sleep(delay)).await.is_none() {
                return Err(ScrapeError::Cancelled);
            }
        }
    }

    async fn send_once(&self, req: &Request) -> Result<(Response, Vec<Url>), String> {
        let mut builder = self.client.request(req.method.clone(), req.url.clone());
        for (k, v) in &req.cacheable_headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await.map_err(|e| e.to_string())?;
        let final_url = resp.url().clone();
        let status_code = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_owned()))
            .collect();
        let body = resp.bytes().await.map_err(|e| e.to_string())?.to_vec();

        // reqwest follows redirects internally by default; the final_url
        // differing from the requested url is the observable trace.
        let redirects = if final_url == req.url {
            Vec::new()
        } else {
            vec![req.url.clone()]
        };

        Ok((
            Response {
                status_code,
                headers,
                body,
                final_url,
                fetched_at: Utc::now(),
                from_cache: false,
                redirects: Vec::new(),
            },
            redirects,
        ))
    }

    async fn cache_response(&self, key: &str, response: &Response) -> Result<(), BlobError> {
        let envelope = CachedEnvelope {
            envelope_version: CACHE_ENVELOPE_VERSION,
            status_code: response.status_code,
            headers: response.headers.clone(),
            body: response.body.clone(),
            final_url: response.final_url.clone(),
            fetched_at: response.fetched_at,
            redirects: response.redirects.clone(),
        };
        let bytes = serde_json::to_vec(&envelope).expect("CachedEnvelope always serializes");
        self.store.write(key, &bytes).await
    }
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}

/// 4xx other than 404/408/429 are never retried (spec §4.B). 404 is excluded
/// here so it falls through to the terminally-cacheable `Ok` branch below
/// instead of `ScrapeError::Fatal`, letting callers distinguish a genuine
/// "not found" from a fatal client error.
fn is_fatal_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 404 && status != 408 && status != 429
}

/// Non-2xx responses policy marks "terminally cacheable" (e.g. 404 on a
/// listing probe) are cached too, to avoid re-hammering a missing resource.
/// Transient statuses are never cached (spec §4.B).
fn is_cacheable_status(status: u16) -> bool {
    (200..300).contains(&status) || status == 404
}

fn backoff_delay(attempt: u32) -> Duration {
    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(240);
    let exp = BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(CAP);
    let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    capped.mul_f64(jitter_frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures_util::StreamExt;

    use crate::blobstore::memory_store;

    /// Returns the Nth (clamped) template on every call; lets a test drive a
    /// fixed sequence of statuses off one mount rather than relying on
    /// wiremock's mock-priority rules across overlapping registrations.
    struct SequencedResponder {
        calls: Arc<AtomicUsize>,
        templates: Vec<wiremock::ResponseTemplate>,
    }

    impl wiremock::Respond for SequencedResponder {
        fn respond(&self, _request: &wiremock::Request) -> wiremock::ResponseTemplate {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.templates[i.min(self.templates.len() - 1)].clone()
        }
    }

    #[tokio::test]
    async fn s3_429_then_200_retries_and_caches_only_the_final_response() {
        let mock_server = wiremock::MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(SequencedResponder {
                calls: calls.clone(),
                templates: vec![
                    wiremock::ResponseTemplate::new(429),
                    wiremock::ResponseTemplate::new(429),
                    wiremock::ResponseTemplate::new(200).set_body_string("deck page"),
                ],
            })
            .mount(&mock_server)
            .await;

        let store = memory_store();
        let config = ScraperConfig {
            max_retries: 5,
            ..ScraperConfig::default()
        };
        let scraper = Scraper::new(config, store.clone()).unwrap();
        let ctx = OpContext::new();
        let url = Url::parse(&mock_server.uri()).unwrap();

        let response = scraper.fetch(&ctx, Request::get(url.clone())).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"deck page");
        assert!(!response.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "two 429s then the 200");

        // Invariant 3: a second Fetch with replace_cache=false is a pure
        // cache hit, no further network calls, structurally equal response.
        let cached = scraper.fetch(&ctx, Request::get(url)).await.unwrap();
        assert_eq!(cached.status_code, response.status_code);
        assert_eq!(cached.body, response.body);
        assert!(cached.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "cache hit issues no network call");
    }

    #[tokio::test]
    async fn s4_silent_throttle_body_is_never_cached() {
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("You have been Temporarily Blocked"))
            .mount(&mock_server)
            .await;

        let store = memory_store();
        let config = ScraperConfig {
            max_retries: 1,
            throttle_patterns: throttle::compile_patterns(&["(?i)temporarily blocked".to_string()]).unwrap(),
            ..ScraperConfig::default()
        };
        let scraper = Scraper::new(config, store.clone()).unwrap();
        let ctx = OpContext::new();
        let url = Url::parse(&mock_server.uri()).unwrap();

        let err = scraper.fetch(&ctx, Request::get(url)).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Transient { .. }));

        let keys: Vec<_> = store
            .list("scraper/")
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(keys.is_empty(), "throttled body must never reach the cache");
    }

    #[tokio::test]
    async fn non_retried_4xx_is_fatal_and_uncached() {
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let store = memory_store();
        let scraper = Scraper::new(ScraperConfig::default(), store.clone()).unwrap();
        let ctx = OpContext::new();
        let url = Url::parse(&mock_server.uri()).unwrap();

        let err = scraper.fetch(&ctx, Request::get(url)).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Fatal(_)));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(408));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn fatal_statuses_exclude_404_408_429() {
        assert!(is_fatal_status(400));
        assert!(is_fatal_status(403));
        assert!(!is_fatal_status(404));
        assert!(!is_fatal_status(408));
        assert!(!is_fatal_status(429));
        assert!(!is_fatal_status(500));
    }

    #[test]
    fn cacheable_statuses() {
        assert!(is_cacheable_status(200));
        assert!(is_cacheable_status(404));
        assert!(!is_cacheable_status(500));
        assert!(!is_cacheable_status(429));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let d0 = backoff_delay(0);
        assert!(d0 <= Duration::from_secs(1));
        let d10 = backoff_delay(10);
        assert!(d10 <= Duration::from_secs(240));
    }
}
