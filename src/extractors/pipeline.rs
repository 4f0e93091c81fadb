//! The shared seed → list → detail → persist pipeline (spec §4.D), generic
//! over a per-site [`SiteAdapter`]. Stages 2–4 run on a bounded worker pool
//! (`opts.parallel`, default 8); the rate limiter inside [`Scraper`] is the
//! real throttle, the pool just bounds parser memory (spec §4.D, §5).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::blobstore::BlobStore;
use crate::config::ExtractOpts;
use crate::context::OpContext;
use crate::error::{ExtractError, ScrapeError};
use crate::model::{Collection, Game};
use crate::net::{Request, Response, Scraper};

/// Per-source counts for the end-of-run summary (spec §7).
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub fetched: usize,
    pub cached: usize,
    pub parsed: usize,
    pub persisted: usize,
    pub missed: usize,
    pub errored: usize,
}

#[derive(Default)]
struct Counters {
    fetched: AtomicUsize,
    cached: AtomicUsize,
    parsed: AtomicUsize,
    persisted: AtomicUsize,
    missed: AtomicUsize,
    errored: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> RunSummary {
        RunSummary {
            fetched: self.fetched.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            parsed: self.parsed.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
        }
    }
}

/// What a site module supplies; the pipeline drives the network calls and
/// the worker pool. Parsing functions are pure/sync so they're trivially
/// unit-testable against literal fixture bytes (spec §8's concrete
/// scenarios).
pub trait SiteAdapter: Send + Sync {
    fn game(&self) -> Game;
    fn source(&self) -> &'static str;

    /// `None` once `page` runs past whatever `opts` describes (e.g. a fixed
    /// single-listing site after page 1).
    fn listing_url(&self, opts: &ExtractOpts, page: u32) -> Option<Url>;

    /// Extract detail-page URLs from one listing page's body.
    fn parse_listing(&self, listing_url: &Url, body: &[u8]) -> Result<Vec<Url>, ExtractError>;

    /// Parse one detail page's response into a validated Collection.
    fn parse_detail(&self, detail_url: &Url, response: &Response) -> Result<Collection, ExtractError>;

    /// `games/{game}/{source}/collections/{id}.json` or `.../cards/{id}.json`
    /// (spec §4.D).
    fn output_key(&self, collection: &Collection) -> String;
}

pub async fn run(
    ctx: &OpContext,
    scraper: &Scraper,
    store: &BlobStore,
    opts: &ExtractOpts,
    adapter: &dyn SiteAdapter,
) -> Result<RunSummary, ExtractError> {
    let counters = Arc::new(Counters::default());

    let detail_urls = if !opts.only.is_empty() {
        opts.only.clone()
    } else {
        collect_detail_urls(ctx, scraper, opts, adapter, &counters).await?
    };

    let detail_urls = match opts.limit {
        Some(limit) => detail_urls.into_iter().take(limit as usize).collect(),
        None => detail_urls,
    };

    run_detail_stage(ctx, scraper, store, opts, adapter, detail_urls, &counters).await?;

    Ok(counters.snapshot())
}

/// Seed + List stages (spec §4.D steps 1–2). Returns the flattened,
/// pagination-bounded list of detail URLs.
async fn collect_detail_urls(
    ctx: &OpContext,
    scraper: &Scraper,
    opts: &ExtractOpts,
    adapter: &dyn SiteAdapter,
    counters: &Counters,
) -> Result<Vec<Url>, ExtractError> {
    let mut all_urls = Vec::new();

    for page in opts.start..opts.start + opts.pages {
        if ctx.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let Some(listing_url) = adapter.listing_url(opts, page) else {
            break;
        };

        let response = match scraper.fetch(ctx, Request::get(listing_url.clone())).await {
            Ok(resp) => resp,
            Err(ScrapeError::Cancelled) => return Err(ExtractError::Cancelled),
            Err(e) => return Err(ExtractError::Transient(e)),
        };
        counters.fetched.fetch_add(1, Ordering::Relaxed);
        if response.from_cache {
            counters.cached.fetch_add(1, Ordering::Relaxed);
        }

        if response.status_code == 404 {
            if page == 1 {
                return Err(ExtractError::NotFound(format!(
                    "listing page 1 returned 404: {listing_url}"
                )));
            }
            tracing::info!(page, "listing page 404, end of list");
            break;
        }

        let page_urls = adapter.parse_listing(&listing_url, &response.body)?;
        if page_urls.is_empty() && page > 1 {
            tracing::info!(page, "empty listing page, end of list");
            break;
        }

        all_urls.extend(page_urls);
    }

    Ok(all_urls)
}

/// Detail + Persist stages (spec §4.D steps 3–4) on a bounded worker pool
/// (step 5). A parser failure on one page never aborts the run (spec §5);
/// only `StorageError`/`Cancelled` do. Concurrency is a plain bounded
/// `for_each_concurrent` over the already-collected URL list rather than a
/// spawned task pool, so nothing here needs `'static` borrows of `scraper`
/// or `adapter`.
async fn run_detail_stage(
    ctx: &OpContext,
    scraper: &Scraper,
    store: &BlobStore,
    opts: &ExtractOpts,
    adapter: &dyn SiteAdapter,
    detail_urls: Vec<Url>,
    counters: &Counters,
) -> Result<(), ExtractError> {
    let fatal: AsyncMutex<Option<ExtractError>> = AsyncMutex::new(None);

    stream::iter(detail_urls)
        .for_each_concurrent(opts.parallel, |detail_url| async {
            if ctx.is_cancelled() || fatal.lock().await.is_some() {
                return;
            }

            match process_one(ctx, scraper, store, adapter, &detail_url, opts.replace, opts.reparse).await {
                Ok(Outcome::Persisted { from_cache }) => {
                    counters.fetched.fetch_add(1, Ordering::Relaxed);
                    if from_cache {
                        counters.cached.fetch_add(1, Ordering::Relaxed);
                    }
                    counters.parsed.fetch_add(1, Ordering::Relaxed);
                    counters.persisted.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Outcome::SkippedExisting { from_cache }) => {
                    counters.fetched.fetch_add(1, Ordering::Relaxed);
                    if from_cache {
                        counters.cached.fetch_add(1, Ordering::Relaxed);
                    }
                    counters.parsed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(url = %detail_url, error = %e, "fatal error, stopping extraction");
                    *fatal.lock().await = Some(e);
                }
                Err(e) => {
                    tracing::warn!(url = %detail_url, error = %e, "skipping detail page");
                    counters.missed.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
        .await;

    if let Some(err) = fatal.lock().await.take() {
        return Err(err);
    }
    if ctx.is_cancelled() {
        return Err(ExtractError::Cancelled);
    }
    Ok(())
}

enum Outcome {
    Persisted { from_cache: bool },
    SkippedExisting { from_cache: bool },
}

async fn process_one(
    ctx: &OpContext,
    scraper: &Scraper,
    store: &BlobStore,
    adapter: &dyn SiteAdapter,
    detail_url: &Url,
    replace: bool,
    reparse: bool,
) -> Result<Outcome, ExtractError> {
    let mut req = Request::get(detail_url.clone());
    req.replace_cache = reparse;

    let response = scraper.fetch(ctx, req).await.map_err(|e| match e {
        ScrapeError::Cancelled => ExtractError::Cancelled,
        other => ExtractError::Transient(other),
    })?;

    if response.status_code == 404 {
        return Err(ExtractError::NotFound(detail_url.to_string()));
    }

    let from_cache = response.from_cache;
    let collection = adapter.parse_detail(detail_url, &response)?;
    let key = adapter.output_key(&collection);

    if !replace && store.exists(&key).await.map_err(ExtractError::StorageError)? {
        return Ok(Outcome::SkippedExisting { from_cache });
    }

    let bytes = serde_json::to_vec(&collection).expect("Collection always serializes");
    store.write(&key, &bytes).await.map_err(ExtractError::StorageError)?;

    Ok(Outcome::Persisted { from_cache })
}

/// Shared `Iterate` implementation (spec §4.D): stream previously persisted
/// Collections of one `(game, source)` back to the caller.
pub fn iterate<'a>(store: &'a BlobStore, game: Game, source: &str) -> BoxStream<'a, Result<Collection, ExtractError>> {
    let collections_prefix = format!("games/{}/{}/collections/", game.as_str(), source);
    let cards_prefix = format!("games/{}/{}/cards/", game.as_str(), source);

    let collections = store.list(&collections_prefix);
    let cards = store.list(&cards_prefix);

    futures_util::stream::select(collections, cards)
        .then(move |key| async move {
            let key = key.map_err(ExtractError::StorageError)?;
            let bytes = store.read(&key).await.map_err(ExtractError::StorageError)?;
            serde_json::from_slice::<Collection>(&bytes)
                .map_err(|e| ExtractError::ParseFailure(format!("{key}: {e}")))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::memory_store;
    use crate::model::{CardFields, CollectionType, Strictness};
    use chrono::Utc;

    struct FixedAdapter;

    impl SiteAdapter for FixedAdapter {
        fn game(&self) -> Game {
            Game::Magic
        }
        fn source(&self) -> &'static str {
            "fixed"
        }
        fn listing_url(&self, opts: &ExtractOpts, page: u32) -> Option<Url> {
            if page < opts.start + opts.pages {
                Some(Url::parse(&format!("https://example.com/list?page={page}")).unwrap())
            } else {
                None
            }
        }
        fn parse_listing(&self, _listing_url: &Url, body: &[u8]) -> Result<Vec<Url>, ExtractError> {
            let text = String::from_utf8_lossy(body);
            Ok(text
                .lines()
                .filter(|l| !l.is_empty())
                .map(|l| Url::parse(l).unwrap())
                .collect())
        }
        fn parse_detail(&self, detail_url: &Url, _response: &Response) -> Result<Collection, ExtractError> {
            Collection::build(
                crate::model::ids::slugify(detail_url.as_str()),
                Game::Magic,
                "fixed".into(),
                detail_url.clone(),
                None,
                Utc::now(),
                CollectionType::Card(CardFields::default()),
                vec![],
                Default::default(),
                Strictness::Lenient,
            )
            .map_err(ExtractError::InvalidCollection)
        }
        fn output_key(&self, collection: &Collection) -> String {
            format!("games/magic/fixed/cards/{}.json", collection.id)
        }
    }

    #[test]
    fn adapter_pagination_boundary() {
        let adapter = FixedAdapter;
        let opts = ExtractOpts {
            pages: 2,
            start: 1,
            limit: None,
            parallel: 1,
            replace: false,
            reparse: false,
            only: vec![],
            section: None,
        };
        assert!(adapter.listing_url(&opts, 1).is_some());
        assert!(adapter.listing_url(&opts, 2).is_some());
        assert!(adapter.listing_url(&opts, 3).is_none());
    }

    #[tokio::test]
    async fn process_one_persists_then_skips_existing_without_replace() {
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/card/1"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let store = memory_store();
        let scraper = Scraper::new(crate::net::ScraperConfig::default(), store.clone()).unwrap();
        let adapter = FixedAdapter;
        let ctx = OpContext::new();
        let detail_url = Url::parse(&format!("{}/card/1", mock_server.uri())).unwrap();

        let first = process_one(&ctx, &scraper, &store, &adapter, &detail_url, false, false)
            .await
            .unwrap();
        assert!(matches!(first, Outcome::Persisted { from_cache: false }));

        let second = process_one(&ctx, &scraper, &store, &adapter, &detail_url, false, false)
            .await
            .unwrap();
        assert!(matches!(second, Outcome::SkippedExisting { from_cache: true }));
    }

    #[tokio::test]
    async fn process_one_reports_404_as_not_found() {
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/card/missing"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let store = memory_store();
        let scraper = Scraper::new(crate::net::ScraperConfig::default(), store.clone()).unwrap();
        let adapter = FixedAdapter;
        let ctx = OpContext::new();
        let detail_url = Url::parse(&format!("{}/card/missing", mock_server.uri())).unwrap();

        let err = process_one(&ctx, &scraper, &store, &adapter, &detail_url, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }

    #[tokio::test]
    async fn s5_rerun_detail_cache_hits_are_counted_as_cached() {
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/card/1"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let store = memory_store();
        let scraper = Scraper::new(crate::net::ScraperConfig::default(), store.clone()).unwrap();
        let adapter = FixedAdapter;
        let ctx = OpContext::new();
        let opts = ExtractOpts {
            pages: 1,
            start: 1,
            limit: None,
            parallel: 1,
            replace: false,
            reparse: false,
            only: vec![Url::parse(&format!("{}/card/1", mock_server.uri())).unwrap()],
            section: None,
        };
        let counters = Counters::default();
        let detail_urls = opts.only.clone();

        run_detail_stage(&ctx, &scraper, &store, &opts, &adapter, detail_urls.clone(), &counters)
            .await
            .unwrap();
        let first = counters.snapshot();
        assert_eq!(first.persisted, 1);
        assert_eq!(first.cached, 0);

        run_detail_stage(&ctx, &scraper, &store, &opts, &adapter, detail_urls, &counters)
            .await
            .unwrap();
        let second = counters.snapshot();
        assert_eq!(second.persisted, 1, "second run skips an already-persisted key");
        assert_eq!(second.cached, 1, "second run's detail fetch is a cache hit");
    }
}
