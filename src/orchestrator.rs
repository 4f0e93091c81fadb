//! Wires configuration, the shared [`BlobStore`]/[`Scraper`], and the
//! [`Registry`] together, and owns the run's [`OpContext`] and shutdown
//! sequence (spec §4.E).

use std::sync::Arc;

use futures_util::StreamExt;

use crate::blobstore::{hotcache::SledHotCache, open_backend, BlobStore};
use crate::config::{Config, ExtractCommand, ExtractOpts};
use crate::context::OpContext;
use crate::error::ConfigError;
use crate::extractors::pipeline::RunSummary;
use crate::extractors::Registry;
use crate::model::Collection;
use crate::net::{Scraper, ScraperConfig};

/// Exit-code policy from spec §6: `0` success, `1` partial (misses below a
/// threshold still counted as success, but non-zero so automation can
/// notice), `2` fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    PartialFailure,
    Fatal,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::PartialFailure => 1,
            Outcome::Fatal => 2,
        }
    }
}

/// Above this fraction of misses (`missed + errored` over `fetched`), a
/// completed run is still "success" but reported as partial (spec §6, §7).
const PARTIAL_FAILURE_THRESHOLD: f64 = 0.0;

pub struct Orchestrator {
    registry: Registry,
    store: BlobStore,
    scraper: Scraper,
}

impl Orchestrator {
    pub async fn build(config: &Config) -> Result<Self, ConfigError> {
        let backend = open_backend(&config.bucket_url)?;

        let hot_cache = match &config.cache_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| ConfigError::InvalidValue {
                    field: "cache",
                    reason: e.to_string(),
                })?;
                const HOT_CACHE_MAX_BYTES: u64 = 256 * 1024 * 1024;
                let cache = SledHotCache::open(dir, HOT_CACHE_MAX_BYTES).map_err(|e| ConfigError::InvalidValue {
                    field: "cache",
                    reason: e.to_string(),
                })?;
                Some(cache as Arc<dyn crate::blobstore::hotcache::HotCache>)
            }
            None => None,
        };

        let store = BlobStore::new(backend, hot_cache);
        let scraper_config = ScraperConfig {
            rate_limit_per_minute: config.scraper.rate_limit_per_minute,
            timeout: config.scraper.timeout,
            connect_timeout: config.scraper.connect_timeout,
            max_retries: config.scraper.max_retries,
            user_agent: config.scraper.user_agent.clone(),
            throttle_patterns: config.scraper.throttle_patterns.clone(),
        };
        let scraper = Scraper::new(scraper_config, store.clone()).map_err(|e| ConfigError::InvalidValue {
            field: "scraper",
            reason: e.to_string(),
        })?;

        Ok(Orchestrator {
            registry: Registry::new(),
            store,
            scraper,
        })
    }

    /// Drives the whole `<tool> ... extract|iterate` invocation named by
    /// `config.command`, including the end-of-run summary log and the exit
    /// code the caller should use (spec §6, §7).
    pub async fn run(&self, ctx: &OpContext, config: Config) -> Outcome {
        ctx.spawn_signal_handler();

        let outcome = match config.command {
            ExtractCommand::Extract { dataset, opts } => self.run_extract(ctx, &dataset, &opts).await,
            ExtractCommand::Iterate { dataset } => self.run_iterate(ctx, &dataset).await,
        };

        self.store.close().await;
        outcome
    }

    async fn run_extract(&self, ctx: &OpContext, dataset: &str, opts: &ExtractOpts) -> Outcome {
        let Some(extractor) = self.registry.get(dataset) else {
            tracing::error!(dataset, "unknown dataset");
            return Outcome::Fatal;
        };

        match extractor.extract(ctx, &self.scraper, &self.store, opts).await {
            Ok(summary) => {
                log_summary(dataset, &summary);
                if ctx.is_cancelled() {
                    Outcome::Fatal
                } else if is_partial(&summary) {
                    Outcome::PartialFailure
                } else {
                    Outcome::Success
                }
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(dataset, error = %e, "extraction aborted");
                Outcome::Fatal
            }
            Err(e) => {
                tracing::error!(dataset, error = %e, "extraction failed");
                Outcome::Fatal
            }
        }
    }

    async fn run_iterate(&self, ctx: &OpContext, dataset: &str) -> Outcome {
        let Some(extractor) = self.registry.get(dataset) else {
            tracing::error!(dataset, "unknown dataset");
            return Outcome::Fatal;
        };

        let mut stream = extractor.iterate(&self.store);
        let mut errored = false;
        while let Some(item) = stream.next().await {
            if ctx.is_cancelled() {
                return Outcome::Fatal;
            }
            match item {
                Ok(collection) => print_collection_line(&collection),
                Err(e) => {
                    tracing::warn!(dataset, error = %e, "skipping unreadable entry");
                    errored = true;
                }
            }
        }

        if errored {
            Outcome::PartialFailure
        } else {
            Outcome::Success
        }
    }
}

fn print_collection_line(collection: &Collection) {
    match serde_json::to_string(collection) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to serialize collection for iterate output"),
    }
}

fn is_partial(summary: &RunSummary) -> bool {
    let misses = (summary.missed + summary.errored) as f64;
    let total = summary.fetched.max(1) as f64;
    misses / total > PARTIAL_FAILURE_THRESHOLD
}

fn log_summary(dataset: &str, summary: &RunSummary) {
    tracing::info!(
        dataset,
        fetched = summary.fetched,
        cached = summary.cached,
        parsed = summary.parsed,
        persisted = summary.persisted,
        missed = summary.missed,
        errored = summary.errored,
        "extraction finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_run_has_no_partial_failure() {
        let summary = RunSummary {
            fetched: 10,
            cached: 0,
            parsed: 10,
            persisted: 10,
            missed: 0,
            errored: 0,
        };
        assert!(!is_partial(&summary));
    }

    #[test]
    fn any_miss_counts_as_partial() {
        let summary = RunSummary {
            fetched: 10,
            cached: 0,
            parsed: 9,
            persisted: 9,
            missed: 1,
            errored: 0,
        };
        assert!(is_partial(&summary));
    }

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(Outcome::Success.exit_code(), 0);
        assert_eq!(Outcome::PartialFailure.exit_code(), 1);
        assert_eq!(Outcome::Fatal.exit_code(), 2);
    }
}
