//! CLI parsing (spec §6) plus environment variable overlay, validated into a
//! typed [`Config`] before any I/O — a `ConfigError` must fail fast, never
//! after a partial run has started (spec §7).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use url::Url;

use crate::error::ConfigError;
use crate::net::ScraperConfig;

/// `<tool> --bucket <url> [--cache <dir>] [--log <level>] <command>` (spec
/// §6). `HTTP_PROXY`/`HTTPS_PROXY` are honoured automatically: `reqwest`
/// detects them from the environment unless proxying is explicitly
/// disabled, so this crate never has to parse them itself.
#[derive(Parser, Debug)]
#[command(name = "cardharvest", version, about = "Multi-site CCG card and deck data harvester")]
pub struct Cli {
    /// URL selecting a BlobStore backend (`file://…` or `s3://…`).
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Enables the optional hot cache at this directory.
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`). Overridden by
    /// `RUST_LOG` if that's set.
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl `dataset` and persist Collections into the BlobStore.
    Extract {
        /// The extractor's `{source}` slug, e.g. `mtgtop8`.
        dataset: String,
        #[arg(long, default_value_t = 1)]
        pages: u32,
        #[arg(long, default_value_t = 1)]
        start: u32,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = 8)]
        parallel: usize,
        /// Overwrite existing keys instead of skipping them.
        #[arg(long)]
        replace: bool,
        /// Force re-fetch even for cached HTTP responses.
        #[arg(long)]
        reparse: bool,
        /// Extract exactly these URLs, bypassing the listing stage.
        #[arg(long = "only")]
        only: Vec<String>,
        #[arg(long)]
        section: Option<String>,
    },
    /// Stream previously persisted Collections of `dataset` to stdout.
    Iterate { dataset: String },
}

/// The fully validated runtime configuration. Constructing one cannot fail
/// silently: every field here has already been checked against spec §7's
/// `ConfigError` before the orchestrator touches the network or disk.
pub struct Config {
    pub bucket_url: Url,
    pub cache_dir: Option<PathBuf>,
    pub log_level: String,
    pub scraper: ScraperConfig,
    pub command: ExtractCommand,
}

pub enum ExtractCommand {
    Extract {
        dataset: String,
        opts: ExtractOpts,
    },
    Iterate {
        dataset: String,
    },
}

#[derive(Debug, Clone)]
pub struct ExtractOpts {
    pub pages: u32,
    pub start: u32,
    pub limit: Option<u32>,
    pub parallel: usize,
    pub replace: bool,
    pub reparse: bool,
    pub only: Vec<Url>,
    pub section: Option<String>,
}

/// Default `--bucket` when the user doesn't pass one: a `file://` store
/// rooted at the platform cache directory, mirroring the teacher's own
/// `dirs::cache_dir()` default-path convention.
fn default_bucket_url() -> Result<Url, ConfigError> {
    let mut dir = dirs::cache_dir().ok_or_else(|| {
        ConfigError::InvalidValue {
            field: "bucket",
            reason: "no platform cache directory available; pass --bucket explicitly".into(),
        }
    })?;
    dir.push("cardharvest");
    dir.push("data");
    Url::from_directory_path(&dir).map_err(|_| ConfigError::InvalidBucketUrl(dir.display().to_string()))
}

pub fn parse_config(cli: Cli) -> Result<Config, ConfigError> {
    let bucket_url = match cli.bucket {
        Some(s) => Url::parse(&s).map_err(|e| ConfigError::InvalidBucketUrl(e.to_string()))?,
        None => default_bucket_url()?,
    };

    let rate_limit_per_minute = std::env::var("SCRAPER_RATE_LIMIT")
        .ok()
        .map(|v| {
            v.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                field: "SCRAPER_RATE_LIMIT",
                reason: format!("{v:?} is not a positive integer"),
            })
        })
        .transpose()?
        .unwrap_or(100);

    let timeout = std::env::var("SCRAPER_TIMEOUT")
        .ok()
        .map(|v| parse_duration(&v))
        .transpose()?
        .unwrap_or(Duration::from_secs(30));

    let scraper = ScraperConfig {
        rate_limit_per_minute,
        timeout,
        ..ScraperConfig::default()
    };

    let command = match cli.command {
        Command::Extract {
            dataset,
            pages,
            start,
            limit,
            parallel,
            replace,
            reparse,
            only,
            section,
        } => {
            if pages == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "pages",
                    reason: "must be at least 1".into(),
                });
            }
            if parallel == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "parallel",
                    reason: "must be at least 1".into(),
                });
            }
            let only = only
                .into_iter()
                .map(|s| Url::parse(&s).map_err(|e| ConfigError::InvalidValue {
                    field: "only",
                    reason: format!("{s:?}: {e}"),
                }))
                .collect::<Result<Vec<_>, _>>()?;

            ExtractCommand::Extract {
                dataset,
                opts: ExtractOpts {
                    pages,
                    start,
                    limit,
                    parallel,
                    replace,
                    reparse,
                    only,
                    section,
                },
            }
        }
        Command::Iterate { dataset } => ExtractCommand::Iterate { dataset },
    };

    Ok(Config {
        bucket_url,
        cache_dir: cli.cache,
        log_level: cli.log,
        scraper,
        command,
    })
}

/// Parses `"30s"`, `"2m"`, `"1h"`, or a bare integer number of seconds.
fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let bad = || ConfigError::InvalidValue {
        field: "SCRAPER_TIMEOUT",
        reason: format!("{raw:?} is not a valid duration (e.g. \"30s\")"),
    };
    let raw = raw.trim();
    if let Some(n) = raw.strip_suffix('s') {
        Ok(Duration::from_secs(n.parse().map_err(|_| bad())?))
    } else if let Some(n) = raw.strip_suffix('m') {
        Ok(Duration::from_secs(n.parse::<u64>().map_err(|_| bad())? * 60))
    } else if let Some(n) = raw.strip_suffix('h') {
        Ok(Duration::from_secs(n.parse::<u64>().map_err(|_| bad())? * 3600))
    } else {
        Ok(Duration::from_secs(raw.parse().map_err(|_| bad())?))
    }
}
