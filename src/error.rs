//! Crate-wide error taxonomy (spec §7).
//!
//! Each kind carries the retry/skip/abort policy in its name rather than in
//! a separate lookup table: callers match on the variant and already know
//! what to do with it.

use thiserror::Error;

/// Errors surfaced by the [`crate::blobstore`] layer.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("corrupt payload at {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("backend error: {0}")]
    Backend(#[from] object_store::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the [`crate::scraper`] layer. `Transient` is the only
/// variant the retry loop inside `Scraper::fetch` ever re-attempts; by the
/// time any other variant reaches a caller, retries are exhausted or moot.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("transient failure after {attempts} attempt(s): {reason}")]
    Transient { attempts: u32, reason: String },
    #[error("cancelled")]
    Cancelled,
    #[error("fatal: {0}")]
    Fatal(String),
    #[error(transparent)]
    Store(#[from] BlobError),
}

/// A parsed structure that violates the invariants in spec §3.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid collection: {0}")]
    InvalidCollection(String),
}

/// The per-extractor error taxonomy from spec §7, one variant per row of the
/// table. `NotFound` and `ParseFailure` are skip-and-count, never abort;
/// `StorageError`/`Cancelled` abort the run after the current worker
/// unwinds.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Transient(#[from] ScrapeError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("parse failure: {0}")]
    ParseFailure(String),
    #[error(transparent)]
    InvalidCollection(#[from] ModelError),
    #[error(transparent)]
    StorageError(#[from] BlobError),
    #[error("cancelled")]
    Cancelled,
}

/// User input that is nonsensical. Fails before any I/O per spec §7.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid --bucket url: {0}")]
    InvalidBucketUrl(String),
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ExtractError {
    /// True for the kinds that should abort the whole extraction run instead
    /// of being logged and counted as a miss (spec §7, §9).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractError::StorageError(_) | ExtractError::Cancelled
        )
    }
}
