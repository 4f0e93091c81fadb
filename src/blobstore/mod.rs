//! Content-addressed-by-key KV over a filesystem or S3-like backend, with
//! transparent compression and an optional hot read cache (spec §4.A).
//!
//! Backends are provided by the `object_store` crate, which already gives us
//! atomic puts (temp-file + rename for local disk, native atomic PUT for
//! S3), so this module's own job is narrower: own the key namespace, apply
//! the zstd envelope from [`compress`], and front reads through an optional
//! [`hotcache::HotCache`].

pub mod compress;
pub mod hotcache;

use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use object_store::{aws::AmazonS3Builder, local::LocalFileSystem, path::Path as ObjPath, ObjectStore};
use url::Url;

use crate::error::{BlobError, ConfigError};
use hotcache::HotCache;

/// Durable, content-agnostic KV (spec §4.A). Cheap to clone: the backend and
/// hot cache are both held behind `Arc`.
#[derive(Clone)]
pub struct BlobStore {
    backend: Arc<dyn ObjectStore>,
    hot_cache: Option<Arc<dyn HotCache>>,
}

impl BlobStore {
    pub fn new(backend: Arc<dyn ObjectStore>, hot_cache: Option<Arc<dyn HotCache>>) -> Self {
        BlobStore { backend, hot_cache }
    }

    /// Writes are all-or-nothing from readers' perspective: `object_store`'s
    /// backends already guarantee atomic visibility under the final key, so
    /// we only need to add the compression envelope on top.
    pub async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let encoded = compress::encode(bytes)?;
        let path = ObjPath::from(key);
        self.backend
            .put(&path, encoded.clone().into())
            .await
            .map_err(BlobError::Backend)?;
        if let Some(cache) = &self.hot_cache {
            cache.put(key, &encoded).await;
        }
        Ok(())
    }

    /// Decompresses on the fly; returns [`BlobError::Corrupt`] if the
    /// payload fails its envelope check.
    pub async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        if let Some(cache) = &self.hot_cache {
            if let Some(cached) = cache.get(key).await {
                return compress::decode(key, &cached);
            }
        }

        let path = ObjPath::from(key);
        let get_result = self.backend.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => BlobError::NotFound(key.to_owned()),
            other => BlobError::Backend(other),
        })?;
        let bytes = get_result.bytes().await.map_err(BlobError::Backend)?;

        if let Some(cache) = &self.hot_cache {
            cache.put(key, &bytes).await;
        }

        compress::decode(key, &bytes)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = ObjPath::from(key);
        match self.backend.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(other) => Err(BlobError::Backend(other)),
        }
    }

    /// A finite, non-restartable sequence of keys under `prefix` (spec
    /// §4.A: "lazy sequence of keys ... not restartable after underlying
    /// store mutation").
    pub fn list<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<String, BlobError>> {
        let prefix_path = ObjPath::from(prefix);
        self.backend
            .list(Some(&prefix_path))
            .map(|res| res.map(|meta| meta.location.to_string()).map_err(BlobError::Backend))
            .boxed()
    }

    pub async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = ObjPath::from(key);
        match self.backend.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(other) => Err(BlobError::Backend(other)),
        }
    }

    /// Releases the hot cache's background resources. Part of the
    /// orchestrator's shutdown sequence (spec §4.E, §5).
    pub async fn close(&self) {
        if let Some(cache) = &self.hot_cache {
            cache.close().await;
        }
    }
}

/// Dispatch on URL scheme to build the backend behind a [`BlobStore`] (spec
/// §6: `--bucket <url>` is `file://…` or `s3://…`).
pub fn open_backend(url: &Url) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    match url.scheme() {
        "file" => {
            let path = url.path();
            std::fs::create_dir_all(path).map_err(|e| ConfigError::InvalidBucketUrl(e.to_string()))?;
            let fs = LocalFileSystem::new_with_prefix(path)
                .map_err(|e| ConfigError::InvalidBucketUrl(e.to_string()))?;
            Ok(Arc::new(fs))
        }
        "s3" => {
            let bucket = url
                .host_str()
                .ok_or_else(|| ConfigError::InvalidBucketUrl("missing bucket in s3:// url".into()))?;
            let s3 = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| ConfigError::InvalidBucketUrl(e.to_string()))?;
            Ok(Arc::new(s3))
        }
        other => Err(ConfigError::InvalidBucketUrl(format!(
            "unsupported scheme: {other}"
        ))),
    }
}

/// Helper used by tests and by any caller that wants an in-memory-backed
/// instance without touching disk.
#[cfg(test)]
pub fn memory_store() -> BlobStore {
    BlobStore::new(Arc::new(object_store::memory::InMemory::new()), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = memory_store();
        store.write("games/magic/mtgtop8/collections/1.json", b"hello").await.unwrap();
        let read = store.read("games/magic/mtgtop8/collections/1.json").await.unwrap();
        assert_eq!(read, b"hello");
    }

    #[tokio::test]
    async fn read_missing_key_is_not_found() {
        let store = memory_store();
        let err = store.read("nope").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn exists_reflects_writes() {
        let store = memory_store();
        assert!(!store.exists("k").await.unwrap());
        store.write("k", b"v").await.unwrap();
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = memory_store();
        store.write("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_keys_under_prefix() {
        let store = memory_store();
        store.write("games/magic/mtgtop8/collections/1.json", b"a").await.unwrap();
        store.write("games/magic/mtgtop8/collections/2.json", b"b").await.unwrap();
        store.write("games/magic/goldfish/collections/1.json", b"c").await.unwrap();

        let keys: Vec<_> = store
            .list("games/magic/mtgtop8/")
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_payload_is_reported() {
        let store = memory_store();
        let path = ObjPath::from("bad");
        store.backend.put(&path, vec![0xFFu8; 4].into()).await.unwrap();
        let err = store.read("bad").await.unwrap_err();
        assert!(matches!(err, BlobError::Corrupt { .. }));
    }
}
