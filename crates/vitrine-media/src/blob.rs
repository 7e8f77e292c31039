//! Blob storage seam for published media.
//!
//! Successfully published media is public-read with cache-control metadata
//! applied at write time. Keys are token-addressed and deterministic, so
//! re-processing a token overwrites its objects in place.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Cache-control applied to every published object.
pub const MEDIA_CACHE_CONTROL: &str = "public, max-age=86400";

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store bytes under `key` and return the public URL.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Remove the object at `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed store: objects land under a root directory and are
/// served from a configured public base URL (e.g. by a CDN or static file
/// server fronting the directory).
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        // Keys are slash-separated; map them onto the directory tree.
        self.root.join(key.trim_start_matches('/'))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating blob dir {}", parent.display()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("writing blob {}", path.display()))?;

        tracing::debug!(
            target: "vitrine_media::blob",
            key,
            content_type,
            size = bytes.len(),
            cache_control = MEDIA_CACHE_CONTROL,
            "stored blob"
        );
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("deleting blob {}", path.display())),
        }
    }
}

/// Object stored by [`MemoryBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-memory store for tests and dry runs.
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    base_url: String,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            base_url: "memory://media".to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("{}/{}", self.base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        let url = store
            .put("media/ethereum/0xabc-42", b"png-bytes".to_vec(), "image/png")
            .await
            .unwrap();
        assert!(url.ends_with("media/ethereum/0xabc-42"));

        let object = store.get("media/ethereum/0xabc-42").unwrap();
        assert_eq!(object.bytes, b"png-bytes");
        assert_eq!(object.content_type, "image/png");

        store.delete("media/ethereum/0xabc-42").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_fs_store_writes_and_deletes() {
        let dir = std::env::temp_dir().join(format!("vitrine-blob-test-{}", std::process::id()));
        let store = FsBlobStore::new(&dir, "https://media.test");

        let url = store
            .put("media/a/b.png", b"bytes".to_vec(), "image/png")
            .await
            .unwrap();
        assert_eq!(url, "https://media.test/media/a/b.png");
        assert_eq!(tokio::fs::read(dir.join("media/a/b.png")).await.unwrap(), b"bytes");

        store.delete("media/a/b.png").await.unwrap();
        // Deleting again is a no-op.
        store.delete("media/a/b.png").await.unwrap();

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
