//! Sharded-directory filesystem blob store: shard by the first two hex characters of the
//! key, write via a temp-file-then-rename for atomicity, and keep a small JSON sidecar
//! per blob for the metadata the CAS layer needs to reconstruct node semantics on read.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use tangled_common::digest::compute_key;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub content_type: String,
    pub size: u64,
    /// For an inline file (`content_type == CONTENT_TYPE_INLINE_FILE`), the logical
    /// content type the caller declared for the file — carried as metadata alongside the
    /// dispatch label per spec §4.B rather than folded into it. `None` for a plain chunk,
    /// file manifest, or collection manifest.
    #[serde(default)]
    pub logical_content_type: Option<String>,
}

pub struct PutResult {
    pub size: u64,
    pub is_new: bool,
}

pub struct HashMismatch {
    pub expected: String,
    pub actual: String,
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, AppError>;
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, BlobMetadata)>, AppError>;
    async fn put_with_key(
        &self,
        expected_key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Result<PutResult, HashMismatch>, AppError>;
    /// Rewrites a blob's metadata sidecar in place, without touching its bytes. Used by
    /// the commit admitter to relabel a plain chunk already uploaded via `/chunk/{key}`
    /// as an inline file once it learns the chunk is in fact a whole file's content.
    async fn retag(
        &self,
        key: &str,
        content_type: &str,
        logical_content_type: Option<String>,
    ) -> Result<(), AppError>;
}

/// Filesystem-backed `BlobStore`. Blobs live at `<root>/<key[7..9]>/<key>`; the sidecar
/// metadata file sits alongside at `<key>.meta.json`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        let hex_part = key.split_once(':').map(|(_, h)| h).unwrap_or(key);
        let shard = if hex_part.len() >= 2 { &hex_part[0..2] } else { "00" };
        self.root.join(shard)
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(sanitize(key))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.shard_dir(key).join(format!("{}.meta.json", sanitize(key)))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), AppError> {
        let dir = path.parent().expect("blob path always has a parent");
        fs::create_dir_all(dir).await?;

        let tmp_path = dir.join(format!(".{}.tmp-{}", path.file_name().unwrap().to_string_lossy(), uuid::Uuid::new_v4()));
        {
            let mut f = fs::File::create(&tmp_path).await?;
            f.write_all(bytes).await?;
            f.flush().await?;
        }
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

fn sanitize(key: &str) -> String {
    key.replace(':', "_")
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        Ok(fs::metadata(self.blob_path(key)).await.is_ok())
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, BlobMetadata)>, AppError> {
        let blob_path = self.blob_path(key);
        let bytes = match fs::read(&blob_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta_path = self.meta_path(key);
        let metadata = match fs::read(&meta_path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt blob sidecar for {key}: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BlobMetadata {
                content_type: "application/octet-stream".to_string(),
                size: bytes.len() as u64,
                logical_content_type: None,
            },
            Err(e) => return Err(e.into()),
        };

        Ok(Some((bytes, metadata)))
    }

    async fn put_with_key(
        &self,
        expected_key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Result<PutResult, HashMismatch>, AppError> {
        let actual_key = compute_key(bytes);
        if actual_key != expected_key {
            return Ok(Err(HashMismatch {
                expected: expected_key.to_string(),
                actual: actual_key,
            }));
        }

        let already_existed = self.exists(expected_key).await?;
        if !already_existed {
            self.write_atomic(&self.blob_path(expected_key), bytes).await?;
            let metadata = BlobMetadata {
                content_type: content_type.to_string(),
                size: bytes.len() as u64,
                logical_content_type: None,
            };
            let meta_bytes = serde_json::to_vec(&metadata)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode blob sidecar: {e}")))?;
            self.write_atomic(&self.meta_path(expected_key), &meta_bytes).await?;
        }

        Ok(Ok(PutResult {
            size: bytes.len() as u64,
            is_new: !already_existed,
        }))
    }

    async fn retag(&self, key: &str, content_type: &str, logical_content_type: Option<String>) -> Result<(), AppError> {
        let Some((bytes, _)) = self.get(key).await? else {
            return Err(AppError::Internal(anyhow::anyhow!("cannot retag missing blob {key}")));
        };
        let metadata = BlobMetadata {
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            logical_content_type,
        };
        let meta_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode blob sidecar: {e}")))?;
        self.write_atomic(&self.meta_path(key), &meta_bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let bytes = b"hello world";
        let key = compute_key(bytes);

        let result = store.put_with_key(&key, bytes, "text/plain").await.unwrap().unwrap();
        assert!(result.is_new);
        assert_eq!(result.size, bytes.len() as u64);

        let (fetched, meta) = store.get(&key).await.unwrap().unwrap();
        assert_eq!(fetched, bytes);
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.size, bytes.len() as u64);
    }

    #[tokio::test]
    async fn put_is_idempotent_on_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let bytes = b"same content";
        let key = compute_key(bytes);

        let first = store.put_with_key(&key, bytes, "text/plain").await.unwrap().unwrap();
        assert!(first.is_new);
        let second = store.put_with_key(&key, bytes, "text/plain").await.unwrap().unwrap();
        assert!(!second.is_new);
    }

    #[tokio::test]
    async fn put_with_wrong_key_reports_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let bytes = b"some bytes";
        let wrong_key = "sha256:0000000000000000000000000000000000000000000000000000000000000000";
        let result = store.put_with_key(wrong_key, bytes, "text/plain").await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let result = store
            .get("sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
