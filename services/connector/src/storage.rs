use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::ConnectorError;

/// Narrow interface to the downstream object store. The extraction pipeline
/// reads what we write here; everything past the etag is its business.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, returning its etag.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ConnectorError>;

    /// Remove an object. Removing a missing object is not an error.
    async fn remove(&self, bucket: &str, key: &str) -> Result<(), ConnectorError>;
}

/// Filesystem-backed store, the default when no blob store is configured.
/// Objects land under `<root>/<bucket>/<key>`; the etag is the content's
/// SHA-256 hex digest.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, ConnectorError> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConnectorError::Storage(format!("mkdir {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ConnectorError::Storage(format!("write {}: {e}", path.display())))?;

        Ok(content_digest(bytes))
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), ConnectorError> {
        let path = self.object_path(bucket, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConnectorError::Storage(format!(
                "remove {}: {e}",
                path.display()
            ))),
        }
    }
}

/// SHA-256 hex digest, used both as the store etag and as the
/// downloaded-content checksum.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_and_returns_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(dir.path());

        let etag = store
            .put("kb", "connectors/1/thread-a", b"hello", "text/markdown")
            .await
            .expect("put");

        assert_eq!(etag, content_digest(b"hello"));
        let written = std::fs::read(dir.path().join("kb/connectors/1/thread-a")).expect("read");
        assert_eq!(written, b"hello");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(dir.path());

        store
            .put("kb", "doc", b"x", "text/plain")
            .await
            .expect("put");
        store.remove("kb", "doc").await.expect("first remove");
        store.remove("kb", "doc").await.expect("second remove");
    }
}
