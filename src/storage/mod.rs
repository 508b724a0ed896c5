pub mod paths;

use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Filesystem blob store. Keys are relative slash-separated paths such as
/// `events/{id}/photos/{id}/original.jpg`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its location on disk, rejecting anything that could
    /// escape the root.
    pub fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    pub async fn put(&self, key: &str, data: &[u8]) -> AppResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling temp file first so readers never see a torn blob.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::now_v7()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Stored blob {} ({} bytes)", key, data.len());
        Ok(())
    }

    pub async fn get(&self, key: &str) -> AppResult<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Remove a blob. Removing a missing blob is not an error.
    pub async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of several blobs; failures are logged.
    pub async fn delete_all(&self, keys: &[&str]) {
        for key in keys {
            if let Err(e) = self.delete(key).await {
                tracing::warn!("Failed to delete blob {}: {}", key, e);
            }
        }
    }
}

fn validate_key(key: &str) -> AppResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");

    if invalid {
        return Err(AppError::BadRequest(format!("Invalid blob path: {}", key)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::new(tmp.path());

        store.put("events/e1/cover.webp", b"cover").await.unwrap();
        assert!(store.exists("events/e1/cover.webp").await.unwrap());
        assert_eq!(
            store.get("events/e1/cover.webp").await.unwrap(),
            Bytes::from_static(b"cover")
        );

        store.put("events/e1/cover.webp", b"newer").await.unwrap();
        assert_eq!(
            store.get("events/e1/cover.webp").await.unwrap(),
            Bytes::from_static(b"newer")
        );

        store.delete("events/e1/cover.webp").await.unwrap();
        assert!(!store.exists("events/e1/cover.webp").await.unwrap());
        store.delete("events/e1/cover.webp").await.unwrap();
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::new(tmp.path());
        assert!(matches!(
            store.get("events/none/cover.webp").await,
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let store = BlobStore::new("/srv/blobs");
        for key in ["", "/etc/passwd", "events/../secret", "events//x", "a\\b", "./x"] {
            assert!(store.path_for(key).is_err(), "accepted {:?}", key);
        }
        assert_eq!(
            store.path_for("events/e1/cover.webp").unwrap(),
            PathBuf::from("/srv/blobs/events/e1/cover.webp")
        );
    }
}
