//! Media upload storage.
//!
//! Uploaded files land on disk under the configured upload directory and
//! are referenced by an opaque string (`/uploads/<uuid>.<ext>`). The chat
//! core stores that reference verbatim in image messages and never
//! interprets the bytes.

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

#[derive(Debug, Clone)]
pub struct MediaStore {
    base_path: PathBuf,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Store an uploaded file and return its opaque reference.
    ///
    /// The stored filename is a fresh UUID plus the (sanitized) extension
    /// of the original name, so client-supplied names never touch the
    /// filesystem.
    pub async fn store(&self, original_name: &str, data: &[u8]) -> Result<String, ServerError> {
        if data.is_empty() {
            return Err(ServerError::Upload("Empty upload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let name = match extension_of(original_name) {
            Some(ext) => format!("{id}.{ext}"),
            None => id.to_string(),
        };

        let path = self.base_path.join(&name);
        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to write upload {name}: {e}")))?;

        debug!(name = %name, size = data.len(), "Stored upload");
        Ok(format!("/uploads/{name}"))
    }

    /// Read back a stored upload by its filename component.
    pub async fn open(&self, name: &str) -> Result<Vec<u8>, ServerError> {
        if !is_safe_name(name) {
            return Err(ServerError::Validation("Invalid upload name".to_string()));
        }

        let path = self.base_path.join(name);
        if !path.exists() {
            return Err(ServerError::NotFound(format!("No upload named {name}")));
        }

        fs::read(&path)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to read upload {name}: {e}")))
    }
}

/// Alphanumeric extension of the original filename, lowercased, at most
/// eight characters. Anything else is discarded.
fn extension_of(name: &str) -> Option<String> {
    let ext = name.rsplit_once('.')?.1;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Reject anything that could escape the upload directory.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (MediaStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn store_and_read_back() {
        let (store, _dir) = store().await;

        let media_ref = store.store("photo.JPG", b"bytes").await.unwrap();
        assert!(media_ref.starts_with("/uploads/"));
        assert!(media_ref.ends_with(".jpg"));

        let name = media_ref.strip_prefix("/uploads/").unwrap();
        assert_eq!(store.open(name).await.unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn rejects_oversized_upload() {
        let (store, _dir) = store().await;
        let err = store.store("big.png", &[0u8; 2048]).await.unwrap_err();
        assert!(matches!(err, ServerError::UploadTooLarge { .. }));
    }

    #[tokio::test]
    async fn rejects_traversal_names() {
        let (store, _dir) = store().await;
        for name in ["../etc/passwd", ".hidden", "a/b.png", ""] {
            assert!(store.open(name).await.is_err(), "accepted {name:?}");
        }
    }

    #[test]
    fn extension_sanitizing() {
        assert_eq!(extension_of("a.PNG").as_deref(), Some("png"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("weird.p!g"), None);
    }
}
