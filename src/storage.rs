//! Blob store interface and local backends.
//!
//! Finished artifacts are handed to a blob store by name. Names are
//! caller-generated and must be collision-resistant; timestamp-based
//! naming is sufficient for this domain. The production store (a cloud
//! bucket) is a collaborator behind [`BlobStore`]; the filesystem store
//! here is for local operation and the memory store for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Local;
use log::info;
use tokio::sync::Mutex;

use crate::error::{CamError, CamResult};

/// Remote blob storage, keyed by caller-generated names.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload one blob. Completes before the next artifact's upload starts.
    async fn put(&self, name: &str, data: Bytes, content_type: &str) -> CamResult<()>;

    /// Download one blob by name.
    async fn get(&self, name: &str) -> CamResult<Bytes>;
}

/// Content type for a blob name, by extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// Collision-resistant blob name: `{folder}/{stem}_{timestamp}.{ext}`.
pub fn timestamped_name(folder: &str, stem: &str, ext: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f");
    if folder.is_empty() {
        format!("{stem}_{timestamp}.{ext}")
    } else {
        format!("{folder}/{stem}_{timestamp}.{ext}")
    }
}

/// Blob store backed by a local directory tree.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Store blobs under `root`, created on demand.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, name: &str, data: Bytes, content_type: &str) -> CamResult<()> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        info!(
            "Stored {} ({} bytes, {content_type})",
            path.display(),
            data.len()
        );
        Ok(())
    }

    async fn get(&self, name: &str) -> CamResult<Bytes> {
        let path = self.root.join(name);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) => Err(CamError::Storage(format!(
                "blob '{name}' unavailable: {err}"
            ))),
        }
    }
}

/// In-memory blob store for tests and dry runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Bytes, String)>>,
}

impl MemoryBlobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every stored blob, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    /// True when nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name: &str, data: Bytes, content_type: &str) -> CamResult<()> {
        self.blobs
            .lock()
            .await
            .insert(name.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, name: &str) -> CamResult<Bytes> {
        self.blobs
            .lock()
            .await
            .get(name)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| CamError::Storage(format!("blob '{name}' not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("a/b/shot.JPG"), "image/jpeg");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("clip.avi"), "video/x-msvideo");
        assert_eq!(content_type_for("mystery"), "application/octet-stream");
    }

    #[test]
    fn test_timestamped_names_carry_folder_and_ext() {
        let name = timestamped_name("a6700_frames", "video", "mp4");
        assert!(name.starts_with("a6700_frames/video_"));
        assert!(name.ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path());

        store
            .put("frames/shot.jpg", Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();
        let data = store.get("frames/shot.jpg").await.unwrap();
        assert_eq!(&data[..], b"jpeg");

        let err = store.get("frames/missing.jpg").await.unwrap_err();
        assert!(matches!(err, CamError::Storage(_)));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        assert!(store.is_empty().await);

        store
            .put("x.jpg", Bytes::from_static(b"1"), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(&store.get("x.jpg").await.unwrap()[..], b"1");
    }
}
