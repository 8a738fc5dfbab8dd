/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::runtime_error::RuntimeError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Upload progress callback, receives percentages in `0.0..=100.0`.
pub type Progress<'a> = &'a (dyn Fn(f32) + Send + Sync);

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the content under `path` and returns its retrieval URL.
    async fn upload(&self, path: &str, content: Vec<u8>, progress: Progress<'_>) -> Result<String, RuntimeError>;
}

pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    chunk_size: usize,
}

impl MemoryBlobStore {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().await.get(path).cloned()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, content: Vec<u8>, progress: Progress<'_>) -> Result<String, RuntimeError> {
        let total = content.len();
        let mut transferred = 0;

        progress(0.0);
        for chunk in content.chunks(self.chunk_size) {
            transferred += chunk.len();
            progress((transferred as f32 * 100.0 / total as f32).clamp(0.0, 100.0));
        }
        if total == 0 {
            progress(100.0);
        }

        self.blobs.lock().await.insert(path.to_string(), content);
        Ok(format!("memory://{path}"))
    }
}

#[cfg(test)]
mod tests {
    use crate::blob_store::{BlobStore, MemoryBlobStore};
    use crate::runtime_error::RuntimeError;
    use std::sync::Mutex;

    #[tokio::test]
    async fn upload_reports_progress() -> Result<(), RuntimeError> {
        let blobs = MemoryBlobStore::new(4);
        let reported = Mutex::new(vec![]);

        let url = blobs
            .upload("unidades/u1/foto.jpg", vec![0; 10], &|value| reported.lock().unwrap().push(value))
            .await?;

        assert_eq!("memory://unidades/u1/foto.jpg", url);
        assert_eq!(vec![0.0, 40.0, 80.0, 100.0], *reported.lock().unwrap());
        assert_eq!(Some(vec![0; 10]), blobs.content("unidades/u1/foto.jpg").await);

        Ok(())
    }

    #[tokio::test]
    async fn empty_upload_completes() -> Result<(), RuntimeError> {
        let blobs = MemoryBlobStore::default();
        let reported = Mutex::new(vec![]);

        blobs
            .upload("empty", vec![], &|value| reported.lock().unwrap().push(value))
            .await?;

        assert_eq!(vec![0.0, 100.0], *reported.lock().unwrap());

        Ok(())
    }
}
