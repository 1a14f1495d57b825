use crate::storage::{CompletedPart, ObjectStore, PutOptions};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;

const SINGLE_UPLOAD_LIMIT: u64 = 100 * 1024 * 1024; // 100 MiB
const PART_SIZE: usize = 50 * 1024 * 1024; // 50 MiB

/// Ships a local file to object storage, choosing a single request for
/// small files and a sequential multipart upload above the size threshold.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    single_upload_limit: u64,
    part_size: usize,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Uploader {
            store,
            single_upload_limit: SINGLE_UPLOAD_LIMIT,
            part_size: PART_SIZE,
        }
    }

    #[cfg(test)]
    fn with_limits(mut self, single_upload_limit: u64, part_size: usize) -> Self {
        self.single_upload_limit = single_upload_limit;
        self.part_size = part_size;
        self
    }

    pub async fn upload_file(&self, key: &str, path: &Path, options: &PutOptions) -> Result<()> {
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot stat {}", path.display()))?
            .len();

        if size > self.single_upload_limit {
            self.multipart_upload(key, path, options).await?;
            info!("Uploaded {} ({} bytes) via multipart", key, size);
        } else {
            let body = tokio::fs::read(path).await?;
            self.store.put_object(key, body, options).await?;
            info!("Uploaded {} ({} bytes)", key, size);
        }
        Ok(())
    }

    async fn multipart_upload(&self, key: &str, path: &Path, options: &PutOptions) -> Result<()> {
        let upload_id = self.store.create_multipart_upload(key, options).await?;
        let mut file = tokio::fs::File::open(path).await?;
        let mut parts = Vec::new();
        let mut part_number = 1u32;

        loop {
            let mut buffer = vec![0u8; self.part_size];
            let mut filled = 0;
            while filled < self.part_size {
                let read = file.read(&mut buffer[filled..]).await?;
                if read == 0 {
                    break;
                }
                filled += read;
            }
            if filled == 0 {
                break;
            }
            buffer.truncate(filled);

            let etag = self
                .store
                .upload_part(key, &upload_id, part_number, buffer)
                .await?;
            parts.push(CompletedPart { part_number, etag });
            let last_part = filled < self.part_size;
            part_number += 1;
            if last_part {
                break;
            }
        }

        self.store
            .complete_multipart_upload(key, &upload_id, &parts)
            .await
    }
}
