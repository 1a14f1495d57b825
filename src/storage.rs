use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// The object-storage collaborator. Only the primitives the uploader and the
/// reset task need: single put, the multipart trio, and prefix deletion.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, body: Vec<u8>, options: &PutOptions) -> Result<()>;
    async fn create_multipart_upload(&self, key: &str, options: &PutOptions) -> Result<String>;
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<String>;
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

struct PartialUpload {
    key: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// Filesystem-backed object store: object keys map to paths under a root
/// directory. Stands in for the bucket in local runs and tests.
pub struct FsObjectStore {
    root: PathBuf,
    uploads: Mutex<HashMap<String, PartialUpload>>,
    next_upload_id: AtomicU64,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        FsObjectStore {
            root,
            uploads: Mutex::new(HashMap::new()),
            next_upload_id: AtomicU64::new(1),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|part| part == "..") {
            bail!("invalid object key: {key}");
        }
        Ok(self.root.join(key))
    }

    async fn write_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, _options: &PutOptions) -> Result<()> {
        self.write_object(key, body).await?;
        info!("Stored object {}", key);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str, _options: &PutOptions) -> Result<String> {
        let upload_id = format!("upload-{}", self.next_upload_id.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().await.insert(
            upload_id.clone(),
            PartialUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        debug!("Started multipart upload {} for {}", upload_id, key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> Result<String> {
        let mut uploads = self.uploads.lock().await;
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("unknown multipart upload: {upload_id}"))?;
        upload.parts.insert(part_number, body);
        Ok(format!("{upload_id}-part-{part_number}"))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let upload = self
            .uploads
            .lock()
            .await
            .remove(upload_id)
            .ok_or_else(|| anyhow!("unknown multipart upload: {upload_id}"))?;

        let mut body = Vec::new();
        for part in parts {
            let chunk = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| anyhow!("part {} was never uploaded", part.part_number))?;
            body.extend_from_slice(chunk);
        }

        self.write_object(&upload.key, body).await?;
        info!("Completed multipart upload {} for {}", upload_id, key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let keys = collect_keys(&self.root, &self.root)?;
        for key in keys {
            if key.starts_with(prefix) {
                let path = self.object_path(&key)?;
                tokio::fs::remove_file(&path).await?;
                debug!("Deleted object {}", key);
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.object_path(key)?).await?)
    }
}

fn collect_keys(root: &Path, dir: &Path) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    if !dir.exists() {
        return Ok(keys);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            keys.extend(collect_keys(root, &path)?);
        } else if let Ok(relative) = path.strip_prefix(root) {
            keys.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(keys)
}
