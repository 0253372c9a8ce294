//! Object storage client (Supabase storage REST API).

use crate::config::StorageConfig;
use crate::domain::ports::ObjectStorage;
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use uuid::Uuid;

const LIST_PAGE_SIZE: usize = 1000;
const DELETE_BATCH_SIZE: usize = 100;

/// `{layer_id}/{forest_area_id}/{picture_id}{.ext}`, extension taken from the
/// uploaded file name.
pub fn picture_object_path(
    layer_id: Uuid,
    forest_area_id: Uuid,
    picture_id: Uuid,
    filename: Option<&str>,
) -> Result<String> {
    let filename = filename
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::bad_request("File must have a filename"))?;
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    Ok(format!("{layer_id}/{forest_area_id}/{picture_id}{extension}"))
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    /// Folders come back without an id.
    id: Option<String>,
}

#[derive(Clone)]
pub struct BucketClient {
    client: Client,
    base_url: String,
    public_base_url: String,
    bucket: String,
    auth_key: String,
}

impl BucketClient {
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_base_url(config, &format!("https://{}", config.url))
    }

    /// Same as [`BucketClient::new`] but with an explicit scheme and host.
    pub fn with_base_url(config: &StorageConfig, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            public_base_url: base_url.clone(),
            base_url,
            bucket: config.bucket.clone(),
            auth_key: config.auth_key.clone(),
        }
    }

    fn object_url(&self, object_path: &str) -> String {
        format!("{}/object/{}/{}", self.base_url, self.bucket, object_path)
    }

    pub fn public_url(&self, object_path: &str) -> String {
        format!(
            "{}/object/public/{}/{}",
            self.public_base_url, self.bucket, object_path
        )
    }

    pub async fn upload_picture(
        &self,
        object_path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post(self.object_url(object_path))
            .bearer_auth(&self.auth_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::storage(format!(
                "Upload of {object_path} failed ({status}): {text}"
            )));
        }
        tracing::info!("📷 Uploaded {}", object_path);
        Ok(self.public_url(object_path))
    }

    async fn list(&self, prefix: &str, offset: usize) -> Result<Vec<ListedObject>> {
        let response = self
            .client
            .post(format!("{}/object/list/{}", self.base_url, self.bucket))
            .bearer_auth(&self.auth_key)
            .json(&json!({
                "prefix": prefix,
                "limit": LIST_PAGE_SIZE,
                "offset": offset,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::storage(format!(
                "Listing {prefix} failed ({})",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Every object path under `prefix`, descending into folders.
    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut folders = vec![prefix.trim_end_matches('/').to_string()];

        while let Some(folder) = folders.pop() {
            let mut offset = 0;
            loop {
                let page = self.list(&folder, offset).await?;
                let count = page.len();
                for entry in page {
                    let path = format!("{folder}/{}", entry.name);
                    if entry.id.is_some() {
                        files.push(path);
                    } else {
                        folders.push(path);
                    }
                }
                if count < LIST_PAGE_SIZE {
                    break;
                }
                offset += count;
            }
        }
        Ok(files)
    }

    async fn delete_objects(&self, paths: &[String]) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/object/{}", self.base_url, self.bucket))
            .bearer_auth(&self.auth_key)
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::storage(format!(
                "Deleting {} objects failed ({})",
                paths.len(),
                response.status()
            )));
        }
        Ok(())
    }

    pub async fn delete_picture(&self, object_path: &str) -> Result<()> {
        self.delete_objects(&[object_path.to_string()]).await?;
        tracing::info!("🗑️ Deleted {}", object_path);
        Ok(())
    }

    /// Deletes everything under `prefix` in batches. Returns the count.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let paths = self.list_recursive(prefix).await?;
        for batch in paths.chunks(DELETE_BATCH_SIZE) {
            self.delete_objects(batch).await?;
        }
        tracing::info!("🧹 Deleted {} objects under {}", paths.len(), prefix);
        Ok(paths.len())
    }
}

#[async_trait]
impl ObjectStorage for BucketClient {
    async fn upload(&self, object_path: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        self.upload_picture(object_path, data, content_type).await
    }

    async fn delete_object(&self, object_path: &str) -> Result<()> {
        self.delete_picture(object_path).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        BucketClient::delete_prefix(self, prefix).await
    }
}
