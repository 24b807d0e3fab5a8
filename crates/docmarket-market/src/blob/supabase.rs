//! Supabase storage bucket over its REST API.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::BlobError;

use super::{check_path, BlobStore};

#[derive(Debug, Clone)]
pub struct SupabaseBlobStore {
    client: reqwest::Client,
    base_url: String,
    key: String,
    bucket: String,
}

impl SupabaseBlobStore {
    pub fn new(base_url: String, key: String, bucket: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            key,
            bucket,
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }
}

#[async_trait]
impl BlobStore for SupabaseBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, BlobError> {
        check_path(path)?;
        let response = self
            .client
            .post(self.object_url(path))
            .bearer_auth(&self.key)
            .header("apikey", &self.key)
            .header("x-upsert", "false")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| BlobError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(self.public_url(path));
        }
        let body = response.text().await.unwrap_or_default();
        // The storage API reports duplicates as 409, or as 400 with a "Duplicate" error.
        if status == StatusCode::CONFLICT || body.contains("Duplicate") {
            return Err(BlobError::AlreadyExists(path.to_string()));
        }
        Err(BlobError::Http(format!("{}: {}", status, body)))
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        check_path(path)?;
        let response = self
            .client
            .get(self.object_url(path))
            .bearer_auth(&self.key)
            .header("apikey", &self.key)
            .send()
            .await
            .map_err(|e| BlobError::Http(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response
                .bytes()
                .await
                .map_err(|e| BlobError::Http(e.to_string()))?
                .to_vec()),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Err(BlobError::NotFound(path.to_string())),
            status => Err(BlobError::Http(status.to_string())),
        }
    }
}
