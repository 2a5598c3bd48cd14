//! Client for the external blob store holding listing images.
//!
//! Uploads stream the payload in fixed-size chunks so callers can observe
//! progress; the store answers with the public download URL.

use futures_util::stream;
use serde::Deserialize;

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct UploadReply {
    url: String,
}

#[derive(Clone)]
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl StorageClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Path for a listing image: unique per upload so re-uploads of the
    /// same file name never collide.
    pub fn image_path(business_id: uuid::Uuid, file_name: &str) -> String {
        let stamp = chrono::Utc::now().timestamp_millis();
        format!("businesses/{business_id}/{stamp}_{file_name}")
    }

    /// Upload `data` under `path`, reporting percent progress per chunk,
    /// and return the public download URL.
    pub async fn upload(
        &self,
        path: &str,
        data: Vec<u8>,
        mut on_progress: Option<Box<dyn FnMut(f32) + Send>>,
    ) -> Result<String, String> {
        let url = format!("{}/{}", self.base_url, path);
        let total = data.len().max(1);
        let mut sent = 0usize;

        let chunks: Vec<Vec<u8>> = data
            .chunks(UPLOAD_CHUNK_BYTES)
            .map(|chunk| chunk.to_vec())
            .collect();
        let body = reqwest::Body::wrap_stream(stream::iter(chunks.into_iter().map(
            move |chunk| {
                sent += chunk.len();
                if let Some(callback) = on_progress.as_mut() {
                    callback(sent as f32 * 100.0 / total as f32);
                }
                Ok::<Vec<u8>, std::io::Error>(chunk)
            },
        )));

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .body(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Failed to upload image: {}", text));
        }

        let reply: UploadReply = response.json().await.map_err(|e| e.to_string())?;
        Ok(reply.url)
    }

    /// Delete a blob by its download URL.
    pub async fn delete(&self, download_url: &str) -> Result<(), String> {
        let response = self
            .client
            .delete(download_url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Failed to delete image: {}", text));
        }
        Ok(())
    }
}
