use super::{
    mime_for_path, write_media, GenerationService, JobHandle, JobStatus, StageError, VideoRequest,
};
use crate::config::VideoSettings;
use async_trait::async_trait;
use base64::prelude::*;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
struct QueueSubmitResponse {
    request_id: String,
    #[serde(default)]
    status_url: Option<String>,
    #[serde(default)]
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueStatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the fal.ai request queue (`submit`, `status`, `response`).
#[derive(Clone)]
pub struct FalQueue {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FalQueue {
    pub fn new(client: Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Key {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
    }

    fn model_base(endpoint: &str) -> &str {
        // Status and result routes live under the first two path segments.
        let mut parts = endpoint.splitn(3, '/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(app)) => &endpoint[..owner.len() + 1 + app.len()],
            _ => endpoint,
        }
    }

    pub async fn submit(&self, endpoint: &str, input: &Value) -> Result<JobHandle, StageError> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_matches('/'));
        let resp = self
            .authed(self.client.post(&url))
            .json(input)
            .send()
            .await?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StageError::provider(status, &raw));
        }

        let submitted: QueueSubmitResponse = serde_json::from_str(&raw)
            .map_err(|e| StageError::Malformed(format!("queue submit: {}", e)))?;

        let base = format!("{}/{}/requests/{}", self.base_url, Self::model_base(endpoint), submitted.request_id);
        Ok(JobHandle {
            status_url: Some(submitted.status_url.unwrap_or_else(|| format!("{}/status", base))),
            result_url: Some(submitted.response_url.unwrap_or(base)),
            id: submitted.request_id,
            inline: None,
        })
    }

    pub async fn status(&self, job: &JobHandle) -> Result<JobStatus, StageError> {
        let url = job
            .status_url
            .as_deref()
            .ok_or_else(|| StageError::Malformed("job has no status url".to_string()))?;

        let resp = self.authed(self.client.get(url)).send().await?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StageError::provider(status, &raw));
        }

        let parsed: QueueStatusResponse = serde_json::from_str(&raw)
            .map_err(|e| StageError::Malformed(format!("queue status: {}", e)))?;

        Ok(match parsed.status.as_str() {
            "IN_QUEUE" => JobStatus::Queued,
            "IN_PROGRESS" => JobStatus::Running,
            "COMPLETED" => match parsed.error {
                Some(err) => JobStatus::Failed(err),
                None => JobStatus::Completed,
            },
            "FAILED" | "ERROR" => JobStatus::Failed(parsed.error.unwrap_or_else(|| parsed.status.clone())),
            other => JobStatus::Failed(format!("unknown queue status {}", other)),
        })
    }

    pub async fn result(&self, job: &JobHandle) -> Result<Value, StageError> {
        let url = job
            .result_url
            .as_deref()
            .ok_or_else(|| StageError::Malformed("job has no result url".to_string()))?;

        let resp = self.authed(self.client.get(url)).send().await?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StageError::provider(status, &raw));
        }
        serde_json::from_str(&raw).map_err(|e| StageError::Malformed(format!("queue result: {}", e)))
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, StageError> {
        let resp = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StageError::provider(status, &body));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Image-to-video through a queued fal model (Hailuo-02 Pro by default).
pub struct FalVideoService {
    queue: FalQueue,
    settings: VideoSettings,
}

impl FalVideoService {
    pub fn new(queue: FalQueue, settings: VideoSettings) -> Self {
        Self { queue, settings }
    }
}

async fn image_data_uri(path: &Path) -> Result<String, StageError> {
    let bytes = fs::read(path).await?;
    Ok(format!(
        "data:{};base64,{}",
        mime_for_path(path),
        BASE64_STANDARD.encode(bytes)
    ))
}

fn video_url(result: &Value) -> Option<&str> {
    result
        .pointer("/video/url")
        .or_else(|| result.pointer("/videos/0/url"))
        .and_then(Value::as_str)
}

#[async_trait]
impl GenerationService for FalVideoService {
    type Request = VideoRequest;

    fn name(&self) -> &str {
        "fal-video"
    }

    async fn submit(&self, request: &VideoRequest) -> Result<JobHandle, StageError> {
        let image_url = image_data_uri(&request.image).await?;
        let input = json!({
            "prompt": request.prompt,
            "image_url": image_url,
            "prompt_optimizer": self.settings.prompt_optimizer,
        });
        self.queue.submit(&self.settings.endpoint, &input).await
    }

    async fn poll_status(&self, job: &JobHandle) -> Result<JobStatus, StageError> {
        self.queue.status(job).await
    }

    async fn download(&self, job: &JobHandle, dest_stem: &Path) -> Result<PathBuf, StageError> {
        let result = self.queue.result(job).await?;
        let url = video_url(&result)
            .ok_or_else(|| StageError::Malformed("result has no video url".to_string()))?;
        let bytes = self.queue.fetch_bytes(url).await?;
        write_media(dest_stem, "mp4", &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_base_keeps_owner_and_app() {
        assert_eq!(
            FalQueue::model_base("fal-ai/minimax/hailuo-02/pro/image-to-video"),
            "fal-ai/minimax"
        );
        assert_eq!(FalQueue::model_base("fal-ai/flux"), "fal-ai/flux");
        assert_eq!(FalQueue::model_base("single"), "single");
    }

    #[test]
    fn video_url_accepts_both_shapes() {
        assert_eq!(
            video_url(&json!({"video": {"url": "https://x/v.mp4"}})),
            Some("https://x/v.mp4")
        );
        assert_eq!(
            video_url(&json!({"videos": [{"url": "https://x/w.mp4"}]})),
            Some("https://x/w.mp4")
        );
        assert_eq!(video_url(&json!({"images": []})), None);
    }

    #[tokio::test]
    async fn data_uri_uses_image_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        std::fs::write(&path, b"\xff\xd8").unwrap();

        let uri = image_data_uri(&path).await.unwrap();
        assert_eq!(uri, "data:image/jpeg;base64,/9g=");
    }
}
