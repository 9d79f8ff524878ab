pub mod fal;
pub mod google;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Bytes of a provider error body kept in logs and result records.
const BODY_SNIPPET_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("unexpected provider response: {0}")]
    Malformed(String),
    #[error("job failed: {0}")]
    Failed(String),
    #[error("job still pending after {0:?}")]
    Timeout(Duration),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub(crate) fn provider(status: reqwest::StatusCode, body: &str) -> Self {
        StageError::Provider {
            status: status.as_u16(),
            body: body.chars().take(BODY_SNIPPET_CHARS).collect(),
        }
    }

    /// Connection drops, timeouts and 5xx/429 answers are worth another poll.
    fn is_transient(&self) -> bool {
        match self {
            StageError::Http(err) => err.is_timeout() || err.is_connect(),
            StageError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed(String),
}

/// Provider-side handle for one submitted generation.
///
/// Synchronous providers finish inside `submit` and carry the produced
/// bytes in `inline`; queued providers fill in the status and result URLs.
#[derive(Debug, Clone, Default)]
pub struct JobHandle {
    pub id: String,
    pub status_url: Option<String>,
    pub result_url: Option<String>,
    pub inline: Option<InlineMedia>,
}

#[derive(Debug, Clone)]
pub struct InlineMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub text_overlay: Option<String>,
}

impl ImageRequest {
    /// Prompt sent to the provider, with the overlay text folded in.
    pub fn full_prompt(&self) -> String {
        match self.text_overlay.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => format!(
                "{} with the text '{}' displayed prominently in the center of the image, beautiful typography",
                self.prompt, text
            ),
            _ => self.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub image: PathBuf,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct MusicRequest {
    pub prompt: String,
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    type Request: Send + Sync;

    fn name(&self) -> &str;

    async fn submit(&self, request: &Self::Request) -> Result<JobHandle, StageError>;

    async fn poll_status(&self, job: &JobHandle) -> Result<JobStatus, StageError>;

    /// Writes the finished media into `dest_stem` plus a provider-chosen
    /// extension and returns the final path.
    async fn download(&self, job: &JobHandle, dest_stem: &Path) -> Result<PathBuf, StageError>;
}

pub trait ImageService: GenerationService<Request = ImageRequest> {}
impl<T: GenerationService<Request = ImageRequest> + ?Sized> ImageService for T {}

pub trait VideoService: GenerationService<Request = VideoRequest> {}
impl<T: GenerationService<Request = VideoRequest> + ?Sized> VideoService for T {}

pub trait MusicService: GenerationService<Request = MusicRequest> {}
impl<T: GenerationService<Request = MusicRequest> + ?Sized> MusicService for T {}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn from_settings(settings: &crate::config::VideoSettings) -> Self {
        Self {
            initial_interval: settings.poll_interval(),
            max_interval: settings.max_poll_interval(),
            timeout: settings.timeout(),
        }
    }
}

/// Used for stages whose provider has no polling settings of its own.
impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Submit, poll until done, download.
pub async fn run_job<S>(
    service: &S,
    request: &S::Request,
    dest_stem: &Path,
    policy: &PollPolicy,
) -> Result<PathBuf, StageError>
where
    S: GenerationService + ?Sized,
{
    let job = service.submit(request).await?;
    tracing::debug!(service = service.name(), job = %job.id, "job submitted");

    if job.inline.is_none() {
        wait_for_completion(service, &job, policy).await?;
    }

    service.download(&job, dest_stem).await
}

async fn wait_for_completion<S>(
    service: &S,
    job: &JobHandle,
    policy: &PollPolicy,
) -> Result<(), StageError>
where
    S: GenerationService + ?Sized,
{
    let schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval)
        .with_multiplier(1.5)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(Some(policy.timeout))
        .build();

    let poll = move || async move {
        match service.poll_status(job).await {
            Ok(JobStatus::Completed) => Ok(()),
            Ok(JobStatus::Failed(reason)) => Err(backoff::Error::permanent(StageError::Failed(reason))),
            Ok(status) => {
                tracing::debug!(service = service.name(), job = %job.id, ?status, "job pending");
                Err(backoff::Error::transient(StageError::Timeout(policy.timeout)))
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(service = service.name(), job = %job.id, "status poll failed (retrying): {}", err);
                Err(backoff::Error::transient(err))
            }
            Err(err) => Err(backoff::Error::permanent(err)),
        }
    };

    backoff::future::retry(schedule, poll).await
}

/// Writes `bytes` next to `dest_stem` with `extension`, creating parents.
pub(crate) async fn write_media(
    dest_stem: &Path,
    extension: &str,
    bytes: &[u8],
) -> Result<PathBuf, StageError> {
    let path = dest_stem.with_extension(extension);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    fs::write(&path, bytes).await?;
    Ok(path)
}

pub(crate) fn extension_for_mime(mime_type: &str, fallback: &'static str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        _ => fallback,
    }
}

pub(crate) fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
