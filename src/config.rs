use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const FAL_KEY_VAR: &str = "FAL_KEY";
pub const GOOGLE_CREDENTIALS_FILE_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const GOOGLE_CREDENTIALS_JSON_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS_JSON";

/// Upper bound for either poll interval, in seconds.
pub const MAX_POLL_INTERVAL_SECS: f64 = 3600.0;
const MIN_POLL_INTERVAL_SECS: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub image: ImageSettings,
    #[serde(default)]
    pub video: VideoSettings,
    #[serde(default)]
    pub music: MusicSettings,
    #[serde(default)]
    pub combine: CombineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub model: String,
    pub location: String,
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub queue_url: String,
    pub endpoint: String,
    pub prompt: String,
    pub prompt_optimizer: bool,
    pub poll_interval_secs: f64,
    pub max_poll_interval_secs: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicSettings {
    pub model: String,
    pub location: String,
    pub negative_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            image: ImageSettings::default(),
            video: VideoSettings::default(),
            music: MusicSettings::default(),
            combine: CombineSettings::default(),
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            model: "imagen-3.0-generate-002".to_string(),
            location: "us-central1".to_string(),
            aspect_ratio: "1:1".to_string(),
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            queue_url: "https://queue.fal.run".to_string(),
            endpoint: "fal-ai/minimax/hailuo-02/pro/image-to-video".to_string(),
            prompt: "A cute cat sitting peacefully, gentle movements, soft lighting, adorable and calming scene"
                .to_string(),
            prompt_optimizer: true,
            poll_interval_secs: 5.0,
            max_poll_interval_secs: 30.0,
            timeout_secs: 900,
        }
    }
}

impl VideoSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(clamp_interval(self.poll_interval_secs))
    }

    pub fn max_poll_interval(&self) -> Duration {
        let initial = clamp_interval(self.poll_interval_secs);
        Duration::from_secs_f64(clamp_interval(self.max_poll_interval_secs).max(initial))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// f64::max/min ignore NaN, so non-finite input also lands in range.
fn clamp_interval(secs: f64) -> f64 {
    secs.max(MIN_POLL_INTERVAL_SECS).min(MAX_POLL_INTERVAL_SECS)
}

fn check_interval(name: &str, secs: f64) -> Result<()> {
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_POLL_INTERVAL_SECS {
        anyhow::bail!(
            "config: video.{} must be in (0, {}] seconds, got {}",
            name,
            MAX_POLL_INTERVAL_SECS,
            secs
        );
    }
    Ok(())
}

impl Default for MusicSettings {
    fn default() -> Self {
        Self {
            model: "lyria-002".to_string(),
            location: "us-central1".to_string(),
            negative_prompt: None,
        }
    }
}

impl Default for CombineSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        if config.output_dir.as_os_str().is_empty() {
            anyhow::bail!("config: output_dir must not be empty");
        }
        if config.combine.video_codec.is_empty() || config.combine.audio_codec.is_empty() {
            anyhow::bail!("config: combine codecs must not be empty");
        }
        check_interval("poll_interval_secs", config.video.poll_interval_secs)?;
        check_interval("max_poll_interval_secs", config.video.max_poll_interval_secs)?;

        Ok(config)
    }

    /// Reads `path` when given, otherwise returns the built-in defaults.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path).await,
            None => Ok(Self::default()),
        }
    }
}

/// Provider secrets, read from the environment after preflight has passed.
#[derive(Clone)]
pub struct Credentials {
    pub fal_key: String,
    pub google_service_account: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("fal_key", &"<redacted>")
            .field("google_service_account", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub async fn from_env() -> Result<Self> {
        let fal_key = non_empty_var(FAL_KEY_VAR)
            .with_context(|| format!("{} is not set", FAL_KEY_VAR))?;

        let google_service_account = match non_empty_var(GOOGLE_CREDENTIALS_FILE_VAR) {
            Some(path) => fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read Google credentials file: {}", path))?,
            None => non_empty_var(GOOGLE_CREDENTIALS_JSON_VAR).with_context(|| {
                format!(
                    "neither {} nor {} is set",
                    GOOGLE_CREDENTIALS_FILE_VAR, GOOGLE_CREDENTIALS_JSON_VAR
                )
            })?,
        };

        Ok(Self {
            fal_key,
            google_service_account,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"output_dir":"renders","video":{"timeout_secs":60},"combine":{"audio_codec":"libopus"}}"#,
        )
        .unwrap();

        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.output_dir, PathBuf::from("renders"));
        assert_eq!(cfg.video.timeout(), Duration::from_secs(60));
        assert_eq!(cfg.video.endpoint, VideoSettings::default().endpoint);
        assert_eq!(cfg.combine.audio_codec, "libopus");
        assert_eq!(cfg.combine.video_codec, "libx264");
        assert_eq!(cfg.image.aspect_ratio, "1:1");
    }

    #[tokio::test]
    async fn empty_codec_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"combine":{"video_codec":""}}"#).unwrap();

        let err = Config::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("codecs"));
    }

    #[tokio::test]
    async fn missing_file_names_path() {
        let err = Config::load("/nonexistent/media-pipeline.json").await.unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/media-pipeline.json"));
    }

    #[test]
    fn max_poll_interval_never_below_initial() {
        let settings = VideoSettings {
            poll_interval_secs: 10.0,
            max_poll_interval_secs: 2.0,
            ..VideoSettings::default()
        };
        assert_eq!(settings.max_poll_interval(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn oversized_poll_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"video":{"poll_interval_secs":1e20}}"#).unwrap();

        let err = Config::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));

        std::fs::write(&path, r#"{"video":{"max_poll_interval_secs":0}}"#).unwrap();
        let err = Config::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("max_poll_interval_secs"));
    }

    #[test]
    fn out_of_range_intervals_are_clamped() {
        let settings = VideoSettings {
            poll_interval_secs: 1e20,
            max_poll_interval_secs: f64::NAN,
            ..VideoSettings::default()
        };
        let cap = Duration::from_secs_f64(MAX_POLL_INTERVAL_SECS);
        assert_eq!(settings.poll_interval(), cap);
        assert_eq!(settings.max_poll_interval(), cap);

        let settings = VideoSettings {
            poll_interval_secs: -5.0,
            ..VideoSettings::default()
        };
        assert_eq!(settings.poll_interval(), Duration::from_secs_f64(MIN_POLL_INTERVAL_SECS));
    }
}
