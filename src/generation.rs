use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGE_PROMPT: &str =
    "A cute fluffy cat sitting peacefully, soft lighting, adorable expression, high quality, photorealistic";
pub const DEFAULT_TEXT_OVERLAY: &str = "The cat is so cute!";
pub const DEFAULT_MUSIC_PROMPT: &str = "Gentle healing music for a cute cat video, soft piano melody, calming ambient sounds, peaceful and soothing atmosphere";

/// Format used for every file name produced by one run.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub image_prompt: String,
    pub text_overlay: Option<String>,
    pub music_prompt: String,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            image_prompt: DEFAULT_IMAGE_PROMPT.to_string(),
            text_overlay: Some(DEFAULT_TEXT_OVERLAY.to_string()),
            music_prompt: DEFAULT_MUSIC_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    Image,
    Video,
    Music,
    FinalVideo,
}

impl StageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::Image => "image",
            StageKey::Video => "video",
            StageKey::Music => "music",
            StageKey::FinalVideo => "final_video",
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one pipeline run produced. Keys are added as stages succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub request: GenerationRequest,
    #[serde(rename = "generated_files")]
    pub files: BTreeMap<StageKey, PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<StageKey, String>,
}

impl GenerationResult {
    pub fn new(request: GenerationRequest, timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            request,
            files: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    pub fn file(&self, key: StageKey) -> Option<&Path> {
        self.files.get(&key).map(PathBuf::as_path)
    }

    pub fn record_file(&mut self, key: StageKey, path: PathBuf) {
        self.failures.remove(&key);
        self.files.insert(key, path);
    }

    pub fn record_failure(&mut self, key: StageKey, reason: impl Into<String>) {
        self.failures.insert(key, reason.into());
    }

    /// `%Y%m%d_%H%M%S` rendering of the run timestamp.
    pub fn stamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 7, 6, 16, 40, 18).unwrap()
    }

    #[test]
    fn record_uses_flat_prompts_and_generated_files() {
        let mut result = GenerationResult::new(GenerationRequest::default(), fixed_time());
        result.record_file(StageKey::Music, PathBuf::from("output/music_20250706_164018.wav"));
        result.record_file(StageKey::FinalVideo, PathBuf::from("output/final_video_20250706_164018.mp4"));

        let value: serde_json::Value = serde_json::from_str(&result.to_json_pretty().unwrap()).unwrap();
        assert_eq!(value["image_prompt"], DEFAULT_IMAGE_PROMPT);
        assert_eq!(value["text_overlay"], DEFAULT_TEXT_OVERLAY);
        assert_eq!(value["generated_files"]["music"], "output/music_20250706_164018.wav");
        assert_eq!(
            value["generated_files"]["final_video"],
            "output/final_video_20250706_164018.mp4"
        );
        assert!(value.get("failures").is_none());
    }

    #[test]
    fn success_clears_earlier_failure() {
        let mut result = GenerationResult::new(GenerationRequest::default(), fixed_time());
        result.record_failure(StageKey::Image, "HTTP 503");
        assert_eq!(result.failures.len(), 1);

        result.record_file(StageKey::Image, PathBuf::from("img.png"));
        assert!(result.failures.is_empty());
        assert_eq!(result.file(StageKey::Image), Some(Path::new("img.png")));
    }

    #[test]
    fn stamp_matches_file_pattern() {
        let result = GenerationResult::new(GenerationRequest::default(), fixed_time());
        assert_eq!(result.stamp(), "20250706_164018");
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut result = GenerationResult::new(
            GenerationRequest {
                image_prompt: "a dog".to_string(),
                text_overlay: None,
                music_prompt: "drums".to_string(),
            },
            fixed_time(),
        );
        result.record_failure(StageKey::Video, "timed out");

        let back: GenerationResult = serde_json::from_str(&result.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back.request, result.request);
        assert_eq!(back.failures.get(&StageKey::Video).map(String::as_str), Some("timed out"));
        assert!(back.files.is_empty());
    }
}
