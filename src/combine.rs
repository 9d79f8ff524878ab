//! Video + music muxing.
//!
//! The audio track is cut to the video's length when it runs longer and is
//! left untouched otherwise, so the result always lasts exactly as long as
//! the video. Every opened input is a [`MediaClip`] that closes on drop.

use crate::config::CombineSettings;
use crate::ffmpeg;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum CombineError {
    #[error("cannot load media {}: {reason}", .path.display())]
    MediaLoad { path: PathBuf, reason: String },
    #[error("encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    Video,
    Audio,
}

impl ClipKind {
    fn stream_selector(self) -> &'static str {
        match self {
            ClipKind::Video => "v:0",
            ClipKind::Audio => "a:0",
        }
    }
}

/// An opened media input with its probed duration.
#[derive(Debug)]
pub struct MediaClip {
    path: PathBuf,
    duration: f64,
    _file: fs::File,
    _lease: Arc<()>,
}

impl MediaClip {
    async fn open(path: &Path, kind: ClipKind, leases: &Arc<()>) -> Result<Self, CombineError> {
        let load_error = |reason: String| CombineError::MediaLoad {
            path: path.to_path_buf(),
            reason,
        };

        let file = fs::File::open(path).await.map_err(|e| load_error(e.to_string()))?;
        let clip = Self {
            path: path.to_path_buf(),
            duration: 0.0,
            _file: file,
            _lease: Arc::clone(leases),
        };

        let duration = ffmpeg::ffprobe_stream_duration(path, kind.stream_selector())
            .await
            .map_err(|e| load_error(format!("{:#}", e)))?;

        Ok(Self { duration, ..clip })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }
}

/// How the audio is fitted under the video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuxPlan {
    pub video_duration: f64,
    pub audio_duration: f64,
    /// End of the kept audio range, set only when the audio is longer.
    pub audio_trim: Option<f64>,
}

impl MuxPlan {
    pub fn new(video_duration: f64, audio_duration: f64) -> Self {
        let audio_trim = (audio_duration > video_duration).then_some(video_duration);
        Self {
            video_duration,
            audio_duration,
            audio_trim,
        }
    }

    pub fn output_duration(&self) -> f64 {
        self.video_duration
    }

    /// Seconds of silence at the end of the output.
    pub fn silent_tail(&self) -> f64 {
        (self.video_duration - self.audio_duration).max(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct CombineReport {
    pub output: PathBuf,
    pub plan: MuxPlan,
}

impl CombineReport {
    pub fn audio_trimmed(&self) -> bool {
        self.plan.audio_trim.is_some()
    }
}

#[async_trait]
pub trait MediaCombiner: Send + Sync {
    async fn combine(&self, video: &Path, audio: &Path, output: &Path) -> Result<CombineReport, CombineError>;
}

pub struct FfmpegCombiner {
    settings: CombineSettings,
    leases: Arc<()>,
}

impl FfmpegCombiner {
    pub fn new(settings: CombineSettings) -> Self {
        Self {
            settings,
            leases: Arc::new(()),
        }
    }

    /// Number of [`MediaClip`]s currently open through this combiner.
    pub fn open_handles(&self) -> usize {
        Arc::strong_count(&self.leases) - 1
    }
}

#[async_trait]
impl MediaCombiner for FfmpegCombiner {
    async fn combine(&self, video: &Path, audio: &Path, output: &Path) -> Result<CombineReport, CombineError> {
        let video_clip = MediaClip::open(video, ClipKind::Video, &self.leases).await?;
        let audio_clip = MediaClip::open(audio, ClipKind::Audio, &self.leases).await?;

        let plan = MuxPlan::new(video_clip.duration(), audio_clip.duration());
        let args = ffmpeg::mux_args(
            video_clip.path(),
            audio_clip.path(),
            plan.audio_trim,
            &self.settings,
            output,
        );

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CombineError::Encode(format!("cannot create {}: {}", parent.display(), e)))?;
            }
        }

        let encoded = ffmpeg::run_cmd(&args).await;
        drop(audio_clip);
        drop(video_clip);

        if let Err(err) = encoded {
            let _ = fs::remove_file(output).await;
            return Err(CombineError::Encode(format!("{:#}", err)));
        }
        if !output.exists() {
            return Err(CombineError::Encode(format!(
                "ffmpeg reported success but {} is missing",
                output.display()
            )));
        }

        Ok(CombineReport {
            output: output.to_path_buf(),
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_audio_is_trimmed_to_video() {
        let plan = MuxPlan::new(8.0, 12.0);
        assert_eq!(plan.audio_trim, Some(8.0));
        assert_eq!(plan.output_duration(), 8.0);
        assert_eq!(plan.silent_tail(), 0.0);
    }

    #[test]
    fn shorter_audio_is_kept_with_silent_tail() {
        let plan = MuxPlan::new(8.0, 5.0);
        assert_eq!(plan.audio_trim, None);
        assert_eq!(plan.output_duration(), 8.0);
        assert_eq!(plan.silent_tail(), 3.0);
    }

    #[test]
    fn equal_lengths_need_no_trim() {
        assert_eq!(MuxPlan::new(6.0, 6.0).audio_trim, None);
    }

    #[tokio::test]
    async fn missing_video_is_a_load_error_and_leaks_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let combiner = FfmpegCombiner::new(CombineSettings::default());

        let err = combiner
            .combine(
                &dir.path().join("missing.mp4"),
                &dir.path().join("missing.wav"),
                &dir.path().join("out.mp4"),
            )
            .await
            .unwrap_err();

        match err {
            CombineError::MediaLoad { path, .. } => assert_eq!(path, dir.path().join("missing.mp4")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(combiner.open_handles(), 0);
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[tokio::test]
    async fn garbage_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"this is not a video").unwrap();
        let combiner = FfmpegCombiner::new(CombineSettings::default());

        let err = combiner
            .combine(&video, &dir.path().join("a.wav"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, CombineError::MediaLoad { ref path, .. } if path == &video));
        assert_eq!(combiner.open_handles(), 0);
    }
}
