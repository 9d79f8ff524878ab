use crate::api::fal::{FalQueue, FalVideoService};
use crate::api::google::{ImagenService, LyriaService, VertexClient};
use crate::api::{
    run_job, ImageRequest, ImageService, MusicRequest, MusicService, PollPolicy, StageError,
    VideoRequest, VideoService,
};
use crate::combine::{CombineError, FfmpegCombiner, MediaCombiner};
use crate::config::{Config, Credentials};
use crate::generation::{GenerationRequest, GenerationResult, StageKey};
use crate::init;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("combine stage failed: {source}")]
    Combine {
        result: Box<GenerationResult>,
        record: Option<PathBuf>,
        #[source]
        source: CombineError,
    },
    #[error("failed to write result record {}: {source}", .path.display())]
    Persist {
        result: Box<GenerationResult>,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Services {
    pub image: Box<dyn ImageService>,
    pub video: Box<dyn VideoService>,
    pub music: Box<dyn MusicService>,
}

impl Services {
    /// Production providers: Vertex Imagen and Lyria, fal.ai image-to-video.
    pub fn from_config(cfg: &Config, creds: &Credentials, client: reqwest::Client) -> Result<Self> {
        let vertex = VertexClient::from_service_account(client.clone(), &creds.google_service_account)
            .context("Failed to load Google service account")?;
        let queue = FalQueue::new(client, creds.fal_key.clone(), cfg.video.queue_url.clone());

        Ok(Self {
            image: Box::new(ImagenService::new(vertex.clone(), cfg.image.clone())),
            video: Box::new(FalVideoService::new(queue, cfg.video.clone())),
            music: Box::new(LyriaService::new(vertex, cfg.music.clone())),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: GenerationResult,
    pub record: PathBuf,
}

pub struct Pipeline {
    config: Config,
    services: Services,
    combiner: Box<dyn MediaCombiner>,
}

impl Pipeline {
    pub fn new(config: Config, services: Services, combiner: Box<dyn MediaCombiner>) -> Self {
        Self {
            config,
            services,
            combiner,
        }
    }

    fn output_stem(&self, prefix: &str, stamp: &str) -> PathBuf {
        self.config.output_dir.join(format!("{}_{}", prefix, stamp))
    }

    async fn image_stage(&self, request: &GenerationRequest, stamp: &str) -> Result<PathBuf, StageError> {
        logi("Generating image...");
        let image_request = ImageRequest {
            prompt: request.image_prompt.clone(),
            text_overlay: request.text_overlay.clone(),
        };
        run_job(
            self.services.image.as_ref(),
            &image_request,
            &self.output_stem("image", stamp),
            &PollPolicy::default(),
        )
        .await
    }

    async fn video_stage(&self, image: &Path, stamp: &str) -> Result<PathBuf, StageError> {
        logi(format!("Generating video from image: {}", image.display()));
        let video_request = VideoRequest {
            image: image.to_path_buf(),
            prompt: self.config.video.prompt.clone(),
        };
        run_job(
            self.services.video.as_ref(),
            &video_request,
            &self.output_stem("video", stamp),
            &PollPolicy::from_settings(&self.config.video),
        )
        .await
    }

    async fn music_stage(&self, request: &GenerationRequest, stamp: &str) -> Result<PathBuf, StageError> {
        logi("Generating music...");
        let music_request = MusicRequest {
            prompt: request.music_prompt.clone(),
        };
        run_job(
            self.services.music.as_ref(),
            &music_request,
            &self.output_stem("music", stamp),
            &PollPolicy::default(),
        )
        .await
    }

    fn settle(result: &mut GenerationResult, key: StageKey, outcome: Result<PathBuf, StageError>) -> Option<PathBuf> {
        match outcome {
            Ok(path) => {
                logok(format!("{} generated: {}", key, path.display()));
                result.record_file(key, path.clone());
                Some(path)
            }
            Err(err) => {
                logw(format!("{} stage produced no output: {}", key, err));
                result.record_failure(key, err.to_string());
                None
            }
        }
    }

    pub async fn run(&self, request: &GenerationRequest) -> Result<RunReport, PipelineError> {
        self.run_at(request, Local::now()).await
    }

    /// Runs every stage with file names derived from `started`.
    pub async fn run_at(
        &self,
        request: &GenerationRequest,
        started: DateTime<Local>,
    ) -> Result<RunReport, PipelineError> {
        logi("Starting media generation run...");
        let mut result = GenerationResult::new(request.clone(), started);
        let stamp = result.stamp();

        if let Err(err) = init::ensure_output_dir(&self.config.output_dir).await {
            logw(format!("{:#}", err));
        }

        let image = self.image_stage(request, &stamp).await;
        let image = Self::settle(&mut result, StageKey::Image, image);

        let video = match image.as_deref() {
            Some(image) => {
                let video = self.video_stage(image, &stamp).await;
                Self::settle(&mut result, StageKey::Video, video)
            }
            None => {
                logw("Skipping video stage (no image).");
                result.record_failure(StageKey::Video, "skipped: no image");
                None
            }
        };

        let music = self.music_stage(request, &stamp).await;
        let music = Self::settle(&mut result, StageKey::Music, music);

        let mut combine_error = None;
        match (video, music) {
            (Some(video), Some(music)) => {
                let output = self.output_stem("final_video", &stamp).with_extension("mp4");
                logi("Combining video and music...");
                match self.combiner.combine(&video, &music, &output).await {
                    Ok(report) => {
                        if let Some(end) = report.plan.audio_trim {
                            logi(format!(
                                "Music trimmed from {:.2}s to {:.2}s",
                                report.plan.audio_duration, end
                            ));
                        } else if report.plan.silent_tail() > 0.0 {
                            logi(format!(
                                "Music ends {:.2}s before the video",
                                report.plan.silent_tail()
                            ));
                        }
                        logok(format!("Final video created: {}", report.output.display()));
                        result.record_file(StageKey::FinalVideo, report.output);
                    }
                    Err(err) => {
                        logw(format!("Combine failed: {}", err));
                        result.record_failure(StageKey::FinalVideo, err.to_string());
                        combine_error = Some(err);
                    }
                }
            }
            _ => logw("Skipping combine stage (video or music missing)."),
        }

        let record = self
            .config
            .output_dir
            .join(format!("generation_results_{}.json", stamp));
        let persisted = self.persist(&result, &record).await;
        if let Err(err) = &persisted {
            logw(format!("Could not write {}: {}", record.display(), err));
        }

        if let Some(source) = combine_error {
            return Err(PipelineError::Combine {
                result: Box::new(result),
                record: persisted.ok().map(|_| record),
                source,
            });
        }

        if let Err(source) = persisted {
            return Err(PipelineError::Persist {
                result: Box::new(result),
                path: record,
                source,
            });
        }

        logok(format!("Run completed. Results saved to: {}", record.display()));
        Ok(RunReport { result, record })
    }

    async fn persist(&self, result: &GenerationResult, path: &Path) -> std::io::Result<()> {
        let json = result.to_json_pretty().map_err(std::io::Error::other)?;
        fs::create_dir_all(&self.config.output_dir).await?;
        fs::write(path, json).await
    }
}

pub fn log_summary(result: &GenerationResult) {
    logi(format!("Generated files: {}", result.files.len()));
    for (key, path) in &result.files {
        logi(format!("  - {}: {}", key, path.display()));
    }
    for (key, reason) in &result.failures {
        logw(format!("  - {} missing: {}", key, reason));
    }
}

/// Wires the production providers and runs one generation. Returns the
/// process exit code.
pub async fn run_generation(config: Config, request: GenerationRequest) -> Result<i32> {
    let creds = Credentials::from_env().await?;
    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    init::ensure_output_dir(&config.output_dir).await?;
    if !init::check_ffmpeg().await {
        logw("FFmpeg not found in PATH. The combine stage will fail.");
    }

    let services = Services::from_config(&config, &creds, client)?;
    let combiner = FfmpegCombiner::new(config.combine.clone());
    let pipeline = Pipeline::new(config, services, Box::new(combiner));

    match pipeline.run(&request).await {
        Ok(report) => {
            log_summary(&report.result);
            Ok(0)
        }
        Err(PipelineError::Combine { result, record, source }) => {
            log_summary(&result);
            if let Some(record) = record {
                logi(format!("Partial results saved to: {}", record.display()));
            }
            logw(format!("Run aborted: {}", source));
            Ok(1)
        }
        Err(PipelineError::Persist { result, path, source }) => {
            log_summary(&result);
            logw(format!("Result record {} was not written: {}", path.display(), source));
            Ok(1)
        }
    }
}
