use crate::config::CombineSettings;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

const MIN_MEDIA_DURATION: f64 = 0.1;
const STDERR_SNIPPET_CHARS: usize = 600;

pub(crate) async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let output = cmd.output().await.context("Command execution failed")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let snippet: String = stderr.trim().chars().take(STDERR_SNIPPET_CHARS).collect();
        return Err(anyhow::anyhow!(
            "{} exited with {}: {}",
            args[0],
            output.status,
            snippet
        ));
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

fn parse_duration(text: Option<&str>) -> Option<f64> {
    text.and_then(|t| t.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > MIN_MEDIA_DURATION)
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    parse_duration(Some(&text)).ok_or_else(|| anyhow::anyhow!("Invalid duration"))
}

/// Duration of the first stream matching `selector` (`v:0`, `a:0`).
///
/// Containers that leave stream duration unset (Matroska, WebM) fall back to
/// the container duration, but only when the stream exists.
pub async fn ffprobe_stream_duration(path: &Path, selector: &str) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            selector,
            "-show_entries",
            "stream=duration:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!("ffprobe failed: {}", stderr.trim()));
    }

    let probe: ProbeOutput =
        serde_json::from_slice(&output.stdout).context("ffprobe returned unreadable JSON")?;
    stream_duration_from_probe(&probe, selector)
}

fn stream_duration_from_probe(probe: &ProbeOutput, selector: &str) -> Result<f64> {
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| anyhow::anyhow!("no stream matches {}", selector))?;

    parse_duration(stream.duration.as_deref())
        .or_else(|| parse_duration(probe.format.as_ref().and_then(|f| f.duration.as_deref())))
        .ok_or_else(|| anyhow::anyhow!("Invalid duration"))
}

/// ffmpeg invocation that puts `audio` under `video`, trimming the audio to
/// `trim_to` seconds when given. Any audio already in `video` is dropped.
pub fn mux_args(
    video: &Path,
    audio: &Path,
    trim_to: Option<f64>,
    settings: &CombineSettings,
    out_mp4: &Path,
) -> Vec<String> {
    let mut args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.display().to_string(),
        "-i".to_string(),
        audio.display().to_string(),
    ];

    match trim_to {
        Some(end) => args.extend([
            "-filter_complex".to_string(),
            format!("[1:a:0]atrim=start=0:end={:.6},asetpts=PTS-STARTPTS[a]", end),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "[a]".to_string(),
            "-t".to_string(),
            format!("{:.6}", end),
        ]),
        None => args.extend([
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
        ]),
    }

    args.extend(["-c:v".to_string(), settings.video_codec.clone()]);
    if settings.video_codec == "libx264" {
        args.extend([
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-crf".to_string(),
            "22".to_string(),
        ]);
    }

    args.extend([
        "-c:a".to_string(),
        settings.audio_codec.clone(),
        "-b:a".to_string(),
        settings.audio_bitrate.clone(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ]);
    args
}
