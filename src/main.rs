use anyhow::Result;
use clap::Parser;
use media_pipeline::config::Config;
use media_pipeline::generation::{
    GenerationRequest, DEFAULT_IMAGE_PROMPT, DEFAULT_MUSIC_PROMPT, DEFAULT_TEXT_OVERLAY,
};
use media_pipeline::generator::run_generation;
use media_pipeline::preflight::Preflight;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "media-pipeline")]
#[command(about = "Generate an image, animate it, score it with music and mux the result", long_about = None)]
struct Args {
    /// Prompt for the still image
    #[arg(long, default_value = DEFAULT_IMAGE_PROMPT)]
    image_prompt: String,

    /// Text rendered onto the image
    #[arg(long, default_value = DEFAULT_TEXT_OVERLAY)]
    text_overlay: String,

    /// Generate the image without any text
    #[arg(long)]
    no_text_overlay: bool,

    /// Prompt for the music track
    #[arg(long, default_value = DEFAULT_MUSIC_PROMPT)]
    music_prompt: String,

    /// Directory for generated files and the result record
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSON file with provider and encoder settings
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let report = Preflight::default().run_from_env();
    report.log();
    if !report.passed() {
        std::process::exit(1);
    }

    let mut config = Config::load_or_default(args.config.as_deref()).await?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    let request = GenerationRequest {
        image_prompt: args.image_prompt,
        text_overlay: (!args.no_text_overlay).then_some(args.text_overlay),
        music_prompt: args.music_prompt,
    };

    let code = run_generation(config, request).await?;
    std::process::exit(code);
}
