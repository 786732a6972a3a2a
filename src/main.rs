mod ai;
mod caption;
mod error;
mod generate;
mod manifest;
mod pipeline;
mod rewrite;
#[cfg(test)]
mod testing;
mod video;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::ai::{ModelConfig, OpenAiModels};
use crate::manifest::ItemStatus;
use crate::pipeline::{Pipeline, PipelineOptions, RunSummary, WorkDirs};
use crate::rewrite::NO_STYLE;
use crate::video::Ffmpeg;

#[derive(Parser)]
#[command(name = "reimagine")]
#[command(about = "Reimagine a video frame by frame with OpenAI models", long_about = None)]
struct Cli {
    /// Path to the input video.
    #[arg(long, default_value = "input/video.mp4")]
    video_path: PathBuf,
    /// Frames per second to extract and to encode the result at.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=60))]
    fps: u32,
    /// Visual style for the generated images, `None` for no style.
    #[arg(long, default_value = NO_STYLE)]
    style: String,
    /// Directory holding frames/, captions/, prompts/, generated/ and output/.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, env = "OPENAI_API_BASE")]
    api_base: Option<String>,
    #[arg(long, default_value = "gpt-4o")]
    caption_model: String,
    #[arg(long, default_value = "gpt-4")]
    rewrite_model: String,
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    ffmpeg: PathBuf,
    #[arg(long, default_value = "libx264")]
    codec: String,
    #[arg(long, default_value = "yuv420p")]
    pix_fmt: String,
    /// Per-request limit for model calls and downloads; unlimited by default.
    #[arg(long)]
    request_timeout_secs: Option<u64>,
    /// Stop when ffmpeg is missing or fails instead of continuing.
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let models = OpenAiModels::new(ModelConfig {
        api_key: cli.api_key,
        api_base: cli.api_base,
        caption_model: cli.caption_model,
        rewrite_model: cli.rewrite_model,
        request_timeout: cli.request_timeout_secs.map(Duration::from_secs),
    });
    let ffmpeg = Ffmpeg::new(cli.ffmpeg).with_encoding(&cli.codec, &cli.pix_fmt);
    let options = PipelineOptions {
        fps: cli.fps,
        style: Some(cli.style),
        fail_fast: cli.fail_fast,
    };
    let pipeline = Pipeline::new(models, ffmpeg, WorkDirs::under(&cli.work_dir), options);

    let summary = pipeline.run(&cli.video_path).await.with_context(|| {
        format!(
            "place a video at '{}' or pass --video-path",
            cli.video_path.display()
        )
    })?;
    print_summary(&summary);

    if let Some(stage) = summary.halted_at {
        anyhow::bail!("pipeline stopped at the {stage} stage");
    }
    summary
        .video
        .map(|_| ())
        .ok_or(anyhow::anyhow!("processing failed, no output video found"))
}

fn print_summary(summary: &RunSummary) {
    println!();
    for (step, report) in summary.reports.iter().enumerate() {
        let mark = if report.is_ok() { "done" } else { "FAILED" };
        println!(
            "Step {}: {} {} ({} ok, {} failed, {} skipped)",
            step + 1,
            report.stage.description(),
            mark,
            report.done(),
            report.failures(),
            report.skipped()
        );
        if let Some(error) = &report.error {
            println!("    {error}");
        }
        for outcome in &report.outcomes {
            if let ItemStatus::Failed(message) = &outcome.status {
                println!("    {}: {}", outcome.id, message);
            }
        }
    }

    if summary.manifest.is_empty() {
        return;
    }
    println!(
        "\nBefore & after ({} of {} frames)",
        summary.comparisons.len(),
        summary.manifest.len()
    );
    for comparison in &summary.comparisons {
        println!("\n{}", comparison.id);
        println!("  original:  {}", comparison.frame.display());
        println!("  caption:   {}", comparison.caption.as_deref().unwrap_or("-"));
        match &comparison.generated {
            Some(path) => println!("  generated: {}", path.display()),
            None => println!("  generated: -"),
        }
        println!("  prompt:    {}", comparison.prompt.as_deref().unwrap_or("-"));
    }
    if let Some(video) = &summary.video {
        println!("\nOutput video: {}", video.display());
    }
}
