use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::manifest::FRAME_EXTENSION;

/// Indexed still-image naming shared by extracted frames and generated images.
pub(crate) fn frame_pattern() -> String {
    format!("frame_%04d.{FRAME_EXTENSION}")
}

#[derive(Debug, Clone)]
pub(crate) struct Ffmpeg {
    program: PathBuf,
    codec: String,
    pixel_format: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Ffmpeg {
    pub(crate) fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            codec: "libx264".to_owned(),
            pixel_format: "yuv420p".to_owned(),
        }
    }

    pub(crate) fn with_encoding(mut self, codec: &str, pixel_format: &str) -> Self {
        self.codec = codec.to_owned();
        self.pixel_format = pixel_format.to_owned();
        self
    }

    pub(crate) fn extract_args(input: &Path, output_dir: &Path, fps: u32) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-i".into(),
            input.into(),
            "-vf".into(),
            format!("fps={fps}").into(),
            output_dir.join(frame_pattern()).into(),
        ]
    }

    pub(crate) fn assemble_args(&self, input_dir: &Path, output: &Path, fps: u32) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-framerate".into(),
            fps.to_string().into(),
            "-i".into(),
            input_dir.join(frame_pattern()).into(),
            "-c:v".into(),
            self.codec.as_str().into(),
            "-pix_fmt".into(),
            self.pixel_format.as_str().into(),
            output.into(),
        ]
    }

    /// Splits `input` into `frame_0001.png`.. under `output_dir` at `fps` frames per second.
    pub(crate) async fn extract_frames(
        &self,
        input: &Path,
        output_dir: &Path,
        fps: u32,
    ) -> Result<(), PipelineError> {
        fs::create_dir_all(output_dir)?;
        self.run(Self::extract_args(input, output_dir, fps))
            .await
            .map_err(|failure| match failure {
                Failure::Missing(program) => PipelineError::ToolNotFound { program },
                Failure::Exit(diagnostics) => PipelineError::ExtractionFailed { diagnostics },
                Failure::Io(error) => error.into(),
            })?;
        info!(dir = %output_dir.display(), fps, "frames extracted");
        Ok(())
    }

    /// Encodes the indexed images in `input_dir` into `output`, replacing any existing file.
    pub(crate) async fn assemble_video(
        &self,
        input_dir: &Path,
        output: &Path,
        fps: u32,
    ) -> Result<(), PipelineError> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        self.run(self.assemble_args(input_dir, output, fps))
            .await
            .map_err(|failure| match failure {
                Failure::Missing(program) => PipelineError::ToolNotFound { program },
                Failure::Exit(diagnostics) => PipelineError::AssemblyFailed { diagnostics },
                Failure::Io(error) => error.into(),
            })?;
        info!(output = %output.display(), fps, "video assembled");
        Ok(())
    }

    async fn run(&self, args: Vec<OsString>) -> Result<(), Failure> {
        debug!(program = %self.program.display(), ?args, "spawning ffmpeg");
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => Failure::Missing(self.program.display().to_string()),
                _ => Failure::Io(error),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_owned()
        } else {
            stderr.trim().to_owned()
        };
        Err(Failure::Exit(format!("{}: {}", output.status, diagnostics)))
    }
}

enum Failure {
    Missing(String),
    Exit(String),
    Io(std::io::Error),
}
