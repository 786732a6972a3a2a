use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::ai::ModelClient;
use crate::caption::caption_frames;
use crate::error::PipelineError;
use crate::generate::generate_images;
use crate::manifest::{ItemOutcome, ItemStatus, Manifest, Stage, StageReport};
use crate::rewrite::rewrite_captions;
use crate::video::Ffmpeg;

const COMPARISON_LIMIT: usize = 5;

/// The five working directories under one root.
#[derive(Debug, Clone)]
pub(crate) struct WorkDirs {
    pub(crate) frames: PathBuf,
    pub(crate) captions: PathBuf,
    pub(crate) prompts: PathBuf,
    pub(crate) generated: PathBuf,
    pub(crate) output: PathBuf,
}

impl WorkDirs {
    pub(crate) fn under(root: &Path) -> Self {
        Self {
            frames: root.join("frames"),
            captions: root.join("captions"),
            prompts: root.join("prompts"),
            generated: root.join("generated"),
            output: root.join("output"),
        }
    }

    pub(crate) fn all(&self) -> [&Path; 5] {
        [
            self.frames.as_path(),
            self.captions.as_path(),
            self.prompts.as_path(),
            self.generated.as_path(),
            self.output.as_path(),
        ]
    }

    pub(crate) fn output_video(&self) -> PathBuf {
        self.output.join("output.mp4")
    }

    pub(crate) fn manifest(&self) -> PathBuf {
        self.output.join("manifest.json")
    }

    /// The working directory holding `path`, which `reset` would delete.
    pub(crate) fn containing(&self, path: &Path) -> Option<&Path> {
        let path = fs::canonicalize(path).ok()?;
        self.all()
            .into_iter()
            .find(|dir| fs::canonicalize(dir).is_ok_and(|dir| path.starts_with(dir)))
    }

    /// Deletes every working directory and recreates it empty.
    pub(crate) fn reset(&self) -> Result<(), PipelineError> {
        for dir in self.all() {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PipelineOptions {
    pub(crate) fps: u32,
    pub(crate) style: Option<String>,
    /// Stop the run when ffmpeg is missing or fails instead of moving on.
    pub(crate) fail_fast: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fps: 1,
            style: None,
            fail_fast: false,
        }
    }
}

/// An original frame and its caption next to the generated image and its prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Comparison {
    pub(crate) id: String,
    pub(crate) frame: PathBuf,
    pub(crate) caption: Option<String>,
    pub(crate) generated: Option<PathBuf>,
    pub(crate) prompt: Option<String>,
}

#[derive(Debug)]
pub(crate) struct RunSummary {
    pub(crate) reports: Vec<StageReport>,
    pub(crate) manifest: Manifest,
    /// Stage whose failure stopped the run.
    pub(crate) halted_at: Option<Stage>,
    pub(crate) video: Option<PathBuf>,
    pub(crate) comparisons: Vec<Comparison>,
}

pub(crate) struct Pipeline<M> {
    models: M,
    ffmpeg: Ffmpeg,
    dirs: WorkDirs,
    options: PipelineOptions,
}

impl<M: ModelClient> Pipeline<M> {
    pub(crate) fn new(models: M, ffmpeg: Ffmpeg, dirs: WorkDirs, options: PipelineOptions) -> Self {
        Self {
            models,
            ffmpeg,
            dirs,
            options,
        }
    }

    /// Runs Extract → Caption → Rewrite → Generate → Assemble once over `video`.
    ///
    /// Working directories are wiped first. Model-stage failures halt the run;
    /// ffmpeg failures only halt it with `fail_fast`.
    pub(crate) async fn run(&self, video: &Path) -> Result<RunSummary, PipelineError> {
        if !video.is_file() {
            return Err(PipelineError::InputNotFound {
                path: video.to_path_buf(),
            });
        }
        if let Some(dir) = self.dirs.containing(video) {
            return Err(PipelineError::InputInWorkDir {
                path: video.to_path_buf(),
                dir: dir.to_path_buf(),
            });
        }
        self.dirs.reset()?;

        let dirs = &self.dirs;
        let fps = self.options.fps;
        let mut reports = Vec::with_capacity(Stage::ALL.len());
        let mut halted_at = None;

        info!(video = %video.display(), fps, "Step 1: {}", Stage::Extract.description());
        let extracted = self.ffmpeg.extract_frames(video, &dirs.frames, fps).await;
        let mut manifest = Manifest::from_frames(&dirs.frames)?;
        let report = match extracted {
            Ok(()) => frames_report(&manifest),
            Err(error) => StageReport::failed(Stage::Extract, error),
        };
        if self.should_halt(&report) {
            halted_at = Some(Stage::Extract);
        }
        reports.push(report);

        for stage in [Stage::Caption, Stage::Rewrite, Stage::Generate] {
            if halted_at.is_some() {
                break;
            }
            info!(items = manifest.len(), "Step {}: {}", step_number(stage), stage.description());
            let report = match stage {
                Stage::Caption => caption_frames(&self.models, &mut manifest, &dirs.captions).await,
                Stage::Rewrite => {
                    rewrite_captions(
                        &self.models,
                        &mut manifest,
                        &dirs.prompts,
                        self.options.style.as_deref(),
                    )
                    .await
                }
                _ => generate_images(&self.models, &mut manifest, &dirs.generated).await,
            };
            if self.should_halt(&report) {
                halted_at = Some(stage);
            }
            reports.push(report);
        }

        if halted_at.is_none() {
            info!("Step 5: {}", Stage::Assemble.description());
            let report = match self
                .ffmpeg
                .assemble_video(&dirs.generated, &dirs.output_video(), fps)
                .await
            {
                Ok(()) => StageReport::new(Stage::Assemble),
                Err(error) => StageReport::failed(Stage::Assemble, error),
            };
            if self.should_halt(&report) {
                halted_at = Some(Stage::Assemble);
            }
            reports.push(report);
        }

        manifest.save(&dirs.manifest())?;

        let video = Some(dirs.output_video()).filter(|path| path.is_file());
        match &video {
            Some(path) => info!(output = %path.display(), "video successfully processed"),
            None => warn!("processing failed, no output video found"),
        }

        Ok(RunSummary {
            comparisons: comparisons(&manifest),
            reports,
            manifest,
            halted_at,
            video,
        })
    }

    fn should_halt(&self, report: &StageReport) -> bool {
        let Some(error) = &report.error else {
            return false;
        };
        if error.is_tool_failure() && !self.options.fail_fast {
            warn!(stage = %report.stage, %error, "continuing with next stage");
            return false;
        }
        error!(stage = %report.stage, %error, "stage failed, stopping");
        true
    }
}

fn step_number(stage: Stage) -> usize {
    Stage::ALL
        .iter()
        .position(|candidate| *candidate == stage)
        .map_or(0, |index| index + 1)
}

fn frames_report(manifest: &Manifest) -> StageReport {
    let mut report = StageReport::new(Stage::Extract);
    report.outcomes = manifest
        .entries
        .iter()
        .filter_map(|entry| {
            Some(ItemOutcome {
                id: entry.id.clone(),
                status: ItemStatus::Done(entry.frame.clone()?),
            })
        })
        .collect();
    report
}

/// Pairs the first few frames with what the pipeline made of them.
pub(crate) fn comparisons(manifest: &Manifest) -> Vec<Comparison> {
    let read = |path: &Option<PathBuf>| {
        path.as_ref()
            .and_then(|path| fs::read_to_string(path).ok())
            .map(|text| text.trim().to_owned())
    };
    manifest
        .entries
        .iter()
        .filter_map(|entry| {
            Some(Comparison {
                id: entry.id.clone(),
                frame: entry.frame.clone()?,
                caption: read(&entry.caption),
                generated: entry.generated.clone(),
                prompt: read(&entry.prompt),
            })
        })
        .take(COMPARISON_LIMIT)
        .collect()
}
