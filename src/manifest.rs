use std::fmt;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PipelineError;

pub(crate) const FRAME_EXTENSION: &str = "png";

/// One correlation ID and every artifact produced for it so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Entry {
    pub(crate) id: String,
    pub(crate) frame: Option<PathBuf>,
    pub(crate) caption: Option<PathBuf>,
    pub(crate) prompt: Option<PathBuf>,
    pub(crate) generated: Option<PathBuf>,
}

impl Entry {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Ordered list of frame IDs carried through every stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub(crate) entries: Vec<Entry>,
}

impl Manifest {
    /// Builds the manifest from whatever frames the extractor left behind.
    /// A missing directory yields an empty manifest.
    pub(crate) fn from_frames(frames_dir: &Path) -> Result<Self, PipelineError> {
        if !frames_dir.exists() {
            return Ok(Self::default());
        }
        let mut frames = Vec::new();
        for dir_entry in fs::read_dir(frames_dir)? {
            let path = dir_entry?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION));
            if is_frame && path.is_file() {
                frames.push(path);
            }
        }
        // zero-padded names, so lexicographic order is frame order
        frames.sort();

        let entries = frames
            .into_iter()
            .filter_map(|path| {
                let id = path.file_stem()?.to_str()?.to_owned();
                Some(Entry {
                    frame: Some(path),
                    ..Entry::new(id)
                })
            })
            .collect();
        Ok(Self { entries })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn load(path: &Path) -> Result<Self, PipelineError> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Extract,
    Caption,
    Rewrite,
    Generate,
    Assemble,
}

impl Stage {
    pub(crate) const ALL: [Stage; 5] = [
        Stage::Extract,
        Stage::Caption,
        Stage::Rewrite,
        Stage::Generate,
        Stage::Assemble,
    ];

    pub(crate) fn description(self) -> &'static str {
        match self {
            Stage::Extract => "Extracting frames",
            Stage::Caption => "Generating captions",
            Stage::Rewrite => "Rewriting prompts",
            Stage::Generate => "Generating AI images",
            Stage::Assemble => "Creating final video",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extract => "extract",
            Stage::Caption => "caption",
            Stage::Rewrite => "rewrite",
            Stage::Generate => "generate",
            Stage::Assemble => "assemble",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ItemStatus {
    Done(PathBuf),
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ItemOutcome {
    pub(crate) id: String,
    pub(crate) status: ItemStatus,
}

/// Per-item outcome of one stage. `error` holds the failure that ended the stage, if any.
#[derive(Debug)]
pub(crate) struct StageReport {
    pub(crate) stage: Stage,
    pub(crate) outcomes: Vec<ItemOutcome>,
    pub(crate) error: Option<PipelineError>,
}

impl StageReport {
    pub(crate) fn new(stage: Stage) -> Self {
        Self {
            stage,
            outcomes: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn failed(stage: Stage, error: PipelineError) -> Self {
        Self {
            stage,
            outcomes: Vec::new(),
            error: Some(error),
        }
    }

    /// Marks every entry as skipped and records why the stage never started.
    pub(crate) fn aborted(stage: Stage, manifest: &Manifest, error: PipelineError) -> Self {
        Self {
            stage,
            outcomes: manifest
                .entries
                .iter()
                .map(|entry| ItemOutcome {
                    id: entry.id.clone(),
                    status: ItemStatus::Skipped,
                })
                .collect(),
            error: Some(error),
        }
    }

    pub(crate) fn done(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Done(_)))
    }

    pub(crate) fn skipped(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Skipped))
    }

    pub(crate) fn failures(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Failed(_)))
    }

    pub(crate) fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn count(&self, predicate: impl Fn(&ItemStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

/// Runs `work` over every entry that has the stage's input, in manifest order.
///
/// The first failure is recorded on its item and every later item is skipped.
/// Entries without an input are skipped without calling `work`.
pub(crate) async fn run_batch<I, S, W, Fut>(
    stage: Stage,
    manifest: &mut Manifest,
    input: I,
    mut store: S,
    mut work: W,
) -> StageReport
where
    I: Fn(&Entry) -> Option<&PathBuf>,
    S: FnMut(&mut Entry, PathBuf),
    W: FnMut(String, PathBuf) -> Fut,
    Fut: Future<Output = Result<PathBuf, PipelineError>>,
{
    let mut report = StageReport::new(stage);
    let total = manifest.len();

    for (index, entry) in manifest.entries.iter_mut().enumerate() {
        let id = entry.id.clone();
        let status = match (report.error.is_some(), input(&*entry).cloned()) {
            (true, _) | (false, None) => ItemStatus::Skipped,
            (false, Some(input_path)) => match work(id.clone(), input_path).await {
                Ok(output) => {
                    info!(
                        %stage,
                        id = %id,
                        item = index + 1,
                        total,
                        output = %output.display(),
                        "item done"
                    );
                    store(entry, output.clone());
                    ItemStatus::Done(output)
                }
                Err(error) => {
                    warn!(%stage, id = %id, %error, "item failed, aborting remaining items");
                    let message = error.to_string();
                    report.error = Some(error);
                    ItemStatus::Failed(message)
                }
            },
        };
        report.outcomes.push(ItemOutcome { id, status });
    }

    report
}
