use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::ai::ModelClient;
use crate::error::PipelineError;
use crate::manifest::{run_batch, Manifest, Stage, StageReport};

const REWRITE_INSTRUCTION: &str = "Rewrite the following image description into a creative and \
    vivid AI prompt. Change 70–90% of the content while keeping the overall visual structure \
    relatable.";

/// Style label meaning "no style".
pub(crate) const NO_STYLE: &str = "None";

/// Returns the style to apply, ignoring blanks and the `None` sentinel.
pub(crate) fn effective_style(style: Option<&str>) -> Option<&str> {
    style
        .map(str::trim)
        .filter(|style| !style.is_empty() && !style.eq_ignore_ascii_case(NO_STYLE))
}

pub(crate) fn rewrite_instruction(style: Option<&str>) -> String {
    match effective_style(style) {
        Some(style) => format!("{REWRITE_INSTRUCTION} Make it fit the {style} style."),
        None => REWRITE_INSTRUCTION.to_owned(),
    }
}

pub(crate) async fn rewrite_caption<M: ModelClient>(
    models: &M,
    instruction: &str,
    id: &str,
    caption_path: &Path,
    prompt_path: &Path,
) -> Result<PathBuf, PipelineError> {
    let caption = fs::read_to_string(caption_path)?;
    let caption = caption.trim();
    let prompt = models.rewrite_text(instruction, caption).await?;
    let prompt = prompt.trim();
    if prompt == caption {
        return Err(PipelineError::UnchangedRewrite { id: id.to_owned() });
    }
    fs::write(prompt_path, format!("{prompt}\n"))?;
    Ok(prompt_path.to_path_buf())
}

/// Writes `<output_dir>/<id>.txt` for every captioned entry.
pub(crate) async fn rewrite_captions<M: ModelClient>(
    models: &M,
    manifest: &mut Manifest,
    output_dir: &Path,
    style: Option<&str>,
) -> StageReport {
    if let Err(error) = models.ensure_credential() {
        return StageReport::aborted(Stage::Rewrite, manifest, error);
    }
    if let Err(error) = fs::create_dir_all(output_dir) {
        return StageReport::aborted(Stage::Rewrite, manifest, error.into());
    }
    let instruction = rewrite_instruction(style);
    let instruction = instruction.as_str();
    info!(
        captions = manifest.len(),
        style = effective_style(style).unwrap_or(NO_STYLE),
        "rewriting captions"
    );

    run_batch(
        Stage::Rewrite,
        manifest,
        |entry| entry.caption.as_ref(),
        |entry, path| entry.prompt = Some(path),
        move |id, caption| async move {
            let prompt_path = output_dir.join(format!("{id}.txt"));
            rewrite_caption(models, instruction, &id, &caption, &prompt_path).await
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::caption_frames;
    use crate::manifest::ItemStatus;
    use crate::testing::{write_frames, FakeModels};

    #[test]
    fn style_suffix_only_for_real_styles() {
        assert_eq!(rewrite_instruction(None), REWRITE_INSTRUCTION);
        assert_eq!(rewrite_instruction(Some("")), REWRITE_INSTRUCTION);
        assert_eq!(rewrite_instruction(Some("None")), REWRITE_INSTRUCTION);
        assert_eq!(rewrite_instruction(Some(" none ")), REWRITE_INSTRUCTION);
        assert!(rewrite_instruction(Some("Pixel Art"))
            .ends_with(" Make it fit the Pixel Art style."));
    }

    async fn captioned(dir: &Path, count: usize) -> Manifest {
        let mut manifest = write_frames(&dir.join("frames"), count);
        let captions = dir.join("captions");
        let report = caption_frames(&FakeModels::default(), &mut manifest, &captions).await;
        assert!(report.is_ok());
        manifest
    }

    #[tokio::test]
    async fn one_prompt_per_caption_and_text_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = captioned(dir.path(), 3).await;
        let prompts = dir.path().join("prompts");
        let models = FakeModels::default();

        let report = rewrite_captions(&models, &mut manifest, &prompts, Some("Anime")).await;

        assert!(report.is_ok());
        assert_eq!(report.done(), 3);
        for entry in &manifest.entries {
            let prompt = entry.prompt.as_ref().unwrap();
            assert_eq!(prompt, &prompts.join(format!("{}.txt", entry.id)));
            let caption = fs::read_to_string(entry.caption.as_ref().unwrap()).unwrap();
            let rewritten = fs::read_to_string(prompt).unwrap();
            assert_ne!(caption, rewritten);
            assert_eq!(rewritten, format!("reimagined {}", caption));
        }
        assert!(models
            .instructions()
            .iter()
            .all(|instruction| instruction.ends_with("Make it fit the Anime style.")));
    }

    #[tokio::test]
    async fn echoed_caption_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = captioned(dir.path(), 2).await;
        let prompts = dir.path().join("prompts");
        let models = FakeModels::echoing();

        let report = rewrite_captions(&models, &mut manifest, &prompts, None).await;

        assert!(matches!(
            report.error,
            Some(PipelineError::UnchangedRewrite { ref id }) if id == "frame_0001"
        ));
        assert_eq!(report.outcomes[1].status, ItemStatus::Skipped);
        assert!(!prompts.join("frame_0001.txt").exists());
    }

    #[tokio::test]
    async fn entries_without_captions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = captioned(dir.path(), 2).await;
        manifest.entries[0].caption = None;
        let models = FakeModels::default();
        let prompts = dir.path().join("prompts");

        let report = rewrite_captions(&models, &mut manifest, &prompts, None).await;

        assert_eq!(report.outcomes[0].status, ItemStatus::Skipped);
        assert!(matches!(report.outcomes[1].status, ItemStatus::Done(_)));
        assert_eq!(models.calls(), 1);
    }

    #[tokio::test]
    async fn missing_credential_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = captioned(dir.path(), 2).await;
        let prompts = dir.path().join("prompts");
        let models = FakeModels::without_credential();

        let report = rewrite_captions(&models, &mut manifest, &prompts, None).await;

        assert!(matches!(report.error, Some(PipelineError::MissingCredential)));
        assert_eq!(models.calls(), 0);
        assert!(!prompts.exists());
    }
}
