use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::ai::ModelClient;
use crate::error::PipelineError;
use crate::manifest::{run_batch, Manifest, Stage, StageReport, FRAME_EXTENSION};

pub(crate) async fn generate_image<M: ModelClient>(
    models: &M,
    prompt_path: &Path,
    image_path: &Path,
) -> Result<PathBuf, PipelineError> {
    let prompt = fs::read_to_string(prompt_path)?;
    let bytes = models.generate_image(prompt.trim()).await?;
    fs::write(image_path, bytes)?;
    Ok(image_path.to_path_buf())
}

/// Writes `<output_dir>/<id>.png` for every entry with a prompt.
pub(crate) async fn generate_images<M: ModelClient>(
    models: &M,
    manifest: &mut Manifest,
    output_dir: &Path,
) -> StageReport {
    if let Err(error) = models.ensure_credential() {
        return StageReport::aborted(Stage::Generate, manifest, error);
    }
    if let Err(error) = fs::create_dir_all(output_dir) {
        return StageReport::aborted(Stage::Generate, manifest, error.into());
    }
    info!(prompts = manifest.len(), dir = %output_dir.display(), "generating images");

    run_batch(
        Stage::Generate,
        manifest,
        |entry| entry.prompt.as_ref(),
        |entry, path| entry.generated = Some(path),
        move |id, prompt| async move {
            let image_path = output_dir.join(format!("{id}.{FRAME_EXTENSION}"));
            generate_image(models, &prompt, &image_path).await
        },
    )
    .await
}
