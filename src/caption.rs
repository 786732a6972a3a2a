use std::fs;
use std::path::{Path, PathBuf};

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use image::ImageFormat;
use tracing::info;

use crate::ai::ModelClient;
use crate::error::PipelineError;
use crate::manifest::{run_batch, Manifest, Stage, StageReport};

const SYSTEM_PROMPT: &str = "Describe this image in a single, vivid, highly detailed English \
    sentence that clearly explains the scene. Think of it as a prompt for an image generator.";
const USER_CUE: &str = "Describe this image.";

/// Reads an image file into a `data:` URL the vision model accepts inline.
pub(crate) fn encode_data_url(path: &Path) -> Result<String, PipelineError> {
    let mime = ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    let bytes = fs::read(path)?;
    Ok(format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(bytes)))
}

pub(crate) async fn caption_frame<M: ModelClient>(
    models: &M,
    frame: &Path,
    caption_path: &Path,
) -> Result<PathBuf, PipelineError> {
    let image_url = encode_data_url(frame)?;
    let caption = models
        .describe_image(SYSTEM_PROMPT, USER_CUE, image_url)
        .await?;
    fs::write(caption_path, format!("{}\n", caption.trim()))?;
    Ok(caption_path.to_path_buf())
}

/// Writes `<output_dir>/<id>.txt` for every frame in the manifest.
pub(crate) async fn caption_frames<M: ModelClient>(
    models: &M,
    manifest: &mut Manifest,
    output_dir: &Path,
) -> StageReport {
    if let Err(error) = models.ensure_credential() {
        return StageReport::aborted(Stage::Caption, manifest, error);
    }
    if let Err(error) = fs::create_dir_all(output_dir) {
        return StageReport::aborted(Stage::Caption, manifest, error.into());
    }
    info!(frames = manifest.len(), dir = %output_dir.display(), "captioning frames");

    run_batch(
        Stage::Caption,
        manifest,
        |entry| entry.frame.as_ref(),
        |entry, path| entry.caption = Some(path),
        move |id, frame| async move {
            caption_frame(models, &frame, &output_dir.join(format!("{id}.txt"))).await
        },
    )
    .await
}
