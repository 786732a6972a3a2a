use std::path::PathBuf;

use async_openai::error::OpenAIError;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("OPENAI_API_KEY is not configured")]
    MissingCredential,
    #[error("upstream request failed (status {status}): {body}")]
    Upstream { status: String, body: String },
    #[error("upstream request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("rewrite of {id} returned the caption unchanged")]
    UnchangedRewrite { id: String },
    #[error("{program} not found, make sure it is installed and on PATH")]
    ToolNotFound { program: String },
    #[error("frame extraction failed: {diagnostics}")]
    ExtractionFailed { diagnostics: String },
    #[error("video assembly failed: {diagnostics}")]
    AssemblyFailed { diagnostics: String },
    #[error("video file not found at '{}'", path.display())]
    InputNotFound { path: PathBuf },
    #[error(
        "video '{}' is inside working directory '{}', which is wiped on every run",
        path.display(),
        dir.display()
    )]
    InputInWorkDir { path: PathBuf, dir: PathBuf },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("invalid request: {0}")]
    Request(String),
}

impl PipelineError {
    pub(crate) fn upstream(status: impl ToString, body: impl Into<String>) -> Self {
        Self::Upstream {
            status: status.to_string(),
            body: body.into(),
        }
    }

    /// Tool failures leave the next stage with missing inputs but do not stop the run.
    pub(crate) fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound { .. } | Self::ExtractionFailed { .. } | Self::AssemblyFailed { .. }
        )
    }
}

impl From<OpenAIError> for PipelineError {
    fn from(error: OpenAIError) -> Self {
        match error {
            OpenAIError::ApiError(api) => Self::upstream(
                api.r#type.clone().unwrap_or_else(|| "api error".to_owned()),
                api.to_string(),
            ),
            OpenAIError::Reqwest(e) => Self::upstream(
                e.status()
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "transport".to_owned()),
                e.to_string(),
            ),
            OpenAIError::JSONDeserialize(e) => Self::upstream("invalid response", e.to_string()),
            OpenAIError::InvalidArgument(message) => Self::Request(message),
            other => Self::upstream("error", other.to_string()),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        Self::upstream(
            error
                .status()
                .map(|status| status.as_u16().to_string())
                .unwrap_or_else(|| "transport".to_owned()),
            error.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use async_openai::error::ApiError;

    use super::*;

    #[test]
    fn api_errors_keep_their_type_and_detail() {
        let api: ApiError = serde_json::from_value(serde_json::json!({
            "message": "prompt rejected by safety system",
            "type": "invalid_request_error",
            "param": null,
            "code": "content_policy_violation"
        }))
        .unwrap();

        match PipelineError::from(OpenAIError::ApiError(api)) {
            PipelineError::Upstream { status, body } => {
                assert_eq!(status, "invalid_request_error");
                assert!(body.contains("prompt rejected by safety system"));
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }
}
