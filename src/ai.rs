use std::future::Future;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateImageRequestArgs, Image, ImageModel, ImageQuality,
    ImageResponseFormat, ImageSize, ImageUrlArgs,
};
use async_openai::Client;
use tracing::debug;

use crate::error::PipelineError;

const MAX_TOKENS: u32 = 100;

/// Everything needed to talk to the model provider. The key is resolved once by
/// the caller, never read from the environment here.
#[derive(Debug, Clone)]
pub(crate) struct ModelConfig {
    pub(crate) api_key: Option<String>,
    pub(crate) api_base: Option<String>,
    pub(crate) caption_model: String,
    pub(crate) rewrite_model: String,
    pub(crate) request_timeout: Option<Duration>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            caption_model: "gpt-4o".to_owned(),
            rewrite_model: "gpt-4".to_owned(),
            request_timeout: None,
        }
    }
}

/// The three model calls the pipeline makes.
pub(crate) trait ModelClient {
    /// Fails with `MissingCredential` when no API key is configured.
    fn ensure_credential(&self) -> Result<(), PipelineError>;

    async fn describe_image(
        &self,
        instruction: &str,
        cue: &str,
        image_url: String,
    ) -> Result<String, PipelineError>;

    async fn rewrite_text(&self, instruction: &str, text: &str) -> Result<String, PipelineError>;

    /// Returns the raw bytes of one generated image.
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, PipelineError>;
}

pub(crate) struct OpenAiModels {
    config: ModelConfig,
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
}

impl OpenAiModels {
    pub(crate) fn new(config: ModelConfig) -> Self {
        let mut openai_config = OpenAIConfig::new();
        if let Some(key) = &config.api_key {
            openai_config = openai_config.with_api_key(key);
        }
        if let Some(base) = &config.api_base {
            openai_config = openai_config.with_api_base(base);
        }
        Self {
            client: Client::with_config(openai_config),
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn bounded<T, E>(
        &self,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, PipelineError>
    where
        PipelineError: From<E>,
    {
        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| PipelineError::Timeout(limit))?
                .map_err(PipelineError::from),
            None => call.await.map_err(PipelineError::from),
        }
    }

    async fn complete(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<String, PipelineError> {
        let response = self.bounded(self.client.chat().create(request)).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::upstream("empty response", "no content in response"))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        debug!(url, "downloading generated image");
        let response = self.bounded(self.http.get(url).send()).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::upstream(status.as_u16(), body));
        }
        let bytes = self.bounded(response.bytes()).await?;
        Ok(bytes.to_vec())
    }
}

impl ModelClient for OpenAiModels {
    fn ensure_credential(&self) -> Result<(), PipelineError> {
        match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(PipelineError::MissingCredential),
        }
    }

    async fn describe_image(
        &self,
        instruction: &str,
        cue: &str,
        image_url: String,
    ) -> Result<String, PipelineError> {
        self.ensure_credential()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.caption_model)
            .max_tokens(MAX_TOKENS)
            .messages([
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(instruction)
                        .build()?,
                ),
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(ChatCompletionRequestUserMessageContent::Array(vec![
                            ChatCompletionRequestUserMessageContentPart::Text(
                                ChatCompletionRequestMessageContentPartTextArgs::default()
                                    .text(cue)
                                    .build()?,
                            ),
                            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                ChatCompletionRequestMessageContentPartImageArgs::default()
                                    .image_url(ImageUrlArgs::default().url(image_url).build()?)
                                    .build()?,
                            ),
                        ]))
                        .build()?,
                ),
            ])
            .build()?;
        self.complete(request).await
    }

    async fn rewrite_text(&self, instruction: &str, text: &str) -> Result<String, PipelineError> {
        self.ensure_credential()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.rewrite_model)
            .max_tokens(MAX_TOKENS)
            .messages([
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(instruction)
                        .build()?,
                ),
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(text)
                        .build()?,
                ),
            ])
            .build()?;
        self.complete(request).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, PipelineError> {
        self.ensure_credential()?;
        let request = CreateImageRequestArgs::default()
            .model(ImageModel::DallE3)
            .prompt(prompt)
            .n(1)
            .size(ImageSize::S1024x1024)
            .quality(ImageQuality::Standard)
            .response_format(ImageResponseFormat::Url)
            .build()?;

        let response = self.bounded(self.client.images().create(request)).await?;
        let url = response
            .data
            .iter()
            .find_map(|image| match image.as_ref() {
                Image::Url { url, .. } => Some(url.clone()),
                Image::B64Json { .. } => None,
            })
            .ok_or_else(|| PipelineError::upstream("empty response", "no image url in response"))?;

        self.download(&url).await
    }
}
