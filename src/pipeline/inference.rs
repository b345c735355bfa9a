//! The seam between the generator and the generative inference service.
//!
//! [`DescriptionModel`] is the only thing the generator knows about the
//! service: one request in, free text or an error out. The production
//! implementation, [`LlmDescriptionModel`], drives two `edgequake-llm`
//! providers (a vision model for figures and a cheaper text model for
//! links). Tests substitute a scripted implementation.

use crate::config::TagConfig;
use crate::error::AltTagError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Which reference class a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Image,
    Link,
}

/// Raw image bytes plus their detected MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImagePayload {
    /// Sniff the format from magic bytes. Unknown formats are sent as PNG,
    /// which every supported provider accepts as a default.
    pub fn sniff(bytes: Vec<u8>) -> Self {
        let mime_type = image::guess_format(&bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| "image/png".to_string());
        Self { bytes, mime_type }
    }

    fn to_image_data(&self) -> ImageData {
        ImageData::new(STANDARD.encode(&self.bytes), self.mime_type.as_str()).with_detail("high")
    }
}

/// One call to the inference service.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub role: ModelRole,
    pub system: String,
    pub prompt: String,
    pub image: Option<ImagePayload>,
}

/// A failed inference call. Always treated as transient by the generator.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct InferenceError(pub String);

/// Generates free text for an [`InferenceRequest`].
///
/// Object-safe so it can be stored as `Arc<dyn DescriptionModel>` in
/// [`TagConfig`] and shared across concurrently running link requests.
pub trait DescriptionModel: Send + Sync {
    fn describe<'a>(
        &'a self,
        request: &'a InferenceRequest,
    ) -> BoxFuture<'a, Result<String, InferenceError>>;
}

/// [`DescriptionModel`] backed by `edgequake-llm` chat providers.
pub struct LlmDescriptionModel {
    image_provider: Arc<dyn LLMProvider>,
    link_provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmDescriptionModel {
    pub fn new(
        image_provider: Arc<dyn LLMProvider>,
        link_provider: Arc<dyn LLMProvider>,
        config: &TagConfig,
    ) -> Self {
        Self {
            image_provider,
            link_provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

impl DescriptionModel for LlmDescriptionModel {
    fn describe<'a>(
        &'a self,
        request: &'a InferenceRequest,
    ) -> BoxFuture<'a, Result<String, InferenceError>> {
        Box::pin(async move {
            let provider = match request.role {
                ModelRole::Image => &self.image_provider,
                ModelRole::Link => &self.link_provider,
            };

            let mut messages = vec![ChatMessage::system(request.system.as_str())];
            match &request.image {
                Some(payload) => messages.push(ChatMessage::user_with_images(
                    request.prompt.as_str(),
                    vec![payload.to_image_data()],
                )),
                None => messages.push(ChatMessage::user(request.prompt.as_str())),
            }

            let options = self.options();
            let response = provider
                .chat(&messages, Some(&options))
                .await
                .map_err(|e| InferenceError(e.to_string()))?;

            debug!(
                "{:?} description: {} input tokens, {} output tokens",
                request.role, response.prompt_tokens, response.completion_tokens
            );
            Ok(response.content)
        })
    }
}

/// Resolve the description model, from most-specific to least-specific.
///
/// 1. **Pre-built model** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `image_model` and
///    `link_model` (link falls back to the image model).
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`]; both
///    roles share the detected provider.
pub fn resolve_model(config: &TagConfig) -> Result<Arc<dyn DescriptionModel>, AltTagError> {
    if let Some(ref model) = config.provider {
        return Ok(Arc::clone(model));
    }

    if let Some(ref name) = config.provider_name {
        let image_model = config.image_model.as_deref().unwrap_or(DEFAULT_MODEL);
        return build_pair(name, image_model, config);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let image_model = config.image_model.as_deref().unwrap_or(model.as_str());
            return build_pair(&prov, image_model, config);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let image_model = config.image_model.as_deref().unwrap_or(DEFAULT_MODEL);
            return build_pair("openai", image_model, config);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AltTagError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(Arc::new(LlmDescriptionModel::new(
        Arc::clone(&llm_provider),
        llm_provider,
        config,
    )))
}

fn build_pair(
    provider_name: &str,
    image_model: &str,
    config: &TagConfig,
) -> Result<Arc<dyn DescriptionModel>, AltTagError> {
    let link_model = config.link_model.as_deref().unwrap_or(image_model);
    let image = create_provider(provider_name, image_model)?;
    let link = if link_model == image_model {
        Arc::clone(&image)
    } else {
        create_provider(provider_name, link_model)?
    };
    Ok(Arc::new(LlmDescriptionModel::new(image, link, config)))
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AltTagError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AltTagError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
