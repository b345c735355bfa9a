//! Configuration types for a tagging run.
//!
//! All run behaviour is controlled through [`TagConfig`], built via its
//! [`TagConfigBuilder`]. The builder clamps numeric knobs to sane ranges and
//! `build()` rejects combinations that would corrupt the output location.

use crate::error::AltTagError;
use crate::pipeline::inference::DescriptionModel;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default text attached to a figure whose description was never produced.
pub const DEFAULT_FALLBACK_TEXT: &str = "No description available";

/// Configuration for one tagging run.
///
/// # Example
/// ```rust
/// use edgequake_pdf_alttag::{FailurePolicy, TagConfig};
///
/// let config = TagConfig::builder()
///     .image_interval_ms(2_000)
///     .link_failure_policy(FailurePolicy::BestEffort)
///     .build()
///     .unwrap();
/// assert_eq!(config.image_interval().as_millis(), 2_000);
/// ```
#[derive(Clone)]
pub struct TagConfig {
    /// Pre-constructed description model. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn DescriptionModel>>,

    /// LLM provider name (e.g. "openai", "anthropic"). If None along with
    /// `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Vision model used for figures. If None, uses the provider default.
    pub image_model: Option<String>,

    /// Text model used for links. Cheaper models are fine: the prompt is
    /// a single URL. If None, falls back to `image_model`.
    pub link_model: Option<String>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens per description. Default: 512.
    pub max_tokens: usize,

    /// Retry attempts after a failed model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Minimum spacing between consecutive image calls. Default: 5000.
    ///
    /// Image descriptions are generated strictly one at a time in manifest
    /// order, and each call starts no sooner than this after the previous
    /// one started.
    pub image_interval_ms: u64,

    /// What a failed image description does to the run. Default: BestEffort.
    pub image_failure_policy: FailurePolicy,

    /// What a failed link description does to the run. Default: FailFast.
    pub link_failure_policy: FailurePolicy,

    /// Text attached to figures that got no description at all.
    pub fallback_text: String,

    /// Apply deterministic cleanup rules to model output. Default: true.
    pub clean_descriptions: bool,

    /// Prefix carried by the input document's file name. Default: "COMPLIANT_".
    pub input_prefix: String,

    /// Prefix given to the published document's file name. Default: "FINAL_".
    pub output_prefix: String,

    /// Optional per-reference progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            provider: None,
            provider_name: None,
            image_model: None,
            link_model: None,
            temperature: 0.2,
            max_tokens: 512,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            image_interval_ms: 5_000,
            image_failure_policy: FailurePolicy::BestEffort,
            link_failure_policy: FailurePolicy::FailFast,
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
            clean_descriptions: true,
            input_prefix: "COMPLIANT_".to_string(),
            output_prefix: "FINAL_".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TagConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagConfig")
            .field("provider", &self.provider.as_ref().map(|_| "<dyn DescriptionModel>"))
            .field("provider_name", &self.provider_name)
            .field("image_model", &self.image_model)
            .field("link_model", &self.link_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("image_interval_ms", &self.image_interval_ms)
            .field("image_failure_policy", &self.image_failure_policy)
            .field("link_failure_policy", &self.link_failure_policy)
            .field("fallback_text", &self.fallback_text)
            .field("input_prefix", &self.input_prefix)
            .field("output_prefix", &self.output_prefix)
            .finish()
    }
}

impl TagConfig {
    /// Create a new builder for `TagConfig`.
    pub fn builder() -> TagConfigBuilder {
        TagConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn image_interval(&self) -> Duration {
        Duration::from_millis(self.image_interval_ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// Backoff before retry `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Builder for [`TagConfig`].
#[derive(Debug)]
pub struct TagConfigBuilder {
    config: TagConfig,
}

impl TagConfigBuilder {
    pub fn provider(mut self, provider: Arc<dyn DescriptionModel>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.config.image_model = Some(model.into());
        self
    }

    pub fn link_model(mut self, model: impl Into<String>) -> Self {
        self.config.link_model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn image_interval_ms(mut self, ms: u64) -> Self {
        self.config.image_interval_ms = ms;
        self
    }

    pub fn image_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.image_failure_policy = policy;
        self
    }

    pub fn link_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.link_failure_policy = policy;
        self
    }

    pub fn fallback_text(mut self, text: impl Into<String>) -> Self {
        self.config.fallback_text = text.into();
        self
    }

    pub fn clean_descriptions(mut self, v: bool) -> Self {
        self.config.clean_descriptions = v;
        self
    }

    pub fn input_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.input_prefix = prefix.into();
        self
    }

    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_prefix = prefix.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TagConfig, AltTagError> {
        let c = &self.config;
        if c.fallback_text.trim().is_empty() {
            // Must stay distinct from the decorative empty string.
            return Err(AltTagError::InvalidConfig(
                "fallback text must not be empty".into(),
            ));
        }
        if c.output_prefix.is_empty() {
            return Err(AltTagError::InvalidConfig(
                "output prefix must not be empty".into(),
            ));
        }
        if c.output_prefix == c.input_prefix {
            return Err(AltTagError::InvalidConfig(format!(
                "output prefix '{}' would overwrite the input document",
                c.output_prefix
            )));
        }
        if c.max_tokens == 0 {
            return Err(AltTagError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a failed description affects the run, set per reference class.
///
/// The defaults reproduce the historical behaviour of the pipeline (images
/// best-effort, links fail-fast). The asymmetry is kept as a default only;
/// both classes accept either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Record the failure, leave the reference to the fallback text, continue.
    BestEffort,
    /// Abort the whole run; nothing is published.
    FailFast,
}

impl FailurePolicy {
    pub fn is_fail_fast(self) -> bool {
        matches!(self, FailurePolicy::FailFast)
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = AltTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "best-effort" | "besteffort" | "lenient" => Ok(FailurePolicy::BestEffort),
            "fail-fast" | "failfast" | "strict" => Ok(FailurePolicy::FailFast),
            other => Err(AltTagError::InvalidConfig(format!(
                "unknown failure policy '{other}' (expected best-effort or fail-fast)"
            ))),
        }
    }
}
