//! Description Generator: turns references into descriptions.
//!
//! Two concurrency disciplines live side by side:
//!
//! * **Images** are described strictly one at a time in manifest order.
//!   Consecutive model calls are spaced by an [`IntervalScheduler`] so the
//!   inference service's rate limit is a declared policy, not a sleep buried
//!   in the loop.
//! * **Links** are all requested at once and joined. Link prompts are a
//!   single URL, so there is no concurrency cap.
//!
//! Every model call goes through the same retry loop: `max_retries`
//! additional attempts, exponential backoff (`retry_backoff_ms * 2^(n-1)`),
//! each attempt bounded by `api_timeout_secs`. What a reference that still
//! fails does to the run is decided by the per-class [`FailurePolicy`].
//!
//! [`FailurePolicy`]: crate::config::FailurePolicy

use crate::cancel::CancelToken;
use crate::config::TagConfig;
use crate::error::{AltTagError, ReferenceError};
use crate::model::{Description, DescriptionResult, ImageReference, LinkReference, ResultMap};
use crate::pipeline::fallback::link_fallback_text;
use crate::pipeline::inference::{DescriptionModel, ImagePayload, InferenceRequest, ModelRole};
use crate::pipeline::postprocess::{clean_description, interpret_image_reply};
use crate::pipeline::schedule::IntervalScheduler;
use crate::prompts::{image_user_prompt, link_user_prompt, IMAGE_SYSTEM_PROMPT, LINK_SYSTEM_PROMPT};
use futures::future::{try_join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Source of raw image bytes, addressed by manifest payload locator.
pub trait PayloadSource: Send + Sync {
    fn load<'a>(&'a self, locator: &'a str) -> BoxFuture<'a, Result<Vec<u8>, String>>;
}

impl PayloadSource for HashMap<String, Vec<u8>> {
    fn load<'a>(&'a self, locator: &'a str) -> BoxFuture<'a, Result<Vec<u8>, String>> {
        Box::pin(async move {
            self.get(locator)
                .cloned()
                .ok_or_else(|| "no payload supplied".to_string())
        })
    }
}

/// A finished link request: generated text, or the failure plus fallback text.
type SettledLink = (u32, Result<String, (ReferenceError, String)>);

/// Results of one generation phase.
#[derive(Debug, Default)]
pub struct GenerationOutcome {
    /// Descriptions keyed by reference id. Failed references have no entry.
    pub results: ResultMap,
    /// Non-fatal failures, in the order they happened.
    pub errors: Vec<ReferenceError>,
}

/// Drives the description model for one run.
pub struct Generator<'a> {
    model: Arc<dyn DescriptionModel>,
    config: &'a TagConfig,
    cancel: CancelToken,
}

impl<'a> Generator<'a> {
    pub fn new(
        model: Arc<dyn DescriptionModel>,
        config: &'a TagConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            model,
            config,
            cancel,
        }
    }

    /// Describe one image.
    ///
    /// The outer `Result` only fails on cancellation; a description that
    /// could not be produced is the inner `Err`. A reply that cleans up to
    /// nothing is such a failure, so the figure gets fallback text rather
    /// than being marked decorative.
    pub async fn generate_image_description(
        &self,
        reference: &ImageReference,
        payload: ImagePayload,
    ) -> Result<Result<DescriptionResult, ReferenceError>, AltTagError> {
        let request = InferenceRequest {
            role: ModelRole::Image,
            system: IMAGE_SYSTEM_PROMPT.to_string(),
            prompt: image_user_prompt(&reference.context),
            image: Some(payload),
        };
        let reply = self
            .cancel
            .guard(self.call_with_retry(reference.id, &request))
            .await?;

        Ok(reply.and_then(|raw| {
            match interpret_image_reply(&raw, self.config.clean_descriptions) {
                Some(description) => Ok(DescriptionResult {
                    reference_id: reference.id,
                    description,
                }),
                None => Err(ReferenceError::GenerationFailed {
                    object_id: reference.id,
                    retries: 0,
                    detail: format!("model reply has no description: {:?}", raw.trim()),
                }),
            }
        }))
    }

    /// Describe one link. An empty reply counts as a failure.
    pub async fn generate_link_description(
        &self,
        link: &LinkReference,
    ) -> Result<Result<String, ReferenceError>, AltTagError> {
        let request = InferenceRequest {
            role: ModelRole::Link,
            system: LINK_SYSTEM_PROMPT.to_string(),
            prompt: link_user_prompt(&link.target),
            image: None,
        };
        let reply = self
            .cancel
            .guard(self.call_with_retry(link.id, &request))
            .await?;

        Ok(reply.and_then(|raw| {
            let text = if self.config.clean_descriptions {
                clean_description(&raw)
            } else {
                raw.trim().to_string()
            };
            if text.is_empty() {
                Err(ReferenceError::GenerationFailed {
                    object_id: link.id,
                    retries: 0,
                    detail: "model returned an empty link description".into(),
                })
            } else {
                Ok(text)
            }
        }))
    }

    /// Describe every image in manifest order, one call at a time.
    pub async fn describe_images(
        &self,
        references: &[ImageReference],
        payloads: &dyn PayloadSource,
    ) -> Result<GenerationOutcome, AltTagError> {
        let mut scheduler = IntervalScheduler::new(self.config.image_interval());
        let mut outcome = GenerationOutcome::default();
        let total = references.len();

        for (index, reference) in references.iter().enumerate() {
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_image_start(reference.id, index, total);
            }

            let bytes = match self.cancel.guard(payloads.load(&reference.payload_path)).await? {
                Ok(bytes) if !bytes.is_empty() => bytes,
                Ok(_) => {
                    let err = payload_error(reference, "payload is empty".into());
                    self.record_image_failure(&mut outcome, index, total, err)?;
                    continue;
                }
                Err(detail) => {
                    let err = payload_error(reference, detail);
                    self.record_image_failure(&mut outcome, index, total, err)?;
                    continue;
                }
            };

            let delay = scheduler.pending_delay();
            if !delay.is_zero() {
                debug!("Figure {}: waiting {:?} for rate limit", reference.id, delay);
            }
            self.cancel.guard(scheduler.acquire()).await?;

            match self
                .generate_image_description(reference, ImagePayload::sniff(bytes))
                .await?
            {
                Ok(result) => {
                    let text_len = result.description.text().map_or(0, str::len);
                    debug!(
                        "Figure {} ({}/{}): {:?}",
                        reference.id,
                        index + 1,
                        total,
                        result.description
                    );
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_image_complete(reference.id, index, total, text_len);
                    }
                    outcome.results.insert(result);
                }
                Err(err) => self.record_image_failure(&mut outcome, index, total, err)?,
            }
        }

        info!(
            "Described {}/{} images ({} failed)",
            outcome.results.len(),
            total,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Describe every link concurrently and wait for all of them.
    ///
    /// Under fail-fast the first failure aborts the join and drops the
    /// requests still in flight. Under best-effort a failed link gets
    /// "Link to <domain>" and the failure is recorded.
    pub async fn describe_links(
        &self,
        links: &[LinkReference],
    ) -> Result<GenerationOutcome, AltTagError> {
        let fail_fast = self.config.link_failure_policy.is_fail_fast();

        let requests = links.iter().map(|link| async move {
            let outcome = self.generate_link_description(link).await?;
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_link_complete(link.id, outcome.is_ok());
            }
            let settled: Result<SettledLink, AltTagError> = match outcome {
                Ok(text) => Ok((link.id, Ok(text))),
                Err(err) if fail_fast => Err(AltTagError::LinkDescriptionFailed {
                    object_id: link.id,
                    url: link.target.clone(),
                    detail: err.to_string(),
                }),
                Err(err) => {
                    warn!("Link {} ({}): {}", link.id, link.target, err);
                    Ok((link.id, Err((err, link_fallback_text(&link.target)))))
                }
            };
            settled
        });
        let settled = try_join_all(requests).await?;

        let mut outcome = GenerationOutcome::default();
        for (id, result) in settled {
            match result {
                Ok(text) => outcome.results.insert(DescriptionResult {
                    reference_id: id,
                    description: Description::Text(text),
                }),
                Err((err, fallback)) => {
                    outcome.results.insert_fallback(id, &fallback);
                    outcome.errors.push(err);
                }
            }
        }
        info!(
            "Described {} links ({} with fallback text)",
            links.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Call the model with retry, backoff and a per-attempt timeout.
    async fn call_with_retry(
        &self,
        object_id: u32,
        request: &InferenceRequest,
    ) -> Result<String, ReferenceError> {
        let limit = self.config.api_timeout();
        let mut last_err: Option<String> = None;
        let mut every_attempt_timed_out = true;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.backoff_for(attempt);
                warn!(
                    "Object {}: retry {}/{} after {:?}",
                    object_id, attempt, self.config.max_retries, backoff
                );
                sleep(backoff).await;
            }

            match timeout(limit, self.model.describe(request)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => {
                    every_attempt_timed_out = false;
                    warn!("Object {}: attempt {} failed: {}", object_id, attempt + 1, e);
                    last_err = Some(e.to_string());
                }
                Err(_) => {
                    warn!("Object {}: attempt {} timed out", object_id, attempt + 1);
                    last_err = Some(format!("timed out after {:?}", limit));
                }
            }
        }

        if every_attempt_timed_out {
            return Err(ReferenceError::Timeout {
                object_id,
                secs: self.config.api_timeout_secs,
            });
        }
        Err(ReferenceError::GenerationFailed {
            object_id,
            retries: self.config.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    fn record_image_failure(
        &self,
        outcome: &mut GenerationOutcome,
        index: usize,
        total: usize,
        err: ReferenceError,
    ) -> Result<(), AltTagError> {
        let object_id = err.object_id();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_image_error(object_id, index, total, &err.to_string());
        }
        if self.config.image_failure_policy.is_fail_fast() {
            return Err(AltTagError::ImageDescriptionFailed {
                object_id,
                detail: err.to_string(),
            });
        }
        warn!("Figure {}: {}; fallback text will be used", object_id, err);
        outcome.errors.push(err);
        Ok(())
    }
}

fn payload_error(reference: &ImageReference, detail: String) -> ReferenceError {
    ReferenceError::PayloadUnavailable {
        object_id: reference.id,
        locator: reference.payload_path.clone(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::pipeline::inference::InferenceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{Duration, Instant};

    /// Replies by looking up a key in the prompt; unknown keys fail.
    struct Scripted {
        replies: Vec<(&'static str, Result<&'static str, &'static str>)>,
        calls: AtomicUsize,
        started: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(replies: Vec<(&'static str, Result<&'static str, &'static str>)>) -> Arc<Self> {
            Arc::new(Self {
                replies,
                calls: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
            })
        }
    }

    impl DescriptionModel for Scripted {
        fn describe<'a>(
            &'a self,
            request: &'a InferenceRequest,
        ) -> BoxFuture<'a, Result<String, InferenceError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.started.lock().unwrap().push(Instant::now());
                for (key, reply) in &self.replies {
                    if request.prompt.contains(key) {
                        return reply
                            .map(str::to_string)
                            .map_err(|e| InferenceError(e.to_string()));
                    }
                }
                Err(InferenceError("no script".into()))
            })
        }
    }

    fn image(id: u32) -> ImageReference {
        ImageReference {
            id,
            payload_path: format!("fig{id}.png"),
            context: format!("context-{id}"),
        }
    }

    fn payloads(ids: &[u32]) -> HashMap<String, Vec<u8>> {
        ids.iter()
            .map(|id| (format!("fig{id}.png"), vec![0x89, b'P', b'N', b'G']))
            .collect()
    }

    fn config() -> TagConfig {
        TagConfig::builder()
            .image_interval_ms(0)
            .max_retries(0)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn image_replies_map_to_descriptions() {
        let model = Scripted::new(vec![
            ("context-5", Ok("")),
            ("context-7", Ok("Image of a red bicycle.")),
            ("context-8", Ok("ARTIFACT")),
        ]);
        let config = config();
        let gen = Generator::new(model, &config, CancelToken::never());
        let out = gen
            .describe_images(&[image(5), image(7), image(8)], &payloads(&[5, 7, 8]))
            .await
            .unwrap();

        assert_eq!(out.results.get(5), Some(&Description::decorative()));
        assert_eq!(
            out.results.get(7),
            Some(&Description::Text("A red bicycle".into()))
        );
        assert_eq!(out.results.get(8), Some(&Description::Artifact));
        assert!(out.errors.is_empty());
    }

    #[tokio::test]
    async fn failed_image_is_left_unresolved() {
        let model = Scripted::new(vec![("context-7", Ok("a red bicycle"))]);
        let config = config();
        let gen = Generator::new(model, &config, CancelToken::never());
        let out = gen
            .describe_images(&[image(7), image(9)], &payloads(&[7, 9]))
            .await
            .unwrap();

        assert!(out.results.contains(7));
        assert!(!out.results.contains(9));
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].object_id(), 9);
    }

    #[tokio::test]
    async fn label_only_reply_falls_through_to_fallback() {
        let model = Scripted::new(vec![
            ("context-4", Ok("Alt text:")),
            ("context-6", Ok("\"\"")),
        ]);
        let config = config();
        let gen = Generator::new(model, &config, CancelToken::never());
        let out = gen
            .describe_images(&[image(4), image(6)], &payloads(&[4, 6]))
            .await
            .unwrap();

        assert!(out.results.is_empty());
        assert_eq!(out.errors.len(), 2);
        assert!(matches!(
            out.errors[0],
            ReferenceError::GenerationFailed { object_id: 4, .. }
        ));
    }

    #[tokio::test]
    async fn missing_payload_is_recorded_without_a_call() {
        let model = Scripted::new(vec![]);
        let config = config();
        let gen = Generator::new(model.clone(), &config, CancelToken::never());
        let out = gen.describe_images(&[image(3)], &payloads(&[])).await.unwrap();

        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            out.errors[0],
            ReferenceError::PayloadUnavailable { object_id: 3, .. }
        ));
    }

    #[tokio::test]
    async fn image_fail_fast_aborts() {
        let model = Scripted::new(vec![]);
        let config = TagConfig::builder()
            .image_interval_ms(0)
            .max_retries(0)
            .image_failure_policy(FailurePolicy::FailFast)
            .build()
            .unwrap();
        let gen = Generator::new(model, &config, CancelToken::never());
        let err = gen
            .describe_images(&[image(9)], &payloads(&[9]))
            .await
            .unwrap_err();
        assert!(matches!(err, AltTagError::ImageDescriptionFailed { object_id: 9, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff() {
        let model = Scripted::new(vec![]);
        let config = TagConfig::builder()
            .max_retries(2)
            .retry_backoff_ms(100)
            .build()
            .unwrap();
        let gen = Generator::new(model.clone(), &config, CancelToken::never());
        let start = Instant::now();
        let err = gen
            .generate_link_description(&LinkReference {
                id: 12,
                target: "https://example.org".into(),
            })
            .await
            .unwrap()
            .unwrap_err();

        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(matches!(err, ReferenceError::GenerationFailed { retries: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn images_are_spaced_by_the_interval() {
        let model = Scripted::new(vec![("context", Ok("a chart"))]);
        let config = TagConfig::builder().image_interval_ms(5_000).build().unwrap();
        let gen = Generator::new(model.clone(), &config, CancelToken::never());
        gen.describe_images(&[image(1), image(2), image(3)], &payloads(&[1, 2, 3]))
            .await
            .unwrap();

        let started = model.started.lock().unwrap().clone();
        assert_eq!(started.len(), 3);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test]
    async fn link_failure_is_fatal_by_default() {
        let model = Scripted::new(vec![("https://ok.example", Ok("Example homepage"))]);
        let config = config();
        let gen = Generator::new(model, &config, CancelToken::never());
        let links = vec![
            LinkReference {
                id: 20,
                target: "https://ok.example".into(),
            },
            LinkReference {
                id: 21,
                target: "https://example.org".into(),
            },
        ];
        let err = gen.describe_links(&links).await.unwrap_err();
        match err {
            AltTagError::LinkDescriptionFailed { object_id, url, .. } => {
                assert_eq!(object_id, 21);
                assert_eq!(url, "https://example.org");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Answers every call after a fixed delay.
    struct Slow {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl DescriptionModel for Slow {
        fn describe<'a>(
            &'a self,
            _request: &'a InferenceRequest,
        ) -> BoxFuture<'a, Result<String, InferenceError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                Ok("Example homepage".to_string())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn links_are_requested_concurrently() {
        let model = Arc::new(Slow {
            delay: Duration::from_secs(1),
            calls: AtomicUsize::new(0),
        });
        let config = config();
        let gen = Generator::new(model.clone(), &config, CancelToken::never());
        let links: Vec<LinkReference> = (20..28)
            .map(|id| LinkReference {
                id,
                target: format!("https://example.org/{id}"),
            })
            .collect();

        let start = Instant::now();
        let out = gen.describe_links(&links).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(model.calls.load(Ordering::SeqCst), 8);
        assert_eq!(out.results.len(), 8);
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2), "links ran serially: {elapsed:?}");
    }

    #[tokio::test]
    async fn best_effort_links_get_domain_fallback() {
        let model = Scripted::new(vec![]);
        let config = TagConfig::builder()
            .max_retries(0)
            .link_failure_policy(FailurePolicy::BestEffort)
            .build()
            .unwrap();
        let gen = Generator::new(model, &config, CancelToken::never());
        let out = gen
            .describe_links(&[LinkReference {
                id: 20,
                target: "https://www.example.org/about".into(),
            }])
            .await
            .unwrap();
        assert_eq!(
            out.results.get(20),
            Some(&Description::Text("Link to example.org".into()))
        );
        assert_eq!(out.errors.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_generation() {
        let model = Scripted::new(vec![("context", Ok("a chart"))]);
        let config = config();
        let (handle, token) = crate::cancel::cancel_pair();
        handle.cancel();
        let gen = Generator::new(model.clone(), &config, token);
        let err = gen
            .describe_images(&[image(1)], &payloads(&[1]))
            .await
            .unwrap_err();
        assert!(matches!(err, AltTagError::Cancelled));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
