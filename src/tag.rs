//! Run entry points: load, describe, tag, publish.
//!
//! A run is strictly staged. Generation finishes completely (images, then
//! links) before the fallback resolver fills gaps, and only then does the
//! tagger touch the graph. Nothing is published unless every stage succeeds,
//! and the scratch workspace is removed however the run ends.

use crate::cancel::CancelToken;
use crate::config::TagConfig;
use crate::error::AltTagError;
use crate::model::ImageReference;
use crate::output::RunReport;
use crate::pipeline::fallback::resolve_defaults;
use crate::pipeline::generate::{Generator, PayloadSource};
use crate::pipeline::graph::DocumentGraph;
use crate::pipeline::inference::{resolve_model, DescriptionModel};
use crate::pipeline::manifest::load_manifest;
use crate::pipeline::publish::{publish, save, Scratch, StorePayloads};
use crate::pipeline::tagger::tag;
use crate::store::{derive_output_key, ObjectStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Where one run finds its inputs in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagJob {
    /// Key of the structurally tagged input document.
    pub document_key: String,
    /// Key of the image manifest (SQLite or text).
    pub manifest_key: String,
    /// Prefix joined to each manifest payload locator to form its key.
    pub payload_prefix: String,
}

impl TagJob {
    /// Payload locators resolve relative to the manifest's directory.
    pub fn new(document_key: impl Into<String>, manifest_key: impl Into<String>) -> Self {
        let manifest_key = manifest_key.into();
        let payload_prefix = match manifest_key.rfind('/') {
            Some(pos) => manifest_key[..=pos].to_string(),
            None => String::new(),
        };
        Self {
            document_key: document_key.into(),
            manifest_key,
            payload_prefix,
        }
    }

    pub fn with_payload_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.payload_prefix = prefix.into();
        self
    }
}

/// Tag one document in the store and publish the result.
///
/// # Errors
/// Any [`AltTagError`] aborts the run; nothing is published. Integrity
/// problems (manifest ids with no figure node) are reported, not fatal.
pub async fn tag_document(
    store: &dyn ObjectStore,
    job: &TagJob,
    config: &TagConfig,
) -> Result<RunReport, AltTagError> {
    tag_document_with_cancel(store, job, config, CancelToken::never()).await
}

/// [`tag_document`] with a cancellation token honoured at every suspension
/// point.
pub async fn tag_document_with_cancel(
    store: &dyn ObjectStore,
    job: &TagJob,
    config: &TagConfig,
    cancel: CancelToken,
) -> Result<RunReport, AltTagError> {
    let total_start = Instant::now();
    info!("Starting tagging run: {}", job.document_key);

    let model = resolve_model(config)?;
    let scratch = Scratch::new()?;

    // ── Step 1: Fetch and parse the document ─────────────────────────────
    let document = cancel.guard(store.get(&job.document_key)).await??;
    scratch.stage(&job.document_key, &document).await?;
    let graph = load_graph(&job.document_key, &document)?;
    drop(document);

    // ── Step 2: Fetch and load the manifest ──────────────────────────────
    let manifest = cancel.guard(store.get(&job.manifest_key)).await??;
    let manifest_path = scratch.stage(&job.manifest_key, &manifest).await?;
    let references = load_manifest(&manifest_path).await?;

    // ── Steps 3-6: Generate, resolve defaults, tag, serialise ────────────
    let payloads = StorePayloads::new(store, &job.payload_prefix, &scratch);
    let (mut report, bytes) =
        run_engine(graph, &references, &payloads, model, config, &cancel).await?;

    // ── Step 7: Publish ──────────────────────────────────────────────────
    let output_key =
        derive_output_key(&job.document_key, &config.input_prefix, &config.output_prefix);
    let ack = cancel.guard(publish(store, &output_key, bytes)).await??;

    report.document_key = job.document_key.clone();
    report.output_key = ack.key;
    report.output_bytes = ack.bytes;
    report.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Tagging complete: {} resolved, {} fallback, {} links, {}ms total",
        report.resolved(),
        report.fallback,
        report.links_tagged + report.links_fallback,
        report.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(report.resolved(), report.fallback);
    }
    Ok(report)
}

/// Tag a document held in memory.
///
/// `payloads` maps manifest payload locators to image bytes. Returns the
/// tagged document and the run report; the report's keys are empty.
pub async fn tag_bytes(
    document: &[u8],
    manifest: &[u8],
    payloads: &HashMap<String, Vec<u8>>,
    config: &TagConfig,
) -> Result<(Vec<u8>, RunReport), AltTagError> {
    let total_start = Instant::now();
    let model = resolve_model(config)?;
    let graph = load_graph("<memory>", document)?;

    let scratch = Scratch::new()?;
    let manifest_path = scratch.stage("manifest", manifest).await?;
    let references = load_manifest(&manifest_path).await?;

    let (mut report, bytes) = run_engine(
        graph,
        &references,
        payloads,
        model,
        config,
        &CancelToken::never(),
    )
    .await?;
    report.output_bytes = bytes.len();
    report.total_duration_ms = total_start.elapsed().as_millis() as u64;
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(report.resolved(), report.fallback);
    }
    Ok((bytes, report))
}

/// Check the header and parse the object graph.
fn load_graph(key: &str, bytes: &[u8]) -> Result<DocumentGraph, AltTagError> {
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(AltTagError::NotAPdf {
            key: key.to_string(),
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    DocumentGraph::from_bytes(bytes).map_err(|e| AltTagError::CorruptPdf {
        key: key.to_string(),
        detail: e.to_string(),
    })
}

/// Generation, fallback, tagging and serialisation, in that order.
async fn run_engine(
    mut graph: DocumentGraph,
    references: &[ImageReference],
    payloads: &dyn PayloadSource,
    model: Arc<dyn DescriptionModel>,
    config: &TagConfig,
    cancel: &CancelToken,
) -> Result<(RunReport, Vec<u8>), AltTagError> {
    let links = graph.pending_links();
    info!(
        "{} image references, {} figure nodes, {} links to describe",
        references.len(),
        graph.figure_ids().len(),
        links.len()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(references.len(), links.len());
    }

    // Generation completes before anything else reads the results.
    let generator = Generator::new(model, config, cancel.clone());
    let gen_start = Instant::now();
    let images = generator.describe_images(references, payloads).await?;
    let link_outcome = generator.describe_links(&links).await?;
    let generation_duration_ms = gen_start.elapsed().as_millis() as u64;

    let mut image_results = images.results;
    let mut errors = images.errors;
    errors.extend(link_outcome.errors);
    let mut link_results = link_outcome.results;

    let defaulted = resolve_defaults(references, &mut image_results, &config.fallback_text);
    if defaulted > 0 {
        info!("{} image reference(s) fall back to default text", defaulted);
    }

    if cancel.is_cancelled() {
        return Err(AltTagError::Cancelled);
    }
    let stats = tag(&mut graph, &mut image_results, &mut link_results)?;

    let unmatched_ids = image_results.remaining_ids();
    if !unmatched_ids.is_empty() {
        warn!(
            "Manifest integrity: {} id(s) match no figure node: {:?}",
            unmatched_ids.len(),
            unmatched_ids
        );
    }

    let bytes = save(&mut graph)?;

    let report = RunReport {
        images_total: references.len(),
        described: stats.described,
        decorative: stats.decorative,
        artifacts: stats.artifacts,
        fallback: stats.fallback,
        links_total: links.len(),
        links_tagged: stats.links_tagged,
        links_fallback: stats.links_fallback,
        unmatched_ids,
        untracked_figures: stats.untracked_figures,
        errors,
        output_bytes: bytes.len(),
        generation_duration_ms,
        ..Default::default()
    };
    Ok((report, bytes))
}
