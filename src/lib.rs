//! # edgequake-pdf-alttag
//!
//! Attach LLM-generated alternative text to the figures and links of a
//! structurally tagged PDF, mutating its object graph in place.
//!
//! ## Pipeline Overview
//!
//! ```text
//! tagged PDF + image manifest
//!  │
//!  ├─ 1. Load      fetch document and manifest (SQLite or text) from the store
//!  ├─ 2. Describe  figures one at a time behind a fixed-interval scheduler,
//!  │               links concurrently; retry, backoff and timeout per call
//!  ├─ 3. Fallback  default text for figures that got no result at all
//!  ├─ 4. Tag       one pass over the object graph, matched by object number
//!  └─ 5. Publish   serialise, write FINAL_<name>, drop the scratch workspace
//! ```
//!
//! Figure descriptions can also be an explicit empty string (decorative
//! image) or the `ARTIFACT` sentinel, which reclassifies the structure
//! element as an artifact and attaches no text. Empty text is never replaced
//! by the fallback.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf_alttag::{tag_document, LocalStore, TagConfig, TagJob};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let store = LocalStore::new("./bucket");
//!     let job = TagJob::new(
//!         "temp/report/COMPLIANT_report.pdf",
//!         "temp/report/report.pdf_temp_images_data.db",
//!     );
//!     let report = tag_document(&store, &job, &TagConfig::default()).await?;
//!     eprintln!("{} described, {} fallback -> {}",
//!         report.described, report.fallback, report.output_key);
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Policies
//!
//! | Class  | Default      | On failure |
//! |--------|--------------|------------|
//! | images | best-effort  | recorded in the report, figure gets fallback text |
//! | links  | fail-fast    | run aborts, nothing is published |
//!
//! Both are configurable through [`TagConfigBuilder`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-alttag` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;
pub mod tag;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::{FailurePolicy, TagConfig, TagConfigBuilder, DEFAULT_FALLBACK_TEXT};
pub use error::{AltTagError, ReferenceError};
pub use model::{Description, DescriptionResult, ImageReference, LinkReference, ResultMap};
pub use output::RunReport;
pub use pipeline::inference::{DescriptionModel, InferenceError, InferenceRequest, ModelRole};
pub use progress::{NoopProgressCallback, ProgressCallback, TaggingProgressCallback};
pub use store::{derive_output_key, HttpStore, LocalStore, ObjectStore};
pub use tag::{tag_bytes, tag_document, tag_document_with_cancel, TagJob};
