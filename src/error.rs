//! Error types for the edgequake-pdf-alttag library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AltTagError`] — **Fatal**: the run cannot produce a tagged document
//!   (unreadable input, corrupt PDF, broken manifest, a link description
//!   failing under the fail-fast policy). Returned as `Err(AltTagError)` from
//!   the top-level `tag_*` functions. Nothing is published.
//!
//! * [`ReferenceError`] — **Non-fatal**: a single image reference could not
//!   be described (transient API error, missing payload). Recorded in
//!   [`crate::output::RunReport`]; the reference later receives fallback text.
//!
//! Which of the two a generation failure becomes is decided per reference
//! class by [`crate::config::FailurePolicy`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf-alttag library.
#[derive(Debug, Error)]
pub enum AltTagError {
    // ── Storage errors ────────────────────────────────────────────────────
    /// The object store has no object under the given key.
    #[error("Object '{key}' not found in store")]
    ObjectNotFound { key: String },

    /// Reading from the object store failed for a reason other than absence.
    #[error("Failed to read '{key}' from store: {reason}")]
    StoreRead { key: String, reason: String },

    /// Writing the tagged document to the object store failed.
    #[error("Failed to write '{key}' to store: {reason}")]
    StoreWrite { key: String, reason: String },

    /// A local scratch file could not be created or written.
    #[error("Scratch I/O failed for '{path}': {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Document errors ───────────────────────────────────────────────────
    /// The fetched bytes do not start with the `%PDF` header.
    #[error("Object '{key}' is not a PDF\nFirst bytes: {magic:?}")]
    NotAPdf { key: String, magic: Vec<u8> },

    /// The PDF could not be parsed into an object graph.
    #[error("PDF '{key}' is corrupt: {detail}")]
    CorruptPdf { key: String, detail: String },

    /// Serialising the mutated object graph failed.
    #[error("Failed to serialise tagged PDF: {detail}")]
    SaveFailed { detail: String },

    // ── Manifest errors ───────────────────────────────────────────────────
    /// A manifest record is malformed (bad id, missing payload, duplicate id).
    #[error("Invalid manifest '{source_name}' at record {record}: {detail}")]
    ManifestInvalid {
        source_name: String,
        record: usize,
        detail: String,
    },

    /// The SQLite manifest could not be opened or queried.
    #[error("Manifest database error: {0}")]
    ManifestDatabase(#[from] rusqlite::Error),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A link description failed and the link policy is fail-fast.
    #[error("Link description failed for object {object_id} ({url}): {detail}")]
    LinkDescriptionFailed {
        object_id: u32,
        url: String,
        detail: String,
    },

    /// An image description failed and the image policy is fail-fast.
    #[error("Image description failed for object {object_id}: {detail}")]
    ImageDescriptionFailed { object_id: u32, detail: String },

    // ── Control ───────────────────────────────────────────────────────────
    /// The run was cancelled through its [`crate::cancel::CancelHandle`].
    #[error("Run cancelled before completion")]
    Cancelled,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single reference.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ReferenceError {
    /// The model call failed on every attempt.
    #[error("Object {object_id}: description failed after {retries} retries: {detail}")]
    GenerationFailed {
        object_id: u32,
        retries: u32,
        detail: String,
    },

    /// The model call exceeded the per-call timeout on every attempt.
    #[error("Object {object_id}: description timed out after {secs}s")]
    Timeout { object_id: u32, secs: u64 },

    /// The image payload could not be fetched or is empty.
    #[error("Object {object_id}: payload '{locator}' unavailable: {detail}")]
    PayloadUnavailable {
        object_id: u32,
        locator: String,
        detail: String,
    },
}

impl ReferenceError {
    /// Object number of the reference this error belongs to.
    pub fn object_id(&self) -> u32 {
        match self {
            ReferenceError::GenerationFailed { object_id, .. }
            | ReferenceError::Timeout { object_id, .. }
            | ReferenceError::PayloadUnavailable { object_id, .. } => *object_id,
        }
    }
}
