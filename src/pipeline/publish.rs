//! Persistence/Publish, plus the scratch workspace a run stages files in.
//!
//! The [`Scratch`] directory holds the downloaded document, the manifest and
//! every fetched payload. It is a [`TempDir`], so it is removed when the run
//! drops it, on success, on error and on panic alike.

use crate::error::AltTagError;
use crate::pipeline::generate::PayloadSource;
use crate::pipeline::graph::DocumentGraph;
use crate::store::ObjectStore;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Receipt for a published document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub key: String,
    pub bytes: usize,
}

/// Per-run local staging directory.
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new() -> Result<Self, AltTagError> {
        let dir = tempfile::Builder::new()
            .prefix("pdf-alttag-")
            .tempdir()
            .map_err(|e| AltTagError::Scratch {
                path: std::env::temp_dir(),
                source: e,
            })?;
        debug!("Scratch workspace at {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `bytes` under `name` (a store key; directories are created).
    pub async fn stage(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, AltTagError> {
        let rel: PathBuf = Path::new(name)
            .components()
            .filter(|c| matches!(c, std::path::Component::Normal(_)))
            .collect();
        let path = self.dir.path().join(rel);
        let scratch_err = |e: std::io::Error| AltTagError::Scratch {
            path: path.clone(),
            source: e,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(scratch_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(scratch_err)?;
        Ok(path)
    }
}

/// Fetches payloads from the object store under a key prefix and stages a
/// copy of each in the scratch workspace.
pub struct StorePayloads<'a> {
    store: &'a dyn ObjectStore,
    prefix: &'a str,
    scratch: &'a Scratch,
}

impl<'a> StorePayloads<'a> {
    pub fn new(store: &'a dyn ObjectStore, prefix: &'a str, scratch: &'a Scratch) -> Self {
        Self {
            store,
            prefix,
            scratch,
        }
    }

    pub fn key_for(&self, locator: &str) -> String {
        format!("{}{}", self.prefix, locator.trim_start_matches('/'))
    }
}

impl PayloadSource for StorePayloads<'_> {
    fn load<'b>(&'b self, locator: &'b str) -> BoxFuture<'b, Result<Vec<u8>, String>> {
        Box::pin(async move {
            let key = self.key_for(locator);
            let bytes = self.store.get(&key).await.map_err(|e| e.to_string())?;
            self.scratch
                .stage(&key, &bytes)
                .await
                .map_err(|e| e.to_string())?;
            Ok(bytes)
        })
    }
}

/// Serialise the mutated graph.
pub fn save(graph: &mut DocumentGraph) -> Result<Vec<u8>, AltTagError> {
    graph.save().map_err(|e| AltTagError::SaveFailed {
        detail: e.to_string(),
    })
}

/// Hand the serialised document to the store. Failures are returned, never
/// retried here.
pub async fn publish(
    store: &dyn ObjectStore,
    key: &str,
    bytes: Vec<u8>,
) -> Result<Ack, AltTagError> {
    let len = bytes.len();
    store.put(key, bytes).await?;
    info!("Published {} ({} bytes)", key, len);
    Ok(Ack {
        key: key.to_string(),
        bytes: len,
    })
}
