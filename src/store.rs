//! Addressable object stores the engine reads from and publishes to.
//!
//! The engine only needs `get` and `put` by key. [`LocalStore`] maps keys
//! onto a directory tree; [`HttpStore`] maps them onto `GET`/`PUT` requests
//! under a base URL (presigned-style gateways, object-store HTTP fronts).

use crate::error::AltTagError;
use futures::future::BoxFuture;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Key/value access to documents, manifests and image payloads.
pub trait ObjectStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, AltTagError>>;

    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<(), AltTagError>>;
}

/// Derive the published key from the input document key.
///
/// The directory part is kept; the file name loses `input_prefix` (when
/// present) and gains `output_prefix`:
/// `temp/report/COMPLIANT_report.pdf` → `temp/report/FINAL_report.pdf`.
pub fn derive_output_key(input_key: &str, input_prefix: &str, output_prefix: &str) -> String {
    let (dir, name) = match input_key.rfind('/') {
        Some(pos) => (&input_key[..=pos], &input_key[pos + 1..]),
        None => ("", input_key),
    };
    let base = if input_prefix.is_empty() {
        name
    } else {
        name.strip_prefix(input_prefix).unwrap_or(name)
    };
    format!("{dir}{output_prefix}{base}")
}

// ── Local filesystem ─────────────────────────────────────────────────────

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, refusing keys that escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, AltTagError> {
        let rel = Path::new(key.trim_start_matches('/'));
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.trim().is_empty() || escapes {
            return Err(AltTagError::StoreRead {
                key: key.to_string(),
                reason: "key must be a relative path inside the store".into(),
            });
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStore for LocalStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, AltTagError>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            debug!("Reading {}", path.display());
            tokio::fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AltTagError::ObjectNotFound {
                        key: key.to_string(),
                    }
                } else {
                    AltTagError::StoreRead {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
        })
    }

    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<(), AltTagError>> {
        Box::pin(async move {
            let path = self.resolve(key).map_err(|_| AltTagError::StoreWrite {
                key: key.to_string(),
                reason: "key must be a relative path inside the store".into(),
            })?;
            let write_err = |e: std::io::Error| AltTagError::StoreWrite {
                key: key.to_string(),
                reason: e.to_string(),
            };

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
            }

            // Atomic write: temp file + rename, so readers never see half a PDF.
            let tmp_path = path.with_extension("part");
            let staged = async {
                tokio::fs::write(&tmp_path, &bytes).await?;
                tokio::fs::rename(&tmp_path, &path).await
            }
            .await;
            if let Err(e) = staged {
                if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                    debug!("Could not remove {}: {}", tmp_path.display(), cleanup);
                }
                return Err(write_err(e));
            }
            debug!("Wrote {} bytes to {}", bytes.len(), path.display());
            Ok(())
        })
    }
}

// ── HTTP ─────────────────────────────────────────────────────────────────

/// Object store reached over HTTP: `GET {base}/{key}` and `PUT {base}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpStore {
    base: reqwest::Url,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, AltTagError> {
        let mut base = reqwest::Url::parse(base_url).map_err(|e| {
            AltTagError::InvalidConfig(format!("invalid store URL '{base_url}': {e}"))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AltTagError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { base, client })
    }

    fn url_for(&self, key: &str) -> Result<reqwest::Url, String> {
        self.base
            .join(key.trim_start_matches('/'))
            .map_err(|e| e.to_string())
    }
}

impl ObjectStore for HttpStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, AltTagError>> {
        Box::pin(async move {
            let read_err = |reason: String| AltTagError::StoreRead {
                key: key.to_string(),
                reason,
            };
            let url = self.url_for(key).map_err(read_err)?;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| read_err(e.to_string()))?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(AltTagError::ObjectNotFound {
                    key: key.to_string(),
                });
            }
            if !response.status().is_success() {
                return Err(read_err(format!("HTTP {}", response.status())));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| read_err(e.to_string()))?;
            Ok(bytes.to_vec())
        })
    }

    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<(), AltTagError>> {
        Box::pin(async move {
            let write_err = |reason: String| AltTagError::StoreWrite {
                key: key.to_string(),
                reason,
            };
            let url = self.url_for(key).map_err(write_err)?;
            let response = self
                .client
                .put(url)
                .header(reqwest::header::CONTENT_TYPE, "application/pdf")
                .body(bytes)
                .send()
                .await
                .map_err(|e| write_err(e.to_string()))?;
            if !response.status().is_success() {
                return Err(write_err(format!("HTTP {}", response.status())));
            }
            Ok(())
        })
    }
}
