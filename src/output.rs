//! Per-run report returned by the `tag_*` entry points.

use crate::error::ReferenceError;
use serde::{Deserialize, Serialize};

/// What happened during one completed run.
///
/// Aborted runs return `Err(AltTagError)` instead, so a `RunReport` always
/// describes a document that was tagged and published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Store key of the input document.
    pub document_key: String,
    /// Store key the tagged document was published under.
    pub output_key: String,

    /// Image references in the manifest.
    pub images_total: usize,
    /// Figures that received generated, non-empty alternative text.
    pub described: usize,
    /// Figures that received an explicit empty (decorative) description.
    pub decorative: usize,
    /// Figures reclassified as artifacts.
    pub artifacts: usize,
    /// Figures that received the default fallback text.
    pub fallback: usize,

    /// Link annotations discovered in the graph.
    pub links_total: usize,
    /// Link annotations that received a generated description.
    pub links_tagged: usize,
    /// Link annotations that received fallback text (best-effort policy only).
    pub links_fallback: usize,

    /// Manifest ids that matched no figure node.
    pub unmatched_ids: Vec<u32>,
    /// Figure nodes with no manifest entry; left unmodified.
    pub untracked_figures: Vec<u32>,

    /// Non-fatal per-reference failures, in the order they happened.
    pub errors: Vec<ReferenceError>,

    /// Size of the published document in bytes.
    pub output_bytes: usize,
    /// Time spent waiting on the inference service.
    pub generation_duration_ms: u64,
    /// Wall-clock time for the whole run.
    pub total_duration_ms: u64,
}

impl RunReport {
    /// Figures whose text or role came from the model (including empty text).
    pub fn resolved(&self) -> usize {
        self.described + self.decorative + self.artifacts
    }

    /// Whether the manifest and the graph disagree in either direction:
    /// manifest ids with no figure, or figures with no manifest entry.
    pub fn has_integrity_warnings(&self) -> bool {
        !self.unmatched_ids.is_empty() || !self.untracked_figures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_counts_all_model_outcomes() {
        let report = RunReport {
            described: 4,
            decorative: 1,
            artifacts: 2,
            fallback: 3,
            ..Default::default()
        };
        assert_eq!(report.resolved(), 7);
        assert!(!report.has_integrity_warnings());
    }

    #[test]
    fn untracked_figures_are_an_integrity_warning() {
        let report = RunReport {
            untracked_figures: vec![11],
            ..Default::default()
        };
        assert!(report.unmatched_ids.is_empty());
        assert!(report.has_integrity_warnings());
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = RunReport {
            document_key: "temp/doc/COMPLIANT_doc.pdf".into(),
            unmatched_ids: vec![42],
            ..Default::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert!(back.has_integrity_warnings());
    }
}
