//! Graph Matcher/Tagger.
//!
//! One pass over the normalised nodes of a [`DocumentGraph`]. Figures are
//! matched to image results by object number, links to link results the same
//! way; each applied entry is removed from its map. Whatever is left in the
//! image map afterwards names manifest ids with no figure node.

use crate::error::AltTagError;
use crate::model::{Description, Provenance, ResultMap};
use crate::pipeline::graph::{DocumentGraph, GraphError, NodeKind};
use lopdf::ObjectId;
use tracing::{debug, warn};

/// What one tagging pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagStats {
    pub described: usize,
    pub decorative: usize,
    pub artifacts: usize,
    pub fallback: usize,
    pub links_tagged: usize,
    pub links_fallback: usize,
    /// Figure nodes with no image result; left unmodified.
    pub untracked_figures: Vec<u32>,
}

/// Apply image and link results to the graph, draining both maps.
pub fn tag(
    graph: &mut DocumentGraph,
    images: &mut ResultMap,
    links: &mut ResultMap,
) -> Result<TagStats, AltTagError> {
    let nodes: Vec<(ObjectId, NodeKind)> = graph
        .nodes()
        .map(|(id, kind)| (id, kind.clone()))
        .collect();
    let mut stats = TagStats::default();

    for (id, kind) in nodes {
        match kind {
            NodeKind::Figure => match images.take(id.0) {
                Some((Description::Artifact, _)) => {
                    graph.mark_artifact(id).map_err(internal)?;
                    stats.artifacts += 1;
                }
                Some((Description::Text(text), provenance)) => {
                    graph.set_alt_text(id, &text).map_err(internal)?;
                    match provenance {
                        Provenance::Fallback => stats.fallback += 1,
                        Provenance::Generated if text.is_empty() => stats.decorative += 1,
                        Provenance::Generated => stats.described += 1,
                    }
                }
                None => stats.untracked_figures.push(id.0),
            },
            NodeKind::Link { described, .. } => {
                let Some((description, provenance)) = links.take(id.0) else {
                    continue;
                };
                let Some(text) = description.text() else {
                    continue;
                };
                if described {
                    debug!("Link {}: already described, skipping", id.0);
                    continue;
                }
                graph.set_alt_text(id, text).map_err(internal)?;
                match provenance {
                    Provenance::Fallback => stats.links_fallback += 1,
                    Provenance::Generated => stats.links_tagged += 1,
                }
            }
        }
    }

    if !stats.untracked_figures.is_empty() {
        warn!(
            "{} figure(s) have no manifest entry and were left untouched: {:?}",
            stats.untracked_figures.len(),
            stats.untracked_figures
        );
    }
    Ok(stats)
}

fn internal(e: GraphError) -> AltTagError {
    AltTagError::Internal(format!("graph mutation failed: {e}"))
}
