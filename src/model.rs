//! Value types shared by every pipeline stage.
//!
//! Only [`crate::pipeline::graph`] touches the PDF object representation;
//! every other stage works on the plain values defined here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An image extracted upstream, identified by the object number of its
/// figure structure element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Object number of the `/Figure` structure element in the tagged PDF.
    pub id: u32,
    /// Locator of the raw image bytes, relative to the job's payload prefix.
    pub payload_path: String,
    /// Surrounding page text. May be empty.
    pub context: String,
}

/// A link annotation discovered directly in the object graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    /// Object number of the `/Link` annotation.
    pub id: u32,
    /// The URI the link's action points to.
    pub target: String,
}

/// What a generated description tells the tagger to do with a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Description {
    /// Attach the text as alternative text. An empty string marks the
    /// image as decorative and is never replaced by fallback text.
    Text(String),
    /// Reclassify the node as non-content and attach no text.
    Artifact,
}

impl Description {
    /// Shorthand for an explicit empty (decorative) description.
    pub fn decorative() -> Self {
        Description::Text(String::new())
    }

    pub fn is_artifact(&self) -> bool {
        matches!(self, Description::Artifact)
    }

    /// The attached text, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Description::Text(t) => Some(t),
            Description::Artifact => None,
        }
    }
}

/// A description bound to the reference it was generated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionResult {
    pub reference_id: u32,
    pub description: Description,
}

/// Where an entry in the [`ResultMap`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Generated,
    Fallback,
}

/// Descriptions keyed by reference id.
///
/// Written by the generator, completed by the fallback resolver, and drained
/// by the tagger: each entry is removed once applied to a graph node, so
/// whatever remains after tagging names ids with no matching node.
#[derive(Debug, Clone, Default)]
pub struct ResultMap {
    entries: HashMap<u32, (Description, Provenance)>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a generated result, replacing any earlier one for the same id.
    pub fn insert(&mut self, result: DescriptionResult) {
        self.entries.insert(
            result.reference_id,
            (result.description, Provenance::Generated),
        );
    }

    /// Record fallback text for an id that has no entry. Existing entries,
    /// including empty ones, are left untouched. Returns whether it inserted.
    pub fn insert_fallback(&mut self, id: u32, text: &str) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            (Description::Text(text.to_string()), Provenance::Fallback),
        );
        true
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Description> {
        self.entries.get(&id).map(|(d, _)| d)
    }

    pub fn provenance(&self, id: u32) -> Option<Provenance> {
        self.entries.get(&id).map(|(_, p)| *p)
    }

    /// Remove and return the entry for `id`.
    pub fn take(&mut self, id: u32) -> Option<(Description, Provenance)> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids still present, sorted ascending.
    pub fn remaining_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl FromIterator<DescriptionResult> for ResultMap {
    fn from_iter<I: IntoIterator<Item = DescriptionResult>>(iter: I) -> Self {
        let mut map = ResultMap::new();
        for result in iter {
            map.insert(result);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: u32, text: &str) -> DescriptionResult {
        DescriptionResult {
            reference_id: id,
            description: Description::Text(text.into()),
        }
    }

    #[test]
    fn fallback_never_replaces_empty_text() {
        let mut map: ResultMap = vec![result(5, "")].into_iter().collect();
        assert!(!map.insert_fallback(5, "No description available"));
        assert_eq!(map.get(5), Some(&Description::decorative()));
        assert_eq!(map.provenance(5), Some(Provenance::Generated));
    }

    #[test]
    fn fallback_fills_missing_id() {
        let mut map = ResultMap::new();
        assert!(map.insert_fallback(9, "No description available"));
        assert_eq!(map.provenance(9), Some(Provenance::Fallback));
        assert_eq!(
            map.get(9).and_then(Description::text),
            Some("No description available")
        );
    }

    #[test]
    fn take_drains_entry() {
        let mut map: ResultMap = vec![result(7, "a red bicycle"), result(3, "x")]
            .into_iter()
            .collect();
        assert!(map.take(7).is_some());
        assert!(map.take(7).is_none());
        assert_eq!(map.remaining_ids(), vec![3]);
    }

    #[test]
    fn artifact_has_no_text() {
        assert!(Description::Artifact.is_artifact());
        assert_eq!(Description::Artifact.text(), None);
    }
}
