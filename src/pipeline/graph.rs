//! The PDF object graph, normalised into taggable nodes.
//!
//! `lopdf` already stores a document as an arena: a map from object id to
//! object, with every cross-object edge an explicit `Reference(id)`. Nodes
//! are only ever addressed by id here, so shared sub-objects (one action
//! dictionary used by several annotations, say) are read through the arena
//! and never mutated in place.
//!
//! On load, a single normalisation pass classifies each dictionary once:
//!
//! | Raw shape | [`NodeKind`] |
//! |-----------|--------------|
//! | `/S /Figure` (directly or through the `/RoleMap`) | `Figure` |
//! | `/Subtype /Link` with a `/URI` action | `Link` |
//! | anything else | not recorded, never touched |
//!
//! Mutations set or remove keys on one dictionary. No object is ever added,
//! removed or renumbered.
//!
//! Cross-reference streams, object streams and linearization dictionaries
//! are file structure, not graph nodes. They are dropped on load and the
//! document is always written with a classic cross-reference table, so
//! saving the same graph twice yields the same bytes.

use crate::model::LinkReference;
use lopdf::xref::XrefType;
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// Structure type of figure elements.
pub const FIGURE_ROLE: &[u8] = b"Figure";
/// Structure type that removes an element from the reading order.
pub const ARTIFACT_ROLE: &[u8] = b"Artifact";

const ROLE_MAP_DEPTH: usize = 8;

/// Object types that only describe how the file is laid out.
const CONTAINER_TYPES: [&str; 3] = ["XRef", "ObjStm", "Linearized"];

/// Trailer keys that belong to a cross-reference stream dictionary.
const XREF_STREAM_KEYS: [&[u8]; 9] = [
    b"Type",
    b"W",
    b"Index",
    b"Length",
    b"Filter",
    b"DecodeParms",
    b"XRefStm",
    b"Prev",
    b"Size",
];

/// Classification of a taggable dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A figure structure element.
    Figure,
    /// A link annotation pointing at `target`. `described` is true once the
    /// annotation carries non-empty alternative text.
    Link { target: String, described: bool },
}

/// Errors from graph mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("object {0} does not exist")]
    NodeNotFound(u32),
    #[error("object {0} is not a dictionary")]
    NotADictionary(u32),
}

/// A loaded PDF plus the normalised view of its taggable nodes.
pub struct DocumentGraph {
    doc: Document,
    by_number: HashMap<u32, ObjectId>,
    nodes: BTreeMap<ObjectId, NodeKind>,
}

impl DocumentGraph {
    /// Parse PDF bytes and normalise the result.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, lopdf::Error> {
        Ok(Self::from_document(Document::load_mem(bytes)?))
    }

    /// Normalise an already parsed document.
    pub fn from_document(mut doc: Document) -> Self {
        strip_file_structure(&mut doc);
        let by_number = doc.objects.keys().map(|id| (id.0, *id)).collect();
        let role_map = read_role_map(&doc);
        let mut nodes = BTreeMap::new();

        for (id, obj) in &doc.objects {
            let Object::Dictionary(dict) = obj else {
                continue;
            };
            if let Some(kind) = classify(&doc, dict, &role_map) {
                nodes.insert(*id, kind);
            }
        }

        debug!(
            "Normalised {} objects: {} taggable nodes",
            doc.objects.len(),
            nodes.len()
        );
        Self {
            doc,
            by_number,
            nodes,
        }
    }

    /// Every taggable node, ordered by object id.
    pub fn nodes(&self) -> impl Iterator<Item = (ObjectId, &NodeKind)> {
        self.nodes.iter().map(|(id, kind)| (*id, kind))
    }

    /// Object numbers of all figure nodes, ascending.
    pub fn figure_ids(&self) -> Vec<u32> {
        self.nodes
            .iter()
            .filter(|(_, k)| matches!(k, NodeKind::Figure))
            .map(|(id, _)| id.0)
            .collect()
    }

    /// Link annotations that still need a description.
    pub fn pending_links(&self) -> Vec<LinkReference> {
        self.nodes
            .iter()
            .filter_map(|(id, kind)| match kind {
                NodeKind::Link {
                    target,
                    described: false,
                } => Some(LinkReference {
                    id: id.0,
                    target: target.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Number of indirect objects in the document.
    pub fn object_count(&self) -> usize {
        self.doc.objects.len()
    }

    /// Resolve an object number to its full id.
    pub fn object_id(&self, number: u32) -> Option<ObjectId> {
        self.by_number.get(&number).copied()
    }

    pub fn object(&self, number: u32) -> Option<&Object> {
        self.object_id(number).and_then(|id| self.doc.objects.get(&id))
    }

    pub fn kind(&self, number: u32) -> Option<&NodeKind> {
        self.object_id(number).and_then(|id| self.nodes.get(&id))
    }

    /// Decoded `/Alt` of a node.
    pub fn alt_text(&self, number: u32) -> Option<String> {
        self.dict(number).and_then(|d| text_entry(d, b"Alt"))
    }

    /// Decoded `/ActualText` of a node.
    pub fn actual_text(&self, number: u32) -> Option<String> {
        self.dict(number).and_then(|d| text_entry(d, b"ActualText"))
    }

    /// Structure type (`/S`) of a node.
    pub fn role(&self, number: u32) -> Option<String> {
        self.dict(number)
            .and_then(|d| name_entry(d, b"S"))
            .map(|n| String::from_utf8_lossy(n).into_owned())
    }

    /// Attach `text` as both `/Alt` and `/ActualText`.
    pub fn set_alt_text(&mut self, id: ObjectId, text: &str) -> Result<(), GraphError> {
        let dict = self.dict_mut(id)?;
        dict.set("Alt", encode_text_string(text));
        dict.set("ActualText", encode_text_string(text));

        if let Some(NodeKind::Link { described, .. }) = self.nodes.get_mut(&id) {
            *described = !text.is_empty();
        }
        Ok(())
    }

    /// Reclassify a figure as an artifact and strip any descriptive text.
    pub fn mark_artifact(&mut self, id: ObjectId) -> Result<(), GraphError> {
        let dict = self.dict_mut(id)?;
        dict.set("S", Object::Name(ARTIFACT_ROLE.to_vec()));
        dict.remove(b"Alt");
        dict.remove(b"ActualText");
        self.nodes.remove(&id);
        Ok(())
    }

    /// Serialise the document.
    pub fn save(&mut self) -> Result<Vec<u8>, lopdf::Error> {
        let mut out = Vec::new();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    fn dict(&self, number: u32) -> Option<&Dictionary> {
        match self.object(number)? {
            Object::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    fn dict_mut(&mut self, id: ObjectId) -> Result<&mut Dictionary, GraphError> {
        match self.doc.objects.get_mut(&id) {
            Some(Object::Dictionary(d)) => Ok(d),
            Some(_) => Err(GraphError::NotADictionary(id.0)),
            None => Err(GraphError::NodeNotFound(id.0)),
        }
    }
}

// ── Normalisation ────────────────────────────────────────────────────────

/// Drop container objects, reset the trailer to a table trailer and pin the
/// cross-reference format.
fn strip_file_structure(doc: &mut Document) {
    let before = doc.objects.len();
    doc.objects
        .retain(|_, obj| obj.type_name().map_or(true, |name| !CONTAINER_TYPES.contains(&name)));
    let dropped = before - doc.objects.len();
    if dropped > 0 {
        debug!("Dropped {} file-structure object(s)", dropped);
    }

    for key in XREF_STREAM_KEYS {
        doc.trailer.remove(key);
    }
    doc.reference_table.cross_reference_type = XrefType::CrossReferenceTable;
    doc.max_id = doc.objects.keys().map(|id| id.0).max().unwrap_or(0);
}

fn classify(
    doc: &Document,
    dict: &Dictionary,
    role_map: &HashMap<Vec<u8>, Vec<u8>>,
) -> Option<NodeKind> {
    if let Some(role) = name_entry(dict, b"S") {
        let is_struct_elem = name_entry(dict, b"Type").is_none_or(|t| t == b"StructElem");
        if is_struct_elem && resolve_role(role, role_map) == FIGURE_ROLE {
            return Some(NodeKind::Figure);
        }
    }

    if name_entry(dict, b"Subtype") == Some(b"Link".as_slice()) {
        let target = link_target(doc, dict)?;
        let described = text_entry(dict, b"Alt").is_some_and(|t| !t.trim().is_empty());
        return Some(NodeKind::Link { target, described });
    }

    None
}

/// Follow `/RoleMap` entries until a name maps to nothing further.
fn resolve_role<'a>(role: &'a [u8], role_map: &'a HashMap<Vec<u8>, Vec<u8>>) -> &'a [u8] {
    let mut current = role;
    for _ in 0..ROLE_MAP_DEPTH {
        match role_map.get(current) {
            Some(next) if next.as_slice() != current => current = next.as_slice(),
            _ => break,
        }
    }
    current
}

/// `Catalog → /StructTreeRoot → /RoleMap`, as a name-to-name map.
fn read_role_map(doc: &Document) -> HashMap<Vec<u8>, Vec<u8>> {
    let role_map = doc
        .trailer
        .get(b"Root")
        .ok()
        .and_then(|root| deref_dict(doc, root))
        .and_then(|catalog| catalog.get(b"StructTreeRoot").ok())
        .and_then(|tree| deref_dict(doc, tree))
        .and_then(|tree| tree.get(b"RoleMap").ok())
        .and_then(|map| deref_dict(doc, map));

    let Some(role_map) = role_map else {
        return HashMap::new();
    };
    role_map
        .iter()
        .filter_map(|(k, v)| match v {
            Object::Name(n) => Some((k.clone(), n.clone())),
            _ => None,
        })
        .collect()
}

/// URI of a link annotation's action, following references.
fn link_target(doc: &Document, annot: &Dictionary) -> Option<String> {
    let action = deref_dict(doc, annot.get(b"A").ok()?)?;
    if name_entry(action, b"S") != Some(b"URI".as_slice()) {
        return None;
    }
    let uri = match deref(doc, action.get(b"URI").ok()?)? {
        Object::String(bytes, _) => decode_text_string(bytes),
        _ => return None,
    };
    let uri = uri.trim().to_string();
    (!uri.is_empty()).then_some(uri)
}

fn deref<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.objects.get(id),
        other => Some(other),
    }
}

fn deref_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match deref(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

fn name_entry<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key).ok()? {
        Object::Name(n) => Some(n.as_slice()),
        _ => None,
    }
}

fn text_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

// ── Text strings ─────────────────────────────────────────────────────────

const UTF16_BOM: [u8; 2] = [0xFE, 0xFF];

/// Encode a PDF text string: ASCII as a literal, everything else as
/// UTF-16BE with a byte-order mark.
pub fn encode_text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = UTF16_BOM.to_vec();
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Decode a PDF text string (UTF-16BE with BOM, else byte-per-char).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&UTF16_BOM) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    /// Catalog + struct tree with a RoleMap, figures 5 and a role-mapped
    /// `/Photo`, a link with a shared action, a described link, a paragraph.
    fn sample() -> (DocumentGraph, ObjectId, ObjectId, ObjectId, ObjectId) {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let role_map = dictionary! { "Photo" => "Figure" };
        let tree_id = doc.add_object(dictionary! {
            "Type" => "StructTreeRoot",
            "RoleMap" => role_map,
        });
        let fig_id = doc.add_object(dictionary! { "Type" => "StructElem", "S" => "Figure" });
        let photo_id = doc.add_object(dictionary! { "S" => "Photo" });
        doc.add_object(dictionary! { "Type" => "StructElem", "S" => "P" });
        let action_id = doc.add_object(dictionary! {
            "S" => "URI",
            "URI" => Object::string_literal("https://example.org"),
        });
        let link_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "A" => action_id,
        });
        doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "A" => action_id,
            "Alt" => Object::string_literal("Example site"),
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => Vec::<Object>::new(),
                "Count" => 0i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "StructTreeRoot" => tree_id,
        });
        doc.trailer.set("Root", catalog_id);
        (DocumentGraph::from_document(doc), fig_id, photo_id, link_id, action_id)
    }

    #[test]
    fn classifies_figures_through_role_map() {
        let (graph, fig, photo, _, _) = sample();
        assert_eq!(graph.figure_ids(), vec![fig.0, photo.0]);
        assert_eq!(graph.kind(photo.0), Some(&NodeKind::Figure));
    }

    #[test]
    fn discovers_only_undescribed_links() {
        let (graph, _, _, link, _) = sample();
        let links = graph.pending_links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].id, link.0);
        assert_eq!(links[0].target, "https://example.org");
    }

    #[test]
    fn set_alt_text_writes_both_attributes() {
        let (mut graph, fig, _, _, _) = sample();
        let before = graph.object_count();
        graph.set_alt_text(fig, "a red bicycle").unwrap();
        assert_eq!(graph.alt_text(fig.0).as_deref(), Some("a red bicycle"));
        assert_eq!(graph.actual_text(fig.0).as_deref(), Some("a red bicycle"));
        assert_eq!(graph.object_count(), before);
    }

    #[test]
    fn link_description_leaves_shared_action_alone() {
        let (mut graph, _, _, link, action) = sample();
        let action_before = format!("{:?}", graph.object(action.0));
        graph.set_alt_text(link, "Example organisation homepage").unwrap();
        assert_eq!(format!("{:?}", graph.object(action.0)), action_before);
        assert!(graph.pending_links().is_empty());
    }

    #[test]
    fn mark_artifact_strips_text_and_role() {
        let (mut graph, fig, _, _, _) = sample();
        graph.set_alt_text(fig, "stale").unwrap();
        graph.mark_artifact(fig).unwrap();
        assert_eq!(graph.role(fig.0).as_deref(), Some("Artifact"));
        assert_eq!(graph.alt_text(fig.0), None);
        assert_eq!(graph.actual_text(fig.0), None);
        assert!(!graph.figure_ids().contains(&fig.0));
    }

    #[test]
    fn mutation_of_missing_or_non_dict_node_fails() {
        let (mut graph, _, _, _, _) = sample();
        assert_eq!(
            graph.set_alt_text((999, 0), "x"),
            Err(GraphError::NodeNotFound(999))
        );
    }

    #[test]
    fn text_string_round_trip() {
        for text in ["plain ascii", "Café crème", "日本語の図", ""] {
            let Object::String(bytes, _) = encode_text_string(text) else {
                panic!("not a string");
            };
            assert_eq!(decode_text_string(&bytes), text);
        }
    }

    #[test]
    fn save_and_reload_preserves_tags() {
        let (mut graph, fig, _, _, _) = sample();
        graph.set_alt_text(fig, "Grafik für Umsatz").unwrap();
        let bytes = graph.save().unwrap();
        let reloaded = DocumentGraph::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.alt_text(fig.0).as_deref(), Some("Grafik für Umsatz"));
        assert_eq!(reloaded.object_count(), graph.object_count());
    }

    #[test]
    fn xref_stream_is_not_a_graph_node() {
        let mut doc = Document::with_version("1.7");
        let fig = doc.add_object(dictionary! { "Type" => "StructElem", "S" => "Figure" });
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog" });
        doc.trailer.set("Root", catalog);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let graph = DocumentGraph::from_bytes(&bytes).unwrap();
        assert_eq!(graph.object_count(), 2);
        assert!(graph
            .document()
            .objects
            .values()
            .all(|obj| obj.type_name().map_or(true, |t| t != "XRef")));
        assert_eq!(graph.figure_ids(), vec![fig.0]);
        assert!(graph.document().trailer.get(b"Type").is_err());
    }

    #[test]
    fn saving_twice_is_byte_identical() {
        let (mut graph, fig, _, _, _) = sample();
        graph.set_alt_text(fig, "a red bicycle").unwrap();
        let first = graph.save().unwrap();
        let second = graph.save().unwrap();
        assert_eq!(first, second);

        let reloaded = DocumentGraph::from_bytes(&first).unwrap();
        assert_eq!(reloaded.object_count(), graph.object_count());
    }
}
