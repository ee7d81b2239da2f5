//! Opaque cursor codec.
//!
//! A cursor is a tree of position markers mirroring the query tree: leaf
//! scans record where they stopped in the backend (`type_cursor`, the edge
//! markers), and composite queries embed one sub-cursor per child under that
//! child's query key. The wire form is URL-safe base64 over a version byte and
//! compact JSON; struct field order and `BTreeMap` key order make it
//! deterministic, so a cursor minted by one process resumes in another.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use graphrelay_common::EdgeKey;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

const CURSOR_FORMAT_VERSION: u8 = 1;

/// Position inside a node-type scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCursor {
    #[serde(rename = "t")]
    pub type_name: String,
    #[serde(rename = "i")]
    pub id: String,
    /// Native value of the ordering property, present for ordered scans.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

/// Position inside an edge index ordered by edge key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeCursor {
    #[serde(rename = "i")]
    pub in_id: String,
    #[serde(rename = "t")]
    pub type_name: String,
    #[serde(rename = "o")]
    pub out_id: String,
}

/// Position inside an edge index ordered by a property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgePropCursor {
    #[serde(rename = "i")]
    pub in_id: String,
    #[serde(rename = "t")]
    pub type_name: String,
    #[serde(rename = "o")]
    pub out_id: String,
    #[serde(rename = "p")]
    pub property: String,
    #[serde(rename = "v")]
    pub value: String,
}

impl EdgeCursor {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.in_id.clone(), self.type_name.clone(), self.out_id.clone())
    }
}

impl EdgePropCursor {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.in_id.clone(), self.type_name.clone(), self.out_id.clone())
    }
}

impl From<&EdgeKey> for EdgeCursor {
    fn from(key: &EdgeKey) -> Self {
        Self {
            in_id: key.in_id.clone(),
            type_name: key.type_name.clone(),
            out_id: key.out_id.clone(),
        }
    }
}

/// Decoded cursor tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorNode {
    #[serde(rename = "ty", default, skip_serializing_if = "Option::is_none")]
    pub type_cursor: Option<TypeCursor>,
    #[serde(rename = "ie", default, skip_serializing_if = "Option::is_none")]
    pub in_edge: Option<EdgeCursor>,
    #[serde(rename = "iep", default, skip_serializing_if = "Option::is_none")]
    pub in_edge_prop: Option<EdgePropCursor>,
    #[serde(rename = "oe", default, skip_serializing_if = "Option::is_none")]
    pub out_edge: Option<EdgeCursor>,
    #[serde(rename = "oep", default, skip_serializing_if = "Option::is_none")]
    pub out_edge_prop: Option<EdgePropCursor>,
    /// Targets already consumed inside the upstream item this cursor points before.
    #[serde(rename = "off", default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// Terminal marker: the branch is exhausted.
    #[serde(rename = "eod", default, skip_serializing_if = "is_false")]
    pub end_of_data: bool,
    #[serde(rename = "c", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Arc<CursorNode>>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl CursorNode {
    pub fn end_of_data() -> Self {
        Self {
            end_of_data: true,
            ..Default::default()
        }
    }

    pub fn for_type(type_name: impl Into<String>, id: impl Into<String>, sort: Option<String>) -> Self {
        Self {
            type_cursor: Some(TypeCursor {
                type_name: type_name.into(),
                id: id.into(),
                sort,
            }),
            ..Default::default()
        }
    }

    pub fn for_in_edge(key: &EdgeKey) -> Self {
        Self {
            in_edge: Some(EdgeCursor::from(key)),
            ..Default::default()
        }
    }

    pub fn for_out_edge(key: &EdgeKey) -> Self {
        Self {
            out_edge: Some(EdgeCursor::from(key)),
            ..Default::default()
        }
    }

    pub fn for_in_edge_prop(key: &EdgeKey, property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            in_edge_prop: Some(prop_cursor(key, property.into(), value.into())),
            ..Default::default()
        }
    }

    pub fn for_out_edge_prop(key: &EdgeKey, property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            out_edge_prop: Some(prop_cursor(key, property.into(), value.into())),
            ..Default::default()
        }
    }

    pub fn has_type_cursor(&self) -> bool {
        self.type_cursor.is_some()
    }

    pub fn has_in_edge_cursor(&self) -> bool {
        self.in_edge.is_some()
    }

    pub fn has_in_edge_prop_cursor(&self) -> bool {
        self.in_edge_prop.is_some()
    }

    pub fn has_out_edge_cursor(&self) -> bool {
        self.out_edge.is_some()
    }

    pub fn has_out_edge_prop_cursor(&self) -> bool {
        self.out_edge_prop.is_some()
    }

    /// Whether any backend position marker is set.
    pub fn has_position(&self) -> bool {
        self.has_type_cursor()
            || self.has_in_edge_cursor()
            || self.has_in_edge_prop_cursor()
            || self.has_out_edge_cursor()
            || self.has_out_edge_prop_cursor()
    }

    /// In-node id of an edge position, from `in_edge` or else `in_edge_prop`.
    pub fn in_node_id(&self) -> Option<&str> {
        self.in_edge
            .as_ref()
            .map(|c| c.in_id.as_str())
            .or_else(|| self.in_edge_prop.as_ref().map(|c| c.in_id.as_str()))
    }

    /// Out-node id of an edge position, from `out_edge` or else `out_edge_prop`.
    pub fn out_node_id(&self) -> Option<&str> {
        self.out_edge
            .as_ref()
            .map(|c| c.out_id.as_str())
            .or_else(|| self.out_edge_prop.as_ref().map(|c| c.out_id.as_str()))
    }

    pub fn child(&self, key: &str) -> Option<&CursorNode> {
        self.children.get(key).map(|c| c.as_ref())
    }

    /// Returns a copy with `child` stored under `key`; other sub-trees are shared.
    pub fn with_child(mut self, key: impl Into<String>, child: CursorNode) -> Self {
        self.children.insert(key.into(), Arc::new(child));
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = if offset == 0 { None } else { Some(offset) };
        self
    }

    /// The backend position markers alone, without sub-trees or offset.
    pub fn markers_only(&self) -> CursorNode {
        CursorNode {
            type_cursor: self.type_cursor.clone(),
            in_edge: self.in_edge.clone(),
            in_edge_prop: self.in_edge_prop.clone(),
            out_edge: self.out_edge.clone(),
            out_edge_prop: self.out_edge_prop.clone(),
            offset: None,
            end_of_data: false,
            children: BTreeMap::new(),
        }
    }

    pub fn serialize(&self) -> Result<String> {
        serialize(self)
    }

    pub fn deserialize(cursor: &str) -> Result<Self> {
        deserialize(cursor)
    }
}

fn prop_cursor(key: &EdgeKey, property: String, value: String) -> EdgePropCursor {
    EdgePropCursor {
        in_id: key.in_id.clone(),
        type_name: key.type_name.clone(),
        out_id: key.out_id.clone(),
        property,
        value,
    }
}

/// Encodes a cursor tree into its opaque string form.
pub fn serialize(cursor: &CursorNode) -> Result<String> {
    let mut bytes = vec![CURSOR_FORMAT_VERSION];
    serde_json::to_writer(&mut bytes, cursor)
        .map_err(|e| GraphError::InvalidCursor(format!("cannot encode cursor: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decodes an opaque cursor string back into its tree.
pub fn deserialize(cursor: &str) -> Result<CursorNode> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.trim())
        .map_err(|e| GraphError::InvalidCursor(format!("not a cursor: {}", e)))?;
    match bytes.split_first() {
        Some((&CURSOR_FORMAT_VERSION, body)) => serde_json::from_slice(body)
            .map_err(|e| GraphError::InvalidCursor(format!("malformed cursor body: {}", e))),
        Some((version, _)) => Err(GraphError::InvalidCursor(format!(
            "unsupported cursor version {}",
            version
        ))),
        None => Err(GraphError::InvalidCursor("empty cursor".into())),
    }
}

/// Decodes an optional cursor string; absent stays absent.
pub fn deserialize_opt(cursor: Option<&str>) -> Result<Option<CursorNode>> {
    cursor.map(deserialize).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> CursorNode {
        let key = EdgeKey::new("p1", "Wrote", "b7");
        let left = CursorNode::for_type("Person", "p1", Some("Ada".into()));
        let right = CursorNode::for_in_edge_prop(&key, "since", "2020-01-01T00:00:00.000Z")
            .with_child("people", CursorNode::for_type("Person", "p0", None));
        CursorNode::default()
            .with_child("left", left)
            .with_child("right", right)
            .with_child("done", CursorNode::end_of_data())
            .with_offset(1)
    }

    #[test]
    fn round_trip_preserves_structure() {
        let trees = vec![
            CursorNode::default(),
            CursorNode::end_of_data(),
            CursorNode::for_type("Person", "p1", None),
            CursorNode::for_out_edge(&EdgeKey::new("a", "Knows", "b")),
            sample_tree(),
        ];
        for tree in trees {
            let encoded = serialize(&tree).unwrap();
            let decoded = deserialize(&encoded).unwrap();
            assert_eq!(decoded, tree);
        }
    }

    #[test]
    fn round_trip_keeps_every_marker_in_nested_children() {
        let key = EdgeKey::new("in-7", "Rated", "out-9");
        let mut leaf = CursorNode::for_out_edge_prop(&key, "score", "00000000000000000042").with_offset(3);
        leaf.in_edge_prop = Some(prop_cursor(&key, "at".into(), "2024-02-29T12:00:00.000Z".into()));
        leaf.in_edge = Some(EdgeCursor::from(&key));
        leaf.out_edge = Some(EdgeCursor::from(&key));
        leaf.type_cursor = Some(TypeCursor {
            type_name: "Film".into(),
            id: "f1".into(),
            sort: Some("z".into()),
        });
        leaf.end_of_data = true;

        let middle = CursorNode::for_in_edge_prop(&key, "at", "2024-01-01T00:00:00.000Z")
            .with_child("leaf", leaf.clone())
            .with_child("done", CursorNode::end_of_data());
        let root = CursorNode::end_of_data().with_child("middle", middle).with_offset(2);

        let decoded = deserialize(&serialize(&root).unwrap()).unwrap();
        assert_eq!(decoded, root);
        let decoded_leaf = decoded.child("middle").and_then(|m| m.child("leaf")).unwrap();
        assert_eq!(decoded_leaf, &leaf);
        assert!(decoded_leaf.end_of_data);
        assert_eq!(decoded_leaf.offset, Some(3));
        assert_eq!(decoded_leaf.in_node_id(), Some("in-7"));
        assert_eq!(decoded_leaf.out_edge_prop.as_ref().map(|c| c.value.as_str()), Some("00000000000000000042"));
        assert!(decoded.child("middle").and_then(|m| m.child("done")).unwrap().end_of_data);
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = serialize(&sample_tree()).unwrap();
        let b = serialize(&sample_tree()).unwrap();
        assert_eq!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        assert!(matches!(deserialize("%%%"), Err(GraphError::InvalidCursor(_))));
        assert!(matches!(deserialize(""), Err(GraphError::InvalidCursor(_))));

        let wrong_version = URL_SAFE_NO_PAD.encode([9u8, b'{', b'}']);
        assert!(matches!(deserialize(&wrong_version), Err(GraphError::InvalidCursor(_))));

        let bad_json = URL_SAFE_NO_PAD.encode([CURSOR_FORMAT_VERSION, b'[']);
        assert!(matches!(deserialize(&bad_json), Err(GraphError::InvalidCursor(_))));
    }

    #[test]
    fn node_id_extraction_prefers_plain_edge_markers() {
        let key = EdgeKey::new("in-1", "Knows", "out-1");
        let plain = CursorNode::for_in_edge(&key);
        assert_eq!(plain.in_node_id(), Some("in-1"));
        assert_eq!(plain.out_node_id(), None);

        let prop = CursorNode::for_out_edge_prop(&key, "weight", "5");
        assert_eq!(prop.out_node_id(), Some("out-1"));
        assert!(prop.has_out_edge_prop_cursor());
        assert!(!prop.has_out_edge_cursor());
    }

    #[test]
    fn markers_only_drops_subtrees() {
        let tree = sample_tree().with_child("x", CursorNode::for_type("T", "1", None));
        let stripped = tree.markers_only();
        assert!(stripped.children.is_empty());
        assert_eq!(stripped.offset, None);

        let edge = CursorNode::for_in_edge(&EdgeKey::new("a", "E", "b"))
            .with_child("src", CursorNode::for_type("T", "a", None));
        assert_eq!(edge.markers_only(), CursorNode::for_in_edge(&EdgeKey::new("a", "E", "b")));
    }

    #[test]
    fn zero_offset_is_omitted() {
        let node = CursorNode::for_type("T", "1", None).with_offset(0);
        assert_eq!(node.offset, None);
    }
}
