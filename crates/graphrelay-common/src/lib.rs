use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub mod config;

/// Property bag stored on nodes and edges. Ordered so serialized items are stable.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A vertex of the graph, stored under its type's partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub type_name: String,
    #[serde(default)]
    pub properties: Properties,
    /// Monotonic version used for optimistic concurrency on writes.
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            properties: Properties::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }
}

/// Identity of an edge: `(in_id) -[type_name]- (out_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub in_id: String,
    pub type_name: String,
    pub out_id: String,
}

impl EdgeKey {
    pub fn new(in_id: impl Into<String>, type_name: impl Into<String>, out_id: impl Into<String>) -> Self {
        Self {
            in_id: in_id.into(),
            type_name: type_name.into(),
            out_id: out_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub in_id: String,
    pub type_name: String,
    pub out_id: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(in_id: impl Into<String>, type_name: impl Into<String>, out_id: impl Into<String>) -> Self {
        Self {
            in_id: in_id.into(),
            type_name: type_name.into(),
            out_id: out_id.into(),
            properties: Properties::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.in_id.clone(), self.type_name.clone(), self.out_id.clone())
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }
}

/// One element of a connection: the item plus the opaque cursor of its position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayEdge<T> {
    pub cursor: String,
    pub node: T,
}

impl<T> RelayEdge<T> {
    pub fn new(cursor: impl Into<String>, node: T) -> Self {
        Self { cursor: cursor.into(), node }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// An ordered page of items with Relay pagination metadata.
///
/// The start/end cursors are always derived from the edges, so they are
/// `None` exactly when the page is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection<T> {
    pub edges: Vec<RelayEdge<T>>,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    pub fn new(edges: Vec<RelayEdge<T>>, has_next_page: bool, has_previous_page: bool) -> Self {
        let page_info = PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };
        Self { edges, page_info }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), false, false)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }

    pub fn end_cursor(&self) -> Option<&str> {
        self.page_info.end_cursor.as_deref()
    }
}

/// Relay forward/backward paging arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionArguments {
    pub first: Option<usize>,
    pub after: Option<String>,
    pub last: Option<usize>,
    pub before: Option<String>,
}

/// Paging direction resolved from [`ConnectionArguments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageDirection {
    Forward,
    Backward,
}

impl ConnectionArguments {
    pub fn first(count: usize) -> Self {
        Self {
            first: Some(count),
            ..Default::default()
        }
    }

    pub fn last(count: usize) -> Self {
        Self {
            last: Some(count),
            ..Default::default()
        }
    }

    pub fn with_after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn with_before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    /// The `after` cursor, with null, empty and whitespace values treated as absent.
    pub fn after_cursor(&self) -> Option<&str> {
        non_blank(self.after.as_deref())
    }

    /// The `before` cursor, with null, empty and whitespace values treated as absent.
    pub fn before_cursor(&self) -> Option<&str> {
        non_blank(self.before.as_deref())
    }

    /// Backward paging is only selected when `last` or `before` is set and `first`/`after` are not.
    pub fn direction(&self) -> PageDirection {
        let forward = self.first.is_some() || self.after_cursor().is_some();
        let backward = self.last.is_some() || self.before_cursor().is_some();
        if backward && !forward {
            PageDirection::Backward
        } else {
            PageDirection::Forward
        }
    }

    /// Requested page size in the resolved direction.
    pub fn count(&self) -> Option<usize> {
        match self.direction() {
            PageDirection::Forward => self.first,
            PageDirection::Backward => self.last,
        }
    }

    /// Starting cursor in the resolved direction.
    pub fn cursor(&self) -> Option<&str> {
        match self.direction() {
            PageDirection::Forward => self.after_cursor(),
            PageDirection::Backward => self.before_cursor(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
