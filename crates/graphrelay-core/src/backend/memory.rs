//! In-memory [`GraphBackend`] with the same paging and cursor semantics as a
//! range-indexed store. Used for tests and embedding.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::Utc;
use graphrelay_common::{Connection, Edge, EdgeKey, Node, PageDirection, RelayEdge};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::{GraphBackend, NodeConnectionRequest, PutRequest, ToEdgeConnectionRequest};
use crate::cursor::{self, CursorNode};
use crate::error::{BackendErrorKind, GraphError, Result};
use crate::pushdown::{native_value, PushdownFilter, PushdownOrder};
use crate::query::SortDirection;
use crate::schema::{GraphSchema, SchemaSource};

#[derive(Debug, Default)]
struct MemoryState {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    schema: GraphSchema,
    calls: AtomicUsize,
    put_failures: Mutex<VecDeque<BackendErrorKind>>,
}

/// Which side of an edge the queried node sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    In,
    Out,
}

/// One row of an ordered scan: segment, native sort value, identity.
struct Row<K> {
    side: Side,
    sort: String,
    key: K,
}

impl MemoryBackend {
    pub fn new(schema: GraphSchema) -> Self {
        Self {
            schema,
            ..Default::default()
        }
    }

    pub async fn insert_node(&self, node: Node) {
        self.state.write().await.nodes.insert(node.id.clone(), node);
    }

    pub async fn insert_edge(&self, edge: Edge) {
        self.state.write().await.edges.insert(edge.key(), edge);
    }

    /// Removes a node but leaves its edges in place, producing dangling references.
    pub async fn remove_node(&self, id: &str) -> Option<Node> {
        self.state.write().await.nodes.remove(id)
    }

    pub async fn remove_edge(&self, key: &EdgeKey) -> Option<Edge> {
        self.state.write().await.edges.remove(key)
    }

    pub async fn node(&self, id: &str) -> Option<Node> {
        self.state.read().await.nodes.get(id).cloned()
    }

    /// Fails the next `put` calls with the given kinds, one per call.
    pub async fn fail_next_puts(&self, kinds: impl IntoIterator<Item = BackendErrorKind>) {
        self.put_failures.lock().await.extend(kinds);
    }

    /// Number of backend calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
    }

    async fn edge_connection(
        &self,
        request: ToEdgeConnectionRequest,
        sides: &[Side],
    ) -> Result<Connection<EdgeKey>> {
        self.record_call();
        let position = match request.after.as_deref() {
            Some(after) => Some(edge_position(&cursor::deserialize(after)?, &request.order)?),
            None => None,
        };

        let state = self.state.read().await;
        let mut rows: Vec<Row<EdgeKey>> = Vec::new();
        for side in sides {
            let mut segment: Vec<Row<EdgeKey>> = state
                .edges
                .values()
                .filter(|e| match side {
                    Side::In => e.in_id == request.node_id,
                    Side::Out => e.out_id == request.node_id,
                })
                .filter(|e| request.edge_type.as_ref().map_or(true, |t| &e.type_name == t))
                .filter(|e| passes(&request.filter, e.property_value(&request.filter)))
                .map(|e| Row {
                    side: *side,
                    sort: sort_value(&request.order, |p| e.properties.get(p)),
                    key: e.key(),
                })
                .collect();
            segment.sort_by(|a, b| compare(a, &b.side, &b.sort, &b.key, &request.order));
            rows.extend(segment);
        }

        let order = &request.order;
        let (range, has_next, has_prev) = page(
            &rows,
            position
                .as_ref()
                .map(|(side, sort, key)| move |row: &Row<EdgeKey>| compare(row, side, sort, key, order)),
            request.count,
            PageDirection::Forward,
        );

        let edges = rows[range]
            .iter()
            .map(|row| -> Result<RelayEdge<EdgeKey>> {
                let marker = match (row.side, order) {
                    (Side::In, None) => CursorNode::for_in_edge(&row.key),
                    (Side::Out, None) => CursorNode::for_out_edge(&row.key),
                    (Side::In, Some(o)) => CursorNode::for_in_edge_prop(&row.key, &o.property, &row.sort),
                    (Side::Out, Some(o)) => CursorNode::for_out_edge_prop(&row.key, &o.property, &row.sort),
                };
                Ok(RelayEdge::new(marker.serialize()?, row.key.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Connection::new(edges, has_next, has_prev))
    }
}

trait PropertyLookup {
    fn property_value(&self, filter: &Option<PushdownFilter>) -> Option<Value>;
}

impl PropertyLookup for Edge {
    fn property_value(&self, filter: &Option<PushdownFilter>) -> Option<Value> {
        filter
            .as_ref()
            .and_then(|f| self.properties.get(&f.property))
            .cloned()
    }
}

impl PropertyLookup for Node {
    fn property_value(&self, filter: &Option<PushdownFilter>) -> Option<Value> {
        let property = filter.as_ref().map(|f| f.property.as_str())?;
        if property == "id" {
            return Some(Value::String(self.id.clone()));
        }
        self.properties.get(property).cloned()
    }
}

fn passes(filter: &Option<PushdownFilter>, stored: Option<Value>) -> bool {
    filter.as_ref().map_or(true, |f| f.accepts_value(stored.as_ref()))
}

fn sort_value<'a>(order: &Option<PushdownOrder>, lookup: impl Fn(&str) -> Option<&'a Value>) -> String {
    order
        .as_ref()
        .and_then(|o| lookup(&o.property))
        .and_then(native_value)
        .unwrap_or_default()
}

/// Orders a row against a position: segment first, then `(sort, key)` in the requested direction.
fn compare<K: Ord>(row: &Row<K>, side: &Side, sort: &str, key: &K, order: &Option<PushdownOrder>) -> Ordering {
    let within = row.sort.as_str().cmp(sort).then_with(|| row.key.cmp(key));
    let within = match order {
        Some(PushdownOrder {
            direction: SortDirection::Descending,
            ..
        }) => within.reverse(),
        _ => within,
    };
    row.side.cmp(side).then(within)
}

/// Slice of `rows` to return plus `(has_next, has_prev)`.
///
/// `position` orders a row against the cursor position; rows are sorted.
fn page<R>(
    rows: &[R],
    position: Option<impl Fn(&R) -> Ordering>,
    count: usize,
    direction: PageDirection,
) -> (std::ops::Range<usize>, bool, bool) {
    match direction {
        PageDirection::Forward => {
            let start = position
                .map(|cmp| rows.iter().take_while(|r| cmp(r) != Ordering::Greater).count())
                .unwrap_or(0);
            let end = (start + count).min(rows.len());
            (start..end, end < rows.len(), start > 0)
        }
        PageDirection::Backward => {
            let end = position
                .map(|cmp| rows.iter().take_while(|r| cmp(r) == Ordering::Less).count())
                .unwrap_or(rows.len());
            let start = end.saturating_sub(count);
            (start..end, end < rows.len(), start > 0)
        }
    }
}

fn edge_position(
    decoded: &CursorNode,
    order: &Option<PushdownOrder>,
) -> Result<(Side, String, EdgeKey)> {
    let position = if let Some(c) = &decoded.in_edge {
        (Side::In, String::new(), c.key())
    } else if let Some(c) = &decoded.in_edge_prop {
        (Side::In, c.value.clone(), c.key())
    } else if let Some(c) = &decoded.out_edge {
        (Side::Out, String::new(), c.key())
    } else if let Some(c) = &decoded.out_edge_prop {
        (Side::Out, c.value.clone(), c.key())
    } else {
        return Err(GraphError::InvalidCursor("expected an edge position".into()));
    };
    if order.is_none() && !position.1.is_empty() {
        return Err(GraphError::InvalidCursor("ordered cursor used for an unordered query".into()));
    }
    Ok(position)
}

#[async_trait]
impl GraphBackend for MemoryBackend {
    async fn try_get_nodes(&self, ids: &[String], _consistent_read: bool) -> Result<Vec<Option<RelayEdge<Node>>>> {
        self.record_call();
        let state = self.state.read().await;
        ids.iter()
            .map(|id| {
                state
                    .nodes
                    .get(id)
                    .map(|node| -> Result<RelayEdge<Node>> {
                        let cursor = CursorNode::for_type(&node.type_name, &node.id, None).serialize()?;
                        Ok(RelayEdge::new(cursor, node.clone()))
                    })
                    .transpose()
            })
            .collect()
    }

    async fn try_get_edges(&self, keys: &[EdgeKey], _consistent_read: bool) -> Result<Vec<Option<RelayEdge<Edge>>>> {
        self.record_call();
        let state = self.state.read().await;
        keys.iter()
            .map(|key| {
                state
                    .edges
                    .get(key)
                    .map(|edge| -> Result<RelayEdge<Edge>> {
                        Ok(RelayEdge::new(CursorNode::for_in_edge(key).serialize()?, edge.clone()))
                    })
                    .transpose()
            })
            .collect()
    }

    async fn get_in_to_edge_connection(&self, request: ToEdgeConnectionRequest) -> Result<Connection<EdgeKey>> {
        self.edge_connection(request, &[Side::In]).await
    }

    async fn get_out_to_edge_connection(&self, request: ToEdgeConnectionRequest) -> Result<Connection<EdgeKey>> {
        self.edge_connection(request, &[Side::Out]).await
    }

    async fn get_in_and_out_to_edge_connection(
        &self,
        request: ToEdgeConnectionRequest,
    ) -> Result<Connection<EdgeKey>> {
        self.edge_connection(request, &[Side::In, Side::Out]).await
    }

    async fn get_node_connection_by_type(&self, request: NodeConnectionRequest) -> Result<Connection<Node>> {
        self.record_call();
        let position = match request.cursor.as_deref() {
            Some(c) => {
                let decoded = cursor::deserialize(c)?;
                let tc = decoded
                    .type_cursor
                    .ok_or_else(|| GraphError::InvalidCursor("expected a type position".into()))?;
                if tc.type_name != request.type_name {
                    return Err(GraphError::InvalidCursor(format!(
                        "cursor of type {} used for {}",
                        tc.type_name, request.type_name
                    )));
                }
                Some((tc.sort.unwrap_or_default(), tc.id))
            }
            None => None,
        };

        let state = self.state.read().await;
        let mut rows: Vec<Row<String>> = state
            .nodes
            .values()
            .filter(|n| n.type_name == request.type_name)
            .filter(|n| passes(&request.filter, n.property_value(&request.filter)))
            .map(|n| Row {
                side: Side::In,
                sort: sort_value(&request.order, |p| n.properties.get(p)),
                key: n.id.clone(),
            })
            .collect();
        rows.sort_by(|a, b| compare(a, &b.side, &b.sort, &b.key, &request.order));

        let order = &request.order;
        let (range, has_next, has_prev) = page(
            &rows,
            position
                .as_ref()
                .map(|(sort, id)| move |row: &Row<String>| compare(row, &Side::In, sort, id, order)),
            request.count,
            request.direction,
        );

        let edges = rows[range]
            .iter()
            .filter_map(|row| state.nodes.get(&row.key).map(|node| (row, node)))
            .map(|(row, node)| -> Result<RelayEdge<Node>> {
                let sort = order.as_ref().map(|_| row.sort.clone());
                let cursor = CursorNode::for_type(&node.type_name, &node.id, sort).serialize()?;
                Ok(RelayEdge::new(cursor, node.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Connection::new(edges, has_next, has_prev))
    }

    async fn put(&self, request: PutRequest) -> Result<()> {
        self.record_call();
        if let Some(kind) = self.put_failures.lock().await.pop_front() {
            return Err(GraphError::backend(kind, "injected failure"));
        }

        let mut state = self.state.write().await;
        for node in &request.nodes {
            let current = state.nodes.get(&node.id).map_or(0, |n| n.version);
            if current != node.version {
                return Err(GraphError::backend(
                    BackendErrorKind::ConcurrencyConflict,
                    format!("node {} is at version {}, expected {}", node.id, current, node.version),
                ));
            }
        }
        for edge in &request.edges {
            let current = state.edges.get(&edge.key()).map_or(0, |e| e.version);
            if current != edge.version {
                return Err(GraphError::backend(
                    BackendErrorKind::ConcurrencyConflict,
                    format!(
                        "edge {}-[{}]->{} is at version {}, expected {}",
                        edge.in_id, edge.type_name, edge.out_id, current, edge.version
                    ),
                ));
            }
        }

        let now = Utc::now();
        for mut node in request.nodes {
            node.version += 1;
            node.updated_at = now;
            state.nodes.insert(node.id.clone(), node);
        }
        for mut edge in request.edges {
            edge.version += 1;
            edge.updated_at = now;
            state.edges.insert(edge.key(), edge);
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaSource for MemoryBackend {
    async fn load_schema(&self, _table: &str) -> Result<GraphSchema> {
        Ok(self.schema.clone())
    }
}
