use futures::future::BoxFuture;
use graphrelay_common::{Connection, Edge, EdgeKey, Node, RelayEdge};

use super::paging::{
    after_watermark, child_sequence, fetch_count, has_previous, has_unconsumed, is_end_of_data, page_size,
    ExecutionMode, Sequence,
};
use super::{unexpected_query_type, ExecutionServices};
use crate::backend::{GraphBackend, ToEdgeConnectionRequest};
use crate::context::{ChildCursor, EdgeConnectionResult, ExecutionContext, ResultState};
use crate::cursor::{self, CursorNode};
use crate::diagnostics::DiagnosticEvent;
use crate::error::{GraphError, Result};
use crate::pushdown::{EdgePushdown, PushdownQueryData};
use crate::query::{QueryNode, ToEdgeConnectionQuery};

type EdgeKeyPage<'a> = BoxFuture<'a, Result<Connection<EdgeKey>>>;

/// What differs between the in, out and in-and-out edge listings.
#[derive(Clone, Copy)]
pub struct ToEdgeSelectors {
    /// Edge type to list, `None` for every type.
    pub edge_type: fn(&QueryNode) -> Result<Option<String>>,
    /// Node whose list a backend position belongs to.
    pub node_id: fn(&CursorNode) -> Result<String>,
    pub fetch: for<'a> fn(&'a dyn GraphBackend, ToEdgeConnectionRequest) -> EdgeKeyPage<'a>,
}

pub const IN_SELECTORS: ToEdgeSelectors = ToEdgeSelectors {
    edge_type: in_edge_type,
    node_id: in_node_id,
    fetch: fetch_in,
};

pub const OUT_SELECTORS: ToEdgeSelectors = ToEdgeSelectors {
    edge_type: out_edge_type,
    node_id: out_node_id,
    fetch: fetch_out,
};

pub const IN_AND_OUT_SELECTORS: ToEdgeSelectors = ToEdgeSelectors {
    edge_type: in_and_out_edge_type,
    node_id: in_or_out_node_id,
    fetch: fetch_in_and_out,
};

fn to_edge_query(node: &QueryNode) -> Result<&ToEdgeConnectionQuery> {
    match node {
        QueryNode::InToEdgeConnection(q)
        | QueryNode::OutToEdgeConnection(q)
        | QueryNode::InAndOutToEdgeConnection(q)
        | QueryNode::InToAllEdgeConnection(q)
        | QueryNode::OutToAllEdgeConnection(q) => Ok(q),
        _ => Err(unexpected_query_type()),
    }
}

fn in_edge_type(node: &QueryNode) -> Result<Option<String>> {
    match node {
        QueryNode::InToEdgeConnection(q) => Ok(q.edge_type.clone()),
        QueryNode::InToAllEdgeConnection(_) => Ok(None),
        _ => Err(unexpected_query_type()),
    }
}

fn out_edge_type(node: &QueryNode) -> Result<Option<String>> {
    match node {
        QueryNode::OutToEdgeConnection(q) => Ok(q.edge_type.clone()),
        QueryNode::OutToAllEdgeConnection(_) => Ok(None),
        _ => Err(unexpected_query_type()),
    }
}

fn in_and_out_edge_type(node: &QueryNode) -> Result<Option<String>> {
    match node {
        QueryNode::InAndOutToEdgeConnection(q) => Ok(q.edge_type.clone()),
        _ => Err(unexpected_query_type()),
    }
}

fn in_node_id(position: &CursorNode) -> Result<String> {
    position
        .in_node_id()
        .map(str::to_string)
        .ok_or_else(|| GraphError::operation("node in id was missing"))
}

fn out_node_id(position: &CursorNode) -> Result<String> {
    position
        .out_node_id()
        .map(str::to_string)
        .ok_or_else(|| GraphError::operation("node out id was missing"))
}

fn in_or_out_node_id(position: &CursorNode) -> Result<String> {
    in_node_id(position).or_else(|_| out_node_id(position))
}

fn fetch_in<'a>(backend: &'a dyn GraphBackend, request: ToEdgeConnectionRequest) -> EdgeKeyPage<'a> {
    backend.get_in_to_edge_connection(request)
}

fn fetch_out<'a>(backend: &'a dyn GraphBackend, request: ToEdgeConnectionRequest) -> EdgeKeyPage<'a> {
    backend.get_out_to_edge_connection(request)
}

fn fetch_in_and_out<'a>(backend: &'a dyn GraphBackend, request: ToEdgeConnectionRequest) -> EdgeKeyPage<'a> {
    backend.get_in_and_out_to_edge_connection(request)
}

/// A node whose edge list is still to be read.
struct Work {
    node_id: String,
    /// Backend position inside the node's list.
    after: Option<String>,
    /// Child cursor of the node, embedded in every produced edge cursor.
    owner: Option<String>,
}

/// Lists the edges of every child node, node after node.
///
/// A node whose list does not fit the page is resumed from the last examined
/// backend position before any later node is read. Produced cursors hold the
/// backend position with the owning node's cursor under the child key.
pub async fn execute(
    ctx: &ExecutionContext,
    key: &str,
    services: &ExecutionServices,
    selectors: ToEdgeSelectors,
) -> Result<ExecutionContext> {
    let node = ctx.tree().node(key)?.clone();
    let query = to_edge_query(&node)?;
    let edge_type = (selectors.edge_type)(&node)?;
    if is_end_of_data(&query.args) {
        return Ok(ctx.set_result(key, EdgeConnectionResult::empty()));
    }

    let child = ctx.tree().only_child(key)?;
    let seq: Sequence<Node> = child_sequence(ctx, child)?;
    let prior = ctx.try_get_result::<EdgeConnectionResult>(key);
    let mode = ExecutionMode::of(prior.map(|p| &p.state));
    let wanted = page_size(&query.args, &services.config);

    let plan = match &edge_type {
        Some(t) => EdgePushdown::new(&services.schema).try_get_pushdown_query_data(
            t,
            query.filter.as_ref(),
            query.order.as_ref(),
        )?,
        None => {
            if query.order.as_ref().map_or(false, |o| !o.is_empty()) {
                return Err(GraphError::not_supported("ordering edges requires an edge type"));
            }
            PushdownQueryData {
                post_filter_required: query.filter.as_ref().map_or(false, |f| !f.is_empty()),
                ..Default::default()
            }
        }
    };

    let base = match (mode, prior) {
        (ExecutionMode::Append, Some(p)) => p.connection.edges.clone(),
        _ => Vec::new(),
    };
    let mut work = Vec::new();
    let watermark = match (mode, prior) {
        (ExecutionMode::Initial, _) | (_, None) => {
            if let Some(after) = query.args.after_cursor() {
                let decoded = cursor::deserialize(after)?;
                if decoded.has_position() {
                    work.push(Work {
                        node_id: (selectors.node_id)(&decoded)?,
                        after: Some(decoded.markers_only().serialize()?),
                        owner: decoded.child(child).map(cursor::serialize).transpose()?,
                    });
                }
            }
            None
        }
        (_, Some(p)) => {
            let child_cursor = p.state.child_cursor.as_ref();
            let watermark = child_cursor.and_then(|c| c.position(child)).map(str::to_string);
            if let Some(after) = child_cursor.and_then(|c| c.backend.clone()) {
                work.push(Work {
                    node_id: (selectors.node_id)(&cursor::deserialize(&after)?)?,
                    after: Some(after),
                    owner: watermark.clone(),
                });
            }
            watermark
        }
    };
    work.extend(after_watermark(&seq.edges, watermark.as_deref()).iter().map(|n| Work {
        node_id: n.node.id.clone(),
        after: None,
        owner: Some(n.cursor.clone()),
    }));

    let post_accepts = |edge: &Edge| {
        !plan.post_filter_required || query.filter.as_ref().map_or(true, |f| f.matches(edge))
    };
    let remaining = wanted.saturating_sub(base.len());
    let mut fresh: Vec<RelayEdge<Edge>> = Vec::new();
    let mut new_watermark = watermark;
    let mut pending: Option<String> = None;
    let mut leftover = false;
    let mut dangling = false;
    let mut processed = 0;

    for item in &work {
        if fresh.len() == remaining {
            leftover = true;
            break;
        }
        services.cancel.check()?;
        let request = ToEdgeConnectionRequest {
            node_id: item.node_id.clone(),
            edge_type: edge_type.clone(),
            after: item.after.clone(),
            count: fetch_count(query.page_size, remaining - fresh.len(), plan.post_filter_required),
            filter: plan.filter.clone(),
            order: plan.order.clone(),
            consistent_read: query.consistent_read,
        };
        let page = (selectors.fetch)(services.backend.as_ref(), request).await?;
        let keys: Vec<EdgeKey> = page.items().cloned().collect();
        let found = if keys.is_empty() {
            Vec::new()
        } else {
            services.cancel.check()?;
            services.backend.try_get_edges(&keys, query.consistent_read).await?
        };
        let owner = item.owner.as_deref().map(cursor::deserialize).transpose()?;

        let rows: Vec<_> = page.edges.iter().zip(found).collect();
        let mut last_examined = None;
        let mut node_leftover = false;
        for (i, (relay, edge)) in rows.iter().enumerate() {
            if fresh.len() == remaining {
                node_leftover = rows[i..]
                    .iter()
                    .any(|(_, e)| e.as_ref().map_or(false, |e| post_accepts(&e.node)));
                break;
            }
            last_examined = Some(relay.cursor.clone());
            let Some(edge) = edge else {
                services.sink.emit(DiagnosticEvent::DanglingEdgeKey {
                    query_key: key.to_string(),
                    edge: relay.node.clone(),
                });
                dangling = true;
                continue;
            };
            if !post_accepts(&edge.node) {
                continue;
            }
            let mut position = cursor::deserialize(&relay.cursor)?;
            if let Some(owner) = &owner {
                position = position.with_child(child, owner.clone());
            }
            fresh.push(RelayEdge::new(position.serialize()?, edge.node.clone()));
        }

        processed += 1;
        if item.owner.is_some() {
            new_watermark = item.owner.clone();
        }
        if node_leftover || page.page_info.has_next_page {
            pending = last_examined.or_else(|| item.after.clone());
            break;
        }
    }

    let fresh_count = fresh.len();
    let mut edges = base;
    edges.extend(fresh);

    let unprocessed = processed < work.len();
    let needs_more_data = edges.len() < wanted && (dangling || pending.is_some() || seq.can_supply());
    let has_more_data = leftover || unprocessed || pending.is_some() || seq.page_info.has_next_page;
    let has_previous_page = has_previous(
        mode,
        prior.map(|p| &p.connection.page_info),
        seq.page_info.has_previous_page || query.args.after_cursor().is_some(),
    );

    tracing::debug!(
        "'{}' ({:?}): {} nodes to read, {} read, {} new edges, page {}/{}, needs_more={}",
        key,
        mode,
        work.len(),
        processed,
        fresh_count,
        edges.len(),
        wanted,
        needs_more_data
    );

    let result = EdgeConnectionResult {
        connection: Connection::new(edges, has_more_data, has_previous_page),
        state: ResultState {
            child_cursor: Some(ChildCursor {
                positions: new_watermark.into_iter().map(|w| (child.to_string(), w)).collect(),
                backend: pending,
                offset: 0,
            }),
            cursor: None,
            needs_more_data,
            has_more_data,
        },
    };
    Ok(ctx.set_result(key, result))
}

/// True while the child holds nodes whose edges were not read yet.
pub fn has_more_child_data(ctx: &ExecutionContext, key: &str) -> Result<bool> {
    let child = ctx.tree().only_child(key)?;
    let seq: Sequence<Node> = child_sequence(ctx, child)?;
    let watermark = ctx
        .try_get_result::<EdgeConnectionResult>(key)
        .and_then(|r| r.state.child_cursor.as_ref())
        .and_then(|c| c.position(child));
    Ok(has_unconsumed(&seq, watermark))
}
