use std::collections::HashSet;

use graphrelay_common::{Connection, Edge, Node, RelayEdge};

use super::paging::{
    after_watermark, child_sequence, has_previous, has_unconsumed, is_end_of_data, page_size, ExecutionMode, Sequence,
};
use super::{unexpected_query_type, ExecutionServices};
use crate::context::{ChildCursor, ExecutionContext, NodeConnectionResult, ResultState};
use crate::cursor::{self, CursorNode};
use crate::diagnostics::DiagnosticEvent;
use crate::error::Result;
use crate::query::{FromEdgeConnectionQuery, QueryNode};

/// One node id to resolve: target `target` of `targets` on candidate edge `edge`.
struct Slot {
    edge: usize,
    target: usize,
    targets: usize,
    id: String,
}

/// Maps a child edge connection to the connection of its endpoint nodes.
///
/// `targets` selects the endpoint ids of each edge, in output order. An edge
/// with two targets can be split across pages; the cursor of its first
/// target then carries an offset over the previous child position.
pub async fn execute(
    ctx: &ExecutionContext,
    key: &str,
    services: &ExecutionServices,
    targets: fn(&Edge) -> Vec<String>,
) -> Result<ExecutionContext> {
    let node = ctx.tree().node(key)?.clone();
    let query = match node.as_ref() {
        QueryNode::InFromEdgeConnection(q)
        | QueryNode::OutFromEdgeConnection(q)
        | QueryNode::InAndOutFromEdgeConnection(q) => q,
        _ => return Err(unexpected_query_type()),
    };
    if is_end_of_data(&query.args) {
        return Ok(ctx.set_result(key, NodeConnectionResult::empty()));
    }

    let child = ctx.tree().only_child(key)?;
    let seq: Sequence<Edge> = child_sequence(ctx, child)?;
    let prior = ctx.try_get_result::<NodeConnectionResult>(key);
    let mode = ExecutionMode::of(prior.map(|p| &p.state));
    let wanted = page_size(&query.args, &services.config);

    let base = match (mode, prior) {
        (ExecutionMode::Append, Some(p)) => p.connection.edges.clone(),
        _ => Vec::new(),
    };
    let (watermark, offset) = match (mode, prior) {
        (ExecutionMode::Initial, _) | (_, None) => (
            None,
            query
                .args
                .after_cursor()
                .and_then(|c| cursor::deserialize(c).ok())
                .and_then(|c| c.offset)
                .unwrap_or(0),
        ),
        (_, Some(p)) => {
            let child_cursor = p.state.child_cursor.as_ref();
            (
                child_cursor.and_then(|c| c.position(child)).map(str::to_string),
                child_cursor.map_or(0, |c| c.offset),
            )
        }
    };
    let candidates = after_watermark(&seq.edges, watermark.as_deref());

    let slots: Vec<Slot> = candidates
        .iter()
        .enumerate()
        .flat_map(|(i, e)| {
            let ids = targets(&e.node);
            let n = ids.len();
            ids.into_iter().enumerate().filter_map(move |(j, id)| {
                (i > 0 || j >= offset as usize).then_some(Slot {
                    edge: i,
                    target: j,
                    targets: n,
                    id,
                })
            })
        })
        .collect();

    let resolved = if slots.is_empty() {
        Vec::new()
    } else {
        services.cancel.check()?;
        let ids: Vec<String> = slots.iter().map(|s| s.id.clone()).collect();
        services.backend.try_get_nodes(&ids, query.consistent_read).await?
    };

    let child_after = ctx
        .tree()
        .node(child)?
        .args()
        .and_then(|a| a.after_cursor())
        .map(str::to_string);
    let remaining = wanted.saturating_sub(base.len());
    let mut seen: HashSet<String> = base.iter().map(|e| e.node.id.clone()).collect();
    let mut fresh: Vec<RelayEdge<Node>> = Vec::new();
    let mut new_watermark = watermark.clone();
    let mut new_offset = offset;
    let mut leftover = false;
    let mut dangling = false;
    let mut stopped = false;

    for (s, slot) in slots.iter().enumerate() {
        if fresh.len() == remaining {
            leftover = resolved[s..]
                .iter()
                .flatten()
                .any(|r| acceptable(query, &r.node) && !seen.contains(&r.node.id));
            stopped = true;
            break;
        }
        let edge = &candidates[slot.edge];
        if slot.target + 1 == slot.targets {
            new_watermark = Some(edge.cursor.clone());
            new_offset = 0;
        } else {
            new_offset = slot.target as u32 + 1;
        }

        let Some(found) = resolved.get(s).and_then(Option::as_ref) else {
            services.sink.emit(DiagnosticEvent::DanglingEdge {
                query_key: key.to_string(),
                edge: edge.node.key(),
                node_id: slot.id.clone(),
            });
            dangling = true;
            continue;
        };
        if !acceptable(query, &found.node) || !seen.insert(found.node.id.clone()) {
            continue;
        }

        let cursor = if slot.target + 1 == slot.targets {
            edge.cursor.clone()
        } else {
            let previous = match slot.edge {
                0 => watermark.clone().or_else(|| child_after.clone()),
                i => Some(candidates[i - 1].cursor.clone()),
            };
            let position = match previous {
                Some(p) => cursor::deserialize(&p)?,
                None => CursorNode::default(),
            };
            position.with_offset(slot.target as u32 + 1).serialize()?
        };
        fresh.push(RelayEdge::new(cursor, found.node.clone()));
    }
    if !stopped {
        if let Some(last) = candidates.last() {
            new_watermark = Some(last.cursor.clone());
            new_offset = 0;
        }
    }

    let fresh_count = fresh.len();
    let mut edges = base;
    edges.extend(fresh);

    let needs_more_data = edges.len() < wanted && (dangling || seq.can_supply());
    let has_more_data = leftover || seq.page_info.has_next_page;
    let has_previous_page = has_previous(
        mode,
        prior.map(|p| &p.connection.page_info),
        seq.page_info.has_previous_page || offset > 0,
    );

    tracing::debug!(
        "'{}' ({:?}): {} candidate edges, {} new nodes, page {}/{}, needs_more={}",
        key,
        mode,
        candidates.len(),
        fresh_count,
        edges.len(),
        wanted,
        needs_more_data
    );

    let result = NodeConnectionResult {
        connection: Connection::new(edges, has_more_data, has_previous_page),
        state: ResultState {
            child_cursor: Some(ChildCursor {
                positions: new_watermark.into_iter().map(|w| (child.to_string(), w)).collect(),
                backend: None,
                offset: new_offset,
            }),
            cursor: None,
            needs_more_data,
            has_more_data,
        },
    };
    Ok(ctx.set_result(key, result))
}

fn acceptable(query: &FromEdgeConnectionQuery, node: &Node) -> bool {
    query.node_type.as_ref().map_or(true, |t| t == &node.type_name)
        && query.filter.as_ref().map_or(true, |f| f.matches(node))
}

/// True while the child holds edges not yet fully mapped.
pub fn has_more_child_data(ctx: &ExecutionContext, key: &str) -> Result<bool> {
    let child = ctx.tree().only_child(key)?;
    let seq: Sequence<Edge> = child_sequence(ctx, child)?;
    let watermark = ctx
        .try_get_result::<NodeConnectionResult>(key)
        .and_then(|r| r.state.child_cursor.as_ref())
        .and_then(|c| c.position(child));
    Ok(has_unconsumed(&seq, watermark))
}
