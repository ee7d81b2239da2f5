use graphrelay_common::Edge;

use super::paging::{after_watermark, child_sequence, has_unconsumed, Sequence};
use super::{unexpected_query_type, ExecutionServices};
use crate::context::{ChildCursor, EdgeResult, ExecutionContext, ResultState};
use crate::error::{GraphError, Result};
use crate::query::QueryNode;

/// `First*` and `Single*` over a child edge connection.
///
/// Picks the first child item past what was already consumed. `Single*`
/// refuse a child page holding more than one item, consumed ones included. The default-suffixed
/// variants behave like their plain counterparts: an empty child yields an
/// empty result.
pub async fn execute(ctx: &ExecutionContext, key: &str, _services: &ExecutionServices) -> Result<ExecutionContext> {
    let node = ctx.tree().node(key)?;
    let single = match node.as_ref() {
        QueryNode::FirstEdge(_) | QueryNode::FirstOrDefaultEdge(_) => false,
        QueryNode::SingleEdge(_) | QueryNode::SingleOrDefaultEdge(_) => true,
        _ => return Err(unexpected_query_type()),
    };
    let child = ctx.tree().only_child(key)?;
    let seq: Sequence<Edge> = child_sequence(ctx, child)?;

    let prior = ctx.try_get_result::<EdgeResult>(key);
    let watermark = prior
        .and_then(|p| p.state.child_cursor.as_ref())
        .and_then(|c| c.position(child))
        .map(str::to_string);
    let candidates = after_watermark(&seq.edges, watermark.as_deref());

    if single && seq.edges.len() > 1 {
        return Err(GraphError::operation("too many results"));
    }

    let picked = candidates.first().cloned();
    let needs_more_data = picked.is_none() && seq.page_info.has_next_page;
    let has_more_data = picked.is_some() && seq.page_info.has_next_page;
    let position = picked.as_ref().map(|e| e.cursor.clone()).or(watermark);

    let state = ResultState {
        child_cursor: position.map(|p| ChildCursor {
            positions: [(child.to_string(), p)].into_iter().collect(),
            ..Default::default()
        }),
        cursor: picked.as_ref().map(|e| e.cursor.clone()),
        needs_more_data,
        has_more_data,
    };
    let result = EdgeResult {
        item: picked.map(|e| e.node),
        state,
    };
    Ok(ctx.set_result(key, result))
}

/// True while the child still holds items past the one consumed.
pub fn has_more_child_data(ctx: &ExecutionContext, key: &str) -> Result<bool> {
    let child = ctx.tree().only_child(key)?;
    let seq: Sequence<Edge> = child_sequence(ctx, child)?;
    let watermark = ctx
        .try_get_result::<EdgeResult>(key)
        .and_then(|r| r.state.child_cursor.as_ref())
        .and_then(|c| c.position(child));
    Ok(has_unconsumed(&seq, watermark))
}
