use graphrelay_common::{Connection, Node, RelayEdge};

use super::paging::{
    after_watermark, child_sequence, has_previous, has_unconsumed, is_end_of_data, page_size, ExecutionMode, Sequence,
};
use super::{unexpected_query_type, ExecutionServices};
use crate::context::{ChildCursor, ExecutionContext, NodeConnectionResult, ResultState};
use crate::cursor::{self, CursorNode};
use crate::error::{GraphError, Result};
use crate::query::QueryNode;

/// Union of two child node connections, balanced between both sides.
///
/// Each side gets half the page, rounded up for the first; a side that runs
/// short leaves its share to the other. Items of the first child precede
/// those of the second. Every item cursor records both child positions; a
/// child with nothing left is marked end-of-data so a resumed request skips
/// it.
pub async fn execute(ctx: &ExecutionContext, key: &str, services: &ExecutionServices) -> Result<ExecutionContext> {
    let node = ctx.tree().node(key)?.clone();
    let QueryNode::ZipNodeConnection(query) = node.as_ref() else {
        return Err(unexpected_query_type());
    };
    if is_end_of_data(&query.args) {
        return Ok(ctx.set_result(key, NodeConnectionResult::empty()));
    }
    let [a, b] = ctx.tree().children(key) else {
        return Err(GraphError::not_supported(format!(
            "zip requires exactly two children, '{}' has {}",
            key,
            ctx.tree().children(key).len()
        )));
    };

    let seq_a: Sequence<Node> = child_sequence(ctx, a)?;
    let seq_b: Sequence<Node> = child_sequence(ctx, b)?;
    let prior = ctx.try_get_result::<NodeConnectionResult>(key);
    let mode = ExecutionMode::of(prior.map(|p| &p.state));
    let wanted = page_size(&query.args, &services.config);

    let base = match (mode, prior) {
        (ExecutionMode::Append, Some(p)) => p.connection.edges.clone(),
        _ => Vec::new(),
    };
    let position = |child: &str| -> Option<String> {
        match (mode, prior) {
            (ExecutionMode::Initial, _) | (_, None) => None,
            (_, Some(p)) => p
                .state
                .child_cursor
                .as_ref()
                .and_then(|c| c.position(child))
                .map(str::to_string),
        }
    };
    let (wm_a, wm_b) = (position(a), position(b));
    let cand_a = after_watermark(&seq_a.edges, wm_a.as_deref());
    let cand_b = after_watermark(&seq_b.edges, wm_b.as_deref());

    let remaining = wanted.saturating_sub(base.len());
    let take_a = cand_a.len().min(remaining.div_ceil(2).max(remaining.saturating_sub(cand_b.len())));
    let take_b = cand_b.len().min(remaining - take_a);

    let new_wm_a = cand_a[..take_a].last().map(|e| e.cursor.clone()).or(wm_a);
    let new_wm_b = cand_b[..take_b].last().map(|e| e.cursor.clone()).or(wm_b.clone());

    let mut edges = base;
    for edge in &cand_a[..take_a] {
        let cursor = zip_cursor(a, &seq_a, Some(&edge.cursor), b, &seq_b, wm_b.as_deref())?;
        edges.push(RelayEdge::new(cursor, edge.node.clone()));
    }
    for edge in &cand_b[..take_b] {
        let cursor = zip_cursor(a, &seq_a, new_wm_a.as_deref(), b, &seq_b, Some(&edge.cursor))?;
        edges.push(RelayEdge::new(cursor, edge.node.clone()));
    }

    let leftovers = take_a < cand_a.len() || take_b < cand_b.len();
    let needs_more_data = edges.len() < wanted && (seq_a.can_supply() || seq_b.can_supply());
    let has_more_data = leftovers || seq_a.page_info.has_next_page || seq_b.page_info.has_next_page;
    let has_previous_page = has_previous(
        mode,
        prior.map(|p| &p.connection.page_info),
        seq_a.page_info.has_previous_page || seq_b.page_info.has_previous_page,
    );

    tracing::debug!(
        "Zip '{}' ({:?}): took {} + {} of {} + {}, page {}/{}",
        key,
        mode,
        take_a,
        take_b,
        cand_a.len(),
        cand_b.len(),
        edges.len(),
        wanted
    );

    let positions = [(a, new_wm_a), (b, new_wm_b)]
        .into_iter()
        .filter_map(|(k, w)| w.map(|w| (k.clone(), w)))
        .collect();
    let result = NodeConnectionResult {
        connection: Connection::new(edges, has_more_data, has_previous_page),
        state: ResultState {
            child_cursor: Some(ChildCursor {
                positions,
                ..Default::default()
            }),
            cursor: None,
            needs_more_data,
            has_more_data,
        },
    };
    Ok(ctx.set_result(key, result))
}

fn zip_cursor(
    a: &str,
    seq_a: &Sequence<Node>,
    pos_a: Option<&str>,
    b: &str,
    seq_b: &Sequence<Node>,
    pos_b: Option<&str>,
) -> Result<String> {
    let mut zipped = CursorNode::default();
    if let Some(sub) = sub_cursor(seq_a, pos_a)? {
        zipped = zipped.with_child(a, sub);
    }
    if let Some(sub) = sub_cursor(seq_b, pos_b)? {
        zipped = zipped.with_child(b, sub);
    }
    zipped.serialize()
}

/// Cursor of one side at `position`: end-of-data once that side has nothing left.
fn sub_cursor(seq: &Sequence<Node>, position: Option<&str>) -> Result<Option<CursorNode>> {
    if !has_unconsumed(seq, position) && !seq.can_supply() {
        return Ok(Some(CursorNode::end_of_data()));
    }
    position.map(cursor::deserialize).transpose()
}

/// True while `child_key` holds items the zip has not taken yet.
pub fn has_more_child_data(ctx: &ExecutionContext, key: &str, child_key: &str) -> Result<bool> {
    let seq: Sequence<Node> = child_sequence(ctx, child_key)?;
    let watermark = ctx
        .try_get_result::<NodeConnectionResult>(key)
        .and_then(|r| r.state.child_cursor.as_ref())
        .and_then(|c| c.position(child_key));
    Ok(has_unconsumed(&seq, watermark))
}
