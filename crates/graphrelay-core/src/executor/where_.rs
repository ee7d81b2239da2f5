use futures::future::BoxFuture;
use futures::StreamExt;
use graphrelay_common::{Connection, RelayEdge};

use super::paging::{
    after_watermark, child_sequence, has_previous, has_unconsumed, is_end_of_data, page_size, ExecutionMode,
    SequenceItem,
};
use super::ExecutionServices;
use crate::context::{ChildCursor, ConnectionResult, ExecutionContext, ResultKind, ResultState};
use crate::error::Result;
use crate::query::WhereQuery;

/// Keeps the child items the predicate accepts, in child order.
///
/// Predicates run concurrently up to `predicate_concurrency`; results are
/// consumed in order and evaluation stops once the page is full.
pub async fn execute<T>(
    ctx: &ExecutionContext,
    key: &str,
    services: &ExecutionServices,
    query: &WhereQuery<T>,
) -> Result<ExecutionContext>
where
    T: SequenceItem,
    ConnectionResult<T>: ResultKind,
{
    if is_end_of_data(&query.args) {
        return Ok(ctx.set_result(key, ConnectionResult::<T>::empty()));
    }

    let child = ctx.tree().only_child(key)?;
    let seq = child_sequence::<T>(ctx, child)?;
    let prior = ctx.try_get_result::<ConnectionResult<T>>(key);
    let mode = ExecutionMode::of(prior.map(|p| &p.state));
    let wanted = page_size(&query.args, &services.config);

    let base = match (mode, prior) {
        (ExecutionMode::Append, Some(p)) => p.connection.edges.clone(),
        _ => Vec::new(),
    };
    let watermark = match (mode, prior) {
        (ExecutionMode::Initial, _) | (_, None) => None,
        (_, Some(p)) => p
            .state
            .child_cursor
            .as_ref()
            .and_then(|c| c.position(child))
            .map(str::to_string),
    };
    let candidates = after_watermark(&seq.edges, watermark.as_deref());
    let remaining = wanted.saturating_sub(base.len());

    let verdict: Box<dyn Fn(&RelayEdge<T>) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync + '_> =
        Box::new(|e| (query.predicate)(&e.node));
    let mut verdicts = futures::stream::iter(candidates.iter().map(verdict))
        .buffered(services.config.predicate_concurrency.max(1));
    let mut fresh = Vec::new();
    let mut examined = 0;
    let mut new_watermark = watermark;
    while fresh.len() < remaining {
        services.cancel.check()?;
        let Some(verdict) = verdicts.next().await else {
            break;
        };
        let edge = &candidates[examined];
        examined += 1;
        new_watermark = Some(edge.cursor.clone());
        if verdict? {
            fresh.push(edge.clone());
        }
    }

    let fresh_count = fresh.len();
    let mut edges = base;
    edges.extend(fresh);

    let needs_more_data = edges.len() < wanted && seq.can_supply();
    let has_more_data = examined < candidates.len() || seq.page_info.has_next_page;
    let has_previous_page = has_previous(
        mode,
        prior.map(|p| &p.connection.page_info),
        seq.page_info.has_previous_page,
    );

    tracing::debug!(
        "Where '{}' ({:?}): examined {}/{}, kept {}, page {}/{}",
        key,
        mode,
        examined,
        candidates.len(),
        fresh_count,
        edges.len(),
        wanted
    );

    let result = ConnectionResult {
        connection: Connection::new(edges, has_more_data, has_previous_page),
        state: ResultState {
            child_cursor: Some(ChildCursor {
                positions: new_watermark.into_iter().map(|w| (child.to_string(), w)).collect(),
                ..Default::default()
            }),
            cursor: None,
            needs_more_data,
            has_more_data,
        },
    };
    Ok(ctx.set_result(key, result))
}

pub fn has_more_child_data<T>(ctx: &ExecutionContext, key: &str) -> Result<bool>
where
    T: SequenceItem,
    ConnectionResult<T>: ResultKind,
{
    let child = ctx.tree().only_child(key)?;
    let seq = child_sequence::<T>(ctx, child)?;
    let watermark = ctx
        .try_get_result::<ConnectionResult<T>>(key)
        .and_then(|r| r.state.child_cursor.as_ref())
        .and_then(|c| c.position(child));
    Ok(has_unconsumed(&seq, watermark))
}
