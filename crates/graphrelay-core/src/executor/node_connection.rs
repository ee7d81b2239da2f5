use graphrelay_common::{Connection, Node, PageDirection, RelayEdge};

use super::paging::{fetch_count, is_end_of_data, page_size, ExecutionMode};
use super::{unexpected_query_type, ExecutionServices};
use crate::backend::NodeConnectionRequest;
use crate::context::{ChildCursor, ExecutionContext, NodeConnectionResult, ResultState};
use crate::error::Result;
use crate::pushdown::NodePushdown;
use crate::query::QueryNode;

/// Type scan leaf.
///
/// Requests `page_size` items (at least the page) from the backend, drops
/// the ones the post-filter rejects and keeps at most the requested count.
/// An under-filled page with more data in the backend asks for another
/// round, which continues from the last examined backend position.
pub async fn execute(ctx: &ExecutionContext, key: &str, services: &ExecutionServices) -> Result<ExecutionContext> {
    let node = ctx.tree().node(key)?.clone();
    let QueryNode::NodeConnection(query) = node.as_ref() else {
        return Err(unexpected_query_type());
    };
    if is_end_of_data(&query.args) {
        return Ok(ctx.set_result(key, NodeConnectionResult::empty()));
    }

    let prior = ctx.try_get_result::<NodeConnectionResult>(key);
    let mode = ExecutionMode::of(prior.map(|p| &p.state));
    let direction = query.args.direction();
    let wanted = page_size(&query.args, &services.config);

    let (kept, start) = match (mode, prior) {
        (ExecutionMode::Append, Some(p)) => (
            p.connection.edges.clone(),
            p.state.child_cursor.as_ref().and_then(|c| c.backend.clone()),
        ),
        (ExecutionMode::Slide, Some(p)) => {
            if !p.state.has_more_data {
                return Ok(ctx.set_result(key, NodeConnectionResult::empty()));
            }
            (Vec::new(), p.state.child_cursor.as_ref().and_then(|c| c.backend.clone()))
        }
        _ => (Vec::new(), query.args.cursor().map(str::to_string)),
    };

    let plan = NodePushdown::new(&services.schema).try_get_pushdown_query_data(
        &query.type_name,
        query.filter.as_ref(),
        query.order.as_ref(),
    )?;
    let remaining = wanted.saturating_sub(kept.len());
    let request = NodeConnectionRequest {
        type_name: query.type_name.clone(),
        cursor: start.clone(),
        count: fetch_count(query.page_size, remaining, plan.post_filter_required),
        direction,
        filter: plan.filter.clone(),
        order: plan.order.clone(),
        consistent_read: query.consistent_read,
    };

    services.cancel.check()?;
    let page = services.backend.get_node_connection_by_type(request).await?;
    let (more_in_backend, other_side) = match direction {
        PageDirection::Forward => (page.page_info.has_next_page, page.page_info.has_previous_page),
        PageDirection::Backward => (page.page_info.has_previous_page, page.page_info.has_next_page),
    };
    let fetched = page.len();

    // Examine items moving away from the start position.
    let mut examined: Vec<RelayEdge<Node>> = page.edges;
    if direction == PageDirection::Backward {
        examined.reverse();
    }

    let accepts = |node: &Node| {
        !plan.post_filter_required || query.filter.as_ref().map_or(true, |f| f.matches(node))
    };
    let mut fresh = Vec::new();
    let mut position = start;
    let mut rest = examined.into_iter();
    let mut leftover = false;
    while let Some(edge) = rest.next() {
        if fresh.len() == remaining {
            leftover = accepts(&edge.node) || rest.any(|e| accepts(&e.node));
            break;
        }
        position = Some(edge.cursor.clone());
        if accepts(&edge.node) {
            fresh.push(edge);
        }
    }

    let fresh_count = fresh.len();
    let edges = match direction {
        PageDirection::Forward => kept.into_iter().chain(fresh).collect::<Vec<_>>(),
        PageDirection::Backward => fresh.into_iter().rev().chain(kept).collect::<Vec<_>>(),
    };

    let under_filled = edges.len() < wanted;
    let needs_more_data = under_filled && more_in_backend;
    let has_more_data = leftover || more_in_backend;
    let other_side = match (mode, prior) {
        (ExecutionMode::Append, Some(p)) => match direction {
            PageDirection::Forward => p.connection.page_info.has_previous_page,
            PageDirection::Backward => p.connection.page_info.has_next_page,
        },
        (ExecutionMode::Slide, _) => true,
        _ => other_side,
    };

    tracing::debug!(
        "NodeConnection '{}' ({:?}): fetched {}, kept {}, page {}/{}, needs_more={}",
        key,
        mode,
        fetched,
        fresh_count,
        edges.len(),
        wanted,
        needs_more_data
    );

    let connection = match direction {
        PageDirection::Forward => Connection::new(edges, has_more_data, other_side),
        PageDirection::Backward => Connection::new(edges, other_side, has_more_data),
    };
    let result = NodeConnectionResult {
        connection,
        state: ResultState {
            child_cursor: Some(ChildCursor {
                backend: position,
                ..Default::default()
            }),
            cursor: None,
            needs_more_data,
            has_more_data,
        },
    };
    Ok(ctx.set_result(key, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::query::filter::{Filter, IntFilter, StringFilter, ValueFilter};
    use crate::query::{NodeConnectionQuery, QueryTree};
    use crate::schema::GraphSchema;
    use graphrelay_common::ConnectionArguments;
    use std::sync::Arc;

    async fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new(GraphSchema::new().with_node_type("Person", ["name"])));
        for i in 1..=6 {
            backend
                .insert_node(Node::new(format!("p{}", i), "Person").with_property("age", i * 10))
                .await;
        }
        backend
    }

    fn services(backend: Arc<MemoryBackend>) -> ExecutionServices {
        let schema = Arc::new(GraphSchema::new().with_node_type("Person", ["name"]));
        ExecutionServices::new(backend, schema)
    }

    fn context(query: NodeConnectionQuery) -> ExecutionContext {
        let tree = QueryTree::new()
            .add_node("people", QueryNode::NodeConnection(query))
            .unwrap();
        ExecutionContext::new(tree)
    }

    fn ids(ctx: &ExecutionContext) -> Vec<String> {
        ctx.get_result::<NodeConnectionResult>("people")
            .unwrap()
            .connection
            .items()
            .map(|n| n.id.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_plain_page() {
        let services = services(backend().await);
        let ctx = context(NodeConnectionQuery::new("Person", ConnectionArguments::first(2)));
        let ctx = execute(&ctx, "people", &services).await.unwrap();

        assert_eq!(ids(&ctx), vec!["p1", "p2"]);
        let result = ctx.get_result::<NodeConnectionResult>("people").unwrap();
        assert!(result.connection.page_info.has_next_page);
        assert!(!result.state.needs_more_data);
    }

    #[tokio::test]
    async fn test_post_filter_under_fill_appends_in_next_run() {
        let services = services(backend().await);
        let mut query = NodeConnectionQuery::new("Person", ConnectionArguments::first(2));
        query.page_size = Some(2);
        query.filter = Some(Filter::new().with(
            "age",
            ValueFilter::Int(IntFilter {
                ge: Some(30),
                ..Default::default()
            }),
        ));
        let ctx = context(query);

        let ctx = execute(&ctx, "people", &services).await.unwrap();
        assert!(ids(&ctx).is_empty());
        assert!(ctx.get_result::<NodeConnectionResult>("people").unwrap().state.needs_more_data);

        let ctx = execute(&ctx, "people", &services).await.unwrap();
        assert_eq!(ids(&ctx), vec!["p3", "p4"]);
        let result = ctx.get_result::<NodeConnectionResult>("people").unwrap();
        assert!(!result.state.needs_more_data);
        assert!(result.state.has_more_data);
    }

    #[tokio::test]
    async fn test_slide_continues_after_page_and_stops_at_end() {
        let services = services(backend().await);
        let ctx = context(NodeConnectionQuery::new("Person", ConnectionArguments::first(4)));

        let ctx = execute(&ctx, "people", &services).await.unwrap();
        assert_eq!(ids(&ctx).len(), 4);
        let ctx = execute(&ctx, "people", &services).await.unwrap();
        assert_eq!(ids(&ctx), vec!["p5", "p6"]);
        let ctx = execute(&ctx, "people", &services).await.unwrap();
        assert!(ids(&ctx).is_empty());
    }

    #[tokio::test]
    async fn test_backward_page() {
        let services = services(backend().await);
        let ctx = context(NodeConnectionQuery::new("Person", ConnectionArguments::last(2)));
        let ctx = execute(&ctx, "people", &services).await.unwrap();
        assert_eq!(ids(&ctx), vec!["p5", "p6"]);
        let result = ctx.get_result::<NodeConnectionResult>("people").unwrap();
        assert!(result.connection.page_info.has_previous_page);
        assert!(!result.connection.page_info.has_next_page);
    }

    #[tokio::test]
    async fn test_pushed_string_eq_matches_date_like_value_verbatim() {
        let backend = backend().await;
        backend
            .insert_node(Node::new("p7", "Person").with_property("name", "2025-01-01T00:00:00Z"))
            .await;
        let services = services(backend);
        let mut query = NodeConnectionQuery::new("Person", ConnectionArguments::first(5));
        query.filter = Some(Filter::new().with(
            "name",
            ValueFilter::String(StringFilter {
                eq: Some("2025-01-01T00:00:00Z".into()),
                ..Default::default()
            }),
        ));

        let ctx = execute(&context(query), "people", &services).await.unwrap();
        assert_eq!(ids(&ctx), vec!["p7"]);
    }

    #[tokio::test]
    async fn test_end_of_data_cursor_skips_backend() {
        let backend = backend().await;
        let services = services(backend.clone());
        let eod = crate::cursor::CursorNode::end_of_data().serialize().unwrap();
        let ctx = context(NodeConnectionQuery::new(
            "Person",
            ConnectionArguments::first(2).with_after(eod),
        ));
        let ctx = execute(&ctx, "people", &services).await.unwrap();
        assert!(ids(&ctx).is_empty());
        assert_eq!(backend.call_count(), 0);
    }
}
