use graphrelay_common::Edge;

use super::{unexpected_query_type, ExecutionServices};
use crate::context::{EdgeResult, ExecutionContext, NodeResult, ResultState};
use crate::diagnostics::DiagnosticEvent;
use crate::error::Result;
use crate::query::QueryNode;

/// Hop from the child's single edge to one of its endpoints.
///
/// A target id that does not resolve is a dangling edge: it is reported to
/// the sink, the result stays empty and another round is requested so the
/// child can offer a replacement edge.
pub async fn execute(
    ctx: &ExecutionContext,
    key: &str,
    services: &ExecutionServices,
    select: fn(&Edge) -> String,
) -> Result<ExecutionContext> {
    let node = ctx.tree().node(key)?.clone();
    let query = match node.as_ref() {
        QueryNode::InFromEdge(q) | QueryNode::OutFromEdge(q) => q,
        _ => return Err(unexpected_query_type()),
    };
    let child = ctx.tree().only_child(key)?;
    let edge_result = ctx.get_result::<EdgeResult>(child)?;

    let Some(edge) = &edge_result.item else {
        return Ok(ctx.set_result(key, NodeResult::empty()));
    };
    let target = select(edge);

    services.cancel.check()?;
    let resolved = services
        .backend
        .try_get_nodes(std::slice::from_ref(&target), query.consistent_read)
        .await?
        .into_iter()
        .next()
        .flatten();

    let cursor = edge_result.state.cursor.clone();
    let result = match resolved {
        None => {
            services.sink.emit(DiagnosticEvent::DanglingEdge {
                query_key: key.to_string(),
                edge: edge.key(),
                node_id: target,
            });
            NodeResult {
                item: None,
                state: ResultState {
                    cursor,
                    needs_more_data: true,
                    has_more_data: true,
                    ..Default::default()
                },
            }
        }
        Some(relay) if query.node_type.as_ref().map_or(false, |t| t != &relay.node.type_name) => {
            tracing::debug!(
                "'{}' resolved {} of type {}, expected {:?}",
                key,
                relay.node.id,
                relay.node.type_name,
                query.node_type
            );
            NodeResult {
                item: None,
                state: ResultState {
                    cursor,
                    ..Default::default()
                },
            }
        }
        Some(relay) => NodeResult {
            item: Some(relay.node),
            state: ResultState {
                cursor,
                ..Default::default()
            },
        },
    };
    Ok(ctx.set_result(key, result))
}

/// True exactly when the child edge exists but no node was resolved for it.
pub fn has_more_child_data(ctx: &ExecutionContext, key: &str) -> Result<bool> {
    let child = ctx.tree().only_child(key)?;
    let edge_present = ctx
        .try_get_result::<EdgeResult>(child)
        .map_or(false, |r| r.item.is_some());
    let node_missing = ctx
        .try_get_result::<NodeResult>(key)
        .map_or(true, |r| r.item.is_none());
    Ok(edge_present && node_missing)
}

/// Whether the hop is done with the child's current edge, resolved or dangling.
pub fn consumed_child_edge(ctx: &ExecutionContext, key: &str) -> Result<bool> {
    let resolved = ctx
        .try_get_result::<NodeResult>(key)
        .map_or(false, |r| r.item.is_some());
    Ok(resolved || has_more_child_data(ctx, key)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::diagnostics::RecordingEventSink;
    use crate::error::GraphError;
    use crate::query::{FromEdgeQuery, QueryTree, SingleEdgeQuery};
    use crate::schema::GraphSchema;
    use graphrelay_common::Node;
    use std::sync::Arc;

    async fn setup() -> (ExecutionServices, Arc<RecordingEventSink>) {
        let backend = Arc::new(MemoryBackend::default());
        backend.insert_node(Node::new("a", "Person")).await;
        backend.insert_node(Node::new("b", "City")).await;
        let sink = Arc::new(RecordingEventSink::new());
        let services = ExecutionServices::new(backend, Arc::new(GraphSchema::new())).with_sink(sink.clone());
        (services, sink)
    }

    fn context(node: QueryNode, edge: Option<Edge>) -> ExecutionContext {
        let tree = QueryTree::new()
            .add_node("edge", QueryNode::FirstEdge(SingleEdgeQuery::default()))
            .unwrap()
            .add_parent_node("edge", "hop", node)
            .unwrap();
        ExecutionContext::new(tree).set_result(
            "edge",
            EdgeResult {
                item: edge,
                state: ResultState {
                    cursor: Some("c1".into()),
                    ..Default::default()
                },
            },
        )
    }

    #[tokio::test]
    async fn test_resolves_selected_endpoint() {
        let (services, _) = setup().await;
        let ctx = context(
            QueryNode::InFromEdge(FromEdgeQuery::default()),
            Some(Edge::new("a", "LivesIn", "b")),
        );
        let ctx = execute(&ctx, "hop", &services, |e| e.in_id.clone()).await.unwrap();
        let result = ctx.get_result::<NodeResult>("hop").unwrap();
        assert_eq!(result.item.as_ref().unwrap().id, "a");
        assert_eq!(result.state.cursor.as_deref(), Some("c1"));
        assert!(!has_more_child_data(&ctx, "hop").unwrap());
    }

    #[tokio::test]
    async fn test_dangling_edge_requests_more() {
        let (services, sink) = setup().await;
        let ctx = context(
            QueryNode::OutFromEdge(FromEdgeQuery::default()),
            Some(Edge::new("a", "Knows", "ghost")),
        );
        let ctx = execute(&ctx, "hop", &services, |e| e.out_id.clone()).await.unwrap();
        let result = ctx.get_result::<NodeResult>("hop").unwrap();
        assert!(result.item.is_none());
        assert!(result.state.needs_more_data);
        assert_eq!(sink.dangling_count(), 1);
        assert!(has_more_child_data(&ctx, "hop").unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch_and_missing_edge() {
        let (services, sink) = setup().await;
        let ctx = context(
            QueryNode::OutFromEdge(FromEdgeQuery {
                node_type: Some("Person".into()),
                ..Default::default()
            }),
            Some(Edge::new("a", "LivesIn", "b")),
        );
        let ctx = execute(&ctx, "hop", &services, |e| e.out_id.clone()).await.unwrap();
        let result = ctx.get_result::<NodeResult>("hop").unwrap();
        assert!(result.item.is_none());
        assert!(!result.state.needs_more_data);
        assert_eq!(sink.dangling_count(), 0);

        let ctx = context(QueryNode::OutFromEdge(FromEdgeQuery::default()), None);
        let ctx = execute(&ctx, "hop", &services, |e| e.out_id.clone()).await.unwrap();
        assert!(ctx.get_result::<NodeResult>("hop").unwrap().item.is_none());
    }

    #[tokio::test]
    async fn test_hop_without_child() {
        let (services, _) = setup().await;
        let tree = QueryTree::new()
            .add_node("hop", QueryNode::InFromEdge(FromEdgeQuery::default()))
            .unwrap();
        match execute(&ExecutionContext::new(tree), "hop", &services, |e| e.in_id.clone()).await {
            Err(GraphError::Operation(msg)) => assert_eq!(msg, "parent has no children"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
