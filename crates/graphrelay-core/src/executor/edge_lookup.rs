use super::paging::ExecutionMode;
use super::{unexpected_query_type, ExecutionServices};
use crate::context::{EdgeResult, ExecutionContext, ResultState};
use crate::error::Result;
use crate::query::QueryNode;

/// Resolves one edge by key. A missing edge yields an empty result.
pub async fn execute(ctx: &ExecutionContext, key: &str, services: &ExecutionServices) -> Result<ExecutionContext> {
    let node = ctx.tree().node(key)?.clone();
    let QueryNode::EdgeById(query) = node.as_ref() else {
        return Err(unexpected_query_type());
    };

    let prior = ctx.try_get_result::<EdgeResult>(key);
    if ExecutionMode::of(prior.map(|p| &p.state)) != ExecutionMode::Initial {
        // A lookup has exactly one answer; asking again yields nothing new.
        return Ok(ctx.set_result(key, EdgeResult::empty()));
    }

    services.cancel.check()?;
    let found = services
        .backend
        .try_get_edges(std::slice::from_ref(&query.key), query.consistent_read)
        .await?
        .into_iter()
        .next()
        .flatten();

    let result = match found {
        Some(relay) => EdgeResult {
            item: Some(relay.node),
            state: ResultState {
                cursor: Some(relay.cursor),
                ..Default::default()
            },
        },
        None => {
            tracing::debug!(
                "Edge {}-[{}]->{} not found for '{}'",
                query.key.in_id,
                query.key.type_name,
                query.key.out_id,
                key
            );
            EdgeResult::empty()
        }
    };
    Ok(ctx.set_result(key, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::query::{EdgeByIdQuery, QueryTree};
    use crate::schema::GraphSchema;
    use graphrelay_common::{Edge, EdgeKey};
    use std::sync::Arc;

    fn context(key: EdgeKey) -> ExecutionContext {
        let tree = QueryTree::new()
            .add_node(
                "edge",
                QueryNode::EdgeById(EdgeByIdQuery {
                    key,
                    consistent_read: true,
                    tag: None,
                }),
            )
            .unwrap();
        ExecutionContext::new(tree)
    }

    #[tokio::test]
    async fn test_lookup_found_and_missing() {
        let backend = Arc::new(MemoryBackend::default());
        backend.insert_edge(Edge::new("a", "Knows", "b")).await;
        let services = ExecutionServices::new(backend, Arc::new(GraphSchema::new()));

        let ctx = execute(&context(EdgeKey::new("a", "Knows", "b")), "edge", &services)
            .await
            .unwrap();
        let result = ctx.get_result::<EdgeResult>("edge").unwrap();
        assert_eq!(result.item.as_ref().unwrap().out_id, "b");
        assert!(result.state.cursor.is_some());

        // a second run hands out nothing further
        let ctx = execute(&ctx, "edge", &services).await.unwrap();
        assert!(ctx.get_result::<EdgeResult>("edge").unwrap().item.is_none());

        let ctx = execute(&context(EdgeKey::new("a", "Knows", "zz")), "edge", &services)
            .await
            .unwrap();
        assert!(ctx.get_result::<EdgeResult>("edge").unwrap().item.is_none());
    }
}
