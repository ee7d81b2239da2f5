//! Round-based evaluation of a whole query tree.

use std::sync::Arc;
use std::time::Instant;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use graphrelay_common::config::{AppConfig, EvaluatorConfig};

use crate::backend::GraphBackend;
use crate::cancel::CancellationToken;
use crate::context::{ExecutionContext, QueryResult};
use crate::diagnostics::{DiagnosticEvent, EventSink, TracingEventSink};
use crate::error::{GraphError, Result};
use crate::executor::{self, ExecutionServices};
use crate::query::QueryTree;
use crate::schema::{SchemaCache, SchemaSource};

type Deltas = Vec<(String, Arc<QueryResult>)>;

/// Evaluates query trees against a backend.
///
/// Every round re-runs the nodes whose output may change: the root while it
/// still needs data, and below an advancing node each child that needs data
/// itself or whose items were all consumed. Sibling subtrees run
/// concurrently.
pub struct QueryEvaluator {
    backend: Arc<dyn GraphBackend>,
    schemas: SchemaCache,
    sink: Arc<dyn EventSink>,
    config: EvaluatorConfig,
}

impl QueryEvaluator {
    pub fn new(backend: Arc<dyn GraphBackend>, schema_source: Arc<dyn SchemaSource>, config: &AppConfig) -> Self {
        Self {
            backend,
            schemas: SchemaCache::new(schema_source, &config.schema_cache),
            sink: Arc::new(TracingEventSink),
            config: config.evaluator.clone(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn schemas(&self) -> &SchemaCache {
        &self.schemas
    }

    /// Runs rounds until the root no longer needs data or the round limit is hit.
    pub async fn evaluate(&self, tree: &QueryTree, cancel: &CancellationToken) -> Result<ExecutionContext> {
        let schema = self.schemas.get(&self.config.table_name).await?;
        let tree = tree.seed_cursors()?;
        let root = tree.root()?.to_string();
        let services = ExecutionServices::new(self.backend.clone(), schema)
            .with_sink(self.sink.clone())
            .with_cancel(cancel.clone())
            .with_config(self.config.clone());

        let max_rounds = self.config.max_rounds.max(1);
        let started = Instant::now();
        let mut ctx = ExecutionContext::new(tree);
        let mut round: u32 = 0;
        loop {
            cancel.check()?;
            round += 1;
            let deltas = evaluate_subtree(&services, &ctx, &root, round == 1).await?;
            tracing::debug!("Round {} of '{}' updated {} nodes", round, root, deltas.len());
            ctx = ctx.with_results(deltas);

            let needs_more = ctx.state(&root).map_or(false, |s| s.needs_more_data);
            if !needs_more {
                tracing::info!(
                    "Evaluated '{}' in {} rounds ({:?}), {} items",
                    root,
                    round,
                    started.elapsed(),
                    ctx.result(&root).map_or(0, |r| r.len())
                );
                return Ok(ctx);
            }
            if round >= max_rounds {
                self.sink.emit(DiagnosticEvent::RoundLimitReached {
                    root_key: root.clone(),
                    rounds: round,
                });
                return Ok(ctx);
            }
        }
    }

    /// Like [`evaluate`](Self::evaluate) but returns only the root result.
    pub async fn evaluate_root(&self, tree: &QueryTree, cancel: &CancellationToken) -> Result<Arc<QueryResult>> {
        let ctx = self.evaluate(tree, cancel).await?;
        let root = ctx.tree().root()?;
        ctx.result(root)
            .cloned()
            .ok_or_else(|| GraphError::operation("missing result"))
    }
}

/// Evaluates the advancing part of the subtree under `key`, returning the new results.
fn evaluate_subtree<'a>(
    services: &'a ExecutionServices,
    ctx: &'a ExecutionContext,
    key: &'a str,
    initial: bool,
) -> BoxFuture<'a, Result<Deltas>> {
    async move {
        let mut advancing = Vec::new();
        for child in ctx.tree().children(key) {
            let advance = initial
                || ctx.state(child).map_or(true, |s| s.needs_more_data)
                || executor::child_exhausted(ctx, key, child)?;
            if advance {
                advancing.push(child.as_str());
            }
        }

        let nested = try_join_all(
            advancing
                .into_iter()
                .map(|child| evaluate_subtree(services, ctx, child, initial)),
        )
        .await?;
        let mut deltas: Deltas = nested.into_iter().flatten().collect();

        let local = if deltas.is_empty() {
            ctx.clone()
        } else {
            ctx.with_results(deltas.clone())
        };
        let updated = executor::execute(&local, key, services).await?;
        let own = updated
            .result(key)
            .cloned()
            .ok_or_else(|| GraphError::operation("missing result"))?;
        deltas.push((key.to_string(), own));
        Ok(deltas)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::context::{EdgeConnectionResult, NodeConnectionResult, NodeResult};
    use crate::diagnostics::RecordingEventSink;
    use crate::query::filter::{Filter, IntFilter, ValueFilter};
    use crate::query::{
        FromEdgeConnectionQuery, FromEdgeQuery, NodeConnectionQuery, QueryNode, SingleEdgeQuery,
        ToEdgeConnectionQuery, WhereQuery, ZipQuery,
    };
    use crate::schema::GraphSchema;
    use graphrelay_common::{ConnectionArguments, Edge, Node};

    fn schema() -> GraphSchema {
        GraphSchema::new()
            .with_node_type("Person", ["name"])
            .with_node_type("City", ["name"])
            .with_edge_type("Knows", ["since"])
    }

    async fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new(schema()));
        for i in 1..=8 {
            backend
                .insert_node(Node::new(format!("p{}", i), "Person").with_property("age", i * 10))
                .await;
        }
        for i in 1..=3 {
            backend.insert_node(Node::new(format!("c{}", i), "City")).await;
        }
        backend.insert_edge(Edge::new("p1", "Knows", "p2")).await;
        backend.insert_edge(Edge::new("p1", "Knows", "p3")).await;
        backend.insert_edge(Edge::new("p2", "Knows", "p4")).await;
        backend.insert_edge(Edge::new("p3", "Knows", "p5")).await;
        backend
    }

    fn evaluator(backend: Arc<MemoryBackend>) -> QueryEvaluator {
        QueryEvaluator::new(backend.clone(), backend, &AppConfig::default())
    }

    fn people(args: ConnectionArguments) -> QueryNode {
        QueryNode::NodeConnection(NodeConnectionQuery::new("Person", args))
    }

    fn node_ids(result: &QueryResult) -> Vec<String> {
        match result {
            QueryResult::NodeConnection(r) => r.connection.items().map(|n| n.id.clone()).collect(),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_filtered_page_completes_over_rounds() {
        let mut query = NodeConnectionQuery::new("Person", ConnectionArguments::first(3));
        query.page_size = Some(2);
        query.filter = Some(Filter::new().with(
            "age",
            ValueFilter::Int(IntFilter {
                gt: Some(30),
                ..Default::default()
            }),
        ));
        let tree = QueryTree::new()
            .add_node("people", QueryNode::NodeConnection(query))
            .unwrap();

        let result = evaluator(backend().await)
            .evaluate_root(&tree, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(node_ids(&result), vec!["p4", "p5", "p6"]);
        assert!(result.state().has_more_data);
        assert!(!result.state().needs_more_data);
    }

    #[tokio::test]
    async fn test_where_refills_from_child_and_resumes_in_new_evaluator() {
        let backend = backend().await;
        let build = |after: Option<String>| {
            let mut args = ConnectionArguments::first(2);
            if let Some(after) = after {
                args = args.with_after(after);
            }
            QueryTree::new()
                .add_node("people", people(ConnectionArguments::first(2)))
                .unwrap()
                .add_parent_node(
                    "people",
                    "even",
                    QueryNode::WhereNodeConnection(WhereQuery::new(
                        |n: Node| async move {
                            let number = n.id.trim_start_matches('p').parse::<u32>();
                            anyhow::Ok(number.map_or(false, |i| i % 2 == 0))
                        },
                        args,
                    )),
                )
                .unwrap()
        };

        let first = evaluator(backend.clone())
            .evaluate_root(&build(None), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(node_ids(&first), vec!["p2", "p4"]);
        let QueryResult::NodeConnection(page) = first.as_ref() else {
            panic!("unexpected result");
        };
        assert!(page.connection.page_info.has_next_page);

        let end = page.connection.end_cursor().map(str::to_string);
        let second = evaluator(backend)
            .evaluate_root(&build(end), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(node_ids(&second), vec!["p6", "p8"]);
    }

    #[tokio::test]
    async fn test_edges_then_nodes_with_resume() {
        let backend = backend().await;
        let build = |after: Option<String>| {
            let mut args = ConnectionArguments::first(2);
            if let Some(after) = after {
                args = args.with_after(after);
            }
            QueryTree::new()
                .add_node("people", people(ConnectionArguments::first(3)))
                .unwrap()
                .add_parent_node(
                    "people",
                    "knows",
                    QueryNode::InToEdgeConnection(ToEdgeConnectionQuery::new("Knows", args)),
                )
                .unwrap()
        };

        let ctx = evaluator(backend.clone())
            .evaluate(&build(None), &CancellationToken::new())
            .await
            .unwrap();
        let page = ctx.get_result::<EdgeConnectionResult>("knows").unwrap();
        let keys: Vec<_> = page.connection.items().map(|e| e.out_id.clone()).collect();
        assert_eq!(keys, vec!["p2", "p3"]);
        assert!(page.connection.page_info.has_next_page);

        let end = page.connection.end_cursor().map(str::to_string);
        let ctx = evaluator(backend)
            .evaluate(&build(end), &CancellationToken::new())
            .await
            .unwrap();
        let page = ctx.get_result::<EdgeConnectionResult>("knows").unwrap();
        let keys: Vec<_> = page.connection.items().map(|e| e.out_id.clone()).collect();
        assert_eq!(keys, vec!["p4", "p5"]);
    }

    #[tokio::test]
    async fn test_dangling_node_is_skipped_across_rounds() {
        let backend = backend().await;
        backend.insert_edge(Edge::new("p1", "Knows", "ghost")).await;
        let sink = Arc::new(RecordingEventSink::new());
        let tree = QueryTree::new()
            .add_node("people", people(ConnectionArguments::first(1)))
            .unwrap()
            .add_parent_node(
                "people",
                "knows",
                QueryNode::InToEdgeConnection(ToEdgeConnectionQuery::new("Knows", ConnectionArguments::first(3))),
            )
            .unwrap()
            .add_parent_node(
                "knows",
                "friends",
                QueryNode::OutFromEdgeConnection(FromEdgeConnectionQuery::new(ConnectionArguments::first(3))),
            )
            .unwrap();

        let ctx = evaluator(backend)
            .with_sink(sink.clone())
            .evaluate(&tree, &CancellationToken::new())
            .await
            .unwrap();
        let friends = ctx.get_result::<NodeConnectionResult>("friends").unwrap();
        let ids: Vec<_> = friends.connection.items().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec!["p2", "p3", "p4"]);
        assert_eq!(sink.dangling_count(), 1);
    }

    #[tokio::test]
    async fn test_hop_takes_next_edge_after_dangling() {
        let backend = backend().await;
        backend.insert_edge(Edge::new("p1", "Knows", "ghost")).await;
        let sink = Arc::new(RecordingEventSink::new());
        let tree = QueryTree::new()
            .add_node("people", people(ConnectionArguments::first(1)))
            .unwrap()
            .add_parent_node(
                "people",
                "knows",
                QueryNode::InToEdgeConnection(ToEdgeConnectionQuery::new("Knows", ConnectionArguments::first(3))),
            )
            .unwrap()
            .add_parent_node("knows", "first", QueryNode::FirstEdge(SingleEdgeQuery::default()))
            .unwrap()
            .add_parent_node("first", "friend", QueryNode::OutFromEdge(FromEdgeQuery::default()))
            .unwrap();

        let ctx = evaluator(backend)
            .with_sink(sink.clone())
            .evaluate(&tree, &CancellationToken::new())
            .await
            .unwrap();
        let friend = ctx.get_result::<NodeResult>("friend").unwrap();
        assert_eq!(friend.item.as_ref().unwrap().id, "p2");
        assert!(!friend.state.needs_more_data);
        assert_eq!(sink.dangling_count(), 1);
    }

    #[tokio::test]
    async fn test_zip_end_to_end() {
        let tree = QueryTree::new()
            .add_node(
                "zip",
                QueryNode::ZipNodeConnection(ZipQuery {
                    args: ConnectionArguments::first(4),
                    tag: None,
                }),
            )
            .unwrap()
            .add_child_node("zip", "people", people(ConnectionArguments::first(4)))
            .unwrap()
            .add_child_node(
                "zip",
                "cities",
                QueryNode::NodeConnection(NodeConnectionQuery::new("City", ConnectionArguments::first(4))),
            )
            .unwrap();

        let result = evaluator(backend().await)
            .evaluate_root(&tree, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(node_ids(&result), vec!["p1", "p2", "c1", "c2"]);
    }

    #[tokio::test]
    async fn test_end_of_data_cursor_makes_no_backend_calls() {
        let backend = backend().await;
        let eod = crate::cursor::CursorNode::end_of_data().serialize().unwrap();
        let tree = QueryTree::new()
            .add_node("people", people(ConnectionArguments::first(2).with_after(eod)))
            .unwrap();
        let result = evaluator(backend.clone())
            .evaluate_root(&tree, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_round() {
        let tree = QueryTree::new()
            .add_node("people", people(ConnectionArguments::first(2)))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            evaluator(backend().await).evaluate(&tree, &cancel).await,
            Err(GraphError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_round_limit_returns_partial_page() {
        let backend = backend().await;
        let sink = Arc::new(RecordingEventSink::new());
        let mut config = AppConfig::default();
        config.evaluator.max_rounds = 2;
        let mut query = NodeConnectionQuery::new("Person", ConnectionArguments::first(3));
        query.page_size = Some(1);
        query.filter = Some(Filter::new().with(
            "age",
            ValueFilter::Int(IntFilter {
                ge: Some(70),
                ..Default::default()
            }),
        ));
        let tree = QueryTree::new()
            .add_node("people", QueryNode::NodeConnection(query))
            .unwrap();

        let result = QueryEvaluator::new(backend.clone(), backend, &config)
            .with_sink(sink.clone())
            .evaluate_root(&tree, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
        assert!(result.state().needs_more_data);
        assert_eq!(
            sink.events(),
            vec![DiagnosticEvent::RoundLimitReached {
                root_key: "people".into(),
                rounds: 2,
            }]
        );
    }
}
