//! Node executors, one per query-node variant.
//!
//! Every executor reads the results of its declared children (and its own
//! prior result) from the context and returns a new context in which only its
//! own key changed.

pub mod edge_lookup;
pub mod from_edge;
pub mod hop;
pub mod node_connection;
pub mod paging;
pub mod single;
pub mod to_edge;
pub mod where_;
pub mod zip;

use std::sync::Arc;

use graphrelay_common::config::EvaluatorConfig;
use graphrelay_common::Edge;

use crate::backend::GraphBackend;
use crate::cancel::CancellationToken;
use crate::context::ExecutionContext;
use crate::diagnostics::{EventSink, TracingEventSink};
use crate::error::{GraphError, Result};
use crate::query::QueryNode;
use crate::schema::GraphSchema;

pub use paging::ExecutionMode;

/// Collaborators handed to every executor for one evaluation.
#[derive(Clone)]
pub struct ExecutionServices {
    pub backend: Arc<dyn GraphBackend>,
    pub schema: Arc<GraphSchema>,
    pub sink: Arc<dyn EventSink>,
    pub cancel: CancellationToken,
    pub config: EvaluatorConfig,
}

impl ExecutionServices {
    pub fn new(backend: Arc<dyn GraphBackend>, schema: Arc<GraphSchema>) -> Self {
        Self {
            backend,
            schema,
            sink: Arc::new(TracingEventSink),
            cancel: CancellationToken::new(),
            config: EvaluatorConfig::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }
}

pub(crate) fn unexpected_query_type() -> GraphError {
    GraphError::operation("unexpected query type")
}

fn in_id(edge: &Edge) -> Vec<String> {
    vec![edge.in_id.clone()]
}

fn out_id(edge: &Edge) -> Vec<String> {
    vec![edge.out_id.clone()]
}

fn in_and_out_ids(edge: &Edge) -> Vec<String> {
    vec![edge.in_id.clone(), edge.out_id.clone()]
}

/// Runs the executor matching the variant stored under `key`.
pub async fn execute(ctx: &ExecutionContext, key: &str, services: &ExecutionServices) -> Result<ExecutionContext> {
    services.cancel.check()?;
    let node = ctx.tree().node(key)?.clone();
    tracing::debug!("Executing {} '{}'", node.name(), key);

    match node.as_ref() {
        QueryNode::EdgeById(_) => edge_lookup::execute(ctx, key, services).await,
        QueryNode::FirstEdge(_)
        | QueryNode::FirstOrDefaultEdge(_)
        | QueryNode::SingleEdge(_)
        | QueryNode::SingleOrDefaultEdge(_) => single::execute(ctx, key, services).await,
        QueryNode::InFromEdge(_) => hop::execute(ctx, key, services, |e| e.in_id.clone()).await,
        QueryNode::OutFromEdge(_) => hop::execute(ctx, key, services, |e| e.out_id.clone()).await,
        QueryNode::NodeConnection(_) => node_connection::execute(ctx, key, services).await,
        QueryNode::InToEdgeConnection(_) | QueryNode::InToAllEdgeConnection(_) => {
            to_edge::execute(ctx, key, services, to_edge::IN_SELECTORS).await
        }
        QueryNode::OutToEdgeConnection(_) | QueryNode::OutToAllEdgeConnection(_) => {
            to_edge::execute(ctx, key, services, to_edge::OUT_SELECTORS).await
        }
        QueryNode::InAndOutToEdgeConnection(_) => {
            to_edge::execute(ctx, key, services, to_edge::IN_AND_OUT_SELECTORS).await
        }
        QueryNode::InFromEdgeConnection(_) => from_edge::execute(ctx, key, services, in_id).await,
        QueryNode::OutFromEdgeConnection(_) => from_edge::execute(ctx, key, services, out_id).await,
        QueryNode::InAndOutFromEdgeConnection(_) => {
            from_edge::execute(ctx, key, services, in_and_out_ids).await
        }
        QueryNode::WhereNodeConnection(query) => where_::execute(ctx, key, services, query).await,
        QueryNode::WhereEdgeConnection(query) => where_::execute(ctx, key, services, query).await,
        QueryNode::ZipNodeConnection(_) => zip::execute(ctx, key, services).await,
    }
}

/// Whether the node under `key` has consumed everything `child_key` currently offers.
///
/// The driver re-runs a child whose parent advances when this holds.
pub fn child_exhausted(ctx: &ExecutionContext, key: &str, child_key: &str) -> Result<bool> {
    let node = ctx.tree().node(key)?;
    let has_more = match node.as_ref() {
        QueryNode::EdgeById(_) | QueryNode::NodeConnection(_) => false,
        QueryNode::FirstEdge(_)
        | QueryNode::FirstOrDefaultEdge(_)
        | QueryNode::SingleEdge(_)
        | QueryNode::SingleOrDefaultEdge(_) => single::has_more_child_data(ctx, key)?,
        // The child offers one edge at a time.
        QueryNode::InFromEdge(_) | QueryNode::OutFromEdge(_) => !hop::consumed_child_edge(ctx, key)?,
        QueryNode::InToEdgeConnection(_)
        | QueryNode::OutToEdgeConnection(_)
        | QueryNode::InAndOutToEdgeConnection(_)
        | QueryNode::InToAllEdgeConnection(_)
        | QueryNode::OutToAllEdgeConnection(_) => to_edge::has_more_child_data(ctx, key)?,
        QueryNode::InFromEdgeConnection(_)
        | QueryNode::OutFromEdgeConnection(_)
        | QueryNode::InAndOutFromEdgeConnection(_) => from_edge::has_more_child_data(ctx, key)?,
        QueryNode::WhereNodeConnection(_) => where_::has_more_child_data::<graphrelay_common::Node>(ctx, key)?,
        QueryNode::WhereEdgeConnection(_) => where_::has_more_child_data::<Edge>(ctx, key)?,
        QueryNode::ZipNodeConnection(_) => zip::has_more_child_data(ctx, key, child_key)?,
    };
    Ok(!has_more)
}
