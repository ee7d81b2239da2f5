//! Contract of the range-indexed store the evaluator runs against.

pub mod memory;

use async_trait::async_trait;
use graphrelay_common::{Connection, Edge, EdgeKey, Node, PageDirection, RelayEdge};

use crate::error::Result;
use crate::pushdown::{PushdownFilter, PushdownOrder};

pub use memory::MemoryBackend;

/// Range scan over the nodes of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConnectionRequest {
    pub type_name: String,
    /// Position to continue from: items after it going forward, before it going backward.
    pub cursor: Option<String>,
    pub count: usize,
    pub direction: PageDirection,
    pub filter: Option<PushdownFilter>,
    pub order: Option<PushdownOrder>,
    pub consistent_read: bool,
}

/// Range query over the edges attached to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToEdgeConnectionRequest {
    pub node_id: String,
    /// `None` selects every edge type.
    pub edge_type: Option<String>,
    pub after: Option<String>,
    pub count: usize,
    pub filter: Option<PushdownFilter>,
    pub order: Option<PushdownOrder>,
    pub consistent_read: bool,
}

/// Node and edge upserts. The `version` carried by each item is the version
/// it must currently have in the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutRequest {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl PutRequest {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// The store, as seen by the evaluator. Implementations must be safe to call concurrently.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// One slot per id, in input order; `None` for ids that do not resolve.
    async fn try_get_nodes(&self, ids: &[String], consistent_read: bool) -> Result<Vec<Option<RelayEdge<Node>>>>;

    /// One slot per key, in input order; `None` for keys that do not resolve.
    async fn try_get_edges(&self, keys: &[EdgeKey], consistent_read: bool) -> Result<Vec<Option<RelayEdge<Edge>>>>;

    /// Edges whose `in_id` is the requested node.
    async fn get_in_to_edge_connection(&self, request: ToEdgeConnectionRequest) -> Result<Connection<EdgeKey>>;

    /// Edges whose `out_id` is the requested node.
    async fn get_out_to_edge_connection(&self, request: ToEdgeConnectionRequest) -> Result<Connection<EdgeKey>>;

    /// The in-edges of the node followed by its out-edges.
    async fn get_in_and_out_to_edge_connection(
        &self,
        request: ToEdgeConnectionRequest,
    ) -> Result<Connection<EdgeKey>>;

    async fn get_node_connection_by_type(&self, request: NodeConnectionRequest) -> Result<Connection<Node>>;

    async fn put(&self, request: PutRequest) -> Result<()>;
}
