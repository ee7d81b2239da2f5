//! Query nodes: the closed set of traversal steps a query tree is built from.

pub mod filter;
pub mod tree;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use graphrelay_common::{ConnectionArguments, Edge, EdgeKey, Node};

pub use filter::{Filter, Filterable, Order, SortDirection, ValueFilter};
pub use tree::QueryTree;

/// Lookup of one edge by key.
#[derive(Debug, Clone)]
pub struct EdgeByIdQuery {
    pub key: EdgeKey,
    pub consistent_read: bool,
    pub tag: Option<String>,
}

/// `First*` / `Single*` over a child edge connection.
#[derive(Debug, Clone, Default)]
pub struct SingleEdgeQuery {
    pub tag: Option<String>,
}

/// Hop from a single child edge to one of its endpoint nodes.
#[derive(Debug, Clone, Default)]
pub struct FromEdgeQuery {
    /// When set, a resolved node of another type yields no result.
    pub node_type: Option<String>,
    pub consistent_read: bool,
    pub tag: Option<String>,
}

/// Range scan over all nodes of one type.
#[derive(Debug, Clone)]
pub struct NodeConnectionQuery {
    pub type_name: String,
    pub filter: Option<Filter>,
    pub order: Option<Order>,
    pub args: ConnectionArguments,
    /// Count requested from the backend before post-filtering trims the page.
    pub page_size: Option<usize>,
    pub consistent_read: bool,
    pub tag: Option<String>,
}

/// Edges attached to each node of the child result.
#[derive(Debug, Clone, Default)]
pub struct ToEdgeConnectionQuery {
    /// `None` for the `*ToAll*` variants.
    pub edge_type: Option<String>,
    pub filter: Option<Filter>,
    pub order: Option<Order>,
    pub args: ConnectionArguments,
    pub page_size: Option<usize>,
    pub consistent_read: bool,
    pub tag: Option<String>,
}

/// Endpoint nodes of each edge of the child connection.
#[derive(Debug, Clone, Default)]
pub struct FromEdgeConnectionQuery {
    pub node_type: Option<String>,
    pub filter: Option<Filter>,
    pub args: ConnectionArguments,
    pub page_size: Option<usize>,
    pub consistent_read: bool,
    pub tag: Option<String>,
}

/// Async predicate applied to every child item.
pub type Predicate<T> = Arc<dyn Fn(&T) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

#[derive(Clone)]
pub struct WhereQuery<T> {
    pub predicate: Predicate<T>,
    pub args: ConnectionArguments,
    pub tag: Option<String>,
}

impl<T> fmt::Debug for WhereQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhereQuery")
            .field("args", &self.args)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> WhereQuery<T> {
    /// Wraps an async closure that takes each item by value.
    pub fn new<F, Fut>(predicate: F, args: ConnectionArguments) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self {
            predicate: Arc::new(move |item: &T| predicate(item.clone()).boxed()),
            args,
            tag: None,
        }
    }
}

/// Union of exactly two child node connections.
#[derive(Debug, Clone, Default)]
pub struct ZipQuery {
    pub args: ConnectionArguments,
    pub tag: Option<String>,
}

#[derive(Debug, Clone)]
pub enum QueryNode {
    EdgeById(EdgeByIdQuery),
    FirstEdge(SingleEdgeQuery),
    FirstOrDefaultEdge(SingleEdgeQuery),
    SingleEdge(SingleEdgeQuery),
    SingleOrDefaultEdge(SingleEdgeQuery),
    InFromEdge(FromEdgeQuery),
    OutFromEdge(FromEdgeQuery),
    NodeConnection(NodeConnectionQuery),
    InToEdgeConnection(ToEdgeConnectionQuery),
    OutToEdgeConnection(ToEdgeConnectionQuery),
    InAndOutToEdgeConnection(ToEdgeConnectionQuery),
    InToAllEdgeConnection(ToEdgeConnectionQuery),
    OutToAllEdgeConnection(ToEdgeConnectionQuery),
    InFromEdgeConnection(FromEdgeConnectionQuery),
    OutFromEdgeConnection(FromEdgeConnectionQuery),
    InAndOutFromEdgeConnection(FromEdgeConnectionQuery),
    WhereNodeConnection(WhereQuery<Node>),
    WhereEdgeConnection(WhereQuery<Edge>),
    ZipNodeConnection(ZipQuery),
}

impl QueryNode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EdgeById(_) => "EdgeById",
            Self::FirstEdge(_) => "FirstEdge",
            Self::FirstOrDefaultEdge(_) => "FirstOrDefaultEdge",
            Self::SingleEdge(_) => "SingleEdge",
            Self::SingleOrDefaultEdge(_) => "SingleOrDefaultEdge",
            Self::InFromEdge(_) => "InFromEdge",
            Self::OutFromEdge(_) => "OutFromEdge",
            Self::NodeConnection(_) => "NodeConnection",
            Self::InToEdgeConnection(_) => "InToEdgeConnection",
            Self::OutToEdgeConnection(_) => "OutToEdgeConnection",
            Self::InAndOutToEdgeConnection(_) => "InAndOutToEdgeConnection",
            Self::InToAllEdgeConnection(_) => "InToAllEdgeConnection",
            Self::OutToAllEdgeConnection(_) => "OutToAllEdgeConnection",
            Self::InFromEdgeConnection(_) => "InFromEdgeConnection",
            Self::OutFromEdgeConnection(_) => "OutFromEdgeConnection",
            Self::InAndOutFromEdgeConnection(_) => "InAndOutFromEdgeConnection",
            Self::WhereNodeConnection(_) => "WhereNodeConnection",
            Self::WhereEdgeConnection(_) => "WhereEdgeConnection",
            Self::ZipNodeConnection(_) => "ZipNodeConnection",
        }
    }

    pub fn tag(&self) -> Option<&str> {
        let tag = match self {
            Self::EdgeById(q) => &q.tag,
            Self::FirstEdge(q)
            | Self::FirstOrDefaultEdge(q)
            | Self::SingleEdge(q)
            | Self::SingleOrDefaultEdge(q) => &q.tag,
            Self::InFromEdge(q) | Self::OutFromEdge(q) => &q.tag,
            Self::NodeConnection(q) => &q.tag,
            Self::InToEdgeConnection(q)
            | Self::OutToEdgeConnection(q)
            | Self::InAndOutToEdgeConnection(q)
            | Self::InToAllEdgeConnection(q)
            | Self::OutToAllEdgeConnection(q) => &q.tag,
            Self::InFromEdgeConnection(q)
            | Self::OutFromEdgeConnection(q)
            | Self::InAndOutFromEdgeConnection(q) => &q.tag,
            Self::WhereNodeConnection(q) => &q.tag,
            Self::WhereEdgeConnection(q) => &q.tag,
            Self::ZipNodeConnection(q) => &q.tag,
        };
        tag.as_deref()
    }

    /// Paging arguments of connection-shaped queries.
    pub fn args(&self) -> Option<&ConnectionArguments> {
        match self {
            Self::NodeConnection(q) => Some(&q.args),
            Self::InToEdgeConnection(q)
            | Self::OutToEdgeConnection(q)
            | Self::InAndOutToEdgeConnection(q)
            | Self::InToAllEdgeConnection(q)
            | Self::OutToAllEdgeConnection(q) => Some(&q.args),
            Self::InFromEdgeConnection(q)
            | Self::OutFromEdgeConnection(q)
            | Self::InAndOutFromEdgeConnection(q) => Some(&q.args),
            Self::WhereNodeConnection(q) => Some(&q.args),
            Self::WhereEdgeConnection(q) => Some(&q.args),
            Self::ZipNodeConnection(q) => Some(&q.args),
            _ => None,
        }
    }

    fn args_mut(&mut self) -> Option<&mut ConnectionArguments> {
        match self {
            Self::NodeConnection(q) => Some(&mut q.args),
            Self::InToEdgeConnection(q)
            | Self::OutToEdgeConnection(q)
            | Self::InAndOutToEdgeConnection(q)
            | Self::InToAllEdgeConnection(q)
            | Self::OutToAllEdgeConnection(q) => Some(&mut q.args),
            Self::InFromEdgeConnection(q)
            | Self::OutFromEdgeConnection(q)
            | Self::InAndOutFromEdgeConnection(q) => Some(&mut q.args),
            Self::WhereNodeConnection(q) => Some(&mut q.args),
            Self::WhereEdgeConnection(q) => Some(&mut q.args),
            Self::ZipNodeConnection(q) => Some(&mut q.args),
            _ => None,
        }
    }

    /// Copy of this node with its paging arguments replaced; argument-less nodes are returned as is.
    pub fn with_args(&self, args: ConnectionArguments) -> Self {
        let mut node = self.clone();
        if let Some(slot) = node.args_mut() {
            *slot = args;
        }
        node
    }

    /// Whether the node folds its children's items into its own sequence.
    pub fn is_connection(&self) -> bool {
        self.args().is_some()
    }
}

impl ToEdgeConnectionQuery {
    pub fn new(edge_type: impl Into<String>, args: ConnectionArguments) -> Self {
        Self {
            edge_type: Some(edge_type.into()),
            args,
            ..Default::default()
        }
    }

    /// Query for the `*ToAll*` variants: every edge type, no pushdown.
    pub fn all(args: ConnectionArguments) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }
}

impl NodeConnectionQuery {
    pub fn new(type_name: impl Into<String>, args: ConnectionArguments) -> Self {
        Self {
            type_name: type_name.into(),
            filter: None,
            order: None,
            args,
            page_size: None,
            consistent_read: false,
            tag: None,
        }
    }
}

impl FromEdgeConnectionQuery {
    pub fn new(args: ConnectionArguments) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_args_only_touches_connections() {
        let conn = QueryNode::NodeConnection(NodeConnectionQuery::new(
            "Person",
            ConnectionArguments::first(5),
        ));
        let moved = conn.with_args(ConnectionArguments::first(5).with_after("abc"));
        assert_eq!(moved.args().and_then(|a| a.after_cursor()), Some("abc"));
        assert_eq!(conn.args().and_then(|a| a.after_cursor()), None);

        let single = QueryNode::FirstEdge(SingleEdgeQuery::default());
        assert!(single.with_args(ConnectionArguments::first(1)).args().is_none());
        assert!(!single.is_connection());
    }

    #[tokio::test]
    async fn test_where_query_wraps_async_closure() {
        let query = WhereQuery::new(
            |node: Node| async move { Ok(node.id.starts_with('p')) },
            ConnectionArguments::first(3),
        );
        let keep = (query.predicate)(&Node::new("p1", "Person")).await.unwrap();
        let drop = (query.predicate)(&Node::new("x1", "Person")).await.unwrap();
        assert!(keep);
        assert!(!drop);
        assert!(format!("{:?}", query).contains("WhereQuery"));
    }

    #[test]
    fn test_tags_and_names() {
        let node = QueryNode::InToAllEdgeConnection(ToEdgeConnectionQuery {
            tag: Some("friends".into()),
            ..ToEdgeConnectionQuery::all(ConnectionArguments::first(2))
        });
        assert_eq!(node.name(), "InToAllEdgeConnection");
        assert_eq!(node.tag(), Some("friends"));
    }
}
