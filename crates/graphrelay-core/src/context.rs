//! Execution context: the query tree plus every result computed so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use graphrelay_common::{Connection, Edge, Node};

use crate::error::{GraphError, Result};
use crate::query::QueryTree;

/// How far a node has consumed its upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildCursor {
    /// Cursor of the last child item consumed, per child key.
    pub positions: BTreeMap<String, String>,
    /// Backend position reached by leaf scans, or the edge position inside a partially consumed upstream item.
    pub backend: Option<String>,
    /// Targets already taken from the first unconsumed child item.
    pub offset: u32,
}

impl ChildCursor {
    pub fn position(&self, child_key: &str) -> Option<&str> {
        self.positions.get(child_key).map(String::as_str)
    }
}

/// Paging bookkeeping shared by every result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultState {
    pub child_cursor: Option<ChildCursor>,
    /// Cursor of a single-item result.
    pub cursor: Option<String>,
    /// The page is not satisfied yet; run this node again.
    pub needs_more_data: bool,
    /// Data exists beyond what has been returned.
    pub has_more_data: bool,
}

impl ResultState {
    /// Whether re-running the node could still produce items.
    pub fn can_supply(&self) -> bool {
        self.has_more_data || self.needs_more_data
    }

    pub fn exhausted() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult<T> {
    pub item: Option<T>,
    pub state: ResultState,
}

impl<T> ItemResult<T> {
    pub fn empty() -> Self {
        Self {
            item: None,
            state: ResultState::exhausted(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionResult<T> {
    pub connection: Connection<T>,
    pub state: ResultState,
}

impl<T> ConnectionResult<T> {
    pub fn empty() -> Self {
        Self {
            connection: Connection::empty(),
            state: ResultState::exhausted(),
        }
    }
}

pub type NodeResult = ItemResult<Node>;
pub type EdgeResult = ItemResult<Edge>;
pub type NodeConnectionResult = ConnectionResult<Node>;
pub type EdgeConnectionResult = ConnectionResult<Edge>;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Node(NodeResult),
    Edge(EdgeResult),
    NodeConnection(NodeConnectionResult),
    EdgeConnection(EdgeConnectionResult),
}

impl QueryResult {
    pub fn state(&self) -> &ResultState {
        match self {
            Self::Node(r) => &r.state,
            Self::Edge(r) => &r.state,
            Self::NodeConnection(r) => &r.state,
            Self::EdgeConnection(r) => &r.state,
        }
    }

    /// Number of items held.
    pub fn len(&self) -> usize {
        match self {
            Self::Node(r) => usize::from(r.item.is_some()),
            Self::Edge(r) => usize::from(r.item.is_some()),
            Self::NodeConnection(r) => r.connection.len(),
            Self::EdgeConnection(r) => r.connection.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Typed access to one [`QueryResult`] variant.
pub trait ResultKind: Sized {
    fn from_result(result: &QueryResult) -> Option<&Self>;
    fn into_result(self) -> QueryResult;
}

macro_rules! result_kind {
    ($ty:ty, $variant:ident) => {
        impl ResultKind for $ty {
            fn from_result(result: &QueryResult) -> Option<&Self> {
                match result {
                    QueryResult::$variant(r) => Some(r),
                    _ => None,
                }
            }

            fn into_result(self) -> QueryResult {
                QueryResult::$variant(self)
            }
        }
    };
}

result_kind!(NodeResult, Node);
result_kind!(EdgeResult, Edge);
result_kind!(NodeConnectionResult, NodeConnection);
result_kind!(EdgeConnectionResult, EdgeConnection);

/// Immutable snapshot of one evaluation: the tree and the results per key.
///
/// `set_result` returns a new context; results are shared between snapshots.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    tree: QueryTree,
    results: Arc<BTreeMap<String, Arc<QueryResult>>>,
}

impl ExecutionContext {
    pub fn new(tree: QueryTree) -> Self {
        Self {
            tree,
            results: Arc::new(BTreeMap::new()),
        }
    }

    pub fn tree(&self) -> &QueryTree {
        &self.tree
    }

    pub fn set_result(&self, key: impl Into<String>, result: impl ResultKind) -> ExecutionContext {
        self.with_results([(key.into(), Arc::new(result.into_result()))])
    }

    /// Applies several result updates at once.
    pub fn with_results(
        &self,
        updates: impl IntoIterator<Item = (String, Arc<QueryResult>)>,
    ) -> ExecutionContext {
        let mut results = (*self.results).clone();
        results.extend(updates);
        Self {
            tree: self.tree.clone(),
            results: Arc::new(results),
        }
    }

    pub fn result(&self, key: &str) -> Option<&Arc<QueryResult>> {
        self.results.get(key)
    }

    pub fn get_result<T: ResultKind>(&self, key: &str) -> Result<&T> {
        let result = self
            .results
            .get(key)
            .ok_or_else(|| GraphError::operation("missing result"))?;
        T::from_result(result).ok_or_else(|| GraphError::operation("unexpected result type"))
    }

    /// Like [`get_result`](Self::get_result) but `None` when absent or of another type.
    pub fn try_get_result<T: ResultKind>(&self, key: &str) -> Option<&T> {
        self.results.get(key).and_then(|r| T::from_result(r))
    }

    pub fn state(&self, key: &str) -> Option<&ResultState> {
        self.results.get(key).map(|r| r.state())
    }
}
