pub mod backend;
pub mod cancel;
pub mod context;
pub mod cursor;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod executor;
pub mod mutation;
pub mod pushdown;
pub mod query;
pub mod schema;

pub use backend::{GraphBackend, MemoryBackend, NodeConnectionRequest, PutRequest, ToEdgeConnectionRequest};
pub use cancel::CancellationToken;
pub use context::{
    ChildCursor, EdgeConnectionResult, EdgeResult, ExecutionContext, NodeConnectionResult, NodeResult, QueryResult,
    ResultState,
};
pub use cursor::CursorNode;
pub use diagnostics::{DiagnosticEvent, EventSink, RecordingEventSink, TracingEventSink};
pub use driver::QueryEvaluator;
pub use error::{BackendErrorKind, GraphError, Result};
pub use mutation::{MutationOrchestrator, RetryPolicy};
pub use query::{QueryNode, QueryTree};
pub use schema::{GraphSchema, SchemaCache, SchemaSource};

// Re-export common types for convenience
pub use graphrelay_common::{Connection, ConnectionArguments, Edge, EdgeKey, Node, PageInfo, RelayEdge};
