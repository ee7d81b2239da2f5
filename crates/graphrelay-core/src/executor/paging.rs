//! Helpers shared by the executors that fold a child sequence into their own page.

use graphrelay_common::config::EvaluatorConfig;
use graphrelay_common::{ConnectionArguments, Edge, Node, PageInfo, RelayEdge};

use crate::context::{ConnectionResult, ExecutionContext, QueryResult, ResultState};
use crate::cursor;
use crate::error::{GraphError, Result};

/// How a node is re-run, derived from its own prior result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// First run.
    Initial,
    /// The prior page was under-filled: extend it.
    Append,
    /// An ancestor consumed the prior page: produce the next one.
    Slide,
}

impl ExecutionMode {
    pub fn of(prior: Option<&ResultState>) -> Self {
        match prior {
            None => Self::Initial,
            Some(state) if state.needs_more_data => Self::Append,
            Some(_) => Self::Slide,
        }
    }
}

/// A child's items viewed as one ordered sequence, whatever its result shape.
#[derive(Debug, Clone)]
pub struct Sequence<T> {
    pub edges: Vec<RelayEdge<T>>,
    pub page_info: PageInfo,
    pub state: ResultState,
}

impl<T> Sequence<T> {
    /// Whether re-running the child could yield further items.
    pub fn can_supply(&self) -> bool {
        self.page_info.has_next_page || self.state.needs_more_data
    }

    pub fn end_cursor(&self) -> Option<&str> {
        self.edges.last().map(|e| e.cursor.as_str())
    }
}

/// Item types a child sequence can be built from.
pub trait SequenceItem: Clone + Send + Sync + 'static {
    fn sequence(result: &QueryResult) -> Option<Sequence<Self>>;
}

impl SequenceItem for Node {
    fn sequence(result: &QueryResult) -> Option<Sequence<Self>> {
        match result {
            QueryResult::NodeConnection(r) => Some(from_connection(r)),
            QueryResult::Node(r) => Some(from_item(r.item.as_ref(), &r.state)),
            _ => None,
        }
    }
}

impl SequenceItem for Edge {
    fn sequence(result: &QueryResult) -> Option<Sequence<Self>> {
        match result {
            QueryResult::EdgeConnection(r) => Some(from_connection(r)),
            QueryResult::Edge(r) => Some(from_item(r.item.as_ref(), &r.state)),
            _ => None,
        }
    }
}

fn from_connection<T: Clone>(result: &ConnectionResult<T>) -> Sequence<T> {
    Sequence {
        edges: result.connection.edges.clone(),
        page_info: result.connection.page_info.clone(),
        state: result.state.clone(),
    }
}

fn from_item<T: Clone>(item: Option<&T>, state: &ResultState) -> Sequence<T> {
    let edges: Vec<RelayEdge<T>> = item
        .map(|i| RelayEdge::new(state.cursor.clone().unwrap_or_default(), i.clone()))
        .into_iter()
        .collect();
    Sequence {
        page_info: PageInfo {
            has_next_page: state.has_more_data,
            has_previous_page: false,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        },
        edges,
        state: state.clone(),
    }
}

pub fn child_sequence<T: SequenceItem>(ctx: &ExecutionContext, key: &str) -> Result<Sequence<T>> {
    let result = ctx
        .result(key)
        .ok_or_else(|| GraphError::operation("missing result"))?;
    T::sequence(result).ok_or_else(|| GraphError::operation("unexpected result type"))
}

/// Items after the watermark; all items when the watermark is absent or no longer in the sequence.
pub fn after_watermark<'a, T>(edges: &'a [RelayEdge<T>], watermark: Option<&str>) -> &'a [RelayEdge<T>] {
    match watermark.and_then(|w| edges.iter().position(|e| e.cursor == w)) {
        Some(index) => &edges[index + 1..],
        None => edges,
    }
}

/// Whether `seq` still holds items past `watermark`.
pub fn has_unconsumed<T>(seq: &Sequence<T>, watermark: Option<&str>) -> bool {
    !after_watermark(&seq.edges, watermark).is_empty()
}

/// Requested page size in the resolved direction.
pub fn page_size(args: &ConnectionArguments, config: &EvaluatorConfig) -> usize {
    args.count().unwrap_or(config.default_page_size)
}

/// Count to request from the backend for `remaining` wanted items.
pub fn fetch_count(page_size: Option<usize>, remaining: usize, post_filter: bool) -> usize {
    if post_filter {
        page_size.unwrap_or(remaining).max(remaining)
    } else {
        remaining
    }
}

/// Whether the `after` cursor marks an exhausted branch.
pub fn is_end_of_data(args: &ConnectionArguments) -> bool {
    args.after_cursor()
        .and_then(|c| cursor::deserialize(c).ok())
        .map_or(false, |c| c.end_of_data)
}

/// `has_previous_page` of a folded page.
pub fn has_previous(mode: ExecutionMode, prior: Option<&PageInfo>, initial: bool) -> bool {
    match (mode, prior) {
        (ExecutionMode::Append, Some(info)) => info.has_previous_page,
        (ExecutionMode::Slide, _) => true,
        _ => initial,
    }
}
