use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::cursor::{self, CursorNode};
use crate::error::{GraphError, Result};

use super::QueryNode;

/// Persistent, key-addressed query tree.
///
/// Every update returns a new tree; untouched nodes stay shared through `Arc`.
/// A node's children are its data dependencies, kept in link order.
#[derive(Debug, Clone, Default)]
pub struct QueryTree {
    nodes: Arc<BTreeMap<String, Arc<QueryNode>>>,
    children: Arc<BTreeMap<String, Vec<String>>>,
    parents: Arc<BTreeMap<String, String>>,
}

impl QueryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with no links. Fails if the key is taken.
    pub fn add_node(&self, key: impl Into<String>, node: QueryNode) -> Result<QueryTree> {
        let key = key.into();
        if self.nodes.contains_key(&key) {
            return Err(GraphError::operation(format!("duplicate query key '{}'", key)));
        }
        let mut nodes = (*self.nodes).clone();
        nodes.insert(key, Arc::new(node));
        Ok(Self {
            nodes: Arc::new(nodes),
            ..self.clone()
        })
    }

    /// Adds `node` under `parent_key` (if not present yet) and makes it the parent of `child_key`.
    pub fn add_parent_node(
        &self,
        child_key: &str,
        parent_key: impl Into<String>,
        node: QueryNode,
    ) -> Result<QueryTree> {
        let parent_key = parent_key.into();
        if !self.nodes.contains_key(child_key) {
            return Err(GraphError::operation(format!("unknown query key '{}'", child_key)));
        }
        let tree = if self.nodes.contains_key(&parent_key) {
            self.clone()
        } else {
            self.add_node(parent_key.clone(), node)?
        };
        tree.link(&parent_key, child_key)
    }

    /// Adds `node` under `child_key` and makes it a child of the existing `parent_key`.
    pub fn add_child_node(
        &self,
        parent_key: &str,
        child_key: impl Into<String>,
        node: QueryNode,
    ) -> Result<QueryTree> {
        let child_key = child_key.into();
        if !self.nodes.contains_key(parent_key) {
            return Err(GraphError::operation(format!("unknown query key '{}'", parent_key)));
        }
        self.add_node(child_key.clone(), node)?.link(parent_key, &child_key)
    }

    fn link(&self, parent_key: &str, child_key: &str) -> Result<QueryTree> {
        if let Some(existing) = self.parents.get(child_key) {
            return Err(GraphError::operation(format!(
                "query '{}' already has parent '{}'",
                child_key, existing
            )));
        }
        let mut ancestor = Some(parent_key);
        while let Some(key) = ancestor {
            if key == child_key {
                return Err(GraphError::operation(format!(
                    "linking '{}' under '{}' creates a cycle",
                    child_key, parent_key
                )));
            }
            ancestor = self.parent(key);
        }

        let mut children = (*self.children).clone();
        children
            .entry(parent_key.to_string())
            .or_default()
            .push(child_key.to_string());
        let mut parents = (*self.parents).clone();
        parents.insert(child_key.to_string(), parent_key.to_string());
        Ok(Self {
            nodes: self.nodes.clone(),
            children: Arc::new(children),
            parents: Arc::new(parents),
        })
    }

    /// Replaces the node stored under an existing key, keeping its links.
    pub fn replace_node(&self, key: &str, node: QueryNode) -> Result<QueryTree> {
        if !self.nodes.contains_key(key) {
            return Err(GraphError::operation(format!("unknown query key '{}'", key)));
        }
        let mut nodes = (*self.nodes).clone();
        nodes.insert(key.to_string(), Arc::new(node));
        Ok(Self {
            nodes: Arc::new(nodes),
            ..self.clone()
        })
    }

    pub fn get(&self, key: &str) -> Option<&Arc<QueryNode>> {
        self.nodes.get(key)
    }

    pub fn node(&self, key: &str) -> Result<&Arc<QueryNode>> {
        self.get(key)
            .ok_or_else(|| GraphError::operation(format!("unknown query key '{}'", key)))
    }

    pub fn children(&self, key: &str) -> &[String] {
        self.children.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single declared child of `key`.
    pub fn only_child(&self, key: &str) -> Result<&str> {
        match self.children(key) {
            [] => Err(GraphError::operation("parent has no children")),
            [child] => Ok(child.as_str()),
            _ => Err(GraphError::not_supported(format!(
                "query '{}' expects exactly one child",
                key
            ))),
        }
    }

    pub fn parent(&self, key: &str) -> Option<&str> {
        self.parents.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The unique node without a parent.
    pub fn root(&self) -> Result<&str> {
        let mut roots = self
            .nodes
            .keys()
            .filter(|k| !self.parents.contains_key(k.as_str()));
        match (roots.next(), roots.next()) {
            (Some(root), None) => Ok(root.as_str()),
            (None, _) => Err(GraphError::operation("query tree has no root")),
            (Some(_), Some(_)) => Err(GraphError::operation("query tree has more than one root")),
        }
    }

    /// Hands every node's `after` position down to its children, top-down.
    ///
    /// A resumed request carries only the root cursor; composite cursors embed
    /// the position of each child under that child's key.
    pub fn seed_cursors(&self) -> Result<QueryTree> {
        let mut tree = self.clone();
        let mut queue = VecDeque::from([self.root()?.to_string()]);
        while let Some(key) = queue.pop_front() {
            let node = tree.node(&key)?.clone();
            let after = node.args().and_then(|a| a.after_cursor()).map(str::to_string);
            for child_key in tree.children(&key).to_vec() {
                if let Some(after) = &after {
                    if let Some(child_after) = child_after(&node, after, &child_key)? {
                        let child = tree.node(&child_key)?.clone();
                        if let Some(args) = child.args() {
                            let seeded = child.with_args(args.clone().with_after(child_after));
                            tree = tree.replace_node(&child_key, seeded)?;
                        }
                    }
                }
                queue.push_back(child_key);
            }
        }
        Ok(tree)
    }
}

/// The `after` position a child resumes from, given its parent's `after` cursor.
fn child_after(parent: &QueryNode, after: &str, child_key: &str) -> Result<Option<String>> {
    match parent {
        // Item cursors of these are the child's item cursors.
        QueryNode::WhereNodeConnection(_)
        | QueryNode::WhereEdgeConnection(_)
        | QueryNode::InFromEdgeConnection(_)
        | QueryNode::OutFromEdgeConnection(_) => Ok(Some(after.to_string())),
        QueryNode::InAndOutFromEdgeConnection(_) => {
            let decoded = cursor::deserialize(after)?;
            if decoded.end_of_data || decoded.offset.is_none() {
                return Ok(Some(after.to_string()));
            }
            let stripped = CursorNode {
                offset: None,
                ..decoded
            };
            if stripped == CursorNode::default() {
                Ok(None)
            } else {
                stripped.serialize().map(Some)
            }
        }
        QueryNode::InToEdgeConnection(_)
        | QueryNode::OutToEdgeConnection(_)
        | QueryNode::InAndOutToEdgeConnection(_)
        | QueryNode::InToAllEdgeConnection(_)
        | QueryNode::OutToAllEdgeConnection(_)
        | QueryNode::ZipNodeConnection(_) => {
            let decoded = cursor::deserialize(after)?;
            if decoded.end_of_data {
                return Ok(Some(after.to_string()));
            }
            decoded.child(child_key).map(cursor::serialize).transpose()
        }
        _ => Ok(None),
    }
}
