//! Tree reconstruction and pre-order traversal.
//!
//! The request carries a flat list where each node names its parent. The
//! [`Tree`] indexes children by parent id (keeping the list's relative order)
//! and the [`Walker`] turns it back into the linear reading order of the
//! output document: root first, then every child subtree before the next
//! sibling.
//!
//! Nodes whose parent id does not resolve are never reached and therefore
//! never exported. The walker uses an explicit stack plus a visited set, so a
//! parent chain that loops back on itself is reported as
//! [`ExportError::CyclicHierarchy`] instead of recursing forever.
//!
//! The tree only needs ids, parent ids and layers, so it can be built over
//! raw [`NodeRecord`]s and only the visited ones ingested.

use crate::error::ExportError;
use crate::model::{Node, NodeRecord, ROOT_ID};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// An entry of the flat, parent-referenced list.
pub trait TreeNode {
    fn id(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;
    /// Heading level of a non-root entry, at most `max_level`.
    fn heading_level(&self, max_level: u8) -> u8;
}

impl TreeNode for Node {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn heading_level(&self, max_level: u8) -> u8 {
        Node::heading_level(self, max_level)
    }
}

impl TreeNode for NodeRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn heading_level(&self, max_level: u8) -> u8 {
        NodeRecord::heading_level(self, max_level)
    }
}

/// Parent → children index over a borrowed node list.
#[derive(Debug)]
pub struct Tree<'a, N = Node> {
    root: &'a N,
    children: HashMap<&'a str, Vec<&'a N>>,
    node_count: usize,
}

impl<'a, N: TreeNode> Tree<'a, N> {
    /// Locate the root and group all other nodes by parent id.
    pub fn build(nodes: &'a [N]) -> Result<Self, ExportError> {
        let root = nodes
            .iter()
            .find(|n| n.id() == ROOT_ID)
            .ok_or(ExportError::MissingRoot)?;

        let mut children: HashMap<&'a str, Vec<&'a N>> = HashMap::new();
        for node in nodes {
            if node.id() == ROOT_ID {
                if !std::ptr::eq(node, root) {
                    warn!("Ignoring duplicate root node");
                }
                continue;
            }
            if let Some(parent) = node.parent_id() {
                children.entry(parent).or_default().push(node);
            }
        }
        debug!(
            "Indexed {} nodes under {} parents",
            nodes.len(),
            children.len()
        );

        Ok(Self {
            root,
            children,
            node_count: nodes.len(),
        })
    }

    pub fn root(&self) -> &'a N {
        self.root
    }

    /// Direct children of `id` in input order.
    pub fn children(&self, id: &str) -> &[&'a N] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of nodes in the input list, reachable or not.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Start a single pre-order traversal.
    pub fn walk(&self, max_heading_level: u8) -> Walker<'_, 'a, N> {
        Walker {
            tree: self,
            stack: vec![(self.root, true)],
            visited: HashSet::new(),
            max_heading_level,
            failed: false,
        }
    }
}

/// One step of the traversal.
#[derive(Debug)]
pub struct Visit<'a, N = Node> {
    pub node: &'a N,
    /// `None` for the root, whose heading is suppressed.
    pub heading: Option<u8>,
}

/// Lazy pre-order iterator over a [`Tree`].
///
/// Yields at most one `Err`, after which it is exhausted.
pub struct Walker<'t, 'a, N = Node> {
    tree: &'t Tree<'a, N>,
    stack: Vec<(&'a N, bool)>,
    visited: HashSet<*const N>,
    max_heading_level: u8,
    failed: bool,
}

impl<N> Walker<'_, '_, N> {
    /// Nodes yielded so far.
    pub fn visited(&self) -> usize {
        self.visited.len()
    }
}

impl<'a, N: TreeNode> Iterator for Walker<'_, 'a, N> {
    type Item = Result<Visit<'a, N>, ExportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let (node, is_root) = self.stack.pop()?;

        if !self.visited.insert(node as *const N) {
            self.failed = true;
            self.stack.clear();
            return Some(Err(ExportError::CyclicHierarchy {
                node_id: node.id().to_string(),
            }));
        }

        // Reverse so the first child is popped first.
        for child in self.tree.children(node.id()).iter().rev() {
            self.stack.push((*child, false));
        }

        let heading = if is_root {
            None
        } else {
            Some(node.heading_level(self.max_heading_level))
        };
        Some(Ok(Visit { node, heading }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeRecord;

    fn node(id: &str, parent: Option<&str>, layer: i64) -> Node {
        let rec = NodeRecord {
            id: id.into(),
            parent_id: parent.map(Into::into),
            topic: format!("topic {id}"),
            layer: Some(layer),
            ..Default::default()
        };
        Node::ingest(&rec).unwrap()
    }

    fn order(nodes: &[Node]) -> Vec<(String, Option<u8>)> {
        let tree = Tree::build(nodes).unwrap();
        tree.walk(9)
            .map(|v| {
                let v = v.unwrap();
                (v.node.id.clone(), v.heading)
            })
            .collect()
    }

    #[test]
    fn missing_root_is_fatal() {
        let nodes = vec![node("a", Some("b"), 2)];
        assert!(matches!(Tree::build(&nodes), Err(ExportError::MissingRoot)));
    }

    #[test]
    fn pre_order_keeps_input_sibling_order() {
        let nodes = vec![
            node("b", Some("root"), 2),
            node("a1", Some("a"), 3),
            node("root", None, 1),
            node("a", Some("root"), 2),
            node("b1", Some("b"), 3),
            node("a2", Some("a"), 3),
            node("a1x", Some("a1"), 4),
        ];
        let ids: Vec<_> = order(&nodes).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["root", "b", "b1", "a", "a1", "a1x", "a2"]);
    }

    #[test]
    fn root_heading_is_suppressed() {
        let nodes = vec![node("root", None, 1), node("a", Some("root"), 2), node("b", Some("a"), 3)];
        let visits = order(&nodes);
        assert_eq!(visits[0], ("root".into(), None));
        assert_eq!(visits[1], ("a".into(), Some(1)));
        assert_eq!(visits[2], ("b".into(), Some(2)));
    }

    #[test]
    fn orphans_are_silently_excluded() {
        let nodes = vec![
            node("root", None, 1),
            node("a", Some("root"), 2),
            node("lost", Some("nowhere"), 2),
            node("lost-child", Some("lost"), 3),
            node("no-parent", None, 2),
        ];
        let tree = Tree::build(&nodes).unwrap();
        let mut walker = tree.walk(9);
        let ids: Vec<_> = walker.by_ref().map(|v| v.unwrap().node.id.clone()).collect();
        assert_eq!(ids, vec!["root", "a"]);
        assert_eq!(walker.visited(), 2);
        assert_eq!(tree.node_count(), 5);
    }

    #[test]
    fn root_parent_is_ignored() {
        let nodes = vec![node("root", Some("root"), 1), node("a", Some("root"), 2)];
        let ids: Vec<_> = order(&nodes).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["root", "a"]);
    }

    #[test]
    fn self_parented_chain_is_reported() {
        // "x" hangs off root, and a second "x" claims "x" as its parent,
        // so the children of "x" include itself forever.
        let nodes = vec![
            node("root", None, 1),
            node("x", Some("root"), 2),
            node("x", Some("x"), 3),
        ];
        let tree = Tree::build(&nodes).unwrap();
        let results: Vec<_> = tree.walk(9).collect();
        let err = results.iter().find_map(|r| r.as_ref().err());
        assert!(matches!(err, Some(ExportError::CyclicHierarchy { node_id }) if node_id == "x"));
        assert!(results.last().unwrap().is_err(), "walker stops after the error");
    }

    #[test]
    fn raw_records_walk_like_nodes() {
        let records = vec![
            NodeRecord { id: "a".into(), parent_id: Some("root".into()), layer: Some(2), ..Default::default() },
            NodeRecord { id: "root".into(), ..Default::default() },
            NodeRecord { id: "b".into(), parent_id: Some("a".into()), layer: None, ..Default::default() },
        ];
        let tree = Tree::build(&records).unwrap();
        let visits: Vec<_> = tree
            .walk(9)
            .map(|v| v.map(|v| (v.node.id.as_str(), v.heading)).unwrap())
            .collect();
        assert_eq!(visits, vec![("root", None), ("a", Some(1)), ("b", Some(1))]);

        let no_root = vec![NodeRecord { id: "a".into(), ..Default::default() }];
        assert!(matches!(Tree::build(&no_root), Err(ExportError::MissingRoot)));
    }

    #[test]
    fn every_reachable_node_is_visited_once() {
        let mut nodes = vec![node("root", None, 1)];
        for i in 0..20 {
            let parent = if i < 4 { "root".to_string() } else { format!("n{}", i / 4 - 1) };
            nodes.push(node(&format!("n{i}"), Some(&parent), 2));
        }
        let ids: Vec<_> = order(&nodes).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids.len(), nodes.len());
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
