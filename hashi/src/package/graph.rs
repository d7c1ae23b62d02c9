//! Dependency graph over package libraries.
//!
//! Nodes live in an arena and edges are indices into it. An edge `a -> b`
//! means `a` depends on `b`. Packages routinely reference a library from
//! several places and occasionally form cycles; traversal marks nodes
//! visited on entry, so a repeated or cyclic reference ends that branch
//! instead of failing.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    nodes: Vec<K>,
    index: HashMap<K, NodeId>,
    edges: Vec<Vec<NodeId>>,
}

impl<K: Clone + Eq + Hash + std::fmt::Debug> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash + std::fmt::Debug> DependencyGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `key`, adding it if absent.
    pub fn add_node(&mut self, key: K) -> NodeId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        self.index.insert(key.clone(), id);
        self.nodes.push(key);
        self.edges.push(Vec::new());
        id
    }

    /// Record that `from` depends on `to`.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if let Some(deps) = self.edges.get_mut(from) {
            if !deps.contains(&to) {
                deps.push(to);
            }
        }
    }

    pub fn id(&self, key: &K) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&K> {
        self.nodes.get(id)
    }

    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Everything reachable from `roots`, ordered so that each node comes
    /// after all of its dependencies. Where a cycle makes that impossible,
    /// the node first reached is emitted last.
    pub fn load_order(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut on_path = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        // (node, index of the next dependency to look at)
        let mut stack: Vec<(NodeId, usize)> = Vec::new();

        for &root in roots {
            if root >= self.nodes.len() || visited[root] {
                continue;
            }
            visited[root] = true;
            on_path[root] = true;
            stack.push((root, 0));

            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                match self.edges[node].get(*next) {
                    Some(&dep) => {
                        *next += 1;
                        if on_path[dep] {
                            debug!(from = ?self.nodes[node], to = ?self.nodes[dep], "Dependency cycle, skipping back edge");
                        }
                        if !visited[dep] {
                            visited[dep] = true;
                            on_path[dep] = true;
                            stack.push((dep, 0));
                        }
                    }
                    None => {
                        on_path[node] = false;
                        order.push(node);
                        stack.pop();
                    }
                }
            }
        }
        order
    }

    /// Keys of [`load_order`](Self::load_order).
    pub fn sorted_keys(&self, roots: &[NodeId]) -> Vec<&K> {
        self.load_order(roots)
            .into_iter()
            .map(|id| &self.nodes[id])
            .collect()
    }
}
