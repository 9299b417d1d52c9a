//! The transient in-memory build graph for a single updater run.
//!
//! Unlike the persistent database, this graph never outlives one call to
//! [`crate::builder`]/[`crate::executor`]: it is rebuilt from scratch on
//! every invocation (see the crate's non-goals around cross-run graph
//! persistence).  Nodes live in a dense arena ([`DenseMap`]) keyed by
//! [`NodeIndex`]; edges are destination indices rather than owned
//! pointers, which sidesteps the aliased-mutable-node problem that an
//! intrusive linked list invites.

use crate::db::{Flags, NodeType};
use crate::densemap::{self, DenseMap};
use rustc_hash::FxHashMap;

/// Where a graph node sits in the build/execute walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Initialized,
    Processing,
    Finished,
}

/// A dense index into the graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(usize);

impl densemap::Index for NodeIndex {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for NodeIndex {
    fn from(u: usize) -> NodeIndex {
        NodeIndex(u)
    }
}

/// A node in the transient build graph.
///
/// This is a copy of the persistent node's identity plus the bookkeeping
/// the graph build/execute walk needs; it does not borrow from the
/// database, so the graph and the database can be mutated independently
/// once the graph has been built.
pub struct Node {
    pub tupid: i64,
    pub name: String,
    pub node_type: NodeType,
    pub flags: Flags,
    pub state: NodeState,
    /// Outgoing edges, as destination indices. Creating an edge is the
    /// only way to grow this; removing the first entry is how the
    /// executor drains a node's successors one at a time.
    edges: Vec<NodeIndex>,
    pub incoming_count: usize,
}

impl Node {
    fn new(tupid: i64, name: String, node_type: NodeType, flags: Flags) -> Self {
        Node {
            tupid,
            name,
            node_type,
            flags,
            state: NodeState::Initialized,
            edges: Vec::new(),
            incoming_count: 0,
        }
    }
}

/// Error produced when adding an edge would close a cycle on the current
/// DFS stack (see [`Graph::add_edge`]).
#[derive(Debug, thiserror::Error)]
#[error("Circular dependency detected! Last edge was: {src} -> {dst}")]
pub struct Cycle {
    pub src: i64,
    pub dst: i64,
}

/// The transient build graph.
///
/// Owns every [`Node`] it contains; a node's lifetime is exactly the
/// graph's lifetime. `plist` is the DFS/ready worklist (a stack during
/// build, a ready-queue during execute); `node_list` is the
/// finished-but-not-yet-dispatched holding area. Both are modeled as
/// plain `Vec`s keyed off each node's `state`, rather than the intrusive
/// lists the original implementation used: state is the authoritative
/// bit, list membership is just a cache of which worklist to scan next.
pub struct Graph {
    nodes: DenseMap<NodeIndex, Option<Node>>,
    by_tupid: FxHashMap<i64, NodeIndex>,
    pub root: NodeIndex,
    pub plist: Vec<NodeIndex>,
    pub node_list: Vec<NodeIndex>,
}

impl Graph {
    /// Creates a graph containing only the synthetic root node.
    pub fn new() -> Self {
        let mut nodes = DenseMap::new();
        let root = nodes.push(Some(Node::new(0, String::from("<root>"), NodeType::Dir, Flags::NONE)));
        Graph {
            nodes,
            by_tupid: FxHashMap::default(),
            root,
            plist: Vec::new(),
            node_list: Vec::new(),
        }
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        self.nodes
            .lookup(idx)
            .and_then(|n| n.as_ref())
            .expect("graph node accessed after removal")
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        self.nodes
            .get_mut(idx)
            .as_mut()
            .expect("graph node accessed after removal")
    }

    /// Looks up a graph node by its persistent tupid, if one has already
    /// been created for it in this graph.
    pub fn find_by_tupid(&self, tupid: i64) -> Option<NodeIndex> {
        self.by_tupid.get(&tupid).copied()
    }

    /// Creates a new graph node for a not-yet-seen persistent node, pushing
    /// it onto the head of `plist` in the `Initialized` state. Returns the
    /// new node's index.
    pub fn create_node(
        &mut self,
        tupid: i64,
        name: String,
        node_type: NodeType,
        flags: Flags,
    ) -> NodeIndex {
        let idx = self.nodes.push(Some(Node::new(tupid, name, node_type, flags)));
        self.by_tupid.insert(tupid, idx);
        self.plist.push(idx);
        idx
    }

    /// Creates an edge `src -> dst`, incrementing `dst`'s incoming count.
    /// Fails with [`Cycle`] if `dst` is currently on the DFS stack
    /// (`Processing`), since that means this edge would close a cycle.
    pub fn add_edge(&mut self, src: NodeIndex, dst: NodeIndex) -> Result<(), Cycle> {
        if self.node(dst).state == NodeState::Processing {
            return Err(Cycle {
                src: self.node(src).tupid,
                dst: self.node(dst).tupid,
            });
        }
        self.node_mut(src).edges.push(dst);
        self.node_mut(dst).incoming_count += 1;
        Ok(())
    }

    /// Removes and returns the first outgoing edge of `n`, if any. Used by
    /// the executor to drain a dispatched node's successors one at a time,
    /// decrementing the destination's incoming count as each edge is
    /// removed.
    pub fn pop_edge(&mut self, n: NodeIndex) -> Option<NodeIndex> {
        let dst = self.node_mut(n).edges.pop()?;
        self.node_mut(dst).incoming_count -= 1;
        Some(dst)
    }

    pub fn has_edges(&self, n: NodeIndex) -> bool {
        !self.node(n).edges.is_empty()
    }

    /// Drops a node from the arena entirely. Only valid once all its
    /// outgoing edges have been drained and it has left both `plist` and
    /// `node_list`.
    pub fn remove_node(&mut self, n: NodeIndex) {
        let tupid = self.node(n).tupid;
        self.by_tupid.remove(&tupid);
        *self.nodes.get_mut(n) = None;
    }

    /// Iterates the tupids of every node currently resting in `node_list`,
    /// in order. Used to compute total progress work after the graph
    /// builder has finished (see [`crate::progress`]).
    pub fn node_list_iter(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.node_list.iter().copied()
    }

    pub fn is_empty_worklists(&self) -> bool {
        self.plist.is_empty() && self.node_list.is_empty()
    }

    /// Whether `idx` still has a live node in the arena (i.e. has not been
    /// [`Graph::remove_node`]d). Used by the executor's post-run
    /// completion check: every index recorded in `node_list` during build
    /// must have been removed by the time execution finishes.
    pub fn contains(&self, idx: NodeIndex) -> bool {
        self.nodes.lookup(idx).map_or(false, |n| n.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_link() {
        let mut g = Graph::new();
        let a = g.create_node(1, "a".into(), NodeType::File, Flags::MODIFY);
        let b = g.create_node(2, "b".into(), NodeType::Cmd, Flags::NONE);
        g.add_edge(a, b).unwrap();
        assert_eq!(g.node(b).incoming_count, 1);
        assert_eq!(g.pop_edge(a), Some(b));
        assert_eq!(g.node(b).incoming_count, 0);
        assert!(!g.has_edges(a));
    }

    #[test]
    fn edge_to_processing_node_is_a_cycle() {
        let mut g = Graph::new();
        let a = g.create_node(1, "a".into(), NodeType::Cmd, Flags::NONE);
        let b = g.create_node(2, "b".into(), NodeType::File, Flags::NONE);
        g.node_mut(b).state = NodeState::Processing;
        let err = g.add_edge(a, b).unwrap_err();
        assert_eq!(err.src, 1);
        assert_eq!(err.dst, 2);
    }

    #[test]
    fn remove_node_clears_tupid_lookup() {
        let mut g = Graph::new();
        let a = g.create_node(5, "a".into(), NodeType::File, Flags::NONE);
        assert!(g.find_by_tupid(5).is_some());
        g.remove_node(a);
        assert!(g.find_by_tupid(5).is_none());
    }
}
