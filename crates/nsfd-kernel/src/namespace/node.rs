//! Namespace nodes and the arena that owns them.
//!
//! Nodes live in a slab addressed by [`NodeId`]. A parent owns its children
//! by holding their ids; a child names its parent by id. Freed slots bump a
//! generation counter, so an id held by a connection to a pruned node stops
//! resolving instead of aliasing whatever reuses the slot.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::peer::PeerHandle;

/// Stable address of a node in one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Children of an interior node.
///
/// Every child gets an insertion id from a per-parent counter that is never
/// rewound, so ids are unique for the lifetime of the parent even across
/// removals. Directory cursors rely on that.
#[derive(Debug, Default)]
pub(crate) struct Children {
    by_name: BTreeMap<String, u64>,
    by_id: BTreeMap<u64, NodeId>,
    next_id: u64,
}

impl Children {
    pub(crate) fn get(&self, name: &str) -> Option<NodeId> {
        self.by_name
            .get(name)
            .and_then(|id| self.by_id.get(id))
            .copied()
    }

    pub(crate) fn insert(&mut self, name: &str, node: NodeId) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, node);
        id
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<NodeId> {
        let id = self.by_name.remove(name)?;
        self.by_id.remove(&id)
    }

    /// First child whose insertion id is greater than `after`.
    pub(crate) fn next_after(&self, after: u64) -> Option<(u64, NodeId)> {
        self.by_id
            .range((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .map(|(id, node)| (*id, *node))
    }

    /// Children in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.by_id.values().copied()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Node variant.
#[derive(Debug)]
pub(crate) enum NodeKind {
    /// In-memory directory.
    Interior(Children),
    /// Leaf bound to a remote peer.
    Mount(PeerHandle),
}

impl NodeKind {
    pub(crate) fn interior() -> Self {
        NodeKind::Interior(Children::default())
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(name: &str, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            parent,
            kind,
        }
    }
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    node: Option<Node>,
}

/// Slab of nodes.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.node = Some(node);
            return NodeId {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub(crate) fn free(&mut self, id: NodeId) -> Option<Node> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let node = entry.node.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.entries
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.node.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }
}
