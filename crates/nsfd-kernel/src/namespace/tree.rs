//! The namespace tree.
//!
//! A tree of interior directories whose leaves are mounts bound to remote
//! peers. One lock guards all traversal and mutation; it is only ever held
//! for in-memory work. Walks capture a clone of the mount's peer handle so
//! the forwarded call happens after the lock is released.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::local::LocalDir;
use super::node::{Arena, Node, NodeId, NodeKind};
use crate::error::{NsError, NsResult};
use crate::object::ObjectRef;
use crate::path::{self, check_name, segments};
use crate::peer::PeerHandle;
use crate::types::{DirCursor, DirEntry, OpenFlags};

/// Where a walk stopped.
#[derive(Debug, Clone)]
pub struct Walked {
    /// Last node reached.
    pub node: NodeId,
    /// Path still to resolve below `node`; `.` when fully consumed.
    pub remainder: String,
    /// The peer bound at `node`, if it is a mount.
    pub peer: Option<PeerHandle>,
}

impl Walked {
    /// Returns true if the walk ended on a mount.
    pub fn is_mount(&self) -> bool {
        self.peer.is_some()
    }
}

/// Replacement for the namespace root.
#[derive(Debug, Clone)]
pub enum NewRoot {
    /// A node already in this namespace.
    Node(NodeId),
    /// An external peer, wrapped in a fresh mount.
    Peer(PeerHandle),
}

enum Step {
    Found(NodeId),
    Missing,
    AtMount,
}

#[derive(Debug)]
struct Tree {
    arena: Arena,
    root: NodeId,
}

impl Tree {
    fn new() -> Self {
        let mut arena = Arena::default();
        let root = arena.alloc(Node::new("", None, NodeKind::interior()));
        Self { arena, root }
    }

    fn step(&self, at: NodeId, name: &str) -> Step {
        match self.arena.get(at).map(|n| &n.kind) {
            Some(NodeKind::Interior(children)) => match children.get(name) {
                Some(child) => Step::Found(child),
                None => Step::Missing,
            },
            Some(NodeKind::Mount(_)) => Step::AtMount,
            None => Step::Missing,
        }
    }

    fn peer_of(&self, id: NodeId) -> Option<PeerHandle> {
        match self.arena.get(id).map(|n| &n.kind) {
            Some(NodeKind::Mount(peer)) => Some(Arc::clone(peer)),
            _ => None,
        }
    }

    fn walk(&self, start: NodeId, path: &str) -> NsResult<Walked> {
        // The remainder past a mount goes to the peer unchecked otherwise.
        segments(path).try_for_each(check_name)?;

        let mut at = start;
        let mut rest = segments(path).filter(|s| *s != ".").peekable();
        while let Some(seg) = rest.peek().copied() {
            match self.step(at, seg) {
                Step::Found(child) => {
                    at = child;
                    rest.next();
                }
                Step::AtMount => {
                    let remainder = rest.collect::<Vec<_>>().join("/");
                    return Ok(Walked {
                        node: at,
                        remainder,
                        peer: self.peer_of(at),
                    });
                }
                Step::Missing => return Err(NsError::not_found(path)),
            }
        }
        Ok(Walked {
            node: at,
            remainder: ".".to_string(),
            peer: self.peer_of(at),
        })
    }

    /// Link a new node named `name` under the interior node `parent`.
    fn attach(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NsResult<NodeId> {
        let child = self.arena.alloc(Node::new(name, Some(parent), kind));
        match self.arena.get_mut(parent).map(|n| &mut n.kind) {
            Some(NodeKind::Interior(children)) => {
                children.insert(name, child);
                Ok(child)
            }
            _ => {
                self.arena.free(child);
                Err(NsError::not_supported(format!("attach {name} under a mount")))
            }
        }
    }

    /// Unlink `id` from its parent and free it. Its subtree must already be
    /// empty or freed.
    fn detach(&mut self, id: NodeId) -> Option<Node> {
        let (name, parent) = {
            let node = self.arena.get(id)?;
            (node.name.clone(), node.parent)
        };
        if let Some(parent) = parent {
            if let Some(Node {
                kind: NodeKind::Interior(children),
                ..
            }) = self.arena.get_mut(parent)
            {
                children.remove(&name);
            }
        }
        self.arena.free(id)
    }

    /// Free `id` and everything under it.
    fn free_subtree(&mut self, id: NodeId, freed: &mut Vec<Node>) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.arena.free(id) {
                if let NodeKind::Interior(children) = &node.kind {
                    stack.extend(children.iter());
                }
                freed.push(node);
            }
        }
    }

    fn bind(&mut self, segs: &[&str], peer: PeerHandle, created: &mut Vec<NodeId>) -> NsResult<()> {
        let Some((last, parents)) = segs.split_last() else {
            return Err(NsError::invalid_args("empty bind path"));
        };
        let mut at = self.root;
        for seg in parents {
            check_name(seg)?;
            match self.step(at, seg) {
                Step::Found(child) => at = child,
                Step::Missing => {
                    let child = self.attach(at, seg, NodeKind::interior())?;
                    created.push(child);
                    at = child;
                }
                Step::AtMount => {
                    return Err(NsError::not_supported(format!("{seg} is beneath a mount")));
                }
            }
        }
        check_name(last)?;
        match self.step(at, last) {
            Step::Found(_) => Err(NsError::already_exists(*last)),
            Step::AtMount => Err(NsError::not_supported(format!("{last} is beneath a mount"))),
            Step::Missing => self.attach(at, last, NodeKind::Mount(peer)).map(|_| ()),
        }
    }

    fn bind_root(&mut self, peer: PeerHandle) -> NsResult<()> {
        let root = self
            .arena
            .get_mut(self.root)
            .ok_or_else(|| NsError::not_found("/"))?;
        let vacant = matches!(&root.kind, NodeKind::Interior(children) if children.is_empty());
        if !vacant {
            return Err(NsError::already_exists("/"));
        }
        root.kind = NodeKind::Mount(peer);
        Ok(())
    }

    fn find_mount(&self, segs: &[&str], path: &str) -> NsResult<NodeId> {
        let mut at = self.root;
        for seg in segs {
            check_name(seg)?;
            match self.step(at, seg) {
                Step::Found(child) => at = child,
                Step::Missing | Step::AtMount => return Err(NsError::not_found(path)),
            }
        }
        match self.arena.get(at).map(|n| &n.kind) {
            Some(NodeKind::Mount(_)) => Ok(at),
            _ => Err(NsError::not_found(format!("{path} is not a mount point"))),
        }
    }

    /// Remove childless interior ancestors, starting at `from`.
    fn prune(&mut self, from: Option<NodeId>, freed: &mut Vec<Node>) {
        let mut at = from;
        while let Some(id) = at {
            if id == self.root {
                break;
            }
            let (empty, parent) = match self.arena.get(id) {
                Some(Node {
                    kind: NodeKind::Interior(children),
                    parent,
                    ..
                }) => (children.is_empty(), *parent),
                _ => break,
            };
            if !empty {
                break;
            }
            if let Some(node) = self.detach(id) {
                freed.push(node);
            }
            at = parent;
        }
    }

    fn enumerate(&self, from: NodeId) -> NsResult<Vec<(String, PeerHandle)>> {
        if self.arena.get(from).is_none() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut stack = vec![(from, String::new())];
        while let Some((id, prefix)) = stack.pop() {
            let Some(node) = self.arena.get(id) else {
                continue;
            };
            match &node.kind {
                NodeKind::Mount(peer) => {
                    let path = if prefix.is_empty() {
                        ".".to_string()
                    } else {
                        prefix
                    };
                    out.push((path, Arc::clone(peer)));
                }
                NodeKind::Interior(children) => {
                    // Reverse so the stack pops children in insertion order.
                    let kids: Vec<_> = children.iter().collect();
                    for child in kids.into_iter().rev() {
                        let Some(name) = self.arena.get(child).map(|n| n.name.as_str()) else {
                            continue;
                        };
                        let path = if prefix.is_empty() {
                            name.to_string()
                        } else {
                            format!("{prefix}/{name}")
                        };
                        stack.push((child, path));
                    }
                }
            }
        }
        Ok(out)
    }
}

/// A mutable tree of local directories and remote mounts.
pub struct Namespace {
    tree: Mutex<Tree>,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("tree", &"<locked>")
            .finish()
    }
}

impl Namespace {
    /// Create a namespace containing only an empty root directory.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tree: Mutex::new(Tree::new()),
        })
    }

    /// The current root node.
    pub fn root(&self) -> NodeId {
        self.tree.lock().root
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.tree.lock().arena.len()
    }

    /// Walk `path` from `start`.
    ///
    /// Stops early at a mount, returning the unconsumed remainder for the
    /// peer. A missing segment below an interior node is `NotFound`. `.`
    /// segments are skipped; `..` is an ordinary name here, since paths are
    /// cleaned before they are walked.
    pub fn walk(&self, start: NodeId, path: &str) -> NsResult<Walked> {
        self.tree.lock().walk(start, path)
    }

    /// Mount `peer` at the rooted `path`, creating interior directories as
    /// needed.
    ///
    /// Mounting beneath a mount is `NotSupported`; mounting where a node
    /// already exists is `AlreadyExists`. A failed bind leaves the tree as
    /// it found it.
    pub fn bind(&self, path: &str, peer: PeerHandle) -> NsResult<()> {
        if !path.starts_with('/') {
            return Err(NsError::invalid_args(format!("bind path {path} is not rooted")));
        }
        let cleaned = path::clean(path)?;
        let segs: Vec<&str> = segments(&cleaned.path).collect();

        let mut tree = self.tree.lock();
        if segs.is_empty() {
            tree.bind_root(peer)?;
            tracing::debug!(path = "/", "bound mount at root");
            return Ok(());
        }

        let mut created = Vec::new();
        match tree.bind(&segs, peer, &mut created) {
            Ok(()) => {
                tracing::debug!(path = %cleaned.path, synthesized = created.len(), "bound mount");
                Ok(())
            }
            Err(e) => {
                let mut unwound = Vec::with_capacity(created.len());
                for id in created.iter().rev() {
                    if let Some(node) = tree.detach(*id) {
                        unwound.push(node);
                    }
                }
                drop(tree);
                tracing::debug!(
                    path = %cleaned.path,
                    unwound = unwound.len(),
                    error = %e,
                    "bind rolled back"
                );
                Err(e)
            }
        }
    }

    /// Remove the mount at the rooted `path` and prune interior directories
    /// left empty by it.
    pub fn unbind(&self, path: &str) -> NsResult<()> {
        if !path.starts_with('/') {
            return Err(NsError::invalid_args(format!("unbind path {path} is not rooted")));
        }
        let cleaned = path::clean(path)?;
        let segs: Vec<&str> = segments(&cleaned.path).collect();
        if segs.is_empty() {
            return Err(NsError::invalid_args("cannot unbind /"));
        }

        let mut freed = Vec::new();
        {
            let mut tree = self.tree.lock();
            let target = tree.find_mount(&segs, &cleaned.path)?;
            let parent = tree.arena.get(target).and_then(|n| n.parent);
            if let Some(node) = tree.detach(target) {
                freed.push(node);
            }
            tree.prune(parent, &mut freed);
        }
        tracing::debug!(path = %cleaned.path, removed = freed.len(), "unbound mount");
        Ok(())
    }

    /// Returns true if `path` names exactly a mount.
    pub fn is_bound(&self, path: &str) -> bool {
        let Ok(cleaned) = path::clean(path) else {
            return false;
        };
        if !cleaned.is_rooted() {
            return false;
        }
        let tree = self.tree.lock();
        match tree.walk(tree.root, &cleaned.path) {
            Ok(walked) => walked.is_mount() && walked.remainder == ".",
            Err(_) => false,
        }
    }

    /// Return the entry after `cursor` in the directory `node`.
    ///
    /// `.` comes first, then children in the order they were bound. A node
    /// that has been pruned since the caller opened it reads as an empty
    /// directory.
    pub fn readdir(&self, node: NodeId, cursor: &mut DirCursor) -> NsResult<Option<DirEntry>> {
        let tree = self.tree.lock();
        let children = match tree.arena.get(node).map(|n| &n.kind) {
            Some(NodeKind::Mount(_)) => {
                return Err(NsError::not_supported("readdir on a mount"));
            }
            Some(NodeKind::Interior(children)) => Some(children),
            None => None,
        };

        match *cursor {
            DirCursor::Done => Ok(None),
            DirCursor::Start => {
                *cursor = DirCursor::After(0);
                Ok(Some(DirEntry::directory(".")))
            }
            DirCursor::After(last) => {
                let next = children.and_then(|c| c.next_after(last));
                match next.and_then(|(id, child)| tree.arena.get(child).map(|n| (id, n))) {
                    Some((id, child)) => {
                        *cursor = DirCursor::After(id);
                        Ok(Some(DirEntry::directory(child.name.clone())))
                    }
                    None => {
                        *cursor = DirCursor::Done;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Collect every mount under `node`, paired with its path relative to
    /// `node` (`.` for `node` itself).
    pub fn enumerate(&self, node: NodeId) -> NsResult<Vec<(String, PeerHandle)>> {
        self.tree.lock().enumerate(node)
    }

    /// Open the root directory.
    pub fn open_root(self: &Arc<Self>) -> NsResult<ObjectRef> {
        let (root, peer) = {
            let tree = self.tree.lock();
            (tree.root, tree.peer_of(tree.root))
        };
        match peer {
            Some(peer) => Ok(peer.open(".", OpenFlags::directory())?),
            None => Ok(Arc::new(LocalDir::new(Arc::clone(self), root))),
        }
    }

    /// Swap the root.
    ///
    /// The old root's subtree is torn down after the swap; a node promoted
    /// from inside it is unlinked from its parent first and survives.
    pub fn set_root(&self, new_root: NewRoot) -> NsResult<()> {
        let mut freed = Vec::new();
        {
            let mut tree = self.tree.lock();
            let id = match new_root {
                NewRoot::Node(id) => {
                    if id == tree.root {
                        return Ok(());
                    }
                    let node = tree
                        .arena
                        .get(id)
                        .ok_or_else(|| NsError::not_found("new root is no longer in the tree"))?;
                    if let Some(parent) = node.parent {
                        let name = node.name.clone();
                        if let Some(Node {
                            kind: NodeKind::Interior(children),
                            ..
                        }) = tree.arena.get_mut(parent)
                        {
                            children.remove(&name);
                        }
                    }
                    if let Some(node) = tree.arena.get_mut(id) {
                        node.parent = None;
                    }
                    id
                }
                NewRoot::Peer(peer) => tree.arena.alloc(Node::new("", None, NodeKind::Mount(peer))),
            };
            let old = std::mem::replace(&mut tree.root, id);
            tree.free_subtree(old, &mut freed);
        }
        tracing::debug!(released = freed.len(), "namespace root replaced");
        Ok(())
    }
}
