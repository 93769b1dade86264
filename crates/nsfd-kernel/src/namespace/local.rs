//! Connections to local namespace directories.

use std::sync::Arc;

use super::node::NodeId;
use super::tree::Namespace;
use crate::error::{NsError, NsResult};
use crate::object::{FileObject, ObjectRef};
use crate::path;
use crate::types::{DirCursor, DirEntry, FileType, NodeAttr, OpenFlags};

/// An open interior directory of a [`Namespace`].
///
/// Holds the namespace alive for as long as the connection exists, so
/// further walks from this directory stay valid even if the namespace's
/// owner lets go of it.
#[derive(Debug, Clone)]
pub struct LocalDir {
    ns: Arc<Namespace>,
    node: NodeId,
}

impl LocalDir {
    /// Connect to `node` in `ns`.
    pub fn new(ns: Arc<Namespace>, node: NodeId) -> Self {
        Self { ns, node }
    }

    /// The node this connection points at.
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl FileObject for LocalDir {
    fn kind(&self) -> FileType {
        FileType::Directory
    }

    fn open(&self, path: &str, flags: OpenFlags) -> NsResult<ObjectRef> {
        let cleaned = path::clean(path)?;
        if cleaned.is_rooted() {
            return Err(NsError::invalid_args(format!("{path} is not relative")));
        }
        if flags.requires_file() && cleaned.is_dir {
            return Err(NsError::not_a_file(cleaned.path));
        }

        let walked = self.ns.walk(self.node, &cleaned.path)?;
        match walked.peer {
            Some(peer) => {
                tracing::trace!(
                    path = %cleaned.path,
                    remainder = %walked.remainder,
                    "forwarding open to peer"
                );
                Ok(peer.open(&walked.remainder, flags)?)
            }
            None if flags.requires_file() => Err(NsError::not_a_file(cleaned.path)),
            None => Ok(Arc::new(LocalDir::new(Arc::clone(&self.ns), walked.node))),
        }
    }

    fn readdir(&self, cursor: &mut DirCursor) -> NsResult<Option<DirEntry>> {
        self.ns.readdir(self.node, cursor)
    }

    fn attr(&self) -> NsResult<NodeAttr> {
        Ok(NodeAttr::directory())
    }

    fn local_node(&self) -> Option<(Arc<Namespace>, NodeId)> {
        Some((Arc::clone(&self.ns), self.node))
    }
}
