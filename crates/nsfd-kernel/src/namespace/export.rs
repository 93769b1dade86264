//! Flat export of a namespace.
//!
//! A snapshot of every mount as `(absolute path, cloned peer)`, suitable for
//! handing a copy of the namespace to a child process.

use std::sync::Arc;

use super::node::NodeId;
use super::tree::Namespace;
use crate::error::NsResult;
use crate::peer::PeerHandle;

/// One exported mount.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    /// Absolute path of the mount.
    pub path: String,
    /// Independent clone of the mount's peer connection.
    pub peer: PeerHandle,
}

/// Point-in-time list of mounts. Order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct FlatNamespace {
    entries: Vec<ExportEntry>,
}

impl FlatNamespace {
    /// Number of mounts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no mounts.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the mounts.
    pub fn iter(&self) -> impl Iterator<Item = &ExportEntry> {
        self.entries.iter()
    }

    /// Exported paths.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }

    /// Rebuild a namespace from this snapshot.
    pub fn into_namespace(self) -> NsResult<Arc<Namespace>> {
        let ns = Namespace::new();
        for entry in self.entries {
            ns.bind(&entry.path, entry.peer)?;
        }
        Ok(ns)
    }
}

impl IntoIterator for FlatNamespace {
    type Item = ExportEntry;
    type IntoIter = std::vec::IntoIter<ExportEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Namespace {
    /// Export every mount under `node` with paths made absolute from it.
    ///
    /// Peers are duplicated after the namespace lock is released.
    pub fn export_from(&self, node: NodeId) -> NsResult<FlatNamespace> {
        let mounts = self.enumerate(node)?;
        let mut entries = Vec::with_capacity(mounts.len());
        for (rel, peer) in mounts {
            let path = if rel == "." {
                "/".to_string()
            } else {
                format!("/{rel}")
            };
            entries.push(ExportEntry {
                path,
                peer: peer.duplicate()?,
            });
        }
        tracing::debug!(mounts = entries.len(), "exported namespace");
        Ok(FlatNamespace { entries })
    }

    /// Export the whole namespace.
    pub fn export(&self) -> NsResult<FlatNamespace> {
        self.export_from(self.root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryPeer;
    use crate::error::{NsError, RemoteError};
    use crate::object::ObjectRef;
    use crate::peer::{Peer, PeerInfo};
    use crate::types::{FileType, OpenFlags};

    #[derive(Debug)]
    struct Unclonable;

    impl Peer for Unclonable {
        fn open(&self, _path: &str, _flags: OpenFlags) -> Result<ObjectRef, RemoteError> {
            Err(RemoteError::new(-5, "io"))
        }

        fn duplicate(&self) -> Result<PeerHandle, RemoteError> {
            Err(RemoteError::new(-9, "channel closed"))
        }

        fn describe(&self) -> PeerInfo {
            PeerInfo {
                name: "unclonable".to_string(),
                kind: FileType::Service,
            }
        }
    }

    #[test]
    fn test_export_paths_are_absolute() {
        let ns = Namespace::new();
        ns.bind("/svc/a", Arc::new(MemoryPeer::new("a"))).unwrap();
        ns.bind("/data", Arc::new(MemoryPeer::new("d"))).unwrap();

        let flat = ns.export().unwrap();
        let mut paths = flat.paths();
        paths.sort();
        assert_eq!(paths, vec!["/data", "/svc/a"]);
    }

    #[test]
    fn test_export_root_mount() {
        let ns = Namespace::new();
        ns.bind("/", Arc::new(MemoryPeer::new("root"))).unwrap();
        assert_eq!(ns.export().unwrap().paths(), vec!["/"]);
    }

    #[test]
    fn test_export_round_trip_into_namespace() {
        let ns = Namespace::new();
        ns.bind("/a/b", Arc::new(MemoryPeer::new("b"))).unwrap();
        ns.bind("/c", Arc::new(MemoryPeer::new("c"))).unwrap();

        let copy = ns.export().unwrap().into_namespace().unwrap();
        assert!(copy.is_bound("/a/b"));
        assert!(copy.is_bound("/c"));

        // The copy does not track later changes to its source.
        ns.unbind("/c").unwrap();
        assert!(copy.is_bound("/c"));
    }

    #[test]
    fn test_export_duplicate_failure_passes_through() {
        let ns = Namespace::new();
        ns.bind("/x", Arc::new(Unclonable)).unwrap();
        let err = ns.export().unwrap_err();
        assert_eq!(err, NsError::Remote(RemoteError::new(-9, "channel closed")));
    }
}
