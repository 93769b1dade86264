//! Opened objects.
//!
//! Everything a descriptor can refer to implements [`FileObject`]. Most
//! operations have a default that reports [`NsError::NotSupported`], so an
//! object only implements what its kind can actually do.

use std::fmt;
use std::sync::Arc;

use crate::error::{NsError, NsResult};
use crate::namespace::{Namespace, NodeId};
use crate::peer::PeerHandle;
use crate::types::{DirCursor, DirEntry, FileType, NodeAttr, OpenFlags};

/// Shared reference to an opened object.
pub type ObjectRef = Arc<dyn FileObject>;

/// An opened object: a local namespace directory, or whatever a peer
/// handed back.
pub trait FileObject: Send + Sync + fmt::Debug {
    /// What kind of object this is.
    fn kind(&self) -> FileType;

    /// Open `path` relative to this object.
    ///
    /// `path` is relative and cleaned; `.` reopens the object itself.
    fn open(&self, path: &str, _flags: OpenFlags) -> NsResult<ObjectRef> {
        Err(NsError::not_supported(format!("open {path} on a {}", self.kind())))
    }

    /// Return the next directory entry after `cursor`, advancing it.
    fn readdir(&self, _cursor: &mut DirCursor) -> NsResult<Option<DirEntry>> {
        Err(NsError::not_supported(format!("readdir on a {}", self.kind())))
    }

    /// Query attributes.
    fn attr(&self) -> NsResult<NodeAttr> {
        Err(NsError::not_supported(format!("attr on a {}", self.kind())))
    }

    /// Read up to `len` bytes starting at `offset`.
    fn read(&self, _offset: u64, _len: usize) -> NsResult<Vec<u8>> {
        Err(NsError::not_supported(format!("read on a {}", self.kind())))
    }

    /// Clone a peer connection that serves this object.
    fn as_peer(&self) -> NsResult<PeerHandle> {
        Err(NsError::not_supported(format!("peer clone of a {}", self.kind())))
    }

    /// The namespace node behind this object, if it is a local directory.
    fn local_node(&self) -> Option<(Arc<Namespace>, NodeId)> {
        None
    }

    /// Called when the last descriptor for this object is closed.
    fn close(&self) -> NsResult<()> {
        Ok(())
    }
}
