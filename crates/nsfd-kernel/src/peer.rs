//! Remote peer seam.
//!
//! A peer is an out-of-process file server reached over some channel the
//! core never looks inside. All the core needs is to forward an open, clone
//! the connection, and ask the peer to describe itself.

use std::fmt;
use std::sync::Arc;

use crate::error::RemoteError;
use crate::object::ObjectRef;
use crate::types::{FileType, OpenFlags};

/// Shared handle to a peer connection.
pub type PeerHandle = Arc<dyn Peer>;

/// What a peer says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer-chosen label, for logs and listings.
    pub name: String,
    /// Type of the object at the peer's root.
    pub kind: FileType,
}

/// A connection to a remote file-serving peer.
///
/// Paths handed to [`Peer::open`] are relative to the peer's root and have
/// already been cleaned; `.` names the root itself. Calls may block.
pub trait Peer: Send + Sync + fmt::Debug {
    /// Open `path` on the peer.
    fn open(&self, path: &str, flags: OpenFlags) -> Result<ObjectRef, RemoteError>;

    /// Clone the connection.
    ///
    /// The returned handle is independent of `self`; dropping either leaves
    /// the other usable.
    fn duplicate(&self) -> Result<PeerHandle, RemoteError>;

    /// Describe the peer.
    fn describe(&self) -> PeerInfo;
}
