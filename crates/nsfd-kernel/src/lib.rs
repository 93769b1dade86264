//! # nsfd-kernel
//!
//! Process-local namespace and descriptor core.
//!
//! A namespace is a tree of in-memory directories whose leaves are mounts,
//! each bound to a remote file-serving peer. A process resolves paths
//! against its namespace:
//! - Lexically cleans every path before touching the tree
//! - Walks local directories in memory, with no remote call
//! - Forwards the unconsumed remainder to the peer at the first mount
//! - Registers whatever comes back in a fixed-capacity descriptor table
//! - Can export its namespace as a flat list for a child process

pub mod backends;
pub mod config;
mod error;
pub mod fdtable;
pub mod namespace;
mod object;
pub mod path;
mod peer;
pub mod resolver;
mod types;

pub use backends::{MemoryDir, MemoryFile, MemoryPeer};
pub use config::{ConfigError, MountSpec, NamespaceConfig};
pub use error::{NsError, NsResult, RemoteError};
pub use fdtable::{Fd, FdTable, MAX_FD, Reservation, Slot, SlotToken};
pub use namespace::{ExportEntry, FlatNamespace, LocalDir, Namespace, NewRoot, NodeId, Walked};
pub use object::{FileObject, ObjectRef};
pub use path::{CleanPath, NAME_MAX, PATH_MAX, clean};
pub use peer::{Peer, PeerHandle, PeerInfo};
pub use resolver::{Base, IoContext, UNKNOWN_CWD};
pub use types::{DirCursor, DirEntry, FileType, NodeAttr, OpenFlags};
