//! Namespace tree.
//!
//! - [`Namespace`] - the tree itself: walk, bind, unbind, readdir, root swap
//! - [`LocalDir`] - connection object for an interior directory
//! - [`FlatNamespace`] - exported snapshot of every mount
//!
//! ## Design Decisions
//!
//! - **Arena, not pointers**: nodes live in a slab addressed by
//!   generation-tagged [`NodeId`]s. Parents own children by id; children
//!   name parents by id.
//! - **Mounts are leaves**: nothing can be bound beneath a mount, and
//!   nothing can be bound where a node already exists.
//! - **One lock, never across I/O**: walks hand back a cloned peer handle
//!   and the caller talks to the peer after the lock is dropped.

mod export;
mod local;
mod node;
mod tree;

pub use export::{ExportEntry, FlatNamespace};
pub use local::LocalDir;
pub use node::NodeId;
pub use tree::{Namespace, NewRoot, Walked};
