//! Peer implementations.

mod memory;

pub use memory::{MemoryDir, MemoryFile, MemoryPeer};
