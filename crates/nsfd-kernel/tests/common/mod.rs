//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nsfd_kernel::{
    FileObject, FileType, MemoryPeer, NsResult, ObjectRef, OpenFlags, Peer, PeerHandle, PeerInfo,
    RemoteError,
};

/// A [`MemoryPeer`] that counts every call made to it.
///
/// Duplicates share the counters, so a mount exported and rebuilt elsewhere
/// still reports into the same totals.
#[derive(Debug, Clone)]
pub struct CountingPeer {
    inner: MemoryPeer,
    opens: Arc<AtomicUsize>,
    duplicates: Arc<AtomicUsize>,
    last_path: Arc<parking_lot::Mutex<Option<String>>>,
}

impl CountingPeer {
    pub fn new(inner: MemoryPeer) -> Self {
        Self {
            inner,
            opens: Arc::new(AtomicUsize::new(0)),
            duplicates: Arc::new(AtomicUsize::new(0)),
            last_path: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }

    /// The path of the most recent forwarded open.
    pub fn last_path(&self) -> Option<String> {
        self.last_path.lock().clone()
    }

    pub fn handle(&self) -> PeerHandle {
        Arc::new(self.clone())
    }
}

impl Peer for CountingPeer {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<ObjectRef, RemoteError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_path.lock() = Some(path.to_string());
        self.inner.open(path, flags)
    }

    fn duplicate(&self) -> Result<PeerHandle, RemoteError> {
        self.duplicates.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }

    fn describe(&self) -> PeerInfo {
        self.inner.describe()
    }
}

/// Serves a fresh file per open and counts how many of them get closed.
#[derive(Debug, Clone, Default)]
pub struct ClosingPeer {
    closes: Arc<AtomicUsize>,
}

impl ClosingPeer {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> PeerHandle {
        Arc::new(self.clone())
    }
}

#[derive(Debug)]
struct TrackedFile {
    closes: Arc<AtomicUsize>,
}

impl FileObject for TrackedFile {
    fn kind(&self) -> FileType {
        FileType::File
    }

    fn close(&self) -> NsResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Peer for ClosingPeer {
    fn open(&self, _path: &str, _flags: OpenFlags) -> Result<ObjectRef, RemoteError> {
        Ok(Arc::new(TrackedFile {
            closes: Arc::clone(&self.closes),
        }))
    }

    fn duplicate(&self) -> Result<PeerHandle, RemoteError> {
        Ok(Arc::new(self.clone()))
    }

    fn describe(&self) -> PeerInfo {
        PeerInfo {
            name: "closing".to_string(),
            kind: FileType::Directory,
        }
    }
}
