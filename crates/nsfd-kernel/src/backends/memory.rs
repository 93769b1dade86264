//! In-memory file-serving peer.
//!
//! Used for testing and by the CLI. All data is ephemeral and shared between
//! a peer and every connection duplicated from it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{NsError, NsResult, RemoteError};
use crate::object::{FileObject, ObjectRef};
use crate::path::{self, segments};
use crate::peer::{Peer, PeerHandle, PeerInfo};
use crate::types::{DirCursor, DirEntry, FileType, NodeAttr, OpenFlags};

const ENOENT: i32 = -libc::ENOENT;
const EACCES: i32 = -libc::EACCES;
const EEXIST: i32 = -libc::EEXIST;
const ENOTDIR: i32 = -libc::ENOTDIR;
const EISDIR: i32 = -libc::EISDIR;

/// Entry in the memory store.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8> },
    Directory,
}

type Store = Arc<RwLock<HashMap<String, Entry>>>;

/// Key for `rel` under `base`. Both are store keys; the root is `""`.
fn child_key(base: &str, rel: &str) -> String {
    match (base, rel) {
        (_, ".") => base.to_string(),
        ("", _) => rel.to_string(),
        _ => format!("{base}/{rel}"),
    }
}

/// A cleaned relative path that climbs above where it starts.
fn escapes(path: &str) -> bool {
    path == ".." || path.starts_with("../")
}

fn parent_key(key: &str) -> &str {
    key.rfind('/').map_or("", |i| &key[..i])
}

/// In-memory peer.
///
/// Thread-safe via internal `RwLock`. Paths are store keys relative to the
/// peer's root directory.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    name: String,
    root: String,
    store: Store,
}

impl MemoryPeer {
    /// Create a peer serving an empty directory.
    pub fn new(name: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(String::new(), Entry::Directory);
        Self {
            name: name.into(),
            root: String::new(),
            store: Arc::new(RwLock::new(entries)),
        }
    }

    /// Builder form of [`MemoryPeer::add_file`].
    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        // Builder inputs are literals; a bad one just leaves the file out.
        if let Err(e) = self.add_file(path, data) {
            tracing::warn!(peer = %self.name, path, error = %e, "skipping seed file");
        }
        self
    }

    /// Create or overwrite a file, creating parent directories as needed.
    pub fn add_file(&self, path: &str, data: &[u8]) -> NsResult<()> {
        let key = self.key_for(path)?;
        if key == self.root {
            return Err(NsError::invalid_args("cannot replace the root with a file"));
        }
        let mut entries = self.store.write();
        Self::ensure_parents(&mut entries, &key)?;
        if let Some(Entry::Directory) = entries.get(&key) {
            return Err(NsError::already_exists(key));
        }
        entries.insert(key, Entry::File { data: data.to_vec() });
        Ok(())
    }

    /// Create a directory and its parents.
    pub fn mkdir(&self, path: &str) -> NsResult<()> {
        let key = self.key_for(path)?;
        let mut entries = self.store.write();
        Self::ensure_parents(&mut entries, &key)?;
        match entries.get(&key) {
            Some(Entry::File { .. }) => Err(NsError::already_exists(key)),
            Some(Entry::Directory) => Ok(()),
            None => {
                entries.insert(key, Entry::Directory);
                Ok(())
            }
        }
    }

    /// Clean a caller path into a store key under this peer's root.
    fn key_for(&self, path: &str) -> NsResult<String> {
        let cleaned = path::clean(path.trim_start_matches('/'))?;
        if escapes(&cleaned.path) {
            return Err(NsError::invalid_args(format!("{path} escapes the peer root")));
        }
        Ok(child_key(&self.root, &cleaned.path))
    }

    /// Ensure all parent directories of `key` exist.
    fn ensure_parents(entries: &mut HashMap<String, Entry>, key: &str) -> NsResult<()> {
        let mut current = String::new();
        let parent = parent_key(key);
        for seg in segments(parent) {
            current = child_key(&current, seg);
            match entries.entry(current.clone()).or_insert(Entry::Directory) {
                Entry::Directory => {}
                Entry::File { .. } => {
                    return Err(NsError::not_supported(format!("{current} is a file")));
                }
            }
        }
        Ok(())
    }

    fn rooted_at(&self, key: String) -> Self {
        Self {
            name: self.name.clone(),
            root: key,
            store: Arc::clone(&self.store),
        }
    }
}

impl Peer for MemoryPeer {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<ObjectRef, RemoteError> {
        let cleaned = path::clean(path).map_err(|e| RemoteError::new(e.errno(), e.to_string()))?;
        if cleaned.is_rooted() || escapes(&cleaned.path) {
            return Err(RemoteError::new(EACCES, format!("{path} escapes the peer root")));
        }
        let key = child_key(&self.root, &cleaned.path);

        let mut entries = self.store.write();
        let is_dir = entries.get(&key).map(|e| matches!(e, Entry::Directory));
        match is_dir {
            Some(_) if flags.create && flags.exclusive => {
                Err(RemoteError::new(EEXIST, format!("{path} exists")))
            }
            Some(true) => {
                if flags.requires_file() {
                    return Err(RemoteError::new(EISDIR, format!("{path} is a directory")));
                }
                Ok(Arc::new(MemoryDir {
                    peer: self.rooted_at(key),
                }))
            }
            Some(false) => {
                if flags.directory || cleaned.is_dir {
                    return Err(RemoteError::new(ENOTDIR, format!("{path} is not a directory")));
                }
                if flags.truncate && flags.write {
                    if let Some(Entry::File { data }) = entries.get_mut(&key) {
                        data.clear();
                    }
                }
                Ok(Arc::new(MemoryFile {
                    store: Arc::clone(&self.store),
                    key,
                }))
            }
            None if flags.create && !cleaned.is_dir => {
                match entries.get(parent_key(&key)) {
                    Some(Entry::Directory) => {}
                    Some(Entry::File { .. }) => {
                        let message = format!("parent of {path} is a file");
                        return Err(RemoteError::new(ENOTDIR, message));
                    }
                    None => {
                        let message = format!("parent of {path} not found");
                        return Err(RemoteError::new(ENOENT, message));
                    }
                }
                entries.insert(key.clone(), Entry::File { data: Vec::new() });
                Ok(Arc::new(MemoryFile {
                    store: Arc::clone(&self.store),
                    key,
                }))
            }
            None => Err(RemoteError::new(ENOENT, format!("{path} not found"))),
        }
    }

    fn duplicate(&self) -> Result<PeerHandle, RemoteError> {
        Ok(Arc::new(self.clone()))
    }

    fn describe(&self) -> PeerInfo {
        PeerInfo {
            name: self.name.clone(),
            kind: FileType::Directory,
        }
    }
}

/// Open directory on a [`MemoryPeer`].
#[derive(Debug)]
pub struct MemoryDir {
    peer: MemoryPeer,
}

impl MemoryDir {
    fn children(&self) -> Vec<DirEntry> {
        let entries = self.peer.store.read();
        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(key, _)| **key != self.peer.root && parent_key(key) == self.peer.root)
            .map(|(key, entry)| {
                let name = key.rsplit('/').next().unwrap_or(key);
                let kind = match entry {
                    Entry::File { .. } => FileType::File,
                    Entry::Directory => FileType::Directory,
                };
                DirEntry::new(name, kind)
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }
}

impl FileObject for MemoryDir {
    fn kind(&self) -> FileType {
        FileType::Directory
    }

    fn open(&self, path: &str, flags: OpenFlags) -> NsResult<ObjectRef> {
        Ok(self.peer.open(path, flags)?)
    }

    /// Entries come back sorted by name; the cursor counts entries already
    /// returned.
    fn readdir(&self, cursor: &mut DirCursor) -> NsResult<Option<DirEntry>> {
        let index = match *cursor {
            DirCursor::Start => 0,
            DirCursor::After(n) => n as usize,
            DirCursor::Done => return Ok(None),
        };
        match self.children().into_iter().nth(index) {
            Some(entry) => {
                *cursor = DirCursor::After(index as u64 + 1);
                Ok(Some(entry))
            }
            None => {
                *cursor = DirCursor::Done;
                Ok(None)
            }
        }
    }

    fn attr(&self) -> NsResult<NodeAttr> {
        Ok(NodeAttr::directory())
    }

    fn as_peer(&self) -> NsResult<PeerHandle> {
        Ok(Arc::new(self.peer.clone()))
    }
}

/// Open file on a [`MemoryPeer`].
#[derive(Debug)]
pub struct MemoryFile {
    store: Store,
    key: String,
}

impl FileObject for MemoryFile {
    fn kind(&self) -> FileType {
        FileType::File
    }

    fn attr(&self) -> NsResult<NodeAttr> {
        match self.store.read().get(&self.key) {
            Some(Entry::File { data }) => Ok(NodeAttr::file(data.len() as u64)),
            _ => Err(NsError::not_found(self.key.clone())),
        }
    }

    fn read(&self, offset: u64, len: usize) -> NsResult<Vec<u8>> {
        match self.store.read().get(&self.key) {
            Some(Entry::File { data }) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(data[start..end].to_vec())
            }
            _ => Err(NsError::not_found(self.key.clone())),
        }
    }
}
