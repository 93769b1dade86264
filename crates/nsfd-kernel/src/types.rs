//! Core namespace types.
//!
//! These are the values that cross the boundary between the core and the
//! POSIX shims: open flags, directory entries and attributes.

use serde::{Deserialize, Serialize};

/// Object type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Anything a peer serves that is neither (a service endpoint).
    Service,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// Object attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttr {
    /// Object type.
    pub kind: FileType,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Unix permissions (e.g., 0o755).
    pub perm: u32,
}

impl NodeAttr {
    /// Attributes of a directory.
    pub fn directory() -> Self {
        Self {
            kind: FileType::Directory,
            size: 0,
            perm: 0o755,
        }
    }

    /// Attributes of a regular file.
    pub fn file(size: u64) -> Self {
        Self {
            kind: FileType::File,
            size,
            perm: 0o644,
        }
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Position in a directory listing.
///
/// Cursors remember the last insertion id handed out rather than an index,
/// so concurrent binds and unbinds never duplicate or skip a surviving
/// entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DirCursor {
    /// Nothing returned yet; `.` comes next.
    #[default]
    Start,
    /// Entries with ids up to and including this one have been returned.
    After(u64),
    /// Listing exhausted.
    Done,
}

impl DirCursor {
    /// Create a fresh cursor.
    pub fn new() -> Self {
        Self::Start
    }
}

/// Open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Create if not exists.
    pub create: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Target must be a directory.
    pub directory: bool,
    /// Target must not be a directory.
    pub not_directory: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            create: false,
            exclusive: false,
            truncate: false,
            directory: false,
            not_directory: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            write: true,
            ..Default::default()
        }
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Read-only access to something that must be a directory.
    pub fn directory() -> Self {
        Self {
            directory: true,
            ..Default::default()
        }
    }

    /// Returns true if these flags can only be satisfied by a file.
    ///
    /// Writing, creating or truncating a directory is never allowed, so a
    /// path that can only name a directory is rejected up front.
    pub fn requires_file(&self) -> bool {
        self.write || self.create || self.truncate || self.not_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert_eq!(FileType::Service.to_string(), "service");
    }

    #[test]
    fn test_dir_entry() {
        let file = DirEntry::file("test.txt");
        assert_eq!(file.name, "test.txt");
        assert!(file.kind.is_file());

        let dir = DirEntry::directory("subdir");
        assert!(dir.kind.is_dir());
    }

    #[test]
    fn test_open_flags() {
        assert!(!OpenFlags::read().requires_file());
        assert!(OpenFlags::write().requires_file());
        assert!(OpenFlags::create().requires_file());
        assert!(!OpenFlags::directory().requires_file());
    }
}
