//! Lexical path cleaning.
//!
//! Paths are cleaned purely lexically, with no filesystem access, using the
//! Plan 9 rules: repeated slashes collapse, `.` segments vanish, and `..`
//! removes the segment before it. A `..` that has nothing left to remove is
//! dropped in a rooted path (`/..` is `/`) and kept verbatim in a relative
//! one (`../..` stays as written).

use crate::error::{NsError, NsResult};

/// Longest path, in bytes, including the terminator a C caller would add.
pub const PATH_MAX: usize = 4096;

/// Longest single path segment, in bytes.
pub const NAME_MAX: usize = 255;

/// Result of cleaning a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanPath {
    /// Canonical lexical form. Never empty.
    pub path: String,
    /// True when the input can only name a directory: it ended in `/`, or
    /// its last step was a `.` or `..`.
    pub is_dir: bool,
}

impl CleanPath {
    fn dot() -> Self {
        Self {
            path: ".".to_string(),
            is_dir: true,
        }
    }

    /// Returns true if this path starts at `/`.
    pub fn is_rooted(&self) -> bool {
        self.path.starts_with('/')
    }

    /// The path with its leading `/` removed, or `.` for the root itself.
    pub fn relative(&self) -> &str {
        match self.path.trim_start_matches('/') {
            "" => ".",
            rest => rest,
        }
    }
}

/// Clean `input` lexically.
///
/// Fails with [`NsError::BadPath`] when the input does not fit in
/// [`PATH_MAX`] (leaving room for a terminator).
pub fn clean(input: &str) -> NsResult<CleanPath> {
    if input.is_empty() {
        return Ok(CleanPath::dot());
    }
    if input.len() > PATH_MAX - 1 {
        return Err(NsError::bad_path(format!(
            "path of {} bytes exceeds {}",
            input.len(),
            PATH_MAX - 1
        )));
    }

    let rooted = input.starts_with('/');
    let mut out = String::with_capacity(input.len());
    if rooted {
        out.push('/');
    }
    // Everything before `floor` is irreducible: the root slash, or a run
    // of leading `..` in a relative path.
    let mut floor = out.len();
    let mut is_dir = rooted;

    for segment in input.split('/') {
        match segment {
            "" => {}
            "." => is_dir = true,
            ".." => {
                is_dir = true;
                if out.len() > floor {
                    let cut = out[floor..].rfind('/').map_or(floor, |i| floor + i);
                    out.truncate(cut);
                } else if !rooted {
                    if !out.is_empty() {
                        out.push('/');
                    }
                    out.push_str("..");
                    floor = out.len();
                }
            }
            name => {
                if !(out.is_empty() || out == "/") {
                    out.push('/');
                }
                out.push_str(name);
                is_dir = false;
            }
        }
        if out.len() > PATH_MAX - 1 {
            return Err(NsError::bad_path(input));
        }
    }

    if input.ends_with('/') {
        is_dir = true;
    }
    if out.is_empty() {
        return Ok(CleanPath::dot());
    }
    Ok(CleanPath { path: out, is_dir })
}

/// Iterate over the non-empty `/`-separated segments of `path`.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Check a single segment against [`NAME_MAX`].
pub fn check_name(name: &str) -> NsResult<()> {
    if name.len() > NAME_MAX {
        return Err(NsError::bad_path(format!(
            "segment of {} bytes exceeds {}",
            name.len(),
            NAME_MAX
        )));
    }
    Ok(())
}

/// Resolve `path` against `base` lexically.
///
/// A rooted `path` ignores `base`. The result is cleaned.
pub fn join(base: &str, path: &str) -> NsResult<CleanPath> {
    if path.starts_with('/') {
        return clean(path);
    }
    let mut joined = String::with_capacity(base.len() + path.len() + 1);
    joined.push_str(base);
    joined.push('/');
    joined.push_str(path);
    clean(&joined)
}
