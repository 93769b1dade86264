//! Path resolution and per-process descriptor state.
//!
//! [`IoContext`] ties a [`Namespace`] to a descriptor table and the two
//! implicit bases a POSIX layer needs: the root and the current directory.
//! Every open follows the same steps:
//!
//! 1. pick a base (root for `/…`, an explicit directory, or the cwd)
//! 2. clean the path
//! 3. reject file-only access to a path that can only be a directory
//! 4. walk the namespace from the base
//! 5. open locally, or forward the remainder to the mount's peer
//! 6. register the result in the descriptor table
//!
//! Steps 1 to 4 never leave the process, so a locally invalid path costs no
//! round-trip. Step 5 runs without any namespace or table lock held.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{NsError, NsResult};
use crate::fdtable::{Fd, FdTable, MAX_FD, Reservation, Slot};
use crate::namespace::{Namespace, NewRoot};
use crate::object::ObjectRef;
use crate::path;
use crate::types::{DirCursor, DirEntry, OpenFlags};

/// `getcwd` answer after `fchdir` to a descriptor whose path is not known.
pub const UNKNOWN_CWD: &str = "(unknown)";

/// Where a relative path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    /// The namespace root.
    Root,
    /// The current directory.
    Cwd,
    /// An open directory descriptor.
    Dir(Fd),
}

#[derive(Debug)]
struct Cwd {
    slot: Slot<ObjectRef>,
    path: String,
}

/// Resolver state for one process: a namespace, its open descriptors, and
/// the root and current-directory connections.
#[derive(Debug)]
pub struct IoContext {
    ns: Arc<Namespace>,
    fds: FdTable<ObjectRef>,
    root: Mutex<Slot<ObjectRef>>,
    cwd: Mutex<Cwd>,
}

impl IoContext {
    /// Create a context over `ns` with a full-size descriptor table.
    pub fn new(ns: Arc<Namespace>) -> NsResult<Self> {
        Self::with_capacity(ns, MAX_FD)
    }

    /// Create a context over `ns` with `capacity` descriptors.
    ///
    /// Opens the namespace root, which contacts the root peer if the root is
    /// a mount.
    pub fn with_capacity(ns: Arc<Namespace>, capacity: usize) -> NsResult<Self> {
        let fds = FdTable::with_capacity(capacity)?;
        let root_obj = ns.open_root()?;

        let mut root = Slot::new();
        root.replace(Arc::clone(&root_obj));
        let mut cwd = Slot::new();
        cwd.replace(root_obj);

        Ok(Self {
            ns,
            fds,
            root: Mutex::new(root),
            cwd: Mutex::new(Cwd {
                slot: cwd,
                path: "/".to_string(),
            }),
        })
    }

    /// The namespace this context resolves against.
    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.ns
    }

    /// The descriptor table.
    pub fn fds(&self) -> &FdTable<ObjectRef> {
        &self.fds
    }

    fn root_obj(&self) -> NsResult<ObjectRef> {
        self.root
            .lock()
            .get()
            .ok_or_else(|| NsError::not_found("no root directory"))
    }

    fn cwd_obj(&self) -> NsResult<ObjectRef> {
        self.cwd
            .lock()
            .slot
            .get()
            .ok_or_else(|| NsError::not_found("no current directory"))
    }

    fn lookup(&self, fd: Fd) -> NsResult<ObjectRef> {
        self.fds
            .lookup(fd)
            .ok_or_else(|| NsError::invalid_args(format!("descriptor {fd} is not open")))
    }

    /// Resolve `path` from `base` to an opened object.
    ///
    /// A rooted path always starts at the root, whatever `base` says. A
    /// cwd-relative path that climbs out of the cwd is joined onto the
    /// lexical cwd path and resolved from the root, since peers refuse `..`
    /// above their own root.
    fn resolve(&self, base: Base, path: &str, flags: OpenFlags) -> NsResult<ObjectRef> {
        let cleaned = path::clean(path)?;
        if flags.requires_file() && cleaned.is_dir {
            return Err(NsError::not_a_file(cleaned.path));
        }

        let climbs = cleaned.path == ".." || cleaned.path.starts_with("../");
        let (base_obj, rel) = if cleaned.is_rooted() {
            (self.root_obj()?, cleaned.relative().to_string())
        } else if climbs && base == Base::Cwd && self.getcwd() != UNKNOWN_CWD {
            let full = path::join(&self.getcwd(), &cleaned.path)?;
            (self.root_obj()?, full.relative().to_string())
        } else {
            let obj = match base {
                Base::Root => self.root_obj()?,
                Base::Cwd => self.cwd_obj()?,
                Base::Dir(fd) => self.lookup(fd)?,
            };
            (obj, cleaned.path)
        };
        base_obj.open(&rel, flags)
    }

    /// Resolve `path` without registering a descriptor.
    #[tracing::instrument(skip(self), name = "resolver.connect")]
    pub fn connect(&self, path: &str, flags: OpenFlags) -> NsResult<ObjectRef> {
        self.resolve(Base::Cwd, path, flags)
    }

    /// Open `path` relative to the cwd (or the root, if rooted).
    #[tracing::instrument(skip(self), name = "resolver.open")]
    pub fn open(&self, path: &str, flags: OpenFlags) -> NsResult<Fd> {
        let obj = self.resolve(Base::Cwd, path, flags)?;
        self.register(obj)
    }

    /// Open `path` relative to the directory open at `dirfd`.
    #[tracing::instrument(skip(self), name = "resolver.openat")]
    pub fn openat(&self, dirfd: Fd, path: &str, flags: OpenFlags) -> NsResult<Fd> {
        let obj = self.resolve(Base::Dir(dirfd), path, flags)?;
        self.register(obj)
    }

    /// Reserve a descriptor ahead of a two-phase open.
    pub fn reserve(&self, min: usize) -> NsResult<Reservation<'_, ObjectRef>> {
        self.fds.reserve(min)
    }

    /// Two-phase open into an already reserved descriptor.
    ///
    /// The reservation is always consumed: it is filled on success and
    /// released on any failure.
    #[tracing::instrument(skip(self), name = "resolver.open_reserved")]
    pub fn open_reserved(
        &self,
        reservation: Reservation<'_, ObjectRef>,
        base: Base,
        path: &str,
        flags: OpenFlags,
    ) -> NsResult<Fd> {
        match self.resolve(base, path, flags) {
            Ok(obj) => self.fds.assign(reservation, obj),
            Err(e) => {
                let fd = reservation.fd();
                if let Err(release) = self.fds.unreserve(reservation) {
                    tracing::debug!(%fd, error = %release, "reservation already gone");
                }
                Err(e)
            }
        }
    }

    fn register(&self, obj: ObjectRef) -> NsResult<Fd> {
        match self.fds.bind(Arc::clone(&obj)) {
            Ok(fd) => Ok(fd),
            Err(e) => {
                if let Err(close) = obj.close() {
                    tracing::debug!(error = %close, "close after failed registration");
                }
                Err(e)
            }
        }
    }

    /// Open the namespace root as a descriptor.
    pub fn opendir_root(&self) -> NsResult<Fd> {
        let obj = self.root_obj()?;
        self.fds.bind(obj)
    }

    /// Change the current directory.
    ///
    /// The new cwd path is kept lexically, so [`IoContext::getcwd`] never
    /// needs a remote call.
    #[tracing::instrument(skip(self), name = "resolver.chdir")]
    pub fn chdir(&self, path: &str) -> NsResult<()> {
        let obj = self.resolve(Base::Cwd, path, OpenFlags::directory())?;
        if !obj.kind().is_dir() {
            return Err(NsError::not_supported(format!("chdir to {path}: not a directory")));
        }

        let mut cwd = self.cwd.lock();
        let next = if cwd.path == UNKNOWN_CWD && !path.starts_with('/') {
            UNKNOWN_CWD.to_string()
        } else {
            path::join(&cwd.path, path)?.path
        };
        cwd.slot.replace(obj);
        cwd.path = next;
        Ok(())
    }

    /// Change the current directory to the directory open at `fd`.
    #[tracing::instrument(skip(self), name = "resolver.fchdir")]
    pub fn fchdir(&self, fd: Fd) -> NsResult<()> {
        let obj = self.lookup(fd)?;
        if !obj.kind().is_dir() {
            return Err(NsError::not_supported(format!("fchdir to {fd}: not a directory")));
        }
        let mut cwd = self.cwd.lock();
        cwd.slot.replace(obj);
        cwd.path = UNKNOWN_CWD.to_string();
        Ok(())
    }

    /// The current directory's lexical path.
    pub fn getcwd(&self) -> String {
        self.cwd.lock().path.clone()
    }

    /// Read the next entry of the directory open at `fd`.
    pub fn readdir(&self, fd: Fd, cursor: &mut DirCursor) -> NsResult<Option<DirEntry>> {
        self.lookup(fd)?.readdir(cursor)
    }

    /// Close `fd`. The object's own close runs once no other reference to
    /// it remains.
    #[tracing::instrument(skip(self), name = "resolver.close")]
    pub fn close(&self, fd: Fd) -> NsResult<()> {
        match self.fds.unbind_if_last(fd, is_last)? {
            Some(obj) => obj.close(),
            None => Ok(()),
        }
    }

    /// Duplicate `fd` into the lowest free descriptor.
    pub fn dup(&self, fd: Fd) -> NsResult<Fd> {
        self.fds.dup(fd)
    }

    /// Duplicate `fd` onto `newfd`, closing whatever `newfd` held.
    #[tracing::instrument(skip(self), name = "resolver.dup2")]
    pub fn dup2(&self, fd: Fd, newfd: Fd) -> NsResult<Fd> {
        let obj = self.lookup(fd)?;
        if fd == newfd {
            return Ok(newfd);
        }
        if let Some(displaced) = self.fds.replace_if_last(newfd, obj, is_last)? {
            displaced.close()?;
        }
        Ok(newfd)
    }

    /// Mount the peer behind the remote directory open at `fd` at `path`.
    #[tracing::instrument(skip(self), name = "resolver.bind_fd")]
    pub fn bind_fd(&self, path: &str, fd: Fd) -> NsResult<()> {
        let peer = self.lookup(fd)?.as_peer()?;
        self.ns.bind(path, peer)
    }

    /// Make the directory open at `fd` the namespace root.
    ///
    /// A local directory of this namespace is promoted in place; anything
    /// else is cloned into a peer and mounted as the new root. The root
    /// connection is reopened afterwards; the cwd is left alone.
    #[tracing::instrument(skip(self), name = "resolver.set_root")]
    pub fn set_namespace_root(&self, fd: Fd) -> NsResult<()> {
        let obj = self.lookup(fd)?;
        let new_root = match obj.local_node() {
            Some((ns, node)) if Arc::ptr_eq(&ns, &self.ns) => NewRoot::Node(node),
            _ => NewRoot::Peer(obj.as_peer()?),
        };
        self.ns.set_root(new_root)?;

        let root = self.ns.open_root()?;
        self.root.lock().replace(root);
        Ok(())
    }
}

/// True when the reference just taken out of the table is the only one.
fn is_last(obj: &ObjectRef) -> bool {
    Arc::strong_count(obj) == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryPeer;
    use crate::error::RemoteError;
    use crate::object::FileObject;
    use crate::peer::{Peer, PeerHandle, PeerInfo};
    use crate::types::FileType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fresh file per open and counts how many get closed.
    #[derive(Debug, Default)]
    struct ClosingPeer {
        closes: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct Tracked {
        closes: Arc<AtomicUsize>,
    }

    impl FileObject for Tracked {
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
            Ok(Arc::new(Tracked {
                closes: Arc::clone(&self.closes),
            }))
        }

        fn duplicate(&self) -> Result<PeerHandle, RemoteError> {
            Ok(Arc::new(ClosingPeer {
                closes: Arc::clone(&self.closes),
            }))
        }

        fn describe(&self) -> PeerInfo {
            PeerInfo {
                name: "closing".to_string(),
                kind: FileType::Directory,
            }
        }
    }

    fn closing_context(capacity: usize) -> (IoContext, Arc<AtomicUsize>) {
        let peer = ClosingPeer::default();
        let closes = Arc::clone(&peer.closes);
        let ns = Namespace::new();
        ns.bind("/c", Arc::new(peer)).unwrap();
        (IoContext::with_capacity(ns, capacity).unwrap(), closes)
    }

    fn context() -> IoContext {
        let ns = Namespace::new();
        let svc = MemoryPeer::new("svc")
            .with_file("logger", b"log line")
            .with_file("pkg/bin/tool", b"#!");
        ns.bind("/svc", Arc::new(svc)).unwrap();
        ns.bind("/data/cache", Arc::new(MemoryPeer::new("cache"))).unwrap();
        IoContext::with_capacity(ns, 16).unwrap()
    }

    fn list(ctx: &IoContext, fd: Fd) -> Vec<String> {
        let mut cursor = DirCursor::new();
        let mut names = Vec::new();
        while let Some(entry) = ctx.readdir(fd, &mut cursor).unwrap() {
            names.push(entry.name);
        }
        names
    }

    #[test]
    fn test_open_remote_file() {
        let ctx = context();
        let fd = ctx.open("/svc/logger", OpenFlags::read()).unwrap();
        let obj = ctx.fds().lookup(fd).unwrap();
        assert_eq!(obj.kind(), FileType::File);
        assert_eq!(obj.read(0, 3).unwrap(), b"log");
    }

    #[test]
    fn test_open_local_directory() {
        let ctx = context();
        let fd = ctx.open("/data", OpenFlags::read()).unwrap();
        assert_eq!(list(&ctx, fd), vec![".", "cache"]);
    }

    #[test]
    fn test_missing_and_bad_paths() {
        let ctx = context();
        assert!(matches!(ctx.open("/nonexistent", OpenFlags::read()), Err(NsError::NotFound(_))));
        assert!(matches!(
            ctx.open("/svc/missing", OpenFlags::read()),
            Err(NsError::Remote(_))
        ));
        let long = "x".repeat(path::PATH_MAX);
        assert!(matches!(ctx.open(&long, OpenFlags::read()), Err(NsError::BadPath(_))));
    }

    #[test]
    fn test_directory_intent_rejected() {
        let ctx = context();
        assert!(matches!(ctx.open("/svc/logger/", OpenFlags::write()), Err(NsError::NotAFile(_))));
        assert!(matches!(ctx.open("/data", OpenFlags::write()), Err(NsError::NotAFile(_))));
        assert_eq!(ctx.fds().occupied(), 0);
    }

    #[test]
    fn test_rooted_dotdot_collapses() {
        let ctx = context();
        let fd = ctx.open("/../../svc/logger", OpenFlags::read()).unwrap();
        assert!(ctx.fds().lookup(fd).is_some());
    }

    #[test]
    fn test_openat_and_chdir() {
        let ctx = context();
        let svc = ctx.open("/svc", OpenFlags::directory()).unwrap();
        assert!(ctx.openat(svc, "pkg/bin/tool", OpenFlags::read()).is_ok());

        ctx.chdir("/svc/pkg").unwrap();
        assert_eq!(ctx.getcwd(), "/svc/pkg");
        assert!(ctx.open("bin/tool", OpenFlags::read()).is_ok());

        ctx.chdir("../..").unwrap();
        assert_eq!(ctx.getcwd(), "/");
        assert!(matches!(ctx.chdir("/svc/logger"), Err(NsError::Remote(_))));
        assert!(matches!(
            ctx.openat(Fd::from_raw(9), "x", OpenFlags::read()),
            Err(NsError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_fchdir_loses_path() {
        let ctx = context();
        let fd = ctx.open("/data", OpenFlags::directory()).unwrap();
        ctx.fchdir(fd).unwrap();
        assert_eq!(ctx.getcwd(), UNKNOWN_CWD);
        assert!(ctx.connect("cache", OpenFlags::directory()).is_ok());
        ctx.chdir("/").unwrap();
        assert_eq!(ctx.getcwd(), "/");
    }

    #[test]
    fn test_open_reserved_releases_on_failure() {
        let ctx = context();
        let r = ctx.reserve(3).unwrap();
        assert_eq!(r.fd(), Fd::from_raw(3));
        assert!(ctx.open_reserved(r, Base::Root, "nope", OpenFlags::read()).is_err());

        let r = ctx.reserve(3).unwrap();
        assert_eq!(r.fd(), Fd::from_raw(3));
        let fd = ctx.open_reserved(r, Base::Root, "svc/logger", OpenFlags::read()).unwrap();
        assert_eq!(fd, Fd::from_raw(3));
    }

    #[test]
    fn test_dup_dup2_close() {
        let ctx = context();
        let a = ctx.open("/svc/logger", OpenFlags::read()).unwrap();
        let b = ctx.dup(a).unwrap();
        assert_ne!(a, b);

        let dir = ctx.opendir_root().unwrap();
        assert_eq!(ctx.dup2(a, dir).unwrap(), dir);
        assert_eq!(ctx.fds().lookup(dir).unwrap().kind(), FileType::File);

        ctx.close(a).unwrap();
        assert!(matches!(ctx.close(a), Err(NsError::InvalidArgs(_))));
        assert_eq!(ctx.fds().occupied(), 2);
    }

    #[test]
    fn test_bind_fd_mounts_remote_directory() {
        let ctx = context();
        let bin = ctx.open("/svc/pkg/bin", OpenFlags::directory()).unwrap();
        ctx.bind_fd("/bin", bin).unwrap();
        assert!(ctx.namespace().is_bound("/bin"));
        assert!(ctx.open("/bin/tool", OpenFlags::read()).is_ok());

        let local = ctx.open("/data", OpenFlags::directory()).unwrap();
        assert!(matches!(ctx.bind_fd("/d2", local), Err(NsError::NotSupported(_))));
    }

    #[test]
    fn test_set_namespace_root_local_and_remote() {
        let ctx = context();
        let data = ctx.open("/data", OpenFlags::directory()).unwrap();
        ctx.set_namespace_root(data).unwrap();
        assert!(ctx.namespace().is_bound("/cache"));
        assert!(ctx.open("/cache", OpenFlags::directory()).is_ok());
        assert!(matches!(ctx.open("/svc", OpenFlags::read()), Err(NsError::NotFound(_))));

        let cache = ctx.open("/cache", OpenFlags::directory()).unwrap();
        ctx.set_namespace_root(cache).unwrap();
        assert!(ctx.namespace().is_bound("/"));
        assert_eq!(ctx.namespace().node_count(), 1);
    }

    #[test]
    fn test_close_runs_once_for_last_descriptor() {
        let (ctx, closes) = closing_context(8);
        let a = ctx.open("/c/x", OpenFlags::read()).unwrap();
        let b = ctx.dup(a).unwrap();

        ctx.close(a).unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        ctx.close(b).unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dup2_closes_displaced_object() {
        let (ctx, closes) = closing_context(8);
        let x = ctx.open("/c/x", OpenFlags::read()).unwrap();
        let y = ctx.open("/c/y", OpenFlags::read()).unwrap();

        assert_eq!(ctx.dup2(x, y).unwrap(), y);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Same object on both sides now; only the last close counts.
        assert_eq!(ctx.dup2(x, y).unwrap(), y);
        ctx.close(x).unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        ctx.close(y).unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_registration_closes_object() {
        let (ctx, closes) = closing_context(2);
        ctx.open("/c/a", OpenFlags::read()).unwrap();
        ctx.open("/c/b", OpenFlags::read()).unwrap();

        assert_eq!(ctx.open("/c/c", OpenFlags::read()), Err(NsError::Exhausted));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.fds().occupied(), 2);
    }

    #[test]
    fn test_dropped_reservation_is_released() {
        let ctx = context();
        {
            let r = ctx.reserve(0).unwrap();
            assert_eq!(r.fd(), Fd::from_raw(0));
        }
        assert_eq!(ctx.reserve(0).unwrap().fd(), Fd::from_raw(0));
        assert_eq!(ctx.open("/svc/logger", OpenFlags::read()).unwrap(), Fd::from_raw(0));
    }
}
