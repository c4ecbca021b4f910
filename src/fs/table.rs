//! File descriptor table and per-thread role views.
//!
//! The table is created once by the host and shared by `Arc` with every
//! worker. Descriptors come from a shared atomic counter, so threads opening
//! streams concurrently never collide. Descriptors are never reused: once the
//! counter reaches `Fd::MAX` the table refuses further opens. Entries are
//! never removed.
//!
//! A thread never touches the table directly. It goes through an [`FdView`]
//! whose [`RoleMap`] decides which table entry is "its" stdin and stdout:
//!
//! ```text
//!              table[0]            table[1]
//!   host:      stdin  <─────┐  ┌── stdout
//!   worker:    stdout ──────┘  └─> stdin      (roles swapped)
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use super::counter::PositionCounter;
use super::file::SharedFile;
use super::{Fd, STDIN, STDOUT};
use crate::error::FileError;

// =============================================================================
// FILE TABLE
// =============================================================================

/// Shared registry of descriptors.
#[derive(Debug)]
pub struct FileTable {
    next_fd: PositionCounter,
    entries: RwLock<BTreeMap<Fd, Arc<SharedFile>>>,
}

impl FileTable {
    /// Create a table holding the two standard streams.
    ///
    /// `stdin` is installed at descriptor 0 and `stdout` at descriptor 1.
    /// Dynamic descriptors start at `fd_start`, which must lie above them.
    pub fn new(stdin: SharedFile, stdout: SharedFile, fd_start: Fd) -> Result<Self, FileError> {
        if fd_start <= STDOUT {
            return Err(FileError::InvalidFdStart(fd_start));
        }
        let entries = BTreeMap::from([(STDIN, Arc::new(stdin)), (STDOUT, Arc::new(stdout))]);
        Ok(Self {
            next_fd: PositionCounter::new(fd_start),
            entries: RwLock::new(entries),
        })
    }

    /// Reserve a fresh descriptor and install the file `make` builds for it.
    ///
    /// A failing `make` still consumes the descriptor; descriptors are never
    /// reused.
    pub fn allocate(&self, make: impl FnOnce(Fd) -> Result<SharedFile, FileError>) -> Result<Fd, FileError> {
        let fd = self.reserve()?;
        let file = Arc::new(make(fd)?);
        self.entries_mut().insert(fd, file);
        Ok(fd)
    }

    /// Open a new stream of `capacity` bytes under a fresh descriptor.
    pub fn open(&self, name: &str, capacity: usize) -> Result<Fd, FileError> {
        let fd = self.allocate(|fd| SharedFile::new(fd, name, capacity))?;
        debug!("opened fd {fd} ({name}, {capacity} bytes)");
        Ok(fd)
    }

    pub fn lookup(&self, fd: Fd) -> Result<Arc<SharedFile>, FileError> {
        self.entries().get(&fd).cloned().ok_or(FileError::NotFound(fd))
    }

    /// Number of installed descriptors.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The descriptor the next `allocate` will hand out.
    pub fn next_fd(&self) -> Fd {
        self.next_fd.load()
    }

    /// Claim the counter's current value, refusing to step past `Fd::MAX`.
    fn reserve(&self) -> Result<Fd, FileError> {
        let mut current = self.next_fd.load();
        loop {
            let next = current.checked_add(1).ok_or(FileError::Exhausted)?;
            match self.next_fd.compare_exchange(current, next) {
                Ok(fd) => return Ok(fd),
                Err(observed) => current = observed,
            }
        }
    }

    fn entries(&self) -> RwLockReadGuard<'_, BTreeMap<Fd, Arc<SharedFile>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn entries_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<Fd, Arc<SharedFile>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// ROLES
// =============================================================================

/// Which table entries a thread treats as its own stdin and stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleMap {
    pub inbound: Fd,
    pub outbound: Fd,
}

impl RoleMap {
    /// The host's view: descriptors map to themselves.
    pub const IDENTITY: Self = Self {
        inbound: STDIN,
        outbound: STDOUT,
    };

    /// The peer end of the pipe pair: inbound and outbound exchanged.
    pub const fn swapped(self) -> Self {
        Self {
            inbound: self.outbound,
            outbound: self.inbound,
        }
    }

    /// Map a thread-local descriptor to its table descriptor.
    #[inline]
    pub const fn resolve(&self, fd: Fd) -> Fd {
        match fd {
            STDIN => self.inbound,
            STDOUT => self.outbound,
            other => other,
        }
    }
}

impl Default for RoleMap {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// =============================================================================
// VIEW
// =============================================================================

/// A thread's handle onto the shared table.
#[derive(Debug, Clone)]
pub struct FdView {
    table: Arc<FileTable>,
    roles: RoleMap,
}

impl FdView {
    pub fn new(table: Arc<FileTable>, roles: RoleMap) -> Self {
        Self { table, roles }
    }

    pub fn table(&self) -> &Arc<FileTable> {
        &self.table
    }

    pub fn roles(&self) -> RoleMap {
        self.roles
    }

    pub fn lookup(&self, fd: Fd) -> Result<Arc<SharedFile>, FileError> {
        self.table.lookup(self.roles.resolve(fd))
    }

    pub fn stdin(&self) -> Result<Arc<SharedFile>, FileError> {
        self.lookup(STDIN)
    }

    pub fn stdout(&self) -> Result<Arc<SharedFile>, FileError> {
        self.lookup(STDOUT)
    }

    /// Blocking write to a thread-local descriptor.
    pub fn write(&self, fd: Fd, bytes: &[u8]) -> Result<(), FileError> {
        self.lookup(fd)?.write(bytes);
        Ok(())
    }

    /// Non-blocking read from a thread-local descriptor.
    pub fn read(&self, fd: Fd) -> Result<Vec<u8>, FileError> {
        Ok(self.lookup(fd)?.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_from(fd_start: Fd) -> Result<FileTable, FileError> {
        FileTable::new(
            SharedFile::new(STDIN, "stdin", 32).unwrap(),
            SharedFile::new(STDOUT, "stdout", 32).unwrap(),
            fd_start,
        )
    }

    fn table() -> Arc<FileTable> {
        Arc::new(table_from(3).unwrap())
    }

    #[test]
    fn test_standard_streams_installed() {
        let t = table();
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup(STDIN).unwrap().name(), "stdin");
        assert_eq!(t.lookup(STDOUT).unwrap().name(), "stdout");
    }

    #[test]
    fn test_lookup_missing() {
        let t = table();
        assert_eq!(t.lookup(2).unwrap_err(), FileError::NotFound(2));
        assert_eq!(t.lookup(99).unwrap_err(), FileError::NotFound(99));
    }

    #[test]
    fn test_open_allocates_sequentially() {
        let t = table();
        assert_eq!(t.open("a", 8).unwrap(), 3);
        assert_eq!(t.open("b", 8).unwrap(), 4);
        assert_eq!(t.next_fd(), 5);
        assert_eq!(t.lookup(4).unwrap().name(), "b");
        assert_eq!(t.lookup(4).unwrap().fd(), 4);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_open_bad_capacity_burns_descriptor() {
        let t = table();
        assert!(t.open("bad", 0).is_err());
        assert_eq!(t.open("good", 8).unwrap(), 4);
        assert_eq!(t.lookup(3).unwrap_err(), FileError::NotFound(3));
    }

    #[test]
    fn test_fd_start_must_clear_standard_streams() {
        assert_eq!(table_from(0).unwrap_err(), FileError::InvalidFdStart(0));
        assert_eq!(table_from(1).unwrap_err(), FileError::InvalidFdStart(1));
        assert_eq!(table_from(2).unwrap().next_fd(), 2);
    }

    #[test]
    fn test_descriptor_space_exhaustion_keeps_stdin() {
        let t = table_from(Fd::MAX - 1).unwrap();
        assert_eq!(t.open("last", 8).unwrap(), Fd::MAX - 1);
        assert_eq!(t.next_fd(), Fd::MAX);

        assert_eq!(t.open("dyn", 8).unwrap_err(), FileError::Exhausted);
        assert_eq!(t.open("dyn", 8).unwrap_err(), FileError::Exhausted);
        assert_eq!(t.next_fd(), Fd::MAX);

        assert_eq!(t.lookup(STDIN).unwrap().name(), "stdin");
        assert_eq!(t.lookup(STDOUT).unwrap().name(), "stdout");
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_failed_allocate_at_limit_does_not_wrap() {
        let t = table_from(Fd::MAX - 1).unwrap();
        assert!(t.allocate(|_| Err(FileError::InvalidCapacity(0))).is_err());
        assert_eq!(t.allocate(|fd| SharedFile::new(fd, "dyn", 8)).unwrap_err(), FileError::Exhausted);
        assert_eq!(t.lookup(STDIN).unwrap().name(), "stdin");
    }

    #[test]
    fn test_high_fd_start_stays_sparse() {
        let t = table_from(1 << 30).unwrap();
        assert_eq!(t.open("far", 8).unwrap(), 1 << 30);
        assert_eq!(t.lookup(1 << 30).unwrap().name(), "far");
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_role_map() {
        let swapped = RoleMap::IDENTITY.swapped();
        assert_eq!(swapped.resolve(STDIN), STDOUT);
        assert_eq!(swapped.resolve(STDOUT), STDIN);
        assert_eq!(swapped.resolve(7), 7);
        assert_eq!(swapped.swapped(), RoleMap::IDENTITY);
    }

    #[test]
    fn test_swapped_view_shares_table() {
        let t = table();
        let host = FdView::new(t.clone(), RoleMap::IDENTITY);
        let worker = FdView::new(t, RoleMap::IDENTITY.swapped());

        host.write(STDOUT, b"ping").unwrap();
        assert_eq!(worker.lookup(STDIN).unwrap().take(), b"ping");

        worker.write(STDOUT, b"pong").unwrap();
        assert_eq!(host.stdin().unwrap().take(), b"pong");
    }
}
