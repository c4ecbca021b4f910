//! Shared file system. Streams whose bytes cross threads through shared memory.
//!
//! ```text
//! PositionCounter    atomic u32 + wait / notify
//!        │
//! SharedFile         fixed-capacity buffer, blocking write, draining read
//!        │
//! FileTable          descriptor → SharedFile, shared by every thread
//!        │
//! FdView             per-thread RoleMap over the table (stdin/stdout swap)
//! ```

pub mod counter;
pub mod file;
pub mod table;

pub use counter::{PositionCounter, WaitOutcome, timeout_from_millis};
pub use file::SharedFile;
pub use table::{FdView, FileTable, RoleMap};

/// Small integer naming a stream in a [`FileTable`].
pub type Fd = u32;

/// Conventional inbound stream.
pub const STDIN: Fd = 0;

/// Conventional outbound stream.
pub const STDOUT: Fd = 1;
