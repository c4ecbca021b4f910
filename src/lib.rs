//! # shared-fd
//!
//! Cross-thread file descriptors for an isolated engine instance.
//!
//! An engine runs over its own linear memory and reads and writes POSIX-like
//! streams. The bytes of those streams are produced and consumed by *other*
//! threads, through shared memory instead of message copies.
//!
//! ## Architecture
//!
//! ```text
//!  Host thread (pid 0)                          Worker thread (pid 1..)
//!  ───────────────────                          ───────────────────────
//!  Host::start                                  Worker::spawn
//!    SharedMemory ─────────────┐                  waits for one message
//!    FileTable { 0, 1, .. } ───┤                        │
//!    engine (identity roles)   │  BootstrapMessage      │
//!  Host::spawn_worker ─────────┴──────────────────────► accept → role swap
//!                                                   instantiate engine
//!                                                   worker_main
//!
//!  ┌──────────────────────── shared ─────────────────────────┐
//!  │  table[0]  SharedFile  ◄── host reads   ── worker writes │
//!  │  table[1]  SharedFile  ── host writes  ──► worker reads  │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Writers block when a stream is full and wake when a reader drains it.
//! Readers never block.
//!
//! ## Modules
//!
//! - [`fs`] - Position counter, shared file buffer, descriptor table, role views
//! - [`pipeline`] - Host setup and the worker bootstrap handshake
//! - [`engine`] - The opaque engine boundary
//! - [`memory`] - Shared linear memory and module image handles
//! - [`input`] - Key name to engine keycode encoding
//! - [`config`] - Host configuration

pub mod config;
pub mod engine;
pub mod error;
pub mod fs;
pub mod input;
pub mod memory;
pub mod pipeline;

pub use config::{Config, StreamConfig};
pub use engine::{Engine, InstanceContext, Instantiate, ThreadRole};
pub use error::{BootstrapError, EngineError, Error, FileError, MemoryError, Result};
pub use fs::{
    Fd, FdView, FileTable, PositionCounter, RoleMap, STDIN, STDOUT, SharedFile, WaitOutcome,
};
pub use input::{KeyCode, KeyEvent, Modifier};
pub use memory::{ModuleImage, PAGE_SIZE, SharedMemory};
pub use pipeline::{
    BootstrapMessage, FailureReason, Host, Worker, WorkerHandle, WorkerProtocol, WorkerState,
};
