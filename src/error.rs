//! Error types.
//!
//! Failures are local to the call that produced them. A full buffer is not an
//! error: writers block until a reader drains.

use std::io;

use thiserror::Error;

use crate::fs::Fd;

/// Descriptor table and stream errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("descriptor {0} not found")]
    NotFound(Fd),
    #[error("invalid stream capacity {0} (must be 1..=u32::MAX)")]
    InvalidCapacity(usize),
    #[error("first dynamic descriptor {0} overlaps the standard streams")]
    InvalidFdStart(Fd),
    #[error("descriptor space exhausted")]
    Exhausted,
}

/// Host-side access to the shared memory region.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("access of {len} bytes at {offset:#x} exceeds memory size {size:#x}")]
    OutOfBounds { offset: usize, len: usize, size: usize },
    #[error("memory region must have at least one page")]
    InvalidSize,
}

/// Errors raised across the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid module image: {0}")]
    InvalidImage(String),
    #[error("failed to attach shared memory: {0}")]
    MemoryAttach(String),
    #[error("engine trapped: {0}")]
    Trap(String),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    File(#[from] FileError),
}

/// Worker bootstrap failures. All of them are fatal to the worker.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("worker received a second bootstrap message")]
    DuplicateBootstrap,
    #[error("worker failed to instantiate engine: {0}")]
    Instantiation(#[source] EngineError),
    #[error("worker entry point failed: {0}")]
    Entry(#[source] EngineError),
    #[error("bootstrap channel closed before a message arrived")]
    Disconnected,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
