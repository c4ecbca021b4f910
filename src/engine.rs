//! The engine boundary.
//!
//! The computation engine is opaque. This crate only needs to create
//! instances of it ([`Instantiate`]) and drive them ([`Engine`]). Every
//! instance is handed an [`InstanceContext`]: the shared memory it attaches
//! to, the module image it runs, and its role-mapped view of the file table.

use crate::error::EngineError;
use crate::fs::FdView;
use crate::input::KeyEvent;
use crate::memory::{ModuleImage, SharedMemory};

/// Which side of the pipe pair a thread sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    /// The thread that created the file table and the first instance.
    Initiator,
    /// A thread brought up through the bootstrap handshake.
    Worker,
}

/// Everything an engine instance is created against.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub memory: SharedMemory,
    pub module: ModuleImage,
    pub files: FdView,
    pub pid: u32,
    pub role: ThreadRole,
}

/// A running engine instance.
///
/// Pointers are offsets into the instance's [`SharedMemory`].
pub trait Engine: Send {
    /// Reserve `size` bytes in engine memory and return their offset.
    fn allocate(&mut self, size: u32) -> Result<u32, EngineError>;

    /// Start the engine with the configuration text at `config_ptr`.
    fn run(&mut self, config_ptr: u32, config_len: u32) -> Result<(), EngineError>;

    fn draw_frame(&mut self) -> Result<(), EngineError>;

    fn handle_key_event(&mut self, event: KeyEvent) -> Result<(), EngineError>;

    /// Worker entry point. Services the instance's descriptors until the
    /// engine decides to return.
    fn worker_main(&mut self) -> Result<(), EngineError>;
}

/// Creates engine instances from a module image.
///
/// Shared by the host and every worker it spawns.
pub trait Instantiate: Send + Sync {
    fn instantiate(&self, ctx: InstanceContext) -> Result<Box<dyn Engine>, EngineError>;
}

impl<F> Instantiate for F
where
    F: Fn(InstanceContext) -> Result<Box<dyn Engine>, EngineError> + Send + Sync,
{
    fn instantiate(&self, ctx: InstanceContext) -> Result<Box<dyn Engine>, EngineError> {
        self(ctx)
    }
}
