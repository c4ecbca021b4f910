//! Worker bootstrap handshake.
//!
//! A worker thread starts with nothing but a channel and an [`Instantiate`]
//! implementation. It waits for exactly one [`BootstrapMessage`], swaps its
//! stdin / stdout roles, instantiates its own engine over the same memory and
//! image as the host, then enters the engine's worker entry point.
//!
//! ```text
//! Uninitialized → AwaitingBootstrapMessage → ApplyingRoleSwap
//!               → InstantiatingEngine → Running → Finished
//!
//!   any non-terminal state ──→ Failed(reason)
//! ```
//!
//! Failures are fatal to the worker. Nothing is retried. A second bootstrap
//! message fails the worker as soon as the host sends it; an entry point
//! already running cannot be interrupted, so its later return is reported as
//! `DuplicateBootstrap` instead of `Finished`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};

use crate::engine::{InstanceContext, Instantiate, ThreadRole};
use crate::error::{BootstrapError, EngineError};
use crate::fs::{FdView, FileTable, RoleMap};
use crate::memory::{ModuleImage, SharedMemory};

// =============================================================================
// MESSAGE
// =============================================================================

/// The one message a worker receives. Exactly these four fields.
#[derive(Debug, Clone)]
pub struct BootstrapMessage {
    pub memory: SharedMemory,
    pub module: ModuleImage,
    pub files: Arc<FileTable>,
    pub pid: u32,
}

// =============================================================================
// STATE
// =============================================================================

/// Why a worker failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    DuplicateBootstrap,
    Instantiation(String),
    Entry(String),
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    AwaitingBootstrapMessage,
    ApplyingRoleSwap,
    InstantiatingEngine,
    Running,
    /// The worker entry point returned normally.
    Finished,
    Failed(FailureReason),
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed(_))
    }

    /// True once the worker is servicing descriptors or can never do so.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Running) || self.is_terminal()
    }
}

/// Worker state shared with the handle, with a condvar for observers.
#[derive(Debug)]
struct StateCell {
    state: Mutex<WorkerState>,
    changed: Condvar,
}

impl StateCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Uninitialized),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self) -> WorkerState {
        self.lock().clone()
    }

    /// Move to `next` unless already terminal. Returns false if the worker
    /// had already stopped.
    fn advance(&self, next: WorkerState) -> bool {
        let mut state = self.lock();
        if state.is_terminal() {
            return false;
        }
        debug!("worker state {:?} -> {:?}", *state, next);
        *state = next;
        self.changed.notify_all();
        true
    }

    fn fail(&self, reason: FailureReason) {
        error!("worker failed: {reason:?}");
        self.advance(WorkerState::Failed(reason));
    }

    fn wait_settled(&self, timeout: Duration) -> WorkerState {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |s| !s.is_settled())
            .unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }
}

// =============================================================================
// PROTOCOL
// =============================================================================

/// Worker side of the handshake, independent of threads and channels.
#[derive(Debug)]
pub struct WorkerProtocol {
    state: Arc<StateCell>,
}

impl WorkerProtocol {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StateCell::new()),
        }
    }

    fn with_state(state: Arc<StateCell>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Register for the bootstrap message.
    pub fn listen(&self) {
        self.state.advance(WorkerState::AwaitingBootstrapMessage);
    }

    /// Take the bootstrap message and apply the role swap.
    ///
    /// Only valid while awaiting; a second message fails the worker.
    pub fn accept(&self, msg: BootstrapMessage) -> Result<InstanceContext, BootstrapError> {
        if self.state() != WorkerState::AwaitingBootstrapMessage {
            warn!("bootstrap message for pid {} arrived in state {:?}", msg.pid, self.state());
            self.state.fail(FailureReason::DuplicateBootstrap);
            return Err(BootstrapError::DuplicateBootstrap);
        }
        self.state.advance(WorkerState::ApplyingRoleSwap);

        let BootstrapMessage {
            memory,
            module,
            files,
            pid,
        } = msg;
        let view = FdView::new(files, RoleMap::IDENTITY.swapped());
        debug!("worker pid {pid}: roles {:?}", view.roles());

        Ok(InstanceContext {
            memory,
            module,
            files: view,
            pid,
            role: ThreadRole::Worker,
        })
    }

    /// Instantiate the engine and run its worker entry point to completion.
    pub fn run(&self, loader: &dyn Instantiate, ctx: InstanceContext) -> Result<(), BootstrapError> {
        if !self.state.advance(WorkerState::InstantiatingEngine) {
            return Err(BootstrapError::DuplicateBootstrap);
        }
        let pid = ctx.pid;

        let mut engine = loader.instantiate(ctx).map_err(|e| {
            self.state.fail(FailureReason::Instantiation(e.to_string()));
            BootstrapError::Instantiation(e)
        })?;

        if !self.state.advance(WorkerState::Running) {
            return Err(BootstrapError::DuplicateBootstrap);
        }
        debug!("worker pid {pid}: entering worker main");

        engine.worker_main().map_err(|e| {
            self.state.fail(FailureReason::Entry(e.to_string()));
            BootstrapError::Entry(e)
        })?;

        if !self.state.advance(WorkerState::Finished) {
            warn!("worker pid {pid}: entry point returned after the worker failed");
            return Err(BootstrapError::DuplicateBootstrap);
        }
        Ok(())
    }
}

impl Default for WorkerProtocol {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// WORKER THREAD
// =============================================================================

/// Spawns worker threads.
pub struct Worker;

impl Worker {
    /// Spawn a worker that waits for its bootstrap message.
    pub fn spawn(name: &str, loader: Arc<dyn Instantiate>) -> Result<WorkerHandle, BootstrapError> {
        let (tx, rx) = mpsc::channel();
        let state = Arc::new(StateCell::new());
        let protocol = WorkerProtocol::with_state(state.clone());

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::worker_loop(protocol, rx, loader))
            .map_err(BootstrapError::Spawn)?;

        Ok(WorkerHandle {
            name: name.to_string(),
            tx,
            sent: AtomicBool::new(false),
            state,
            thread: Some(thread),
        })
    }

    fn worker_loop(
        protocol: WorkerProtocol,
        rx: Receiver<BootstrapMessage>,
        loader: Arc<dyn Instantiate>,
    ) -> Result<(), BootstrapError> {
        protocol.listen();

        let msg = rx.recv().map_err(|_| {
            protocol.state.fail(FailureReason::Disconnected);
            BootstrapError::Disconnected
        })?;
        let ctx = protocol.accept(msg)?;
        if let Ok(extra) = rx.try_recv() {
            protocol.accept(extra)?;
        }
        protocol.run(loader.as_ref(), ctx)
    }
}

/// Host-side handle to a spawned worker.
///
/// Dropping the handle before bootstrapping fails the worker with
/// `Disconnected`. Dropping it afterwards detaches the thread.
pub struct WorkerHandle {
    name: String,
    tx: Sender<BootstrapMessage>,
    sent: AtomicBool,
    state: Arc<StateCell>,
    thread: Option<JoinHandle<Result<(), BootstrapError>>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the bootstrap message. Only the first call is valid; any later
    /// call fails the worker with `DuplicateBootstrap`, and the worker thread
    /// exits with that error.
    pub fn bootstrap(&self, msg: BootstrapMessage) -> Result<(), BootstrapError> {
        if self.sent.swap(true, Ordering::AcqRel) {
            warn!("{}: duplicate bootstrap for pid {}", self.name, msg.pid);
            self.state.fail(FailureReason::DuplicateBootstrap);
            // The worker may already be gone; the failure is recorded either way.
            let _ = self.tx.send(msg);
            return Err(BootstrapError::DuplicateBootstrap);
        }
        debug!("{}: bootstrapping pid {}", self.name, msg.pid);
        self.tx.send(msg).map_err(|_| BootstrapError::Disconnected)
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Block until the worker is running or has stopped, or `timeout` elapses.
    /// Returns the state observed last.
    pub fn wait_until_running(&self, timeout: Duration) -> WorkerState {
        self.state.wait_settled(timeout)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Wait for the worker thread to exit and return its result.
    pub fn join(mut self) -> Result<(), BootstrapError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread.join().unwrap_or_else(|_| {
            self.state.fail(FailureReason::Entry("worker panicked".into()));
            Err(BootstrapError::Entry(EngineError::Trap("worker panicked".into())))
        })
    }
}
