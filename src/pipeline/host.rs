//! The initiating thread.
//!
//! The host owns setup: it creates the shared memory, the file table with
//! its two standard streams, and the first engine instance. It then either
//! feeds stream 0 itself or spawns workers that talk to its engine over the
//! role-swapped pipe pair.
//!
//! ```text
//! Host::start   memory + table(stdin, stdout) + engine(pid 0, identity roles)
//! Host::run     allocate → copy config text into memory → engine.run
//! Host::spawn_worker
//!               Worker::spawn → bootstrap { memory, module, table, pid }
//! ```

use std::sync::Arc;

use log::{debug, info};

use super::bootstrap::{BootstrapMessage, Worker, WorkerHandle};
use crate::config::Config;
use crate::engine::{Engine, InstanceContext, Instantiate, ThreadRole};
use crate::error::{Error, Result};
use crate::fs::{FdView, FileTable, PositionCounter, RoleMap, STDIN, STDOUT, SharedFile};
use crate::input::{KeyEvent, Modifier};
use crate::memory::{ModuleImage, SharedMemory};

/// Pid of the host's own engine instance.
pub const HOST_PID: u32 = 0;

pub struct Host {
    config: Config,
    memory: SharedMemory,
    module: ModuleImage,
    files: FdView,
    loader: Arc<dyn Instantiate>,
    engine: Box<dyn Engine>,
    next_pid: PositionCounter,
    workers: Vec<(u32, WorkerHandle)>,
}

impl Host {
    /// Create memory, the file table and the host's engine instance.
    pub fn start(config: Config, module: ModuleImage, loader: Arc<dyn Instantiate>) -> Result<Self> {
        config.validate()?;

        let memory = SharedMemory::new(config.memory_pages)?;
        let stdin = SharedFile::new(STDIN, config.stdin.name.as_str(), config.stdin.capacity)?;
        let stdout = SharedFile::new(STDOUT, config.stdout.name.as_str(), config.stdout.capacity)?;
        let table = Arc::new(FileTable::new(stdin, stdout, config.fd_start)?);
        let files = FdView::new(table, RoleMap::IDENTITY);

        let engine = loader.instantiate(InstanceContext {
            memory: memory.clone(),
            module: module.clone(),
            files: files.clone(),
            pid: HOST_PID,
            role: ThreadRole::Initiator,
        })?;

        info!(
            "host started: {} ({} pages shared memory, stdin {}B, stdout {}B)",
            module.name(),
            memory.pages(),
            config.stdin.capacity,
            config.stdout.capacity
        );

        Ok(Self {
            config,
            memory,
            module,
            files,
            loader,
            engine,
            next_pid: PositionCounter::new(HOST_PID + 1),
            workers: Vec::new(),
        })
    }

    /// Hand the configuration text to the engine and start it.
    pub fn run(&mut self) -> Result<()> {
        let text = self.config.engine_config.as_bytes();
        let len = u32::try_from(text.len())
            .map_err(|_| Error::Config("engine config text too large".into()))?;

        let ptr = self.engine.allocate(len)?;
        self.memory.write(ptr as usize, text)?;
        debug!("engine config: {len} bytes at {ptr:#x}");

        self.engine.run(ptr, len)?;
        Ok(())
    }

    pub fn draw_frame(&mut self) -> Result<()> {
        self.engine.draw_frame()?;
        Ok(())
    }

    /// Encode a named key transition and forward it to the engine.
    pub fn handle_key(&mut self, down: bool, key: &str, modifiers: Modifier) -> Result<()> {
        let event = KeyEvent::from_name(down, key, modifiers);
        self.engine.handle_key_event(event)?;
        Ok(())
    }

    /// Feed bytes into stream 0 from this thread. Blocks while it is full.
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<()> {
        self.files.write(STDIN, bytes)?;
        Ok(())
    }

    /// Drain whatever the engine has written to stream 1.
    pub fn read_stdout(&self) -> Result<Vec<u8>> {
        Ok(self.files.stdout()?.take())
    }

    /// Spawn a worker over the same memory, image and file table.
    ///
    /// Returns the worker's pid.
    pub fn spawn_worker(&mut self) -> Result<u32> {
        let pid = self.next_pid.add(1);
        let handle = Worker::spawn(&format!("worker-{pid}"), self.loader.clone())?;

        handle.bootstrap(BootstrapMessage {
            memory: self.memory.clone(),
            module: self.module.clone(),
            files: self.files.table().clone(),
            pid,
        })?;
        debug!("spawned worker pid {pid}");

        self.workers.push((pid, handle));
        Ok(pid)
    }

    pub fn worker(&self, pid: u32) -> Option<&WorkerHandle> {
        self.workers.iter().find(|(p, _)| *p == pid).map(|(_, h)| h)
    }

    pub fn worker_pids(&self) -> Vec<u32> {
        self.workers.iter().map(|(pid, _)| *pid).collect()
    }

    /// Join every worker. Returns the first failure after all have exited.
    pub fn join_workers(&mut self) -> Result<()> {
        let mut first_err: Option<Error> = None;
        for (pid, handle) in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                debug!("worker pid {pid} exited with {e}");
                first_err.get_or_insert(e.into());
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn files(&self) -> &FdView {
        &self.files
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn module(&self) -> &ModuleImage {
        &self.module
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
