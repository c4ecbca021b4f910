//! Host configuration.

use crate::error::{Error, Result};
use crate::fs::Fd;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default capacity of each standard stream in bytes
pub const DEFAULT_STREAM_CAPACITY: usize = 655_336;

/// First dynamically allocated descriptor (0 in, 1 out, 2 reserved)
pub const DEFAULT_FD_START: Fd = 3;

/// Default shared memory size in 64 KiB pages (32 MiB)
pub const DEFAULT_MEMORY_PAGES: u32 = 512;

/// Configuration text handed to the engine's `run`
pub const DEFAULT_ENGINE_CONFIG: &str = "font-family = monospace\nfont-size = 24\n";

// =============================================================================
// CONFIG
// =============================================================================

/// Name and capacity of one standard stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    pub capacity: usize,
}

impl StreamConfig {
    pub fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub stdin: StreamConfig,
    pub stdout: StreamConfig,
    pub fd_start: Fd,
    pub memory_pages: u32,
    pub engine_config: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stdin: StreamConfig::new("stdin", DEFAULT_STREAM_CAPACITY),
            stdout: StreamConfig::new("stdout", DEFAULT_STREAM_CAPACITY),
            fd_start: DEFAULT_FD_START,
            memory_pages: DEFAULT_MEMORY_PAGES,
            engine_config: DEFAULT_ENGINE_CONFIG.to_string(),
        }
    }
}

impl Config {
    /// Set both standard stream capacities.
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stdin.capacity = capacity;
        self.stdout.capacity = capacity;
        self
    }

    pub fn with_fd_start(mut self, fd_start: Fd) -> Self {
        self.fd_start = fd_start;
        self
    }

    pub fn with_memory_pages(mut self, pages: u32) -> Self {
        self.memory_pages = pages;
        self
    }

    pub fn with_engine_config(mut self, text: &str) -> Self {
        self.engine_config = text.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        for stream in [&self.stdin, &self.stdout] {
            if stream.capacity == 0 || u32::try_from(stream.capacity).is_err() {
                return Err(Error::Config(format!(
                    "{} capacity {} out of range",
                    stream.name, stream.capacity
                )));
            }
        }
        if self.fd_start < 2 {
            return Err(Error::Config(format!(
                "fd_start {} overlaps the standard streams",
                self.fd_start
            )));
        }
        if self.memory_pages == 0 {
            return Err(Error::Config("memory must have at least one page".into()));
        }
        if u32::try_from(self.engine_config.len()).is_err() {
            return Err(Error::Config("engine config text too large".into()));
        }
        Ok(())
    }
}
