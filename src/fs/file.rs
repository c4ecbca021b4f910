//! Shared synchronized file buffer.
//!
//! A fixed-capacity byte region plus one [`PositionCounter`] marking how many
//! valid, unread bytes sit at the front of the region.
//!
//! ```text
//!   storage: [ unread bytes ........ | free ................ ]
//!              0                  position               capacity
//!
//!   writer: copy at [position..), then publish position += n, notify
//!   reader: copy [0..position), then reset position = 0, notify
//! ```
//!
//! Publishing and resetting are both compare-and-swap on the position cell,
//! so a drain that races a write step never loses or duplicates bytes; the
//! losing side simply retries against the fresh position.
//!
//! One writer role and one reader role per buffer at a time. Concurrent
//! writers are not arbitrated.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::trace;

use super::Fd;
use super::counter::PositionCounter;
use crate::error::FileError;

/// Fixed-capacity shared byte stream.
#[derive(Debug)]
pub struct SharedFile {
    fd: Fd,
    name: String,
    position: PositionCounter,
    storage: Box<[AtomicU8]>,
    /// Snapshot staged by the last successful drain, owned by the reader role.
    pending: Mutex<Vec<u8>>,
}

impl SharedFile {
    /// Create an empty buffer of `capacity` bytes.
    pub fn new(fd: Fd, name: impl Into<String>, capacity: usize) -> Result<Self, FileError> {
        if capacity == 0 || u32::try_from(capacity).is_err() {
            return Err(FileError::InvalidCapacity(capacity));
        }
        Ok(Self {
            fd,
            name: name.into(),
            position: PositionCounter::new(0),
            storage: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            pending: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn fd(&self) -> Fd {
        self.fd
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of valid unread bytes currently in storage.
    #[inline]
    pub fn len(&self) -> usize {
        self.position.load() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// The position cell. Exposed for callers that want to wait on new data.
    #[inline]
    pub fn position(&self) -> &PositionCounter {
        &self.position
    }

    // =========================================================================
    // WRITER ROLE
    // =========================================================================

    /// Append `bytes`, blocking while the buffer is full.
    ///
    /// Returns once every byte has been placed and readers notified. With no
    /// reader draining, this blocks forever.
    pub fn write(&self, mut bytes: &[u8]) {
        let capacity = self.capacity();

        while !bytes.is_empty() {
            let offset = self.position.load() as usize;
            if offset >= capacity {
                self.position.wait_until_changed(capacity as u32, None);
                continue;
            }

            let n = bytes.len().min(capacity - offset);
            for (slot, &byte) in self.storage[offset..offset + n].iter().zip(&bytes[..n]) {
                slot.store(byte, Ordering::Relaxed);
            }

            // A reader may have drained between our load and now; redo the
            // step at the new offset.
            let end = (offset + n) as u32;
            if self.position.compare_exchange(offset as u32, end).is_err() {
                continue;
            }
            self.position.notify_all();

            trace!(
                "fd {} ({}): wrote {} bytes, position {}/{}",
                self.fd, self.name, n, end, capacity
            );
            bytes = &bytes[n..];
        }
    }

    // =========================================================================
    // READER ROLE
    // =========================================================================

    /// Drain everything written so far. Never blocks.
    ///
    /// A staged snapshot is returned unchanged on every call until
    /// [`clear`](Self::clear). With nothing staged and nothing written, returns
    /// an empty vector.
    pub fn read(&self) -> Vec<u8> {
        let mut pending = self.pending();
        if !pending.is_empty() {
            return pending.to_vec();
        }

        loop {
            let len = self.position.load() as usize;
            if len == 0 {
                return Vec::new();
            }

            let snapshot: Vec<u8> = self.storage[..len]
                .iter()
                .map(|slot| slot.load(Ordering::Relaxed))
                .collect();

            // The writer appended meanwhile; take the longer range instead.
            if self.position.compare_exchange(len as u32, 0).is_err() {
                continue;
            }
            self.position.notify_all();

            trace!("fd {} ({}): drained {} bytes", self.fd, self.name, len);
            *pending = snapshot.clone();
            return snapshot;
        }
    }

    /// Drop the staged snapshot so the next [`read`](Self::read) drains anew.
    pub fn clear(&self) {
        self.pending().clear();
    }

    /// [`read`](Self::read) followed by [`clear`](Self::clear).
    pub fn take(&self) -> Vec<u8> {
        let bytes = self.read();
        self.clear();
        bytes
    }

    fn pending(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panic while holding the lock leaves a plain Vec behind; reuse it.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
