//! Shared 32-bit position cell with blocking wait / notify.
//!
//! The whole public contract is load / store / add / compare_exchange /
//! wait_until_changed / notify_all. Waiters park on the cell itself via
//! `wait_on_address` (futex on Linux, WaitOnAddress on Windows,
//! os_sync_wait_on_address on macOS), timed or not.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use wait_on_address::AtomicWait;

/// Longest single park. Longer timeouts re-park after re-checking the cell.
const MAX_PARK: Duration = Duration::from_secs(60 * 60);

/// Result of [`PositionCounter::wait_until_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The value differs from the expected one (possibly already on entry).
    Woken,
    /// The timeout elapsed with the value still equal to the expected one.
    TimedOut,
}

/// Convert a raw millisecond timeout into a [`Duration`].
///
/// # Panics
/// On negative or non-finite input. A bad timeout is a caller bug.
pub fn timeout_from_millis(ms: f64) -> Duration {
    assert!(
        ms.is_finite() && ms >= 0.0,
        "wait timeout must be finite and non-negative, got {ms}"
    );
    Duration::from_secs_f64(ms / 1000.0)
}

/// Atomic position counter shared between threads.
#[derive(Debug, Default)]
pub struct PositionCounter {
    cell: AtomicU32,
}

impl PositionCounter {
    pub const fn new(value: u32) -> Self {
        Self {
            cell: AtomicU32::new(value),
        }
    }

    #[inline]
    pub fn load(&self) -> u32 {
        self.cell.load(Ordering::Acquire)
    }

    #[inline]
    pub fn store(&self, value: u32) {
        self.cell.store(value, Ordering::Release);
    }

    /// Add `delta` and return the value before the update.
    #[inline]
    pub fn add(&self, delta: u32) -> u32 {
        self.cell.fetch_add(delta, Ordering::AcqRel)
    }

    /// Replace `current` with `new` if the cell still holds `current`.
    ///
    /// Returns the observed value on failure.
    #[inline]
    pub fn compare_exchange(&self, current: u32, new: u32) -> Result<u32, u32> {
        self.cell
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Block until the value differs from `expected`, or `timeout` elapses.
    ///
    /// Spurious wakeups are absorbed here; callers only see a real change or
    /// a timeout.
    pub fn wait_until_changed(&self, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        let Some(timeout) = timeout else {
            while self.load() == expected {
                self.cell.wait(expected);
            }
            return WaitOutcome::Woken;
        };

        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.load() != expected {
                return WaitOutcome::Woken;
            }
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => return WaitOutcome::TimedOut,
                Some(deadline) => deadline - now,
                None => timeout,
            };
            self.cell.wait_timeout(expected, remaining.min(MAX_PARK));
        }
    }

    /// Wake every thread blocked in [`wait_until_changed`](Self::wait_until_changed).
    #[inline]
    pub fn notify_all(&self) {
        self.cell.notify_all();
    }
}
