//! The global version clock.
//!
//! A single monotonically increasing even-valued counter. Writing
//! transactions bump it by 2 on commit and stamp the post-increment value
//! into every lock they release.

use core::sync::atomic::{AtomicU64, Ordering::Relaxed};

use crossbeam_utils::CachePadded;

use crate::config::INITIAL_VERSION;

/// Process-wide (or context-wide) source of commit versions.
///
/// Every writing commit bumps this, so it is the hottest cache line touched
/// by the engine; `CachePadded` keeps it off whatever line happens to sit
/// next to it in `StmContext`, avoiding false sharing with the lock table's
/// first entries or the descriptor cache's mutex.
#[derive(Debug)]
pub struct GlobalClock {
    version: CachePadded<AtomicU64>,
}

impl GlobalClock {
    #[inline]
    pub fn new() -> Self {
        GlobalClock {
            version: CachePadded::new(AtomicU64::new(INITIAL_VERSION)),
        }
    }

    /// Snapshots the clock at the start of a transaction.
    ///
    /// Relaxed is sufficient here: the lock table is the synchronization
    /// point, not the clock itself.
    #[inline]
    pub fn start_snapshot(&self) -> u64 {
        self.version.load(Relaxed)
    }

    /// Atomically bumps the clock by 2 and returns the new, even commit
    /// version. Uses a full fence (`fetch_add` is `SeqCst`) so that the
    /// bump is ordered with respect to every lock release that follows it.
    #[inline]
    pub fn commit_tick(&self) -> u64 {
        self.version.fetch_add(2, core::sync::atomic::Ordering::SeqCst) + 2
    }
}

impl Default for GlobalClock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
