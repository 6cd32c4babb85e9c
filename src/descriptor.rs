//! The transaction descriptor: per-thread state for one in-flight
//! transactional attempt, plus the adaptive counters that persist across
//! attempts on the same descriptor.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering::Relaxed};

use crate::{
    lock::{DescriptorId, Lock},
    memlog::MemLog,
    read_log::ReadLog,
    write_log::WriteLog,
};

/// A lock this attempt currently holds, remembered so it can be released —
/// stamped with the commit version on commit, or restored to its prior
/// version on retry/abort.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HeldLock {
    pub lock: *const Lock,
    pub prior_version: u64,
}

/// A transaction descriptor's lifecycle state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Status {
    Idle = 0,
    Active = 1,
    Waiting = 2,
    Committed = 3,
    Aborted = 4,
}

impl Status {
    #[inline]
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Status::Idle,
            1 => Status::Active,
            2 => Status::Waiting,
            3 => Status::Committed,
            _ => Status::Aborted,
        }
    }
}

/// Per-thread state for one in-flight (or just-finished) transactional
/// attempt, recycled across attempts via the descriptor cache.
///
/// `status` and `waiting_for` are the only fields another thread's conflict
/// manager ever reads (through the raw [`DescriptorId`] stored as a lock
/// owner), so they alone need atomic, `Sync` storage; everything else is
/// touched only by the thread currently holding this descriptor.
#[repr(align(8))]
pub struct TxDescriptor {
    status: AtomicU8,
    /// `0` means "not waiting on anyone"; otherwise an encoded `DescriptorId`
    /// used by the dead-lock detection walk.
    waiting_for: AtomicUsize,

    pub(crate) max_version: u64,
    pub(crate) read_log: ReadLog,
    pub(crate) write_log: WriteLog,
    pub(crate) held_locks: Vec<HeldLock>,
    pub(crate) mem_log: MemLog,

    yielded: u32,
    /// Write-buffer hash collisions seen during the current attempt only,
    /// reset alongside the rest of the attempt state.
    pub(crate) attempt_whashcollisions: u64,

    // Adaptive counters, persist across attempts on this descriptor.
    pub(crate) adaptcommits: u64,
    pub(crate) adaptretries: u64,
    pub(crate) whashcollisions: u64,
    pub(crate) wtotal: u64,
    pub(crate) nrtx: u64,

    // Adaptive selectors, persist across attempts.
    pub(crate) writethrough: bool,
    pub(crate) adaptive_hash: u32,
    pub(crate) whashsize: usize,

    #[cfg(feature = "stats")]
    pub(crate) stats: crate::stats::Stats,
}

impl TxDescriptor {
    /// Builds a fresh descriptor in `Idle` state with the adaptive policy's
    /// starting point: write-through mode, the first hash function, and the
    /// minimum hash table size.
    pub fn new() -> Box<Self> {
        Box::new(TxDescriptor {
            status: AtomicU8::new(Status::Idle as u8),
            waiting_for: AtomicUsize::new(0),
            max_version: 0,
            read_log: ReadLog::new(),
            write_log: WriteLog::new(),
            held_locks: Vec::new(),
            mem_log: MemLog::new(),
            yielded: 0,
            attempt_whashcollisions: 0,
            adaptcommits: 0,
            adaptretries: 0,
            whashcollisions: 0,
            wtotal: 0,
            nrtx: 0,
            writethrough: true,
            adaptive_hash: 0,
            whashsize: crate::config::WBUF_HASH_INITIAL_SIZE,
            #[cfg(feature = "stats")]
            stats: crate::stats::Stats::default(),
        })
    }

    /// This descriptor's opaque identity, usable as a lock owner token.
    ///
    /// # Safety
    ///
    /// `self` must be `#[repr(align(8))]`-aligned, which it is by
    /// construction, and must outlive any use of the returned id as a lock
    /// owner (guaranteed by the invariant that a descriptor only appears in
    /// lock values while `Active` or `Waiting`).
    #[inline]
    pub fn id(&self) -> DescriptorId {
        unsafe { DescriptorId::from_ptr(self as *const Self as *const ()) }
    }

    #[inline]
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Relaxed))
    }

    #[inline]
    pub(crate) fn set_status(&self, status: Status) {
        self.status.store(status as u8, Relaxed);
    }

    #[inline]
    pub(crate) fn waiting_for(&self) -> Option<DescriptorId> {
        let raw = self.waiting_for.load(Relaxed);
        if raw == 0 {
            None
        } else {
            // SAFETY: every non-zero value stored here came from
            // `DescriptorId::as_usize` in `set_waiting_for`.
            Some(unsafe {
                DescriptorId::from_ptr(raw as *const ())
            })
        }
    }

    #[inline]
    pub(crate) fn set_waiting_for(&self, other: Option<DescriptorId>) {
        self.waiting_for
            .store(other.map_or(0, DescriptorId::as_usize), Relaxed);
    }

    #[inline]
    pub(crate) fn reset_yielded(&mut self) {
        self.yielded = 0;
    }

    #[inline]
    pub(crate) fn inc_yielded(&mut self) -> u32 {
        self.yielded += 1;
        self.yielded
    }

    #[inline]
    pub(crate) fn yielded(&self) -> u32 {
        self.yielded
    }

    /// Extended per-descriptor counters accumulated across every committed
    /// attempt on this descriptor. Only available with `--features stats`;
    /// printing/exporting the snapshot is left to the caller.
    #[cfg(feature = "stats")]
    #[inline]
    pub fn stats(&self) -> &crate::stats::Stats {
        &self.stats
    }

    /// Resets every piece of per-attempt state ahead of `start`: write and
    /// read buffers, lock list, allocation/free lists, and the waiting edge.
    /// Adaptive counters and selectors are untouched — they persist across
    /// attempts.
    pub(crate) fn reset_attempt_state(&mut self) {
        self.read_log.clear();
        self.write_log.reset();
        self.held_locks.clear();
        self.mem_log.clear();
        self.yielded = 0;
        self.attempt_whashcollisions = 0;
        self.set_waiting_for(None);
    }
}

impl core::fmt::Debug for TxDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxDescriptor")
            .field("status", &self.status())
            .field("max_version", &self.max_version)
            .field("writes", &self.write_log.len())
            .field("reads", &self.read_log.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_descriptor_is_idle() {
        let tx = TxDescriptor::new();
        assert_eq!(tx.status(), Status::Idle);
    }

    #[test]
    fn identity_round_trips_through_waiting_for() {
        let a = TxDescriptor::new();
        let b = TxDescriptor::new();
        a.set_waiting_for(Some(b.id()));
        assert_eq!(a.waiting_for(), Some(b.id()));
        a.set_waiting_for(None);
        assert_eq!(a.waiting_for(), None);
    }

    #[test]
    fn reset_clears_attempt_state_but_not_adaptive_counters() {
        let mut tx = TxDescriptor::new();
        tx.adaptcommits = 5;
        tx.write_log.lookup_or_insert(64, 0, 32, true).unwrap();
        tx.reset_attempt_state();
        assert!(tx.write_log.is_empty());
        assert_eq!(tx.adaptcommits, 5);
    }
}
