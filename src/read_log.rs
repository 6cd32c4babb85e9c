//! The per-transaction read buffer.
//!
//! An append-only, ordered sequence of `(lock, observed_version)` pairs built
//! up as a transaction loads shared words. Duplicates are expected and cheap
//! to tolerate; de-duplicating on the hot path would cost more than it saves.

use crate::lock::{DescriptorId, Lock};

#[derive(Clone, Copy, Debug)]
struct ReadEntry {
    lock: *const Lock,
    observed_version: u64,
}

/// Ordered log of every lock observed during a transaction's loads.
#[derive(Debug, Default)]
pub struct ReadLog {
    entries: Vec<ReadEntry>,
}

impl ReadLog {
    #[inline]
    pub fn new() -> Self {
        ReadLog {
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Records that `lock` was observed at `observed_version` by a load.
    /// Grows by `Vec`'s own doubling strategy.
    #[inline]
    pub fn push(&mut self, lock: &Lock, observed_version: u64) {
        self.entries.push(ReadEntry {
            lock: lock as *const Lock,
            observed_version,
        });
    }

    /// Clears the log for the next attempt.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Re-reads every logged lock and checks that its version hasn't moved
    /// and that it isn't owned by anyone else. A lock now owned by `self_id`
    /// (this transaction having since written into the same stripe) is not a
    /// conflict and validates fine.
    ///
    /// This is the linearization point for a read-only transaction.
    #[inline]
    pub fn validate(&self, self_id: DescriptorId) -> bool {
        for entry in &self.entries {
            // SAFETY: every lock pointer pushed here came from a `LockTable`
            // that outlives this transaction's attempt.
            let lock = unsafe { &*entry.lock };
            match lock.probe() {
                crate::lock::LockState::Free(version) => {
                    if version != entry.observed_version {
                        return false;
                    }
                }
                crate::lock::LockState::Owned(owner) if owner == self_id => {}
                crate::lock::LockState::Owned(_) => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockTable;

    fn fake_id(addr: usize) -> DescriptorId {
        unsafe { DescriptorId::from_ptr(addr as *const ()) }
    }

    #[test]
    fn empty_log_validates() {
        let log = ReadLog::new();
        assert!(log.validate(fake_id(0x1000)));
    }

    #[test]
    fn unchanged_lock_validates() {
        let table = LockTable::new();
        let lock = table.lock_of(64);
        let mut log = ReadLog::new();
        log.push(lock, 0);
        assert!(log.validate(fake_id(0x1000)));
    }

    #[test]
    fn version_bump_fails_validation() {
        let table = LockTable::new();
        let lock = table.lock_of(64);
        let mut log = ReadLog::new();
        log.push(lock, 0);
        lock.release(2);
        assert!(!log.validate(fake_id(0x1000)));
    }

    #[test]
    fn ownership_by_another_fails_validation() {
        let table = LockTable::new();
        let lock = table.lock_of(64);
        let mut log = ReadLog::new();
        log.push(lock, 0);
        let owner = fake_id(0x1000);
        assert!(lock.try_acquire(owner).is_ok());
        assert!(!log.validate(fake_id(0x2000)));
    }

    #[test]
    fn ownership_by_self_validates() {
        let table = LockTable::new();
        let lock = table.lock_of(64);
        let mut log = ReadLog::new();
        log.push(lock, 0);
        let me = fake_id(0x1000);
        assert!(lock.try_acquire(me).is_ok());
        assert!(log.validate(me));
    }

    #[test]
    fn duplicate_entries_are_permitted() {
        let table = LockTable::new();
        let lock = table.lock_of(64);
        let mut log = ReadLog::new();
        log.push(lock, 0);
        log.push(lock, 0);
        assert_eq!(log.len(), 2);
        assert!(log.validate(fake_id(0x1000)));
    }

    #[test]
    fn clear_empties_the_log() {
        let table = LockTable::new();
        let lock = table.lock_of(64);
        let mut log = ReadLog::new();
        log.push(lock, 0);
        log.clear();
        assert!(log.is_empty());
    }
}
