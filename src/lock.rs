//! The versioned ownership-lock array that arbitrates access to shared
//! words.
//!
//! Every lock slot is a single tagged `usize`. The low bit disambiguates
//! the two interpretations:
//!
//! * low bit set   -> a version (the free sentinel `1` decodes to version 0)
//! * low bit clear -> an owner reference (a transaction descriptor's
//!   identity, which is always aligned so its low bit is naturally 0)

use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use crate::config::{LOCK_FREE_SENTINEL, LOCK_GRANULARITY_SHIFT, LOCK_TABLE_SIZE};

/// Opaque identity of a transaction descriptor, used as a lock owner token.
///
/// This is only ever compared for equality by other threads; the pointee is
/// never dereferenced through a `DescriptorId` obtained from the lock table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DescriptorId(NonZeroUsize);

impl DescriptorId {
    /// Builds a descriptor identity from an aligned pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and have its low bit clear (i.e. be at least
    /// 2-byte aligned), which every `TxDescriptor` guarantees via
    /// `#[repr(align(8))]`.
    #[inline]
    pub unsafe fn from_ptr(ptr: *const ()) -> Self {
        debug_assert!(!ptr.is_null(), "descriptor identity from a null pointer");
        debug_assert_eq!(
            ptr as usize & 1,
            0,
            "descriptor is not aligned enough to serve as a lock owner token"
        );
        DescriptorId(NonZeroUsize::new_unchecked(ptr as usize))
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0.get()
    }

    /// Recovers the descriptor this identity names, for the conflict
    /// manager's dead-lock walk — the only place lock-owner identities are
    /// ever dereferenced.
    ///
    /// # Safety
    ///
    /// The descriptor must still be alive. A descriptor that appears as a
    /// lock owner is always `Active` or `Waiting` and is only
    /// returned to the descriptor cache, let alone deallocated, after it has
    /// released every lock it holds — so every `DescriptorId` obtained from
    /// the lock table during the walk names a live descriptor. The resulting
    /// reference must not outlive that guarantee.
    #[inline]
    pub unsafe fn as_descriptor<'a>(self) -> &'a crate::descriptor::TxDescriptor {
        &*(self.0.get() as *const crate::descriptor::TxDescriptor)
    }
}

/// The decoded contents of a lock slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LockState {
    /// Unlocked, last released at `version` (the free sentinel decodes to 0).
    Free(u64),
    /// Currently owned by the transaction with this identity.
    Owned(DescriptorId),
}

#[inline]
fn encode_version(version: u64) -> usize {
    debug_assert_eq!(version % 2, 0, "commit versions must be even");
    ((version as usize) << 1) | 1
}

#[inline]
fn decode(word: usize) -> LockState {
    if word & 1 == 1 {
        LockState::Free((word >> 1) as u64)
    } else {
        // SAFETY: every owner word we ever store comes from
        // `DescriptorId::as_usize`, which is built from a NonNull, aligned
        // pointer.
        LockState::Owned(DescriptorId(unsafe { NonZeroUsize::new_unchecked(word) }))
    }
}

/// One slot of the lock table.
#[repr(transparent)]
pub struct Lock(AtomicUsize);

impl Lock {
    #[inline]
    const fn free() -> Self {
        Lock(AtomicUsize::new(LOCK_FREE_SENTINEL))
    }

    /// Reads the current state without modifying it.
    #[inline]
    pub fn probe(&self) -> LockState {
        decode(self.0.load(Relaxed))
    }

    /// Attempts to move the lock from `Free` or `Owned(self_id)` to
    /// `Owned(self_id)` via compare-and-set.
    ///
    /// Returns the previously observed state on success (so the caller can
    /// run the version-overflow check), or the conflicting owner on
    /// failure.
    #[inline]
    pub fn try_acquire(&self, self_id: DescriptorId) -> Result<LockState, DescriptorId> {
        let current = self.0.load(Relaxed);
        match decode(current) {
            LockState::Owned(owner) if owner != self_id => Err(owner),
            prior => {
                if self
                    .0
                    .compare_exchange(current, self_id.as_usize(), Relaxed, Relaxed)
                    .is_ok()
                {
                    Ok(prior)
                } else {
                    // Lost the race; the caller retries through the conflict
                    // manager same as a real conflict.
                    match decode(self.0.load(Relaxed)) {
                        LockState::Owned(owner) if owner != self_id => Err(owner),
                        prior => Ok(prior),
                    }
                }
            }
        }
    }

    /// Stores a new version, releasing ownership. The releaser must already
    /// own the lock, so this is a plain store.
    #[inline]
    pub fn release(&self, new_version: u64) {
        self.0.store(encode_version(new_version), Relaxed);
    }

    /// Restores a previously observed version on retry/abort.
    #[inline]
    pub fn restore(&self, old_version: u64) {
        self.release(old_version);
    }
}

impl core::fmt::Debug for Lock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Lock").field(&self.probe()).finish()
    }
}

/// Fixed-size array of versioned ownership locks, one lock covering a
/// `2^LOCK_GRANULARITY_SHIFT`-byte stripe of address space via hashing.
pub struct LockTable {
    locks: Box<[Lock]>,
}

impl LockTable {
    /// Builds a fresh table with every slot reset to the free sentinel.
    pub fn new() -> Self {
        let mut locks = Vec::with_capacity(LOCK_TABLE_SIZE);
        locks.resize_with(LOCK_TABLE_SIZE, Lock::free);
        LockTable {
            locks: locks.into_boxed_slice(),
        }
    }

    /// Selects the lock covering `addr`.
    #[inline]
    pub fn lock_of(&self, addr: usize) -> &Lock {
        let index = (addr >> LOCK_GRANULARITY_SHIFT) & (LOCK_TABLE_SIZE - 1);
        // SAFETY: index is masked into range.
        unsafe { self.locks.get_unchecked(index) }
    }
}

impl core::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockTable")
            .field("size", &self.locks.len())
            .finish()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
