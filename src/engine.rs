//! The transaction engine: orchestrates `start`, `load`, `store`,
//! `commit`, `retry`, and `abort`, and owns the adaptivity checkpoint that
//! retunes write mode, hash size, and hash function as contention evolves.

use std::alloc::Layout;

use crate::{
    conflict::{Backoff, Step},
    config::{
        ADAPTIVITY_CHECKPOINT, LOCK_GRANULARITY_SHIFT, NR_ADAPTIVE_HASH_FUNCTIONS,
        WBUF_HASH_MAX_SIZE, WBUF_HASH_MIN_SIZE, WHASH_COLLISION_ROTATE_PERCENT,
        WHASH_GROW_LOAD_PERCENT, WHASH_SHRINK_LOAD_PERCENT, WRITETHROUGH_RETRY_THRESHOLD_PERCENT,
    },
    context::StmContext,
    descriptor::{HeldLock, Status, TxDescriptor},
    error::{Retry, TxResult},
    lock::{DescriptorId, Lock, LockState},
    memlog::AllocatedBlock,
};

#[inline]
fn exponential_backoff_enabled() -> bool {
    cfg_if::cfg_if! {
        if #[cfg(feature = "adaptive")] {
            true
        } else {
            false
        }
    }
}

/// Begins a new attempt on `tx`: resets every piece of
/// per-attempt state, snapshots the clock into `max_version`, and enters
/// `Active`.
pub fn start(ctx: &StmContext, tx: &mut TxDescriptor) {
    debug_assert_ne!(tx.status(), Status::Active, "start of an already-active descriptor");
    debug_assert_ne!(tx.status(), Status::Waiting, "start of a waiting descriptor");
    tx.reset_attempt_state();
    tx.max_version = ctx.clock.start_snapshot();
    tx.set_status(Status::Active);
}

/// Rolls back a failed attempt's shared-memory effects, releases every held
/// lock restoring its prior version, resolves the memory-action log as an
/// abort, and resets the buffers.
fn rollback(tx: &mut TxDescriptor) {
    if tx.writethrough {
        for entry in tx.write_log.iter() {
            if let Some(pre_image) = entry.pre_image {
                // SAFETY: `entry.addr`'s covering lock is still held by this
                // transaction until the loop below releases it.
                unsafe { core::ptr::write(entry.addr as *mut usize, pre_image) };
            }
        }
    }
    for held in tx.held_locks.drain(..) {
        // SAFETY: `held.lock` was obtained from a `LockTable` that outlives
        // this attempt, and is released here exactly once.
        unsafe { &*held.lock }.restore(held.prior_version);
    }
    tx.mem_log.resolve_abort();
    tx.read_log.clear();
    tx.write_log.reset();
}

/// Ends the current attempt in `Aborted`, counts it toward `adaptretries`,
/// and hands back the [`Retry`] marker the caller propagates with `?`.
/// Every internal conflict path funnels through this so a
/// transaction never leaks held locks on its way out.
pub fn retry(tx: &mut TxDescriptor) -> Retry {
    rollback(tx);
    tx.set_status(Status::Aborted);
    tx.adaptretries += 1;
    #[cfg(feature = "stats")]
    tx.stats.record_retry();
    Retry
}

/// Ends the current attempt in `Aborted` without counting it as a retry and
/// without producing a restart token.
pub fn abort(tx: &mut TxDescriptor) {
    rollback(tx);
    tx.set_status(Status::Aborted);
}

/// Attempts to move `lock` to `Owned(tx)`, going through the conflict
/// manager's back-off whenever it's held by someone else.
fn acquire(tx: &mut TxDescriptor, lock: &Lock, exponential: bool) -> Result<LockState, ()> {
    let self_id = tx.id();
    let mut backoff = Backoff::new();
    loop {
        match lock.try_acquire(self_id) {
            Ok(prior) => {
                backoff.finish(tx);
                return Ok(prior);
            }
            Err(other) => match backoff.step(tx, other, exponential) {
                Step::KeepWaiting => continue,
                Step::GiveUp => {
                    backoff.finish(tx);
                    return Err(());
                }
            },
        }
    }
}

/// Waits for `lock` to become free, going through the conflict manager's
/// back-off while it's owned by someone else, and returns the observed free
/// version.
fn wait_for_release(tx: &mut TxDescriptor, lock: &Lock, exponential: bool) -> Result<u64, ()> {
    let mut backoff = Backoff::new();
    loop {
        match lock.probe() {
            LockState::Free(version) => {
                backoff.finish(tx);
                return Ok(version);
            }
            LockState::Owned(owner) => match backoff.step(tx, owner, exponential) {
                Step::KeepWaiting => continue,
                Step::GiveUp => {
                    backoff.finish(tx);
                    return Err(());
                }
            },
        }
    }
}

/// Attempts to raise `max_version` mid-transaction by re-validating the
/// existing read buffer against a fresh clock snapshot.
fn extend_read_set(ctx: &StmContext, tx: &mut TxDescriptor) -> Result<(), ()> {
    let candidate = ctx.clock.start_snapshot();
    if tx.read_log.validate(tx.id()) {
        tx.max_version = candidate;
        Ok(())
    } else {
        Err(())
    }
}

/// Transactional read of one machine word.
///
/// # Safety
///
/// `addr` must be a live, word-aligned, `usize`-sized shared location for the
/// duration of the call.
pub unsafe fn load(ctx: &StmContext, tx: &mut TxDescriptor, addr: usize) -> TxResult<usize> {
    let lock = ctx.locks.lock_of(addr);
    let self_id = tx.id();
    let exponential = exponential_backoff_enabled();

    loop {
        if let LockState::Owned(owner) = lock.probe() {
            if owner == self_id {
                if tx.write_log.may_contain(addr) {
                    if let Some(out) =
                        tx.write_log
                            .lookup_or_insert(addr, tx.adaptive_hash, tx.whashsize, false)
                    {
                        return Ok(tx.write_log.entry(out.index).value);
                    }
                }
                // SAFETY: this stripe's lock is held by `tx`, so no other
                // transaction can be writing to it concurrently.
                return Ok(core::ptr::read(addr as *const usize));
            }
        }

        let version = match wait_for_release(tx, lock, exponential) {
            Ok(version) => version,
            Err(()) => return Err(retry(tx)),
        };

        if version > tx.max_version {
            match extend_read_set(ctx, tx) {
                Ok(()) => continue,
                Err(()) => return Err(retry(tx)),
            }
        }

        // SAFETY: caller's contract; the lock was free a moment ago.
        let value = core::ptr::read(addr as *const usize);

        match lock.probe() {
            LockState::Free(now) if now == version => {
                tx.read_log.push(lock, version);
                return Ok(value);
            }
            // The lock moved since we sampled it; restart this load only,
            // not the whole transaction.
            _ => continue,
        }
    }
}

/// Transactional write of one machine word. Eager locking:
/// the covering lock is acquired on first write to a given address, not
/// deferred to commit.
///
/// # Safety
///
/// `addr` must be a live, word-aligned, `usize`-sized shared location for the
/// duration of the call.
pub unsafe fn store(ctx: &StmContext, tx: &mut TxDescriptor, addr: usize, value: usize) -> TxResult<()> {
    let lock = ctx.locks.lock_of(addr);
    let exponential = exponential_backoff_enabled();

    let outcome = tx
        .write_log
        .lookup_or_insert(addr, tx.adaptive_hash, tx.whashsize, true)
        .expect("allocate=true always produces an entry");
    tx.whashcollisions += outcome.collisions;
    tx.attempt_whashcollisions += outcome.collisions;

    if outcome.inserted {
        tx.wtotal += 1;
        match acquire(tx, lock, exponential) {
            Ok(LockState::Free(prior_version)) => {
                if prior_version > tx.max_version {
                    lock.release(prior_version);
                    return Err(retry(tx));
                }
                tx.held_locks.push(HeldLock {
                    lock: lock as *const Lock,
                    prior_version,
                });
            }
            Ok(LockState::Owned(_)) => {
                // Already held from an earlier write into the same 32-byte
                // stripe; nothing further to record.
            }
            Err(()) => return Err(retry(tx)),
        }
    }

    apply_store(tx, outcome.index, addr, value);
    Ok(())
}

/// Writes `value` into the buffered entry at `index`, and in write-through
/// mode also writes it straight to `*addr`, saving the pre-image on the
/// entry's first write so abort/retry can restore it.
fn apply_store(tx: &mut TxDescriptor, index: usize, addr: usize, value: usize) {
    if tx.writethrough {
        if tx.write_log.entry(index).pre_image.is_none() {
            // SAFETY: addr's covering lock is held by this transaction.
            let pre_image = unsafe { core::ptr::read(addr as *const usize) };
            tx.write_log.entry_mut(index).pre_image = Some(pre_image);
        }
        tx.write_log.entry_mut(index).value = value;
        // SAFETY: see above.
        unsafe { core::ptr::write(addr as *mut usize, value) };
    } else {
        tx.write_log.entry_mut(index).value = value;
    }
}

/// Commits the current attempt.
pub fn commit(ctx: &StmContext, tx: &mut TxDescriptor) -> TxResult<()> {
    debug_assert_eq!(tx.status(), Status::Active, "commit of a non-active descriptor");

    if tx.write_log.is_empty() && tx.held_locks.is_empty() {
        tx.set_status(Status::Committed);
        tx.mem_log.resolve_commit();
        #[cfg(feature = "stats")]
        record_commit_stats(tx);
        tx.read_log.clear();
        return Ok(());
    }

    let commit_version = ctx.clock.commit_tick();
    if commit_version != tx.max_version + 2 && !tx.read_log.validate(tx.id()) {
        return Err(retry(tx));
    }

    tx.set_status(Status::Committed);

    if !tx.writethrough {
        for entry in tx.write_log.iter() {
            // SAFETY: every entry's address is covered by a lock in
            // `tx.held_locks`, held until the loop below releases it.
            unsafe { core::ptr::write(entry.addr as *mut usize, entry.value) };
        }
    }

    for held in tx.held_locks.drain(..) {
        // SAFETY: see `rollback`.
        unsafe { &*held.lock }.release(commit_version);
    }

    tx.mem_log.resolve_commit();
    tx.adaptcommits += 1;
    tx.nrtx += 1;
    run_adaptivity_checkpoint(tx);
    #[cfg(feature = "stats")]
    record_commit_stats(tx);
    tx.read_log.clear();
    tx.write_log.reset();
    Ok(())
}

#[cfg(feature = "stats")]
fn record_commit_stats(tx: &mut TxDescriptor) {
    let reads = tx.read_log.len() as u64;
    let writes = tx.write_log.len() as u64;
    let collisions = tx.attempt_whashcollisions;
    let yields = tx.yielded() as u64;
    tx.stats.record_commit(reads, writes, collisions, yields);
}

/// Retunes write mode, write-buffer hash size, and hash function every
/// [`ADAPTIVITY_CHECKPOINT`] commits. A no-op when the `adaptive`
/// feature is disabled, pinning write-through mode, the first hash
/// function, and the initial hash size for the descriptor's lifetime.
fn run_adaptivity_checkpoint(tx: &mut TxDescriptor) {
    if !cfg!(feature = "adaptive") {
        return;
    }
    if tx.adaptcommits % ADAPTIVITY_CHECKPOINT != 0 {
        return;
    }

    tx.writethrough =
        tx.adaptretries * 100 <= WRITETHROUGH_RETRY_THRESHOLD_PERCENT * (tx.adaptcommits + 1);

    if tx.nrtx > 0 {
        let avg = tx.wtotal / tx.nrtx;
        if avg * 100 > WHASH_GROW_LOAD_PERCENT * tx.whashsize as u64 {
            tx.whashsize = (tx.whashsize * 2).min(WBUF_HASH_MAX_SIZE);
        } else if avg * 100 < WHASH_SHRINK_LOAD_PERCENT * tx.whashsize as u64 {
            tx.whashsize = (tx.whashsize / 2).max(WBUF_HASH_MIN_SIZE);
        }
    }

    if tx.wtotal > 0 && tx.whashcollisions * 100 >= WHASH_COLLISION_ROTATE_PERCENT * tx.wtotal {
        tx.adaptive_hash = (tx.adaptive_hash + 1) % NR_ADAPTIVE_HASH_FUNCTIONS;
    }
}

/// Acquires every lock-table stripe covering `[addr, addr + size)`, skipping
/// stripes this attempt already holds, to prevent later
/// reads from observing torn state.
fn privatize_range(ctx: &StmContext, tx: &mut TxDescriptor, addr: usize, size: usize) -> Result<(), ()> {
    let stripe = 1usize << LOCK_GRANULARITY_SHIFT;
    let exponential = exponential_backoff_enabled();
    let mut cursor = addr & !(stripe - 1);
    let end = addr + size;
    while cursor < end {
        let lock = ctx.locks.lock_of(cursor);
        let already_held = tx
            .held_locks
            .iter()
            .any(|held| held.lock == lock as *const Lock);
        if !already_held {
            match acquire(tx, lock, exponential)? {
                LockState::Free(prior_version) => {
                    if prior_version > tx.max_version {
                        lock.release(prior_version);
                        return Err(());
                    }
                    tx.held_locks.push(HeldLock {
                        lock: lock as *const Lock,
                        prior_version,
                    });
                }
                LockState::Owned(_) => {}
            }
        }
        cursor += stripe;
    }
    Ok(())
}

/// Transaction-scoped allocation: allocates via the host
/// allocator and records the block so commit keeps it and abort frees it.
pub fn stm_malloc(tx: &mut TxDescriptor, size: usize) -> *mut u8 {
    let layout =
        Layout::from_size_align(size, core::mem::size_of::<usize>()).expect("invalid layout");
    // SAFETY: `layout` has a non-zero size whenever `size > 0`; callers that
    // request a zero-sized block get back a dangling, non-null pointer per
    // `Layout`'s own rules, never dereferenced as a shared word.
    let ptr = unsafe { std::alloc::alloc(layout) };
    if ptr.is_null() {
        std::alloc::handle_alloc_error(layout);
    }
    tx.mem_log.record_alloc(AllocatedBlock { ptr, layout });
    ptr
}

/// Transaction-scoped deallocation: privatizes the block's
/// address range against concurrent transactional reads, then queues it to
/// be actually freed on commit (kept alive until then so abort can still see
/// a live block).
///
/// # Safety
///
/// `ptr` must be a block previously returned by [`stm_malloc`] on this
/// context, not already queued for free in this attempt, with `size`
/// matching the size it was allocated with.
pub unsafe fn stm_free(ctx: &StmContext, tx: &mut TxDescriptor, ptr: *mut u8, size: usize) -> TxResult<()> {
    if privatize_range(ctx, tx, ptr as usize, size).is_err() {
        return Err(retry(tx));
    }
    let layout =
        Layout::from_size_align(size, core::mem::size_of::<usize>()).expect("invalid layout");
    tx.mem_log.record_free(AllocatedBlock { ptr, layout });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(v: usize) -> Box<usize> {
        Box::new(v)
    }

    #[test]
    fn read_only_transaction_observes_initial_values() {
        let ctx = StmContext::init();
        let a = word(7);
        let b = word(11);
        let mut tx = ctx.new_descriptor();

        start(&ctx, &mut tx);
        let va = unsafe { load(&ctx, &mut tx, &*a as *const usize as usize) }.unwrap();
        let vb = unsafe { load(&ctx, &mut tx, &*b as *const usize as usize) }.unwrap();
        assert_eq!(va, 7);
        assert_eq!(vb, 11);
        let before = ctx.clock.start_snapshot();
        commit(&ctx, &mut tx).unwrap();
        assert_eq!(ctx.clock.start_snapshot(), before);
        assert_eq!(tx.status(), Status::Committed);
    }

    #[test]
    fn single_writer_commits_new_value() {
        let ctx = StmContext::init();
        let mut a = word(0);
        let addr = &mut *a as *mut usize as usize;
        let mut tx = ctx.new_descriptor();

        let before = ctx.clock.start_snapshot();
        start(&ctx, &mut tx);
        unsafe { store(&ctx, &mut tx, addr, 42) }.unwrap();
        commit(&ctx, &mut tx).unwrap();

        assert_eq!(*a, 42);
        assert_eq!(ctx.clock.start_snapshot(), before + 2);
        assert_eq!(
            ctx.locks.lock_of(addr).probe(),
            LockState::Free(before + 2)
        );
    }

    #[test]
    fn write_then_read_same_address_sees_buffered_value() {
        let ctx = StmContext::init();
        let mut a = word(0);
        let addr = &mut *a as *mut usize as usize;
        let mut tx = ctx.new_descriptor();

        start(&ctx, &mut tx);
        unsafe { store(&ctx, &mut tx, addr, 99) }.unwrap();
        let seen = unsafe { load(&ctx, &mut tx, addr) }.unwrap();
        assert_eq!(seen, 99);
        commit(&ctx, &mut tx).unwrap();
        assert_eq!(*a, 99);
    }

    #[test]
    fn allocation_is_released_on_abort() {
        let ctx = StmContext::init();
        let mut tx = ctx.new_descriptor();

        start(&ctx, &mut tx);
        let p = stm_malloc(&mut tx, 64);
        unsafe { store(&ctx, &mut tx, p as usize, 9) }.unwrap();
        abort(&mut tx);
        assert_eq!(tx.status(), Status::Aborted);
        assert!(tx.mem_log.allocated().is_empty());
    }

    #[test]
    fn no_lock_survives_a_committed_or_aborted_attempt() {
        let ctx = StmContext::init();
        let mut a = word(0);
        let addr = &mut *a as *mut usize as usize;

        let mut tx = ctx.new_descriptor();
        start(&ctx, &mut tx);
        unsafe { store(&ctx, &mut tx, addr, 1) }.unwrap();
        commit(&ctx, &mut tx).unwrap();
        assert!(matches!(
            ctx.locks.lock_of(addr).probe(),
            LockState::Free(_)
        ));

        let mut tx2 = ctx.new_descriptor();
        start(&ctx, &mut tx2);
        unsafe { store(&ctx, &mut tx2, addr, 2) }.unwrap();
        abort(&mut tx2);
        assert!(matches!(
            ctx.locks.lock_of(addr).probe(),
            LockState::Free(_)
        ));
    }

    #[test]
    fn free_only_commit_releases_privatized_locks() {
        // A transaction whose only write-buffer-adjacent work is `stm_free`
        // (no `store`) must still release the locks it took out while
        // privatizing the freed range — an empty write log alone doesn't mean
        // the commit fast path is safe to take.
        let ctx = StmContext::init();
        let mut tx = ctx.new_descriptor();
        start(&ctx, &mut tx);
        let p = stm_malloc(&mut tx, core::mem::size_of::<usize>());
        commit(&ctx, &mut tx).unwrap();

        let mut tx2 = ctx.new_descriptor();
        start(&ctx, &mut tx2);
        unsafe { stm_free(&ctx, &mut tx2, p, core::mem::size_of::<usize>()) }.unwrap();
        assert!(tx2.write_log.is_empty());
        assert!(!tx2.held_locks.is_empty());
        commit(&ctx, &mut tx2).unwrap();

        assert!(matches!(
            ctx.locks.lock_of(p as usize).probe(),
            LockState::Free(_)
        ));

        // The stripe must be acquirable again by a fresh transaction.
        let mut tx3 = ctx.new_descriptor();
        start(&ctx, &mut tx3);
        let q = stm_malloc(&mut tx3, core::mem::size_of::<usize>());
        unsafe { store(&ctx, &mut tx3, q as usize, 5) }.unwrap();
        commit(&ctx, &mut tx3).unwrap();
        unsafe { std::alloc::dealloc(q, Layout::from_size_align(core::mem::size_of::<usize>(), core::mem::size_of::<usize>()).unwrap()) };
    }

    // under a workload where most attempts retry, the
    // adaptivity checkpoint flips a transaction over to write-back.
    #[test]
    #[cfg(feature = "adaptive")]
    fn adaptivity_checkpoint_flips_to_write_back_under_heavy_retries() {
        let mut tx = TxDescriptor::new();
        assert!(tx.writethrough);
        tx.adaptcommits = ADAPTIVITY_CHECKPOINT;
        tx.adaptretries = 50; // ~78% of 64 commits, over the 60% threshold
        run_adaptivity_checkpoint(&mut tx);
        assert!(!tx.writethrough);
    }

    #[test]
    #[cfg(feature = "adaptive")]
    fn adaptivity_checkpoint_keeps_write_through_under_light_retries() {
        let mut tx = TxDescriptor::new();
        tx.writethrough = false;
        tx.adaptcommits = ADAPTIVITY_CHECKPOINT;
        tx.adaptretries = 5; // well under the 60% threshold
        run_adaptivity_checkpoint(&mut tx);
        assert!(tx.writethrough);
    }

    #[test]
    #[cfg(feature = "adaptive")]
    fn adaptivity_checkpoint_only_fires_on_the_boundary() {
        let mut tx = TxDescriptor::new();
        tx.writethrough = true;
        tx.adaptcommits = ADAPTIVITY_CHECKPOINT + 1;
        tx.adaptretries = 50;
        run_adaptivity_checkpoint(&mut tx);
        assert!(tx.writethrough, "off-checkpoint commit counts must not retune");
    }
}
