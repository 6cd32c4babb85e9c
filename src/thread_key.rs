//! Thread-local convenience layer: wraps a checked-out descriptor and
//! the start/commit retry loop so callers write plain closures instead of
//! hand-rolling the `Retry` loop themselves.

use core::cell::RefCell;

use crate::{context::StmContext, descriptor::TxDescriptor, engine, error::TxResult};

/// A descriptor checked out of a context, plus the retry loop around it.
///
/// Not `Sync`: a `ThreadKey` is meant to be built once per thread (or per
/// task) via [`StmContext::thread_key`](crate::context::StmContext::thread_key)
/// and reused across many transactions on that thread.
pub struct ThreadKey<'ctx> {
    ctx: &'ctx StmContext,
    descriptor: RefCell<Box<TxDescriptor>>,
}

impl<'ctx> ThreadKey<'ctx> {
    pub(crate) fn new(ctx: &'ctx StmContext) -> Self {
        ThreadKey {
            ctx,
            descriptor: RefCell::new(ctx.new_descriptor()),
        }
    }

    /// Runs `body` as a read-write transaction, retrying it from scratch
    /// every time it returns `Err(Retry)` or its commit is invalidated by a
    /// conflicting writer, until it commits.
    pub fn rw<F, T>(&self, body: F) -> T
    where
        F: FnMut(&StmContext, &mut TxDescriptor) -> TxResult<T>,
    {
        self.run(body)
    }

    /// Runs `body` as a read-only transaction. Behaves exactly like
    /// [`ThreadKey::rw`]; kept as a distinct name so call sites document
    /// their intent even though the engine doesn't special-case read-only
    /// attempts beyond `commit`'s own empty-write-log fast path.
    pub fn read<F, T>(&self, body: F) -> T
    where
        F: FnMut(&StmContext, &mut TxDescriptor) -> TxResult<T>,
    {
        self.run(body)
    }

    fn run<F, T>(&self, mut body: F) -> T
    where
        F: FnMut(&StmContext, &mut TxDescriptor) -> TxResult<T>,
    {
        let mut slot = self
            .descriptor
            .try_borrow_mut()
            .unwrap_or_else(|_| panic!("nested transactions are not yet supported"));
        let tx = &mut *slot;

        loop {
            engine::start(self.ctx, tx);
            match body(self.ctx, tx) {
                Ok(value) => match engine::commit(self.ctx, tx) {
                    Ok(()) => return value,
                    Err(_) => continue,
                },
                Err(_) => continue,
            }
        }
    }
}

impl Drop for ThreadKey<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.descriptor.try_borrow_mut() {
            let descriptor = core::mem::replace(&mut *slot, TxDescriptor::new());
            self.ctx.delete_descriptor(descriptor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "nested transactions are not yet supported")]
    fn nested_rw_panics() {
        let ctx = StmContext::init();
        let key = ctx.thread_key();
        key.rw(|_ctx, _tx| {
            key.rw(|_ctx2, _tx2| Ok(()));
            Ok(())
        });
    }

    #[test]
    fn rw_retries_until_commit_succeeds() {
        let ctx = StmContext::init();
        let key = ctx.thread_key();
        let mut attempts = 0;
        let result = key.rw(|_ctx, _tx| {
            attempts += 1;
            if attempts < 3 {
                Err(crate::error::Retry)
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result, 3);
    }

    #[test]
    fn rw_runs_a_store_to_completion() {
        let ctx = StmContext::init();
        let key = ctx.thread_key();
        let mut slot: usize = 0;
        let addr = &mut slot as *mut usize as usize;

        key.rw(|ctx, tx| unsafe { engine::store(ctx, tx, addr, 7) });
        assert_eq!(slot, 7);
    }
}
