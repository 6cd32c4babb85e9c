//! The library context: a single value that owns the lock table, the global
//! clock, and the descriptor cache, so multiple independent STM universes
//! can coexist in one process rather than relying on process-global statics.

use crate::{cache::DescriptorCache, clock::GlobalClock, descriptor::TxDescriptor, lock::LockTable};

/// Owns every piece of process-wide (context-wide) mutable state the engine
/// touches: the lock table, the global version clock, and the descriptor
/// cache. Construct one with [`StmContext::init`]; it tears itself down on
/// `Drop`, so there is no separate `shutdown` call.
pub struct StmContext {
    pub(crate) locks: LockTable,
    pub(crate) clock: GlobalClock,
    pub(crate) cache: DescriptorCache,
}

impl StmContext {
    /// Builds the lock table, zeroes the clock, and prepares an empty
    /// descriptor cache.
    pub fn init() -> Self {
        StmContext {
            locks: LockTable::new(),
            clock: GlobalClock::new(),
            cache: DescriptorCache::new(),
        }
    }

    /// Returns a fresh or recycled descriptor.
    pub fn new_descriptor(&self) -> Box<TxDescriptor> {
        self.cache.acquire()
    }

    /// Returns a descriptor to this context's cache. The descriptor must be
    /// `Committed` or `Aborted` and hold no locks.
    pub fn delete_descriptor(&self, descriptor: Box<TxDescriptor>) {
        self.cache.release(descriptor);
    }

    /// Builds a thread-local convenience handle bound to this context.
    pub fn thread_key(&self) -> crate::thread_key::ThreadKey<'_> {
        crate::thread_key::ThreadKey::new(self)
    }
}

impl Drop for StmContext {
    /// Releases the table and drains the descriptor cache.
    fn drop(&mut self) {
        self.cache.drain();
    }
}

impl core::fmt::Debug for StmContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StmContext")
            .field("locks", &self.locks)
            .field("clock", &self.clock)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Default for StmContext {
    fn default() -> Self {
        Self::init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_descriptor_then_delete_recycles() {
        let ctx = StmContext::init();
        let tx = ctx.new_descriptor();
        ctx.delete_descriptor(tx);
        assert_eq!(ctx.cache.len(), 1);
    }
}
