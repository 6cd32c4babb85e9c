//! Per-transaction slab pool backing the write buffer.
//!
//! Slabs are fixed-size chunks of write-buffer entries. A transaction's
//! write buffer is a chain of slabs linked for iteration; slabs drained at
//! reset go back to a per-descriptor free list so the next attempt on the
//! same descriptor doesn't have to allocate.

use crate::config::{NR_WRITES_PER_SLAB, SLABS_PER_ALLOC};

/// One entry of the write buffer: the address written, its buffered value,
/// and (write-through mode only) the pre-image saved on first write so
/// abort can restore it.
#[derive(Clone, Copy, Debug)]
pub struct WriteEntry {
    pub addr: usize,
    pub value: usize,
    pub pre_image: Option<usize>,
    /// Next entry (by global write-buffer index) in the same hash bucket,
    /// once the write buffer has crossed into the hash regime.
    pub hash_link: Option<usize>,
}

impl WriteEntry {
    #[inline]
    pub fn new(addr: usize, value: usize) -> Self {
        WriteEntry {
            addr,
            value,
            pre_image: None,
            hash_link: None,
        }
    }
}

/// A fixed-capacity chunk of write-buffer entries.
#[derive(Debug)]
pub struct Slab {
    entries: Vec<WriteEntry>,
}

impl Slab {
    fn with_capacity() -> Self {
        Slab {
            entries: Vec::with_capacity(NR_WRITES_PER_SLAB),
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() == NR_WRITES_PER_SLAB
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn push(&mut self, entry: WriteEntry) -> usize {
        debug_assert!(!self.is_full(), "push into a full slab");
        let slot = self.entries.len();
        self.entries.push(entry);
        slot
    }

    #[inline]
    pub fn get(&self, slot: usize) -> &WriteEntry {
        &self.entries[slot]
    }

    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> &mut WriteEntry {
        &mut self.entries[slot]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &WriteEntry> {
        self.entries.iter()
    }

    /// Drops every entry, returning the slab to its just-allocated state.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-descriptor free list of retired slabs.
#[derive(Debug, Default)]
pub struct SlabPool {
    free: Vec<Slab>,
}

impl SlabPool {
    pub fn new() -> Self {
        SlabPool { free: Vec::new() }
    }

    /// Pops a clean slab from the free list, allocating a fresh batch of
    /// [`SLABS_PER_ALLOC`] if the pool has run dry.
    pub fn take(&mut self) -> Slab {
        if let Some(slab) = self.free.pop() {
            return slab;
        }
        for _ in 1..SLABS_PER_ALLOC {
            self.free.push(Slab::with_capacity());
        }
        Slab::with_capacity()
    }

    /// Returns a drained slab to the free list for reuse.
    pub fn recycle(&mut self, mut slab: Slab) {
        slab.clear();
        self.free.push(slab);
    }
}
