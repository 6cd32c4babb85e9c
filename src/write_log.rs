//! The per-transaction write buffer.
//!
//! Entries live in slabs chained for in-order iteration at
//! write-back/undo time. Below [`NR_WRITES_BEFORE_HASH`](crate::config) the
//! buffer is searched linearly; above it, a chained hash keyed by address is
//! built once and kept in sync. A [`Bloom`] summary lets misses in the hash
//! regime skip the chain walk entirely.

use crate::{
    bloom::Bloom,
    config::{NR_WRITES_BEFORE_HASH, NR_WRITES_PER_SLAB},
    slab::{Slab, SlabPool, WriteEntry},
};

/// Selects one of [`NR_ADAPTIVE_HASH_FUNCTIONS`](crate::config) simple
/// bucket hashes of `addr`, each a different right-shift width.
#[inline]
fn bucket_of(addr: usize, hash_fn: u32, table_len: usize) -> usize {
    debug_assert!(table_len.is_power_of_two());
    let shift = 2 + hash_fn;
    (addr >> shift) & (table_len - 1)
}

/// Outcome of a [`WriteLog::lookup_or_insert`] call.
pub struct LookupOutcome {
    /// Flat index usable with [`WriteLog::entry`]/[`WriteLog::entry_mut`].
    pub index: usize,
    /// `true` if this call created the entry.
    pub inserted: bool,
    /// Number of hash-chain links walked to resolve this lookup, for the
    /// caller to fold into `whashcollisions` for adaptive hash rotation.
    pub collisions: u64,
}

/// Per-transaction set of (address, value) write-buffer entries.
#[derive(Debug, Default)]
pub struct WriteLog {
    slabs: Vec<Slab>,
    pool: SlabPool,
    bloom: Bloom,
    /// `None` in the small (linear-search) regime; `Some(table)` once the
    /// hash regime has been built for this attempt.
    hash: Option<Vec<Option<usize>>>,
    count: usize,
}

impl WriteLog {
    pub fn new() -> Self {
        WriteLog {
            slabs: Vec::new(),
            pool: SlabPool::new(),
            bloom: Bloom::new(),
            hash: None,
            count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn may_contain(&self, addr: usize) -> bool {
        self.bloom.may_contain(addr)
    }

    #[inline]
    pub fn entry(&self, index: usize) -> &WriteEntry {
        self.slabs[index / NR_WRITES_PER_SLAB].get(index % NR_WRITES_PER_SLAB)
    }

    #[inline]
    pub fn entry_mut(&mut self, index: usize) -> &mut WriteEntry {
        self.slabs[index / NR_WRITES_PER_SLAB].get_mut(index % NR_WRITES_PER_SLAB)
    }

    fn push_slab_entry(&mut self, entry: WriteEntry) -> usize {
        if self.slabs.last().map_or(true, Slab::is_full) {
            let fresh = self.pool.take();
            self.slabs.push(fresh);
        }
        let slab_index = self.slabs.len() - 1;
        let slot = self.slabs[slab_index].push(entry);
        slab_index * NR_WRITES_PER_SLAB + slot
    }

    fn linear_find(&self, addr: usize) -> Option<usize> {
        for (slab_index, slab) in self.slabs.iter().enumerate() {
            for slot in 0..slab.len() {
                if slab.get(slot).addr == addr {
                    return Some(slab_index * NR_WRITES_PER_SLAB + slot);
                }
            }
        }
        None
    }

    fn hashed_find(&self, addr: usize, hash_fn: u32) -> (Option<usize>, u64) {
        if !self.bloom.may_contain(addr) {
            return (None, 0);
        }
        let table = self
            .hash
            .as_ref()
            .expect("hashed_find called before the hash regime was built");
        let bucket = bucket_of(addr, hash_fn, table.len());
        let mut cursor = table[bucket];
        let mut collisions = 0u64;
        while let Some(index) = cursor {
            let entry = self.entry(index);
            if entry.addr == addr {
                return (Some(index), collisions);
            }
            cursor = entry.hash_link;
            collisions += 1;
        }
        (None, collisions)
    }

    /// Builds the chained hash table from the entries already present,
    /// rehashing everything.
    fn build_hash(&mut self, whashsize: usize, hash_fn: u32) {
        let mut table = vec![None; whashsize];
        for index in 0..self.count {
            let bucket = bucket_of(self.entry(index).addr, hash_fn, whashsize);
            let head = table[bucket];
            self.entry_mut(index).hash_link = head;
            table[bucket] = Some(index);
        }
        self.hash = Some(table);
    }

    /// Looks up `addr`; on miss and `allocate`, appends a fresh entry and
    /// links it into the hash chain if the buffer is in the hash regime.
    /// Returns `None` on a miss with `allocate == false`.
    pub fn lookup_or_insert(
        &mut self,
        addr: usize,
        hash_fn: u32,
        whashsize: usize,
        allocate: bool,
    ) -> Option<LookupOutcome> {
        if self.hash.is_none() && self.count >= NR_WRITES_BEFORE_HASH {
            self.build_hash(whashsize, hash_fn);
        }

        let (found, collisions) = if self.hash.is_some() {
            self.hashed_find(addr, hash_fn)
        } else {
            (self.linear_find(addr), 0)
        };

        if let Some(index) = found {
            return Some(LookupOutcome {
                index,
                inserted: false,
                collisions,
            });
        }
        if !allocate {
            return None;
        }

        let index = self.push_slab_entry(WriteEntry::new(addr, 0));
        self.bloom.insert(addr);
        self.count += 1;

        if self.hash.is_some() {
            let table_len = self.hash.as_ref().unwrap().len();
            let bucket = bucket_of(addr, hash_fn, table_len);
            let head = self.hash.as_ref().unwrap()[bucket];
            self.entry_mut(index).hash_link = head;
            self.hash.as_mut().unwrap()[bucket] = Some(index);
        }

        Some(LookupOutcome {
            index,
            inserted: true,
            collisions,
        })
    }

    /// Iterates every entry in slab (insertion) order, for write-back at
    /// commit or undo at abort.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &WriteEntry> {
        self.slabs.iter().flat_map(Slab::iter)
    }

    /// Drops all slabs except the first (cleared to empty) and returns the
    /// rest to the free list; clears the bloom summary and hash index.
    pub fn reset(&mut self) {
        let mut slabs = std::mem::take(&mut self.slabs);
        if !slabs.is_empty() {
            let mut first = slabs.remove(0);
            first.clear();
            for drained in slabs {
                self.pool.recycle(drained);
            }
            self.slabs.push(first);
        }
        self.hash = None;
        self.bloom.clear();
        self.count = 0;
    }
}
