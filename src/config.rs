//! Compile-time tunables.
//!
//! The original C implementation exposed these as preprocessor defines
//! (`LOCK_HASH_ARRAY_SIZE`, `NRWBEFOREHASH`, ...); here they're plain
//! constants so the whole crate sees one definition.

/// Number of entries in the lock table. Must be a power of two.
pub const LOCK_TABLE_SIZE: usize = 1 << 22;

/// Each lock covers a `2^LOCK_GRANULARITY_SHIFT`-byte stripe of address space.
pub const LOCK_GRANULARITY_SHIFT: u32 = 5;

/// Write-buffer entries kept in the small-array fast path before switching
/// to the hash regime.
pub const NR_WRITES_BEFORE_HASH: usize = 10;

/// Entries held per write-buffer slab.
pub const NR_WRITES_PER_SLAB: usize = 64;

/// Slabs carved out of a single bulk allocation when a transaction's slab
/// free list runs dry.
pub const SLABS_PER_ALLOC: usize = 4;

/// Initial write-buffer hash table size once the hash regime kicks in.
pub const WBUF_HASH_INITIAL_SIZE: usize = 32;

/// Upper bound for the write-buffer hash table size.
pub const WBUF_HASH_MAX_SIZE: usize = 1024;

/// Lower bound for the write-buffer hash table size.
pub const WBUF_HASH_MIN_SIZE: usize = 16;

/// Number of distinct bit-shift hash functions `adaptive_hash` can select among.
pub const NR_ADAPTIVE_HASH_FUNCTIONS: u32 = 6;

/// Re-evaluate the adaptive policy (write mode, hash size, hash function)
/// every this-many commits.
pub const ADAPTIVITY_CHECKPOINT: u64 = 64;

/// Switch to write-back mode once the retry/commit ratio exceeds this
/// percentage.
pub const WRITETHROUGH_RETRY_THRESHOLD_PERCENT: u64 = 60;

/// Double the write-buffer hash table when the average load exceeds this
/// percentage of its current size.
pub const WHASH_GROW_LOAD_PERCENT: u64 = 33;

/// Halve the write-buffer hash table when the average load falls below this
/// percentage of its current size.
pub const WHASH_SHRINK_LOAD_PERCENT: u64 = 10;

/// Rotate the adaptive hash function once collisions exceed this percentage
/// of total write-buffer lookups.
pub const WHASH_COLLISION_ROTATE_PERCENT: u64 = 10;

/// Cooperative-yield budget before a waiting transaction gives up on a lock
/// and retries.
pub const MAX_YIELD: u32 = 4;

/// Free sentinel stored in an unlocked lock-table slot. Odd, so it can never
/// be confused with an even committed version.
pub const LOCK_FREE_SENTINEL: usize = 1;

/// The value the global clock (and every freshly-reset lock slot's implicit
/// "last known version") starts at. Always even so it never collides with
/// [`LOCK_FREE_SENTINEL`].
pub const INITIAL_VERSION: u64 = 0;
