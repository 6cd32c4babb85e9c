//! A word-granular software transactional memory library.
//!
//! `adaptstm` arbitrates concurrent access to plain shared memory addresses
//! through a table of versioned ownership locks, rather than through a typed
//! cell wrapper: every store and load goes through [`StmContext`] and names
//! the address it touches directly. This trades type safety at the API
//! boundary for the ability to transactionally manage memory that was
//! allocated outside the library (see [`engine::stm_malloc`]).
//!
//! # Examples
//!
//! Building a context and running a transaction through the thread-local
//! convenience layer:
//!
//! ```
//! use adaptstm::StmContext;
//!
//! let ctx = StmContext::init();
//! let key = ctx.thread_key();
//!
//! let mut counter: usize = 0;
//! let addr = &mut counter as *mut usize as usize;
//!
//! key.rw(|ctx, tx| unsafe { adaptstm::engine::store(ctx, tx, addr, 1) });
//! let seen = key.read(|ctx, tx| unsafe { adaptstm::engine::load(ctx, tx, addr) });
//! assert_eq!(seen, 1);
//! assert_eq!(counter, 1);
//! ```
//!
//! # Features
//!
//! * Adaptive by default: write mode (write-through vs. write-back), the
//!   write-buffer's hash table size, and its hash function all retune
//!   themselves every [`config::ADAPTIVITY_CHECKPOINT`] commits based on
//!   observed retry and collision rates. Disable the `adaptive` feature to
//!   pin write-through mode, the first hash function, and the initial hash
//!   size for a descriptor's whole lifetime.
//! * `stats` records extended per-descriptor counters (read/write-set sizes,
//!   collisions, yields) at commit time; see [`stats::Stats`].
//! * A conflict manager detects dead-locks by walking the `waiting_for` graph
//!   and falls back to bounded cooperative-yield back-off otherwise.
//!
//! ## Running transactions
//!
//! * [`ThreadKey::rw`] and [`ThreadKey::read`] run a closure to completion,
//!   retrying internally on every `Err(Retry)`.
//! * [`engine::start`], [`engine::load`], [`engine::store`],
//!   [`engine::commit`], [`engine::retry`], and [`engine::abort`] are the
//!   primitives those build on, for callers that want to manage the attempt
//!   loop themselves.

#![warn(missing_debug_implementations)]
#![warn(unused_lifetimes)]
#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

pub mod config;
mod bloom;
mod cache;
mod clock;
mod conflict;
pub mod context;
mod descriptor;
pub mod engine;
mod error;
mod lock;
mod memlog;
mod read_log;
pub mod stats;
mod slab;
pub mod thread_key;
mod write_log;

pub use context::StmContext;
pub use descriptor::{Status, TxDescriptor};
pub use error::{Retry, TxResult};
pub use thread_key::ThreadKey;
