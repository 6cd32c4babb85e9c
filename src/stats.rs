//! Extended per-descriptor statistics. Enabled with `--features stats`; a
//! zero-cost field when the feature is off, since `TxDescriptor` doesn't even
//! carry the `stats` field in that configuration.

use core::fmt::{self, Debug, Formatter};

#[derive(Copy, Clone, Default)]
struct MinMaxTotal {
    min: u64,
    max: u64,
    total: u64,
}

/// Running min/max/total/count over a size recorded once per commit.
#[derive(Default)]
pub struct Size {
    min_max_total: Option<MinMaxTotal>,
    count: u64,
}

impl Size {
    pub(crate) fn record(&mut self, size: u64) {
        self.count += 1;
        self.min_max_total = Some(match self.min_max_total {
            Some(prev) => MinMaxTotal {
                min: prev.min.min(size),
                max: prev.max.max(size),
                total: prev.total + size,
            },
            None => MinMaxTotal {
                min: size,
                max: size,
                total: size,
            },
        });
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<u64> {
        self.min_max_total.map(|x| x.min)
    }

    pub fn max(&self) -> Option<u64> {
        self.min_max_total.map(|x| x.max)
    }

    pub fn total(&self) -> u64 {
        self.min_max_total.map_or(0, |x| x.total)
    }

    pub fn avg(&self) -> f64 {
        self.total() as f64 / self.count as f64
    }
}

impl Debug for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Size")
            .field("count", &self.count)
            .field("min", &self.min())
            .field("max", &self.max())
            .field("total", &self.total())
            .field("avg", &self.avg())
            .finish()
    }
}

/// Per-descriptor statistics, recorded once per committed attempt.
#[derive(Default, Debug)]
pub struct Stats {
    /// Entries in the read buffer at commit time.
    pub read_size: Size,
    /// Entries in the write buffer at commit time.
    pub write_size: Size,
    /// Failed attempts (retries) this descriptor has absorbed so far.
    pub retries: Size,
    /// Write-buffer hash-chain collisions observed during the committed
    /// attempt (only meaningful once the write buffer is in its hashed
    /// regime).
    pub whash_collisions: Size,
    /// Cooperative yields spent waiting on locks during the committed
    /// attempt.
    pub yields: Size,
}

impl Stats {
    pub(crate) fn record_commit(&mut self, reads: u64, writes: u64, collisions: u64, yields: u64) {
        self.read_size.record(reads);
        self.write_size.record(writes);
        self.whash_collisions.record(collisions);
        self.yields.record(yields);
    }

    pub(crate) fn record_retry(&mut self) {
        self.retries.record(1);
    }
}
