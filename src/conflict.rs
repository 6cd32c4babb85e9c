//! The conflict manager: dead-lock detection over the `waiting_for` graph,
//! plus bounded cooperative-yield back-off before a blocked transaction
//! gives up and retries.

use crate::{
    config::MAX_YIELD,
    descriptor::{Status, TxDescriptor},
    lock::DescriptorId,
};

/// Walks `waiting_for` starting from `start`'s current edge. Returns `true`
/// if the chain cycles back to `start` (a dead-lock); returns `false` if it
/// runs off the edge of the graph (some descriptor in the chain is not
/// `Waiting`) or terminates without finding a cycle.
fn cycles_back_to(start: DescriptorId, first_hop: DescriptorId) -> bool {
    let mut current = first_hop;
    loop {
        if current == start {
            return true;
        }
        // SAFETY: see `DescriptorId::as_descriptor` — every id reachable via
        // `waiting_for` edges names a descriptor that is `Active` or
        // `Waiting`, hence alive.
        let descriptor = unsafe { current.as_descriptor() };
        if descriptor.status() != Status::Waiting {
            return false;
        }
        match descriptor.waiting_for() {
            Some(next) => current = next,
            None => return false,
        }
    }
}

/// One unit of back-off against a lock held by `other`: tracks the
/// `waiting_for` edge for dead-lock detection, cooperatively yields, and
/// reports whether the caller should keep retrying the acquire or give up.
pub(crate) struct Backoff {
    started: bool,
}

pub(crate) enum Step {
    KeepWaiting,
    GiveUp,
}

impl Backoff {
    #[inline]
    pub(crate) fn new() -> Self {
        Backoff { started: false }
    }

    /// Registers (or updates) the wait-for edge, checks for a dead-lock, and
    /// yields once. `exponential` selects the optional exponential drop-off
    /// on the yield budget.
    pub(crate) fn step(&mut self, tx: &mut TxDescriptor, other: DescriptorId, exponential: bool) -> Step {
        if !self.started {
            tx.set_status(Status::Waiting);
            tx.reset_yielded();
            self.started = true;
        }
        tx.set_waiting_for(Some(other));

        if cycles_back_to(tx.id(), other) {
            return Step::GiveUp;
        }

        std::thread::yield_now();
        let yielded = tx.inc_yielded();
        let budget = if exponential {
            MAX_YIELD.saturating_mul(tx.adaptretries as u32 + 1)
        } else {
            MAX_YIELD
        };
        if yielded > budget {
            Step::GiveUp
        } else {
            Step::KeepWaiting
        }
    }

    /// Restores `Active` status after a successful acquisition or a give-up
    /// (the caller is responsible for calling this exactly once per call to
    /// [`Backoff::step`] that actually transitioned to `Waiting`).
    pub(crate) fn finish(self, tx: &mut TxDescriptor) {
        if self.started {
            tx.set_status(Status::Active);
            tx.set_waiting_for(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TxDescriptor;

    #[test]
    fn two_cycle_is_detected() {
        let mut a = TxDescriptor::new();
        let mut b = TxDescriptor::new();
        a.set_status(Status::Waiting);
        b.set_status(Status::Waiting);
        a.set_waiting_for(Some(b.id()));
        b.set_waiting_for(Some(a.id()));
        assert!(cycles_back_to(a.id(), b.id()));

        let _ = &mut a;
        let _ = &mut b;
    }

    #[test]
    fn chain_that_leaves_waiting_is_tolerated() {
        let a = TxDescriptor::new();
        let b = TxDescriptor::new();
        a.set_status(Status::Waiting);
        b.set_status(Status::Active);
        a.set_waiting_for(Some(b.id()));
        assert!(!cycles_back_to(a.id(), b.id()));
    }

    #[test]
    fn backoff_gives_up_after_budget_exhausted() {
        let mut tx = TxDescriptor::new();
        let other = TxDescriptor::new();
        other.set_status(Status::Active);
        let mut backoff = Backoff::new();
        let mut steps = 0;
        loop {
            match backoff.step(&mut tx, other.id(), false) {
                Step::KeepWaiting => steps += 1,
                Step::GiveUp => break,
            }
            assert!(steps <= MAX_YIELD + 1, "backoff never gave up");
        }
        backoff.finish(&mut tx);
        assert_eq!(tx.status(), Status::Active);
    }
}
