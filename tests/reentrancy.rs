//! Mirrors the shape of the teacher's `tests/reentrancy.rs`: a single OS
//! thread must not be able to run two transactions through the same
//! `ThreadKey` at once.

use adaptstm::StmContext;

#[test]
#[should_panic(expected = "nested transactions are not yet supported")]
fn nested_read_inside_rw_panics() {
    let ctx = StmContext::init();
    let key = ctx.thread_key();
    key.rw(|_ctx, _tx| {
        key.read(|_ctx2, _tx2| Ok(()));
        Ok(())
    });
}

#[test]
fn sequential_transactions_on_the_same_key_do_not_panic() {
    let ctx = StmContext::init();
    let key = ctx.thread_key();
    let mut counter: usize = 0;
    let addr = &mut counter as *mut usize as usize;

    for i in 1..=10usize {
        key.rw(|ctx, tx| unsafe { adaptstm::engine::store(ctx, tx, addr, i) });
    }
    assert_eq!(counter, 10);
}
