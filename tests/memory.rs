//! Multi-threaded integration tests against ordinary stack/heap memory,
//! mirroring the teacher's `tests/memory.rs` (which exercises its `TCell`
//! under many threads; here the same shape of test drives raw addresses
//! through `StmContext` instead).

use adaptstm::{engine, StmContext};
use crossbeam_utils::thread;

#[test]
fn single_thread_many_allocations_leak_nothing() {
    const ITER_COUNT: usize = 10_000;
    let ctx = StmContext::init();
    let key = ctx.thread_key();
    for _ in 0..ITER_COUNT {
        key.rw(|ctx, tx| {
            let p = engine::stm_malloc(tx, core::mem::size_of::<usize>());
            unsafe { engine::store(ctx, tx, p as usize, 7) }?;
            unsafe { engine::stm_free(ctx, tx, p, core::mem::size_of::<usize>()) }
        });
    }
}

#[test]
fn many_threads_increment_a_shared_counter() {
    const ITER_COUNT: usize = 2_000;
    const THREAD_COUNT: usize = 8;
    let ctx = StmContext::init();
    let mut counter: usize = 0;
    let addr = &mut counter as *mut usize as usize;

    thread::scope(|s| {
        for _ in 0..THREAD_COUNT {
            s.spawn(|_| {
                let key = ctx.thread_key();
                for _ in 0..ITER_COUNT {
                    key.rw(|ctx, tx| {
                        let current = unsafe { engine::load(ctx, tx, addr) }?;
                        unsafe { engine::store(ctx, tx, addr, current + 1) }
                    });
                }
            });
        }
    })
    .unwrap();

    assert_eq!(counter, ITER_COUNT * THREAD_COUNT);
}

#[test]
fn readers_never_see_a_torn_pair() {
    const ITER_COUNT: usize = 2_000;
    let ctx = StmContext::init();
    let mut pair = [0isize, 0isize];
    let addr_a = &mut pair[0] as *mut isize as usize;
    let addr_b = &mut pair[1] as *mut isize as usize;

    thread::scope(|s| {
        s.spawn(|_| {
            let key = ctx.thread_key();
            for i in 0..ITER_COUNT {
                key.rw(|ctx, tx| {
                    unsafe { engine::store(ctx, tx, addr_a, i) }?;
                    unsafe { engine::store(ctx, tx, addr_b, 0usize.wrapping_sub(i)) }
                });
            }
        });
        s.spawn(|_| {
            let key = ctx.thread_key();
            for _ in 0..ITER_COUNT {
                key.read(|ctx, tx| {
                    let a = unsafe { engine::load(ctx, tx, addr_a) }? as isize;
                    let b = unsafe { engine::load(ctx, tx, addr_b) }? as isize;
                    assert_eq!(a, -b);
                    Ok(())
                });
            }
        });
    })
    .unwrap();
}
