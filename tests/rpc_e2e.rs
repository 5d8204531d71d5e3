//! RPC scenarios across in-process ranks.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use pgasync::ProgressLevel;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn rpc_to_rank_two_returns_incremented_value() {
    init_test_logging();
    test_phase!("rpc_to_rank_two_returns_incremented_value");
    let got = run_job(4, |rt| {
        let before = rt.stats();
        let answer = if rt.rank_me() == 0 {
            Some(rt.rpc(2, |x: i32| x + 1, 41).wait())
        } else {
            None
        };
        rt.barrier();
        let executed = rt.stats().rpcs_executed - before.rpcs_executed;
        (answer, executed)
    });

    assert_eq!(got[0].0, Some(42));
    let executed: Vec<u64> = got.iter().map(|(_, n)| *n).collect();
    assert_with_log!(
        executed == vec![0, 0, 1, 0],
        "only rank 2 ran the body",
        vec![0, 0, 1, 0],
        executed
    );
    test_complete!("rpc_to_rank_two_returns_incremented_value");
}

#[test]
fn bodies_from_one_origin_run_in_issue_order() {
    init_test_logging();
    test_phase!("bodies_from_one_origin_run_in_issue_order");
    let seen: Arc<Mutex<Vec<u32>>> = Arc::default();
    run_job(2, |rt| {
        if rt.rank_me() == 0 {
            let first = {
                let seen = Arc::clone(&seen);
                rt.rpc(1, move |()| seen.lock().push(1), ())
            };
            let second = {
                let seen = Arc::clone(&seen);
                rt.rpc(1, move |()| seen.lock().push(2), ())
            };
            second.wait();
            first.wait();
        }
        rt.barrier();
    });
    assert_eq!(*seen.lock(), vec![1, 2]);
    test_complete!("bodies_from_one_origin_run_in_issue_order");
}

#[test]
fn ring_acknowledgement_with_rpc_ff() {
    init_test_logging();
    let acks: Arc<Mutex<Vec<usize>>> = Arc::default();
    run_job(5, |rt| {
        let n = rt.rank_n();
        let next = (rt.rank_me() + 1) % n;
        let origin = rt.rank_me();
        let acks = Arc::clone(&acks);
        rt.rpc_ff(
            next,
            move |from: usize| {
                let rt = pgasync::Runtime::current();
                rt.rpc_ff(from, move |by: usize| acks.lock().push(by), rt.rank_me());
            },
            origin,
        );
        // Two barriers: the forward hop drains in the first, the ack in the second.
        rt.barrier();
        rt.barrier();
    });
    let mut acks = acks.lock().clone();
    acks.sort_unstable();
    assert_eq!(acks, vec![0, 1, 2, 3, 4]);
}

#[test]
fn order_holds_with_several_threads_polling_one_rank() {
    const MESSAGES: u32 = 5_000;
    const HELPERS: usize = 3;
    init_test_logging();
    test_phase!("order_holds_with_several_threads_polling_one_rank");
    let seen: Arc<Mutex<Vec<u32>>> = Arc::default();
    let done = Arc::new(AtomicBool::new(false));
    run_job(2, |rt| {
        if rt.rank_me() == 1 {
            for i in 0..MESSAGES {
                let seen = Arc::clone(&seen);
                rt.rpc_ff(0, move |i: u32| seen.lock().push(i), i);
            }
            let done = Arc::clone(&done);
            rt.rpc_ff(0, move |()| done.store(true, Ordering::Release), ());
        } else {
            std::thread::scope(|s| {
                for _ in 0..HELPERS {
                    s.spawn(|| {
                        let _bound = rt.enter().expect("par mode allows enter");
                        while !done.load(Ordering::Acquire) {
                            pgasync::progress(ProgressLevel::User);
                        }
                    });
                }
                // Only this thread holds the master persona, so only it runs bodies.
                while !done.load(Ordering::Acquire) {
                    rt.progress(ProgressLevel::User);
                }
            });
        }
        rt.barrier();
    });

    let seen = seen.lock();
    let inversions = seen.windows(2).filter(|w| w[0] > w[1]).count();
    assert_with_log!(inversions == 0, "bodies run in issue order", 0, inversions);
    assert_eq!(seen.len(), MESSAGES as usize);
    test_complete!("order_holds_with_several_threads_polling_one_rank", inversions = inversions);
}

#[test]
fn threads_of_one_rank_each_get_their_own_replies() {
    const THREADS: usize = 4;
    const CALLS: usize = 50;
    init_test_logging();
    test_phase!("threads_of_one_rank_each_get_their_own_replies");
    let got = run_job(2, |rt| {
        if rt.rank_me() != 0 {
            rt.barrier();
            return Vec::new();
        }
        let per_thread = std::thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|t| {
                    s.spawn(move || {
                        let _bound = rt.enter().expect("par mode allows enter");
                        (0..CALLS)
                            .map(|i| rt.rpc(1, |x: usize| x * 2, t * 1000 + i).wait())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().expect("worker thread"))
                .collect::<Vec<_>>()
        });
        rt.barrier();
        per_thread
    });

    for (t, replies) in got[0].iter().enumerate() {
        let expected: Vec<usize> = (0..CALLS).map(|i| (t * 1000 + i) * 2).collect();
        assert_eq!(*replies, expected);
    }
    test_complete!("threads_of_one_rank_each_get_their_own_replies");
}

#[test]
fn master_persona_handed_to_another_thread() {
    init_test_logging();
    test_phase!("master_persona_handed_to_another_thread");
    let got = run_job(2, |rt| {
        if rt.rank_me() == 1 {
            let tripled = rt.rpc(0, |x: u32| x * 3, 5).wait();
            rt.barrier();
            return (tripled, 0);
        }

        test_section!("liberate");
        rt.liberate_master_persona();
        assert!(!rt.master_persona().is_active());
        let served = Arc::new(AtomicUsize::new(0));
        let answer = std::thread::scope(|s| {
            s.spawn(|| {
                let _bound = rt.enter().expect("par mode allows enter");
                let _master = rt.master_persona().activate();
                let answer = rt.rpc(1, |x: u32| x + 100, 1).wait();
                // Incoming RPCs now run on this thread.
                let served_rpc = Arc::clone(&served);
                rt.rpc_ff(
                    0,
                    move |()| {
                        served_rpc.fetch_add(1, Ordering::SeqCst);
                    },
                    (),
                );
                while served.load(Ordering::SeqCst) == 0 {
                    rt.progress(ProgressLevel::User);
                }
                answer
            })
            .join()
            .expect("master thread")
        });

        test_section!("reclaim");
        let _master = rt.master_persona().activate();
        assert!(rt.master_persona().active_with_caller());
        rt.barrier();
        (answer, served.load(Ordering::SeqCst))
    });

    assert_eq!(got[0], (101, 1));
    assert_eq!(got[1].0, 15);
    test_complete!("master_persona_handed_to_another_thread");
}
