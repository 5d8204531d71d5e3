//! The progress engine.
//!
//! There is no runtime thread. Deferred work runs only inside [`progress`],
//! called explicitly or by [`Future::wait`](crate::Future::wait) and the
//! blocking collectives. One call polls the transport (when the thread is
//! bound to a runtime), then visits every persona active on the calling
//! thread, innermost first, each made current while it is drained:
//!
//! 1. completed network callbacks (`handle_burst`),
//! 2. the internal mailbox (`lpc_burst`),
//! 3. the user mailbox (`lpc_burst`), only at [`ProgressLevel::User`].
//!
//! The round repeats until a round executes nothing or the level's budget is
//! spent. Work queued by the work being run lands in the live mailbox and is
//! picked up by the next round, so a callback that enqueues more work never
//! recurses. A nested call (from inside a callback) returns 0 at once.

use crate::inbox::ProgressLevel;
use crate::persona::tls;
use crate::runtime::config::ProgressBudgets;
use crate::tracing_compat::trace;

struct ProgressGuard;

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        tls::leave_progress();
    }
}

/// Returns true while the calling thread is inside a progress call.
#[must_use]
pub fn in_progress() -> bool {
    tls::in_progress()
}

/// Runs queued work for the personas active on this thread. Returns the
/// number of work items executed.
pub fn progress(level: ProgressLevel) -> usize {
    if !tls::enter_progress() {
        return 0;
    }
    let _guard = ProgressGuard;

    let runtime = tls::runtime();
    let budgets = runtime
        .as_ref()
        .map_or_else(ProgressBudgets::default, |rt| rt.config().budgets());
    let budget = match level {
        ProgressLevel::User => budgets.user,
        ProgressLevel::Internal => budgets.internal,
    };

    let mut total = 0;
    loop {
        let mut executed = 0;
        if let Some(rt) = &runtime {
            executed += rt.poll_transport(budgets.packet_burst);
        }
        for persona in tls::active_personas() {
            let _scope = persona.activate();
            executed += persona.handle_cbs().burst(budgets.handle_burst);
            executed += persona.burst(ProgressLevel::Internal, budgets.lpc_burst);
            if level == ProgressLevel::User {
                executed += persona.burst(ProgressLevel::User, budgets.lpc_burst);
            }
        }
        total += executed;
        if executed == 0 || total >= budget {
            break;
        }
    }

    if let Some(rt) = &runtime {
        let metrics = rt.metrics();
        metrics.progress_calls.increment();
        metrics.work_executed.add(total as u64);
    }
    if total > 0 {
        trace!(?level, executed = total, "progress");
    }
    if tls::note_idle(total, budgets.idle_yield_after) {
        std::thread::yield_now();
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{current_persona, Persona};
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn user_level_runs_user_work_internal_does_not() {
        init_test_logging();
        crate::test_phase!("user_level_runs_user_work_internal_does_not");
        let persona = current_persona();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        persona.lpc_ff(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(progress(ProgressLevel::Internal), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(progress(ProgressLevel::User), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        crate::test_complete!("user_level_runs_user_work_internal_does_not");
    }

    #[test]
    fn nested_progress_returns_zero() {
        init_test_logging();
        let persona = current_persona();
        let nested = Arc::new(AtomicUsize::new(usize::MAX));
        let n = Arc::clone(&nested);
        persona.lpc_ff(move || {
            assert!(in_progress());
            n.store(progress(ProgressLevel::User), Ordering::SeqCst);
        });
        persona.lpc_ff(|| {});
        progress(ProgressLevel::User);
        assert_eq!(nested.load(Ordering::SeqCst), 0);
        assert!(!in_progress());
    }

    #[test]
    fn work_enqueued_by_work_runs_in_a_later_round() {
        init_test_logging();
        let persona = current_persona();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        let target = persona.clone();
        persona.lpc_ff(move || {
            o.lock().push("first");
            let o = Arc::clone(&o);
            target.lpc_ff(move || o.lock().push("chained"));
        });
        let executed = progress(ProgressLevel::User);
        assert_eq!(executed, 2);
        assert_eq!(*order.lock(), vec!["first", "chained"]);
    }

    #[test]
    fn drains_every_active_persona() {
        init_test_logging();
        let outer = current_persona();
        let inner = Persona::new();
        let _scope = inner.activate();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for (label, persona) in [("outer", outer), ("inner", inner.clone())] {
            let s = Arc::clone(&seen);
            let expect = persona.clone();
            persona.lpc_ff(move || {
                assert_eq!(current_persona(), expect);
                s.lock().push(label);
            });
        }
        progress(ProgressLevel::User);
        assert_eq!(*seen.lock(), vec!["inner", "outer"]);
    }

    #[test]
    fn inactive_persona_is_not_drained() {
        init_test_logging();
        let idle = Persona::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        idle.lpc_ff(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        progress(ProgressLevel::User);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(idle.queued(), 1);
    }
}
