//! Remote procedure calls.
//!
//! An RPC is an active message carrying the callable and its argument. It is
//! queued on the destination's master persona at user level and runs during
//! a user-level progress call there, even when the destination is the
//! calling rank. Messages from one rank to another run in issue order.
//!
//! The round-trip form ships the (flattened) result back to the persona that
//! issued the call, where it fulfils the returned future during that
//! persona's progress.
//!
//! Arguments and results move between ranks by value; every rank lives in
//! this address space, so no byte encoding is involved.

use std::sync::Arc;

use crate::future::{Future, FutureCell, Resolve};
use crate::inbox::ProgressLevel;
use crate::persona::current_persona;
use crate::runtime::Runtime;
use crate::tracing_compat::trace;
use crate::transport::Recipient;
use crate::Rank;

impl Runtime {
    /// Runs `f(arg)` on rank `dest`. No result, no completion.
    #[track_caller]
    pub fn rpc_ff<F, A>(&self, dest: Rank, f: F, arg: A)
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        self.metrics().rpcs_sent.increment();
        trace!(from = self.rank_me(), to = dest, "rpc_ff");
        self.send(
            dest,
            Recipient::Master,
            ProgressLevel::User,
            Box::new(move |rt| {
                rt.metrics().rpcs_executed.increment();
                f(arg);
            }),
        );
    }

    /// Runs `f(arg)` on rank `dest` and returns a future of its result,
    /// bound to the calling persona.
    #[track_caller]
    pub fn rpc<F, A, R>(&self, dest: Rank, f: F, arg: A) -> Future<R::Value>
    where
        F: FnOnce(A) -> R + Send + 'static,
        A: Send + 'static,
        R: Resolve,
    {
        self.rpc_with(dest, move |_| f(arg))
    }

    /// Round-trip RPC whose body also receives the destination's runtime.
    #[track_caller]
    pub(crate) fn rpc_with<F, R>(&self, dest: Rank, f: F) -> Future<R::Value>
    where
        F: FnOnce(&Runtime) -> R + Send + 'static,
        R: Resolve,
    {
        let origin = self.rank_me();
        let reply_to = current_persona().id();
        let cell = FutureCell::pending();
        let target = Arc::clone(&cell);
        self.metrics().rpcs_sent.increment();
        trace!(from = origin, to = dest, persona = %reply_to, "rpc");

        self.send(
            dest,
            Recipient::Master,
            ProgressLevel::User,
            Box::new(move |rt| {
                rt.metrics().rpcs_executed.increment();
                let weak = rt.downgrade();
                f(rt).resolve().on_ready(move |value| {
                    let Some(rt) = Runtime::from_weak(&weak) else {
                        return;
                    };
                    rt.send(
                        origin,
                        Recipient::Persona(reply_to),
                        ProgressLevel::User,
                        Box::new(move |_| target.fulfill(value)),
                    );
                });
            }),
        );
        Future::from_cell(cell)
    }
}
