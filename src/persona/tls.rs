//! Per-thread persona state.
//!
//! Each thread owns a stack of active personas with its default persona at
//! the bottom, a flag telling whether it is inside a progress call, and the
//! runtime it is bound to (if any).
//!
//! No `RefCell` borrow taken here outlives the function that takes it, so
//! user code never runs while the stack is borrowed.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Persona, PersonaId};
use crate::diagnostic::fatal;
use crate::runtime::Runtime;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

struct StackEntry {
    persona: Persona,
    redundant: bool,
}

pub(crate) struct ThreadState {
    token: u64,
    stack: RefCell<Vec<StackEntry>>,
    progressing: Cell<bool>,
    idle_streak: Cell<u32>,
    runtime: RefCell<Option<Runtime>>,
    master_scope: Cell<Option<PersonaId>>,
}

impl ThreadState {
    fn new() -> Self {
        let token = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
        let default = Persona::new();
        default.claim(token);
        Self {
            token,
            stack: RefCell::new(vec![StackEntry {
                persona: default,
                redundant: false,
            }]),
            progressing: Cell::new(false),
            idle_streak: Cell::new(0),
            runtime: RefCell::new(None),
            master_scope: Cell::new(None),
        }
    }
}

thread_local! {
    static THREAD: ThreadState = ThreadState::new();
}

fn with<R>(f: impl FnOnce(&ThreadState) -> R) -> R {
    THREAD.with(f)
}

/// Identifies the calling thread for persona ownership.
pub(crate) fn thread_token() -> u64 {
    with(|t| t.token)
}

/// Pushes `persona` onto the calling thread's stack. Returns true when the
/// persona was already active on this thread (a redundant push).
#[track_caller]
pub(crate) fn push(persona: &Persona) -> bool {
    let token = thread_token();
    let redundant = match persona.owner() {
        owner if owner == token => true,
        0 if persona.try_claim(token) => false,
        _ => fatal(format!(
            "persona {} already active in another thread",
            persona.id()
        )),
    };
    with(|t| {
        t.stack.borrow_mut().push(StackEntry {
            persona: persona.clone(),
            redundant,
        });
    });
    redundant
}

/// Pops the top of the stack, which must be `expected`.
#[track_caller]
pub(crate) fn pop(expected: PersonaId) {
    let entry = with(|t| {
        let mut stack = t.stack.borrow_mut();
        match stack.last() {
            Some(top) if top.persona.id() == expected && stack.len() > 1 => stack.pop(),
            _ => None,
        }
    });
    let Some(entry) = entry else {
        fatal(format!(
            "persona scope for {expected} released out of LIFO order"
        ));
    };
    if !entry.redundant {
        entry.persona.release();
    }
}

/// The innermost active persona.
pub(crate) fn current() -> Persona {
    with(|t| {
        let stack = t.stack.borrow();
        stack
            .last()
            .map(|entry| entry.persona.clone())
            .unwrap_or_else(|| fatal("persona stack is empty"))
    })
}

/// The calling thread's default persona.
pub(crate) fn default_persona() -> Persona {
    with(|t| {
        let stack = t.stack.borrow();
        stack
            .first()
            .map(|entry| entry.persona.clone())
            .unwrap_or_else(|| fatal("persona stack is empty"))
    })
}

/// Distinct personas active on this thread, innermost first.
pub(crate) fn active_personas() -> Vec<Persona> {
    with(|t| {
        let stack = t.stack.borrow();
        let mut out: Vec<Persona> = Vec::with_capacity(stack.len());
        for entry in stack.iter().rev() {
            if !out.iter().any(|p| p.id() == entry.persona.id()) {
                out.push(entry.persona.clone());
            }
        }
        out
    })
}

pub(crate) fn in_progress() -> bool {
    with(|t| t.progressing.get())
}

/// Marks the thread as progressing. Returns false if it already was.
pub(crate) fn enter_progress() -> bool {
    with(|t| !t.progressing.replace(true))
}

pub(crate) fn leave_progress() {
    with(|t| t.progressing.set(false));
}

/// Records a progress call's outcome; returns true when the thread has been
/// idle for `yield_after` consecutive calls.
pub(crate) fn note_idle(executed: usize, yield_after: u32) -> bool {
    with(|t| {
        if executed > 0 {
            t.idle_streak.set(0);
            return false;
        }
        let streak = t.idle_streak.get() + 1;
        if streak >= yield_after {
            t.idle_streak.set(0);
            true
        } else {
            t.idle_streak.set(streak);
            false
        }
    })
}

pub(crate) fn runtime() -> Option<Runtime> {
    with(|t| t.runtime.borrow().clone())
}

/// Like [`runtime`] but safe to call while thread-locals are being torn
/// down.
pub(crate) fn try_runtime() -> Option<Runtime> {
    THREAD
        .try_with(|t| t.runtime.try_borrow().ok().and_then(|rt| rt.clone()))
        .ok()
        .flatten()
}

/// Binds the calling thread to `rt`. Returns false if it is already bound.
pub(crate) fn bind_runtime(rt: &Runtime) -> bool {
    with(|t| {
        let mut slot = t.runtime.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(rt.clone());
        true
    })
}

pub(crate) fn unbind_runtime() -> Option<Runtime> {
    with(|t| t.runtime.borrow_mut().take())
}

pub(crate) fn set_master_scope(id: Option<PersonaId>) {
    with(|t| t.master_scope.set(id));
}

pub(crate) fn master_scope() -> Option<PersonaId> {
    with(|t| t.master_scope.get())
}
