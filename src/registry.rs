//! Process-wide and per-thread default contexts.
//!
//! Code that doesn't want to thread an explicit `Context` through every call
//! asks here. The answer is deterministic and worth spelling out, because
//! it's where main-loop libraries traditionally surprise people:
//!
//! * Every process has exactly one *global default* context, created lazily
//!   the first time anybody asks. Two threads that never pushed anything
//!   both get this very instance, so their timeouts end up on the same
//!   context and run on whichever single thread dispatches it.
//! * A thread may *push* a context as its own default. From then on (and
//!   only on that thread) `current_default` answers the pushed context,
//!   until a matching pop. Pushes nest; pops must balance.
//!
//! Nothing in the crate consults the defaults behind your back: a `Loop` is
//! always created over an explicitly named context. The registry only
//! exists so that callers can share one context by convention instead of by
//! parameter.

use std::cell::RefCell;

use context::Context;
use error::{Error, Result};

lazy_static! {
    // If allocating the polling handle fails this early in the process
    // life, there's no event loop to be had at all; treat it as fatal, the
    // same way allocation failure would be.
    static ref GLOBAL_DEFAULT: Context =
        Context::new().expect("Can't allocate the process-default context");
}

thread_local! {
    /// The override stack of the current thread. Strictly thread-local, so
    /// no locking; the entries die with the thread, which is exactly the
    /// lifecycle the default rules ask for.
    static THREAD_DEFAULT: RefCell<Vec<Context>> = RefCell::new(Vec::new());
}

/// The process-wide default context.
///
/// Always the same instance, for the whole process lifetime, no matter
/// which thread asks.
pub fn global_default() -> Context {
    GLOBAL_DEFAULT.clone()
}

/// The calling thread's pushed default, if it pushed one.
///
/// `None` means the thread never pushed (or popped everything); such a
/// thread implicitly works on the global default.
pub fn thread_default() -> Option<Context> {
    THREAD_DEFAULT.with(|stack| stack.borrow().last().cloned())
}

/// The context the calling thread should use when none is given explicitly:
/// its innermost pushed override, or the global default.
pub fn current_default() -> Context {
    thread_default().unwrap_or_else(global_default)
}

/// Push a context as the calling thread's default.
///
/// Replaces the visible default until the matching
/// [`pop_thread_default`](fn.pop_thread_default.html); the previous one is
/// remembered and comes back on pop.
pub fn push_thread_default(context: &Context) {
    THREAD_DEFAULT.with(|stack| stack.borrow_mut().push(context.clone()));
}

/// Undo the innermost push of the calling thread.
///
/// Popping with nothing pushed is a misuse and fails with
/// `UnbalancedContextStack` rather than quietly eating the global default.
pub fn pop_thread_default() -> Result<()> {
    THREAD_DEFAULT.with(|stack| match stack.borrow_mut().pop() {
        Some(_) => Ok(()),
        None => Err(Error::UnbalancedContextStack),
    })
}
