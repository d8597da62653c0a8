//! The context: a bag of timeout sources, a mailbox and a wakeup primitive.
//!
//! A `Context` is the unit of "which loop runs my callback". It can be
//! cloned and handed to as many threads as you like ‑ registration,
//! submission and stopping are all safe from anywhere. Dispatching it is
//! another matter: only one `Loop` at a time may drive a given context, and
//! that is enforced by handing out the dispatch driver to exactly one owner.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use linked_hash_map::LinkedHashMap;
use mio::{Events, Poll, PollOpt, Ready, Registration, SetReadiness, Token};

use core::Loop;
use error::{Error, Result};
use registry;

/// The token the wakeup registration sits on. There's nothing else in the
/// poll, but the constant keeps it honest.
const WAKEUP: Token = Token(0);

/// What a timeout callback wants to happen to its registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Continuation {
    /// Keep the source registered and fire it again after its interval.
    Continue,
    /// Remove the source; the callback won't be called again.
    Stop,
}

/// What a callback returns.
///
/// The continue/stop decision travels inside a `Result`, so a callback can
/// also fail. A failing callback is removed and its error aborts the current
/// dispatch cycle, propagating out of `run`.
pub type Response = Result<Continuation>;

/// Identifier of a registered timeout source.
///
/// Ids are never reused within one context, so a stale id in a `cancel` is a
/// harmless no-op rather than a shot at an innocent newer source.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TimeoutId(u64);

type TimeoutCallback = Box<FnMut() -> Response + Send>;
type Task = Box<FnOnce() + Send>;

/// One periodic timeout registration.
struct TimerSource {
    interval: Duration,
    next_due: Instant,
    /// Taken out for the duration of a firing, so no lock is held across
    /// user code. `None` therefore means "currently running".
    callback: Option<TimeoutCallback>,
}

/// The source table. A linked hash map keyed by a monotonic counter, so
/// iteration order is registration order ‑ that's the documented tie-break
/// for sources due at the same instant.
struct Sources {
    entries: LinkedHashMap<u64, TimerSource>,
    next_id: u64,
}

/// The per-context dispatch machinery. Owned by whichever `Loop` currently
/// dispatches the context; taking it out of the context *is* the run-lock.
pub struct Driver {
    pub(crate) poll: Poll,
    pub(crate) events: Events,
    /// Keeps the wakeup registration alive and bound to the poll. Readiness
    /// is flipped through the `SetReadiness` handle living in the context.
    _wakeup: Registration,
}

struct Inner {
    sources: Mutex<Sources>,
    /// The cross-thread mailbox. Unbounded by design; submitters never
    /// block. Drained by swapping the whole vector out, once per cycle.
    mailbox: Mutex<Vec<Task>>,
    /// Send + Sync handle that interrupts a sleeping poll.
    wakeup: SetReadiness,
    running: AtomicBool,
    driver: Mutex<Option<Driver>>,
    /// Which thread is currently dispatching, if any. Consulted by `cancel`
    /// to decide whether it must marshal through the mailbox.
    dispatcher: Mutex<Option<ThreadId>>,
}

/// A dispatchable collection of timeout sources plus a mailbox.
///
/// Cloning is cheap and produces another handle to the same context; the
/// equality impl compares identity, not content, because "the same context"
/// is what the thread-default rules are stated in terms of.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Create a new, empty context.
    ///
    /// It holds no sources and is not bound to any thread until something
    /// runs it or pushes it as a thread default.
    pub fn new() -> Result<Self> {
        let poll = Poll::new()?;
        let (registration, wakeup) = Registration::new2();
        poll.register(&registration, WAKEUP, Ready::readable(), PollOpt::level())?;
        Ok(Context {
            inner: Arc::new(Inner {
                sources: Mutex::new(Sources {
                    entries: LinkedHashMap::new(),
                    next_id: 0,
                }),
                mailbox: Mutex::new(Vec::new()),
                wakeup: wakeup,
                running: AtomicBool::new(false),
                driver: Mutex::new(Some(Driver {
                    poll: poll,
                    events: Events::with_capacity(1024),
                    _wakeup: registration,
                })),
                dispatcher: Mutex::new(None),
            }),
        })
    }

    /// Register a periodic timeout on this context.
    ///
    /// The callback first fires `interval` from now and then keeps firing
    /// every `interval` until it answers `Continuation::Stop`, fails, or is
    /// cancelled. It runs on whatever thread dispatches the context, never
    /// anywhere else. Anything it needs it must capture; there's no
    /// user-data pointer to misplace.
    ///
    /// May be called from any thread, including from inside a callback. A
    /// sleeping loop is woken so the new deadline is taken into account.
    pub fn timeout_add<F>(&self, interval: Duration, callback: F) -> Result<TimeoutId>
        where F: FnMut() -> Response + Send + 'static
    {
        if interval == Duration::new(0, 0) {
            return Err(Error::InvalidInterval);
        }
        let id = {
            let mut sources = self.inner.sources.lock().unwrap();
            let id = sources.next_id;
            sources.next_id += 1;
            sources.entries.insert(id, TimerSource {
                interval: interval,
                next_due: Instant::now() + interval,
                callback: Some(Box::new(callback)),
            });
            id
        };
        // A sleeping loop computed its deadline without this source
        self.wakeup()?;
        Ok(TimeoutId(id))
    }

    /// Cancel a timeout registration.
    ///
    /// Idempotent: cancelling something already gone is a no-op. Callable
    /// from any thread. If another thread is dispatching the context right
    /// now, the removal is routed through the mailbox so it lands between
    /// cycles instead of poking the source table mid-dispatch; in that case
    /// it takes effect at the start of the next cycle.
    pub fn timeout_cancel(&self, id: TimeoutId) -> Result<()> {
        let foreign_dispatch = match *self.inner.dispatcher.lock().unwrap() {
            Some(owner) => owner != thread::current().id(),
            None => false,
        };
        if foreign_dispatch {
            let context = self.clone();
            self.submit(move || context.remove_source(id.0))
        } else {
            self.remove_source(id.0);
            Ok(())
        }
    }

    /// How many timeout sources are currently registered?
    pub fn timeout_count(&self) -> usize {
        self.inner.sources.lock().unwrap().entries.len()
    }

    /// Is the given registration still alive?
    pub fn timeout_alive(&self, id: TimeoutId) -> bool {
        self.inner.sources.lock().unwrap().entries.contains_key(&id.0)
    }

    /// Submit a closure to be executed by this context's loop.
    ///
    /// Any thread may submit; only the dispatching thread ever executes.
    /// The queue is unbounded, so this never blocks the submitter. Queued
    /// closures run in submission order at the start of the next dispatch
    /// cycle, before any timer fires, and a sleeping loop is woken promptly.
    pub fn submit<F>(&self, task: F) -> Result<()>
        where F: FnOnce() + Send + 'static
    {
        // Queue first, wake second. The other way around the loop could
        // check the queue before the task is in and go back to sleep.
        self.inner.mailbox.lock().unwrap().push(Box::new(task));
        self.wakeup()
    }

    /// Ask the loop dispatching this context to stop.
    ///
    /// Thread-safe and cooperative: the in-flight callback (if any) finishes
    /// first and the loop exits at the start of its next cycle. A loop
    /// asleep on a far-away deadline is woken instead of sleeping it out.
    pub fn stop(&self) -> Result<()> {
        self.inner.running.store(false, Ordering::SeqCst);
        self.wakeup()
    }

    /// Is a loop currently told to keep dispatching this context?
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run a loop over this context on the calling thread, blocking until
    /// someone calls [`stop`](#method.stop). Convenience for creating a
    /// [`Loop`](struct.Loop.html) by hand.
    pub fn run(&self) -> Result<()> {
        let mut l = Loop::new(self)?;
        l.run()
    }

    /// Push this context as the calling thread's default.
    pub fn push_thread_default(&self) {
        registry::push_thread_default(self);
    }

    fn wakeup(&self) -> Result<()> {
        self.inner.wakeup.set_readiness(Ready::readable())?;
        Ok(())
    }

    fn remove_source(&self, id: u64) {
        self.inner.sources.lock().unwrap().entries.remove(&id);
    }

    // The rest is the crate-internal interface the dispatch loop runs on.

    /// Hand the dispatch driver out, or refuse if someone already has it.
    pub(crate) fn take_driver(&self) -> Result<Driver> {
        self.inner.driver.lock().unwrap().take().ok_or(Error::AlreadyRunning)
    }

    pub(crate) fn return_driver(&self, driver: Driver) {
        *self.inner.driver.lock().unwrap() = Some(driver);
    }

    pub(crate) fn set_dispatcher(&self, dispatcher: Option<ThreadId>) {
        *self.inner.dispatcher.lock().unwrap() = dispatcher;
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.inner.running.store(running, Ordering::SeqCst);
    }

    /// The earliest due time across all sources, if there are any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let sources = self.inner.sources.lock().unwrap();
        sources.entries.values().map(|source| source.next_due).min()
    }

    /// Drop the wakeup readiness. Done at the start of a cycle, before the
    /// queues are looked at, so a wakeup racing in after the drain re-arms
    /// the poll instead of getting lost.
    pub(crate) fn clear_wakeup(&self) -> Result<()> {
        self.inner.wakeup.set_readiness(Ready::empty())?;
        Ok(())
    }

    /// Swap the whole mailbox out and hand it over to the dispatcher.
    pub(crate) fn drain_mailbox(&self) -> Vec<Task> {
        mem::replace(&mut *self.inner.mailbox.lock().unwrap(), Vec::new())
    }

    /// Fire every source due at `now`, in ascending due time, ties broken by
    /// registration order. Each source fires at most once per call.
    pub(crate) fn fire_due(&self, now: Instant) -> Result<()> {
        let mut due: Vec<(Instant, u64)> = {
            let sources = self.inner.sources.lock().unwrap();
            sources.entries
                .iter()
                .filter(|&(_, source)| source.next_due <= now)
                .map(|(&id, source)| (source.next_due, id))
                .collect()
        };
        // The input is in registration order and the sort is stable, so
        // sources due at the same instant keep that order.
        due.sort_by_key(|&(due_at, _)| due_at);
        for (_, id) in due {
            let mut callback = {
                let mut sources = self.inner.sources.lock().unwrap();
                match sources.entries.get_mut(&id).and_then(|source| source.callback.take()) {
                    Some(callback) => callback,
                    // Removed by an earlier callback in this same cycle
                    None => continue,
                }
            };
            // User code runs with no lock held, so it may freely register,
            // cancel or submit on this very context. If it blocks, nothing
            // else on this context runs until it returns; that's the
            // documented cost of the cooperative model.
            let verdict = callback();
            let mut sources = self.inner.sources.lock().unwrap();
            match verdict {
                Ok(Continuation::Continue) => {
                    // The source may have been cancelled while it ran; then
                    // it stays gone and the callback is dropped with it.
                    if let Some(source) = sources.entries.get_mut(&id) {
                        source.callback = Some(callback);
                        // Advance by the interval, not from `now`, so the
                        // schedule doesn't drift. A severely late source
                        // resyncs instead of machine-gunning to catch up.
                        source.next_due = source.next_due + source.interval;
                        let after = Instant::now();
                        if source.next_due <= after {
                            source.next_due = after + source.interval;
                        }
                    }
                },
                Ok(Continuation::Stop) => {
                    sources.entries.remove(&id);
                },
                Err(e) => {
                    // A failing callback is removed and the rest of the
                    // cycle is abandoned; the error belongs to the caller
                    // of run().
                    sources.entries.remove(&id);
                    return Err(e);
                },
            }
        }
        Ok(())
    }
}

impl PartialEq for Context {
    /// Identity, not content: two handles are equal iff they point at the
    /// same underlying context.
    fn eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Context({:p})", &*self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_refused() {
        let ctx = Context::new().unwrap();
        match ctx.timeout_add(Duration::new(0, 0), || Ok(Continuation::Continue)) {
            Err(Error::InvalidInterval) => (),
            _ => panic!("A zero interval slipped through"),
        }
        assert_eq!(0, ctx.timeout_count());
    }

    #[test]
    fn bookkeeping() {
        let ctx = Context::new().unwrap();
        let keep = ctx.timeout_add(Duration::from_millis(100), || Ok(Continuation::Continue))
            .unwrap();
        let gone = ctx.timeout_add(Duration::from_millis(100), || Ok(Continuation::Continue))
            .unwrap();
        assert_eq!(2, ctx.timeout_count());
        assert!(ctx.timeout_alive(keep));
        assert!(ctx.timeout_alive(gone));

        ctx.timeout_cancel(gone).unwrap();
        assert_eq!(1, ctx.timeout_count());
        assert!(!ctx.timeout_alive(gone));
        assert!(ctx.timeout_alive(keep));

        // Cancelling a second time changes nothing
        ctx.timeout_cancel(gone).unwrap();
        assert_eq!(1, ctx.timeout_count());
        assert!(ctx.timeout_alive(keep));
    }

    #[test]
    fn fire_order_is_deterministic() {
        use std::sync::{Arc, Mutex};

        let ctx = Context::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        // Same interval, so the same due instant is likely; registration
        // order must break the tie.
        for tag in 0..3 {
            let order = order.clone();
            ctx.timeout_add(Duration::from_millis(1), move || {
                    order.lock().unwrap().push(tag);
                    Ok(Continuation::Stop)
                })
                .unwrap();
        }
        ::std::thread::sleep(Duration::from_millis(20));
        ctx.fire_due(Instant::now()).unwrap();
        assert_eq!(vec![0, 1, 2], *order.lock().unwrap());
        assert_eq!(0, ctx.timeout_count());
    }

    #[test]
    fn callback_error_removes_source_and_propagates() {
        let ctx = Context::new().unwrap();
        let id = ctx.timeout_add(Duration::from_millis(1),
                     || Err(Error::User("boom".to_owned())))
            .unwrap();
        ::std::thread::sleep(Duration::from_millis(10));
        match ctx.fire_due(Instant::now()) {
            Err(Error::User(ref msg)) if msg == "boom" => (),
            _ => panic!("The callback error didn't come through"),
        }
        assert!(!ctx.timeout_alive(id));
    }

    #[test]
    fn handles_share_identity() {
        let ctx = Context::new().unwrap();
        let other = Context::new().unwrap();
        assert_eq!(ctx, ctx.clone());
        assert!(ctx != other);
    }
}
