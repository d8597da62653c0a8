/*!
 * Mainspring is a per-thread, context-scoped main loop for Rust.
 *
 * # Motivation
 *
 * Why another event loop library? What is wrong with the others?
 *
 * The futures-based runtimes are excellent at what they do, but they pull
 * your whole program into their model. Sometimes the program already has a
 * model: a GUI thread, a worker that owns a device, a daemon with one
 * housekeeping loop. What such code wants is the boring old main-context
 * idea ‑ a bag of timer sources owned by one thread, callbacks dispatched
 * in a predictable order, and a safe way for other threads to toss work
 * over the fence.
 *
 * That construct is well known from the C world's main-context libraries,
 * together with its traps: which context is "the default" on this thread?
 * What happens when two threads spin up a loop without saying which context
 * they mean? Mainspring implements the construct with the ambiguity taken
 * out: context binding is always explicit or explicitly-documented, and the
 * answers are deterministic enough to assert on in tests.
 *
 * # Interface
 *
 * There's one central object, the [`Context`](struct.Context.html). You
 * register periodic timeouts on it, each with a closure that gets called
 * whenever the timeout fires and answers whether it wants to stay
 * registered ([`Continuation`](enum.Continuation.html)). A
 * [`Loop`](struct.Loop.html) binds to one context and dispatches it until
 * the context is told to [`stop`](struct.Context.html#method.stop).
 *
 * Other threads interact with a running context in two ways: they call the
 * thread-safe registration and cancellation methods, or they
 * [`submit`](struct.Context.html#method.submit) closures into the context's
 * mailbox. The mailbox is drained once per dispatch cycle, before timers
 * fire, in submission order.
 *
 * The [`registry`](registry/index.html) module answers the "which context
 * if none was named" question: a lazily created process-wide default plus a
 * per-thread override stack. The [`notify`](notify/index.html) module is a
 * small publish/notify exchange that delivers notifications as mailbox
 * submissions, so handlers run on their subscriber's loop.
 *
 * # Thread safety
 *
 * A `Context` may be shared freely between threads, but only one thread at
 * a time may dispatch it; a second `Loop` over the same context is refused
 * with `AlreadyRunning` rather than queued. Within one context, callbacks
 * never run concurrently ‑ a callback that blocks holds up its own context
 * (and nothing else), which is the documented price of the cooperative
 * model. Different contexts on different threads are fully independent.
 *
 * # Example
 *
 * ```
 * extern crate mainspring;
 *
 * use std::time::Duration;
 * use mainspring::{Context, Continuation};
 *
 * fn main() {
 *     let ctx = Context::new().unwrap();
 *     let stopper = ctx.clone();
 *     let mut remaining = 3;
 *     ctx.timeout_add(Duration::from_millis(10), move || {
 *             remaining -= 1;
 *             if remaining == 0 {
 *                 stopper.stop()?;
 *                 return Ok(Continuation::Stop);
 *             }
 *             Ok(Continuation::Continue)
 *         })
 *         .unwrap();
 *     ctx.run().unwrap();
 * }
 * ```
 */

extern crate linked_hash_map;
extern crate mio;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod error;
pub mod notify;
pub mod registry;
mod context;
mod core;

pub use context::{Context, Continuation, Response, TimeoutId};
pub use core::Loop;
