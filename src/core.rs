//! The dispatch loop.
//!
//! A `Loop` binds to one `Context` and drives its dispatch cycle: compute
//! the nearest deadline, sleep until then or until woken, drain the mailbox,
//! fire whatever timeouts came due. It keeps cycling until the context is
//! told to stop. It never exits just because there's nothing registered;
//! an idle loop parks on the mailbox and waits to be handed work.

use std::thread;
use std::time::{Duration, Instant};

use context::{Context, Driver};
use error::Result;

pub struct Loop {
    context: Context,
    /// The context's dispatch machinery. Holding it is what makes this loop
    /// the one allowed dispatcher; it travels back on drop.
    driver: Option<Driver>,
}

impl Loop {
    /**
     * Create a new Loop over the given context.
     *
     * This claims the context's dispatch driver. If another loop (on any
     * thread, including this one ‑ say, inside a callback) already holds it,
     * the call fails fast with `AlreadyRunning` instead of blocking or
     * queueing up as a second runner.
     */
    pub fn new(context: &Context) -> Result<Self> {
        let driver = context.take_driver()?;
        context.set_dispatcher(Some(thread::current().id()));
        Ok(Loop {
            context: context.clone(),
            driver: Some(driver),
        })
    }

    /// The context this loop dispatches.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Run a single dispatch cycle.
    ///
    /// Sleeps until the nearest timeout deadline, or indefinitely if there
    /// is none, in either case subject to being woken early by a stop, a
    /// mailbox submission or a new registration. Then drains the mailbox
    /// (whole queue, submission order) and fires the due timeouts.
    pub fn run_one(&mut self) -> Result<()> {
        let timeout = self.context.next_deadline().map(|deadline| {
            let now = Instant::now();
            if deadline <= now {
                Duration::new(0, 0)
            } else {
                deadline - now
            }
        });
        {
            // The driver is there from new() until drop(), we merely can't
            // encode that in the type.
            let driver = self.driver.as_mut().unwrap();
            trace!("Sleeping for {:?}", timeout);
            driver.poll.poll(&mut driver.events, timeout)?;
        }
        // Clear the wakeup before looking at the queues. A wakeup racing in
        // after we look re-arms the poll, so nothing is lost; at worst we do
        // one spurious cycle.
        self.context.clear_wakeup()?;
        let tasks = self.context.drain_mailbox();
        if !tasks.is_empty() {
            trace!("Draining {} mailbox task(s)", tasks.len());
        }
        for task in tasks {
            task();
        }
        self.context.fire_due(Instant::now())
    }

    /**
     * Run the dispatch loop until the context is stopped.
     *
     * Blocks the calling thread. Returns once `stop()` is called on the
     * context (from any thread), or with an error if a cycle fails ‑ either
     * because the OS plumbing broke or because a callback returned one.
     */
    pub fn run(&mut self) -> Result<()> {
        self.context.set_running(true);
        debug!("Dispatching {:?}", self.context);
        while self.context.is_running() {
            self.run_one()?;
        }
        debug!("Stopped {:?}", self.context);
        Ok(())
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        self.context.set_dispatcher(None);
        if let Some(driver) = self.driver.take() {
            self.context.return_driver(driver);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use context::Continuation;
    use error::Error;

    /// The run-lock: a second loop over the same context is refused while
    /// the first one exists, and the driver comes back when it's gone.
    #[test]
    fn second_loop_refused() {
        let ctx = Context::new().unwrap();
        let held = Loop::new(&ctx).unwrap();
        match Loop::new(&ctx) {
            Err(Error::AlreadyRunning) => (),
            _ => panic!("Two loops on one context"),
        }
        drop(held);
        Loop::new(&ctx).unwrap();
    }

    /// A cycle executes mailbox tasks before firing timers, even when the
    /// timer became due earlier than the task was submitted.
    #[test]
    fn mailbox_drains_before_timers() {
        let ctx = Context::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let timer_order = order.clone();
        ctx.timeout_add(Duration::from_millis(1), move || {
                timer_order.lock().unwrap().push("timer");
                Ok(Continuation::Stop)
            })
            .unwrap();
        // Let the timer become overdue, then queue a task after it
        thread::sleep(Duration::from_millis(20));
        let task_order = order.clone();
        ctx.submit(move || task_order.lock().unwrap().push("task")).unwrap();

        Loop::new(&ctx).unwrap().run_one().unwrap();
        assert_eq!(vec!["task", "timer"], *order.lock().unwrap());
    }

    /// Stopping from inside a callback ends the loop after the cycle.
    #[test]
    fn stop_from_callback() {
        let ctx = Context::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        let stopper = ctx.clone();
        ctx.timeout_add(Duration::from_millis(1), move || {
                seen.fetch_add(1, Ordering::SeqCst);
                stopper.stop().unwrap();
                Ok(Continuation::Stop)
            })
            .unwrap();
        ctx.run().unwrap();
        assert_eq!(1, fired.load(Ordering::SeqCst));
        assert_eq!(0, ctx.timeout_count());
    }

    /// A callback error surfaces from run() and doesn't leave the loop
    /// locked up.
    #[test]
    fn callback_error_ends_run() {
        let ctx = Context::new().unwrap();
        ctx.timeout_add(Duration::from_millis(1), || Err(Error::User("broken".to_owned())))
            .unwrap();
        match ctx.run() {
            Err(Error::User(ref msg)) if msg == "broken" => (),
            _ => panic!("The error didn't surface"),
        }
        // The loop can be created again afterwards
        let ctx2 = ctx.clone();
        ctx.submit(move || ctx2.stop().unwrap()).unwrap();
        ctx.run().unwrap();
    }
}
