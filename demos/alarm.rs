//! A periodic alarm publisher and a subscriber on its own loop.
//!
//! The publisher side binds an exchange under a local address and emits an
//! alarm notification from a timeout on the main thread's context. The
//! subscriber side connects to the address, subscribes with its own context
//! and runs that context's loop on a separate thread ‑ so every
//! notification is handled over there, not on the emitting thread.

extern crate env_logger;
extern crate mainspring;

use std::io::{stderr, Write};
use std::thread;
use std::time::Duration;

use mainspring::{Context, Continuation, notify, registry};
use mainspring::error::Result;

const ADDRESS: &'static str = "local:alarm";
const RINGS: u32 = 3;

fn run() -> Result<()> {
    let exchange = notify::bind(ADDRESS)?;

    // The subscriber: own context, own loop, own thread
    let subscriber_ctx = Context::new()?;
    let stopper = subscriber_ctx.clone();
    let client = notify::connect(ADDRESS)?;
    let mut seen = 0;
    client.subscribe("/alarm", "ring", &subscriber_ctx, move |message| {
            seen += 1;
            println!("Alarm received on {:?}: {}", thread::current().id(), message);
            if seen == RINGS {
                stopper.stop().unwrap();
            }
        })?;
    let runner = subscriber_ctx.clone();
    let subscriber = thread::spawn(move || {
        runner.push_thread_default();
        let outcome = runner.run();
        registry::pop_thread_default().and(outcome)
    });

    // The publisher: a periodic emit from this thread's default context
    let ctx = registry::current_default();
    let publisher = exchange.clone();
    let main_ctx = ctx.clone();
    let mut rings = 0;
    ctx.timeout_add(Duration::from_millis(500), move || {
            rings += 1;
            let delivered = publisher.emit("/alarm", "ring", &format!("ring #{}", rings))?;
            println!("Emitted ring #{} to {} subscriber(s)", rings, delivered);
            if rings == RINGS {
                main_ctx.stop()?;
                return Ok(Continuation::Stop);
            }
            Ok(Continuation::Continue)
        })?;
    ctx.run()?;

    subscriber.join().expect("The subscriber panicked")?;
    notify::unbind(ADDRESS);
    Ok(())
}

fn main() {
    env_logger::init().unwrap();
    if let Err(e) = run() {
        writeln!(stderr(), "{}", e).unwrap();
        std::process::exit(1);
    }
}
