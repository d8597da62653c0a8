//! Worker threads, each with a main loop of its own.
//!
//! Every worker creates a fresh context, pushes it as its thread default
//! and runs a loop over it. The callbacks deliberately sleep for a second,
//! which stalls that worker's context and nothing else ‑ the other workers
//! keep ticking. The number of workers can be given as the first argument.

extern crate env_logger;
extern crate mainspring;

use std::env::args;
use std::io::{stderr, Write};
use std::thread;
use std::time::Duration;

use mainspring::{Context, Continuation, registry};
use mainspring::error::{Error, Result};

const INTERVAL: u64 = 1000; // milliseconds
const SLEEP_TIME: u64 = 1; // seconds
const TICKS: u32 = 3;

fn worker(id: usize) -> Result<()> {
    let ctx = Context::new()?;
    ctx.push_thread_default();
    // The loop below runs the context we just pushed ‑ said explicitly,
    // because this is exactly where main-loop libraries like to surprise
    let ctx = registry::current_default();

    let stopper = ctx.clone();
    let mut ticks = 0;
    ctx.timeout_add(Duration::from_millis(INTERVAL), move || {
            ticks += 1;
            println!("{} ({:?}): Hello from the worker! Entering sleep...", id, thread::current().id());
            thread::sleep(Duration::from_secs(SLEEP_TIME));
            println!("{} ({:?}): Sleep complete. Goodbye from the worker!", id, thread::current().id());
            if ticks == TICKS {
                stopper.stop()?;
                return Ok(Continuation::Stop);
            }
            Ok(Continuation::Continue)
        })?;
    ctx.run()?;
    registry::pop_thread_default()
}

fn run() -> Result<()> {
    let workers: usize = match args().nth(1) {
        Some(raw) => {
            raw.parse()
                .map_err(|e| Error::User(format!("Wrong number of workers: {}", e)))?
        },
        None => 3,
    };

    println!("Global default context is {:?}", registry::global_default());
    let threads: Vec<_> = (0..workers)
        .map(|id| thread::spawn(move || worker(id)))
        .collect();
    for thread in threads {
        thread.join().expect("A worker panicked")?;
    }
    Ok(())
}

fn main() {
    env_logger::init().unwrap();
    if let Err(e) = run() {
        writeln!(stderr(), "{}", e).unwrap();
        std::process::exit(1);
    }
}
