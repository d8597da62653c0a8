//! The first thing everybody writes with a main loop: a periodic greeter.
//!
//! Registers one timeout on the thread's default context and runs it. The
//! interval in milliseconds can be given as the first argument (1000 by
//! default). Stops itself after five greetings.

extern crate env_logger;
extern crate mainspring;

use std::env::args;
use std::io::{stderr, Write};
use std::time::Duration;

use mainspring::{Continuation, registry};
use mainspring::error::{Error, Result};

fn run() -> Result<()> {
    let interval: u64 = match args().nth(1) {
        Some(raw) => {
            raw.parse()
                .map_err(|e| Error::User(format!("Wrong interval: {}", e)))?
        },
        None => 1000,
    };

    let ctx = registry::current_default();
    let stopper = ctx.clone();
    let mut greetings = 0;
    ctx.timeout_add(Duration::from_millis(interval), move || {
            greetings += 1;
            println!("{}: Hello from the main loop", greetings);
            if greetings == 5 {
                stopper.stop()?;
                return Ok(Continuation::Stop);
            }
            Ok(Continuation::Continue)
        })?;
    ctx.run()
}

fn main() {
    env_logger::init().unwrap();
    if let Err(e) = run() {
        writeln!(stderr(), "{}", e).unwrap();
        std::process::exit(1);
    }
}
