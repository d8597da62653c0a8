//! A minimal publish/notify exchange.
//!
//! This is the seam towards an external notification transport (a bus
//! daemon, a socket server, whatever actually moves the bytes). The crate
//! doesn't do transport, authentication or serialization; what it does do
//! is the part that interacts with the loops: an inbound notification
//! becomes a closure submitted to the subscriber's context mailbox, so the
//! handler always runs on the subscriber's own loop thread, never on the
//! emitter's.
//!
//! For in-process use (and for tests) the exchange is fully functional on
//! its own: `bind` an address, `connect` to it from elsewhere, `subscribe`
//! with a context and `emit` away. A real transport would sit behind the
//! same calls and feed `emit` from the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use context::Context;
use error::{Error, Result};

/// Identifier of one subscription, for `unsubscribe`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NotifyId(u64);

type Handler = Box<FnMut(String) + Send>;

/// One registered recipient: where to run and what to call.
struct Subscription {
    id: u64,
    context: Context,
    /// Shared with the closures in flight; consecutive notifications to the
    /// same handler queue up on this mutex in delivery order.
    handler: Arc<Mutex<Handler>>,
}

struct ExchangeInner {
    /// Keyed by (object path, signal name), like the bus interfaces this
    /// models.
    subscriptions: HashMap<(String, String), Vec<Subscription>>,
    next_id: u64,
    closed: bool,
}

/// An in-process notification exchange.
///
/// Cheap to clone; all clones talk about the same exchange. One side
/// `subscribe`s, the other `emit`s, and the exchange fans every emission
/// out to the matching subscribers' mailboxes.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<Mutex<ExchangeInner>>,
}

impl Exchange {
    pub fn new() -> Self {
        Exchange {
            inner: Arc::new(Mutex::new(ExchangeInner {
                subscriptions: HashMap::new(),
                next_id: 0,
                closed: false,
            })),
        }
    }

    /// Subscribe to notifications with the given path and signal name.
    ///
    /// The handler runs on whatever thread dispatches `context`, one
    /// notification at a time, in emission order. Fails with
    /// `TransportUnavailable` on a closed exchange.
    pub fn subscribe<F>(&self, path: &str, signal: &str, context: &Context, handler: F)
        -> Result<NotifyId>
        where F: FnMut(String) + Send + 'static
    {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::TransportUnavailable("The exchange is closed".to_owned()));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscriptions
            .entry((path.to_owned(), signal.to_owned()))
            .or_insert_with(Vec::new)
            .push(Subscription {
                id: id,
                context: context.clone(),
                handler: Arc::new(Mutex::new(Box::new(handler))),
            });
        debug!("Subscribed #{} to {}/{}", id, path, signal);
        Ok(NotifyId(id))
    }

    /// Drop a subscription. Idempotent; unknown ids are ignored.
    pub fn unsubscribe(&self, id: NotifyId) {
        let mut inner = self.inner.lock().unwrap();
        for subscriptions in inner.subscriptions.values_mut() {
            subscriptions.retain(|subscription| subscription.id != id.0);
        }
    }

    /// Emit a notification to every matching subscriber.
    ///
    /// Returns how many subscribers it was handed to. The payload is copied
    /// per subscriber and delivery is a mailbox submission, so this returns
    /// without waiting for any handler to actually run.
    pub fn emit(&self, path: &str, signal: &str, payload: &str) -> Result<usize> {
        let targets: Vec<(Context, Arc<Mutex<Handler>>)> = {
            let inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(Error::TransportUnavailable("The exchange is closed".to_owned()));
            }
            match inner.subscriptions.get(&(path.to_owned(), signal.to_owned())) {
                Some(subscriptions) => {
                    subscriptions.iter()
                        .map(|s| (s.context.clone(), s.handler.clone()))
                        .collect()
                },
                None => Vec::new(),
            }
        };
        // Deliver outside our own lock; a handler is free to subscribe or
        // unsubscribe from inside.
        let delivered = targets.len();
        for (context, handler) in targets {
            let payload = payload.to_owned();
            context.submit(move || {
                    let mut handler = handler.lock().unwrap();
                    (*handler)(payload)
                })?;
        }
        trace!("Emitted {}/{} to {} subscriber(s)", path, signal, delivered);
        Ok(delivered)
    }

    /// Shut the exchange down. Subsequent subscribes and emits fail with
    /// `TransportUnavailable`; already-queued deliveries still run.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

lazy_static! {
    // The process-local address registry, standing in for a name server.
    static ref BOUND: Mutex<HashMap<String, Exchange>> = Mutex::new(HashMap::new());
}

/// Create an exchange and make it reachable under `address`.
///
/// Fails with `TransportUnavailable` if the address is taken.
pub fn bind(address: &str) -> Result<Exchange> {
    let mut bound = BOUND.lock().unwrap();
    if bound.contains_key(address) {
        return Err(Error::TransportUnavailable(format!("{} is already bound", address)));
    }
    let exchange = Exchange::new();
    bound.insert(address.to_owned(), exchange.clone());
    debug!("Bound exchange at {}", address);
    Ok(exchange)
}

/// Look up the exchange bound at `address`.
///
/// Connecting to an address nobody bound fails with `TransportUnavailable`,
/// surfaced to the caller right here ‑ whether and when to retry is the
/// caller's business, not ours.
pub fn connect(address: &str) -> Result<Exchange> {
    match BOUND.lock().unwrap().get(address) {
        Some(exchange) => Ok(exchange.clone()),
        None => Err(Error::TransportUnavailable(format!("Nothing listens at {}", address))),
    }
}

/// Remove an address binding. The exchange itself survives as long as
/// someone holds a handle; only the name goes away.
pub fn unbind(address: &str) {
    BOUND.lock().unwrap().remove(address);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use core::Loop;

    /// Emission lands in the subscriber's mailbox and runs during its
    /// context's next cycle, in emission order.
    #[test]
    fn delivery_through_the_mailbox() {
        let ctx = Context::new().unwrap();
        let exchange = Exchange::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        exchange.subscribe("/alarm", "ring", &ctx, move |payload| sink.lock().unwrap().push(payload))
            .unwrap();

        assert_eq!(1, exchange.emit("/alarm", "ring", "first").unwrap());
        assert_eq!(1, exchange.emit("/alarm", "ring", "second").unwrap());
        // Nobody listens on this one
        assert_eq!(0, exchange.emit("/alarm", "other", "lost").unwrap());
        // Not executed yet ‑ nothing dispatched the context so far
        assert!(seen.lock().unwrap().is_empty());

        Loop::new(&ctx).unwrap().run_one().unwrap();
        assert_eq!(vec!["first".to_owned(), "second".to_owned()], *seen.lock().unwrap());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let ctx = Context::new().unwrap();
        let exchange = Exchange::new();
        let id = exchange.subscribe("/alarm", "ring", &ctx, |_| ()).unwrap();
        exchange.unsubscribe(id);
        exchange.unsubscribe(id);
        assert_eq!(0, exchange.emit("/alarm", "ring", "nobody home").unwrap());
    }

    #[test]
    fn closed_exchange_refuses() {
        let ctx = Context::new().unwrap();
        let exchange = Exchange::new();
        exchange.close();
        match exchange.subscribe("/alarm", "ring", &ctx, |_| ()) {
            Err(Error::TransportUnavailable(_)) => (),
            _ => panic!("Subscribed to a closed exchange"),
        }
        match exchange.emit("/alarm", "ring", "void") {
            Err(Error::TransportUnavailable(_)) => (),
            _ => panic!("Emitted into a closed exchange"),
        }
    }

    #[test]
    fn address_registry() {
        match connect("local:nobody-bound-this") {
            Err(Error::TransportUnavailable(_)) => (),
            _ => panic!("Connected to thin air"),
        }

        let bound = bind("local:notify-test").unwrap();
        match bind("local:notify-test") {
            Err(Error::TransportUnavailable(_)) => (),
            _ => panic!("Bound the same address twice"),
        }

        // The connected handle talks to the same exchange
        let connected = connect("local:notify-test").unwrap();
        let ctx = Context::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        connected.subscribe("/alarm", "ring", &ctx, move |payload| sink.lock().unwrap().push(payload))
            .unwrap();
        assert_eq!(1, bound.emit("/alarm", "ring", "over the wire").unwrap());
        Loop::new(&ctx).unwrap().run_one().unwrap();
        assert_eq!(1, seen.lock().unwrap().len());

        unbind("local:notify-test");
        match connect("local:notify-test") {
            Err(Error::TransportUnavailable(_)) => (),
            _ => panic!("Connected to an unbound address"),
        }
    }

    /// A `FnMut` handler keeps its captured state between notifications.
    #[test]
    fn handlers_keep_state() {
        let ctx = Context::new().unwrap();
        let exchange = Exchange::new();
        let mut count = 0;
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        exchange.subscribe("/alarm", "ring", &ctx, move |_| {
                count += 1;
                *sink.lock().unwrap() = count;
            })
            .unwrap();
        for _ in 0..3 {
            exchange.emit("/alarm", "ring", "tick").unwrap();
        }
        Loop::new(&ctx).unwrap().run_one().unwrap();
        assert_eq!(3, *seen.lock().unwrap());
    }
}
