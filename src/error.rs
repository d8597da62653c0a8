use std::convert::From;
use std::error;
use std::fmt;
use std::io;

/// A mainspring error.
///
/// Everything that can go wrong in the library is enumerated here, so one
/// `Result` alias covers the whole API. Errors are returned synchronously
/// from the operation that caused them, never stashed away for later.
#[derive(Debug)]
pub enum Error {
    /// The OS-level polling or wakeup plumbing failed.
    Io(io::Error),
    /// A timeout was registered with a zero interval.
    InvalidInterval,
    /// Someone else is already dispatching this context. A context may be
    /// dispatched by one thread at a time and we fail fast instead of
    /// queueing a second runner.
    AlreadyRunning,
    /// A thread-default pop without a matching push.
    UnbalancedContextStack,
    /// The notification transport refused us (nothing bound at the address,
    /// the exchange was closed, things like that).
    TransportUnavailable(String),
    /// An error raised by user code inside a callback. The loop doesn't
    /// interpret it, only carries it out to whoever called `run`.
    User(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "IO error: {}", e),
            Error::InvalidInterval => write!(f, "Timeout interval must be larger than zero"),
            Error::AlreadyRunning => write!(f, "The context is already being dispatched"),
            Error::UnbalancedContextStack => {
                write!(f, "Thread-default pop without a matching push")
            },
            Error::TransportUnavailable(ref why) => write!(f, "Transport unavailable: {}", why),
            Error::User(ref msg) => write!(f, "{}", msg),
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        match *self {
            Error::Io(_) => "IO error",
            Error::InvalidInterval => "invalid timeout interval",
            Error::AlreadyRunning => "context already being dispatched",
            Error::UnbalancedContextStack => "unbalanced thread-default stack",
            Error::TransportUnavailable(_) => "transport unavailable",
            Error::User(_) => "user error",
        }
    }
}

/// A result for mainspring operations that may fail
pub type Result<T> = ::std::result::Result<T, Error>;
