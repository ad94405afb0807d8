//! A `Deferred`/`Promise` pair for values that are produced later.
//!
//! A [`Deferred`] is the producer side: it resolves or rejects a result
//! exactly once. A [`Promise`] is the consumer side: it registers callbacks,
//! derives new promises with [`Promise::then`] and [`Promise::then_pipe`], or
//! is simply `.await`ed. Every clone of either handle points at the same
//! shared result cell.
//!
//! Callbacks run synchronously, inline with whichever call settles the cell
//! (or inline with the subscription when the cell is already settled). No
//! executor or thread pool lives in this crate.
//!
//! # Examples
//!
//! ```
//! use deferred_out::Deferred;
//! use std::sync::{Arc, Mutex};
//!
//! let deferred = Deferred::<i32>::new();
//! let doubled = deferred.promise().then(|x| Ok(x * 2));
//!
//! let seen = Arc::new(Mutex::new(None));
//! let sink = seen.clone();
//! doubled.done(move |v| *sink.lock().unwrap() = Some(v)).unwrap();
//!
//! deferred.resolve(21);
//! assert_eq!(*seen.lock().unwrap(), Some(42));
//! ```
use std::sync::Arc;

mod cell;
mod chain;
pub mod deferred;
pub mod promise;

pub use deferred::Deferred;
pub use promise::Promise;

/// Observable state of a result cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseState {
    Pending,
    Resolved,
    Rejected,
}

/// The error payload carried by a rejected promise.
///
/// Every promise in a chain shares this one payload type, so a rejection can
/// always be forwarded downstream unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An operation was attempted on an unbound `Promise`.
    #[error("promise invalid")]
    InvalidPromise,
    /// Application error handed to `reject`.
    #[error(transparent)]
    Rejected(Arc<dyn std::error::Error + Send + Sync>),
    /// Every `Deferred` for a pending cell was dropped.
    #[error("deferred dropped before it was settled")]
    Abandoned,
    /// `Deferred::invalidate` was called on a pending cell.
    #[error("deferred invalidated")]
    Invalidated,
    /// A `then`/`then_pipe` handler panicked.
    #[error("promise handler panicked: {0}")]
    HandlerPanicked(String),
    /// `Promise::convert_cast` could not convert the resolved value.
    #[error("conversion failed: {0}")]
    Conversion(String),
    /// Returned by the strict `try_resolve`/`try_reject` only.
    #[error("deferred already settled")]
    AlreadySettled,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl Error {
    /// Wraps an application error as a rejection payload.
    pub fn rejected<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Rejected(Arc::new(error))
    }

    /// Rejection payload carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::rejected(Message(message.into()))
    }
}
