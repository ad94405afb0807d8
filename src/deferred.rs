use crate::{cell::Shared, Error, Promise, PromiseState};
use std::{fmt, sync::Arc};
use tracing::debug;

/// The producer side of a promise: resolves or rejects it exactly once.
///
/// Clones share the same result cell. When the last clone of a still pending
/// `Deferred` is dropped, every associated [`Promise`] is rejected with
/// [`Error::Abandoned`].
///
/// A callback registered on a promise must never capture a `Deferred` for
/// that same promise. The cell would then own its own controller, the
/// controller count could never reach zero, and abandonment would not fire.
///
/// # Examples
///
/// ```
/// use deferred_out::Deferred;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let deferred = Deferred::<String>::new();
/// let promise = deferred.promise();
/// let task = thread::spawn(move || block_on(promise));
/// deferred.resolve("Hi".into());
/// assert_eq!(task.join().unwrap().unwrap(), "Hi");
/// ```
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Deferred<T> {
    /// A deferred whose promise is pending.
    pub fn new() -> Self {
        Deferred {
            shared: Arc::new(Shared::new()),
        }
    }

    /// A deferred whose promise is already rejected with `error`.
    pub fn rejected(error: Error) -> Self {
        Deferred {
            shared: Arc::new(Shared::new_rejected(error)),
        }
    }

    /// Returns a consumer handle on this deferred's result.
    pub fn promise(&self) -> Promise<T> {
        Promise::bound(self.shared.clone())
    }

    /// Rejects every associated promise. Ignored once settled.
    pub fn reject(&self, error: Error) {
        if !self.shared.reject(error) {
            debug!("reject ignored, deferred already settled");
        }
    }

    /// Like [`Deferred::reject`] but reports a double settlement.
    pub fn try_reject(&self, error: Error) -> Result<(), Error> {
        if self.shared.reject(error) {
            Ok(())
        } else {
            Err(Error::AlreadySettled)
        }
    }

    /// Rejects with [`Error::Invalidated`] if still pending.
    pub fn invalidate(&self) {
        self.shared.reject(Error::Invalidated);
    }

    pub fn state(&self) -> PromiseState {
        self.shared.state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }
}

impl<T: Clone> Deferred<T> {
    /// A deferred whose promise is already resolved to `value`.
    pub fn resolved(value: T) -> Self {
        Deferred {
            shared: Arc::new(Shared::new_resolved(value)),
        }
    }

    /// Resolves every associated promise to `value`. Ignored once settled.
    ///
    /// Callbacks queued on the promise run before this returns, on the
    /// calling thread.
    pub fn resolve(&self, value: T) {
        if !self.shared.resolve(value) {
            debug!("resolve ignored, deferred already settled");
        }
    }

    /// Like [`Deferred::resolve`] but reports a double settlement.
    ///
    /// ```
    /// use deferred_out::{Deferred, Error};
    ///
    /// let deferred = Deferred::new();
    /// assert!(deferred.try_resolve(1).is_ok());
    /// assert!(matches!(deferred.try_resolve(2), Err(Error::AlreadySettled)));
    /// ```
    pub fn try_resolve(&self, value: T) -> Result<(), Error> {
        if self.shared.resolve(value) {
            Ok(())
        } else {
            Err(Error::AlreadySettled)
        }
    }

    /// Resolves on `Ok`, rejects on `Err`.
    pub fn settle(&self, result: Result<T, Error>) {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Settles this deferred the same way `promise` settles.
    ///
    /// An unbound `promise` rejects this deferred with
    /// [`Error::InvalidPromise`].
    pub fn resolve_with(&self, promise: &Promise<T>) {
        let on_done = self.clone();
        let on_fail = self.clone();
        let result = promise.done_or_fail(
            move |value| on_done.resolve(value),
            move |error| on_fail.reject(error),
        );
        if let Err(error) = result {
            self.reject(error);
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        self.shared.acquire();
        Deferred {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Deferred<T> {
    /// If this is the last handle on an unsettled cell, reject as abandoned.
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("shared", &self.shared).finish()
    }
}
