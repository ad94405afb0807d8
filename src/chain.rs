//! Deriving new promises from existing ones.
//!
//! Each operator creates a fresh [`Deferred`] for the derived promise and
//! subscribes closures owning clones of it to the source cell. Handlers run
//! under `catch_unwind`: a panicking handler rejects the derived promise with
//! [`Error::HandlerPanicked`] and leaves the source untouched.
use crate::{cell::panic_message, Deferred, Error, Promise};
use std::{
    fmt::Display,
    panic::{self, AssertUnwindSafe},
};
use tracing::warn;

fn guard<R>(handler: impl FnOnce() -> Result<R, Error>) -> Result<R, Error> {
    panic::catch_unwind(AssertUnwindSafe(handler)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(%message, "promise handler panicked");
        Err(Error::HandlerPanicked(message))
    })
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Maps the resolved value through `on_success`.
    ///
    /// `Ok(u)` resolves the returned promise with `u`, `Err(e)` rejects it.
    /// A rejection of this promise is forwarded unchanged.
    ///
    /// ```
    /// use deferred_out::Promise;
    /// use futures::executor::block_on;
    ///
    /// let doubled = Promise::resolved(5).then(|x| Ok(x * 2));
    /// assert_eq!(block_on(doubled).unwrap(), 10);
    /// ```
    pub fn then<U, S>(&self, on_success: S) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        self.then_or_else(on_success, Err)
    }

    /// Like [`Promise::then`], with a handler for the rejected branch too.
    ///
    /// The rejection handler may recover by returning `Ok`.
    pub fn then_or_else<U, S, F>(&self, on_success: S, on_fail: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<U, Error> + Send + 'static,
        F: FnOnce(Error) -> Result<U, Error> + Send + 'static,
    {
        let shared = match self.shared() {
            Ok(shared) => shared,
            Err(error) => return Promise::rejected(error),
        };
        let deferred = Deferred::<U>::new();
        let on_done = deferred.clone();
        let on_error = deferred.clone();
        shared.subscribe(
            Some(Box::new(move |value: T| {
                on_done.settle(guard(|| on_success(value)))
            })),
            Some(Box::new(move |error: Error| {
                on_error.settle(guard(|| on_fail(error)))
            })),
        );
        deferred.promise()
    }

    /// Chains to the promise returned by `on_success`.
    ///
    /// The returned promise settles when the inner promise settles, so a
    /// `Promise<Promise<U>>` never appears.
    ///
    /// ```
    /// use deferred_out::Promise;
    /// use futures::executor::block_on;
    ///
    /// let text = Promise::resolved(3).then_pipe(|x| Promise::resolved(x.to_string()));
    /// assert_eq!(block_on(text).unwrap(), "3");
    /// ```
    pub fn then_pipe<U, S>(&self, on_success: S) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.then_pipe_or_else(on_success, Promise::rejected)
    }

    /// Like [`Promise::then_pipe`], with a handler for the rejected branch.
    pub fn then_pipe_or_else<U, S, F>(&self, on_success: S, on_fail: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Promise<U> + Send + 'static,
        F: FnOnce(Error) -> Promise<U> + Send + 'static,
    {
        let shared = match self.shared() {
            Ok(shared) => shared,
            Err(error) => return Promise::rejected(error),
        };
        let deferred = Deferred::<U>::new();
        let on_done = deferred.clone();
        let on_error = deferred.clone();
        shared.subscribe(
            Some(Box::new(move |value: T| {
                match guard(|| Ok(on_success(value))) {
                    Ok(inner) => on_done.resolve_with(&inner),
                    Err(error) => on_done.reject(error),
                }
            })),
            Some(Box::new(move |error: Error| {
                match guard(|| Ok(on_fail(error))) {
                    Ok(inner) => on_error.resolve_with(&inner),
                    Err(error) => on_error.reject(error),
                }
            })),
        );
        deferred.promise()
    }

    /// Converts the resolved value with `TryFrom`.
    ///
    /// A failed conversion rejects the returned promise with
    /// [`Error::Conversion`].
    pub fn convert_cast<U>(&self) -> Promise<U>
    where
        U: TryFrom<T> + Clone + Send + 'static,
        <U as TryFrom<T>>::Error: Display,
    {
        self.then(|value| U::try_from(value).map_err(|e| Error::Conversion(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Deferred, Error, Promise, PromiseState};
    use futures::executor::block_on;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_then_doubles() {
        let promise = Promise::resolved(5).then(|x| Ok(x * 2));
        assert_eq!(block_on(promise).unwrap(), 10);
    }

    #[test]
    fn test_then_pending_source() {
        let deferred = Deferred::<i32>::new();
        let derived = deferred.promise().then(|x| Ok(format!("#{x}")));
        assert_eq!(derived.state(), Some(PromiseState::Pending));
        deferred.resolve(9);
        assert_eq!(block_on(derived).unwrap(), "#9");
    }

    #[test]
    fn test_then_handler_error_leaves_source() {
        let source = Promise::resolved(5);
        let derived = source.then::<i32, _>(|_| Err(Error::msg("handler failed")));
        assert_eq!(block_on(derived).unwrap_err().to_string(), "handler failed");
        assert_eq!(block_on(source).unwrap(), 5);
    }

    #[test]
    fn test_then_handler_panic() {
        let source = Promise::resolved(5);
        let derived = source.then::<i32, _>(|_| panic!("kaboom"));
        match block_on(derived) {
            Err(Error::HandlerPanicked(message)) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(source.state(), Some(PromiseState::Resolved));
    }

    #[test]
    fn test_then_forwards_rejection() {
        let derived = Promise::<i32>::rejected(Error::Invalidated).then(|x| Ok(x + 1));
        assert!(matches!(block_on(derived), Err(Error::Invalidated)));
    }

    #[test]
    fn test_then_or_else_recovers() {
        let derived = Promise::<i32>::rejected(Error::msg("offline"))
            .then_or_else(|x| Ok(x.to_string()), |e| Ok(format!("fallback: {e}")));
        assert_eq!(block_on(derived).unwrap(), "fallback: offline");
    }

    #[test]
    fn test_then_on_unbound() {
        let derived = Promise::<i32>::default().then(|x| Ok(x));
        assert!(matches!(block_on(derived), Err(Error::InvalidPromise)));
    }

    #[test]
    fn test_then_pipe_flattens() {
        let derived = Promise::resolved(3).then_pipe(|x| Promise::resolved(x.to_string()));
        assert_eq!(block_on(derived).unwrap(), "3");
    }

    #[test]
    fn test_then_pipe_waits_for_inner() {
        let outer = Deferred::<i32>::new();
        let inner = Deferred::<String>::new();
        let inner_promise = inner.promise();
        let derived = outer.promise().then_pipe(move |_| inner_promise);
        outer.resolve(1);
        assert_eq!(derived.state(), Some(PromiseState::Pending));
        inner.resolve("late".into());
        assert_eq!(block_on(derived).unwrap(), "late");
    }

    #[test]
    fn test_then_pipe_inner_rejects() {
        let derived = Promise::resolved(1)
            .then_pipe(|_| Promise::<u8>::rejected(Error::msg("inner failed")));
        assert_eq!(block_on(derived).unwrap_err().to_string(), "inner failed");
    }

    #[test]
    fn test_then_pipe_inner_unbound() {
        let derived = Promise::resolved(1).then_pipe(|_| Promise::<u8>::default());
        assert!(matches!(block_on(derived), Err(Error::InvalidPromise)));
    }

    #[test]
    fn test_then_pipe_panic() {
        let derived =
            Promise::resolved(1).then_pipe::<u8, _>(|_| panic!("{}", String::from("owned")));
        assert!(matches!(block_on(derived), Err(Error::HandlerPanicked(m)) if m == "owned"));
    }

    #[test]
    fn test_then_pipe_on_unbound() {
        let derived = Promise::<i32>::default().then_pipe(|x| Promise::resolved(x));
        assert!(matches!(block_on(derived), Err(Error::InvalidPromise)));
    }

    #[test]
    fn test_then_pipe_or_else_recovers() {
        let derived = Promise::<i32>::rejected(Error::Abandoned)
            .then_pipe_or_else(Promise::resolved, |_| Promise::resolved(-1));
        assert_eq!(block_on(derived).unwrap(), -1);
    }

    #[test]
    fn test_convert_cast() {
        let ok = Promise::resolved(200i32).convert_cast::<u8>();
        assert_eq!(block_on(ok).unwrap(), 200u8);

        let bad = Promise::resolved(-1i32).convert_cast::<u8>();
        assert!(matches!(block_on(bad), Err(Error::Conversion(_))));
    }

    #[test]
    fn test_chain_abandoned_deferred() {
        let deferred = Deferred::<i32>::new();
        let derived = deferred.promise().then(|x| Ok(x));
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        derived.fail(move |e| *sink.lock().unwrap() = Some(e)).unwrap();
        drop(deferred);
        assert!(matches!(*seen.lock().unwrap(), Some(Error::Abandoned)));
    }
}
