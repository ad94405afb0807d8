use crate::{cell::Shared, Deferred, Error, PromiseState};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

/// The consumer side of a [`Deferred`].
///
/// Promises can be cloned freely; all clones observe the same outcome. A
/// promise can register callbacks ([`Promise::done`], [`Promise::fail`]),
/// derive new promises ([`Promise::then`], [`Promise::then_pipe`]), or be
/// awaited, yielding `Result<T, Error>`.
///
/// `Promise::default()` is unbound: it belongs to no deferred, and
/// subscribing to it fails with [`Error::InvalidPromise`].
///
/// # Examples
///
/// ```
/// use deferred_out::{Deferred, Promise};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let deferred = Deferred::<String>::new();
/// let consumer = deferred.promise();
/// let consumer2 = consumer.clone();
/// let task1 = thread::spawn(move || block_on(consumer));
/// let task2 = thread::spawn(move || block_on(consumer2));
/// deferred.resolve("Hi".into());
/// assert_eq!(task1.join().unwrap().unwrap(), "Hi");
/// assert_eq!(task2.join().unwrap().unwrap(), "Hi");
/// ```
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    pub(crate) fn bound(shared: Arc<Shared<T>>) -> Self {
        Promise {
            shared: Some(shared),
        }
    }

    pub(crate) fn shared(&self) -> Result<&Arc<Shared<T>>, Error> {
        self.shared.as_ref().ok_or(Error::InvalidPromise)
    }

    /// A promise which is already rejected with `error`.
    pub fn rejected(error: Error) -> Self {
        Deferred::rejected(error).promise()
    }

    /// True if this promise is bound to a deferred.
    pub fn is_valid(&self) -> bool {
        self.shared.is_some()
    }

    /// Unbinds this handle. Other handles on the same cell are not affected.
    pub fn invalidate(&mut self) {
        self.shared = None;
    }

    /// `None` for an unbound promise.
    pub fn state(&self) -> Option<PromiseState> {
        self.shared.as_ref().map(|shared| shared.state())
    }
}

impl<T: Clone> Promise<T> {
    /// A promise which is already resolved to `value`.
    pub fn resolved(value: T) -> Self {
        Deferred::resolved(value).promise()
    }

    /// Registers `on_success` to run when the promise resolves.
    ///
    /// If the promise is already resolved, `on_success` runs before this
    /// returns. If it is already rejected, `on_success` is dropped.
    ///
    /// ```
    /// use deferred_out::Promise;
    /// use std::sync::{Arc, Mutex};
    ///
    /// let seen = Arc::new(Mutex::new(0));
    /// let sink = seen.clone();
    /// Promise::resolved(5).done(move |v| *sink.lock().unwrap() = v).unwrap();
    /// assert_eq!(*seen.lock().unwrap(), 5);
    /// ```
    pub fn done<S>(&self, on_success: S) -> Result<&Self, Error>
    where
        S: FnOnce(T) + Send + 'static,
    {
        self.shared()?.subscribe(Some(Box::new(on_success)), None);
        Ok(self)
    }

    /// Registers `on_fail` to run when the promise is rejected.
    pub fn fail<F>(&self, on_fail: F) -> Result<&Self, Error>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.shared()?.subscribe(None, Some(Box::new(on_fail)));
        Ok(self)
    }

    /// Registers one callback for each outcome; exactly one of them runs.
    pub fn done_or_fail<S, F>(&self, on_success: S, on_fail: F) -> Result<&Self, Error>
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        self.shared()?
            .subscribe(Some(Box::new(on_success)), Some(Box::new(on_fail)));
        Ok(self)
    }
}

impl<T: Clone> From<T> for Promise<T> {
    fn from(value: T) -> Self {
        Promise::resolved(value)
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &self.shared {
            Some(shared) => shared.poll(cx),
            None => Poll::Ready(Err(Error::InvalidPromise)),
        }
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self { shared: None }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("state", &self.state()).finish()
    }
}
