//! The shared result cell behind every `Deferred` and `Promise`.
//!
//! The cell moves `Pending -> Resolved` or `Pending -> Rejected` exactly once.
//! Callback lists only exist inside the `Pending` variant, so they are
//! drained by the same assignment that settles the cell. Callbacks and wakers
//! always run after the lock is released.
use crate::{Error, PromiseState};
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicUsize, Ordering},
    task::{Context, Poll, Waker},
};
use tracing::{trace, warn};

pub(crate) type ResolveFn<T> = Box<dyn FnOnce(T) + Send>;
pub(crate) type RejectFn = Box<dyn FnOnce(Error) + Send>;

enum State<T> {
    Pending {
        on_resolve: Vec<ResolveFn<T>>,
        on_reject: Vec<RejectFn>,
        wakers: Vec<Waker>,
    },
    Resolved(T),
    Rejected(Error),
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs one callback; a panic is logged and swallowed so the rest still run.
fn dispatch<A>(callback: Box<dyn FnOnce(A) + Send>, arg: A) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(arg))) {
        let message = panic_message(payload.as_ref());
        warn!(%message, "promise callback panicked");
    }
}

impl<T> State<T> {
    fn pending() -> Self {
        State::Pending {
            on_resolve: vec![],
            on_reject: vec![],
            wakers: vec![],
        }
    }

    fn kind(&self) -> PromiseState {
        match self {
            State::Pending { .. } => PromiseState::Pending,
            State::Resolved(_) => PromiseState::Resolved,
            State::Rejected(_) => PromiseState::Rejected,
        }
    }
}

pub(crate) struct Shared<T> {
    state: Mutex<State<T>>,
    /// Live `Deferred` handles. Reaching zero while pending abandons the cell.
    controllers: AtomicUsize,
}

impl<T> Shared<T> {
    fn with_state(state: State<T>) -> Self {
        Shared {
            state: Mutex::new(state),
            controllers: AtomicUsize::new(1),
        }
    }

    pub(crate) fn new() -> Self {
        Self::with_state(State::pending())
    }

    pub(crate) fn new_resolved(value: T) -> Self {
        Self::with_state(State::Resolved(value))
    }

    pub(crate) fn new_rejected(error: Error) -> Self {
        Self::with_state(State::Rejected(error))
    }

    pub(crate) fn state(&self) -> PromiseState {
        self.state.lock().kind()
    }

    pub(crate) fn acquire(&self) {
        self.controllers.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one controller; the last one out rejects a still pending cell.
    pub(crate) fn release(&self) {
        if self.controllers.fetch_sub(1, Ordering::AcqRel) == 1 && self.reject(Error::Abandoned)
        {
            warn!("deferred dropped while pending, rejected as abandoned");
        }
    }

    /// Returns `false` if the cell was already settled.
    pub(crate) fn reject(&self, error: Error) -> bool {
        let mut state = self.state.lock();
        let State::Pending {
            on_resolve,
            on_reject,
            wakers,
        } = &mut *state
        else {
            return false;
        };
        let on_resolve = mem::take(on_resolve);
        let on_reject = mem::take(on_reject);
        let wakers = mem::take(wakers);
        *state = State::Rejected(error.clone());
        drop(state);

        trace!(error = %error, callbacks = on_reject.len(), "rejected");
        drop(on_resolve);
        wakers.into_iter().for_each(Waker::wake);
        for callback in on_reject {
            dispatch(callback, error.clone());
        }
        true
    }
}

impl<T: Clone> Shared<T> {
    /// Returns `false` if the cell was already settled.
    pub(crate) fn resolve(&self, value: T) -> bool {
        let mut state = self.state.lock();
        let State::Pending {
            on_resolve,
            on_reject,
            wakers,
        } = &mut *state
        else {
            return false;
        };
        let on_resolve = mem::take(on_resolve);
        let on_reject = mem::take(on_reject);
        let wakers = mem::take(wakers);
        *state = State::Resolved(value.clone());
        drop(state);

        trace!(callbacks = on_resolve.len(), "resolved");
        drop(on_reject);
        wakers.into_iter().for_each(Waker::wake);
        for callback in on_resolve {
            dispatch(callback, value.clone());
        }
        true
    }

    /// Queues the callbacks while pending, otherwise runs the matching one now.
    pub(crate) fn subscribe(&self, on_resolve: Option<ResolveFn<T>>, on_reject: Option<RejectFn>) {
        let mut state = self.state.lock();
        trace!(state = ?state.kind(), "subscribed");
        match &mut *state {
            State::Pending {
                on_resolve: resolve_list,
                on_reject: reject_list,
                ..
            } => {
                resolve_list.extend(on_resolve);
                reject_list.extend(on_reject);
            }
            State::Resolved(value) => {
                let value = value.clone();
                drop(state);
                drop(on_reject);
                if let Some(callback) = on_resolve {
                    dispatch(callback, value);
                }
            }
            State::Rejected(error) => {
                let error = error.clone();
                drop(state);
                drop(on_resolve);
                if let Some(callback) = on_reject {
                    dispatch(callback, error);
                }
            }
        }
    }

    pub(crate) fn poll(&self, cx: &mut Context<'_>) -> Poll<Result<T, Error>> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Pending { wakers, .. } => {
                // Wakers of dropped futures are only released on settlement.
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            State::Resolved(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(error) => Poll::Ready(Err(error.clone())),
        }
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state())
            .field("controllers", &self.controllers.load(Ordering::Relaxed))
            .finish()
    }
}
