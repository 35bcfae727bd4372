//! The producer side: a [`Deferred`] owns the settlement state of one
//! asynchronous computation and the queue of continuations waiting on it.
//!
//! A deferred leaves `Pending` at most once. `resolve`, `resolve_with` and
//! `reject` check for `Pending` first and silently do nothing otherwise, so
//! the first call always wins. Settlement itself happens on a dispatcher turn:
//! the state moves to `ResolutionInProgress` immediately and to `Resolved` or
//! `Rejected` when the scheduled task runs and drains the queue.
use std::{
    cell::RefCell,
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use tracing::{debug, trace, warn};

use crate::{
    client::{Callback, Client, Continuation, Reaction},
    dispatch::Dispatcher,
    error::panic_message,
    resolution::{Adoption, Resolution, Thenable},
    Error, Promise,
};

/// Observable settlement state of a deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    ResolutionInProgress,
    Resolved,
    Rejected,
}

enum State<T, E> {
    Pending,
    ResolutionInProgress,
    Resolved(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn status(&self) -> Status {
        match self {
            State::Pending => Status::Pending,
            State::ResolutionInProgress => Status::ResolutionInProgress,
            State::Resolved(_) => Status::Resolved,
            State::Rejected(_) => Status::Rejected,
        }
    }
}

struct Inner<T, E> {
    state: State<T, E>,
    queue: Vec<Box<dyn Continuation<T, E>>>,
    /// Token of the thenable currently being adopted, cleared by its first
    /// signal.
    adoption: Option<u64>,
    generation: u64,
}

/// Producer handle. Hand [`Deferred::promise`] to consumers and settle the
/// deferred exactly once.
///
/// # Examples
///
/// ```
/// use promise_deferred::{Status, TurnQueue};
///
/// let queue = TurnQueue::new();
/// let deferred = queue.deferred::<i32, String>();
/// deferred.resolve(1).resolve(2);
/// assert_eq!(deferred.status(), Status::ResolutionInProgress);
/// queue.run_until_idle();
/// assert_eq!(deferred.status(), Status::Resolved);
/// assert_eq!(queue.block_on(deferred.promise()), Ok(Ok(1)));
/// ```
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
    dispatcher: Dispatcher,
}

impl<T, E> Deferred<T, E> {
    pub fn promise(&self) -> Promise<T, E> {
        Promise::new(self.handle())
    }

    pub fn status(&self) -> Status {
        self.inner.borrow().state.status()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Another handle on the same state. Producers get exactly one handle;
    /// promises, clients and adoptions hold these.
    pub(crate) fn handle(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            dispatcher: self.dispatcher.clone(),
        }
    }

    pub(crate) fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn adoption_token(&self) -> Option<u64> {
        self.inner.borrow().adoption
    }

    /// Consumes the adoption token if it is still the active one.
    pub(crate) fn release_adoption(&self, token: u64) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.adoption == Some(token) {
            inner.adoption = None;
            true
        } else {
            false
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                queue: Vec::new(),
                adoption: None,
                generation: 0,
            })),
            dispatcher,
        }
    }

    pub fn resolve(&self, value: T) -> &Self {
        self.resolve_with(Resolution::Value(value))
    }

    /// Resolves with a foreign thenable, following its eventual outcome.
    pub fn adopt(&self, thenable: impl Thenable<T, E> + 'static) -> &Self {
        self.resolve_with(Resolution::Thenable(Box::new(thenable)))
    }

    pub fn resolve_with(&self, resolution: Resolution<T, E>) -> &Self {
        if self.status() != Status::Pending {
            debug!("ignoring resolve on a deferred that already left pending");
            return self;
        }
        self.settle(resolution);
        self
    }

    pub fn reject(&self, error: E) -> &Self {
        if self.status() != Status::Pending {
            debug!("ignoring reject on a deferred that already left pending");
            return self;
        }
        self.schedule(Err(error));
        self
    }

    /// Attaches optional callbacks that keep the value and error types.
    ///
    /// With neither callback this attaches nothing and returns this
    /// deferred's own promise.
    pub fn then_with(
        &self,
        on_success: Option<Callback<T, T, E>>,
        on_error: Option<Callback<E, T, E>>,
    ) -> Promise<T, E> {
        if on_success.is_none() && on_error.is_none() {
            return self.promise();
        }
        let on_success = match on_success {
            Some(callback) => Reaction::Invoke(callback),
            None => Reaction::forward_value(),
        };
        let on_error = match on_error {
            Some(callback) => Reaction::Invoke(callback),
            None => Reaction::forward_error(),
        };
        self.attach(on_success, on_error)
    }

    /// Registers a continuation. Queued while unsettled, otherwise fired
    /// through the dispatcher right away.
    pub(crate) fn attach<R>(
        &self,
        on_success: Reaction<T, R, E>,
        on_error: Reaction<E, R, E>,
    ) -> Promise<R, E>
    where
        R: Clone + 'static,
    {
        let client = Client::new(self.dispatcher.clone(), on_success, on_error);
        let promise = client.promise();
        let settled = match &self.inner.borrow().state {
            State::Pending | State::ResolutionInProgress => None,
            State::Resolved(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
        };
        match settled {
            None => self.inner.borrow_mut().queue.push(Box::new(client)),
            Some(Ok(value)) => Box::new(client).resolve(value, true),
            Some(Err(error)) => Box::new(client).reject(error, true),
        }
        promise
    }

    /// Resolution without the pending check. Adoptions re-enter here while
    /// the deferred is already `ResolutionInProgress`.
    pub(crate) fn settle(&self, resolution: Resolution<T, E>) {
        match resolution {
            Resolution::Value(value) => self.schedule(Ok(value)),
            Resolution::Promise(promise) if promise.deferred().same_as(self) => {
                self.reject_recursive()
            }
            Resolution::Promise(promise) => self.subscribe_to(Box::new(promise)),
            Resolution::Thenable(thenable) => self.subscribe_to(thenable),
        }
    }

    fn subscribe_to(&self, thenable: Box<dyn Thenable<T, E>>) {
        let token = {
            let mut inner = self.inner.borrow_mut();
            inner.state = State::ResolutionInProgress;
            inner.generation += 1;
            inner.adoption = Some(inner.generation);
            inner.generation
        };
        trace!(token, "adopting thenable");
        let adoption = Adoption::new(self.handle(), token);
        let subscribed =
            panic::catch_unwind(AssertUnwindSafe(move || thenable.subscribe(adoption)));
        let error = match subscribed {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(token, %message, "thenable panicked while subscribing");
                E::from(Error::CallbackPanicked(message))
            }
        };
        if self.release_adoption(token) {
            self.schedule(Err(error));
        } else {
            debug!(token, "thenable failed after it had already signalled");
        }
    }

    /// Settles as rejected without a dispatcher turn. Continuations already
    /// queued still run on a later turn.
    pub(crate) fn reject_recursive(&self) {
        warn!("deferred resolved with its own promise");
        self.complete(Err(E::from(Error::RecursiveResolution)), true);
    }

    /// Leaves `Pending` now and settles on the next dispatcher turn.
    pub(crate) fn schedule(&self, outcome: Result<T, E>) {
        self.inner.borrow_mut().state = State::ResolutionInProgress;
        let deferred = self.handle();
        self.dispatcher
            .dispatch(Box::new(move || deferred.complete(outcome, false)));
    }

    fn complete(&self, outcome: Result<T, E>, defer: bool) {
        let clients = {
            let mut inner = self.inner.borrow_mut();
            inner.state = match &outcome {
                Ok(value) => State::Resolved(value.clone()),
                Err(error) => State::Rejected(error.clone()),
            };
            std::mem::take(&mut inner.queue)
        };
        trace!(
            resolved = outcome.is_ok(),
            continuations = clients.len(),
            "deferred settled"
        );
        for client in clients {
            match &outcome {
                Ok(value) => client.resolve(value.clone(), defer),
                Err(error) => client.reject(error.clone(), defer),
            }
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("status", &inner.state.status())
            .field("queued", &inner.queue.len())
            .finish()
    }
}
