use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::{
    dispatch::Dispatcher,
    error::{panic_message, Error},
    resolution::Resolution,
    Deferred, Promise,
};

/// A boxed success or error callback. Returning `Err` rejects the downstream
/// promise; returning `Ok` resolves it, adopting any promise or thenable.
pub type Callback<A, R, E> = Box<dyn FnOnce(A) -> Result<Resolution<R, E>, E>>;

pub(crate) enum Reaction<A, R, E> {
    /// No callback was given: hand the upstream outcome straight on.
    Forward(fn(A) -> Result<R, E>),
    Invoke(Callback<A, R, E>),
}

impl<T, E> Reaction<T, T, E> {
    pub(crate) fn forward_value() -> Self {
        Reaction::Forward(Ok)
    }
}

impl<R, E> Reaction<E, R, E> {
    pub(crate) fn forward_error() -> Self {
        Reaction::Forward(Err)
    }
}

/// Type-erased view of a queued client, so one deferred can hold clients
/// with different downstream value types.
pub(crate) trait Continuation<T, E> {
    fn resolve(self: Box<Self>, value: T, defer: bool);
    fn reject(self: Box<Self>, error: E, defer: bool);
}

/// One `then` attachment: a pair of reactions and the deferred they settle.
pub(crate) struct Client<T, R, E> {
    dispatcher: Dispatcher,
    on_success: Reaction<T, R, E>,
    on_error: Reaction<E, R, E>,
    result: Deferred<R, E>,
}

impl<T, R, E> Client<T, R, E>
where
    R: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub(crate) fn new(
        dispatcher: Dispatcher,
        on_success: Reaction<T, R, E>,
        on_error: Reaction<E, R, E>,
    ) -> Self {
        Self {
            result: Deferred::new(dispatcher.clone()),
            dispatcher,
            on_success,
            on_error,
        }
    }

    pub(crate) fn promise(&self) -> Promise<R, E> {
        self.result.promise()
    }
}

impl<T, R, E> Continuation<T, E> for Client<T, R, E>
where
    T: 'static,
    R: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn resolve(self: Box<Self>, value: T, defer: bool) {
        let Client {
            dispatcher,
            on_success,
            result,
            ..
        } = *self;
        react(&dispatcher, on_success, value, result, defer);
    }

    fn reject(self: Box<Self>, error: E, defer: bool) {
        let Client {
            dispatcher,
            on_error,
            result,
            ..
        } = *self;
        react(&dispatcher, on_error, error, result, defer);
    }
}

fn react<A, R, E>(
    dispatcher: &Dispatcher,
    reaction: Reaction<A, R, E>,
    arg: A,
    result: Deferred<R, E>,
    defer: bool,
) where
    A: 'static,
    R: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match reaction {
        Reaction::Forward(forward) => match forward(arg) {
            Ok(value) => {
                result.resolve(value);
            }
            Err(error) => {
                result.reject(error);
            }
        },
        Reaction::Invoke(callback) if defer => {
            dispatcher.dispatch(Box::new(move || invoke(callback, arg, &result)))
        }
        Reaction::Invoke(callback) => invoke(callback, arg, &result),
    }
}

fn invoke<A, R, E>(callback: Callback<A, R, E>, arg: A, result: &Deferred<R, E>)
where
    R: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match panic::catch_unwind(AssertUnwindSafe(move || callback(arg))) {
        Ok(Ok(resolution)) => {
            result.resolve_with(resolution);
        }
        Ok(Err(error)) => {
            result.reject(error);
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(%message, "continuation callback panicked");
            result.reject(E::from(Error::CallbackPanicked(message)));
        }
    }
}
