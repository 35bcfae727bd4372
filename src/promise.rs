use std::{
    cell::RefCell,
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::{
    client::{Callback, Reaction},
    resolution::{Adoption, Resolution, Thenable},
    Deferred, Error, Status,
};

/// Read-only view of a [`Deferred`].
///
/// Cloning a promise clones the view, not the state: every clone observes the
/// same settlement and every attachment gets its own downstream promise.
///
/// # Examples
///
/// ```
/// use promise_deferred::TurnQueue;
///
/// let queue = TurnQueue::new();
/// let deferred = queue.deferred::<i32, String>();
/// let chained = deferred
///     .promise()
///     .then(|v| if v < 0 { Err("negative".to_string()) } else { Ok(v * 2) })
///     .fail(|e| Ok(e.len() as i32));
/// deferred.resolve(-1);
/// assert_eq!(queue.block_on(chained), Ok(Ok(8)));
/// ```
pub struct Promise<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Promise<T, E> {
    pub(crate) fn new(deferred: Deferred<T, E>) -> Self {
        Self { deferred }
    }

    pub(crate) fn deferred(&self) -> &Deferred<T, E> {
        &self.deferred
    }

    pub fn status(&self) -> Status {
        self.deferred.status()
    }

    /// `true` when both promises view the same deferred.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.deferred.same_as(&other.deferred)
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Maps the value. Errors pass through untouched.
    pub fn then<R, F>(&self, on_success: F) -> Promise<R, E>
    where
        R: Clone + 'static,
        F: FnOnce(T) -> Result<R, E> + 'static,
    {
        self.deferred.attach(
            Reaction::Invoke(Box::new(move |value| on_success(value).map(Resolution::Value))),
            Reaction::forward_error(),
        )
    }

    /// Like [`Promise::then`], but the callback may hand back another promise
    /// or thenable to wait on.
    pub fn and_then<R, F>(&self, on_success: F) -> Promise<R, E>
    where
        R: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<R, E>, E> + 'static,
    {
        self.deferred
            .attach(Reaction::Invoke(Box::new(on_success)), Reaction::forward_error())
    }

    /// Recovers from a rejection. Returning `Ok` turns the chain back into a
    /// success; values pass through untouched.
    pub fn fail<F>(&self, on_error: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Result<T, E> + 'static,
    {
        self.deferred.attach(
            Reaction::forward_value(),
            Reaction::Invoke(Box::new(move |error| on_error(error).map(Resolution::Value))),
        )
    }

    pub fn or_else<F>(&self, on_error: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.deferred
            .attach(Reaction::forward_value(), Reaction::Invoke(Box::new(on_error)))
    }

    pub fn then_or_else<R, F, G>(&self, on_success: F, on_error: G) -> Promise<R, E>
    where
        R: Clone + 'static,
        F: FnOnce(T) -> Result<R, E> + 'static,
        G: FnOnce(E) -> Result<R, E> + 'static,
    {
        self.deferred.attach(
            Reaction::Invoke(Box::new(move |value| on_success(value).map(Resolution::Value))),
            Reaction::Invoke(Box::new(move |error| on_error(error).map(Resolution::Value))),
        )
    }

    /// See [`Deferred::then_with`].
    pub fn then_with(
        &self,
        on_success: Option<Callback<T, T, E>>,
        on_error: Option<Callback<E, T, E>>,
    ) -> Promise<T, E> {
        self.deferred.then_with(on_success, on_error)
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self::new(self.deferred.handle())
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish()
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn subscribe(self: Box<Self>, adoption: Adoption<T, E>) -> Result<(), E> {
        if self.deferred.same_as(adoption.deferred()) {
            adoption.reject_recursive();
            return Ok(());
        }
        let on_error = adoption.clone();
        self.deferred.attach::<()>(
            Reaction::Invoke(Box::new(move |value| {
                adoption.resolve(value);
                Ok(Resolution::Value(()))
            })),
            Reaction::Invoke(Box::new(move |error| {
                on_error.reject(error);
                Ok(Resolution::Value(()))
            })),
        );
        Ok(())
    }
}

/// The awaitable end of a promise, produced by `.await` or
/// [`IntoFuture::into_future`].
#[derive(Debug)]
pub struct Consumer<T, E> {
    slot: Rc<RefCell<Slot<T, E>>>,
}

#[derive(Debug)]
struct Slot<T, E> {
    outcome: Option<Result<T, E>>,
    waker: Option<Waker>,
}

impl<T, E> Slot<T, E> {
    fn fill(slot: &RefCell<Self>, outcome: Result<T, E>) {
        let waker = {
            let mut slot = slot.borrow_mut();
            slot.outcome = Some(outcome);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake()
        }
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Consumer<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        let slot = Rc::new(RefCell::new(Slot {
            outcome: None,
            waker: None,
        }));
        let on_value = Rc::clone(&slot);
        let on_error = Rc::clone(&slot);
        self.deferred.attach::<()>(
            Reaction::Invoke(Box::new(move |value| {
                Slot::fill(&on_value, Ok(value));
                Ok(Resolution::Value(()))
            })),
            Reaction::Invoke(Box::new(move |error| {
                Slot::fill(&on_error, Err(error));
                Ok(Resolution::Value(()))
            })),
        );
        Consumer { slot }
    }
}

impl<T, E> Future for Consumer<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dispatcher, TurnQueue};
    use futures::executor::block_on;

    #[test]
    fn test_then_doubles_value() {
        let queue = TurnQueue::new();
        let deferred = queue.deferred::<i32, String>();
        deferred.resolve(5);
        queue.run_until_idle();
        let doubled = deferred.promise().then(|v| Ok(v * 2));
        assert_eq!(queue.block_on(doubled), Ok(Ok(10)));
    }

    #[test]
    fn test_then_or_else_recovers_with_length() {
        let queue = TurnQueue::new();
        let deferred = queue.deferred::<i32, String>();
        deferred.reject("boom".into());
        let length = deferred
            .promise()
            .then_or_else(|v: i32| Ok(v as usize), |e| Ok(e.len()));
        assert_eq!(queue.block_on(length), Ok(Ok(4)));
    }

    #[test]
    fn test_then_with_no_callbacks_is_identity() {
        let queue = TurnQueue::new();
        let deferred = queue.deferred::<i32, String>();
        let promise = deferred.promise();
        assert!(promise.then_with(None, None).ptr_eq(&promise));
        assert!(!promise.then(|v| Ok(v)).ptr_eq(&promise));
    }

    #[test]
    fn test_then_with_boxed_callbacks() {
        let queue = TurnQueue::new();
        let deferred = queue.deferred::<i32, String>();
        let recovered = deferred
            .promise()
            .then_with(
                None,
                Some(Box::new(|e: String| -> Result<Resolution<i32, String>, String> {
                    Ok(Resolution::Value(e.len() as i32))
                })),
            );
        deferred.reject("four".into());
        assert_eq!(queue.block_on(recovered), Ok(Ok(4)));
    }

    #[test]
    fn test_independent_consumers() {
        let queue = TurnQueue::new();
        let deferred = queue.deferred::<i32, String>();
        let shared = deferred.promise();
        let plus = shared.clone().then(|v| Ok(v + 1));
        let minus = shared.then(|v| Ok(v - 1));
        deferred.resolve(10);
        assert_eq!(queue.block_on(plus), Ok(Ok(11)));
        assert_eq!(queue.block_on(minus), Ok(Ok(9)));
    }

    #[test]
    fn test_or_else_adopts_fallback() {
        let queue = TurnQueue::new();
        let deferred = queue.deferred::<i32, String>();
        let fallback = queue.deferred::<i32, String>();
        let fallback_promise = fallback.promise();
        let recovered = deferred
            .promise()
            .or_else(move |_| Ok(fallback_promise.into()));
        deferred.reject("primary down".into());
        fallback.resolve(99);
        assert_eq!(queue.block_on(recovered), Ok(Ok(99)));
    }

    #[test]
    fn test_await_with_immediate_dispatcher() {
        let deferred = Deferred::<String, String>::new(Dispatcher::immediate());
        let promise = deferred.promise().then(|s| Ok(format!("{s}!")));
        deferred.resolve("🍓".into());
        assert_eq!(block_on(promise.into_future()), Ok("🍓!".to_string()));
    }

    #[test]
    fn test_await_rejection() {
        let deferred = Deferred::<(), String>::new(Dispatcher::immediate());
        deferred.reject("reject!!".into());
        let result = block_on(async { deferred.promise().await });
        assert_eq!(result, Err("reject!!".to_string()));
    }
}
