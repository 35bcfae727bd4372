use std::fmt;

use tracing::debug;

use crate::{Deferred, Error, Promise};

/// What a deferred is resolved with.
///
/// Plain values settle the deferred on the next turn. Promises and thenables
/// are adopted: the deferred follows whatever they eventually settle to.
pub enum Resolution<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Anything that can report an eventual success or failure to an
/// [`Adoption`].
///
/// Implementations may signal synchronously inside `subscribe` or at any later
/// point. Returning `Err` rejects the adopting deferred, unless the adoption
/// was already signalled.
pub trait Thenable<T, E> {
    fn subscribe(self: Box<Self>, adoption: Adoption<T, E>) -> Result<(), E>;
}

/// Settlement capability handed to a [`Thenable`].
///
/// Clones share one token: the first `resolve`, `resolve_with` or `reject`
/// across all of them wins and every later signal is dropped.
pub struct Adoption<T, E> {
    deferred: Deferred<T, E>,
    token: u64,
}

impl<T, E> Adoption<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub(crate) fn new(deferred: Deferred<T, E>, token: u64) -> Self {
        Self { deferred, token }
    }

    pub(crate) fn deferred(&self) -> &Deferred<T, E> {
        &self.deferred
    }

    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value))
    }

    /// Resolves the adopting deferred, unwrapping `resolution` again if it is
    /// itself a promise or thenable.
    pub fn resolve_with(&self, resolution: Resolution<T, E>) {
        if self.deferred.release_adoption(self.token) {
            self.deferred.settle(resolution);
        } else {
            debug!(token = self.token, "ignoring repeated thenable resolve");
        }
    }

    pub fn reject(&self, error: E) {
        if self.deferred.release_adoption(self.token) {
            self.deferred.schedule(Err(error));
        } else {
            debug!(token = self.token, "ignoring repeated thenable reject");
        }
    }

    /// Rejects the adopting deferred on the spot: it was handed its own
    /// promise.
    pub(crate) fn reject_recursive(&self) {
        if self.deferred.release_adoption(self.token) {
            self.deferred.reject_recursive();
        }
    }

    /// `true` until the first signal.
    pub fn is_open(&self) -> bool {
        self.deferred.adoption_token() == Some(self.token)
    }
}

impl<T, E> Clone for Adoption<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.handle(),
            token: self.token,
        }
    }
}

impl<T, E> fmt::Debug for Adoption<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adoption")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Status, TurnQueue};

    struct Chatty;

    impl Thenable<i32, String> for Chatty {
        fn subscribe(self: Box<Self>, adoption: Adoption<i32, String>) -> Result<(), String> {
            adoption.resolve(1);
            adoption.reject("late".into());
            adoption.resolve(2);
            Err("thrown after signalling".into())
        }
    }

    struct Broken;

    impl Thenable<i32, String> for Broken {
        fn subscribe(self: Box<Self>, _adoption: Adoption<i32, String>) -> Result<(), String> {
            Err("no then here".into())
        }
    }

    struct Parked(std::rc::Rc<std::cell::RefCell<Option<Adoption<i32, String>>>>);

    impl Thenable<i32, String> for Parked {
        fn subscribe(self: Box<Self>, adoption: Adoption<i32, String>) -> Result<(), String> {
            *self.0.borrow_mut() = Some(adoption);
            Ok(())
        }
    }

    #[test]
    fn test_only_first_signal_is_honoured() {
        let queue = TurnQueue::new();
        let deferred = queue.deferred::<i32, String>();
        deferred.adopt(Chatty);
        assert_eq!(queue.block_on(deferred.promise()), Ok(Ok(1)));
    }

    #[test]
    fn test_subscribe_failure_rejects() {
        let queue = TurnQueue::new();
        let deferred = queue.deferred::<i32, String>();
        deferred.adopt(Broken);
        assert_eq!(
            queue.block_on(deferred.promise()),
            Ok(Err("no then here".to_string()))
        );
    }

    #[test]
    fn test_late_signal_from_clone_is_dropped() {
        let queue = TurnQueue::new();
        let parked = std::rc::Rc::new(std::cell::RefCell::new(None));
        let deferred = queue.deferred::<i32, String>();
        deferred.adopt(Parked(parked.clone()));
        assert_eq!(deferred.status(), Status::ResolutionInProgress);

        let adoption = parked.borrow_mut().take().unwrap();
        let twin = adoption.clone();
        assert!(twin.is_open());
        twin.reject("first".into());
        assert!(!adoption.is_open());
        adoption.resolve(9);

        assert_eq!(
            queue.block_on(deferred.promise()),
            Ok(Err("first".to_string()))
        );
    }

    #[test]
    fn test_nested_resolution_is_unwrapped() {
        let queue = TurnQueue::new();
        let parked = std::rc::Rc::new(std::cell::RefCell::new(None));
        let outer = queue.deferred::<i32, String>();
        let inner = queue.deferred::<i32, String>();
        outer.adopt(Parked(parked.clone()));

        let adoption = parked.borrow_mut().take().unwrap();
        adoption.resolve_with(inner.promise().into());
        queue.run_until_idle();
        assert_eq!(outer.status(), Status::ResolutionInProgress);

        inner.resolve(7);
        assert_eq!(queue.block_on(outer.promise()), Ok(Ok(7)));
    }
}
