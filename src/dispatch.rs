//! Dispatchers decide *when* a settled deferred gets to run its
//! continuations. Resolution logic never calls a callback on its own; it hands
//! a [`Task`] to the dispatcher it was constructed with.
//!
//! [`TurnQueue`] is the default, zero-delay FIFO scheduler. Tasks submitted
//! while a turn is running are appended behind everything already queued, so
//! they always run on a later turn.
//!
//! ```
//! use promise_deferred::TurnQueue;
//!
//! let queue = TurnQueue::new();
//! let deferred = queue.deferred::<u32, String>();
//! let doubled = deferred.promise().then(|v| Ok(v * 2));
//! deferred.resolve(21);
//! assert_eq!(queue.block_on(doubled), Ok(Ok(42)));
//! ```
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    future::{Future, IntoFuture},
    pin::pin,
    rc::Rc,
    task::{Context, Poll},
};

use futures::task::noop_waker_ref;
use tracing::trace;

use crate::{Deferred, Error};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Scheduling capability shared by a deferred and every continuation it
/// spawns.
#[derive(Clone)]
pub struct Dispatcher {
    schedule: Rc<dyn Fn(Task)>,
}

impl Dispatcher {
    pub fn new(schedule: impl Fn(Task) + 'static) -> Self {
        Self {
            schedule: Rc::new(schedule),
        }
    }

    /// Runs every task synchronously inside `dispatch`.
    ///
    /// Continuations then fire within the call that settles them, so the
    /// "never synchronous with `then`" ordering does not hold. Useful for
    /// tests that want settlement without pumping a queue.
    pub fn immediate() -> Self {
        Self::new(|task| task())
    }

    pub fn dispatch(&self, task: Task) {
        (self.schedule)(task)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

/// FIFO task queue standing in for the host's macrotask queue.
#[derive(Clone, Default)]
pub struct TurnQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher that appends to this queue.
    pub fn dispatcher(&self) -> Dispatcher {
        let tasks = Rc::clone(&self.tasks);
        Dispatcher::new(move |task| tasks.borrow_mut().push_back(task))
    }

    /// A fresh deferred scheduled on this queue.
    pub fn deferred<T, E>(&self) -> Deferred<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
    {
        Deferred::new(self.dispatcher())
    }

    /// Runs the oldest queued task. Returns `false` when there was nothing
    /// to run.
    pub fn turn(&self) -> bool {
        // The borrow must end before the task runs: tasks enqueue more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs turns until the queue is empty, including tasks queued along the
    /// way. Returns how many turns ran.
    pub fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        while self.turn() {
            turns += 1;
        }
        trace!(turns, "turn queue idle");
        turns
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Polls `future` to completion, running one turn between polls.
    ///
    /// Fails with [`Error::Stalled`] if the queue empties while the future is
    /// still pending: nothing left on this queue can make progress.
    pub fn block_on<F: IntoFuture>(&self, future: F) -> Result<F::Output, Error> {
        let mut future = pin!(future.into_future());
        let mut cx = Context::from_waker(noop_waker_ref());
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            if !self.turn() {
                return Err(Error::Stalled);
            }
        }
    }
}

impl fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnQueue")
            .field("queued", &self.len())
            .finish()
    }
}
