//! Deferred/promise pairs for single-threaded, turn-based code.
//!
//! A producer creates a [`Deferred`], hands out its [`Promise`], and settles
//! it once with [`Deferred::resolve`] or [`Deferred::reject`]. Consumers chain
//! continuations with [`Promise::then`], [`Promise::fail`] and friends. Every
//! continuation runs on a [`Dispatcher`] turn, never inside the call that
//! attached it.
//!
//! Resolving with another promise or a [`Thenable`] adopts its eventual
//! outcome. Resolving a deferred with its own promise rejects it with
//! [`Error::RecursiveResolution`].
//!
//! # Examples
//!
//! ```
//! use promise_deferred::{Resolution, TurnQueue};
//!
//! let queue = TurnQueue::new();
//! let outer = queue.deferred::<i32, String>();
//! let inner = queue.deferred::<i32, String>();
//!
//! outer.resolve_with(Resolution::from(inner.promise()));
//! inner.resolve(7);
//!
//! assert_eq!(queue.block_on(outer.promise()), Ok(Ok(7)));
//! ```
mod client;
mod deferred;
pub mod dispatch;
mod error;
mod promise;
mod resolution;

pub use client::Callback;
pub use deferred::{Deferred, Status};
pub use dispatch::{Dispatcher, Task, TurnQueue};
pub use error::Error;
pub use promise::{Consumer, Promise};
pub use resolution::{Adoption, Resolution, Thenable};
