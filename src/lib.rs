//! Promise/A+ deferred values for a single cooperative timeline.
//!
//! A [`Promise`] starts pending and settles exactly once, either fulfilled
//! with a value or rejected with a reason. Observers attached with
//! [`Promise::then`] are notified in registration order, always through the
//! promise's [`Scheduler`] and never inside the call that attached them.
//! Foreign promise types take part through the [`Thenable`] trait.
//!
//! # Examples
//!
//! ```
//! use promise_aplus::{Promise, Resolution, TaskQueue};
//! use std::rc::Rc;
//!
//! let queue = Rc::new(TaskQueue::new());
//! let promise: Promise<i32> = Promise::new(queue.clone(), |resolve, _reject| {
//!     resolve.resolve(5);
//!     Ok(())
//! });
//! let next = promise.and_then(|v| Ok(Resolution::Value(v + 1)));
//! queue.run_until_idle();
//! assert_eq!(next.value(), Some(6));
//! ```
pub mod combinators;
pub mod promise;
pub mod resolution;
pub mod scheduler;

pub use combinators::{defer, deferred, Deferred};
pub use promise::{Promise, PromiseState};
pub use resolution::{Reject, Resolution, Resolve, ThenMember, Thenable};
pub use scheduler::{Scheduler, Task, TaskQueue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A promise was resolved with itself.
    #[error("Chaining cycle detected for promise")]
    ChainingCycle,
    #[error("{0}")]
    Reason(String),
}

impl From<&str> for Error {
    fn from(reason: &str) -> Self {
        Error::Reason(reason.to_owned())
    }
}

impl From<String> for Error {
    fn from(reason: String) -> Self {
        Error::Reason(reason)
    }
}
