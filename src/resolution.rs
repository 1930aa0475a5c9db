//! How a produced value settles a promise.
//!
//! Anything a promise can be resolved with is first classified into a
//! [`Resolution`]: a plain value, a promise of this crate, or a foreign
//! [`Thenable`]. `resolve_promise` then settles the target, following
//! thenables until a plain value or a rejection turns up.
use crate::{promise::Promise, Error};
use std::{cell::Cell, rc::Rc};
use tracing::{debug, trace};

/// A value classified for the resolution procedure.
pub enum Resolution<T, E = Error> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Thenable(Box::new(thenable))
    }
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

/// What a thenable's `then` member turned out to be.
pub enum ThenMember<T> {
    Callable,
    /// `then` is not callable, the thenable stands for this plain value.
    Plain(T),
}

/// A foreign promise.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Promise, Reject, Resolution, Resolve, TaskQueue, Thenable};
/// use std::rc::Rc;
///
/// struct Ready(i32);
///
/// impl Thenable<i32> for Ready {
///     fn then(&self, resolve: Resolve<i32>, _reject: Reject<i32>) -> Result<(), Error> {
///         resolve.resolve(self.0);
///         Ok(())
///     }
/// }
///
/// let queue = Rc::new(TaskQueue::new());
/// let promise = Promise::<i32>::resolve(queue.clone(), Resolution::thenable(Ready(3)));
/// assert_eq!(promise.value(), Some(3));
/// ```
pub trait Thenable<T, E = Error> {
    /// Look up the `then` member. An `Err` rejects the promise being
    /// resolved.
    fn probe(&self) -> Result<ThenMember<T>, E> {
        Ok(ThenMember::Callable)
    }

    /// Subscribe to this thenable's outcome.
    ///
    /// Only the first call to either callback counts. An `Err` returned
    /// before any callback fired rejects the promise being resolved, after
    /// that it is ignored.
    fn then(&self, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E>;

    /// The native promise behind this thenable, if any. Used to catch a
    /// promise being resolved with itself.
    fn as_promise(&self) -> Option<&Promise<T, E>> {
        None
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn then(&self, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E> {
        Promise::then(
            self,
            move |value| {
                resolve.resolve(value);
                Ok(Resolution::Value(()))
            },
            move |reason| {
                reject.reject(reason);
                Ok(Resolution::Value(()))
            },
        );
        Ok(())
    }

    fn as_promise(&self) -> Option<&Promise<T, E>> {
        Some(self)
    }
}

/// Single-use flag shared by a resolve/reject pair.
#[derive(Clone, Default)]
struct CallGuard(Rc<Cell<bool>>);

impl CallGuard {
    /// `true` for the first claim only.
    fn claim(&self) -> bool {
        !self.0.replace(true)
    }
}

/// The resolve callback handed to executors and thenables.
///
/// Only the first call to either callback of a pair counts.
pub struct Resolve<T, E = Error> {
    target: Promise<T, E>,
    guard: CallGuard,
}

/// The reject callback handed to executors and thenables.
pub struct Reject<T, E = Error> {
    target: Promise<T, E>,
    guard: CallGuard,
}

/// A fresh resolve/reject pair for `target`.
pub(crate) fn callbacks<T, E>(target: &Promise<T, E>) -> (Resolve<T, E>, Reject<T, E>) {
    let guard = CallGuard::default();
    (
        Resolve {
            target: target.clone(),
            guard: guard.clone(),
        },
        Reject {
            target: target.clone(),
            guard,
        },
    )
}

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T, E> Resolve<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Resolve the promise with a value, a promise or a thenable. Ignored
    /// once either callback of the pair was called.
    pub fn resolve(&self, x: impl Into<Resolution<T, E>>) {
        if self.guard.claim() {
            resolve_promise(&self.target, x.into());
        } else {
            trace!("resolve ignored, already called back");
        }
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Reject the promise. Ignored once either callback of the pair was
    /// called.
    pub fn reject(&self, reason: impl Into<E>) {
        if self.guard.claim() {
            self.target.settle_rejected(reason.into());
        } else {
            trace!("reject ignored, already called back");
        }
    }
}

/// Settle `promise` according to `x`.
pub(crate) fn resolve_promise<T, E>(promise: &Promise<T, E>, x: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let cyclic = match &x {
        Resolution::Value(_) => false,
        Resolution::Promise(other) => other.ptr_eq(promise),
        Resolution::Thenable(thenable) => thenable
            .as_promise()
            .is_some_and(|other| other.ptr_eq(promise)),
    };
    if cyclic {
        debug!("chaining cycle detected");
        promise.settle_rejected(Error::ChainingCycle.into());
        return;
    }
    match x {
        Resolution::Value(value) => promise.settle_fulfilled(value),
        Resolution::Promise(other) => call_then(promise, &other),
        Resolution::Thenable(thenable) => match thenable.probe() {
            Err(reason) => promise.settle_rejected(reason),
            Ok(ThenMember::Plain(value)) => promise.settle_fulfilled(value),
            Ok(ThenMember::Callable) => call_then(promise, &*thenable),
        },
    }
}

fn call_then<T, E>(promise: &Promise<T, E>, thenable: &dyn Thenable<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let (resolve, reject) = callbacks(promise);
    let on_error = reject.clone();
    // An error after either callback fired is swallowed by the guard.
    if let Err(reason) = thenable.then(resolve, reject) {
        on_error.reject(reason);
    }
}
