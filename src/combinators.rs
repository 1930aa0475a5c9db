//! One-shot constructors, `all`, `race` and the deferred factory.
use crate::{
    promise::Promise,
    resolution::{callbacks, Reject, Resolution, Resolve},
    scheduler::Scheduler,
    Error,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};
use tracing::trace;

/// Handler result for observers whose own child promise nobody reads.
fn unit<E>() -> Result<Resolution<(), E>, E> {
    Ok(Resolution::Value(()))
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// A promise resolved with `x`. Promises and thenables are adopted.
    pub fn resolve(scheduler: Rc<dyn Scheduler>, x: impl Into<Resolution<T, E>>) -> Self {
        Promise::new(scheduler, |resolve, _| {
            resolve.resolve(x);
            Ok(())
        })
    }

    /// A promise rejected with `reason`.
    pub fn reject(scheduler: Rc<dyn Scheduler>, reason: impl Into<E>) -> Self {
        Promise::new(scheduler, |_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// Fulfills with every value, in input order, once all inputs fulfilled.
    /// Rejects with the first rejection. An empty input fulfills right away.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{Promise, TaskQueue};
    /// use std::rc::Rc;
    ///
    /// let queue = Rc::new(TaskQueue::new());
    /// let all = Promise::all(queue.clone(), vec![
    ///     Promise::<i32>::resolve(queue.clone(), 1),
    ///     Promise::<i32>::resolve(queue.clone(), 2),
    /// ]);
    /// queue.run_until_idle();
    /// assert_eq!(all.value(), Some(vec![1, 2]));
    /// ```
    pub fn all<I>(scheduler: Rc<dyn Scheduler>, promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(scheduler, move |resolve, reject| {
            if promises.is_empty() {
                resolve.resolve(Vec::new());
                return Ok(());
            }
            let results = Rc::new(RefCell::new(vec![None; promises.len()]));
            let remaining = Rc::new(Cell::new(promises.len()));
            for (index, promise) in promises.iter().enumerate() {
                let (results, remaining) = (results.clone(), remaining.clone());
                let (resolve, reject): (Resolve<Vec<T>, E>, Reject<Vec<T>, E>) =
                    (resolve.clone(), reject.clone());
                promise.then(
                    move |value| {
                        results.borrow_mut()[index] = Some(value);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let values: Vec<T> = results.take().into_iter().flatten().collect();
                            resolve.resolve(values);
                        }
                        unit()
                    },
                    move |reason| {
                        trace!(index, "all: input rejected");
                        reject.reject(reason);
                        unit()
                    },
                );
            }
            Ok(())
        })
    }

    /// Settles like whichever input settles first. Among inputs that are
    /// already settled the lowest index wins. An empty input never settles.
    pub fn race<I>(scheduler: Rc<dyn Scheduler>, promises: I) -> Promise<T, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        Promise::new(scheduler, move |resolve, reject| {
            for promise in promises {
                let (resolve, reject) = (resolve.clone(), reject.clone());
                promise.then(
                    move |value| {
                        resolve.resolve(value);
                        unit()
                    },
                    move |reason| {
                        reject.reject(reason);
                        unit()
                    },
                );
            }
            Ok(())
        })
    }
}

/// A promise together with the callbacks that settle it.
pub struct Deferred<T, E = Error> {
    pub promise: Promise<T, E>,
    pub resolve: Resolve<T, E>,
    pub reject: Reject<T, E>,
}

/// Create a pending promise that is settled from the outside.
///
/// # Examples
///
/// ```
/// use promise_aplus::{deferred, Error, TaskQueue};
/// use std::rc::Rc;
///
/// let queue = Rc::new(TaskQueue::new());
/// let d = deferred::<&str, Error>(queue.clone());
/// assert!(d.promise.is_pending());
/// d.resolve.resolve("done");
/// assert_eq!(d.promise.value(), Some("done"));
/// ```
pub fn deferred<T, E>(scheduler: Rc<dyn Scheduler>) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    // The same pair `Promise::new` hands to its executor.
    let promise = Promise::pending(scheduler);
    let (resolve, reject) = callbacks(&promise);
    Deferred {
        promise,
        resolve,
        reject,
    }
}

/// Alias of [`deferred`].
pub fn defer<T, E>(scheduler: Rc<dyn Scheduler>) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    deferred(scheduler)
}
