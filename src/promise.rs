use crate::{
    resolution::{callbacks, resolve_promise, Reject, Resolution, Resolve},
    scheduler::Scheduler,
    Error,
};
use std::{
    cell::RefCell,
    fmt,
    future::Future,
    mem,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};
use tracing::trace;

type Observer<A> = Box<dyn FnOnce(A)>;

struct Observers<T, E> {
    on_fulfilled: Vec<Observer<T>>,
    on_rejected: Vec<Observer<E>>,
    wakers: Vec<Waker>,
}

impl<T, E> Default for Observers<T, E> {
    fn default() -> Self {
        Self {
            on_fulfilled: vec![],
            on_rejected: vec![],
            wakers: vec![],
        }
    }
}

enum State<T, E> {
    Pending(Observers<T, E>),
    Fulfilled(T),
    Rejected(E),
}

/// Where a promise is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// A value that settles once, fulfilled with a `T` or rejected with an `E`.
///
/// Cloning is cheap and every clone refers to the same promise.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Promise, PromiseState, Resolution, TaskQueue};
/// use std::rc::Rc;
///
/// let queue = Rc::new(TaskQueue::new());
/// let promise = Promise::<String>::reject(queue.clone(), "e");
/// let recovered = promise.catch(|reason| Ok(Resolution::Value(format!("{reason}!"))));
/// assert_eq!(recovered.state(), PromiseState::Pending);
/// queue.run_until_idle();
/// assert_eq!(recovered.value(), Some("e!".to_string()));
/// ```
pub struct Promise<T, E = Error> {
    state: Rc<RefCell<State<T, E>>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish()
    }
}

impl<T, E> Promise<T, E> {
    pub(crate) fn pending(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Pending(Observers::default()))),
            scheduler,
        }
    }

    pub fn state(&self) -> PromiseState {
        match &*self.state.borrow() {
            State::Pending(_) => PromiseState::Pending,
            State::Fulfilled(_) => PromiseState::Fulfilled,
            State::Rejected(_) => PromiseState::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Create a promise and run `executor` on it right away.
    ///
    /// An `Err` from the executor rejects the promise, unless the executor
    /// already called `resolve` or `reject`.
    pub fn new<F>(scheduler: Rc<dyn Scheduler>, executor: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let promise = Self::pending(scheduler);
        let (resolve, reject) = callbacks(&promise);
        let on_error = reject.clone();
        if let Err(reason) = executor(resolve, reject) {
            trace!("executor failed");
            on_error.reject(reason);
        }
        promise
    }

    pub fn value(&self) -> Option<T> {
        match &*self.state.borrow() {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<E> {
        match &*self.state.borrow() {
            State::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    fn outcome(&self) -> Option<Result<T, E>> {
        match &*self.state.borrow() {
            State::Pending(_) => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    pub(crate) fn settle_fulfilled(&self, value: T) {
        let observers = {
            let mut state = self.state.borrow_mut();
            let observers = match &mut *state {
                State::Pending(observers) => mem::take(observers),
                _ => return,
            };
            *state = State::Fulfilled(value.clone());
            observers
        };
        trace!(observers = observers.on_fulfilled.len(), "promise fulfilled");
        for observer in observers.on_fulfilled {
            observer(value.clone());
        }
        for waker in observers.wakers {
            waker.wake();
        }
    }

    pub(crate) fn settle_rejected(&self, reason: E) {
        let observers = {
            let mut state = self.state.borrow_mut();
            let observers = match &mut *state {
                State::Pending(observers) => mem::take(observers),
                _ => return,
            };
            *state = State::Rejected(reason.clone());
            observers
        };
        trace!(observers = observers.on_rejected.len(), "promise rejected");
        for observer in observers.on_rejected {
            observer(reason.clone());
        }
        for waker in observers.wakers {
            waker.wake();
        }
    }

    /// Attach both handlers and get the promise of their result.
    ///
    /// Handlers never run inside this call, not even when the promise is
    /// already settled. Returning `Err` from a handler rejects the returned
    /// promise. Returning a promise or thenable adopts its eventual state.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        let child = Promise::pending(self.scheduler.clone());
        match self.outcome() {
            Some(Ok(value)) => {
                dispatch(self.scheduler.clone(), child.clone(), on_fulfilled)(value)
            }
            Some(Err(reason)) => {
                dispatch(self.scheduler.clone(), child.clone(), on_rejected)(reason)
            }
            None => {
                let fulfilled = dispatch(self.scheduler.clone(), child.clone(), on_fulfilled);
                let rejected = dispatch(self.scheduler.clone(), child.clone(), on_rejected);
                if let State::Pending(observers) = &mut *self.state.borrow_mut() {
                    observers.on_fulfilled.push(fulfilled);
                    observers.on_rejected.push(rejected);
                }
            }
        }
        child
    }

    /// `then` with only a fulfillment handler. Rejections pass through.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.then(on_fulfilled, |reason| Err(reason))
    }

    /// `then` with only a rejection handler. Values pass through.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.then(|value| Ok(Resolution::Value(value)), on_rejected)
    }

    /// Same as [`Promise::and_then`].
    ///
    /// This is not a real `finally`: `on_settled` only runs when the promise
    /// fulfills, receives the value, and its result replaces that value.
    pub fn finally<U, F>(&self, on_settled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.and_then(on_settled)
    }
}

/// Wrap `handler` so that calling the result only schedules it, then feeds
/// its outcome into `child`.
fn dispatch<A, U, E, H>(scheduler: Rc<dyn Scheduler>, child: Promise<U, E>, handler: H) -> Observer<A>
where
    A: 'static,
    U: Clone + 'static,
    E: Clone + From<Error> + 'static,
    H: FnOnce(A) -> Result<Resolution<U, E>, E> + 'static,
{
    Box::new(move |input| {
        scheduler.schedule(Box::new(move || match handler(input) {
            Ok(x) => resolve_promise(&child, x),
            Err(reason) => child.settle_rejected(reason),
        }))
    })
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            State::Pending(observers) => {
                if !observers.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    observers.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            State::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(reason) => Poll::Ready(Err(reason.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Promise, PromiseState};
    use crate::{deferred, Error, Resolution, TaskQueue};
    use std::{cell::RefCell, rc::Rc};

    fn queue() -> Rc<TaskQueue> {
        Rc::new(TaskQueue::new())
    }

    #[test]
    fn test_executor_runs_synchronously() {
        let q = queue();
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let promise: Promise<i32> = Promise::new(q.clone(), move |_, _| {
            *flag.borrow_mut() = true;
            Ok(())
        });
        assert!(*ran.borrow());
        assert!(promise.is_pending());
        assert!(q.is_empty());
    }

    #[test]
    fn test_executor_error_rejects() {
        let q = queue();
        let promise: Promise<i32> = Promise::new(q, |_, _| Err(Error::from("boom")));
        assert_eq!(promise.state(), PromiseState::Rejected);
        assert_eq!(promise.reason(), Some(Error::from("boom")));
    }

    #[test]
    fn test_executor_error_after_resolve_is_ignored() {
        let q = queue();
        let promise: Promise<i32> = Promise::new(q, |resolve, _| {
            resolve.resolve(1);
            Err(Error::from("late"))
        });
        assert_eq!(promise.value(), Some(1));
    }

    #[test]
    fn test_settles_once() {
        let q = queue();
        let d = deferred::<i32, Error>(q);
        d.resolve.resolve(1);
        d.resolve.resolve(2);
        d.reject.reject("nope");
        assert_eq!(d.promise.value(), Some(1));
        assert_eq!(d.promise.reason(), None);
    }

    #[test]
    fn test_reject_then_resolve_keeps_reason() {
        let q = queue();
        let d = deferred::<i32, Error>(q);
        d.reject.reject("first");
        d.reject.reject("second");
        d.resolve.resolve(3);
        assert_eq!(d.promise.state(), PromiseState::Rejected);
        assert_eq!(d.promise.reason(), Some(Error::from("first")));
    }

    #[test]
    fn test_then_on_settled_is_async() {
        let q = queue();
        let promise = Promise::<i32>::resolve(q.clone(), 1);
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        promise.and_then(move |v| {
            *s.borrow_mut() = Some(v);
            Ok(Resolution::Value(()))
        });
        assert_eq!(*seen.borrow(), None);
        q.run_until_idle();
        assert_eq!(*seen.borrow(), Some(1));
    }

    #[test]
    fn test_then_on_rejected_is_async() {
        let q = queue();
        let promise = Promise::<i32>::reject(q.clone(), "e");
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        promise.catch(move |r| {
            *s.borrow_mut() = Some(r);
            Ok(Resolution::Value(0))
        });
        assert_eq!(*seen.borrow(), None);
        q.run_until_idle();
        assert_eq!(*seen.borrow(), Some(Error::from("e")));
    }

    #[test]
    fn test_settling_only_schedules_observers() {
        let q = queue();
        let d = deferred::<i32, Error>(q.clone());
        let seen = Rc::new(RefCell::new(vec![]));
        let s = seen.clone();
        d.promise.and_then(move |v| {
            s.borrow_mut().push(v);
            Ok(Resolution::Value(()))
        });
        d.resolve.resolve(9);
        assert!(seen.borrow().is_empty());
        assert_eq!(q.len(), 1);
        q.run_until_idle();
        assert_eq!(*seen.borrow(), vec![9]);
    }

    fn record(log: &Rc<RefCell<Vec<i32>>>, promise: &Promise<i32>, tag: i32) {
        let (on_ok, on_err) = (log.clone(), log.clone());
        promise.then(
            move |v| {
                on_ok.borrow_mut().push(tag * 10 + v);
                Ok(Resolution::Value(()))
            },
            move |_| {
                on_err.borrow_mut().push(-tag);
                Ok(Resolution::Value(()))
            },
        );
    }

    #[test]
    fn test_pending_observers_fire_in_registration_order() {
        let q = queue();
        let log = Rc::new(RefCell::new(vec![]));
        let d = deferred::<i32, Error>(q.clone());
        for tag in 1..=3 {
            record(&log, &d.promise, tag);
        }
        d.resolve.resolve(1);
        q.run_until_idle();
        assert_eq!(*log.borrow(), vec![11, 21, 31]);

        log.borrow_mut().clear();
        let d = deferred::<i32, Error>(q.clone());
        for tag in 1..=3 {
            record(&log, &d.promise, tag);
        }
        d.reject.reject("x");
        q.run_until_idle();
        assert_eq!(*log.borrow(), vec![-1, -2, -3]);
    }

    #[test]
    fn test_settled_observers_fire_in_registration_order() {
        let q = queue();
        let log = Rc::new(RefCell::new(vec![]));
        let promise = Promise::<i32>::resolve(q.clone(), 2);
        for tag in 1..=3 {
            record(&log, &promise, tag);
        }
        assert!(log.borrow().is_empty());
        q.run_until_idle();
        assert_eq!(*log.borrow(), vec![12, 22, 32]);
    }

    #[test]
    fn test_first_resolve_locks_in_pending_promise() {
        let q = queue();
        let inner = deferred::<i32, Error>(q.clone());
        let adopted = inner.promise.clone();
        let promise: Promise<i32> = Promise::new(q.clone(), move |resolve, reject| {
            resolve.resolve(adopted);
            resolve.resolve(99);
            reject.reject("late");
            Ok(())
        });
        q.run_until_idle();
        assert!(promise.is_pending());
        inner.resolve.resolve(1);
        q.run_until_idle();
        assert_eq!(promise.value(), Some(1));
    }

    #[test]
    fn test_executor_error_after_pending_resolve_is_ignored() {
        let q = queue();
        let inner = deferred::<i32, Error>(q.clone());
        let adopted = inner.promise.clone();
        let promise: Promise<i32> = Promise::new(q.clone(), move |resolve, _| {
            resolve.resolve(adopted);
            Err(Error::from("boom"))
        });
        assert!(promise.is_pending());
        inner.reject.reject("inner");
        q.run_until_idle();
        assert_eq!(promise.reason(), Some(Error::from("inner")));
    }

    #[test]
    fn test_default_handlers_pass_through() {
        let q = queue();
        let fulfilled = Promise::<i32>::resolve(q.clone(), 4).catch(|_| Ok(Resolution::Value(0)));
        let rejected = Promise::<i32>::reject(q.clone(), "r").and_then(|v| Ok(Resolution::Value(v * 2)));
        q.run_until_idle();
        assert_eq!(fulfilled.value(), Some(4));
        assert_eq!(rejected.reason(), Some(Error::from("r")));
    }

    #[test]
    fn test_handler_error_rejects_child() {
        let q = queue();
        let child = Promise::<i32>::resolve(q.clone(), 1)
            .and_then(|_| Err::<Resolution<i32>, _>(Error::from("handler")));
        q.run_until_idle();
        assert_eq!(child.reason(), Some(Error::from("handler")));
    }

    #[test]
    fn test_finally_only_runs_on_fulfillment() {
        let q = queue();
        let ran = Rc::new(RefCell::new(0));
        let r = ran.clone();
        let on_ok = Promise::<i32>::resolve(q.clone(), 2).finally(move |v| {
            *r.borrow_mut() += 1;
            Ok(Resolution::Value(v + 40))
        });
        let r = ran.clone();
        let on_err = Promise::<i32>::reject(q.clone(), "e").finally(move |v| {
            *r.borrow_mut() += 1;
            Ok(Resolution::Value(v))
        });
        q.run_until_idle();
        assert_eq!(*ran.borrow(), 1);
        assert_eq!(on_ok.value(), Some(42));
        assert_eq!(on_err.reason(), Some(Error::from("e")));
    }

    #[test]
    fn test_resolving_child_with_itself_is_a_cycle() {
        let q = queue();
        let slot: Rc<RefCell<Option<Promise<i32>>>> = Rc::new(RefCell::new(None));
        let s = slot.clone();
        let child = Promise::<i32>::resolve(q.clone(), 1).and_then(move |_| {
            match s.borrow().clone() {
                Some(me) => Ok(Resolution::Promise(me)),
                None => Err(Error::from("slot empty")),
            }
        });
        *slot.borrow_mut() = Some(child.clone());
        q.run_until_idle();
        assert_eq!(child.reason(), Some(Error::ChainingCycle));
    }

    #[test]
    fn test_await_settled_promise() {
        let q = queue();
        let promise = Promise::<i32>::resolve(q, 11);
        assert_eq!(futures::executor::block_on(promise), Ok(11));
    }

    #[test]
    fn test_run_until_wakes_pending_promise() {
        let q = queue();
        let chained = Promise::<i32>::resolve(q.clone(), 1).and_then(|v| Ok(Resolution::Value(v + 1)));
        assert_eq!(q.run_until(chained), Some(Ok(2)));
    }

    #[test]
    fn test_run_until_never_settling() {
        let q = queue();
        let d = deferred::<i32, Error>(q.clone());
        assert_eq!(q.run_until(d.promise.clone()), None);
        assert!(d.promise.is_pending());
    }

    #[test]
    fn test_debug_shows_state() {
        let q = queue();
        let promise = Promise::<i32>::resolve(q, 1);
        assert_eq!(format!("{promise:?}"), "Promise { state: Fulfilled }");
    }
}
