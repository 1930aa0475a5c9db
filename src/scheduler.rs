//! The deferred-execution capability every promise runs its handlers on.
//!
//! A [`Scheduler`] only has to enqueue; it must never run the task inline.
//! [`TaskQueue`] is the single-threaded FIFO implementation. It is driven
//! explicitly, either one task at a time with [`TaskQueue::run_next`] or to
//! completion with [`TaskQueue::run_until_idle`].
use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    pin::pin,
    task::{Context, Poll},
};
use tracing::trace;

/// A zero-argument unit of work.
pub type Task = Box<dyn FnOnce() + 'static>;

pub trait Scheduler {
    /// Queue `task` to run after the current synchronous execution completes.
    fn schedule(&self, task: Task);
}

/// FIFO cooperative task queue.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Scheduler, TaskQueue};
/// use std::{cell::Cell, rc::Rc};
///
/// let queue = TaskQueue::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = ran.clone();
/// queue.schedule(Box::new(move || flag.set(true)));
/// assert!(!ran.get());
/// assert_eq!(queue.run_until_idle(), 1);
/// assert!(ran.get());
/// ```
#[derive(Default)]
pub struct TaskQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the oldest queued task. Returns `false` when the queue was empty.
    pub fn run_next(&self) -> bool {
        // The borrow must end before the task runs, tasks schedule more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until none are left, including ones queued along the way.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        trace!(ran, "task queue idle");
        ran
    }

    /// Drive the queue until `future` completes.
    ///
    /// The future is polled before each task. `None` means the queue ran dry
    /// while the future was still pending.
    pub fn run_until<F: Future>(&self, future: F) -> Option<F::Output> {
        let mut future = pin!(future);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Some(output);
            }
            if !self.run_next() {
                trace!("task queue idle with a pending future");
                return None;
            }
        }
    }
}

impl Scheduler for TaskQueue {
    fn schedule(&self, task: Task) {
        let mut tasks = self.tasks.borrow_mut();
        tasks.push_back(task);
        trace!(queued = tasks.len(), "task scheduled");
    }
}
