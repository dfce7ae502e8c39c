use std::{
    future::Future,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
    thread,
    time::Duration,
};

use atomic_waker::AtomicWaker;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::queue::Outcome;

const DISCARDED: &str = "job was discarded by the thread pool before it could run";

/// A handle to the result of a job submitted with
/// [`ThreadPool::execute`](crate::ThreadPool::execute).
///
/// Tasks implement [`Future`], so you can `.await` their completion
/// asynchronously. Or, you can wait for their completion synchronously using
/// the various methods provided.
///
/// Dropping a task does not cancel its job. The job still runs, and its result
/// is simply thrown away.
pub struct Task<T> {
    receiver: Receiver<thread::Result<T>>,
    state: Arc<State>,
}

/// State shared between a task and its completer.
#[derive(Default)]
struct State {
    waker: AtomicWaker,

    /// Set once the completer is gone, whether or not it delivered a result.
    settled: AtomicBool,
}

impl<T> Task<T> {
    pub(crate) fn new() -> (Self, TaskCompleter<T>) {
        let (tx, rx) = bounded(1);
        let state = Arc::new(State::default());

        let task = Task {
            receiver: rx,
            state: state.clone(),
        };

        let completer = TaskCompleter {
            sender: Some(tx),
            state,
        };

        (task, completer)
    }

    /// Check if the job has finished running, either by returning or by
    /// panicking, or was discarded by the pool without running.
    ///
    /// Once this returns `true`, [`join`](Task::join) no longer blocks.
    pub fn is_done(&self) -> bool {
        !self.receiver.is_empty() || self.state.settled.load(Ordering::Acquire)
    }

    /// Get the result of the job without blocking, if it has finished.
    ///
    /// # Panics
    ///
    /// Panics if the pool discarded the job during shutdown.
    pub fn try_get(&mut self) -> Option<thread::Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!("{}", DISCARDED),
        }
    }

    /// Block the current thread until the job completes.
    ///
    /// # Panics
    ///
    /// If the job panicked, the panic will propagate to this call. Also panics
    /// if the pool discarded the job during shutdown.
    pub fn join(self) -> T {
        match self.receiver.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => resume_unwind(e),
            Err(_) => panic!("{}", DISCARDED),
        }
    }

    /// Block the current thread until the job completes or a timeout is
    /// reached. On timeout the task is handed back.
    ///
    /// # Panics
    ///
    /// If the job panicked, the panic will propagate to this call. Also panics
    /// if the pool discarded the job during shutdown.
    pub fn join_timeout(self, timeout: Duration) -> Result<T, Self> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => resume_unwind(e),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => panic!("{}", DISCARDED),
        }
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.state.waker.register(cx.waker());

        match self.receiver.try_recv() {
            Ok(Ok(value)) => Poll::Ready(value),
            Ok(Err(e)) => resume_unwind(e),
            Err(TryRecvError::Empty) => Poll::Pending,
            Err(TryRecvError::Disconnected) => panic!("{}", DISCARDED),
        }
    }
}

/// The sending half of a [`Task`], carried inside the job.
pub(crate) struct TaskCompleter<T> {
    sender: Option<Sender<thread::Result<T>>>,
    state: Arc<State>,
}

impl<T> TaskCompleter<T> {
    /// Run the closure and deliver its result to the task.
    pub(crate) fn complete<F>(mut self, f: F) -> Outcome
    where
        F: FnOnce() -> T,
    {
        let result = catch_unwind(AssertUnwindSafe(f));

        let outcome = match result {
            Ok(_) => Outcome::Completed,
            Err(_) => Outcome::Panicked,
        };

        if let Some(sender) = self.sender.take() {
            if sender.send(result).is_err() {
                log::trace!("task dropped before its job completed, discarding result");
            }
        }

        outcome
    }
}

impl<T> Drop for TaskCompleter<T> {
    fn drop(&mut self) {
        // Disconnect before waking, so a discarded job is visible to the
        // poller.
        drop(self.sender.take());
        self.state.settled.store(true, Ordering::Release);
        self.state.waker.wake();
    }
}
