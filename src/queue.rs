//! The job queue shared by all workers in a pool.

use std::{
    collections::VecDeque,
    fmt,
    mem,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::signal::Signal;

/// How a job finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Panicked,
}

/// A unit of submitted work, executed at most once by exactly one worker.
pub(crate) struct Job {
    body: Box<dyn FnOnce() -> Outcome + Send + 'static>,
}

impl Job {
    /// Create a job from a closure whose result nobody is waiting on.
    pub(crate) fn detached<F>(closure: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(move || match catch_unwind(AssertUnwindSafe(closure)) {
            Ok(()) => Outcome::Completed,
            Err(_) => Outcome::Panicked,
        })
    }

    /// Create a job from a body that reports its own outcome. The body must
    /// not unwind.
    pub(crate) fn new<F>(body: F) -> Self
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        Self {
            body: Box::new(body),
        }
    }

    pub(crate) fn run(self) -> Outcome {
        (self.body)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Job(..)")
    }
}

/// An unbounded FIFO of pending jobs, paired with a [`Signal`] that is
/// available whenever at least one job may be waiting.
///
/// When both locks are needed the queue mutex is always taken first and the
/// signal's mutex second.
pub(crate) struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    has_jobs: Signal,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            has_jobs: Signal::empty(),
        }
    }

    /// Append a job to the tail of the queue and post the signal.
    ///
    /// The job is only built from `value` once space for it has been
    /// reserved. If the queue cannot grow, `value` is handed back untouched.
    pub(crate) fn push<T, F>(&self, value: T, into_job: F) -> Result<(), T>
    where
        F: FnOnce(T) -> Job,
    {
        let mut jobs = self.lock();

        if jobs.try_reserve(1).is_err() {
            return Err(value);
        }

        jobs.push_back(into_job(value));
        self.has_jobs.post();

        Ok(())
    }

    /// Remove and return the job at the head of the queue, if any.
    ///
    /// The signal only represents "at least one job", so if work remains
    /// after this pull the wakeup is handed on to the next idle worker. A
    /// closed queue never hands out another job.
    pub(crate) fn pull(&self) -> Option<Job> {
        let mut jobs = self.lock();

        if self.has_jobs.is_closed() {
            return None;
        }

        let job = jobs.pop_front();

        if !jobs.is_empty() {
            self.has_jobs.post();
        }

        job
    }

    /// Stop handing out jobs and release every worker waiting on the signal.
    ///
    /// Jobs still queued stay there until [`clear`](JobQueue::clear) is
    /// called.
    pub(crate) fn close(&self) {
        let _jobs = self.lock();
        self.has_jobs.close();
    }

    /// Discard every pending job and reset the signal. Returns the number of
    /// jobs discarded. A closed queue stays closed.
    pub(crate) fn clear(&self) -> usize {
        let discarded = {
            let mut jobs = self.lock();
            self.has_jobs.reset();
            mem::take(&mut *jobs)
        };

        // Dropping a job may run arbitrary destructors, so do it unlocked.
        let count = discarded.len();
        drop(discarded);
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn signal(&self) -> &Signal {
        &self.has_jobs
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
