//! Implementation of the thread pool itself.

use std::{
    collections::TryReserveError,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;

use crate::{
    error::{CreateError, InvalidArgumentError, ShutdownTimeoutError, SubmitError},
    pause::PauseToken,
    queue::{Job, JobQueue, Outcome},
    task::Task,
    worker::Worker,
};

#[cfg(target_has_atomic = "64")]
type AtomicCounter = std::sync::atomic::AtomicU64;

#[cfg(not(target_has_atomic = "64"))]
type AtomicCounter = std::sync::atomic::AtomicU32;

/// How often shutdown re-signals the queue and checks on remaining workers
/// during its polite phase.
const GRACE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How often shutdown checks on remaining workers once it has outlasted its
/// grace period.
const FORCED_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A value describing the number of worker threads in a thread pool.
///
/// Any size can be wrapped in [`PerCore`] to be made relative to the number of
/// available CPU cores on the current system.
///
/// See [`Builder::size`] for details.
pub trait PoolSize {
    /// Get the number of threads to be in the thread pool.
    fn threads(&self) -> usize;
}

impl PoolSize for usize {
    fn threads(&self) -> usize {
        *self
    }
}

/// Modifies a pool size to be per available CPU core.
///
/// # Examples
///
/// ```
/// # use fixedpool::PerCore;
/// // one thread per core
/// let size = PerCore(1);
///
/// // four threads per core
/// let size = PerCore(4);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct PerCore<T>(pub T);

static CORE_COUNT: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

impl<T> From<T> for PerCore<T> {
    fn from(size: T) -> Self {
        Self(size)
    }
}

impl<T: PoolSize> PoolSize for PerCore<T> {
    fn threads(&self) -> usize {
        *CORE_COUNT * self.0.threads()
    }
}

/// A builder for constructing a customized [`ThreadPool`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// let custom_pool = fixedpool::ThreadPool::builder()
///     .name("my-pool")
///     .size(2)
///     .shutdown_grace(Duration::from_millis(200))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct Builder {
    name: Option<String>,
    size: Option<usize>,
    stack_size: Option<usize>,
    startup_timeout: Duration,
    shutdown_grace: Duration,
    pause_token: Option<PauseToken>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            name: None,
            size: None,
            stack_size: None,
            startup_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(1),
            pause_token: None,
        }
    }
}

impl Builder {
    /// Set a name prefix for threads spawned by this thread pool.
    ///
    /// Each worker thread is named `"{prefix}-{id}"`. If not set, the prefix
    /// is `thread-pool`. A name containing null bytes (`\0`) is rejected by
    /// [`build`](Builder::build).
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = fixedpool::ThreadPool::builder().name("my-pool").build().unwrap();
    /// ```
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the number of threads to be managed by this thread pool.
    ///
    /// All threads are spawned when the pool is built and live until it is
    /// shut down. If not set, the pool gets one thread per CPU core on the
    /// current system. A size of zero is rejected by
    /// [`build`](Builder::build).
    ///
    /// # Examples
    ///
    /// ```
    /// // Create a thread pool with exactly 2 threads.
    /// let pool = fixedpool::ThreadPool::builder().size(2).build().unwrap();
    /// assert_eq!(pool.threads(), 2);
    /// ```
    ///
    /// ```
    /// use fixedpool::PerCore;
    ///
    /// // Create a thread pool with two threads per core.
    /// let pool = fixedpool::ThreadPool::builder().size(PerCore(2)).build().unwrap();
    /// ```
    pub fn size<S: PoolSize>(mut self, size: S) -> Self {
        self.size = Some(size.threads());
        self
    }

    /// Set the size of the stack (in bytes) for threads in this thread pool.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// enforces a larger minimum stack size.
    ///
    /// The stack size if not specified will be the default size for new Rust
    /// threads, currently 2 MiB. This can also be overridden by setting the
    /// `RUST_MIN_STACK` environment variable if not specified in code.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Set how long to wait for every worker thread to report itself alive
    /// before giving up on building the pool.
    ///
    /// Defaults to 5 seconds.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set how long shutdown keeps rapidly waking idle workers before falling
    /// back to a slower poll.
    ///
    /// This is also the longest a dropped pool will block waiting for its
    /// workers before detaching them. Defaults to 1 second.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Share pause state with other pools built with a clone of the same
    /// token.
    ///
    /// If not set, the pool gets a token of its own.
    pub fn pause_token(mut self, token: PauseToken) -> Self {
        self.pause_token = Some(token);
        self
    }

    /// Create a thread pool according to the configuration set with this
    /// builder.
    ///
    /// Blocks until every worker thread is running. On failure, any worker
    /// threads that did start are shut down before the error is returned.
    pub fn build(self) -> Result<ThreadPool, CreateError> {
        let size = self.size.unwrap_or_else(|| PerCore(1).threads());

        if size == 0 {
            return Err(InvalidArgumentError::new("thread pool size must be non-zero").into());
        }

        let name = self.name.unwrap_or_else(|| String::from("thread-pool"));

        if name.as_bytes().contains(&0) {
            return Err(
                InvalidArgumentError::new("thread pool name must not contain null bytes").into(),
            );
        }

        let mut workers = Vec::new();
        workers
            .try_reserve_exact(size)
            .map_err(CreateError::Allocation)?;

        let shared = Shared::new(size, self.pause_token.unwrap_or_default())
            .map_err(CreateError::Allocation)?;

        let mut pool = ThreadPool {
            size,
            shutdown_grace: self.shutdown_grace,
            workers,
            shared: Arc::new(shared),
        };

        for id in 0..size {
            let mut builder = thread::Builder::new().name(format!("{}-{}", name, id));

            if let Some(size) = self.stack_size {
                builder = builder.stack_size(size);
            }

            let worker = Worker::new(id, pool.shared.clone());

            match builder.spawn(move || worker.run()) {
                Ok(thread) => pool.workers.push(WorkerHandle { id, thread }),
                Err(source) => {
                    log::debug!("failed to spawn worker {}: {}", id, source);
                    pool.abort_startup();
                    return Err(CreateError::ThreadCreation { worker: id, source });
                }
            }
        }

        let alive = pool
            .shared
            .wait_for_alive(size, Instant::now().checked_add(self.startup_timeout));

        if alive < size {
            log::debug!("only {} of {} workers started in time", alive, size);
            pool.abort_startup();
            return Err(CreateError::PartialStartup {
                alive,
                requested: size,
            });
        }

        log::debug!("thread pool {} started with {} workers", name, size);

        Ok(pool)
    }
}

/// A fixed-size pool of worker threads running submitted jobs.
///
/// Every worker thread is spawned when the pool is created and lives until the
/// pool is shut down. Submitted jobs wait in a single FIFO queue and are run
/// by whichever worker becomes free first, so jobs submitted from one thread
/// start in submission order.
///
/// # Shutting down
///
/// [`shutdown`](ThreadPool::shutdown) stops every worker and blocks until they
/// have exited. Workers finish the job they are running, but jobs still in the
/// queue are discarded without being run. Dropping the pool without shutting
/// it down does the same, but gives up waiting after the configured
/// [shutdown grace period](Builder::shutdown_grace) and detaches any worker
/// still busy.
///
/// # Monitoring
///
/// Each pool instance provides methods for gathering various statistics on
/// the pool's usage, such as the number of jobs running or queued. While these
/// methods provide the most up-to-date numbers upon invocation, they should
/// not be used for controlling program behavior since they can become
/// immediately outdated due to the live nature of the pool.
pub struct ThreadPool {
    size: usize,
    shutdown_grace: Duration,
    workers: Vec<WorkerHandle>,
    shared: Arc<Shared>,
}

struct WorkerHandle {
    id: usize,
    thread: JoinHandle<()>,
}

impl ThreadPool {
    /// Create a new thread pool with exactly `size` worker threads and
    /// otherwise default configuration.
    ///
    /// If you'd like to customize the thread pool's behavior then use
    /// [`ThreadPool::builder`].
    ///
    /// # Examples
    ///
    /// ```
    /// use fixedpool::{CreateError, ThreadPool};
    ///
    /// let pool = ThreadPool::new(4).unwrap();
    /// assert_eq!(pool.threads(), 4);
    ///
    /// assert!(matches!(ThreadPool::new(0), Err(CreateError::InvalidArgument(_))));
    /// ```
    #[inline]
    pub fn new(size: usize) -> Result<Self, CreateError> {
        Self::builder().size(size).build()
    }

    /// Get a builder for creating a customized thread pool.
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Get the number of worker threads the pool was created with.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the number of worker threads currently alive.
    pub fn threads(&self) -> usize {
        self.shared.lock_counters().alive
    }

    /// Get the number of workers currently running a job.
    ///
    /// Note that the number returned may become immediately outdated after
    /// invocation.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{thread::sleep, time::Duration};
    ///
    /// let pool = fixedpool::ThreadPool::new(2).unwrap();
    ///
    /// // Nothing is running yet.
    /// assert_eq!(pool.busy_count(), 0);
    ///
    /// // Start a slow job.
    /// pool.submit(|| sleep(Duration::from_millis(100))).unwrap();
    ///
    /// // Wait a little for the job to start.
    /// sleep(Duration::from_millis(20));
    /// assert_eq!(pool.busy_count(), 1);
    ///
    /// pool.wait();
    /// assert_eq!(pool.busy_count(), 0);
    /// ```
    pub fn busy_count(&self) -> usize {
        self.shared.lock_counters().working
    }

    /// Get the number of jobs queued for execution, but not yet started.
    ///
    /// Note that the number returned may become immediately outdated after
    /// invocation.
    #[inline]
    pub fn queued_jobs(&self) -> usize {
        self.shared.queue.len()
    }

    /// Get the number of jobs completed (successfully or otherwise) by this
    /// pool since it was created.
    ///
    /// Note that the number returned may become immediately outdated after
    /// invocation.
    #[inline]
    #[allow(clippy::useless_conversion)]
    pub fn completed_jobs(&self) -> u64 {
        self.shared.completed_jobs_count.load(Ordering::Relaxed).into()
    }

    /// Get the number of jobs that have panicked since the pool was created.
    ///
    /// Note that the number returned may become immediately outdated after
    /// invocation.
    #[inline]
    #[allow(clippy::useless_conversion)]
    pub fn panicked_jobs(&self) -> u64 {
        self.shared.panicked_jobs_count.load(Ordering::Relaxed).into()
    }

    /// Submit a closure to be run by the thread pool, without waiting for or
    /// collecting its result.
    ///
    /// Returns immediately. The closure runs on some worker thread at some
    /// point after this call. If it panics, the panic is caught and counted in
    /// [`panicked_jobs`](ThreadPool::panicked_jobs), and the worker carries on.
    ///
    /// Returns an error holding the closure if the job queue could not grow to
    /// hold it.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::{
    ///     atomic::{AtomicUsize, Ordering},
    ///     Arc,
    /// };
    ///
    /// let pool = fixedpool::ThreadPool::new(4).unwrap();
    /// let counter = Arc::new(AtomicUsize::new(0));
    ///
    /// for _ in 0..10 {
    ///     let counter = counter.clone();
    ///     pool.submit(move || {
    ///         counter.fetch_add(1, Ordering::SeqCst);
    ///     })
    ///     .unwrap();
    /// }
    ///
    /// pool.wait();
    /// assert_eq!(counter.load(Ordering::SeqCst), 10);
    /// ```
    pub fn submit<F>(&self, closure: F) -> Result<(), SubmitError<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(closure, Job::detached).map_err(SubmitError)
    }

    /// Submit a closure to be run by the thread pool, returning a [`Task`]
    /// that receives its result.
    ///
    /// Returns an error holding the closure if the job queue could not grow to
    /// hold it.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = fixedpool::ThreadPool::new(2).unwrap();
    /// let task = pool.execute(|| {
    ///     2 + 2 // some expensive computation
    /// }).unwrap();
    ///
    /// // do something in the meantime
    ///
    /// // now wait for the result
    /// let sum = task.join();
    /// assert_eq!(sum, 4);
    /// ```
    pub fn execute<T, F>(&self, closure: F) -> Result<Task<T>, SubmitError<F>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (task, completer) = Task::new();

        self.push(closure, move |closure| {
            Job::new(move || completer.complete(closure))
        })
        .map(|()| task)
        .map_err(SubmitError)
    }

    fn push<T, F>(&self, value: T, into_job: F) -> Result<(), T>
    where
        F: FnOnce(T) -> Job,
    {
        // Counted before the job becomes visible to workers, so a fast worker
        // cannot finish it first.
        self.shared.job_submitted();

        self.shared.queue.push(value, into_job).map_err(|value| {
            self.shared.jobs_withdrawn(1);
            value
        })
    }

    /// Block until the pool is quiescent: the queue is empty and no worker is
    /// running a job.
    ///
    /// Jobs submitted by other threads while waiting extend the wait. If the
    /// pool is paused with jobs still queued, this blocks until it is resumed.
    pub fn wait(&self) {
        self.shared.wait_idle(None);
    }

    /// Block until the pool is quiescent or the given timeout passes.
    ///
    /// Returns `true` if the pool became quiescent before the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.shared.wait_idle(Instant::now().checked_add(timeout))
    }

    /// Stop workers from starting new jobs.
    ///
    /// Returns without waiting for anything. Jobs already running finish
    /// normally, and jobs still in the queue stay there until
    /// [`resume`](ThreadPool::resume) is called. If the pool shares a
    /// [`PauseToken`] with other pools, they are paused too.
    pub fn pause(&self) {
        log::debug!("pausing thread pool");
        self.shared.pause.pause();
    }

    /// Let workers start new jobs again after a [`pause`](ThreadPool::pause).
    ///
    /// If the pool shares a [`PauseToken`] with other pools, they are resumed
    /// too.
    pub fn resume(&self) {
        log::debug!("resuming thread pool");
        self.shared.pause.resume();
    }

    /// Check whether the pool is currently paused.
    pub fn is_paused(&self) -> bool {
        self.shared.pause.is_paused()
    }

    /// Shut down this thread pool and block until every worker thread has
    /// exited.
    ///
    /// Jobs already running are allowed to finish. Jobs still queued are
    /// discarded without being run. A job that never returns blocks this call
    /// forever, use [`shutdown_timeout`](ThreadPool::shutdown_timeout) to bound
    /// the wait instead.
    pub fn shutdown(mut self) {
        // Cannot time out without a deadline.
        let _ = self.shutdown_internal(None);
    }

    /// Shut down this thread pool and block until every worker thread has
    /// exited, or until the given timeout passes.
    ///
    /// On timeout, the returned error lists the workers that were still busy.
    /// Their threads are detached and exit once their current job returns.
    pub fn shutdown_timeout(self, timeout: Duration) -> Result<(), ShutdownTimeoutError> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.shutdown_deadline(deadline),
            None => {
                self.shutdown();
                Ok(())
            }
        }
    }

    /// Shut down this thread pool and block until every worker thread has
    /// exited, or the given deadline passes.
    ///
    /// On timeout, the returned error lists the workers that were still busy.
    pub fn shutdown_deadline(mut self, deadline: Instant) -> Result<(), ShutdownTimeoutError> {
        self.shutdown_internal(Some(deadline))
    }

    fn shutdown_internal(&mut self, deadline: Option<Instant>) -> Result<(), ShutdownTimeoutError> {
        if !self.shared.keep_alive.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        log::debug!("shutting down thread pool with {} workers", self.size);

        // Release idle workers for good, along with any held by a pause.
        self.shared.queue.close();
        self.shared.pause.interrupt();

        let grace_end = Instant::now().checked_add(self.shutdown_grace);
        let mut escalated = false;
        let mut counters = self.shared.lock_counters();

        while counters.alive > 0 {
            let now = Instant::now();
            let polite = grace_end.map_or(true, |end| now < end);

            if !polite && !escalated {
                escalated = true;
                log::warn!(
                    "{} workers still running after shutdown grace period",
                    counters.alive
                );
            }

            let mut timeout = if polite {
                GRACE_POLL_INTERVAL
            } else {
                FORCED_POLL_INTERVAL
            };

            if let Some(deadline) = deadline {
                match deadline.checked_duration_since(now) {
                    Some(remaining) if remaining > Duration::ZERO => {
                        timeout = timeout.min(remaining);
                    }
                    _ => {
                        drop(counters);
                        return Err(self.abandon_workers());
                    }
                }
            }

            drop(counters);
            self.shared.queue.signal().post_all();
            counters = self.shared.lock_counters();

            if counters.alive > 0 {
                counters = self
                    .shared
                    .counters_changed
                    .wait_timeout(counters, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }

        drop(counters);

        for worker in self.workers.drain(..) {
            if worker.thread.join().is_err() {
                log::warn!("worker {} panicked", worker.id);
            }
        }

        self.discard_queued();

        log::debug!("thread pool shut down");

        Ok(())
    }

    /// Detach every remaining worker thread, reporting those still inside a
    /// job. Idle workers were released by the closed queue and exit on their
    /// own.
    fn abandon_workers(&mut self) -> ShutdownTimeoutError {
        let busy = self.shared.lock_counters().busy.clone();

        let stuck = self
            .workers
            .drain(..)
            .filter(|worker| busy[worker.id] && !worker.thread.is_finished())
            .map(|worker| worker.id)
            .collect::<Vec<_>>();

        log::warn!(
            "thread pool shutdown timed out, detaching stuck workers {:?}",
            stuck
        );

        // Workers that are still busy will exit without pulling again.
        self.discard_queued();

        ShutdownTimeoutError::new(stuck)
    }

    fn discard_queued(&self) {
        let discarded = self.shared.queue.clear();

        if discarded > 0 {
            log::debug!("discarded {} queued jobs", discarded);
            self.shared.jobs_withdrawn(discarded);
        }
    }

    fn abort_startup(&mut self) {
        let _ = self.shutdown_internal(None);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Only the polite phase; anything still busy after that is detached.
        let deadline = Instant::now().checked_add(self.shutdown_grace);
        let _ = self.shutdown_internal(deadline);
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.size)
            .field("queued_jobs", &self.queued_jobs())
            .field("busy_count", &self.busy_count())
            .field("completed_jobs", &self.completed_jobs())
            .field("paused", &self.is_paused())
            .finish()
    }
}

/// Thread pool state shared by the owner and the worker threads.
pub(crate) struct Shared {
    pub(crate) queue: JobQueue,
    pub(crate) pause: PauseToken,
    keep_alive: AtomicBool,
    counters: Mutex<Counters>,
    counters_changed: Condvar,
    completed_jobs_count: AtomicCounter,
    panicked_jobs_count: AtomicCounter,
}

/// Counts guarded by a single lock.
///
/// Always `working <= alive <= size`, and `working` is the number of `true`
/// entries in `busy`, indexed by worker id. `outstanding` counts jobs that
/// have been submitted but have not finished, whether queued or running, and
/// is zero exactly when the pool is quiescent.
#[derive(Default)]
struct Counters {
    alive: usize,
    working: usize,
    outstanding: usize,
    busy: Vec<bool>,
}

impl Shared {
    fn new(size: usize, pause: PauseToken) -> Result<Self, TryReserveError> {
        let mut busy = Vec::new();
        busy.try_reserve_exact(size)?;
        busy.resize(size, false);

        Ok(Self {
            queue: JobQueue::new(),
            pause,
            keep_alive: AtomicBool::new(true),
            counters: Mutex::new(Counters {
                busy,
                ..Counters::default()
            }),
            counters_changed: Condvar::new(),
            completed_jobs_count: Default::default(),
            panicked_jobs_count: Default::default(),
        })
    }

    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::Acquire)
    }

    pub(crate) fn worker_started(&self) {
        self.lock_counters().alive += 1;
        self.counters_changed.notify_all();
    }

    pub(crate) fn worker_stopped(&self) {
        let mut counters = self.lock_counters();
        counters.alive = counters.alive.saturating_sub(1);
        drop(counters);

        self.counters_changed.notify_all();
    }

    /// Mark a worker as busy. Undone by either `job_finished` or
    /// `job_skipped`.
    pub(crate) fn job_started(&self, worker: usize) {
        let mut counters = self.lock_counters();
        counters.working += 1;
        counters.busy[worker] = true;
    }

    /// A worker marked busy found no job to run.
    pub(crate) fn job_skipped(&self, worker: usize) {
        let mut counters = self.lock_counters();
        counters.working -= 1;
        counters.busy[worker] = false;
    }

    pub(crate) fn job_finished(&self, worker: usize, outcome: Outcome) {
        self.completed_jobs_count.fetch_add(1, Ordering::Relaxed);

        if outcome == Outcome::Panicked {
            self.panicked_jobs_count.fetch_add(1, Ordering::Relaxed);
        }

        let mut counters = self.lock_counters();
        counters.working -= 1;
        counters.busy[worker] = false;
        counters.outstanding -= 1;

        if counters.outstanding == 0 {
            drop(counters);
            self.counters_changed.notify_all();
        }
    }

    fn job_submitted(&self) {
        self.lock_counters().outstanding += 1;
    }

    /// Forget about jobs that were counted as submitted but will never run.
    fn jobs_withdrawn(&self, count: usize) {
        let mut counters = self.lock_counters();
        counters.outstanding = counters.outstanding.saturating_sub(count);

        if counters.outstanding == 0 {
            drop(counters);
            self.counters_changed.notify_all();
        }
    }

    /// Block until at least `target` workers are alive or the deadline
    /// passes. Returns the number of workers alive.
    fn wait_for_alive(&self, target: usize, deadline: Option<Instant>) -> usize {
        let mut counters = self.lock_counters();

        while counters.alive < target {
            counters = match self.wait_until(counters, deadline) {
                Some(counters) => counters,
                None => return self.lock_counters().alive,
            };
        }

        counters.alive
    }

    /// Block until no jobs are outstanding or the deadline passes. Returns
    /// `true` if the pool became quiescent.
    fn wait_idle(&self, deadline: Option<Instant>) -> bool {
        let mut counters = self.lock_counters();

        while counters.outstanding > 0 {
            counters = match self.wait_until(counters, deadline) {
                Some(counters) => counters,
                None => return false,
            };
        }

        true
    }

    /// Wait for the counters to change, giving up at the deadline. Returns
    /// `None` once the deadline has passed.
    fn wait_until<'a>(
        &self,
        counters: MutexGuard<'a, Counters>,
        deadline: Option<Instant>,
    ) -> Option<MutexGuard<'a, Counters>> {
        match deadline {
            None => Some(
                self.counters_changed
                    .wait(counters)
                    .unwrap_or_else(PoisonError::into_inner),
            ),
            Some(deadline) => {
                let timeout = deadline
                    .checked_duration_since(Instant::now())
                    .filter(|timeout| *timeout > Duration::ZERO)?;

                Some(
                    self.counters_changed
                        .wait_timeout(counters, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0,
                )
            }
        }
    }

    fn lock_counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Poll until the condition holds, failing the test after a few seconds.
    fn eventually(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);

        while !condition() {
            assert!(Instant::now() < deadline, "condition never became true");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn timed_out_shutdown_reports_only_busy_workers() {
        let pool = ThreadPool::new(8).unwrap();
        let shared = pool.shared.clone();

        pool.submit(|| thread::sleep(Duration::from_millis(1000)))
            .unwrap();

        eventually(|| shared.queue.len() == 0 && shared.lock_counters().working == 1);

        let busy_worker = shared
            .lock_counters()
            .busy
            .iter()
            .position(|busy| *busy)
            .unwrap();

        let error = pool.shutdown_timeout(Duration::ZERO).unwrap_err();
        assert_eq!(error.stuck_workers(), &[busy_worker]);

        // Idle workers exit without waiting for the slow job.
        let start = Instant::now();
        eventually(|| shared.lock_counters().alive <= 1);
        assert!(start.elapsed() < Duration::from_millis(500));

        // The busy one follows once its job returns.
        eventually(|| shared.lock_counters().alive == 0);
        assert!(!shared.lock_counters().busy.contains(&true));
    }

    #[test]
    fn drop_with_zero_grace_leaks_no_idle_workers() {
        let pool = ThreadPool::builder()
            .size(4)
            .shutdown_grace(Duration::ZERO)
            .build()
            .unwrap();
        let shared = pool.shared.clone();

        drop(pool);

        eventually(|| shared.lock_counters().alive == 0);
    }

    #[test]
    fn spurious_wakeup_leaves_no_worker_busy() {
        let pool = ThreadPool::new(2).unwrap();
        let shared = pool.shared.clone();

        // A permit with nothing queued behind it.
        shared.queue.signal().post();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(pool.busy_count(), 0);
        assert!(!shared.lock_counters().busy.contains(&true));
        assert_eq!(pool.execute(|| 2 + 2).unwrap().join(), 4);
    }
}
