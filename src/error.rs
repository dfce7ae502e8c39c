use std::{collections::TryReserveError, error::Error, fmt, io};

/// An error returned when a value passed to a constructor is malformed.
///
/// Malformed arguments are rejected before any state is created.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InvalidArgumentError {
    reason: &'static str,
}

impl InvalidArgumentError {
    pub(crate) fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    /// Get a short description of why the argument was rejected.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

impl Error for InvalidArgumentError {}

impl fmt::Debug for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InvalidArgumentError")
            .field(&self.reason)
            .finish()
    }
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid argument: {}", self.reason)
    }
}

/// An error returned when a thread pool could not be created.
///
/// No partially started pool is ever handed back. By the time this error is
/// returned, every worker thread that did start has been shut down again.
#[non_exhaustive]
pub enum CreateError {
    /// The pool configuration was malformed, such as a size of zero.
    InvalidArgument(InvalidArgumentError),

    /// Memory for the pool's internal structures could not be reserved.
    Allocation(TryReserveError),

    /// The operating system refused to spawn a worker thread.
    ThreadCreation {
        /// Id of the worker that could not be spawned.
        worker: usize,
        /// The underlying spawn error.
        source: io::Error,
    },

    /// Not every worker reported itself alive before the startup timeout.
    PartialStartup {
        /// Number of workers that did report alive.
        alive: usize,
        /// Number of workers the pool was configured with.
        requested: usize,
    },
}

impl From<InvalidArgumentError> for CreateError {
    fn from(error: InvalidArgumentError) -> Self {
        CreateError::InvalidArgument(error)
    }
}

impl Error for CreateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CreateError::InvalidArgument(e) => Some(e),
            CreateError::Allocation(e) => Some(e),
            CreateError::ThreadCreation { source, .. } => Some(source),
            CreateError::PartialStartup { .. } => None,
        }
    }
}

impl fmt::Debug for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::InvalidArgument(e) => f.debug_tuple("InvalidArgument").field(e).finish(),
            CreateError::Allocation(e) => f.debug_tuple("Allocation").field(e).finish(),
            CreateError::ThreadCreation { worker, source } => f
                .debug_struct("ThreadCreation")
                .field("worker", worker)
                .field("source", source)
                .finish(),
            CreateError::PartialStartup { alive, requested } => f
                .debug_struct("PartialStartup")
                .field("alive", alive)
                .field("requested", requested)
                .finish(),
        }
    }
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::InvalidArgument(e) => fmt::Display::fmt(e, f),
            CreateError::Allocation(_) => f.write_str("failed to allocate thread pool"),
            CreateError::ThreadCreation { worker, source } => {
                write!(f, "failed to spawn worker thread {}: {}", worker, source)
            }
            CreateError::PartialStartup { alive, requested } => write!(
                f,
                "only {} of {} worker threads started before the startup timeout",
                alive, requested
            ),
        }
    }
}

/// An error returned when a job could not be submitted because the job queue
/// could not grow to hold it.
///
/// Contains the original closure that failed to be submitted. This allows you
/// to try the submission again later or take some other action.
pub struct SubmitError<F>(pub(crate) F);

impl<F> SubmitError<F> {
    /// Extracts the inner closure that could not be submitted.
    pub fn into_inner(self) -> F {
        self.0
    }
}

impl<F> Error for SubmitError<F> {}

impl<F> fmt::Debug for SubmitError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubmitError(..)")
    }
}

impl<F> fmt::Display for SubmitError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to allocate space for job in queue")
    }
}

/// An error returned when a thread pool did not finish shutting down before a
/// deadline.
///
/// Workers listed here were still inside a job when time ran out. Their
/// threads are detached and will exit on their own once the job returns.
pub struct ShutdownTimeoutError {
    stuck_workers: Vec<usize>,
}

impl ShutdownTimeoutError {
    pub(crate) fn new(stuck_workers: Vec<usize>) -> Self {
        Self { stuck_workers }
    }

    /// Get the ids of the workers that had not exited yet.
    pub fn stuck_workers(&self) -> &[usize] {
        &self.stuck_workers
    }
}

impl Error for ShutdownTimeoutError {}

impl fmt::Debug for ShutdownTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownTimeoutError")
            .field("stuck_workers", &self.stuck_workers)
            .finish()
    }
}

impl fmt::Display for ShutdownTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "thread pool shutdown timed out with workers still running: {:?}",
            self.stuck_workers
        )
    }
}
