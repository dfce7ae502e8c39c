use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

/// A handle controlling whether workers may start new jobs.
///
/// Every thread pool owns a pause token. By default each pool gets its own, so
/// pausing one pool has no effect on any other. Pools that should pause and
/// resume together can be built with clones of the same token using
/// [`Builder::pause_token`](crate::Builder::pause_token).
///
/// Pausing never interrupts a job that is already running. A paused worker
/// finishes its current job and then holds before pulling the next one.
///
/// # Examples
///
/// ```
/// use fixedpool::{PauseToken, ThreadPool};
///
/// let token = PauseToken::new();
///
/// let first = ThreadPool::builder().size(1).pause_token(token.clone()).build().unwrap();
/// let second = ThreadPool::builder().size(1).pause_token(token.clone()).build().unwrap();
///
/// first.pause();
/// assert!(second.is_paused());
///
/// token.resume();
/// assert!(!first.is_paused());
/// ```
#[derive(Clone, Default)]
pub struct PauseToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl PauseToken {
    /// Create a new token in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop workers from pulling new jobs.
    pub fn pause(&self) {
        *self.lock() = true;
    }

    /// Let held workers continue pulling jobs.
    pub fn resume(&self) {
        *self.lock() = false;
        self.inner.resumed.notify_all();
    }

    /// Check whether the token is currently paused.
    pub fn is_paused(&self) -> bool {
        *self.lock()
    }

    /// Block while paused, giving up early once `keep_alive` turns false.
    ///
    /// Returns the final value of `keep_alive`. The predicate is evaluated
    /// under the token's lock, so a caller flipping it must call
    /// [`interrupt`](PauseToken::interrupt) afterwards.
    pub(crate) fn hold_while<F>(&self, keep_alive: F) -> bool
    where
        F: Fn() -> bool,
    {
        let mut paused = self.lock();

        while *paused && keep_alive() {
            paused = self
                .inner
                .resumed
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }

        keep_alive()
    }

    /// Wake every held worker so it can re-check its pool's state.
    pub(crate) fn interrupt(&self) {
        let _paused = self.lock();
        self.inner.resumed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PauseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseToken")
            .field("paused", &self.is_paused())
            .finish()
    }
}
