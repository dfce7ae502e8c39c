//! A binary semaphore used to wake idle workers.

use std::{
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use crate::error::InvalidArgumentError;

/// A single-permit, auto-resetting wake primitive.
///
/// A signal holds at most one permit. [`post`](Signal::post) makes the permit
/// available and [`wait`](Signal::wait) blocks until it is, then consumes it.
/// Posting an already available permit does nothing, so callers needing `N`
/// wakeups must post again after each one is consumed.
///
/// A signal can also be [closed](Signal::close). A closed signal never blocks
/// again: every current and future waiter returns at once.
///
/// # Examples
///
/// ```
/// use fixedpool::Signal;
///
/// let signal = Signal::new(0).unwrap();
///
/// signal.post();
/// signal.post();
///
/// // Only one permit exists no matter how many times it was posted.
/// assert!(signal.try_wait());
/// assert!(!signal.try_wait());
/// ```
pub struct Signal {
    state: Mutex<State>,
    cvar: Condvar,
}

#[derive(Clone, Copy)]
struct State {
    permit: bool,
    closed: bool,
}

impl Signal {
    /// Create a new signal holding `initial` permits.
    ///
    /// Returns an error if `initial` is anything other than 0 or 1.
    pub fn new(initial: usize) -> Result<Self, InvalidArgumentError> {
        if initial > 1 {
            return Err(InvalidArgumentError::new(
                "signal initial value must be 0 or 1",
            ));
        }

        Ok(Self::with_permit(initial == 1))
    }

    /// Create a new signal with no permit available.
    pub(crate) fn empty() -> Self {
        Self::with_permit(false)
    }

    fn with_permit(permit: bool) -> Self {
        Self {
            state: Mutex::new(State {
                permit,
                closed: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Make the permit available and wake one blocked waiter, if any.
    pub fn post(&self) {
        self.lock().permit = true;
        self.cvar.notify_one();
    }

    /// Make the permit available and wake every blocked waiter.
    ///
    /// Only one of the woken waiters gets the permit. The rest observe that it
    /// was already taken and go back to sleep, so a caller that needs everyone
    /// to return must keep posting, or [`close`](Signal::close) the signal.
    pub fn post_all(&self) {
        self.lock().permit = true;
        self.cvar.notify_all();
    }

    /// Close the signal, releasing every blocked waiter for good.
    ///
    /// Once closed, [`wait`](Signal::wait) and [`try_wait`](Signal::try_wait)
    /// return immediately without consuming anything. Closing cannot be
    /// undone, not even by [`reset`](Signal::reset).
    pub fn close(&self) {
        self.lock().closed = true;
        self.cvar.notify_all();
    }

    /// Returns `true` if the signal has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Block the current thread until the permit is available, then consume
    /// it. Returns at once if the signal is closed.
    pub fn wait(&self) {
        let mut state = self.lock();

        while !state.permit && !state.closed {
            state = self
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if !state.closed {
            state.permit = false;
        }
    }

    /// Consume the permit if it is available, without blocking.
    ///
    /// Returns `true` if a permit was consumed or the signal is closed.
    pub fn try_wait(&self) -> bool {
        let mut state = self.lock();

        if state.closed {
            true
        } else if state.permit {
            state.permit = false;
            true
        } else {
            false
        }
    }

    /// Discard the permit unconditionally. A closed signal stays closed.
    pub fn reset(&self) {
        self.lock().permit = false;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.lock();

        f.debug_struct("Signal")
            .field("value", &(state.permit as u8))
            .field("closed", &state.closed)
            .finish()
    }
}
