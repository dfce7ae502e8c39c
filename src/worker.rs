use std::sync::Arc;

use crate::{pool::Shared, queue::Outcome};

/// A worker thread which belongs to a thread pool and executes jobs.
pub(crate) struct Worker {
    id: usize,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }

    pub(crate) fn run(self) {
        let _registration = Registration::new(&self.shared);

        log::trace!("worker {} started", self.id);

        // Main worker loop
        while self.shared.keep_alive() {
            // The only place an idle worker sleeps.
            self.shared.queue.signal().wait();

            // Shutdown wakes idle workers without any work to hand them.
            if !self.shared.keep_alive() {
                break;
            }

            // Pausing only takes effect between jobs.
            if !self.shared.pause.hold_while(|| self.shared.keep_alive()) {
                break;
            }

            // Busy from before the pull until the job has returned.
            self.shared.job_started(self.id);

            match self.shared.queue.pull() {
                Some(job) => {
                    let outcome = job.run();

                    if outcome == Outcome::Panicked {
                        log::debug!("job panicked on worker {}", self.id);
                    }

                    self.shared.job_finished(self.id, outcome);
                }

                // Woken without work, or the queue was closed.
                None => self.shared.job_skipped(self.id),
            }
        }

        log::trace!("worker {} stopping", self.id);
    }
}

/// Counts a worker as alive for as long as it exists.
struct Registration<'a> {
    shared: &'a Shared,
}

impl<'a> Registration<'a> {
    fn new(shared: &'a Shared) -> Self {
        shared.worker_started();
        Self { shared }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.shared.worker_stopped();
    }
}
