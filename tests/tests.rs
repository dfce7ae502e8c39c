use std::{
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    task::{Context, Poll, Wake, Waker},
    thread::{self, Thread},
    time::{Duration, Instant},
};

use fixedpool::{CreateError, PauseToken, ThreadPool};

fn single_thread() -> ThreadPool {
    ThreadPool::new(1).unwrap()
}

fn block_on<F: Future>(future: F) -> F::Output {
    struct ThreadWaker(Thread);

    impl Wake for ThreadWaker {
        fn wake(self: Arc<Self>) {
            self.0.unpark();
        }
    }

    let waker: Waker = Arc::new(ThreadWaker(thread::current())).into();
    let mut cx = Context::from_waker(&waker);
    let mut future = Box::pin(future);

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => thread::park(),
        }
    }
}

#[test]
fn size_zero_is_rejected() {
    assert!(matches!(
        ThreadPool::new(0),
        Err(CreateError::InvalidArgument(_))
    ));
}

#[test]
fn name_with_null_bytes_is_rejected() {
    let result = ThreadPool::builder().name("uh\0oh").size(1).build();

    match result {
        Err(CreateError::InvalidArgument(e)) => {
            assert_eq!(e.reason(), "thread pool name must not contain null bytes");
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn workers_missing_the_startup_timeout_fail_the_build() {
    let start = Instant::now();
    let result = ThreadPool::builder()
        .size(128)
        .startup_timeout(Duration::ZERO)
        .build();

    match result {
        Err(CreateError::PartialStartup { alive, requested }) => {
            assert_eq!(requested, 128);
            assert!(alive < requested);
        }
        // Every worker managed to register before the first check.
        Ok(pool) => assert_eq!(pool.threads(), 128),
        Err(e) => panic!("unexpected error: {}", e),
    }

    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn unspawnable_worker_fails_the_build() {
    let result = ThreadPool::builder().size(4).stack_size(usize::MAX).build();

    match result {
        Err(CreateError::ThreadCreation { worker, .. }) => assert_eq!(worker, 0),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn all_workers_alive_after_create() {
    let pool = ThreadPool::new(3).unwrap();

    assert_eq!(pool.size(), 3);
    assert_eq!(pool.threads(), 3);
    assert_eq!(pool.busy_count(), 0);
}

#[test]
fn execute() {
    let pool = single_thread();

    let result = pool.execute(|| 2 + 2).unwrap().join();

    assert_eq!(result, 4);
}

#[test]
fn task_can_be_awaited() {
    let pool = single_thread();

    let task = pool
        .execute(|| {
            thread::sleep(Duration::from_millis(20));
            "hello"
        })
        .unwrap();

    assert_eq!(block_on(task), "hello");
}

#[test]
fn task_join_timeout() {
    let pool = single_thread();

    let result = pool
        .execute(|| thread::sleep(Duration::from_millis(50)))
        .unwrap()
        .join_timeout(Duration::from_millis(10));

    assert!(result.is_err());
}

#[test]
fn every_job_runs_exactly_once() {
    let pool = ThreadPool::new(4).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..40 {
        let log = log.clone();
        pool.submit(move || log.lock().unwrap().push(i)).unwrap();
    }

    pool.wait();
    assert_eq!(pool.busy_count(), 0);
    assert_eq!(pool.queued_jobs(), 0);
    assert_eq!(pool.completed_jobs(), 40);

    let mut observed = log.lock().unwrap().clone();
    observed.sort_unstable();
    assert_eq!(observed, (0..40).collect::<Vec<_>>());

    pool.shutdown();

    // Nothing can run once the pool is gone.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(log.lock().unwrap().len(), 40);
}

#[test]
fn single_worker_runs_jobs_in_submission_order() {
    let pool = single_thread();
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100 {
        let log = log.clone();
        pool.submit(move || log.lock().unwrap().push(i)).unwrap();
    }

    pool.wait();

    assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn concurrent_producers_lose_nothing() {
    let pool = Arc::new(ThreadPool::new(4).unwrap());
    let counter = Arc::new(AtomicUsize::new(0));

    let producers = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let counter = counter.clone();

            thread::spawn(move || {
                for _ in 0..250 {
                    let counter = counter.clone();
                    pool.submit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
        })
        .collect::<Vec<_>>();

    for producer in producers {
        producer.join().unwrap();
    }

    pool.wait();
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
}

#[test]
fn wait_on_idle_pool_returns_immediately() {
    let pool = ThreadPool::new(2).unwrap();

    pool.wait();
    assert!(pool.wait_timeout(Duration::ZERO));
}

#[test]
fn wait_can_be_repeated() {
    let pool = ThreadPool::new(2).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for round in 1..=3 {
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.wait();
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), round * 10);
    }
}

#[test]
fn wait_timeout_expires_while_busy() {
    let pool = single_thread();

    pool.submit(|| thread::sleep(Duration::from_millis(100)))
        .unwrap();

    assert!(!pool.wait_timeout(Duration::from_millis(10)));
    assert!(pool.wait_timeout(Duration::from_secs(5)));
}

#[test]
fn pause_and_resume_lose_no_jobs() {
    let pool = ThreadPool::new(2).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    pool.pause();
    assert!(pool.is_paused());

    for _ in 0..10 {
        let counter = counter.clone();
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    thread::sleep(Duration::from_millis(50));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(!pool.wait_timeout(Duration::from_millis(10)));

    pool.resume();
    pool.wait();

    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn pause_lets_running_job_finish() {
    let pool = single_thread();

    let slow = pool
        .execute(|| {
            thread::sleep(Duration::from_millis(50));
            1
        })
        .unwrap();

    // Give the job time to start, then pause mid-job.
    thread::sleep(Duration::from_millis(10));
    pool.pause();

    let next = pool.execute(|| 2).unwrap();

    assert_eq!(slow.join(), 1);

    let next = next.join_timeout(Duration::from_millis(50)).unwrap_err();

    pool.resume();
    assert_eq!(next.join(), 2);
}

#[test]
fn pools_pause_independently() {
    let paused = single_thread();
    let running = single_thread();

    paused.pause();

    assert!(!running.is_paused());
    assert_eq!(running.execute(|| 2 + 2).unwrap().join(), 4);

    paused.resume();
}

#[test]
fn pools_sharing_a_token_pause_together() {
    let token = PauseToken::new();

    let first = ThreadPool::builder()
        .size(1)
        .pause_token(token.clone())
        .build()
        .unwrap();
    let second = ThreadPool::builder()
        .size(1)
        .pause_token(token.clone())
        .build()
        .unwrap();

    first.pause();

    let task = second.execute(|| 2 + 2).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(!task.is_done());

    // Resuming either pool resumes both.
    first.resume();
    assert!(!token.is_paused());
    assert_eq!(task.join(), 4);
}

#[test]
fn name() {
    let pool = ThreadPool::builder().name("foo").size(1).build().unwrap();

    let name = pool
        .execute(|| thread::current().name().unwrap().to_owned())
        .unwrap()
        .join();

    assert_eq!(name, "foo-0");
}

#[test]
#[should_panic(expected = "oh no!")]
fn panic_propagates_to_task() {
    let pool = single_thread();

    pool.execute(|| panic!("oh no!")).unwrap().join();
}

#[test]
fn panicking_job_does_not_stop_worker() {
    let pool = single_thread();
    assert_eq!(pool.panicked_jobs(), 0);

    pool.submit(|| panic!("oh no!")).unwrap();
    pool.wait();

    assert_eq!(pool.panicked_jobs(), 1);
    assert_eq!(pool.threads(), 1);
    assert_eq!(pool.execute(|| 2 + 2).unwrap().join(), 4);
}

#[test]
fn shutdown_never_runs_a_job_partially() {
    let pool = single_thread();
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let started = started.clone();
        let finished = finished.clone();

        pool.submit(move || {
            started.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            finished.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.shutdown();

    let started = started.load(Ordering::SeqCst);
    assert_eq!(started, finished.load(Ordering::SeqCst));

    // Queued jobs were discarded rather than drained.
    assert!(started < 20);
}

#[test]
fn discarded_task_panics_on_join() {
    let pool = single_thread();

    pool.pause();
    let task = pool.execute(|| 2 + 2).unwrap();

    pool.shutdown();

    let result = catch_unwind(AssertUnwindSafe(move || task.join()));
    assert!(result.is_err());
}

#[test]
fn discarded_task_is_done() {
    let pool = single_thread();

    pool.pause();
    let task = pool.execute(|| 2 + 2).unwrap();
    assert!(!task.is_done());

    pool.shutdown();

    assert!(task.is_done());
}

#[test]
fn nothing_starts_once_shutdown_begins() {
    let pool = ThreadPool::new(4).unwrap();
    let started = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let started = started.clone();
        pool.submit(move || {
            started.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
        })
        .unwrap();
    }

    pool.shutdown();
    let after_shutdown = started.load(Ordering::SeqCst);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(started.load(Ordering::SeqCst), after_shutdown);
    assert!(after_shutdown < 1000);
}

#[test]
fn shutdown_timeout_reports_stuck_workers() {
    let pool = ThreadPool::new(2).unwrap();

    pool.submit(|| thread::sleep(Duration::from_millis(500)))
        .unwrap();

    // Give the job time to start.
    thread::sleep(Duration::from_millis(20));

    let error = pool
        .shutdown_timeout(Duration::from_millis(50))
        .unwrap_err();

    assert_eq!(error.stuck_workers().len(), 1);
}

#[test]
fn idle_workers_are_never_reported_stuck() {
    let pool = ThreadPool::new(8).unwrap();

    pool.submit(|| thread::sleep(Duration::from_millis(500)))
        .unwrap();
    thread::sleep(Duration::from_millis(20));

    let error = pool.shutdown_timeout(Duration::ZERO).unwrap_err();

    assert_eq!(error.stuck_workers().len(), 1);
}

#[test]
fn shutdown_timeout_succeeds_when_idle() {
    let pool = ThreadPool::new(4).unwrap();

    assert!(pool.shutdown_timeout(Duration::from_secs(5)).is_ok());
}

#[test]
fn drop_without_shutdown() {
    // Just a dumb test to make sure dropping doesn't do anything strange.
    drop(ThreadPool::new(2).unwrap());
}
