//! Component C6: the global work queue and fixed-size worker pool (spec §9
//! design note: plain OS threads, no async runtime, in the core I/O path).
//!
//! Grounded in `ldap/servers/slapd/daemon.c`'s connection scheduling model:
//! one global FIFO guarded by a `Mutex`+`Condvar`, N worker threads pop
//! work items and service them to completion (or until "turbo mode" keeps
//! a connection with one worker across several consecutive requests
//! instead of requeuing it to the poll set after every PDU).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One unit of dispatchable work: "this connection slot has a readable
/// socket (or a queued wakeup) and should be serviced."
pub struct WorkItem {
    pub slot: usize,
}

struct Shared {
    queue: Mutex<VecDeque<WorkItem>>,
    cv: Condvar,
    shutdown: Mutex<bool>,
}

/// Turbo-mode bookkeeping for one worker: how long it's been exclusively
/// servicing the same connection, and the check interval/hysteresis from
/// spec §9 ("a worker keeps exclusive ownership across consecutive
/// requests instead of returning to the poll set").
pub struct TurboState {
    pub consecutive_requests: u32,
    pub entered_at: Instant,
}

impl TurboState {
    pub fn new() -> TurboState {
        TurboState { consecutive_requests: 0, entered_at: Instant::now() }
    }

    /// Whether the worker should keep the connection under turbo mode
    /// rather than give it back to the poll set. `check_interval` is
    /// `CONN_TURBO_CHECK_INTERVAL`; after it elapses the worker
    /// re-evaluates rather than staying turbo forever (hysteresis: one
    /// miss doesn't immediately drop out, only an elapsed interval with a
    /// low hit rate does).
    pub fn should_stay_turbo(&self, check_interval: Duration, min_requests_for_turbo: u32) -> bool {
        if self.entered_at.elapsed() < check_interval {
            return true;
        }
        self.consecutive_requests >= min_requests_for_turbo
    }

    pub fn record_request(&mut self) {
        self.consecutive_requests += 1;
    }

    pub fn reset(&mut self) {
        self.consecutive_requests = 0;
        self.entered_at = Instant::now();
    }
}

impl Default for TurboState {
    fn default() -> TurboState {
        TurboState::new()
    }
}

/// The global FIFO plus the worker threads draining it.
pub struct WorkQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkQueue {
    /// Spawn `thread_number` workers, each running `handler` for every
    /// item it pops until shutdown.
    pub fn spawn<F>(thread_number: usize, handler: F) -> WorkQueue
    where
        F: Fn(WorkItem) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared { queue: Mutex::new(VecDeque::new()), cv: Condvar::new(), shutdown: Mutex::new(false) });
        let handler = Arc::new(handler);
        let mut workers = Vec::with_capacity(thread_number);
        for n in 0..thread_number.max(1) {
            let shared = shared.clone();
            let handler = handler.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("ldap-worker-{n}"))
                    .spawn(move || worker_loop(shared, handler))
                    .expect("failed to spawn worker thread"),
            );
        }
        WorkQueue { shared, workers }
    }

    pub fn push(&self, item: WorkItem) {
        let mut q = self.shared.queue.lock().unwrap();
        q.push_back(item);
        self.shared.cv.notify_one();
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(mut self) {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.cv.notify_all();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn worker_loop<F: Fn(WorkItem) + Send + Sync + 'static>(shared: Arc<Shared>, handler: Arc<F>) {
    loop {
        let item = {
            let mut q = shared.queue.lock().unwrap();
            loop {
                if let Some(item) = q.pop_front() {
                    break Some(item);
                }
                if *shared.shutdown.lock().unwrap() {
                    return;
                }
                q = shared.cv.wait(q).unwrap();
            }
        };
        if let Some(item) = item {
            handler(item);
        }
    }
}
