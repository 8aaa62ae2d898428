//! Fixed-size worker pool draining one shared FIFO queue of named tasks.
//!
//! Submission is O(1) under a short critical section and never blocks; the
//! queue is unbounded by design (a bounded number of cooperating local
//! clients, no load shedding). `stop` is a drain, not a cancellation:
//! everything already queued runs to completion before the workers exit.

use crate::error::{DuctworkError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// An opaque unit of work with a single execution entry point.
///
/// A task is owned by the queue until a worker claims it, then by that
/// worker until it completes. Implemented for any `FnOnce() + Send`
/// closure.
pub trait Task: Send {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send> Task for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

struct NamedTask {
    name: String,
    task: Box<dyn Task>,
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<NamedTask>,
    stopping: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Fixed-size thread pool with FIFO task dispatch.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn a pool of exactly `workers` threads.
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
        });

        let handles = (0..workers)
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("duct-worker-{i}"))
                    .spawn(move || worker_loop(i, &shared))
                    .expect("spawning pool worker")
            })
            .collect();

        debug!(workers, "thread pool started");

        Self {
            shared,
            workers: handles,
        }
    }

    /// Enqueue a named task.
    ///
    /// Fails with `PoolStopped` once `stop` has been requested; a late
    /// submission is rejected, never silently dropped.
    pub fn submit(&self, name: impl Into<String>, task: impl Task + 'static) -> Result<()> {
        let name = name.into();
        let mut queue = self.shared.queue.lock().expect("pool queue poisoned");
        if queue.stopping {
            warn!(task = %name, "submit rejected: pool is stopping");
            return Err(DuctworkError::PoolStopped { name });
        }
        debug!(task = %name, depth = queue.tasks.len(), "task submitted");
        queue.tasks.push_back(NamedTask {
            name,
            task: Box::new(task),
        });
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Stop accepting tasks, drain the queue, and join every worker.
    ///
    /// Blocks until all queued and in-flight tasks have run to completion.
    /// Safe to call more than once; later calls return immediately.
    pub fn stop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().expect("pool queue poisoned");
            if queue.stopping && self.workers.is_empty() {
                return;
            }
            queue.stopping = true;
        }
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("pool worker panicked");
            }
        }
        info!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    loop {
        let claimed = {
            let mut queue = shared.queue.lock().expect("pool queue poisoned");
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break Some(task);
                }
                if queue.stopping {
                    break None;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .expect("pool queue poisoned");
            }
        };

        match claimed {
            Some(NamedTask { name, task }) => {
                debug!(worker = id, task = %name, "task claimed");
                task.run();
                debug!(worker = id, task = %name, "task finished");
            }
            None => {
                debug!(worker = id, "worker exiting");
                return;
            }
        }
    }
}
