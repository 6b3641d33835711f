//! Shared worker pool.
//!
//! Tasks are callbacks returning a bool: true asks to be rescheduled,
//! false retires the task. A task is owned by exactly one worker thread
//! while it runs, which is what makes the inspectors' DSP state safe to
//! touch without further coordination.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::debug;

use crate::error::PoolError;

pub type Task = Box<dyn FnMut() -> bool + Send>;

struct PoolQueue {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    ready: Condvar,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            ready: Condvar::new(),
        });

        let mut threads = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("chanscope-worker-{i}"))
                .spawn(move || worker_loop(&shared))?;
            threads.push(handle);
        }

        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// Queues a task for execution.
    pub fn push(&self, task: Task) -> Result<(), PoolError> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| PoolError::Poisoned)?;
        if queue.shutdown {
            return Err(PoolError::ShutDown);
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Stops accepting tasks and joins the workers once the queue drains.
    /// Tasks still queued keep running until they retire themselves.
    pub fn shutdown(&self) {
        {
            let mut queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            queue.shutdown = true;
        }
        self.shared.ready.notify_all();

        let threads = {
            let mut guard = self.threads.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for handle in threads {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let mut task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.shutdown {
                    debug!("worker {:?} exiting", thread::current().name());
                    return;
                }
                queue = shared.ready.wait(queue).unwrap();
            }
        };

        // Run outside the queue lock so tasks may block independently.
        let reschedule = task();

        if reschedule {
            let mut queue = shared.queue.lock().unwrap();
            queue.tasks.push_back(task);
            drop(queue);
            shared.ready.notify_one();
        }
    }
}
