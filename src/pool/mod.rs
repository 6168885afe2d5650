//! # Pool Module
//!
//! A fixed-size worker pool with a submit-a-task interface. Background
//! compactions and parallel per-epoch reads are scheduled here when the
//! caller configures a pool; without one, tasks run inline on the caller.
//!
//! Tasks are executed in submission order by whichever worker frees up
//! first. Dropping the pool closes the queue and joins every worker, so
//! no task is abandoned mid-flight.

#[cfg(test)]
mod tests;

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{error, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool.
pub struct ThreadPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let (sender, receiver) = channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(num_threads);
        for id in 0..num_threads {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("epochdir-worker-{id}"))
                .spawn(move || Self::worker_loop(id, &receiver))
                .expect("failed to spawn pool worker");
            workers.push(handle);
        }

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Submits a task for asynchronous execution.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(task)).is_err() {
                error!("worker pool queue closed; task dropped");
            }
        }
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    fn worker_loop(id: usize, receiver: &Mutex<Receiver<Task>>) {
        loop {
            let task = {
                let guard = receiver.lock().unwrap();
                guard.recv()
            };
            match task {
                Ok(task) => {
                    trace!(worker = id, "running pooled task");
                    task();
                }
                Err(_) => break, // Queue closed
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the channel stops the workers after the queue drains.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("pool worker panicked");
            }
        }
    }
}
