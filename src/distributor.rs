//! Fan-out/fan-in over a bounded queue.
//!
//! A fixed number of scoped worker threads drain a shared queue until it is
//! closed and empty. Each worker owns a piece of state built by `init`; the
//! states come back to the caller after every worker has joined, which is
//! where partial results get merged.
//!
//! Failure policy: the first error (or panic) raised by `init` or `work`
//! cancels the run. Items already being processed finish, workers stop
//! taking new items, whatever is still queued is dropped with the queue, the
//! producer stops feeding, and the first error is returned.

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct WorkDistributor {
    workers: usize,
}

impl WorkDistributor {
    /// `workers` is clamped to at least one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// One worker per available CPU.
    pub fn per_cpu() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enqueues every item into a queue sized to the item count, closes it,
    /// then lets the workers drain it.
    pub fn run<T, S, I, F>(&self, items: Vec<T>, init: I, work: F) -> Result<Vec<S>>
    where
        T: Send,
        S: Send,
        I: Fn(usize) -> S + Sync,
        F: Fn(&mut S, T) -> Result<()> + Sync,
    {
        let (tx, rx) = bounded(items.len().max(1));
        let cancelled = AtomicBool::new(false);
        feed(tx, items, &cancelled);

        self.execute(rx, &cancelled, |_| {}, init, work)
    }

    /// Starts the workers first and feeds them from the calling thread
    /// through a queue bounded to the worker count.
    pub fn run_streaming<T, S, It, I, F>(&self, items: It, init: I, work: F) -> Result<Vec<S>>
    where
        T: Send,
        S: Send,
        It: IntoIterator<Item = T>,
        I: Fn(usize) -> S + Sync,
        F: Fn(&mut S, T) -> Result<()> + Sync,
    {
        let (tx, rx) = bounded(self.workers);
        let cancelled = AtomicBool::new(false);

        self.execute(rx, &cancelled, move |cancelled| feed(tx, items, cancelled), init, work)
    }

    fn execute<T, S, P, I, F>(
        &self,
        rx: Receiver<T>,
        cancelled: &AtomicBool,
        produce: P,
        init: I,
        work: F,
    ) -> Result<Vec<S>>
    where
        T: Send,
        S: Send,
        P: FnOnce(&AtomicBool),
        I: Fn(usize) -> S + Sync,
        F: Fn(&mut S, T) -> Result<()> + Sync,
    {
        let first_error: Mutex<Option<Error>> = Mutex::new(None);

        let fail = |index: usize, err: Error| {
            log::warn!("Worker {} failed, cancelling remaining work: {}", index, err);
            cancelled.store(true, Ordering::Release);
            let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            }
        };

        let joined = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|index| {
                    let rx = rx.clone();
                    let (init, work, fail) = (&init, &work, &fail);
                    scope.spawn(move || {
                        let mut state = match panic::catch_unwind(AssertUnwindSafe(|| init(index))) {
                            Ok(state) => state,
                            Err(_) => {
                                fail(index, Error::WorkerPanicked);
                                return None;
                            }
                        };

                        let mut processed = 0usize;
                        // Ends once the queue is closed and empty
                        for item in rx.iter() {
                            if cancelled.load(Ordering::Acquire) {
                                break;
                            }

                            match panic::catch_unwind(AssertUnwindSafe(|| work(&mut state, item))) {
                                Ok(Ok(())) => processed += 1,
                                Ok(Err(err)) => fail(index, err),
                                Err(_) => fail(index, Error::WorkerPanicked),
                            }
                        }
                        log::debug!("Worker {} exiting after {} items", index, processed);
                        Some(state)
                    })
                })
                .collect();

            // Only the workers hold receivers now: once they have all exited,
            // a blocked send fails instead of waiting forever.
            drop(rx);
            produce(cancelled);

            handles
                .into_iter()
                .map(|handle| handle.join().map_err(|_| Error::WorkerPanicked))
                .collect::<Result<Vec<_>>>()
        });

        let first_error = first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        match first_error {
            Some(err) => Err(err),
            None => joined.map(|states| states.into_iter().flatten().collect()),
        }
    }
}

/// Pushes items until exhausted, cancelled, or no worker is left to receive,
/// then closes the queue by dropping the sender.
fn feed<T>(tx: Sender<T>, items: impl IntoIterator<Item = T>, cancelled: &AtomicBool) {
    for item in items {
        if cancelled.load(Ordering::Acquire) || tx.send(item).is_err() {
            break;
        }
    }
}
