//! Single-writer execution runtime.
//!
//! Cluster-merge resolution needs a consistent view of committed
//! memberships, so no two runs may ever execute concurrently against the
//! same staged population. This module makes that scheduling explicit: one
//! dedicated worker thread drains a bounded submission queue, callers get a
//! handle to join on, and every queued run executes strictly in submission
//! order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::engine::{DedupeEngine, RunReport};
use crate::error::{EngineError, KinError, KinResult};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum queued runs awaiting the worker.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { queue_capacity: 16 }
    }
}

enum Job {
    Run {
        reply: Sender<KinResult<RunReport>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

/// Handle for one submitted run.
#[derive(Debug)]
pub struct RunHandle {
    rx: Receiver<KinResult<RunReport>>,
}

impl RunHandle {
    /// Waits for the run to complete.
    ///
    /// # Errors
    /// Propagates the run's own error, or
    /// [`EngineError::WorkerDisconnected`] when the worker died before
    /// replying.
    pub fn join(self) -> KinResult<RunReport> {
        self.rx
            .recv()
            .map_err(|_| KinError::Engine(EngineError::WorkerDisconnected))?
    }

    /// Waits for the run to complete with a timeout.
    ///
    /// # Errors
    /// As [`join`](RunHandle::join), plus [`EngineError::JoinTimeout`] when
    /// the run does not finish in time. The run itself keeps executing; a
    /// timed-out join only abandons the reply.
    pub fn join_timeout(self, timeout: Duration) -> KinResult<RunReport> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            crossbeam_channel::RecvTimeoutError::Timeout => {
                KinError::Engine(EngineError::JoinTimeout {
                    duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                })
            }
            crossbeam_channel::RecvTimeoutError::Disconnected => {
                KinError::Engine(EngineError::WorkerDisconnected)
            }
        })?
    }
}

/// Bounded, single-threaded run scheduler over a [`DedupeEngine`].
pub struct DedupeRuntime {
    engine: Arc<DedupeEngine>,
    tx: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    queue_capacity: usize,
}

impl DedupeRuntime {
    /// Starts the runtime with its one worker thread.
    #[must_use]
    pub fn new(engine: DedupeEngine, config: RuntimeConfig) -> Self {
        let engine = Arc::new(engine);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let worker_engine = Arc::clone(&engine);
        let worker = thread::Builder::new()
            .name("kinfold-resolver".to_string())
            .spawn(move || loop {
                match rx.recv() {
                    Ok(Job::Run { reply }) => {
                        let result = worker_engine.run();
                        let _ = reply.send(result);
                    }
                    Err(_) => break,

                    #[cfg(test)]
                    Ok(Job::Sleep { duration, reply }) => {
                        thread::sleep(duration);
                        let _ = reply.send(());
                    }
                }
            })
            .expect("failed to spawn kinfold worker");

        Self {
            engine,
            tx,
            worker: Some(worker),
            queue_capacity,
        }
    }

    /// Queues one run.
    ///
    /// # Errors
    /// Returns [`EngineError::QueueFull`] when the submission queue is at
    /// capacity and [`EngineError::WorkerDisconnected`] when the worker has
    /// exited.
    pub fn submit(&self) -> KinResult<RunHandle> {
        let (reply, rx) = bounded::<KinResult<RunReport>>(1);
        match self.tx.try_send(Job::Run { reply }) {
            Ok(()) => Ok(RunHandle { rx }),
            Err(TrySendError::Full(_)) => Err(KinError::Engine(EngineError::QueueFull {
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => {
                Err(KinError::Engine(EngineError::WorkerDisconnected))
            }
        }
    }

    /// Queues one run and waits for it.
    ///
    /// # Errors
    /// As [`submit`](DedupeRuntime::submit) plus the run's own error.
    pub fn run(&self) -> KinResult<RunReport> {
        self.submit()?.join()
    }

    /// Shared reference to the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &DedupeEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> KinResult<Receiver<()>> {
        let (reply, rx) = bounded::<()>(1);
        self.tx
            .try_send(Job::Sleep { duration, reply })
            .map_err(|err| match err {
                TrySendError::Full(_) => KinError::Engine(EngineError::QueueFull {
                    capacity: self.queue_capacity,
                }),
                TrySendError::Disconnected(_) => {
                    KinError::Engine(EngineError::WorkerDisconnected)
                }
            })?;
        // Wait for the worker to dequeue the sleep job so the queue slot it
        // held is observably free before the caller continues.
        while !self.tx.is_empty() {
            thread::yield_now();
        }
        Ok(rx)
    }
}

impl Drop for DedupeRuntime {
    fn drop(&mut self) {
        // Close the channel: the worker drains queued runs then exits.
        let (closed, _) = bounded::<Job>(1);
        drop(std::mem::replace(&mut self.tx, closed));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
