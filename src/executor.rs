//! work execution for asynchronous observer delivery
//!
//! [`WorkPool`] is the shared default executor, constructed once at startup
//! and handed around as `Arc<dyn Executor>`. it must outlive every observer
//! registered without an explicit executor, and [`WorkPool::shutdown`] joins
//! the workers during teardown.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub type Work = Box<dyn FnOnce() + Send>;

/// anything able to run a submitted callable, possibly on another thread
pub trait Executor: Send + Sync {
    fn spawn(&self, work: Work);
}

/// fixed pool of named worker threads fed by a channel
pub struct WorkPool {
    tx: Mutex<Option<Sender<Work>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkPool {
    pub fn setup(workers: usize) -> Arc<WorkPool> {
        let (tx, rx) = channel::<Work>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|n| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("lamina-worker-{n}"))
                    .spawn(move || worker(rx))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Arc::new(WorkPool {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// close the queue and join every worker
    ///
    /// work already queued still runs, further [`Executor::spawn`] calls are
    /// silently dropped
    pub fn shutdown(&self) {
        self.tx.lock().unwrap().take();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            worker.join().ok();
        }
    }
}

impl Executor for WorkPool {
    fn spawn(&self, work: Work) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            tx.send(work).ok();
        }
    }
}

fn worker(rx: Arc<Mutex<Receiver<Work>>>) {
    loop {
        // release the lock before running, a blocking work item
        // must not stall the other workers
        let work = match rx.lock().unwrap().recv() {
            Ok(work) => work,
            Err(_) => break,
        };
        if catch_unwind(AssertUnwindSafe(work)).is_err() {
            tracing::error!("work item panicked");
        }
    }
}

/// runs work immediately on the calling thread
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, work: Work) {
        work();
    }
}
