//! Schedulers that run notification deliveries.
//!
//! Engines invoke change callbacks on the thread that committed. The
//! scheduler of the realm that registered the listener decides where the
//! decoding and delivery actually run.

use parking_lot::Mutex;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A unit of delivery work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs delivery tasks, in submission order.
pub trait Scheduler: Send + Sync {
    /// Schedules `task` to run.
    fn schedule(&self, task: Task);
}

/// Runs every task inline on the committing thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: Task) {
        task();
    }
}

/// Runs tasks on one dedicated delivery thread.
///
/// The thread exits once the scheduler is dropped and the queue drained.
pub struct ThreadScheduler {
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    /// Starts the delivery thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let name = name.into();
        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Ok(task) = receiver.recv() {
                task();
            }
        })?;
        debug!(thread = %name, "started delivery thread");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, task: Task) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            warn!("delivery thread stopped; dropping task");
            return;
        };
        if sender.send(task).is_err() {
            warn!("delivery thread exited; dropping task");
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            // A task running on the delivery thread may hold the last
            // reference to this scheduler.
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!("delivery thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler").finish_non_exhaustive()
    }
}

/// Runs tasks on a tokio runtime, one spawned task draining a queue.
#[cfg(feature = "tokio")]
#[derive(Debug)]
pub struct TokioScheduler {
    sender: tokio::sync::mpsc::UnboundedSender<Task>,
}

#[cfg(feature = "tokio")]
impl TokioScheduler {
    /// Starts draining deliveries on `handle`.
    #[must_use]
    pub fn new(handle: &tokio::runtime::Handle) -> Self {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = receiver.recv().await {
                task();
            }
        });
        Self { sender }
    }
}

#[cfg(feature = "tokio")]
impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) {
        if self.sender.send(task).is_err() {
            warn!("tokio delivery task exited; dropping task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn immediate_runs_inline() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        ImmediateScheduler.schedule(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_scheduler_runs_in_order() {
        let scheduler = ThreadScheduler::new("delivery-test").unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            scheduler.schedule(Box::new(move || {
                tx.send((i, thread::current().name().map(String::from))).unwrap();
            }));
        }
        drop(scheduler);

        let received: Vec<_> = rx.iter().take(5).collect();
        let order: Vec<_> = received.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(received
            .iter()
            .all(|(_, name)| name.as_deref() == Some("delivery-test")));
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn tokio_scheduler_runs_tasks() {
        let scheduler = TokioScheduler::new(&tokio::runtime::Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.schedule(Box::new(move || {
            let _ = tx.send(7);
        }));
        assert_eq!(rx.await.unwrap(), 7);
    }
}
