//! Background task queue with named job families.
//!
//! Mutating writes to the settings stores are decoupled from file I/O by
//! queueing flush tasks here. Every task belongs to a family (a plain string
//! tag); [`Worker::join_family`] waits until all outstanding tasks of a
//! family have finished, which is how tests and clients assert persisted
//! state instead of sleeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, warn};

/// A unit of background work.
pub trait Task: Send + 'static {
    type Output: Send + 'static;

    fn run(&self) -> Result<Self::Output>;

    /// Family tag grouping this task for [`Worker::join_family`].
    fn family(&self) -> &str {
        "default"
    }
}

trait TaskTrait: Send {
    fn run_boxed(self: Box<Self>) -> Result<Box<dyn std::any::Any + Send>>;
    fn family(&self) -> String;
}

impl<T: Task> TaskTrait for T {
    fn run_boxed(self: Box<Self>) -> Result<Box<dyn std::any::Any + Send>> {
        self.run()
            .map(|output| Box::new(output) as Box<dyn std::any::Any + Send>)
            .map_err(|e| {
                error!(?e, "task execution failed");
                e
            })
    }

    fn family(&self) -> String {
        Task::family(self).to_string()
    }
}

enum TaskMessage {
    Execute(Box<dyn TaskTrait>),
    WithResult(
        Box<dyn TaskTrait>,
        oneshot::Sender<Result<Box<dyn std::any::Any + Send>>>,
    ),
}

/// Outstanding-task counts per family plus the wakeup for joiners.
#[derive(Default)]
struct FamilyTracker {
    counts: Mutex<HashMap<String, usize>>,
    drained: Notify,
}

impl FamilyTracker {
    fn begin(&self, family: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        *counts.entry(family.to_string()).or_insert(0) += 1;
    }

    fn finish(&self, family: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        match counts.get_mut(family) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                counts.remove(family);
            }
            None => warn!(family, "finished task for untracked family"),
        }
        drop(counts);
        self.drained.notify_waiters();
    }

    fn outstanding(&self, family: &str) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(family)
            .copied()
            .unwrap_or(0)
    }

    async fn join(&self, family: &str) {
        loop {
            let drained = self.drained.notified();
            if self.outstanding(family) == 0 {
                return;
            }
            drained.await;
        }
    }
}

struct WorkerInner {
    sender: mpsc::Sender<TaskMessage>,
    shutdown_sender: Option<oneshot::Sender<()>>,
    families: Arc<FamilyTracker>,
}

/// Single background executor draining queued tasks in submission order.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    #[must_use]
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let families = Arc::new(FamilyTracker::default());
        let worker_families = Arc::clone(&families);

        tokio::spawn(async move {
            debug!("worker task started");
            loop {
                tokio::select! {
                    Some(msg) = receiver.recv() => {
                        match msg {
                            TaskMessage::Execute(task) => {
                                let family = task.family();
                                if let Err(e) = task.run_boxed() {
                                    error!(?e, %family, "task execution failed");
                                }
                                worker_families.finish(&family);
                            }
                            TaskMessage::WithResult(task, sender) => {
                                let family = task.family();
                                let result = task.run_boxed();
                                worker_families.finish(&family);
                                if sender.send(result).is_err() {
                                    warn!("task result receiver dropped");
                                }
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("worker received shutdown signal");
                        break;
                    }
                }
            }
            debug!("worker task stopped");
        });

        Self {
            inner: Arc::new(WorkerInner {
                sender,
                shutdown_sender: Some(shutdown_tx),
                families,
            }),
        }
    }

    /// Queue a task without waiting for queue capacity. Fails when the
    /// queue is full.
    pub fn execute<T>(&self, task: T) -> Result<()>
    where
        T: Task + 'static,
    {
        self.inner.families.begin(task.family());
        let family = task.family().to_string();
        self.inner
            .sender
            .try_send(TaskMessage::Execute(Box::new(task)))
            .map_err(|e| {
                self.inner.families.finish(&family);
                error!(?e, "failed to queue task");
                anyhow::anyhow!("failed to queue task: {e}")
            })
    }

    /// Queue a task, waiting for queue capacity if needed.
    pub async fn submit<T>(&self, task: T) -> Result<()>
    where
        T: Task + 'static,
    {
        self.inner.families.begin(task.family());
        let family = task.family().to_string();
        self.inner
            .sender
            .send(TaskMessage::Execute(Box::new(task)))
            .await
            .map_err(|e| {
                self.inner.families.finish(&family);
                error!(?e, "failed to submit task");
                anyhow::anyhow!("failed to submit task: {e}")
            })
    }

    /// Queue a task and wait for its output.
    pub async fn wait_for<T>(&self, task: T) -> Result<T::Output>
    where
        T: Task + 'static,
    {
        self.inner.families.begin(task.family());
        let family = task.family().to_string();
        let (tx, rx) = oneshot::channel();

        self.inner
            .sender
            .send(TaskMessage::WithResult(Box::new(task), tx))
            .await
            .map_err(|e| {
                self.inner.families.finish(&family);
                error!(?e, "failed to send task");
                anyhow::anyhow!("failed to send task: {e}")
            })?;

        let result = rx.await.map_err(|e| {
            error!(?e, "failed to receive task result");
            anyhow::anyhow!("failed to receive result: {e}")
        })??;

        result
            .downcast()
            .map(|b| *b)
            .map_err(|_| anyhow::anyhow!("failed to downcast task result"))
    }

    /// Wait until every queued task of `family` has finished. Returns
    /// immediately when the family has no outstanding tasks.
    pub async fn join_family(&self, family: &str) {
        self.inner.families.join(family).await;
    }

    /// Outstanding task count of a family, for diagnostics.
    #[must_use]
    pub fn outstanding(&self, family: &str) -> usize {
        self.inner.families.outstanding(family)
    }
}

impl Drop for WorkerInner {
    fn drop(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            if sender.send(()).is_err() {
                debug!("worker already stopped");
            }
        }
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}
