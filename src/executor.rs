//! Single-worker sequential executor for provider bookkeeping.
//!
//! All registry mutations, connection attempts and load-step checks are
//! submitted here so they are totally ordered. The worker runs in its own
//! tokio task and processes one job at a time until shutdown.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{DataError, DataResult};

/// A unit of bookkeeping work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum ExecutorMessage {
    Run(Job),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable submission side of the executor.
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::UnboundedSender<ExecutorMessage>,
}

impl ExecutorHandle {
    /// Queue a job. Returns `false` if the executor has shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sent = self.tx.send(ExecutorMessage::Run(Box::new(job))).is_ok();
        if !sent {
            tracing::debug!("executor closed, dropping job");
        }
        sent
    }

    /// Wait until every job queued before this call has run.
    pub async fn flush(&self) -> DataResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(ExecutorMessage::Flush(done_tx))
            .map_err(|_| DataError::ExecutorClosed)?;
        done_rx.await.map_err(|_| DataError::ExecutorClosed)
    }
}

/// Owner of the worker task.
pub struct SequentialExecutor {
    handle: ExecutorHandle,
    task_handle: Option<JoinHandle<()>>,
}

impl SequentialExecutor {
    /// Spawn the worker on the given runtime.
    pub fn spawn(runtime: &tokio::runtime::Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task_handle = runtime.spawn(worker_loop(rx));

        Self {
            handle: ExecutorHandle { tx },
            task_handle: Some(task_handle),
        }
    }

    pub fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    /// Stop accepting work after the jobs already queued, and wait for the
    /// worker to finish them.
    pub async fn shutdown(&mut self) -> DataResult<()> {
        let _ = self.handle.tx.send(ExecutorMessage::Shutdown);

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| DataError::ExecutorFailed(e.to_string()))?;
        }
        Ok(())
    }
}

async fn worker_loop(mut rx: mpsc::UnboundedReceiver<ExecutorMessage>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            ExecutorMessage::Run(job) => job(),
            ExecutorMessage::Flush(done) => {
                let _ = done.send(());
            }
            ExecutorMessage::Shutdown => break,
        }
    }
    tracing::debug!("provider executor stopped");
}
