//! FIFO task scheduling.
//!
//! Timer fires and async-action completions are funneled through a
//! [`TaskScheduler`], which runs submitted units of work one at a time in
//! submission order.

use crate::error::EngineError;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::{mpsc, oneshot};

/// A unit of work.
pub type Task = BoxFuture<'static, Result<Value, EngineError>>;

/// Serializes units of work.
///
/// Submission is eager: the task is queued when `enqueue` returns, and
/// dropping the returned handle does not cancel it.
pub trait TaskScheduler: Send + Sync {
    fn enqueue(&self, task: Task) -> TaskHandle;
}

/// Future resolving to the outcome of a queued task.
#[derive(Debug)]
pub struct TaskHandle {
    rx: oneshot::Receiver<Result<Value, EngineError>>,
}

impl TaskHandle {
    /// Creates a connected sender/handle pair for custom schedulers.
    pub fn channel() -> (oneshot::Sender<Result<Value, EngineError>>, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        (tx, TaskHandle { rx })
    }

    /// A handle that is already resolved.
    pub fn ready(result: Result<Value, EngineError>) -> TaskHandle {
        let (tx, handle) = Self::channel();
        let _ = tx.send(result);
        handle
    }
}

impl Future for TaskHandle {
    type Output = Result<Value, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(EngineError::SchedulerClosed)))
    }
}

struct Job {
    task: Task,
    reply: oneshot::Sender<Result<Value, EngineError>>,
}

/// Default scheduler: an unbounded queue drained by a single Tokio task.
///
/// The worker is spawned on the first submission, which must happen inside a
/// Tokio runtime. It exits once the scheduler is dropped and the queue is
/// drained.
pub struct FifoScheduler {
    tx: mpsc::UnboundedSender<Job>,
    pending_worker: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl FifoScheduler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            pending_worker: Mutex::new(Some(rx)),
        }
    }

    /// Spawns the worker if it is not running yet.
    fn ensure_worker(&self) -> Result<(), EngineError> {
        let mut pending = self.pending_worker.lock();
        if pending.is_none() {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            tracing::error!("task scheduler used outside of a Tokio runtime");
            EngineError::SchedulerClosed
        })?;

        if let Some(rx) = pending.take() {
            handle.spawn(run_worker(rx));
        }
        Ok(())
    }
}

impl Default for FifoScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler for FifoScheduler {
    fn enqueue(&self, task: Task) -> TaskHandle {
        if let Err(e) = self.ensure_worker() {
            return TaskHandle::ready(Err(e));
        }

        let (reply, handle) = TaskHandle::channel();
        if self.tx.send(Job { task, reply }).is_err() {
            return TaskHandle::ready(Err(EngineError::SchedulerClosed));
        }
        handle
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>) {
    tracing::debug!("scheduler worker started");

    while let Some(job) = rx.recv().await {
        let outcome = AssertUnwindSafe(job.task)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!("scheduled task panicked");
                Err(EngineError::TaskPanicked)
            });
        // The submitter may have dropped its handle.
        let _ = job.reply.send(outcome);
    }

    tracing::debug!("scheduler worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let scheduler = FifoScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (i, delay) in [30u64, 0, 10].into_iter().enumerate() {
            let log = log.clone();
            handles.push(scheduler.enqueue(
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().push(i);
                    Ok(json!(i))
                }
                .boxed(),
            ));
        }

        let results = futures::future::join_all(handles).await;
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(results[2].as_ref().unwrap(), &json!(2));
    }

    #[tokio::test]
    async fn test_failure_propagates_to_handle() {
        let scheduler = FifoScheduler::new();
        let result = scheduler
            .enqueue(async { Err::<Value, _>(EngineError::handler("nope")) }.boxed())
            .await;
        assert!(matches!(result, Err(EngineError::Handler { .. })));
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_worker_survives() {
        let scheduler = FifoScheduler::new();
        let exploding: Task = Box::pin(async {
            if true {
                panic!("boom");
            }
            Ok(Value::Null)
        });
        let result = scheduler.enqueue(exploding).await;
        assert!(matches!(result, Err(EngineError::TaskPanicked)));

        let result = scheduler.enqueue(async { Ok(json!("after")) }.boxed()).await;
        assert_eq!(result.unwrap(), json!("after"));
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel_task() {
        let scheduler = FifoScheduler::new();
        let ran = Arc::new(Mutex::new(false));

        let flag = ran.clone();
        drop(scheduler.enqueue(
            async move {
                *flag.lock() = true;
                Ok(Value::Null)
            }
            .boxed(),
        ));

        // Queued behind the dropped task, so it completes afterwards.
        scheduler
            .enqueue(async { Ok(Value::Null) }.boxed())
            .await
            .unwrap();
        assert!(*ran.lock());
    }

    #[test]
    fn test_enqueue_outside_runtime_fails() {
        let scheduler = FifoScheduler::new();
        let handle = scheduler.enqueue(async { Ok(Value::Null) }.boxed());
        let result = futures::executor::block_on(handle);
        assert!(matches!(result, Err(EngineError::SchedulerClosed)));
    }
}
