//! Bounded sub-task queue for step fan-out.
//!
//! A step enqueues N sub-tasks; the queue runs up to `concurrency` of them
//! in parallel and joins their results in enqueue order. FIFO with optional
//! priority ordering (stable sort, so equal priorities stay FIFO). A cancel
//! flag checked before each dispatch drains pending tasks without running
//! them; in-flight tasks finish and report normally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// One unit of fan-out work.
pub struct SubTask {
    pub id: String,
    /// Lower runs first. Default 0 keeps plain FIFO.
    pub priority: i32,
    pub work: BoxFuture<'static, Result<serde_json::Value, String>>,
}

impl SubTask {
    pub fn new(
        id: impl Into<String>,
        work: BoxFuture<'static, Result<serde_json::Value, String>>,
    ) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            work,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Per-task outcome, reported in enqueue order.
#[derive(Debug, Clone)]
pub enum SubTaskOutcome {
    Completed(serde_json::Value),
    Failed(String),
    /// Never dispatched: the workflow was canceled while this task was
    /// still pending.
    Drained,
}

impl SubTaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SubTaskOutcome::Completed(_))
    }
}

pub struct TaskQueue {
    pub name: String,
    pub concurrency: usize,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Run all tasks, returning outcomes in the original enqueue order.
    pub async fn run(
        &self,
        tasks: Vec<SubTask>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Vec<(String, SubTaskOutcome)> {
        let total = tasks.len();
        let mut ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let mut outcomes: Vec<SubTaskOutcome> = (0..total).map(|_| SubTaskOutcome::Drained).collect();

        // Stable sort: priority ordering without breaking FIFO inside a
        // priority class.
        let mut indexed: Vec<(usize, SubTask)> = tasks.into_iter().enumerate().collect();
        indexed.sort_by_key(|(_, task)| task.priority);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(usize, Result<serde_json::Value, String>)> = JoinSet::new();

        for (index, task) in indexed {
            // Dispatch gate: a cancellation drains everything still pending.
            if let Some(flag) = &cancel {
                if flag.load(Ordering::SeqCst) {
                    debug!(queue = %self.name, task = %task.id, "draining pending sub-task");
                    continue;
                }
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            join_set.spawn(async move {
                let result = task.work.await;
                drop(permit);
                (index, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, Ok(value))) => outcomes[index] = SubTaskOutcome::Completed(value),
                Ok((index, Err(message))) => outcomes[index] = SubTaskOutcome::Failed(message),
                Err(join_err) => {
                    // A panicked sub-task is a failure, not a workflow abort.
                    tracing::error!(queue = %self.name, error = %join_err, "sub-task panicked");
                }
            }
        }

        ids.drain(..).zip(outcomes).collect()
    }
}
