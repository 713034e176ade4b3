//! Worker pool that drains a [`TaskList`] with retry and partial-failure bookkeeping
//!
//! One tokio task is spawned per sync task. The concurrency ceiling is not
//! enforced by limiting spawns but by the shared [`ConcurrencyGate`] each task
//! body draws from, so nested fan-out inside a task shares the same ceiling.

use super::{RetryPolicy, TaskList, TaskRef};
use crate::concurrency::ConcurrencyGate;
use crate::error::{Result, SyncError};
use crate::logging::Logger;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

pub struct Scheduler {
    kind: String,
    gate: ConcurrencyGate,
    policy: RetryPolicy,
    logger: Logger,
}

impl Scheduler {
    /// `kind` names the run in the summary line ("git", "image")
    pub fn new(kind: &str, gate: ConcurrencyGate, policy: RetryPolicy, logger: Logger) -> Self {
        Self {
            kind: kind.to_string(),
            gate,
            policy,
            logger,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Drain `tasks`, running each with retry. A task that exhausts its
    /// retries lands in the failed partition; its siblings are unaffected.
    pub async fn run(&self, tasks: &TaskList) -> SyncReport {
        let start = Instant::now();
        let succeeded = Arc::new(TaskList::new());
        let failed = Arc::new(TaskList::new());
        let failures = Arc::new(Mutex::new(Vec::new()));

        self.logger.info(&format!(
            "run sync task with {} processes",
            self.gate.limit()
        ));

        let mut workers = JoinSet::new();
        let mut total = 0;

        for task in tasks.drain() {
            total += 1;
            workers.spawn(run_one(
                task,
                self.policy.clone(),
                self.logger.clone(),
                Arc::clone(&succeeded),
                Arc::clone(&failed),
                Arc::clone(&failures),
            ));
        }

        while let Some(joined) = workers.join_next().await {
            // run_one records its own outcome and catches panics
            if let Err(err) = joined {
                self.logger.error(&format!("sync worker aborted: {}", err));
            }
        }

        let elapsed = start.elapsed();
        let failures = std::mem::take(&mut *lock(&failures));
        let report = SyncReport {
            kind: self.kind.clone(),
            total,
            succeeded,
            failed,
            failures,
            elapsed,
        };
        report.log_summary(&self.logger);
        report
    }
}

async fn run_one(
    task: TaskRef,
    policy: RetryPolicy,
    logger: Logger,
    succeeded: Arc<TaskList>,
    failed: Arc<TaskList>,
    failures: Arc<Mutex<Vec<(String, SyncError)>>>,
) {
    let name = task.name().to_string();
    logger.info(&format!("start sync task: {}", name));

    let attempt = policy.run(&name, &logger, || {
        let task = Arc::clone(&task);
        async move {
            match AssertUnwindSafe(task.run()).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(SyncError::Panicked(panic_message(panic.as_ref()))),
            }
        }
    });

    match attempt.await {
        Ok(()) => {
            logger.success(&format!("run sync task {} succeed", name));
            succeeded.add(task);
        }
        Err(err) => {
            let err = err.in_task(&name);
            logger.error(&format!("run sync task {} failed: {}", name, err));
            failed.add(task);
            lock(&failures).push((name, err));
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of one scheduler run
#[derive(Debug)]
pub struct SyncReport {
    pub kind: String,
    pub total: usize,
    pub succeeded: Arc<TaskList>,
    pub failed: Arc<TaskList>,
    /// `(task name, last error)` in completion order
    pub failures: Vec<(String, SyncError)>,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Escalate failed tasks into an error. Callers that tolerate partial
    /// failure just inspect the report instead.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::TasksFailed {
                failed: self.failed_count(),
                total: self.total,
            })
        }
    }

    fn log_summary(&self, logger: &Logger) {
        for name in self.failed.names() {
            logger.warning(&format!("task {} failed", name));
        }
        logger.info(&format!(
            "{} sync finished, {}/{} task failed, cost {}",
            self.kind,
            self.failed_count(),
            self.total,
            logger.format_duration(self.elapsed)
        ));
    }
}
