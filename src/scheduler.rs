// src/scheduler.rs
//! Guarded task scheduler: at most one concurrent execution per task name,
//! no new work after shutdown, and failures that never reach the caller.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use metrics::counter;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// A named unit of domain-loading work. Identity is the name.
pub struct SourceTask {
    pub name: String,
    run: Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>,
}

impl SourceTask {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move || run().boxed()),
        }
    }
}

impl std::fmt::Debug for SourceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceTask").field("name", &self.name).finish()
    }
}

/// How a guarded run settled. Informational only: a failed task has already
/// been logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    SkippedInFlight,
    SkippedDestroyed,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::SkippedInFlight => "skipped_in_flight",
            TaskOutcome::SkippedDestroyed => "skipped_destroyed",
        }
    }

    pub fn ran(&self) -> bool {
        matches!(self, TaskOutcome::Completed | TaskOutcome::Failed(_))
    }
}

#[derive(Debug, Default)]
struct Inner {
    in_flight: Mutex<HashSet<String>>,
    destroyed: CancellationToken,
}

/// Cheap to clone; clones share the in-flight set and the destroyed flag.
#[derive(Debug, Clone, Default)]
pub struct GuardedScheduler {
    inner: Arc<Inner>,
}

/// Holds a task name in the in-flight set; released on drop, so every exit
/// path (return, error, panic, cancellation of the awaiting future) frees it.
struct InFlightSlot {
    inner: Arc<Inner>,
    name: String,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        let mut set = self.inner.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.name);
    }
}

impl GuardedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the process-wide destroyed flag. Running tasks are not aborted;
    /// they observe the flag at their own continuation points.
    pub fn destroy(&self) {
        self.inner.destroyed.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.is_cancelled()
    }

    /// Token cancelled by [`destroy`](Self::destroy), for calls that want to
    /// abort promptly.
    pub fn destroyed_token(&self) -> CancellationToken {
        self.inner.destroyed.clone()
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        let set = self.inner.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        set.contains(name)
    }

    pub fn in_flight(&self) -> Vec<String> {
        let set = self.inner.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = set.iter().cloned().collect();
        names.sort();
        names
    }

    fn try_acquire(&self, name: &str) -> Option<InFlightSlot> {
        let mut set = self.inner.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(name.to_string()) {
            return None;
        }
        Some(InFlightSlot {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        })
    }

    /// Run `operation` unless the scheduler is destroyed or a task with the
    /// same name is in flight. Never returns an error.
    pub async fn run_guarded<F, Fut>(&self, name: &str, operation: F) -> TaskOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if self.is_destroyed() {
            tracing::debug!(target: "scheduler", task = name, "skipped: destroyed");
            return self.settle(TaskOutcome::SkippedDestroyed);
        }
        let Some(_slot) = self.try_acquire(name) else {
            tracing::debug!(target: "scheduler", task = name, "skipped: already in flight");
            return self.settle(TaskOutcome::SkippedInFlight);
        };

        // The closure runs inside the guarded future so a panic while building
        // the operation is contained too.
        let outcome = match AssertUnwindSafe(async move { operation().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(e)) => {
                tracing::warn!(target: "scheduler", task = name, error = %format!("{e:#}"), "task failed");
                TaskOutcome::Failed(format!("{e:#}"))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(target: "scheduler", task = name, panic = %msg, "task panicked");
                TaskOutcome::Failed(msg)
            }
        };
        self.settle(outcome)
    }

    /// Fan out every task and wait until all have settled, whatever their
    /// individual outcome.
    pub async fn run_all(&self, tasks: Vec<SourceTask>) -> Vec<(String, TaskOutcome)> {
        let runs = tasks.into_iter().map(|task| {
            let SourceTask { name, run } = task;
            async move {
                let outcome = self.run_guarded(&name, run).await;
                (name, outcome)
            }
        });
        join_all(runs).await
    }

    fn settle(&self, outcome: TaskOutcome) -> TaskOutcome {
        counter!("ingest_tasks_total", "outcome" => outcome.label()).increment(1);
        outcome
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
