//! Background ingestion jobs.
//!
//! Jobs run on the rayon global pool. Submitting returns a [`TaskId`]
//! immediately and callers poll [`TaskRegistry::status`] until the task
//! leaves [`TaskState::Processing`]. A terminal state is handed out once
//! and then dropped from the registry.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;

use crate::{error::Result, ingestion::IngestReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum TaskState {
    Processing,
    Completed(IngestReport),
    Failed(String),
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    next_id: AtomicU64,
    tasks: Arc<RwLock<HashMap<TaskId, TaskState>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` in the background and return its id.
    ///
    /// A job that panics is recorded as failed rather than taking the
    /// worker down with it.
    pub fn submit<F>(&self, job: F) -> TaskId
    where
        F: FnOnce() -> Result<IngestReport> + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        record(&self.tasks, id, TaskState::Processing);
        tracing::debug!(%id, "task submitted");

        let tasks = Arc::clone(&self.tasks);
        rayon::spawn(move || {
            let state = match std::panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(report)) => TaskState::Completed(report),
                Ok(Err(e)) => TaskState::Failed(e.to_string()),
                Err(_) => TaskState::Failed("ingestion task panicked".into()),
            };
            match &state {
                TaskState::Failed(reason) => {
                    tracing::warn!(%id, "task failed: {reason}")
                }
                _ => tracing::info!(%id, "task completed"),
            }
            record(&tasks, id, state);
        });
        id
    }

    /// The state of `id`. Reading a finished state removes it, so a second
    /// call returns `None`.
    pub fn status(&self, id: TaskId) -> Option<TaskState> {
        let mut tasks =
            self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks.get(&id)?.is_finished() {
            tasks.remove(&id)
        } else {
            Some(TaskState::Processing)
        }
    }

    /// Poll `id` every `interval` until it finishes. Returns `None` for an
    /// unknown id.
    pub fn wait(&self, id: TaskId, interval: Duration) -> Option<TaskState> {
        loop {
            let state = self.status(id)?;
            if state.is_finished() {
                return Some(state);
            }
            std::thread::sleep(interval);
        }
    }
}

fn record(
    tasks: &RwLock<HashMap<TaskId, TaskState>>,
    id: TaskId,
    state: TaskState,
) {
    tasks
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id, state);
}
