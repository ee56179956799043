//! Bounded-concurrency task queue with rolling refill.
//!
//! At most `max_concurrent` tasks run at once. Whenever one settles, the next
//! pending task is dispatched immediately, so a slow task never holds a
//! whole batch back. Each task runs through [`execute_with_retry`].

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{Instrument, debug, info_span, trace};

use super::retry::{DEFAULT_MAX_ATTEMPTS, execute_with_retry};
use crate::cepik::FetchError;

/// Final result of one task, after retries.
pub type TaskOutcome<T> = Result<T, FetchError>;

type Work<T> = Box<dyn FnMut() -> BoxFuture<'static, TaskOutcome<T>> + Send>;
type SettleHandler<T> = Box<dyn FnOnce(TaskOutcome<T>) + Send>;
pub type ProgressCallback = Arc<dyn Fn(&QueueProgress) + Send + Sync>;

/// A unit of work identified by `id`. `work` is invoked once per attempt.
pub struct FetchTask<T> {
    id: String,
    max_attempts: u32,
    work: Work<T>,
    on_settled: Option<SettleHandler<T>>,
}

impl<T> FetchTask<T> {
    pub fn new<F>(id: impl Into<String>, work: F) -> Self
    where
        F: FnMut() -> BoxFuture<'static, TaskOutcome<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            work: Box::new(work),
            on_settled: None,
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Called exactly once with the task's outcome, before the queue records
    /// the task as settled.
    pub fn on_settled(mut self, handler: impl FnOnce(TaskOutcome<T>) + Send + 'static) -> Self {
        self.on_settled = Some(Box::new(handler));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> fmt::Debug for FetchTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchTask")
            .field("id", &self.id)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProgress {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub percent_complete: u8,
}

impl QueueProgress {
    /// Nothing running and nothing waiting.
    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.queued == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub completed: usize,
    pub failed: usize,
    /// Failed task id → error message, in failure order.
    pub errors: IndexMap<String, String>,
}

struct QueueState<T> {
    pending: VecDeque<FetchTask<T>>,
    in_progress: HashSet<String>,
    completed: HashSet<String>,
    failed: IndexMap<String, String>,
    active: usize,
    total: usize,
    started: bool,
}

impl<T> QueueState<T> {
    fn progress(&self) -> QueueProgress {
        let completed = self.completed.len();
        let percent_complete = if self.total == 0 {
            0
        } else {
            ((completed as f64 / self.total as f64) * 100.0).round() as u8
        };
        QueueProgress {
            queued: self.pending.len(),
            active: self.active,
            completed,
            failed: self.failed.len(),
            total: self.total,
            percent_complete,
        }
    }
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    max_concurrent: usize,
    progress: watch::Sender<QueueProgress>,
    on_progress: Option<ProgressCallback>,
}

pub struct RequestQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> RequestQueue<T> {
    pub fn new(max_concurrent: usize) -> Self {
        Self::build(max_concurrent, None)
    }

    pub fn with_progress_callback(max_concurrent: usize, callback: ProgressCallback) -> Self {
        Self::build(max_concurrent, Some(callback))
    }

    fn build(max_concurrent: usize, on_progress: Option<ProgressCallback>) -> Self {
        let (progress, _) = watch::channel(QueueProgress::default());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    in_progress: HashSet::new(),
                    completed: HashSet::new(),
                    failed: IndexMap::new(),
                    active: 0,
                    total: 0,
                    started: false,
                }),
                max_concurrent: max_concurrent.max(1),
                progress,
                on_progress,
            }),
        }
    }

    /// Enqueue a task. It runs once the queue is started and a slot is free.
    pub fn add(&self, task: FetchTask<T>) {
        let snapshot = {
            let mut state = self.lock();
            trace!(task_id = %task.id, "Task queued");
            state.pending.push_back(task);
            state.total += 1;
            self.publish(&state)
        };
        self.notify(&snapshot);
        self.dispatch();
    }

    /// Begin dispatching, filling up to `max_concurrent` slots.
    pub fn start(&self) {
        self.lock().started = true;
        self.dispatch();
    }

    pub fn stats(&self) -> QueueProgress {
        self.shared.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueProgress> {
        self.shared.progress.subscribe()
    }

    /// Resolve once nothing is running and nothing is pending.
    ///
    /// Never resolves for a queue holding tasks that was not started.
    pub async fn wait_for_all(&self) -> QueueSummary {
        let mut rx = self.shared.progress.subscribe();
        // The sender lives in `self.shared`, so the channel cannot close here.
        let _ = rx.wait_for(QueueProgress::is_idle).await;

        let state = self.lock();
        QueueSummary {
            completed: state.completed.len(),
            failed: state.failed.len(),
            errors: state.failed.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // Bookkeeping stays consistent even if a holder panicked.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send a snapshot while still holding the lock, so receivers never see
    /// counters go backwards.
    fn publish(&self, state: &QueueState<T>) -> QueueProgress {
        let snapshot = state.progress();
        self.shared.progress.send_replace(snapshot.clone());
        snapshot
    }

    fn notify(&self, snapshot: &QueueProgress) {
        if let Some(callback) = &self.shared.on_progress {
            callback(snapshot);
        }
    }

    fn dispatch(&self) {
        let mut launched = Vec::new();
        let snapshot = {
            let mut state = self.lock();
            if !state.started {
                return;
            }
            let mut skipped = false;
            while state.active < self.shared.max_concurrent {
                let Some(task) = state.pending.pop_front() else {
                    break;
                };
                if state.completed.contains(&task.id) || state.in_progress.contains(&task.id) {
                    debug!(task_id = %task.id, "Skipping duplicate task");
                    skipped = true;
                    continue;
                }
                state.in_progress.insert(task.id.clone());
                state.active += 1;
                launched.push(task);
            }
            if launched.is_empty() && !skipped {
                return;
            }
            self.publish(&state)
        };
        self.notify(&snapshot);

        for task in launched {
            let span = info_span!("task", task_id = %task.id);
            let queue = self.clone();
            tokio::spawn(async move { queue.run(task).await }.instrument(span));
        }
    }

    async fn run(self, task: FetchTask<T>) {
        let FetchTask {
            id,
            max_attempts,
            mut work,
            on_settled,
        } = task;

        let outcome = execute_with_retry(&id, max_attempts, || work()).await;
        let error = outcome.as_ref().err().map(ToString::to_string);
        if let Some(handler) = on_settled {
            handler(outcome);
        }

        let snapshot = {
            let mut state = self.lock();
            state.active -= 1;
            state.in_progress.remove(&id);
            match error {
                None => {
                    state.completed.insert(id);
                }
                Some(message) => {
                    state.failed.insert(id, message);
                }
            }
            self.publish(&state)
        };
        self.notify(&snapshot);
        self.dispatch();
    }
}
