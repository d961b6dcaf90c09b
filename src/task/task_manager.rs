//! Asynchronous execution front for long-running almanac operations.
//!
//! Callers register a task and get back an id immediately; a fixed-size
//! worker pool drains one FIFO queue, so a task occupies exactly one worker
//! from start to finish. Every task owns a [`TaskLog`] that captures its
//! records; concurrent tasks never write into each other's logs because the
//! handle is created per task and only threaded through that task's work.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error};

use crate::core::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Waiting,
    Running,
    Finished,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// One captured log line of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Cheaply clonable sink for one task's records.
#[derive(Debug, Clone, Default)]
pub struct TaskLog {
    records: Arc<std::sync::Mutex<Vec<LogRecord>>>,
}

impl TaskLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, level: &str, message: impl Into<String>) {
        let record = LogRecord {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.into(),
        };
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record("INFO", message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record("WARN", message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record("ERROR", message);
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Tracked state of one registered task.
#[derive(Debug)]
struct TaskState {
    description: String,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    log: TaskLog,
    done: Arc<Notify>,
}

/// Snapshot returned to callers; JSON-serializable for server surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records: Vec<LogRecord>,
}

/// One-shot unit of work a worker drives to completion.
pub type TaskPayload = BoxFuture<'static, Result<()>>;

struct QueuedTask {
    id: String,
    payload: TaskPayload,
}

/// Bounded worker pool draining a single FIFO queue.
pub struct TaskManager {
    tasks: Arc<DashMap<String, TaskState>>,
    queue_tx: mpsc::UnboundedSender<QueuedTask>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedTask>>>,
    next_id: AtomicU64,
    workers: usize,
    pool_started: AtomicBool,
}

impl TaskManager {
    pub fn new(workers: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            tasks: Arc::new(DashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            next_id: AtomicU64::new(1),
            workers: workers.max(1),
            pool_started: AtomicBool::new(false),
        }
    }

    /// Register a task and hand it to the pool. The closure receives the
    /// task's own log handle and returns the work to run. The pool is
    /// spawned lazily on first registration, so this must be called from
    /// within a Tokio runtime.
    pub fn register_task<F>(&self, description: impl Into<String>, make_payload: F) -> String
    where
        F: FnOnce(TaskLog) -> TaskPayload,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let log = TaskLog::new();
        let state = TaskState {
            description: description.into(),
            status: TaskStatus::Waiting,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            log: log.clone(),
            done: Arc::new(Notify::new()),
        };
        debug!(task_id = %id, description = %state.description, "task registered");
        self.tasks.insert(id.clone(), state);

        let payload = make_payload(log);
        // register_task is synchronous; the send only fails if the pool was
        // torn down, which cannot happen while self is alive.
        if self
            .queue_tx
            .send(QueuedTask {
                id: id.clone(),
                payload,
            })
            .is_err()
        {
            if let Some(mut entry) = self.tasks.get_mut(&id) {
                entry.status = TaskStatus::Failed;
                entry.log.error("task queue is closed");
            }
            return id;
        }
        self.ensure_pool();
        id
    }

    /// Status plus captured records, or `None` for an unknown id.
    pub fn get_status(&self, id: &str) -> Option<TaskReport> {
        self.tasks.get(id).map(|entry| TaskReport {
            id: id.to_string(),
            description: entry.description.clone(),
            status: entry.status,
            created_at: entry.created_at,
            started_at: entry.started_at,
            finished_at: entry.finished_at,
            records: entry.log.records(),
        })
    }

    /// Await a terminal state for the given task.
    pub async fn wait_for(&self, id: &str) -> Option<TaskReport> {
        loop {
            let done = self.tasks.get(id)?.done.clone();
            let notified = done.notified();
            tokio::pin!(notified);
            // Register as a waiter before re-checking the status; a
            // notify_waiters between the check and the first poll would
            // otherwise be lost.
            notified.as_mut().enable();
            {
                let entry = self.tasks.get(id)?;
                if entry.status.is_terminal() {
                    break;
                }
            }
            notified.as_mut().await;
        }
        self.get_status(id)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|e| e.key().clone()).collect()
    }

    fn ensure_pool(&self) {
        if self.pool_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let receiver = match self.queue_rx.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(receiver) = receiver else {
            return;
        };
        let receiver = Arc::new(Mutex::new(receiver));
        debug!(workers = self.workers, "starting task worker pool");
        for worker in 0..self.workers {
            let receiver = Arc::clone(&receiver);
            let tasks = Arc::clone(&self.tasks);
            tokio::spawn(async move {
                worker_loop(worker, receiver, tasks).await;
            });
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
    tasks: Arc<DashMap<String, TaskState>>,
) {
    loop {
        let next = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let Some(queued) = next else {
            break;
        };

        if let Some(mut entry) = tasks.get_mut(&queued.id) {
            entry.status = TaskStatus::Running;
            entry.started_at = Some(Utc::now());
        }
        debug!(task_id = %queued.id, worker, "task started");

        let outcome = queued.payload.await;

        let done = if let Some(mut entry) = tasks.get_mut(&queued.id) {
            match outcome {
                Ok(()) => {
                    entry.status = TaskStatus::Finished;
                    debug!(task_id = %queued.id, worker, "task finished");
                }
                Err(ref e) => {
                    entry.status = TaskStatus::Failed;
                    entry.log.error(format!("task failed: {}", e));
                    error!(
                        task_id = %queued.id,
                        worker,
                        category = e.category(),
                        error = %e,
                        "task failed"
                    );
                }
            }
            entry.finished_at = Some(Utc::now());
            Some(entry.done.clone())
        } else {
            None
        };
        if let Some(done) = done {
            done.notify_waiters();
        }
    }
    debug!(worker, "task worker stopped");
}
