//! Async task manager: background execution of dispatched action batches
//! with polling, deferred data fetches, and retention-based cleanup.
//!
//! Callers enqueue work and poll status; they never block on completion and
//! never see an exception — a task body that fails marks the task `failed`
//! with diagnostic warnings. Within one task, dispatch happens-before the
//! best-effort page fetch, which happens-before deferred fetches, which
//! happen-before the terminal transition, so a poller observing a terminal
//! status sees a fully-populated result.

use crate::config::TaskConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Named deferred data-retrieval future, run once its task settles.
pub type DeferredFetch = BoxFuture<'static, anyhow::Result<Value>>;

/// Best-effort page-content side channel, attempted after every dispatch.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self) -> anyhow::Result<String>;
}

/// Task lifecycle. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Immutable status snapshot handed to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Option<Map<String, Value>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

struct TaskRecord {
    status: TaskStatus,
    /// Set synchronously at submission so a double submit is refused even
    /// before the worker makes the `running` transition.
    submitted: bool,
    result: Option<Map<String, Value>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    deferred: Vec<(String, DeferredFetch)>,
}

impl TaskRecord {
    fn snapshot(&self, task_id: &str) -> TaskSnapshot {
        TaskSnapshot {
            task_id: task_id.to_string(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

struct Inner {
    tasks: Mutex<HashMap<String, TaskRecord>>,
    workers: Arc<Semaphore>,
    id_pool: Mutex<VecDeque<String>>,
    replenishing: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    page_fetcher: Option<Arc<dyn PageFetcher>>,
    config: TaskConfig,
}

/// Task table owner. Cheap to clone; all clones share one table.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(config: TaskConfig) -> Self {
        Self::with_page_fetcher(config, None)
    }

    pub fn with_page_fetcher(
        config: TaskConfig,
        page_fetcher: Option<Arc<dyn PageFetcher>>,
    ) -> Self {
        let workers = config.workers.max(1);
        let mut pool = VecDeque::with_capacity(config.id_pool_size);
        for _ in 0..config.id_pool_size {
            pool.push_back(Uuid::new_v4().to_string());
        }
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(workers)),
                id_pool: Mutex::new(pool),
                replenishing: AtomicBool::new(false),
                handles: Mutex::new(Vec::new()),
                page_fetcher,
                config,
            }),
        }
    }

    /// Create a fresh `pending` task and return its identifier.
    pub fn create_task(&self) -> String {
        let task_id = self.next_task_id();
        let record = TaskRecord {
            status: TaskStatus::Pending,
            submitted: false,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deferred: Vec::new(),
        };
        self.inner.tasks.lock().insert(task_id.clone(), record);
        tracing::debug!(task_id = %task_id, "task created");
        task_id
    }

    /// Schedule background execution of an action batch for a pending task.
    ///
    /// Returns `false` when the task is unknown or already submitted. The
    /// dispatch function receives `{actions, ...extra}` and its outcome is
    /// normalized into the task result; a dispatch error or panic marks the
    /// task `failed` without ever propagating to pollers.
    pub fn submit_execution<F, Fut>(
        &self,
        task_id: &str,
        dispatch: F,
        actions: Vec<Value>,
        extra: Option<Map<String, Value>>,
    ) -> bool
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        {
            let mut tasks = self.inner.tasks.lock();
            let Some(record) = tasks.get_mut(task_id) else {
                tracing::warn!(task_id = %task_id, "submit refused: unknown task");
                return false;
            };
            if record.status != TaskStatus::Pending || record.submitted {
                tracing::warn!(task_id = %task_id, status = ?record.status, "submit refused: not pending");
                return false;
            }
            record.submitted = true;
        }

        let inner = self.inner.clone();
        let task_id = task_id.to_string();
        let handle = tokio::spawn(async move {
            let _permit = match inner.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // pool closed during shutdown
            };
            inner.mark_running(&task_id);

            let mut payload = Map::new();
            payload.insert("actions".into(), Value::Array(actions));
            if let Some(extra) = extra {
                payload.extend(extra);
            }

            let outcome = AssertUnwindSafe(dispatch(Value::Object(payload)))
                .catch_unwind()
                .await;
            let (mut result, error) = match outcome {
                Ok(Ok(value)) => (normalize_result(value), None),
                Ok(Err(err)) => failed_result(&format!("{err:#}")),
                Err(panic) => failed_result(&panic_message(&panic)),
            };
            fold_error_into_warnings(&mut result);

            inner.attach_page_content(&mut result).await;
            inner.finish_with_deferred(&task_id, result, error).await;
        });
        self.inner.handles.lock().push(handle);
        true
    }

    /// Register named data fetches to run once the task settles. If the task
    /// has already settled, they run immediately. Each result lands in
    /// `result[name]`; a failing fetch records `null` without affecting the
    /// others.
    pub fn submit_parallel_data_fetch(
        &self,
        task_id: &str,
        fetches: Vec<(String, DeferredFetch)>,
    ) -> bool {
        let fetches = {
            let mut tasks = self.inner.tasks.lock();
            let Some(record) = tasks.get_mut(task_id) else {
                return false;
            };
            if !record.status.is_terminal() {
                record.deferred.extend(fetches);
                return true;
            }
            fetches
        };

        // Task already settled: run the fetches now and merge their results.
        let inner = self.inner.clone();
        let task_id = task_id.to_string();
        let handle = tokio::spawn(async move {
            let mut fetched = Map::new();
            run_fetches(fetches, &mut fetched).await;
            inner.merge_fetched(&task_id, fetched);
        });
        self.inner.handles.lock().push(handle);
        true
    }

    /// Poll a task's status; `None` for unknown (or cleaned-up) tasks.
    pub fn get_task_status(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.inner
            .tasks
            .lock()
            .get(task_id)
            .map(|record| record.snapshot(task_id))
    }

    pub fn is_task_complete(&self, task_id: &str) -> bool {
        self.inner
            .tasks
            .lock()
            .get(task_id)
            .is_some_and(|record| record.status.is_terminal())
    }

    /// Remove terminal tasks older than the retention window. Returns the
    /// number removed.
    pub fn cleanup_old_tasks(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.inner.config.retention_secs as i64);
        let mut tasks = self.inner.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, record| {
            !(record.status.is_terminal()
                && record.completed_at.is_some_and(|done| done < cutoff))
        });
        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!(removed, "cleaned up old tasks");
        }
        removed
    }

    /// Drain all background work. New submissions during shutdown may be
    /// dropped.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn next_task_id(&self) -> String {
        let (task_id, low) = {
            let mut pool = self.inner.id_pool.lock();
            let id = pool
                .pop_front()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            (id, pool.len() < self.inner.config.id_pool_low_water)
        };
        if low {
            self.replenish_id_pool();
        }
        task_id
    }

    /// Top up the ID pool in the background. Purely a latency optimization;
    /// falling back to inline generation is always correct.
    fn replenish_id_pool(&self) {
        if self.inner.replenishing.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = self.inner.clone();
        let refill = move || {
            let target = inner.config.id_pool_size;
            loop {
                let mut pool = inner.id_pool.lock();
                if pool.len() >= target {
                    break;
                }
                pool.push_back(Uuid::new_v4().to_string());
            }
            inner.replenishing.store(false, Ordering::Release);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { refill() });
            }
            Err(_) => refill(),
        }
    }
}

impl Inner {
    fn mark_running(&self, task_id: &str) {
        if let Some(record) = self.tasks.lock().get_mut(task_id) {
            record.status = TaskStatus::Running;
            record.started_at = Some(Utc::now());
        }
    }

    /// Best-effort page-content side channel; never fatal to the task.
    async fn attach_page_content(&self, result: &mut Map<String, Value>) {
        let Some(fetcher) = &self.page_fetcher else {
            return;
        };
        match fetcher.fetch_html().await {
            Ok(html) => {
                let missing = result
                    .get("html")
                    .and_then(Value::as_str)
                    .is_none_or(str::is_empty);
                if missing {
                    result.insert("html".into(), Value::String(html));
                }
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "best-effort page fetch failed");
            }
        }
    }

    /// Run deferred fetches, merge their results, and make the terminal
    /// transition. The drain loop re-checks under the lock so a fetch
    /// registered while earlier fetches were running is still honored before
    /// the task settles.
    async fn finish_with_deferred(
        &self,
        task_id: &str,
        mut result: Map<String, Value>,
        error: Option<String>,
    ) {
        loop {
            let batch: Vec<(String, DeferredFetch)> = {
                let mut tasks = self.tasks.lock();
                let Some(record) = tasks.get_mut(task_id) else {
                    return;
                };
                if record.deferred.is_empty() {
                    record.result = Some(result);
                    record.error = error.clone();
                    record.status = if error.is_some() {
                        TaskStatus::Failed
                    } else {
                        TaskStatus::Completed
                    };
                    record.completed_at = Some(Utc::now());
                    return;
                }
                record.deferred.drain(..).collect()
            };
            run_fetches(batch, &mut result).await;
        }
    }

    /// Merge late fetch results into an already-settled task.
    fn merge_fetched(&self, task_id: &str, fetched: Map<String, Value>) {
        let mut tasks = self.tasks.lock();
        if let Some(record) = tasks.get_mut(task_id) {
            record
                .result
                .get_or_insert_with(Map::new)
                .extend(fetched);
        }
    }
}

async fn run_fetches(batch: Vec<(String, DeferredFetch)>, out: &mut Map<String, Value>) {
    for (name, fetch) in batch {
        let value = match AssertUnwindSafe(fetch).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                tracing::warn!(fetch = %name, error = %format!("{err:#}"), "deferred fetch failed");
                Value::Null
            }
            Err(panic) => {
                tracing::warn!(fetch = %name, error = %panic_message(&panic), "deferred fetch panicked");
                Value::Null
            }
        };
        out.insert(name, value);
    }
}

/// Dispatch results must be maps; anything else is wrapped so the poller
/// still sees a dict-shaped result.
fn normalize_result(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    }
}

fn failed_result(detail: &str) -> (Map<String, Value>, Option<String>) {
    let mut map = Map::new();
    map.insert("success".into(), Value::Bool(false));
    map.insert(
        "warnings".into(),
        Value::Array(vec![Value::String(format!(
            "ERROR:auto:Async execution failed - {detail}"
        ))]),
    );
    (map, Some(detail.to_string()))
}

/// Fold a result's `error` field into `warnings` and clear it, so pollers
/// read one channel for diagnostics.
fn fold_error_into_warnings(result: &mut Map<String, Value>) {
    let Some(error) = result.remove("error") else {
        return;
    };
    if error.is_null() {
        return;
    }
    let rendered = match &error {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    };
    let warnings = result
        .entry("warnings")
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(items) = warnings {
        items.push(Value::String(format!("ERROR:auto:{rendered}")));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}
