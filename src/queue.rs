// src/queue.rs
use crate::{
    HandlerRegistry, JobContext, LuaScripts, Result, Store, Task, TaskId, TaskOptions,
    MAX_PRIORITY,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, instrument, warn};

/// How often the sweeper moves due delayed tasks to their bands.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Blocking-dequeue bound used by the dispatch loop.
pub const DISPATCH_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Completed archive entries are kept for a day, failed ones for a week.
pub const COMPLETED_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const FAILED_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const KEY_PREFIX: &str = "mosaiq";

/// One logical queue: 11 ready bands (one per priority), a delay set and two
/// archives, all under a key root no other queue shares.
pub struct TaskQueue {
    name: String,
    store: Store,
    scripts: LuaScripts,
    key_root: String,
    /// Band keys ordered p10 down to p0; BRPOP scans them in this order,
    /// which is what gives strict priority ordering per attempt.
    band_keys: Vec<String>,
    shutdown_tx: broadcast::Sender<()>,
    is_closed: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Dedicated connection for BRPOP, reused across polls and re-established
    /// after a pop error.
    blocking_conn: tokio::sync::Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl TaskQueue {
    pub fn new(store: Store, name: impl Into<String>) -> Self {
        let name = name.into();
        let key_root = format!("{KEY_PREFIX}:queue:{name}");
        let band_keys = (0..=MAX_PRIORITY)
            .rev()
            .map(|p| format!("{key_root}:p{p}"))
            .collect();
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            name,
            store,
            scripts: LuaScripts::new(),
            key_root,
            band_keys,
            shutdown_tx,
            is_closed: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
            blocking_conn: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn band_key(&self, priority: u8) -> String {
        format!("{}:p{}", self.key_root, priority)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.key_root)
    }

    fn completed_key(&self) -> String {
        format!("{}:completed", self.key_root)
    }

    fn failed_key(&self) -> String {
        format!("{}:failed", self.key_root)
    }

    /// Build a task from type + payload + options and persist it. A task
    /// scheduled in the future lands in the delay set; anything else goes
    /// straight onto the ready band for its priority. On error the task
    /// never enters the queue.
    pub async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        options: TaskOptions,
    ) -> Result<TaskId> {
        let mut task = Task::new(task_type, payload);
        options.apply(&mut task);

        let raw = serde_json::to_string(&task)?;
        let now = Utc::now();

        match task.scheduled_at {
            Some(at) if at > now => {
                self.store
                    .zset_add(&self.delayed_key(), &raw, at.timestamp())
                    .await?;
            }
            _ => {
                self.store
                    .push_left(&self.band_key(task.priority), &raw)
                    .await?;
            }
        }

        info!(
            task_id = %task.id,
            task_type,
            priority = task.priority,
            queue = %self.name,
            deferred = task.is_deferred(now),
            "task enqueued"
        );

        Ok(task.id)
    }

    /// Pop the highest-priority ready task, blocking up to `timeout`.
    ///
    /// One BRPOP across all 11 band keys, highest first: a task at priority
    /// P is never returned while a higher band holds a ready task, and each
    /// band is FIFO. Returns `Ok(None)` when the timeout elapses.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>> {
        let mut guard = self.blocking_conn.lock().await;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.store.blocking_connection().await?,
        };

        match self
            .store
            .blocking_pop_right(&mut conn, &self.band_keys, timeout)
            .await
        {
            Ok(popped) => {
                *guard = Some(conn);
                match popped {
                    Some((_band, raw)) => {
                        let task: Task = serde_json::from_str(&raw)?;
                        Ok(Some(task))
                    }
                    None => Ok(None),
                }
            }
            // Connection dropped; the next call re-establishes it.
            Err(e) => Err(e),
        }
    }

    /// Move every delayed task whose schedule time has arrived onto its
    /// priority band. Atomic per task, at-most-once even with concurrent
    /// sweepers across worker instances. Returns how many moved.
    pub async fn process_delayed(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut conn = self.store.connection();

        let moved: i64 = self
            .scripts
            .move_delayed
            .key(self.delayed_key())
            .arg(now)
            .arg(&self.key_root)
            .invoke_async(&mut conn)
            .await?;

        Ok(moved as usize)
    }

    /// Stamp completion and archive the task for [`COMPLETED_TTL`].
    pub async fn mark_completed(&self, task: &mut Task) -> Result<()> {
        let now = Utc::now();
        task.processed_at = Some(now);

        let raw = serde_json::to_string(task)?;
        let key = self.completed_key();
        self.store.zset_add(&key, &raw, now.timestamp()).await?;
        self.store.expire_key(&key, COMPLETED_TTL).await?;

        info!(task_id = %task.id, queue = %self.name, "task completed");
        Ok(())
    }

    /// Record a failure. With retries remaining the task goes back through
    /// the delayed path after a quadratic backoff (1, 4, 9, ... minutes);
    /// once exhausted it lands in the failed archive for [`FAILED_TTL`].
    /// The task was already popped from its band, so it is never in an
    /// archive and a ready/delay structure at once.
    pub async fn mark_failed(&self, task: &mut Task, err: &str) -> Result<()> {
        let now = Utc::now();
        task.error = Some(err.to_string());

        if task.retries < task.max_retries {
            task.retries += 1;
            let backoff = Task::retry_backoff(task.retries);
            task.scheduled_at = Some(now + backoff);
            task.processed_at = None;

            let raw = serde_json::to_string(task)?;
            let score = now.timestamp() + backoff.num_seconds();
            self.store.zset_add(&self.delayed_key(), &raw, score).await?;

            warn!(
                task_id = %task.id,
                queue = %self.name,
                retry = task.retries,
                max_retries = task.max_retries,
                backoff_secs = backoff.num_seconds(),
                error = err,
                "task failed, retry scheduled"
            );
        } else {
            task.processed_at = Some(now);

            let raw = serde_json::to_string(task)?;
            let key = self.failed_key();
            self.store.zset_add(&key, &raw, now.timestamp()).await?;
            self.store.expire_key(&key, FAILED_TTL).await?;

            error!(
                task_id = %task.id,
                queue = %self.name,
                retries = task.retries,
                error = err,
                "task failed permanently"
            );
        }

        Ok(())
    }

    /// Start the two worker loops for this queue: a sweeper moving due
    /// delayed tasks every [`SWEEP_INTERVAL`], and a dispatch loop that
    /// blocks on [`TaskQueue::dequeue`] and runs one handler at a time.
    /// A task whose type has no handler is failed immediately and still
    /// consumes the normal backoff schedule.
    pub fn start_worker(self: Arc<Self>, registry: Arc<HandlerRegistry>) {
        info!(
            queue = %self.name,
            task_types = ?registry.task_types(),
            "starting worker"
        );

        let sweep = Self::spawn_sweep_loop(Arc::clone(&self));
        let dispatch = Self::spawn_dispatch_loop(Arc::clone(&self), registry);

        let mut handles = self.handles.lock().expect("handles lock poisoned");
        handles.push(sweep);
        handles.push(dispatch);
    }

    fn spawn_sweep_loop(queue: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = queue.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match queue.process_delayed().await {
                            Ok(moved) if moved > 0 => {
                                info!(queue = %queue.name, moved, "swept delayed tasks");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(queue = %queue.name, error = %e, "delayed sweep failed");
                            }
                        }
                    }
                }
            }

            info!(queue = %queue.name, "sweep loop stopped");
        })
    }

    fn spawn_dispatch_loop(queue: Arc<Self>, registry: Arc<HandlerRegistry>) -> JoinHandle<()> {
        let mut shutdown_rx = queue.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if queue.is_closed.load(Ordering::SeqCst) {
                    break;
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    // Shutdown arriving mid-pop cancels the dequeue future;
                    // a task Redis popped in that window is dropped.
                    // Delivery is at-most-once per attempt.
                    popped = queue.dequeue(DISPATCH_POLL_TIMEOUT) => match popped {
                        Ok(Some(task)) => queue.run_task(&registry, task).await,
                        Ok(None) => {}
                        Err(e) => {
                            // Nothing was popped, so nothing is lost.
                            error!(queue = %queue.name, error = %e, "dequeue failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }

            info!(queue = %queue.name, "dispatch loop stopped");
        })
    }

    #[instrument(skip_all, fields(queue = %self.name, task_id = %task.id, task_type = %task.task_type))]
    async fn run_task(&self, registry: &HandlerRegistry, mut task: Task) {
        let outcome = match registry.get(&task.task_type) {
            Some(handler) => {
                let ctx = JobContext::new(&task, self.name.as_str(), Arc::clone(&self.is_closed));
                match handler.handle(&ctx, &task).await {
                    Ok(()) => self.mark_completed(&mut task).await,
                    Err(e) => self.mark_failed(&mut task, &e.to_string()).await,
                }
            }
            None => {
                let msg = format!("unknown task type: {}", task.task_type);
                self.mark_failed(&mut task, &msg).await
            }
        };

        if let Err(e) = outcome {
            error!(error = %e, "failed to record task outcome");
        }
    }

    /// Signal both loops to stop. The in-flight handler, if any, finishes in
    /// the background; `close` does not wait for it.
    pub fn close(&self) {
        self.is_closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        self.handles.lock().expect("handles lock poisoned").clear();
        info!(queue = %self.name, "queue closed");
    }

    /// Per-queue counts by direct store inspection.
    pub async fn stats(&self) -> Result<QueueStats> {
        let mut pending = 0u64;
        for priority in 0..=MAX_PRIORITY {
            pending += self.store.list_len(&self.band_key(priority)).await?;
        }

        Ok(QueueStats {
            name: self.name.clone(),
            pending_tasks: pending,
            delayed_tasks: self.store.zset_card(&self.delayed_key()).await?,
            completed_tasks: self.store.zset_card(&self.completed_key()).await?,
            failed_tasks: self.store.zset_card(&self.failed_key()).await?,
        })
    }

    /// Drop archive entries past their TTL, independent of Redis key expiry.
    /// Returns `(completed_removed, failed_removed)`.
    pub async fn purge_archives(&self) -> Result<(u64, u64)> {
        let now = Utc::now().timestamp();

        let completed_cutoff = now - COMPLETED_TTL.as_secs() as i64;
        let failed_cutoff = now - FAILED_TTL.as_secs() as i64;

        let completed = self
            .store
            .zset_remove_below(&self.completed_key(), completed_cutoff)
            .await?;
        let failed = self
            .store
            .zset_remove_below(&self.failed_key(), failed_cutoff)
            .await?;

        if completed > 0 || failed > 0 {
            info!(queue = %self.name, completed, failed, "purged stale archive entries");
        }

        Ok((completed, failed))
    }
}

/// Statistics surface for a dashboard or health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub name: String,
    pub pending_tasks: u64,
    pub delayed_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}
