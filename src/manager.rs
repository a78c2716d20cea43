// src/manager.rs
use crate::{HandlerRegistry, QueueStats, Result, Store, TaskQueue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Always-present queue for plain image processing.
pub const IMAGES_QUEUE: &str = "images";
/// Always-present queue for AI stylization.
pub const AI_IMAGES_QUEUE: &str = "ai_images";

/// How often archives are trimmed past their TTL.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Owns the named task queues and their workers' lifetimes. Explicitly
/// constructed and torn down with [`QueueManager::stop_all`]; there is no
/// ambient singleton.
pub struct QueueManager {
    store: Store,
    queues: Mutex<HashMap<String, Arc<TaskQueue>>>,
    shutdown_tx: broadcast::Sender<()>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
    // Handed to the cleanup loop so it never keeps a stopped manager alive.
    self_weak: Weak<QueueManager>,
}

impl QueueManager {
    /// Builds the manager with the two built-in queues already registered.
    pub fn new(store: Store) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let manager = Arc::new_cyclic(|weak| Self {
            store,
            queues: Mutex::new(HashMap::new()),
            shutdown_tx,
            cleanup_handle: Mutex::new(None),
            self_weak: weak.clone(),
        });

        manager.queue(IMAGES_QUEUE);
        manager.queue(AI_IMAGES_QUEUE);
        manager
    }

    /// Returns the named queue, creating it on first use. Idempotent:
    /// repeated calls with the same name return the same instance.
    pub fn queue(&self, name: &str) -> Arc<TaskQueue> {
        let mut queues = self.queues.lock().expect("queue registry lock poisoned");
        Arc::clone(queues.entry(name.to_string()).or_insert_with(|| {
            info!(queue = name, "registering queue");
            Arc::new(TaskQueue::new(self.store.clone(), name))
        }))
    }

    pub fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.lock().expect("queue registry lock poisoned");
        queues.keys().cloned().collect()
    }

    fn snapshot(&self) -> Vec<Arc<TaskQueue>> {
        let queues = self.queues.lock().expect("queue registry lock poisoned");
        queues.values().cloned().collect()
    }

    /// Starts a worker on every registered queue, binding the shared handler
    /// table to each, and spawns the archive cleanup loop. A queue started
    /// with an empty table will fail every task enqueued to it; a queue
    /// created after this call accepts tasks but gets no worker until the
    /// next start.
    pub fn start_all(&self, registry: Arc<HandlerRegistry>) {
        for queue in self.snapshot() {
            queue.start_worker(Arc::clone(&registry));
        }

        let handle = self.spawn_cleanup_loop();
        *self
            .cleanup_handle
            .lock()
            .expect("cleanup handle lock poisoned") = Some(handle);

        info!(queues = ?self.queue_names(), "all workers started");
    }

    fn spawn_cleanup_loop(&self) -> JoinHandle<()> {
        let manager = self.self_weak.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(CLEANUP_INTERVAL);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        for queue in manager.snapshot() {
                            if let Err(e) = queue.purge_archives().await {
                                error!(queue = queue.name(), error = %e, "archive cleanup failed");
                            }
                        }
                    }
                }
            }

            info!("archive cleanup loop stopped");
        })
    }

    /// Stops every queue's loops and the cleanup loop together.
    pub fn stop_all(&self) {
        for queue in self.snapshot() {
            queue.close();
        }
        let _ = self.shutdown_tx.send(());
        self.cleanup_handle
            .lock()
            .expect("cleanup handle lock poisoned")
            .take();
        info!("all queues stopped");
    }

    /// Per-queue statistics for a dashboard or health endpoint.
    pub async fn stats_all(&self) -> Result<Vec<QueueStats>> {
        let mut all = Vec::new();
        for queue in self.snapshot() {
            all.push(queue.stats().await?);
        }
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}
