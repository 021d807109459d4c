//! Workflow state store.
//!
//! Two tiers: a hot in-memory map holding active records plus the most
//! recent completed results, and an optional durable backend replicated
//! asynchronously. Eviction from the completed tier is strict by completion
//! timestamp, oldest first.

pub mod backend;
pub mod error;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use protocol::{OrchestratorResult, TaskStatus, WorkflowRecord};

pub use backend::{DurableBackend, MemoryBackend};
pub use error::{StoreError, StoreResult};

const ACTIVE_SET: &str = "workflows:active";
const COMPLETED_ZSET: &str = "workflows:completed";

fn record_key(id: Uuid) -> String {
    format!("workflows:record:{id}")
}

fn result_key(id: Uuid) -> String {
    format!("workflows:result:{id}")
}

/// Tuning for the state store.
#[derive(Debug, Clone)]
pub struct StateStoreConfig {
    /// Upper bound on concurrently active records.
    pub max_active: usize,
    /// Completed results retained in the hot tier.
    pub completed_retention: usize,
    /// Completed records older than this are evicted entirely.
    pub retention_window: Duration,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            max_active: 50,
            completed_retention: 100,
            retention_window: Duration::from_secs(86_400),
        }
    }
}

struct CompletedEntry {
    record: WorkflowRecord,
    result: Option<OrchestratorResult>,
}

#[derive(Default)]
struct HotTier {
    active: HashMap<Uuid, WorkflowRecord>,
    completed: HashMap<Uuid, CompletedEntry>,
    /// Completion-time index driving eviction order.
    by_completion: BTreeMap<(DateTime<Utc>, Uuid), ()>,
}

enum ReplicationOp {
    PutRecord(Box<WorkflowRecord>),
    PutResult(Uuid, Box<OrchestratorResult>),
    ActiveAdd(Uuid),
    ActiveRem(Uuid),
    CompletedAdd(Uuid, f64),
    Remove(Uuid),
}

/// Durable-enough memory of workflow records and completed results.
///
/// Writes are synchronous against the hot tier (read-your-writes within the
/// process) and replicated asynchronously to the backend when one is
/// configured.
pub struct StateStore {
    hot: RwLock<HotTier>,
    config: StateStoreConfig,
    backend: Option<Arc<dyn DurableBackend>>,
    repl_tx: Option<mpsc::Sender<ReplicationOp>>,
}

impl StateStore {
    /// In-memory-only store.
    pub fn new(config: StateStoreConfig) -> Self {
        Self {
            hot: RwLock::new(HotTier::default()),
            config,
            backend: None,
            repl_tx: None,
        }
    }

    /// Store with asynchronous replication into `backend`.
    pub fn with_backend(config: StateStoreConfig, backend: Arc<dyn DurableBackend>) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        spawn_replication(Arc::clone(&backend), rx);
        Self {
            hot: RwLock::new(HotTier::default()),
            config,
            backend: Some(backend),
            repl_tx: Some(tx),
        }
    }

    /// Load active records from the durable backend after a restart.
    pub async fn rehydrate(&self) -> StoreResult<usize> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };
        let mut restored = 0;
        for member in backend.set_members(ACTIVE_SET).await? {
            let Ok(id) = member.parse::<Uuid>() else {
                warn!(member = %member, "Skipping malformed active-set member");
                continue;
            };
            let Some(raw) = backend.get(&record_key(id)).await? else {
                continue;
            };
            match serde_json::from_str::<WorkflowRecord>(&raw) {
                Ok(record) if !record.status.is_terminal() => {
                    self.hot.write().active.insert(id, record);
                    restored += 1;
                }
                Ok(_) => {}
                Err(err) => warn!(workflow_id = %id, "Skipping unparseable record: {err}"),
            }
        }
        debug!(restored, "Rehydrated active records");
        Ok(restored)
    }

    /// Create a new record. Fails if the identity exists or the active cap
    /// is reached.
    pub fn create(&self, record: WorkflowRecord) -> StoreResult<()> {
        let mut hot = self.hot.write();
        if hot.active.contains_key(&record.id) || hot.completed.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        if hot.active.len() >= self.config.max_active {
            return Err(StoreError::TooManyActive {
                limit: self.config.max_active,
            });
        }
        let id = record.id;
        hot.active.insert(id, record.clone());
        drop(hot);

        self.replicate(ReplicationOp::PutRecord(Box::new(record)));
        self.replicate(ReplicationOp::ActiveAdd(id));
        Ok(())
    }

    /// Apply a status transition, enforcing the state machine.
    pub fn transition(
        &self,
        id: Uuid,
        new_status: TaskStatus,
        error_message: Option<String>,
    ) -> StoreResult<WorkflowRecord> {
        let mut hot = self.hot.write();
        let record = hot
            .active
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        if !record.status.can_transition_to(new_status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: record.status,
                to: new_status,
            });
        }
        record.status = new_status;
        if new_status == TaskStatus::Running {
            record.started_at = Some(Utc::now());
        }
        if let Some(message) = error_message {
            record.error = Some(message);
        }

        if new_status.is_terminal() {
            let mut record = hot
                .active
                .remove(&id)
                .ok_or(StoreError::NotFound(id))?;
            record.completed_at = Some(Utc::now());
            let snapshot = record.clone();
            self.insert_completed(&mut hot, record, None);
            drop(hot);
            self.replicate_terminal(&snapshot, None);
            Ok(snapshot)
        } else {
            let snapshot = record.clone();
            drop(hot);
            self.replicate(ReplicationOp::PutRecord(Box::new(snapshot.clone())));
            Ok(snapshot)
        }
    }

    /// Atomically set a terminal status and store the result.
    pub fn complete(&self, id: Uuid, result: OrchestratorResult) -> StoreResult<WorkflowRecord> {
        if !result.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id,
                from: result.status,
                to: result.status,
            });
        }
        let mut hot = self.hot.write();
        let record = hot.active.get(&id).ok_or(StoreError::NotFound(id))?;
        if !record.status.can_transition_to(result.status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: record.status,
                to: result.status,
            });
        }
        let mut record = hot
            .active
            .remove(&id)
            .ok_or(StoreError::NotFound(id))?;
        record.status = result.status;
        record.completed_at = Some(Utc::now());
        record.error = result.error.clone();
        let snapshot = record.clone();
        self.insert_completed(&mut hot, record, Some(result.clone()));
        drop(hot);

        self.replicate_terminal(&snapshot, Some(result));
        Ok(snapshot)
    }

    pub fn get_record(&self, id: Uuid) -> StoreResult<WorkflowRecord> {
        let hot = self.hot.read();
        if let Some(record) = hot.active.get(&id) {
            return Ok(record.clone());
        }
        hot.completed
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(StoreError::NotFound(id))
    }

    /// Returns `Ok(None)` for a known workflow that has not completed yet.
    pub fn get_result(&self, id: Uuid) -> StoreResult<Option<OrchestratorResult>> {
        let hot = self.hot.read();
        if hot.active.contains_key(&id) {
            return Ok(None);
        }
        hot.completed
            .get(&id)
            .map(|entry| entry.result.clone())
            .ok_or(StoreError::NotFound(id))
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.hot.read().active.keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.hot.read().active.len()
    }

    /// Completed workflow ids, newest completion first.
    pub fn completed_ids(&self, limit: usize) -> Vec<Uuid> {
        self.hot
            .read()
            .by_completion
            .keys()
            .rev()
            .take(limit)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Evict completed records older than the retention window. Returns the
    /// evicted ids so callers can release associated resources.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let window = chrono::Duration::from_std(self.config.retention_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(86_400));
        let cutoff = now - window;

        let mut hot = self.hot.write();
        let expired: Vec<(DateTime<Utc>, Uuid)> = hot
            .by_completion
            .keys()
            .take_while(|(completed_at, _)| *completed_at < cutoff)
            .copied()
            .collect();
        let mut evicted = Vec::with_capacity(expired.len());
        for key in expired {
            hot.by_completion.remove(&key);
            hot.completed.remove(&key.1);
            evicted.push(key.1);
        }
        drop(hot);

        for id in &evicted {
            self.replicate(ReplicationOp::Remove(*id));
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted expired workflow records");
        }
        evicted
    }

    /// Write the entire hot tier through to the backend, bounded by
    /// `deadline`. Used on shutdown.
    pub async fn snapshot(&self, deadline: Duration) -> StoreResult<usize> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };
        let (active, completed): (Vec<WorkflowRecord>, Vec<(WorkflowRecord, Option<OrchestratorResult>)>) = {
            let hot = self.hot.read();
            (
                hot.active.values().cloned().collect(),
                hot.completed
                    .values()
                    .map(|entry| (entry.record.clone(), entry.result.clone()))
                    .collect(),
            )
        };

        let backend = Arc::clone(backend);
        let write_all = async move {
            let mut written = 0usize;
            for record in active {
                let raw = serde_json::to_string(&record)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                backend.put(&record_key(record.id), &raw, None).await?;
                backend
                    .set_add(ACTIVE_SET, &record.id.to_string())
                    .await?;
                written += 1;
            }
            for (record, result) in completed {
                let raw = serde_json::to_string(&record)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                backend.put(&record_key(record.id), &raw, None).await?;
                if let Some(result) = result {
                    let raw = serde_json::to_string(&result)
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                    backend.put(&result_key(record.id), &raw, None).await?;
                }
                let score = record
                    .completed_at
                    .map(|at| at.timestamp_millis() as f64)
                    .unwrap_or(0.0);
                backend
                    .zadd(COMPLETED_ZSET, &record.id.to_string(), score)
                    .await?;
                written += 1;
            }
            Ok::<usize, StoreError>(written)
        };

        match tokio::time::timeout(deadline, write_all).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Backend(format!(
                "snapshot exceeded {deadline:?}"
            ))),
        }
    }

    /// Insert into the completed tier and enforce the retention cap,
    /// evicting strictly by completion timestamp, oldest first.
    fn insert_completed(
        &self,
        hot: &mut HotTier,
        record: WorkflowRecord,
        result: Option<OrchestratorResult>,
    ) {
        let completed_at = record.completed_at.unwrap_or_else(Utc::now);
        let id = record.id;
        hot.by_completion.insert((completed_at, id), ());
        hot.completed.insert(id, CompletedEntry { record, result });

        while hot.completed.len() > self.config.completed_retention {
            let Some((oldest, _)) = hot.by_completion.iter().next().map(|(k, v)| (*k, *v)) else {
                break;
            };
            hot.by_completion.remove(&oldest);
            hot.completed.remove(&oldest.1);
            debug!(workflow_id = %oldest.1, "Evicted oldest completed result from hot tier");
        }
    }

    fn replicate_terminal(&self, record: &WorkflowRecord, result: Option<OrchestratorResult>) {
        self.replicate(ReplicationOp::PutRecord(Box::new(record.clone())));
        self.replicate(ReplicationOp::ActiveRem(record.id));
        let score = record
            .completed_at
            .map(|at| at.timestamp_millis() as f64)
            .unwrap_or(0.0);
        self.replicate(ReplicationOp::CompletedAdd(record.id, score));
        if let Some(result) = result {
            self.replicate(ReplicationOp::PutResult(record.id, Box::new(result)));
        }
    }

    fn replicate(&self, op: ReplicationOp) {
        if let Some(tx) = &self.repl_tx {
            if tx.try_send(op).is_err() {
                warn!("Replication queue full, dropping state-store op");
            }
        }
    }
}

fn spawn_replication(backend: Arc<dyn DurableBackend>, mut rx: mpsc::Receiver<ReplicationOp>) {
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let outcome = match op {
                ReplicationOp::PutRecord(record) => match serde_json::to_string(&record) {
                    Ok(raw) => backend.put(&record_key(record.id), &raw, None).await,
                    Err(e) => Err(StoreError::Backend(e.to_string())),
                },
                ReplicationOp::PutResult(id, result) => match serde_json::to_string(&result) {
                    Ok(raw) => backend.put(&result_key(id), &raw, None).await,
                    Err(e) => Err(StoreError::Backend(e.to_string())),
                },
                ReplicationOp::ActiveAdd(id) => {
                    backend.set_add(ACTIVE_SET, &id.to_string()).await
                }
                ReplicationOp::ActiveRem(id) => {
                    backend.set_rem(ACTIVE_SET, &id.to_string()).await
                }
                ReplicationOp::CompletedAdd(id, score) => {
                    backend.zadd(COMPLETED_ZSET, &id.to_string(), score).await
                }
                ReplicationOp::Remove(id) => {
                    let member = id.to_string();
                    let deleted = backend.delete(&record_key(id)).await;
                    let _ = backend.delete(&result_key(id)).await;
                    let _ = backend.set_rem(ACTIVE_SET, &member).await;
                    let _ = backend.zrem(COMPLETED_ZSET, &member).await;
                    deleted
                }
            };
            if let Err(err) = outcome {
                error!("State replication failed: {err}");
            }
        }
    });
}
