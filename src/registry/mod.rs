//! Process-wide registry of active runs.
//!
//! Owns every `RunState`, hands the engine a cancel token by reference, and
//! exposes the operations a thin outer shell needs: start, status, trace,
//! cancel, list. All operations are safe under concurrent access; terminal
//! transitions release the spawned task handle so nothing leaks.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::{RunEngine, RunState, SharedRunState};
use crate::error::{TotError, TotResult};
use crate::types::{
    CancelOutcome, RunConfig, RunMetrics, RunStatus, RunSummary, StopReason, Task,
};

/// Status + metrics view returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub metrics: RunMetrics,
}

struct RunHandle {
    state: SharedRunState,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

/// Registry mapping `run_id → RunHandle`.
pub struct RunRegistry {
    engine: Arc<RunEngine>,
    runs: Arc<DashMap<String, Arc<RunHandle>>>,
}

impl RunRegistry {
    pub fn new(engine: Arc<RunEngine>) -> Self {
        Self {
            engine,
            runs: Arc::new(DashMap::new()),
        }
    }

    /// Validate the config, allocate a run and spawn the engine in the
    /// background. Returns immediately with the run id.
    pub fn start(&self, task: Task, config: RunConfig) -> TotResult<String> {
        config.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let state: SharedRunState = Arc::new(RwLock::new(RunState::new(
            run_id.clone(),
            task,
            config,
        )));
        let cancel = CancellationToken::new();
        let handle = Arc::new(RunHandle {
            state: state.clone(),
            cancel: cancel.clone(),
            task: Mutex::new(None),
            started_at: Utc::now(),
        });
        self.runs.insert(run_id.clone(), handle.clone());

        let engine = self.engine.clone();
        let runs = self.runs.clone();
        let id = run_id.clone();
        // Hold the slot lock across the spawn so the completion hook cannot
        // observe it empty.
        let mut slot = handle.task.lock().expect("registry lock poisoned");
        let join = tokio::spawn(async move {
            // Inner spawn so a panic inside the engine is caught and mapped
            // to a failed run instead of a silently poisoned handle.
            let inner = tokio::spawn({
                let engine = engine.clone();
                let state = state.clone();
                let cancel = cancel.clone();
                async move { engine.run(state, cancel).await }
            });
            let panicked = inner.await.is_err();

            {
                let mut s = state.write().await;
                if panicked || !s.status.is_terminal() {
                    s.status = RunStatus::Failed;
                    s.stop_reason = Some(StopReason::InternalError);
                    s.metrics.stop_reason = s.stop_reason;
                    tracing::error!(run_id = %s.run_id, "engine task died, run marked failed");
                }
            }

            // Terminal transition: release the task handle.
            if let Some(entry) = runs.get(&id) {
                if let Ok(mut slot) = entry.task.lock() {
                    slot.take();
                }
            }
        });
        slot.replace(join);
        drop(slot);

        tracing::info!(run_id = %run_id, "run registered");
        Ok(run_id)
    }

    fn handle(&self, run_id: &str) -> TotResult<Arc<RunHandle>> {
        self.runs
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TotError::NotFound(run_id.to_string()))
    }

    /// Current status and metrics; always succeeds for a known run.
    pub async fn status(&self, run_id: &str) -> TotResult<StatusSnapshot> {
        let handle = self.handle(run_id)?;
        let s = handle.state.read().await;
        let mut metrics = s.metrics.clone();
        metrics.nodes_expanded = s.nodes_expanded;
        metrics.final_score = s.best_score();
        Ok(StatusSnapshot {
            run_id: s.run_id.clone(),
            status: s.status,
            metrics,
        })
    }

    /// Coherent snapshot of the full run state; partial while running.
    pub async fn trace(&self, run_id: &str) -> TotResult<RunState> {
        let handle = self.handle(run_id)?;
        let s = handle.state.read().await;
        Ok(s.clone())
    }

    /// Request cancellation. Non-blocking and idempotent; a terminal run
    /// reports `AlreadyTerminal`.
    pub async fn cancel(&self, run_id: &str) -> TotResult<CancelOutcome> {
        let handle = self.handle(run_id)?;
        if handle.state.read().await.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        handle.cancel.cancel();
        tracing::info!(run_id = %run_id, "cancellation requested");
        Ok(CancelOutcome::CancellationRequested)
    }

    /// Summaries of every known run.
    pub async fn list(&self) -> Vec<RunSummary> {
        let handles: Vec<(String, Arc<RunHandle>)> = self
            .runs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for (run_id, handle) in handles {
            let status = handle.state.read().await.status;
            summaries.push(RunSummary {
                run_id,
                status,
                started_at: handle.started_at,
            });
        }
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        summaries
    }

    /// Wait for a run to reach a terminal status (test and embedding
    /// convenience; the public surface is poll-based).
    pub async fn wait(&self, run_id: &str) -> TotResult<RunStatus> {
        let handle = self.handle(run_id)?;
        loop {
            {
                let s = handle.state.read().await;
                if s.status.is_terminal() {
                    return Ok(s.status);
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// Whether the spawned task for a run has been released.
    pub fn task_released(&self, run_id: &str) -> TotResult<bool> {
        let handle = self.handle(run_id)?;
        let slot = handle.task.lock().expect("registry lock poisoned");
        Ok(slot.is_none())
    }
}
