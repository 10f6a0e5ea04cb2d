//! Per-run state machine (Component K): `queued -> running ->
//! (success | warning | error | cancelled)`, with no transitions out
//! of a terminal state.
//!
//! Grounded on the teacher's `scheduler/jobs.rs` `BackgroundJob`
//! (status enum + start/complete/fail/cancel transitions), generalized
//! from a single in-memory struct to a trait a task implementation
//! runs against.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::models::RunStatus;

/// Progress snapshot a running task publishes; the engine keeps only
/// the latest one per `task_id` and serves it from `get_status`.
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    pub status: String,
    pub total: Option<u64>,
    pub success_count: Option<u64>,
    pub error_count: Option<u64>,
    pub current_item: Option<String>,
}

/// What a task returns on completion. `status` should be `success`,
/// `warning`, or `error` — the engine overrides it to `cancelled` if
/// the run's cancellation token was observed.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: RunStatus,
    pub message: String,
    pub details: Value,
    pub total_items: Option<u64>,
    pub success_count: Option<u64>,
    pub error_count: Option<u64>,
}

impl TaskOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            message: message.into(),
            details: Value::Null,
            total_items: None,
            success_count: None,
            error_count: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Warning,
            message: message.into(),
            details: Value::Null,
            total_items: None,
            success_count: None,
            error_count: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            message: message.into(),
            details: Value::Null,
            total_items: None,
            success_count: None,
            error_count: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_counts(mut self, total: u64, success: u64, errors: u64) -> Self {
        self.total_items = Some(total);
        self.success_count = Some(success);
        self.error_count = Some(errors);
        self
    }
}

/// Handed to a running task: its parameters, a cancellation token it
/// must check at suspension points, and a progress-publishing sink.
pub struct RunContext {
    pub run_id: Uuid,
    pub schedule_id: Option<i64>,
    pub parameters: Value,
    cancellation: CancellationToken,
    progress: Arc<Mutex<TaskProgress>>,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        schedule_id: Option<i64>,
        parameters: Value,
        cancellation: CancellationToken,
        progress: Arc<Mutex<TaskProgress>>,
    ) -> Self {
        Self {
            run_id,
            schedule_id,
            parameters,
            cancellation,
            progress,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub async fn report_progress(&self, progress: TaskProgress) {
        *self.progress.lock().await = progress;
    }
}

/// One registrable unit of work. `register()` pairs a `TaskDefinition`
/// with a factory that builds one of these from run parameters.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, ctx: &RunContext) -> TaskOutcome;
}

pub type TaskFactory = Arc<dyn Fn(Value) -> Arc<dyn Task> + Send + Sync>;
