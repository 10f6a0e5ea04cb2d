//! Task Engine (Component K) and Cron/Schedule Calculator (Component
//! L): a process-wide scheduler loop over registered tasks, each run
//! singleton-per-`task_id`, cooperatively cancellable, with history
//! persisted on every terminal transition and alerts fanned out
//! through (P).
//!
//! Grounded on the teacher's `scheduler/jobs.rs` `JobManager` (in-
//! memory run registry keyed by id, active-count bookkeeping) widened
//! from single background jobs to scheduled, alertable, cancellable
//! ones, and `scheduler/cron.rs` for the `cron` crate usage the
//! schedule calculator below builds on.

pub mod schedule;
pub mod run;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::NotifySettings;
use crate::error::{EcmError, SchedulerError};
use crate::notify::{self, AlertChannels};
use crate::store::models::{RunStatus, ScheduledTask, TaskDefinition, TaskRun, TaskSchedule};
use crate::store::Store;

pub use run::{RunContext, Task, TaskFactory, TaskOutcome, TaskProgress};

struct RegisteredTask {
    definition: TaskDefinition,
    factory: TaskFactory,
}

struct ActiveRun {
    run_id: Uuid,
    cancellation: CancellationToken,
    progress: Arc<Mutex<TaskProgress>>,
}

/// A coarse view of the engine for operator dashboards.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub registered_tasks: usize,
    pub active_runs: usize,
    pub next_fire_at: Option<DateTime<Utc>>,
}

/// The singleton task registry, run tracker, and scheduler loop.
pub struct TaskEngine {
    store: Arc<dyn Store>,
    notify: NotifySettings,
    tasks: Mutex<HashMap<String, RegisteredTask>>,
    active: Mutex<HashMap<String, ActiveRun>>,
    wake: Notify,
}

impl TaskEngine {
    pub fn new(store: Arc<dyn Store>, notify: NotifySettings) -> Self {
        Self {
            store,
            notify,
            tasks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            wake: Notify::new(),
        }
    }

    /// Wake the scheduler loop immediately, e.g. after a schedule was
    /// created, edited, or deleted through the admin API.
    pub fn wake_scheduler(&self) {
        self.wake.notify_one();
    }

    pub async fn register(&self, definition: TaskDefinition, factory: TaskFactory) {
        let task_id = definition.task_id.clone();
        self.tasks.lock().await.insert(task_id, RegisteredTask { definition, factory });
    }

    pub async fn list_tasks(&self) -> Vec<TaskDefinition> {
        self.tasks.lock().await.values().map(|t| t.definition.clone()).collect()
    }

    /// Latest progress snapshot for a task that is currently running,
    /// or `None` if it is idle.
    pub async fn get_status(&self, task_id: &str) -> Option<TaskProgress> {
        let active = self.active.lock().await;
        match active.get(task_id) {
            Some(run) => Some(run.progress.lock().await.clone()),
            None => None,
        }
    }

    pub async fn cancel(&self, task_id: &str) -> Result<(), EcmError> {
        let active = self.active.lock().await;
        let run = active
            .get(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound { task_id: task_id.to_string() })?;
        run.cancellation.cancel();
        Ok(())
    }

    pub async fn history(&self, task_id: Option<&str>, limit: usize, offset: usize) -> Result<Vec<TaskRun>, EcmError> {
        Ok(self.store.task_run_history(task_id, limit, offset).await?)
    }

    pub async fn engine_status(&self) -> Result<EngineStatus, EcmError> {
        let registered_tasks = self.tasks.lock().await.len();
        let active_runs = self.active.lock().await.len();
        let schedules = self.store.list_task_schedules(None).await?;
        let now = Utc::now();
        let next_fire_at = schedules
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| schedule::next_fire_at(s, now).ok())
            .min();
        Ok(EngineStatus { registered_tasks, active_runs, next_fire_at })
    }

    /// Run a task now. If it is already running, the fire is coalesced
    /// into a "skipped, already running" `TaskRun` that is still
    /// persisted to history but never touches the in-flight run.
    pub async fn run(&self, task_id: &str, schedule_id: Option<i64>) -> Result<TaskRun, EcmError> {
        let factory = {
            let tasks = self.tasks.lock().await;
            tasks
                .get(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound { task_id: task_id.to_string() })?
                .factory
                .clone()
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cancellation = CancellationToken::new();
        let progress = Arc::new(Mutex::new(TaskProgress::default()));

        {
            let mut active = self.active.lock().await;
            if active.contains_key(task_id) {
                let skipped = TaskRun {
                    run_id,
                    task_id: task_id.to_string(),
                    schedule_id,
                    started_at,
                    finished_at: Some(started_at),
                    status: RunStatus::Warning,
                    message: "skipped, already running".to_string(),
                    details: Value::Null,
                    total_items: None,
                    success_count: None,
                    error_count: None,
                };
                self.store.save_task_run(skipped.clone()).await?;
                return Ok(skipped);
            }
            active.insert(
                task_id.to_string(),
                ActiveRun { run_id, cancellation: cancellation.clone(), progress: progress.clone() },
            );
        }

        let parameters = self.schedule_parameters(schedule_id).await;
        let task = (factory)(parameters.clone());
        let ctx = RunContext::new(run_id, schedule_id, parameters, cancellation.clone(), progress);

        let outcome = task.run(&ctx).await;
        let status = if cancellation.is_cancelled() && outcome.status != RunStatus::Cancelled {
            RunStatus::Cancelled
        } else {
            outcome.status
        };

        let run = TaskRun {
            run_id,
            task_id: task_id.to_string(),
            schedule_id,
            started_at,
            finished_at: Some(Utc::now()),
            status,
            message: outcome.message,
            details: outcome.details,
            total_items: outcome.total_items,
            success_count: outcome.success_count,
            error_count: outcome.error_count,
        };

        self.store.save_task_run(run.clone()).await?;
        self.active.lock().await.remove(task_id);
        self.maybe_alert(&run).await;

        Ok(run)
    }

    async fn schedule_parameters(&self, schedule_id: Option<i64>) -> Value {
        let Some(schedule_id) = schedule_id else { return Value::Null };
        match self.store.list_task_schedules(None).await {
            Ok(schedules) => schedules
                .into_iter()
                .find(|s| s.id == schedule_id)
                .map(|s| s.parameters)
                .unwrap_or(Value::Null),
            Err(_) => Value::Null,
        }
    }

    /// After a terminal run: if the task opted into alerting and the
    /// outcome matches one of its `alert_on_*` flags, fan out through
    /// (P). Alert failures are swallowed by `notify::create_notification`
    /// itself and never change the run's own recorded outcome.
    async fn maybe_alert(&self, run: &TaskRun) {
        let scheduled = match self.store.list_scheduled_tasks().await {
            Ok(tasks) => tasks.into_iter().find(|t| t.task_id == run.task_id),
            Err(e) => {
                tracing::warn!(error = %e, "could not load scheduled task for alerting policy");
                None
            }
        };
        let Some(scheduled) = scheduled else { return };
        if !scheduled.send_alerts || !alert_matches(&scheduled, run.status) {
            return;
        }

        let channels = AlertChannels {
            email: scheduled.send_to_email,
            discord: scheduled.send_to_discord,
            telegram: scheduled.send_to_telegram,
        };
        let notification_type = match run.status {
            RunStatus::Success => "success",
            RunStatus::Warning => "warning",
            RunStatus::Error => "error",
            RunStatus::Cancelled | RunStatus::Running => "info",
        };

        if let Err(e) = notify::create_notification(
            self.store.as_ref(),
            &self.notify,
            notification_type,
            Some(format!("{} finished: {}", run.task_id, notification_type)),
            run.message.clone(),
            format!("task:{}", run.task_id),
            Some(run.run_id.to_string()),
            run.details.clone(),
            true,
            channels,
        )
        .await
        {
            tracing::warn!(error = %e, task_id = %run.task_id, "failed to create alert notification");
        }
    }

    /// The process-wide scheduler loop: sleep until the earliest
    /// enabled schedule's `next_fire_at`, or until `wake_scheduler` is
    /// called, then submit any schedule whose time has come.
    pub async fn run_scheduler_loop(self: Arc<Self>) {
        loop {
            let now = Utc::now();
            let schedules = match self.store.list_task_schedules(None).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "scheduler loop could not load schedules");
                    tokio::time::sleep(StdDuration::from_secs(30)).await;
                    continue;
                }
            };

            let mut due: Vec<TaskSchedule> = Vec::new();
            let mut next_fire_at: Option<DateTime<Utc>> = None;
            for s in schedules.into_iter().filter(|s| s.enabled) {
                match schedule::next_fire_at(&s, now) {
                    Ok(fire_at) if fire_at <= now => due.push(s),
                    Ok(fire_at) => {
                        if next_fire_at.is_none_or(|t| fire_at < t) {
                            next_fire_at = Some(fire_at);
                        }
                    }
                    Err(e) => tracing::warn!(schedule_id = s.id, error = %e, "invalid schedule skipped"),
                }
            }

            for schedule in due {
                let engine = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.run(&schedule.task_id, Some(schedule.id)).await {
                        tracing::warn!(task_id = %schedule.task_id, error = %e, "scheduled run failed to start");
                    }
                });
            }

            let sleep_for = next_fire_at
                .map(|fire_at| (fire_at - Utc::now()).to_std().unwrap_or(StdDuration::from_secs(1)))
                .unwrap_or(StdDuration::from_secs(3600))
                .max(StdDuration::from_millis(250));

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wake.notified() => {}
            }
        }
    }
}

fn alert_matches(scheduled: &ScheduledTask, status: RunStatus) -> bool {
    match status {
        RunStatus::Success => scheduled.alert_on_success,
        RunStatus::Warning => scheduled.alert_on_warning,
        RunStatus::Error => scheduled.alert_on_error,
        RunStatus::Cancelled | RunStatus::Running => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::ParameterType;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct Immediate(RunStatus);

    #[async_trait]
    impl Task for Immediate {
        async fn run(&self, _ctx: &RunContext) -> TaskOutcome {
            match self.0 {
                RunStatus::Success => TaskOutcome::success("ok"),
                RunStatus::Warning => TaskOutcome::warning("partial"),
                _ => TaskOutcome::error("boom"),
            }
        }
    }

    struct Blocking;

    #[async_trait]
    impl Task for Blocking {
        async fn run(&self, ctx: &RunContext) -> TaskOutcome {
            ctx.cancelled().await;
            TaskOutcome::error("cancelled")
        }
    }

    fn definition(task_id: &str) -> TaskDefinition {
        TaskDefinition {
            task_id: task_id.to_string(),
            task_name: task_id.to_string(),
            description: String::new(),
            parameter_schema: Vec::new(),
        }
    }

    #[allow(dead_code)]
    fn unused_parameter_type() -> ParameterType {
        ParameterType::Boolean
    }

    #[tokio::test]
    async fn test_register_and_run_records_history() {
        let store = Arc::new(MemoryStore::new());
        let engine = TaskEngine::new(store.clone(), NotifySettings::default());
        engine
            .register(definition("noop"), Arc::new(|_| Arc::new(Immediate(RunStatus::Success))))
            .await;
        let run = engine.run("noop", None).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        let history = engine.history(Some("noop"), 10, 0).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_task_errors() {
        let store = Arc::new(MemoryStore::new());
        let engine = TaskEngine::new(store, NotifySettings::default());
        assert!(engine.run("missing", None).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_is_observed_by_running_task() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(TaskEngine::new(store, NotifySettings::default()));
        engine.register(definition("blocking"), Arc::new(|_| Arc::new(Blocking))).await;

        let engine_clone = engine.clone();
        let handle = tokio::spawn(async move { engine_clone.run("blocking", None).await });

        // Give the run a moment to register itself as active, then cancel it.
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        engine.cancel("blocking").await.unwrap();

        let run = handle.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_engine_status_reports_registered_count() {
        let store = Arc::new(MemoryStore::new());
        let engine = TaskEngine::new(store, NotifySettings::default());
        engine
            .register(definition("a"), Arc::new(|_| Arc::new(Immediate(RunStatus::Success))))
            .await;
        let status = engine.engine_status().await.unwrap();
        assert_eq!(status.registered_tasks, 1);
        assert_eq!(status.active_runs, 0);
    }
}
