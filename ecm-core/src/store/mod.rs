//! Local Store (Component B): durable storage of rules, snapshots, change
//! logs, task history, probe stats, notifications, and TLS settings.
//!
//! `Store` is the injectable interface the REDESIGN FLAGS section calls
//! for — every other subsystem takes `Arc<dyn Store>` rather than owning
//! storage directly, so tests substitute `MemoryStore` and never touch
//! disk.

pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::MemoryStore;
pub use models::*;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, StoreError>;

/// CRUD + query surface for every entity in `spec.md` §3. Object-safe so
/// it can be held behind `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync {
    // -- Normalization --
    async fn list_rule_groups(&self) -> Result<Vec<NormalizationRuleGroup>>;
    async fn upsert_rule_group(&self, group: NormalizationRuleGroup) -> Result<()>;
    async fn delete_rule_group(&self, id: i64) -> Result<()>;
    async fn list_rules(&self, group_id: Option<i64>) -> Result<Vec<NormalizationRule>>;
    async fn upsert_rule(&self, rule: NormalizationRule) -> Result<()>;
    async fn delete_rule(&self, id: i64) -> Result<()>;

    // -- Tags --
    async fn list_tag_groups(&self) -> Result<Vec<TagGroup>>;
    async fn list_tags(&self, group_id: i64) -> Result<Vec<Tag>>;
    async fn upsert_tag(&self, tag: Tag) -> Result<()>;
    async fn delete_tag(&self, id: i64) -> Result<()>;

    // -- Auto-creation --
    async fn list_autocreation_rules(&self) -> Result<Vec<AutoCreationRule>>;
    async fn upsert_autocreation_rule(&self, rule: AutoCreationRule) -> Result<()>;
    async fn get_autocreation_execution(
        &self,
        id: uuid::Uuid,
    ) -> Result<Option<AutoCreationExecution>>;
    async fn save_autocreation_execution(&self, exec: AutoCreationExecution) -> Result<()>;
    async fn list_autocreation_executions(&self, limit: usize) -> Result<Vec<AutoCreationExecution>>;

    // -- Probe --
    async fn get_stream_stats(&self, stream_id: i64) -> Result<Option<StreamStats>>;
    async fn list_stream_stats(&self) -> Result<Vec<StreamStats>>;
    async fn upsert_stream_stats(&self, stats: StreamStats) -> Result<()>;

    // -- M3U --
    async fn latest_snapshot(&self, m3u_account_id: i64) -> Result<Option<M3USnapshot>>;
    async fn save_snapshot(&self, snapshot: M3USnapshot) -> Result<()>;
    async fn insert_change_logs(&self, logs: Vec<M3UChangeLog>) -> Result<()>;
    async fn pending_change_logs(&self, m3u_account_id: Option<i64>) -> Result<Vec<M3UChangeLog>>;
    async fn get_digest_settings(&self) -> Result<M3UDigestSettings>;
    async fn save_digest_settings(&self, settings: M3UDigestSettings) -> Result<()>;

    // -- Task engine --
    async fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>>;
    async fn upsert_scheduled_task(&self, task: ScheduledTask) -> Result<()>;
    async fn list_task_schedules(&self, task_id: Option<&str>) -> Result<Vec<TaskSchedule>>;
    async fn upsert_task_schedule(&self, schedule: TaskSchedule) -> Result<i64>;
    async fn save_task_run(&self, run: TaskRun) -> Result<()>;
    async fn task_run_history(
        &self,
        task_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRun>>;
    /// Delete task runs started before `older_than`, returning the
    /// number removed. Backs the `cleanup` shipped task.
    async fn prune_task_runs(&self, older_than: DateTime<Utc>) -> Result<usize>;

    // -- TLS --
    async fn get_tls_settings(&self) -> Result<TlsSettings>;
    async fn save_tls_settings(&self, settings: TlsSettings) -> Result<()>;

    // -- Notifications --
    async fn save_notification(&self, notification: Notification) -> Result<()>;
    async fn list_notifications(&self, limit: usize) -> Result<Vec<Notification>>;
    async fn mark_notification_read(&self, id: uuid::Uuid) -> Result<()>;
    async fn delete_notifications_by_source(&self, source: &str, source_id: &str) -> Result<()>;
    /// Delete read notifications created before `older_than`, returning
    /// the number removed. Backs the `cleanup` shipped task.
    async fn prune_notifications(&self, older_than: DateTime<Utc>) -> Result<usize>;

    // -- XMLTV / Dummy EPG --
    async fn list_epg_profiles(&self) -> Result<Vec<DummyEpgProfile>>;
    async fn upsert_epg_profile(&self, profile: DummyEpgProfile) -> Result<i64>;
}

#[cfg(test)]
pub(crate) fn sample_rule_group() -> NormalizationRuleGroup {
    NormalizationRuleGroup {
        id: 1,
        name: "Quality tags".into(),
        description: None,
        enabled: true,
        priority: 10,
        is_builtin: false,
    }
}
