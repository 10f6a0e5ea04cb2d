//! In-memory `Store` implementation. Used by every subsystem's unit
//! tests so tests never touch disk; mirrors the shape of the teacher's
//! `HashMap`-backed job manager, generalized to the full entity set.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::*;
use super::{Result, Store};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    rule_groups: HashMap<i64, NormalizationRuleGroup>,
    rules: HashMap<i64, NormalizationRule>,
    tag_groups: HashMap<i64, TagGroup>,
    tags: HashMap<i64, Tag>,
    autocreation_rules: HashMap<i64, AutoCreationRule>,
    autocreation_executions: HashMap<Uuid, AutoCreationExecution>,
    stream_stats: HashMap<i64, StreamStats>,
    snapshots: HashMap<i64, Vec<M3USnapshot>>,
    change_logs: Vec<M3UChangeLog>,
    digest_settings: M3UDigestSettings,
    scheduled_tasks: HashMap<String, ScheduledTask>,
    task_schedules: HashMap<i64, TaskSchedule>,
    next_schedule_id: i64,
    task_runs: Vec<TaskRun>,
    tls_settings: TlsSettings,
    notifications: Vec<Notification>,
    epg_profiles: HashMap<i64, DummyEpgProfile>,
    next_epg_profile_id: i64,
}

/// An in-memory `Store` backed by a single mutex-guarded map set. Not
/// meant for production use — see `SqliteStore` for that — but a
/// faithful implementation of every operation the trait describes so
/// tests exercise real CRUD/query semantics rather than a stub.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_schedule_id: 1,
                next_epg_profile_id: 1,
                ..Default::default()
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_rule_groups(&self) -> Result<Vec<NormalizationRuleGroup>> {
        let inner = self.inner.lock().await;
        let mut groups: Vec<_> = inner.rule_groups.values().cloned().collect();
        groups.sort_by_key(|g| (g.priority, g.id));
        Ok(groups)
    }

    async fn upsert_rule_group(&self, group: NormalizationRuleGroup) -> Result<()> {
        self.inner.lock().await.rule_groups.insert(group.id, group);
        Ok(())
    }

    async fn delete_rule_group(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.rule_groups.remove(&id);
        inner.rules.retain(|_, r| r.group_id != id);
        Ok(())
    }

    async fn list_rules(&self, group_id: Option<i64>) -> Result<Vec<NormalizationRule>> {
        let inner = self.inner.lock().await;
        let mut rules: Vec<_> = inner
            .rules
            .values()
            .filter(|r| group_id.is_none_or(|gid| r.group_id == gid))
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.priority, r.id));
        Ok(rules)
    }

    async fn upsert_rule(&self, rule: NormalizationRule) -> Result<()> {
        self.inner.lock().await.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn delete_rule(&self, id: i64) -> Result<()> {
        self.inner.lock().await.rules.remove(&id);
        Ok(())
    }

    async fn list_tag_groups(&self) -> Result<Vec<TagGroup>> {
        Ok(self.inner.lock().await.tag_groups.values().cloned().collect())
    }

    async fn list_tags(&self, group_id: i64) -> Result<Vec<Tag>> {
        Ok(self
            .inner
            .lock()
            .await
            .tags
            .values()
            .filter(|t| t.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn upsert_tag(&self, tag: Tag) -> Result<()> {
        self.inner.lock().await.tags.insert(tag.id, tag);
        Ok(())
    }

    async fn delete_tag(&self, id: i64) -> Result<()> {
        self.inner.lock().await.tags.remove(&id);
        Ok(())
    }

    async fn list_autocreation_rules(&self) -> Result<Vec<AutoCreationRule>> {
        let inner = self.inner.lock().await;
        let mut rules: Vec<_> = inner.autocreation_rules.values().cloned().collect();
        rules.sort_by_key(|r| (r.priority, r.id));
        Ok(rules)
    }

    async fn upsert_autocreation_rule(&self, rule: AutoCreationRule) -> Result<()> {
        self.inner
            .lock()
            .await
            .autocreation_rules
            .insert(rule.id, rule);
        Ok(())
    }

    async fn get_autocreation_execution(
        &self,
        id: Uuid,
    ) -> Result<Option<AutoCreationExecution>> {
        Ok(self
            .inner
            .lock()
            .await
            .autocreation_executions
            .get(&id)
            .cloned())
    }

    async fn save_autocreation_execution(&self, exec: AutoCreationExecution) -> Result<()> {
        self.inner
            .lock()
            .await
            .autocreation_executions
            .insert(exec.id, exec);
        Ok(())
    }

    async fn list_autocreation_executions(
        &self,
        limit: usize,
    ) -> Result<Vec<AutoCreationExecution>> {
        let inner = self.inner.lock().await;
        let mut execs: Vec<_> = inner.autocreation_executions.values().cloned().collect();
        execs.sort_by_key(|e| std::cmp::Reverse(e.started_at));
        execs.truncate(limit);
        Ok(execs)
    }

    async fn get_stream_stats(&self, stream_id: i64) -> Result<Option<StreamStats>> {
        Ok(self.inner.lock().await.stream_stats.get(&stream_id).cloned())
    }

    async fn list_stream_stats(&self) -> Result<Vec<StreamStats>> {
        Ok(self.inner.lock().await.stream_stats.values().cloned().collect())
    }

    async fn upsert_stream_stats(&self, stats: StreamStats) -> Result<()> {
        self.inner
            .lock()
            .await
            .stream_stats
            .insert(stats.stream_id, stats);
        Ok(())
    }

    async fn latest_snapshot(&self, m3u_account_id: i64) -> Result<Option<M3USnapshot>> {
        Ok(self
            .inner
            .lock()
            .await
            .snapshots
            .get(&m3u_account_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn save_snapshot(&self, snapshot: M3USnapshot) -> Result<()> {
        self.inner
            .lock()
            .await
            .snapshots
            .entry(snapshot.m3u_account_id)
            .or_default()
            .push(snapshot);
        Ok(())
    }

    async fn insert_change_logs(&self, logs: Vec<M3UChangeLog>) -> Result<()> {
        self.inner.lock().await.change_logs.extend(logs);
        Ok(())
    }

    async fn pending_change_logs(&self, m3u_account_id: Option<i64>) -> Result<Vec<M3UChangeLog>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .change_logs
            .iter()
            .filter(|c| m3u_account_id.is_none_or(|id| c.m3u_account_id == id))
            .cloned()
            .collect())
    }

    async fn get_digest_settings(&self) -> Result<M3UDigestSettings> {
        Ok(self.inner.lock().await.digest_settings.clone())
    }

    async fn save_digest_settings(&self, settings: M3UDigestSettings) -> Result<()> {
        self.inner.lock().await.digest_settings = settings;
        Ok(())
    }

    async fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self.inner.lock().await.scheduled_tasks.values().cloned().collect())
    }

    async fn upsert_scheduled_task(&self, task: ScheduledTask) -> Result<()> {
        self.inner
            .lock()
            .await
            .scheduled_tasks
            .insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn list_task_schedules(&self, task_id: Option<&str>) -> Result<Vec<TaskSchedule>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .task_schedules
            .values()
            .filter(|s| task_id.is_none_or(|t| s.task_id == t))
            .cloned()
            .collect())
    }

    async fn upsert_task_schedule(&self, mut schedule: TaskSchedule) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        if schedule.id == 0 {
            schedule.id = inner.next_schedule_id;
            inner.next_schedule_id += 1;
        }
        let id = schedule.id;
        inner.task_schedules.insert(id, schedule);
        Ok(id)
    }

    async fn save_task_run(&self, run: TaskRun) -> Result<()> {
        self.inner.lock().await.task_runs.push(run);
        Ok(())
    }

    async fn task_run_history(
        &self,
        task_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRun>> {
        let inner = self.inner.lock().await;
        let mut runs: Vec<_> = inner
            .task_runs
            .iter()
            .filter(|r| task_id.is_none_or(|t| r.task_id == t))
            .cloned()
            .collect();
        runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    async fn prune_task_runs(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let before = inner.task_runs.len();
        inner.task_runs.retain(|r| r.started_at >= older_than);
        Ok(before - inner.task_runs.len())
    }

    async fn get_tls_settings(&self) -> Result<TlsSettings> {
        Ok(self.inner.lock().await.tls_settings.clone())
    }

    async fn save_tls_settings(&self, settings: TlsSettings) -> Result<()> {
        self.inner.lock().await.tls_settings = settings;
        Ok(())
    }

    async fn save_notification(&self, notification: Notification) -> Result<()> {
        self.inner.lock().await.notifications.push(notification);
        Ok(())
    }

    async fn list_notifications(&self, limit: usize) -> Result<Vec<Notification>> {
        let inner = self.inner.lock().await;
        let mut notes = inner.notifications.clone();
        notes.sort_by_key(|n| std::cmp::Reverse(n.created_at));
        notes.truncate(limit);
        Ok(notes)
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let note = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "notification".into(),
                id: id.to_string(),
            })?;
        note.read = true;
        Ok(())
    }

    async fn delete_notifications_by_source(&self, source: &str, source_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .notifications
            .retain(|n| !(n.source == source && n.source_id.as_deref() == Some(source_id)));
        Ok(())
    }

    async fn prune_notifications(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let before = inner.notifications.len();
        inner.notifications.retain(|n| !(n.read && n.created_at < older_than));
        Ok(before - inner.notifications.len())
    }

    async fn list_epg_profiles(&self) -> Result<Vec<DummyEpgProfile>> {
        Ok(self.inner.lock().await.epg_profiles.values().cloned().collect())
    }

    async fn upsert_epg_profile(&self, mut profile: DummyEpgProfile) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        if profile.id == 0 {
            profile.id = inner.next_epg_profile_id;
            inner.next_epg_profile_id += 1;
        }
        let id = profile.id;
        inner.epg_profiles.insert(id, profile);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sample_rule_group;

    #[tokio::test]
    async fn test_rule_group_roundtrip() {
        let store = MemoryStore::new();
        store.upsert_rule_group(sample_rule_group()).await.unwrap();
        let groups = store.list_rule_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Quality tags");
    }

    #[tokio::test]
    async fn test_delete_rule_group_cascades_rules() {
        let store = MemoryStore::new();
        store.upsert_rule_group(sample_rule_group()).await.unwrap();
        store
            .upsert_rule(NormalizationRule {
                id: 1,
                group_id: 1,
                name: "strip HD".into(),
                enabled: true,
                priority: 0,
                condition_type: Some("contains".into()),
                condition_value: Some("HD".into()),
                case_sensitive: false,
                conditions: vec![],
                condition_logic: ConditionLogic::And,
                tag_group_id: None,
                tag_match_position: None,
                action_type: "remove".into(),
                action_value: None,
                else_action_type: None,
                else_action_value: None,
                stop_processing: false,
            })
            .await
            .unwrap();
        store.delete_rule_group(1).await.unwrap();
        assert!(store.list_rule_groups().await.unwrap().is_empty());
        assert!(store.list_rules(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_id_autoincrement() {
        let store = MemoryStore::new();
        let schedule = TaskSchedule {
            id: 0,
            task_id: "stream_probe".into(),
            name: None,
            enabled: true,
            schedule_type: ScheduleType::Interval,
            interval_seconds: Some(3600),
            schedule_time: None,
            timezone: "UTC".into(),
            days_of_week: None,
            day_of_month: None,
            cron_expression: None,
            parameters: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        };
        let id1 = store.upsert_task_schedule(schedule.clone()).await.unwrap();
        let id2 = store.upsert_task_schedule(schedule).await.unwrap();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_notification_mark_read_not_found() {
        let store = MemoryStore::new();
        let err = store.mark_notification_read(Uuid::new_v4()).await;
        assert!(err.is_err());
    }
}
