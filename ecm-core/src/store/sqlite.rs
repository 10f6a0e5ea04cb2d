//! SQLite-backed `Store` implementation. Mirrors the teacher's no-ORM
//! style: idempotent `CREATE TABLE IF NOT EXISTS` migrations run once at
//! startup, plain SQL thereafter. Each entity is kept in its natural
//! columns where the column set is small and stable (stream stats,
//! snapshots' scalar fields); compound/variant fields (conditions,
//! actions, parameters) are stored as a JSON column, matching how the
//! teacher persists its own semi-structured state to disk.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::*;
use super::{Result, Store};
use crate::error::StoreError;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(backend_err)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(backend_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn backend_err(e: rusqlite::Error) -> StoreError {
    StoreError::Backend {
        message: e.to_string(),
    }
}

fn ser_err(e: serde_json::Error) -> StoreError {
    StoreError::Serialization {
        message: e.to_string(),
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rule_groups (id INTEGER PRIMARY KEY, priority INTEGER NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS rules (id INTEGER PRIMARY KEY, group_id INTEGER NOT NULL, priority INTEGER NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS tag_groups (id INTEGER PRIMARY KEY, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS tags (id INTEGER PRIMARY KEY, group_id INTEGER NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS autocreation_rules (id INTEGER PRIMARY KEY, priority INTEGER NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS autocreation_executions (id TEXT PRIMARY KEY, started_at TEXT NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS stream_stats (stream_id INTEGER PRIMARY KEY, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS snapshots (id INTEGER PRIMARY KEY AUTOINCREMENT, m3u_account_id INTEGER NOT NULL, taken_at TEXT NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS change_logs (id INTEGER PRIMARY KEY AUTOINCREMENT, m3u_account_id INTEGER NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS digest_settings (id INTEGER PRIMARY KEY CHECK (id = 0), data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS scheduled_tasks (task_id TEXT PRIMARY KEY, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS task_schedules (id INTEGER PRIMARY KEY AUTOINCREMENT, task_id TEXT NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS task_runs (run_id TEXT PRIMARY KEY, task_id TEXT NOT NULL, started_at TEXT NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS tls_settings (id INTEGER PRIMARY KEY CHECK (id = 0), data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS notifications (id TEXT PRIMARY KEY, source TEXT NOT NULL, source_id TEXT, created_at TEXT NOT NULL, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS epg_profiles (id INTEGER PRIMARY KEY AUTOINCREMENT, data TEXT NOT NULL);
        ",
    )
    .map_err(backend_err)?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_rule_groups(&self) -> Result<Vec<NormalizationRuleGroup>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT data FROM rule_groups ORDER BY priority ASC, id ASC")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            let json = row.map_err(backend_err)?;
            out.push(serde_json::from_str(&json).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn upsert_rule_group(&self, group: NormalizationRuleGroup) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&group).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO rule_groups (id, priority, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET priority = excluded.priority, data = excluded.data",
            params![group.id, group.priority, json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_rule_group(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM rule_groups WHERE id = ?1", params![id])
            .map_err(backend_err)?;
        conn.execute("DELETE FROM rules WHERE group_id = ?1", params![id])
            .map_err(backend_err)?;
        Ok(())
    }

    async fn list_rules(&self, group_id: Option<i64>) -> Result<Vec<NormalizationRule>> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        let mut push_row = |json: String| -> Result<()> {
            out.push(serde_json::from_str(&json).map_err(ser_err)?);
            Ok(())
        };
        if let Some(gid) = group_id {
            let mut stmt = conn
                .prepare("SELECT data FROM rules WHERE group_id = ?1 ORDER BY priority ASC, id ASC")
                .map_err(backend_err)?;
            let rows = stmt.query_map(params![gid], |row| row.get::<_, String>(0)).map_err(backend_err)?;
            for row in rows {
                push_row(row.map_err(backend_err)?)?;
            }
        } else {
            let mut stmt = conn
                .prepare("SELECT data FROM rules ORDER BY priority ASC, id ASC")
                .map_err(backend_err)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(backend_err)?;
            for row in rows {
                push_row(row.map_err(backend_err)?)?;
            }
        }
        Ok(out)
    }

    async fn upsert_rule(&self, rule: NormalizationRule) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&rule).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO rules (id, group_id, priority, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET group_id = excluded.group_id, priority = excluded.priority, data = excluded.data",
            params![rule.id, rule.group_id, rule.priority, json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_rule(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM rules WHERE id = ?1", params![id])
            .map_err(backend_err)?;
        Ok(())
    }

    async fn list_tag_groups(&self) -> Result<Vec<TagGroup>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT data FROM tag_groups").map_err(backend_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn list_tags(&self, group_id: i64) -> Result<Vec<Tag>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT data FROM tags WHERE group_id = ?1")
            .map_err(backend_err)?;
        let rows = stmt.query_map(params![group_id], |row| row.get::<_, String>(0)).map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn upsert_tag(&self, tag: Tag) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&tag).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO tags (id, group_id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET group_id = excluded.group_id, data = excluded.data",
            params![tag.id, tag.group_id, json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_tag(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM tags WHERE id = ?1", params![id])
            .map_err(backend_err)?;
        Ok(())
    }

    async fn list_autocreation_rules(&self) -> Result<Vec<AutoCreationRule>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT data FROM autocreation_rules ORDER BY priority ASC, id ASC")
            .map_err(backend_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn upsert_autocreation_rule(&self, rule: AutoCreationRule) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&rule).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO autocreation_rules (id, priority, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET priority = excluded.priority, data = excluded.data",
            params![rule.id, rule.priority, json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_autocreation_execution(
        &self,
        id: Uuid,
    ) -> Result<Option<AutoCreationExecution>> {
        let conn = self.conn.lock().await;
        let json: Option<String> = conn
            .query_row(
                "SELECT data FROM autocreation_executions WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        json.map(|j| serde_json::from_str(&j).map_err(ser_err))
            .transpose()
    }

    async fn save_autocreation_execution(&self, exec: AutoCreationExecution) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&exec).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO autocreation_executions (id, started_at, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![exec.id.to_string(), exec.started_at.to_rfc3339(), json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_autocreation_executions(
        &self,
        limit: usize,
    ) -> Result<Vec<AutoCreationExecution>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT data FROM autocreation_executions ORDER BY started_at DESC LIMIT ?1")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn get_stream_stats(&self, stream_id: i64) -> Result<Option<StreamStats>> {
        let conn = self.conn.lock().await;
        let json: Option<String> = conn
            .query_row(
                "SELECT data FROM stream_stats WHERE stream_id = ?1",
                params![stream_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        json.map(|j| serde_json::from_str(&j).map_err(ser_err)).transpose()
    }

    async fn list_stream_stats(&self) -> Result<Vec<StreamStats>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT data FROM stream_stats").map_err(backend_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn upsert_stream_stats(&self, stats: StreamStats) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&stats).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO stream_stats (stream_id, data) VALUES (?1, ?2)
             ON CONFLICT(stream_id) DO UPDATE SET data = excluded.data",
            params![stats.stream_id, json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn latest_snapshot(&self, m3u_account_id: i64) -> Result<Option<M3USnapshot>> {
        let conn = self.conn.lock().await;
        let json: Option<String> = conn
            .query_row(
                "SELECT data FROM snapshots WHERE m3u_account_id = ?1 ORDER BY taken_at DESC LIMIT 1",
                params![m3u_account_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        json.map(|j| serde_json::from_str(&j).map_err(ser_err)).transpose()
    }

    async fn save_snapshot(&self, snapshot: M3USnapshot) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&snapshot).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO snapshots (m3u_account_id, taken_at, data) VALUES (?1, ?2, ?3)",
            params![
                snapshot.m3u_account_id,
                snapshot.taken_at.to_rfc3339(),
                json
            ],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn insert_change_logs(&self, logs: Vec<M3UChangeLog>) -> Result<()> {
        let conn = self.conn.lock().await;
        for log in logs {
            let json = serde_json::to_string(&log).map_err(ser_err)?;
            conn.execute(
                "INSERT INTO change_logs (m3u_account_id, data) VALUES (?1, ?2)",
                params![log.m3u_account_id, json],
            )
            .map_err(backend_err)?;
        }
        Ok(())
    }

    async fn pending_change_logs(&self, m3u_account_id: Option<i64>) -> Result<Vec<M3UChangeLog>> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        if let Some(id) = m3u_account_id {
            let mut stmt = conn
                .prepare("SELECT data FROM change_logs WHERE m3u_account_id = ?1 ORDER BY id ASC")
                .map_err(backend_err)?;
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0)).map_err(backend_err)?;
            for row in rows {
                out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
            }
        } else {
            let mut stmt = conn
                .prepare("SELECT data FROM change_logs ORDER BY id ASC")
                .map_err(backend_err)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(backend_err)?;
            for row in rows {
                out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
            }
        }
        Ok(out)
    }

    async fn get_digest_settings(&self) -> Result<M3UDigestSettings> {
        let conn = self.conn.lock().await;
        let json: Option<String> = conn
            .query_row("SELECT data FROM digest_settings WHERE id = 0", [], |row| row.get(0))
            .optional()
            .map_err(backend_err)?;
        match json {
            Some(j) => serde_json::from_str(&j).map_err(ser_err),
            None => Ok(M3UDigestSettings::default()),
        }
    }

    async fn save_digest_settings(&self, settings: M3UDigestSettings) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&settings).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO digest_settings (id, data) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT data FROM scheduled_tasks").map_err(backend_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn upsert_scheduled_task(&self, task: ScheduledTask) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&task).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO scheduled_tasks (task_id, data) VALUES (?1, ?2)
             ON CONFLICT(task_id) DO UPDATE SET data = excluded.data",
            params![task.task_id, json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_task_schedules(&self, task_id: Option<&str>) -> Result<Vec<TaskSchedule>> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        if let Some(tid) = task_id {
            let mut stmt = conn
                .prepare("SELECT data FROM task_schedules WHERE task_id = ?1")
                .map_err(backend_err)?;
            let rows = stmt.query_map(params![tid], |row| row.get::<_, String>(0)).map_err(backend_err)?;
            for row in rows {
                out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
            }
        } else {
            let mut stmt = conn.prepare("SELECT data FROM task_schedules").map_err(backend_err)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(backend_err)?;
            for row in rows {
                out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
            }
        }
        Ok(out)
    }

    async fn upsert_task_schedule(&self, mut schedule: TaskSchedule) -> Result<i64> {
        let conn = self.conn.lock().await;
        if schedule.id == 0 {
            let json = serde_json::to_string(&schedule).map_err(ser_err)?;
            conn.execute(
                "INSERT INTO task_schedules (task_id, data) VALUES (?1, ?2)",
                params![schedule.task_id, json],
            )
            .map_err(backend_err)?;
            schedule.id = conn.last_insert_rowid();
            let json = serde_json::to_string(&schedule).map_err(ser_err)?;
            conn.execute(
                "UPDATE task_schedules SET data = ?1 WHERE id = ?2",
                params![json, schedule.id],
            )
            .map_err(backend_err)?;
        } else {
            let json = serde_json::to_string(&schedule).map_err(ser_err)?;
            conn.execute(
                "INSERT INTO task_schedules (id, task_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET task_id = excluded.task_id, data = excluded.data",
                params![schedule.id, schedule.task_id, json],
            )
            .map_err(backend_err)?;
        }
        Ok(schedule.id)
    }

    async fn save_task_run(&self, run: TaskRun) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&run).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO task_runs (run_id, task_id, started_at, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id) DO UPDATE SET data = excluded.data",
            params![run.run_id.to_string(), run.task_id, run.started_at.to_rfc3339(), json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn task_run_history(
        &self,
        task_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRun>> {
        let conn = self.conn.lock().await;
        let mut out = Vec::new();
        if let Some(tid) = task_id {
            let mut stmt = conn
                .prepare(
                    "SELECT data FROM task_runs WHERE task_id = ?1 ORDER BY started_at DESC LIMIT ?2 OFFSET ?3",
                )
                .map_err(backend_err)?;
            let rows = stmt
                .query_map(params![tid, limit as i64, offset as i64], |row| row.get::<_, String>(0))
                .map_err(backend_err)?;
            for row in rows {
                out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
            }
        } else {
            let mut stmt = conn
                .prepare("SELECT data FROM task_runs ORDER BY started_at DESC LIMIT ?1 OFFSET ?2")
                .map_err(backend_err)?;
            let rows = stmt
                .query_map(params![limit as i64, offset as i64], |row| row.get::<_, String>(0))
                .map_err(backend_err)?;
            for row in rows {
                out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
            }
        }
        Ok(out)
    }

    async fn prune_task_runs(&self, older_than: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute("DELETE FROM task_runs WHERE started_at < ?1", params![older_than.to_rfc3339()])
            .map_err(backend_err)?;
        Ok(removed)
    }

    async fn get_tls_settings(&self) -> Result<TlsSettings> {
        let conn = self.conn.lock().await;
        let json: Option<String> = conn
            .query_row("SELECT data FROM tls_settings WHERE id = 0", [], |row| row.get(0))
            .optional()
            .map_err(backend_err)?;
        match json {
            Some(j) => serde_json::from_str(&j).map_err(ser_err),
            None => Ok(TlsSettings::default()),
        }
    }

    async fn save_tls_settings(&self, settings: TlsSettings) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&settings).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO tls_settings (id, data) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![json],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn save_notification(&self, notification: Notification) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(&notification).map_err(ser_err)?;
        conn.execute(
            "INSERT INTO notifications (id, source, source_id, created_at, data) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![
                notification.id.to_string(),
                notification.source,
                notification.source_id,
                notification.created_at.to_rfc3339(),
                json
            ],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_notifications(&self, limit: usize) -> Result<Vec<Notification>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT data FROM notifications ORDER BY created_at DESC LIMIT ?1")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().await;
        let json: Option<String> = conn
            .query_row(
                "SELECT data FROM notifications WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        let json = json.ok_or_else(|| StoreError::NotFound {
            kind: "notification".into(),
            id: id.to_string(),
        })?;
        let mut notification: Notification = serde_json::from_str(&json).map_err(ser_err)?;
        notification.read = true;
        let json = serde_json::to_string(&notification).map_err(ser_err)?;
        conn.execute(
            "UPDATE notifications SET data = ?1 WHERE id = ?2",
            params![json, id.to_string()],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn prune_notifications(&self, older_than: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id, data FROM notifications WHERE created_at < ?1")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map(params![older_than.to_rfc3339()], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(backend_err)?;

        let mut stale_ids = Vec::new();
        for row in rows {
            let (id, data) = row.map_err(backend_err)?;
            let notification: Notification = serde_json::from_str(&data).map_err(ser_err)?;
            if notification.read {
                stale_ids.push(id);
            }
        }
        drop(stmt);

        for id in &stale_ids {
            conn.execute("DELETE FROM notifications WHERE id = ?1", params![id]).map_err(backend_err)?;
        }
        Ok(stale_ids.len())
    }

    async fn delete_notifications_by_source(&self, source: &str, source_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM notifications WHERE source = ?1 AND source_id = ?2",
            params![source, source_id],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_epg_profiles(&self) -> Result<Vec<DummyEpgProfile>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT data FROM epg_profiles").map_err(backend_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(backend_err)?).map_err(ser_err)?);
        }
        Ok(out)
    }

    async fn upsert_epg_profile(&self, mut profile: DummyEpgProfile) -> Result<i64> {
        let conn = self.conn.lock().await;
        if profile.id == 0 {
            let json = serde_json::to_string(&profile).map_err(ser_err)?;
            conn.execute("INSERT INTO epg_profiles (data) VALUES (?1)", params![json])
                .map_err(backend_err)?;
            profile.id = conn.last_insert_rowid();
            let json = serde_json::to_string(&profile).map_err(ser_err)?;
            conn.execute("UPDATE epg_profiles SET data = ?1 WHERE id = ?2", params![json, profile.id])
                .map_err(backend_err)?;
        } else {
            let json = serde_json::to_string(&profile).map_err(ser_err)?;
            conn.execute(
                "INSERT INTO epg_profiles (id, data) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![profile.id, json],
            )
            .map_err(backend_err)?;
        }
        Ok(profile.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_runs_migrations() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.list_rule_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_stats_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stats = StreamStats::new(10, "ESPN");
        store.upsert_stream_stats(stats.clone()).await.unwrap();
        let fetched = store.get_stream_stats(10).await.unwrap().unwrap();
        assert_eq!(fetched.stream_name, "ESPN");
    }

    #[tokio::test]
    async fn test_digest_settings_default_when_unset() {
        let store = SqliteStore::open_in_memory().unwrap();
        let settings = store.get_digest_settings().await.unwrap();
        assert!(!settings.enabled);
    }

    #[tokio::test]
    async fn test_task_schedule_autoincrement_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let schedule = TaskSchedule {
            id: 0,
            task_id: "m3u_refresh".into(),
            name: None,
            enabled: true,
            schedule_type: ScheduleType::Daily,
            interval_seconds: None,
            schedule_time: Some("03:00".into()),
            timezone: "UTC".into(),
            days_of_week: None,
            day_of_month: None,
            cron_expression: None,
            parameters: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        };
        let id = store.upsert_task_schedule(schedule).await.unwrap();
        assert!(id > 0);
        let schedules = store.list_task_schedules(Some("m3u_refresh")).await.unwrap();
        assert_eq!(schedules.len(), 1);
    }
}
