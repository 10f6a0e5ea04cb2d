//! The four shipped task definitions (`spec.md` §6): `stream_probe`,
//! `m3u_refresh`, `epg_refresh`, `cleanup`. Each wraps `ecm-core`
//! business logic in a `Task` the engine can schedule and cancel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use ecm_core::config::EcmConfig;
use ecm_core::probe::ffprobe::FfprobeStreamProber;
use ecm_core::probe::{run_probe_batch, ProbeProgress, ProbeTarget};
use ecm_core::store::models::{ParameterType, TaskDefinition, TaskParameter};
use ecm_core::store::Store;
use ecm_core::task_engine::{RunContext, Task, TaskOutcome};
use ecm_core::upstream::UpstreamClient;
use ecm_core::m3u;

fn param(name: &str, param_type: ParameterType, label: &str, description: &str, default: Value) -> TaskParameter {
    TaskParameter {
        name: name.into(),
        param_type,
        label: label.into(),
        description: description.into(),
        default,
        min: None,
        max: None,
        source: None,
    }
}

pub fn definitions() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition {
            task_id: "stream_probe".into(),
            task_name: "Stream Probe".into(),
            description: "Probe stream URLs and record resolution/bitrate/codec/liveness.".into(),
            parameter_schema: vec![
                param("stream_ids", ParameterType::NumberArray, "Streams", "Specific stream ids to probe; empty probes every stream.", json!([])),
                param("force", ParameterType::Boolean, "Force", "Ignore skip_recently_probed_hours.", json!(false)),
            ],
        },
        TaskDefinition {
            task_id: "m3u_refresh".into(),
            task_name: "M3U Refresh".into(),
            description: "Trigger an upstream M3U refresh, then diff and digest the result.".into(),
            parameter_schema: vec![param(
                "m3u_account_id",
                ParameterType::Number,
                "M3U Account",
                "Upstream M3U account id to refresh.",
                Value::Null,
            )],
        },
        TaskDefinition {
            task_id: "epg_refresh".into(),
            task_name: "EPG Refresh".into(),
            description: "Trigger an upstream EPG data source refresh.".into(),
            parameter_schema: vec![param(
                "epg_source_id",
                ParameterType::Number,
                "EPG Source",
                "Upstream EPG data source id to refresh.",
                Value::Null,
            )],
        },
        TaskDefinition {
            task_id: "cleanup".into(),
            task_name: "Cleanup".into(),
            description: "Prune task run history and read notifications older than a retention window.".into(),
            parameter_schema: vec![param(
                "retention_days",
                ParameterType::Number,
                "Retention (days)",
                "Task runs and read notifications older than this are deleted.",
                json!(30),
            )],
        },
    ]
}

fn number_param(parameters: &Value, name: &str) -> Option<i64> {
    parameters.get(name).and_then(Value::as_i64)
}

pub struct StreamProbeTask {
    pub store: Arc<dyn Store>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub config: Arc<EcmConfig>,
}

#[async_trait]
impl Task for StreamProbeTask {
    async fn run(&self, ctx: &RunContext) -> TaskOutcome {
        let requested_ids: Vec<i64> = ctx
            .parameters
            .get("stream_ids")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        let force = ctx.parameters.get("force").and_then(Value::as_bool).unwrap_or(false);

        let streams = match if requested_ids.is_empty() {
            self.upstream.list_streams(None).await
        } else {
            self.upstream.get_streams_by_ids(&requested_ids).await
        } {
            Ok(streams) => streams,
            Err(e) => return TaskOutcome::error(format!("failed to list streams: {e}")),
        };

        let mut targets: Vec<ProbeTarget> = Vec::with_capacity(streams.len());
        for stream in &streams {
            if !force {
                if let Ok(Some(stats)) = self.store.get_stream_stats(stream.id).await {
                    let cutoff = Utc::now() - Duration::hours(self.config.probe.skip_recently_probed_hours as i64);
                    if let Some(last) = stats.last_probed_at {
                        if last > cutoff {
                            continue;
                        }
                    }
                }
            }
            targets.push(ProbeTarget { stream_id: stream.id, url: stream.url.clone(), name: stream.name.clone() });
        }

        let total = targets.len() as u64;
        let prober = Arc::new(FfprobeStreamProber::default());
        let final_progress: ProbeProgress = run_probe_batch(
            prober,
            self.store.clone(),
            self.config.probe.clone(),
            targets,
            tokio_util::sync::CancellationToken::new(),
            |_p: ProbeProgress| {},
        )
        .await;

        TaskOutcome::success(format!(
            "probed {} streams ({} ok, {} failed)",
            final_progress.completed, final_progress.success_count, final_progress.error_count
        ))
        .with_counts(total, final_progress.success_count as u64, final_progress.error_count as u64)
    }
}

pub struct M3uRefreshTask {
    pub store: Arc<dyn Store>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub config: Arc<EcmConfig>,
}

#[async_trait]
impl Task for M3uRefreshTask {
    async fn run(&self, ctx: &RunContext) -> TaskOutcome {
        let Some(account_id) = number_param(&ctx.parameters, "m3u_account_id") else {
            return TaskOutcome::error("m3u_account_id is required");
        };

        if let Err(e) = self.upstream.trigger_m3u_refresh(account_id).await {
            return TaskOutcome::error(format!("upstream refresh trigger failed: {e}"));
        }

        let logs = match m3u::detect_changes(self.upstream.as_ref(), self.store.as_ref(), account_id, &self.config.m3u).await {
            Ok(logs) => logs,
            Err(e) => return TaskOutcome::error(format!("change detection failed: {e}")),
        };

        if !logs.is_empty() {
            if let Ok(digest_settings) = self.store.get_digest_settings().await {
                if m3u::is_immediate(digest_settings.frequency) {
                    if let Err(e) = m3u::run_digest(self.store.as_ref(), &self.config, account_id).await {
                        return TaskOutcome::warning(format!("refresh succeeded but digest dispatch failed: {e}"))
                            .with_details(json!({ "changes": logs.len() }));
                    }
                }
            }
        }

        TaskOutcome::success(format!("{} changes detected", logs.len())).with_details(json!({ "changes": logs.len() }))
    }
}

pub struct EpgRefreshTask {
    pub upstream: Arc<dyn UpstreamClient>,
}

#[async_trait]
impl Task for EpgRefreshTask {
    async fn run(&self, ctx: &RunContext) -> TaskOutcome {
        let Some(source_id) = number_param(&ctx.parameters, "epg_source_id") else {
            return TaskOutcome::error("epg_source_id is required");
        };
        match self.upstream.trigger_epg_refresh(source_id).await {
            Ok(()) => TaskOutcome::success(format!("EPG source {source_id} refresh triggered")),
            Err(e) => TaskOutcome::error(format!("EPG refresh trigger failed: {e}")),
        }
    }
}

pub struct CleanupTask {
    pub store: Arc<dyn Store>,
}

#[async_trait]
impl Task for CleanupTask {
    async fn run(&self, ctx: &RunContext) -> TaskOutcome {
        let retention_days = ctx.parameters.get("retention_days").and_then(Value::as_i64).unwrap_or(30);
        let cutoff = Utc::now() - Duration::days(retention_days);

        let runs_removed = match self.store.prune_task_runs(cutoff).await {
            Ok(n) => n,
            Err(e) => return TaskOutcome::error(format!("failed to prune task runs: {e}")),
        };
        let notifications_removed = match self.store.prune_notifications(cutoff).await {
            Ok(n) => n,
            Err(e) => {
                return TaskOutcome::warning(format!("pruned {runs_removed} task runs but notification cleanup failed: {e}"))
                    .with_details(json!({ "task_runs_removed": runs_removed }))
            }
        };

        TaskOutcome::success(format!("removed {runs_removed} task runs, {notifications_removed} notifications"))
            .with_details(json!({ "task_runs_removed": runs_removed, "notifications_removed": notifications_removed }))
    }
}
