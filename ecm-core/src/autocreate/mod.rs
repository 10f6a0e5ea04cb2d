//! Auto-Creation Pipeline (Component F): turns streams into channels
//! per a prioritized rule set, planning before touching upstream state.
//!
//! Grounded on `spec.md` §4.F; the scheduled-task wrapper shape (config
//! fields `dry_run`/`m3u_account_ids`/`rule_ids`/`run_on_refresh`)
//! mirrors `original_source/backend/tasks/auto_creation.py`'s
//! `AutoCreationTask`.

pub mod execution;
pub mod rules;

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::config::AutoCreationSettings;
use crate::store::models::{AutoCreationExecution, AutoCreationRule, ExecutionMode, ExecutionStatus};
use crate::tags::TagIndex;
use crate::upstream::{Channel, ChannelGroup, Stream, UpstreamClient};

use rules::PlanEntry;

/// Parameters for one pipeline run, mirroring the scheduled task's
/// persisted config fields.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub dry_run: bool,
    pub triggered_by: String,
    pub m3u_account_ids: Vec<i64>,
    pub rule_ids: Vec<i64>,
}

fn is_excluded(stream: &Stream, settings: &AutoCreationSettings) -> bool {
    if let Some(sync_group) = &settings.auto_sync_group {
        if stream.group_name.as_deref() != Some(sync_group.as_str()) {
            return true;
        }
    }
    if let Some(group) = &stream.group_name {
        if settings.excluded_groups.iter().any(|g| g == group) {
            return true;
        }
    }
    settings
        .excluded_terms
        .iter()
        .any(|term| stream.name.to_lowercase().contains(&term.to_lowercase()))
}

/// Map every already-existing upstream channel to the same `channel_key`
/// a `CreateChannel` action would resolve to, so the plan-building loop
/// can detect "would duplicate an existing upstream channel" conflicts
/// and `apply_plan` can resolve `AttachToExisting` entries against
/// channels that predate this run.
fn existing_channel_keys(channels: &[Channel], groups: &[ChannelGroup]) -> HashMap<String, i64> {
    let group_names: HashMap<i64, &str> = groups.iter().map(|g| (g.id, g.name.as_str())).collect();
    channels
        .iter()
        .map(|c| {
            let group_name = c.group_id.and_then(|id| group_names.get(&id).copied());
            (rules::channel_key_for(&c.name, group_name), c.id)
        })
        .collect()
}

/// Run the pipeline to completion (dry-run or live), returning the
/// execution record. `all_streams` is the candidate pool from (A),
/// already scoped to `request.m3u_account_ids` by the caller.
pub async fn run_pipeline(
    client: &dyn UpstreamClient,
    settings: &AutoCreationSettings,
    tag_index: &TagIndex,
    rules: &[AutoCreationRule],
    all_streams: &[Stream],
    request: RunRequest,
) -> AutoCreationExecution {
    let started_at = Utc::now();
    let rule_filter: Option<HashSet<i64>> = if request.rule_ids.is_empty() {
        None
    } else {
        Some(request.rule_ids.iter().copied().collect())
    };

    let mut ordered_rules: Vec<&AutoCreationRule> = rules
        .iter()
        .filter(|r| r.enabled)
        .filter(|r| rule_filter.as_ref().is_none_or(|ids| ids.contains(&r.id)))
        .collect();
    ordered_rules.sort_by_key(|r| (r.priority, r.id));

    let candidates: Vec<&Stream> = all_streams
        .iter()
        .filter(|s| !is_excluded(s, settings))
        .collect();

    let existing_channels = client.list_channels().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "auto-creation: failed to list upstream channels for duplicate detection");
        Vec::new()
    });
    let existing_groups = client.list_channel_groups().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "auto-creation: failed to list upstream channel groups for duplicate detection");
        Vec::new()
    });
    let existing_keys = existing_channel_keys(&existing_channels, &existing_groups);

    let mut plan = Vec::new();
    let mut claimed_keys: HashMap<String, i64> = HashMap::new();
    let mut conflicts = Vec::new();
    let mut streams_matched = 0u64;

    for stream in &candidates {
        for rule in &ordered_rules {
            if !rules::matches(rule, stream, tag_index) {
                continue;
            }
            streams_matched += 1;
            let entries = rules::resolve_actions(rule, stream);
            for entry in entries {
                if let PlanEntry::CreateChannel { channel_key, .. } = &entry {
                    if let Some(existing_rule) = claimed_keys.get(channel_key) {
                        conflicts.push(crate::store::models::ExecutionConflict {
                            stream_id: Some(stream.id),
                            channel_key: channel_key.clone(),
                            reason: format!(
                                "channel key already targeted by rule {existing_rule} (priority order wins)"
                            ),
                        });
                        continue;
                    }
                    if existing_keys.contains_key(channel_key) {
                        conflicts.push(crate::store::models::ExecutionConflict {
                            stream_id: Some(stream.id),
                            channel_key: channel_key.clone(),
                            reason: "channel key already exists as an upstream channel".into(),
                        });
                        continue;
                    }
                    claimed_keys.insert(channel_key.clone(), rule.id);
                }
                plan.push(entry);
            }
            if rule.stop_on_first_match {
                break;
            }
        }
    }

    let mut execution = AutoCreationExecution {
        id: Uuid::new_v4(),
        rule_id: request.rule_ids.first().copied(),
        rule_name: if ordered_rules.len() == 1 {
            ordered_rules[0].name.clone()
        } else {
            "multiple".into()
        },
        mode: if request.dry_run {
            ExecutionMode::DryRun
        } else {
            ExecutionMode::Execute
        },
        triggered_by: request.triggered_by,
        started_at,
        finished_at: None,
        status: ExecutionStatus::Running,
        streams_evaluated: candidates.len() as u64,
        streams_matched,
        channels_created: 0,
        channels_updated: 0,
        groups_created: 0,
        streams_merged: 0,
        conflicts,
        created_channel_ids: Vec::new(),
        created_group_ids: Vec::new(),
    };

    if request.dry_run {
        execution.status = ExecutionStatus::Completed;
        execution.finished_at = Some(Utc::now());
        return execution;
    }

    let outcome = execution::apply_plan(client, &plan, &existing_keys).await;
    execution.channels_created = outcome.channels_created;
    execution.channels_updated = outcome.channels_updated;
    execution.groups_created = outcome.groups_created;
    execution.streams_merged = outcome.streams_merged;
    execution.conflicts.extend(outcome.conflicts);
    execution.created_channel_ids = outcome.created_channel_ids;
    execution.created_group_ids = outcome.created_group_ids;
    execution.status = if execution.conflicts.is_empty() {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Warning
    };
    execution.finished_at = Some(Utc::now());
    execution
}
