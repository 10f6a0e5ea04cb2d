//! Applies an Auto-Creation plan through the upstream client, in the
//! stable order `spec.md` §4.F mandates: groups first, channels next,
//! stream attachments last.

use std::collections::HashMap;

use crate::store::models::ExecutionConflict;
use crate::upstream::UpstreamClient;

use super::rules::PlanEntry;

/// Outcome of applying one plan against the upstream API.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub channels_created: u64,
    pub channels_updated: u64,
    pub groups_created: u64,
    pub streams_merged: u64,
    pub conflicts: Vec<ExecutionConflict>,
    pub created_channel_ids: Vec<i64>,
    pub created_group_ids: Vec<i64>,
}

/// Apply every plan entry. Per-entity failures are recorded as
/// conflicts and do not abort the remaining entries. `existing_channel_ids`
/// seeds the channel-key resolution map with channels that predate this
/// run, so `AttachToExisting`/`SetChannelNumber` entries can merge into a
/// genuinely pre-existing channel, not only one created earlier in this
/// same plan.
pub async fn apply_plan(
    client: &dyn UpstreamClient,
    entries: &[PlanEntry],
    existing_channel_ids: &HashMap<String, i64>,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();
    let mut group_ids: HashMap<String, i64> = HashMap::new();
    let mut channel_ids: HashMap<String, i64> = existing_channel_ids.clone();

    for entry in entries {
        if let PlanEntry::CreateGroup { name } = entry {
            match client.create_channel_group(name).await {
                Ok(group) => {
                    group_ids.insert(name.clone(), group.id);
                    outcome.created_group_ids.push(group.id);
                    outcome.groups_created += 1;
                }
                Err(e) => outcome.conflicts.push(ExecutionConflict {
                    stream_id: None,
                    channel_key: name.clone(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    for entry in entries {
        if let PlanEntry::CreateChannel {
            channel_key,
            name,
            group_name,
            ..
        } = entry
        {
            if channel_ids.contains_key(channel_key) {
                outcome.conflicts.push(ExecutionConflict {
                    stream_id: None,
                    channel_key: channel_key.clone(),
                    reason: "duplicate channel key within this execution".into(),
                });
                continue;
            }
            let group_id = group_name.as_ref().and_then(|g| group_ids.get(g)).copied();
            let input = crate::upstream::ChannelInput {
                name: Some(name.clone()),
                group_id,
                ..Default::default()
            };
            match client.create_channel(input).await {
                Ok(channel) => {
                    channel_ids.insert(channel_key.clone(), channel.id);
                    outcome.created_channel_ids.push(channel.id);
                    outcome.channels_created += 1;
                }
                Err(e) => outcome.conflicts.push(ExecutionConflict {
                    stream_id: None,
                    channel_key: channel_key.clone(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    for entry in entries {
        match entry {
            PlanEntry::AttachToExisting {
                channel_key,
                stream_id,
            } => {
                let Some(channel_id) = channel_ids.get(channel_key).copied() else {
                    outcome.conflicts.push(ExecutionConflict {
                        stream_id: Some(*stream_id),
                        channel_key: channel_key.clone(),
                        reason: "no channel resolved for this key".into(),
                    });
                    continue;
                };
                match client.add_stream_to_channel(channel_id, *stream_id).await {
                    Ok(()) => outcome.streams_merged += 1,
                    Err(e) => outcome.conflicts.push(ExecutionConflict {
                        stream_id: Some(*stream_id),
                        channel_key: channel_key.clone(),
                        reason: e.to_string(),
                    }),
                }
            }
            PlanEntry::SetChannelNumber {
                channel_key,
                number,
            } => {
                let Some(channel_id) = channel_ids.get(channel_key).copied() else {
                    continue;
                };
                let input = crate::upstream::ChannelInput {
                    channel_number: Some(*number),
                    ..Default::default()
                };
                match client.update_channel(channel_id, input).await {
                    Ok(_) => outcome.channels_updated += 1,
                    Err(e) => outcome.conflicts.push(ExecutionConflict {
                        stream_id: None,
                        channel_key: channel_key.clone(),
                        reason: e.to_string(),
                    }),
                }
            }
            PlanEntry::Skip { .. } | PlanEntry::CreateGroup { .. } | PlanEntry::CreateChannel { .. } => {}
        }
    }

    outcome
}

/// Undo an execution's effects by deleting every entity it created.
/// Best-effort: failures are logged, not propagated, since a partial
/// rollback is still strictly better than none.
pub async fn rollback(client: &dyn UpstreamClient, channel_ids: &[i64], group_ids: &[i64]) {
    for id in channel_ids {
        if let Err(e) = client.delete_channel(*id).await {
            tracing::warn!(channel_id = id, error = %e, "rollback: failed to delete channel");
        }
    }
    for id in group_ids {
        if let Err(e) = client.delete_channel_group(*id).await {
            tracing::warn!(group_id = id, error = %e, "rollback: failed to delete group");
        }
    }
}
