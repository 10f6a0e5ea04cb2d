//! Bulk-Commit Applier (Component M): validates and applies a batch of
//! channel/group operations against the upstream API in three phases —
//! validation, group creation, then ordered apply — remapping negative
//! temp ids assigned to channels created within the same batch.
//!
//! Grounded on `spec.md` §4.M directly: no single teacher file matches
//! this shape, but the plan-then-apply phase split and the
//! accumulate-errors-without-aborting loop follow
//! `autocreate::execution::apply_plan`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EcmError;
use crate::upstream::{ChannelInput, UpstreamClient};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BulkOperation {
    CreateChannel {
        temp_id: i64,
        name: String,
        channel_number: Option<f64>,
        group_name: Option<String>,
        tvg_id: Option<String>,
        gracenote_id: Option<String>,
        logo_url: Option<String>,
    },
    DeleteChannel {
        channel_id: i64,
    },
    UpdateChannel {
        channel_id: i64,
        name: Option<String>,
        channel_number: Option<f64>,
        group_name: Option<String>,
        tvg_id: Option<String>,
        gracenote_id: Option<String>,
        logo_url: Option<String>,
    },
    AddStreamToChannel {
        channel_id: i64,
        stream_id: i64,
    },
    RemoveStreamFromChannel {
        channel_id: i64,
        stream_id: i64,
    },
    ReorderChannelStreams {
        channel_id: i64,
        stream_ids: Vec<i64>,
    },
    BulkAssignChannelNumbers {
        assignments: Vec<(i64, f64)>,
    },
    CreateGroup {
        name: String,
    },
    DeleteChannelGroup {
        group_id: i64,
    },
    RenameChannelGroup {
        group_id: i64,
        name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCommitRequest {
    pub operations: Vec<BulkOperation>,
    pub groups_to_create: Vec<String>,
    pub validate_only: bool,
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingChannel,
    MissingStream,
    InvalidOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// `None` for issues raised against `groups_to_create` rather than
    /// a specific operation.
    pub operation_index: Option<usize>,
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    pub operation_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkCommitResult {
    pub success: bool,
    pub operations_applied: u64,
    pub operations_failed: u64,
    pub errors: Vec<OperationError>,
    pub temp_id_map: HashMap<i64, i64>,
    pub group_id_map: HashMap<String, i64>,
    pub validation_issues: Vec<ValidationIssue>,
}

/// Validate, then (unless `validate_only`) apply `request` against
/// `client`. Returns `Ok` with a populated `BulkCommitResult` in every
/// case except an upstream prefetch failure during validation; per-op
/// failures during apply are recorded in `errors`, never surfaced as
/// an `Err`.
pub async fn commit(client: &dyn UpstreamClient, request: BulkCommitRequest) -> Result<BulkCommitResult, EcmError> {
    let mut result = BulkCommitResult::default();

    let temp_ids_created: std::collections::HashSet<i64> = request
        .operations
        .iter()
        .filter_map(|op| match op {
            BulkOperation::CreateChannel { temp_id, .. } => Some(*temp_id),
            _ => None,
        })
        .collect();

    let existing_channels: HashMap<i64, ()> =
        client.list_channels().await?.into_iter().map(|c| (c.id, ())).collect();
    let existing_groups: HashMap<String, i64> =
        client.list_channel_groups().await?.into_iter().map(|g| (g.name, g.id)).collect();
    let referenced_stream_ids: Vec<i64> = request
        .operations
        .iter()
        .flat_map(|op| match op {
            BulkOperation::AddStreamToChannel { stream_id, .. } => vec![*stream_id],
            BulkOperation::RemoveStreamFromChannel { stream_id, .. } => vec![*stream_id],
            _ => Vec::new(),
        })
        .collect();
    let existing_streams: HashMap<i64, ()> = if referenced_stream_ids.is_empty() {
        HashMap::new()
    } else {
        client
            .get_streams_by_ids(&referenced_stream_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, ()))
            .collect()
    };

    for (index, op) in request.operations.iter().enumerate() {
        validate_operation(index, op, &existing_channels, &existing_streams, &temp_ids_created, &mut result.validation_issues);
    }

    let has_error_issue = result.validation_issues.iter().any(|i| i.severity == IssueSeverity::Error);

    if request.validate_only {
        result.success = !has_error_issue;
        return Ok(result);
    }
    if has_error_issue && !request.continue_on_error {
        result.success = false;
        return Ok(result);
    }

    // Phase 1: group creation, deduped, reusing an already-existing
    // group of the same name rather than erroring.
    let mut group_id_map = existing_groups;
    let mut to_create: Vec<&String> = request.groups_to_create.iter().collect();
    to_create.dedup_by(|a, b| a == b);
    for name in to_create {
        if group_id_map.contains_key(name) {
            continue;
        }
        match client.create_channel_group(name).await {
            Ok(group) => {
                group_id_map.insert(name.clone(), group.id);
            }
            Err(_) => {
                // Upstream reports "already exists" as a generic error;
                // fall back to a fresh lookup rather than threading its
                // error-body shape through this layer.
                if let Ok(groups) = client.list_channel_groups().await {
                    if let Some(g) = groups.into_iter().find(|g| &g.name == name) {
                        group_id_map.insert(name.clone(), g.id);
                        continue;
                    }
                }
                result.validation_issues.push(ValidationIssue {
                    operation_index: None,
                    kind: IssueKind::InvalidOperation,
                    severity: IssueSeverity::Error,
                    message: format!("could not create or reuse group {name:?}"),
                });
            }
        }
    }

    // Phase 2: apply in submission order, resolving temp ids and group
    // names through the running maps as they're populated.
    let mut temp_id_map: HashMap<i64, i64> = HashMap::new();
    for (index, op) in request.operations.iter().enumerate() {
        let outcome = apply_operation(client, op, &mut temp_id_map, &mut group_id_map).await;
        match outcome {
            Ok(()) => result.operations_applied += 1,
            Err(message) => {
                result.operations_failed += 1;
                result.errors.push(OperationError { operation_index: index, message });
                if !request.continue_on_error {
                    break;
                }
            }
        }
    }

    result.temp_id_map = temp_id_map;
    result.group_id_map = group_id_map;
    result.success = if request.continue_on_error {
        result.operations_applied > 0 && !has_error_issue
    } else {
        result.operations_failed == 0 && !has_error_issue
    };
    Ok(result)
}

fn validate_operation(
    index: usize,
    op: &BulkOperation,
    existing_channels: &HashMap<i64, ()>,
    existing_streams: &HashMap<i64, ()>,
    temp_ids_created: &std::collections::HashSet<i64>,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut issue = |kind: IssueKind, severity: IssueSeverity, message: String| {
        issues.push(ValidationIssue { operation_index: Some(index), kind, severity, message });
    };
    let channel_exists = |id: i64| id < 0 && temp_ids_created.contains(&id) || existing_channels.contains_key(&id);

    match op {
        BulkOperation::CreateChannel { name, .. } if name.trim().is_empty() => {
            issue(IssueKind::InvalidOperation, IssueSeverity::Warning, "channel name is empty".into());
        }
        BulkOperation::DeleteChannel { channel_id }
        | BulkOperation::UpdateChannel { channel_id, .. }
        | BulkOperation::AddStreamToChannel { channel_id, .. }
        | BulkOperation::RemoveStreamFromChannel { channel_id, .. }
        | BulkOperation::ReorderChannelStreams { channel_id, .. } => {
            if !channel_exists(*channel_id) {
                issue(IssueKind::MissingChannel, IssueSeverity::Error, format!("channel {channel_id} not found"));
            }
            if let BulkOperation::AddStreamToChannel { stream_id, .. } | BulkOperation::RemoveStreamFromChannel { stream_id, .. } = op {
                if !existing_streams.contains_key(stream_id) {
                    issue(IssueKind::MissingStream, IssueSeverity::Error, format!("stream {stream_id} not found"));
                }
            }
            if let BulkOperation::ReorderChannelStreams { stream_ids, .. } = op {
                if stream_ids.is_empty() {
                    issue(IssueKind::InvalidOperation, IssueSeverity::Warning, "reorder with no stream ids".into());
                }
            }
        }
        BulkOperation::BulkAssignChannelNumbers { assignments } => {
            if assignments.is_empty() {
                issue(IssueKind::InvalidOperation, IssueSeverity::Warning, "no assignments given".into());
            }
            for (channel_id, _) in assignments {
                if !channel_exists(*channel_id) {
                    issue(IssueKind::MissingChannel, IssueSeverity::Error, format!("channel {channel_id} not found"));
                }
            }
        }
        BulkOperation::CreateGroup { name } | BulkOperation::RenameChannelGroup { name, .. } if name.trim().is_empty() => {
            issue(IssueKind::InvalidOperation, IssueSeverity::Warning, "group name is empty".into());
        }
        _ => {}
    }
}

async fn apply_operation(
    client: &dyn UpstreamClient,
    op: &BulkOperation,
    temp_id_map: &mut HashMap<i64, i64>,
    group_id_map: &mut HashMap<String, i64>,
) -> Result<(), String> {
    match op {
        BulkOperation::CreateChannel { temp_id, name, channel_number, group_name, tvg_id, gracenote_id, logo_url } => {
            let group_id = group_name.as_ref().and_then(|g| group_id_map.get(g)).copied();
            let input = ChannelInput {
                name: Some(name.clone()),
                channel_number: *channel_number,
                group_id,
                tvg_id: tvg_id.clone(),
                gracenote_id: gracenote_id.clone(),
                logo_url: logo_url.clone(),
            };
            let channel = client.create_channel(input).await.map_err(|e| e.to_string())?;
            temp_id_map.insert(*temp_id, channel.id);
            Ok(())
        }
        BulkOperation::DeleteChannel { channel_id } => {
            let id = resolve_channel_id(*channel_id, temp_id_map)?;
            client.delete_channel(id).await.map_err(|e| e.to_string())
        }
        BulkOperation::UpdateChannel { channel_id, name, channel_number, group_name, tvg_id, gracenote_id, logo_url } => {
            let id = resolve_channel_id(*channel_id, temp_id_map)?;
            let group_id = group_name.as_ref().and_then(|g| group_id_map.get(g)).copied();
            let input = ChannelInput {
                name: name.clone(),
                channel_number: *channel_number,
                group_id,
                tvg_id: tvg_id.clone(),
                gracenote_id: gracenote_id.clone(),
                logo_url: logo_url.clone(),
            };
            client.update_channel(id, input).await.map_err(|e| e.to_string())?;
            Ok(())
        }
        BulkOperation::AddStreamToChannel { channel_id, stream_id } => {
            let id = resolve_channel_id(*channel_id, temp_id_map)?;
            client.add_stream_to_channel(id, *stream_id).await.map_err(|e| e.to_string())
        }
        BulkOperation::RemoveStreamFromChannel { channel_id, stream_id } => {
            let id = resolve_channel_id(*channel_id, temp_id_map)?;
            client.remove_stream_from_channel(id, *stream_id).await.map_err(|e| e.to_string())
        }
        BulkOperation::ReorderChannelStreams { channel_id, stream_ids } => {
            let id = resolve_channel_id(*channel_id, temp_id_map)?;
            client.reorder_channel_streams(id, stream_ids).await.map_err(|e| e.to_string())
        }
        BulkOperation::BulkAssignChannelNumbers { assignments } => {
            let mut resolved = Vec::with_capacity(assignments.len());
            for (channel_id, number) in assignments {
                resolved.push((resolve_channel_id(*channel_id, temp_id_map)?, *number));
            }
            client.bulk_assign_channel_numbers(&resolved).await.map_err(|e| e.to_string())
        }
        BulkOperation::CreateGroup { name } => {
            let group = client.create_channel_group(name).await.map_err(|e| e.to_string())?;
            group_id_map.insert(name.clone(), group.id);
            Ok(())
        }
        BulkOperation::DeleteChannelGroup { group_id } => client.delete_channel_group(*group_id).await.map_err(|e| e.to_string()),
        BulkOperation::RenameChannelGroup { group_id, name } => {
            client.rename_channel_group(*group_id, name).await.map_err(|e| e.to_string())?;
            Ok(())
        }
    }
}

fn resolve_channel_id(id: i64, temp_id_map: &HashMap<i64, i64>) -> Result<i64, String> {
    if id >= 0 {
        return Ok(id);
    }
    temp_id_map.get(&id).copied().ok_or_else(|| format!("temp id {id} was never assigned a real channel"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{Channel, ChannelGroup, EpgDataSource, Logo, M3UAccount, M3UFilter, M3UProfile, Stream, UpstreamGroupState};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockClient {
        channels: Mutex<Vec<Channel>>,
        groups: Mutex<Vec<ChannelGroup>>,
        streams: Vec<Stream>,
        next_channel_id: Mutex<i64>,
        next_group_id: Mutex<i64>,
    }

    #[async_trait]
    impl UpstreamClient for MockClient {
        async fn list_channels(&self) -> crate::upstream::Result<Vec<Channel>> {
            Ok(self.channels.lock().unwrap().clone())
        }
        async fn get_channel(&self, _id: i64) -> crate::upstream::Result<Channel> {
            unimplemented!()
        }
        async fn create_channel(&self, input: ChannelInput) -> crate::upstream::Result<Channel> {
            let mut next_id = self.next_channel_id.lock().unwrap();
            *next_id += 1;
            let channel = Channel {
                id: *next_id,
                name: input.name.unwrap_or_default(),
                channel_number: input.channel_number,
                group_id: input.group_id,
                tvg_id: input.tvg_id,
                gracenote_id: input.gracenote_id,
                logo_url: input.logo_url,
                stream_ids: Vec::new(),
                is_auto_created: false,
            };
            self.channels.lock().unwrap().push(channel.clone());
            Ok(channel)
        }
        async fn update_channel(&self, id: i64, _input: ChannelInput) -> crate::upstream::Result<Channel> {
            self.channels
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| crate::error::UpstreamError::RequestFailed { status: 404, message: "not found".into() })
        }
        async fn delete_channel(&self, id: i64) -> crate::upstream::Result<()> {
            let mut channels = self.channels.lock().unwrap();
            let before = channels.len();
            channels.retain(|c| c.id != id);
            if channels.len() == before {
                return Err(crate::error::UpstreamError::RequestFailed { status: 404, message: "channel not found".into() });
            }
            Ok(())
        }
        async fn list_channel_groups(&self) -> crate::upstream::Result<Vec<ChannelGroup>> {
            Ok(self.groups.lock().unwrap().clone())
        }
        async fn create_channel_group(&self, name: &str) -> crate::upstream::Result<ChannelGroup> {
            let mut next_id = self.next_group_id.lock().unwrap();
            *next_id += 1;
            let group = ChannelGroup { id: *next_id, name: name.to_string() };
            self.groups.lock().unwrap().push(group.clone());
            Ok(group)
        }
        async fn delete_channel_group(&self, _id: i64) -> crate::upstream::Result<()> {
            Ok(())
        }
        async fn rename_channel_group(&self, id: i64, name: &str) -> crate::upstream::Result<ChannelGroup> {
            Ok(ChannelGroup { id, name: name.to_string() })
        }
        async fn list_streams(&self, _m3u_account_id: Option<i64>) -> crate::upstream::Result<Vec<Stream>> {
            Ok(self.streams.clone())
        }
        async fn get_streams_by_ids(&self, ids: &[i64]) -> crate::upstream::Result<Vec<Stream>> {
            Ok(self.streams.iter().filter(|s| ids.contains(&s.id)).cloned().collect())
        }
        async fn add_stream_to_channel(&self, _channel_id: i64, _stream_id: i64) -> crate::upstream::Result<()> {
            Ok(())
        }
        async fn remove_stream_from_channel(&self, _channel_id: i64, _stream_id: i64) -> crate::upstream::Result<()> {
            Ok(())
        }
        async fn reorder_channel_streams(&self, _channel_id: i64, _stream_ids: &[i64]) -> crate::upstream::Result<()> {
            Ok(())
        }
        async fn bulk_assign_channel_numbers(&self, _assignments: &[(i64, f64)]) -> crate::upstream::Result<()> {
            Ok(())
        }
        async fn list_logos(&self) -> crate::upstream::Result<Vec<Logo>> {
            Ok(Vec::new())
        }
        async fn list_m3u_accounts(&self) -> crate::upstream::Result<Vec<M3UAccount>> {
            Ok(Vec::new())
        }
        async fn trigger_m3u_refresh(&self, _m3u_account_id: i64) -> crate::upstream::Result<()> {
            Ok(())
        }
        async fn trigger_epg_refresh(&self, _epg_source_id: i64) -> crate::upstream::Result<()> {
            Ok(())
        }
        async fn list_m3u_filters(&self, _m3u_account_id: i64) -> crate::upstream::Result<Vec<M3UFilter>> {
            Ok(Vec::new())
        }
        async fn list_m3u_group_states(&self, _m3u_account_id: i64) -> crate::upstream::Result<Vec<UpstreamGroupState>> {
            Ok(Vec::new())
        }
        async fn list_m3u_profiles(&self) -> crate::upstream::Result<Vec<M3UProfile>> {
            Ok(Vec::new())
        }
        async fn list_epg_data(&self) -> crate::upstream::Result<Vec<EpgDataSource>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_create_channel_then_attach_stream_via_temp_id() {
        let client = MockClient {
            streams: vec![Stream { id: 42, name: "ESPN".into(), url: String::new(), group_name: None, m3u_account_id: 1, m3u_account_priority: None }],
            ..Default::default()
        };
        let request = BulkCommitRequest {
            operations: vec![
                BulkOperation::CreateChannel {
                    temp_id: -1,
                    name: "ESPN HD".into(),
                    channel_number: Some(100.0),
                    group_name: None,
                    tvg_id: None,
                    gracenote_id: None,
                    logo_url: None,
                },
                BulkOperation::AddStreamToChannel { channel_id: -1, stream_id: 42 },
            ],
            groups_to_create: Vec::new(),
            validate_only: false,
            continue_on_error: false,
        };
        let result = commit(&client, request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.operations_applied, 2);
        assert_eq!(result.temp_id_map.get(&-1), Some(&1));
    }

    #[tokio::test]
    async fn test_validate_only_does_not_mutate() {
        let client = MockClient::default();
        let request = BulkCommitRequest {
            operations: vec![BulkOperation::DeleteChannel { channel_id: 99 }],
            groups_to_create: Vec::new(),
            validate_only: true,
            continue_on_error: false,
        };
        let result = commit(&client, request).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.validation_issues.len(), 1);
        assert_eq!(result.validation_issues[0].kind, IssueKind::MissingChannel);
    }

    #[tokio::test]
    async fn test_abort_without_mutation_on_error_when_not_continuing() {
        let client = MockClient::default();
        let request = BulkCommitRequest {
            operations: vec![
                BulkOperation::DeleteChannel { channel_id: 99 },
                BulkOperation::CreateGroup { name: "Sports".into() },
            ],
            groups_to_create: Vec::new(),
            validate_only: false,
            continue_on_error: false,
        };
        let result = commit(&client, request).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.operations_applied, 0);
        assert!(client.groups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_group_already_exists_is_reused() {
        let client = MockClient::default();
        client.create_channel_group("Sports").await.unwrap();
        let request = BulkCommitRequest {
            operations: Vec::new(),
            groups_to_create: vec!["Sports".into()],
            validate_only: false,
            continue_on_error: false,
        };
        let result = commit(&client, request).await.unwrap();
        assert_eq!(result.group_id_map.get("Sports"), Some(&1));
        assert_eq!(client.groups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_continue_on_error_applies_remaining_ops() {
        let client = MockClient::default();
        let request = BulkCommitRequest {
            operations: vec![
                BulkOperation::DeleteChannel { channel_id: 99 },
                BulkOperation::CreateGroup { name: "Sports".into() },
            ],
            groups_to_create: Vec::new(),
            validate_only: false,
            continue_on_error: true,
        };
        let result = commit(&client, request).await.unwrap();
        assert_eq!(result.operations_applied, 1);
        assert_eq!(result.operations_failed, 1);
        // A missing_channel validation issue is still a fatal one even
        // under continue_on_error, so overall success stays false.
        assert!(!result.success);
    }
}
