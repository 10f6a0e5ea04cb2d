//! M3U Change Detector and Digest Dispatcher (Components I, J):
//! snapshot diffing against the upstream playlist plus the filtered,
//! multi-channel digest fanout that rides on top of it.

pub mod digest;
pub mod snapshot;

use crate::config::{EcmConfig, M3USettings};
use crate::error::EcmError;
use crate::store::models::DigestFrequency;
use crate::store::Store;
use crate::upstream::UpstreamClient;

/// Take a fresh snapshot for one M3U account, diff it against the
/// stored snapshot, and persist the result if anything changed.
/// Returns the change-log rows inserted, if any.
pub async fn detect_changes(
    client: &dyn UpstreamClient,
    store: &dyn Store,
    m3u_account_id: i64,
    settings: &M3USettings,
) -> Result<Vec<crate::store::models::M3UChangeLog>, EcmError> {
    let group_states = client.list_m3u_group_states(m3u_account_id).await?;
    let streams = client.list_streams(Some(m3u_account_id)).await?;
    let current = snapshot::build_snapshot(m3u_account_id, &group_states, &streams, settings);

    let previous = store.latest_snapshot(m3u_account_id).await?;
    let result = snapshot::diff(previous.as_ref(), &current, settings);

    if !result.has_changes {
        return Ok(Vec::new());
    }

    store.save_snapshot(result.snapshot).await?;
    store.insert_change_logs(result.logs.clone()).await?;
    Ok(result.logs)
}

/// Run the digest pipeline for one M3U account's pending changes:
/// filter, render, dispatch, subject to `min_changes_threshold` and
/// `enabled`. Immediate-cadence accounts call this right after
/// `detect_changes`; the Task Engine calls it on the hourly/daily/
/// weekly cadence for everything else.
pub async fn run_digest(
    store: &dyn Store,
    config: &EcmConfig,
    m3u_account_id: i64,
) -> Result<(), EcmError> {
    let digest_settings = store.get_digest_settings().await?;
    if !digest_settings.enabled {
        return Ok(());
    }

    let pending = store.pending_change_logs(Some(m3u_account_id)).await?;
    if pending.len() < digest_settings.min_changes_threshold as usize {
        return Ok(());
    }

    let filtered = digest::apply_exclude_filters(&pending, &digest_settings);
    if filtered.is_empty() {
        return Ok(());
    }

    let rendered = digest::render(m3u_account_id, &filtered, &digest_settings);
    digest::dispatch(&rendered, &digest_settings, &config.notify).await;
    Ok(())
}

/// Should this account's pending changes fire right now under
/// `immediate` cadence, vs. waiting for the Task Engine's scheduled run?
pub fn is_immediate(frequency: DigestFrequency) -> bool {
    frequency == DigestFrequency::Immediate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::upstream::{Channel, ChannelGroup, ChannelInput, EpgDataSource, Logo, M3UAccount, M3UFilter, M3UProfile, Stream, UpstreamGroupState};
    use async_trait::async_trait;

    struct MockClient {
        groups: Vec<UpstreamGroupState>,
        streams: Vec<Stream>,
    }

    #[async_trait]
    impl UpstreamClient for MockClient {
        async fn list_channels(&self) -> crate::upstream::Result<Vec<Channel>> {
            Ok(Vec::new())
        }
        async fn get_channel(&self, _id: i64) -> crate::upstream::Result<Channel> {
            unimplemented!()
        }
        async fn create_channel(&self, _input: ChannelInput) -> crate::upstream::Result<Channel> {
            unimplemented!()
        }
        async fn update_channel(&self, _id: i64, _input: ChannelInput) -> crate::upstream::Result<Channel> {
            unimplemented!()
        }
        async fn delete_channel(&self, _id: i64) -> crate::upstream::Result<()> {
            unimplemented!()
        }
        async fn list_channel_groups(&self) -> crate::upstream::Result<Vec<ChannelGroup>> {
            Ok(Vec::new())
        }
        async fn create_channel_group(&self, _name: &str) -> crate::upstream::Result<ChannelGroup> {
            unimplemented!()
        }
        async fn delete_channel_group(&self, _id: i64) -> crate::upstream::Result<()> {
            unimplemented!()
        }
        async fn rename_channel_group(&self, _id: i64, _name: &str) -> crate::upstream::Result<ChannelGroup> {
            unimplemented!()
        }
        async fn list_streams(&self, _m3u_account_id: Option<i64>) -> crate::upstream::Result<Vec<Stream>> {
            Ok(self.streams.clone())
        }
        async fn get_streams_by_ids(&self, _ids: &[i64]) -> crate::upstream::Result<Vec<Stream>> {
            Ok(Vec::new())
        }
        async fn add_stream_to_channel(&self, _channel_id: i64, _stream_id: i64) -> crate::upstream::Result<()> {
            unimplemented!()
        }
        async fn remove_stream_from_channel(&self, _channel_id: i64, _stream_id: i64) -> crate::upstream::Result<()> {
            unimplemented!()
        }
        async fn reorder_channel_streams(&self, _channel_id: i64, _stream_ids: &[i64]) -> crate::upstream::Result<()> {
            unimplemented!()
        }
        async fn bulk_assign_channel_numbers(&self, _assignments: &[(i64, f64)]) -> crate::upstream::Result<()> {
            unimplemented!()
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
            Ok(self.groups.clone())
        }
        async fn list_m3u_profiles(&self) -> crate::upstream::Result<Vec<M3UProfile>> {
            Ok(Vec::new())
        }
        async fn list_epg_data(&self) -> crate::upstream::Result<Vec<EpgDataSource>> {
            Ok(Vec::new())
        }
    }

    fn stream(name: &str, group: &str) -> Stream {
        Stream {
            id: 0,
            name: name.to_string(),
            url: String::new(),
            group_name: Some(group.to_string()),
            m3u_account_id: 1,
            m3u_account_priority: None,
        }
    }

    #[tokio::test]
    async fn test_detect_changes_persists_on_first_snapshot() {
        let client = MockClient {
            groups: vec![UpstreamGroupState { name: "Sports".into(), enabled: true }],
            streams: vec![stream("ESPN", "Sports")],
        };
        let store = MemoryStore::new();
        let settings = M3USettings { sample_stream_names_per_group: 500, change_log_stream_name_cap: 50 };
        let logs = detect_changes(&client, &store, 1, &settings).await.unwrap();
        assert!(!logs.is_empty());
        assert!(store.latest_snapshot(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_detect_changes_no_diff_persists_nothing() {
        let client = MockClient {
            groups: vec![UpstreamGroupState { name: "Sports".into(), enabled: true }],
            streams: vec![stream("ESPN", "Sports")],
        };
        let store = MemoryStore::new();
        let settings = M3USettings { sample_stream_names_per_group: 500, change_log_stream_name_cap: 50 };
        detect_changes(&client, &store, 1, &settings).await.unwrap();
        let logs = detect_changes(&client, &store, 1, &settings).await.unwrap();
        assert!(logs.is_empty());
    }
}
