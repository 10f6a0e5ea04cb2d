//! End-to-end coverage for the six literal scenarios.
//!
//! Each test exercises the same public API a caller assembling the
//! real pipeline would use, rather than reaching into private module
//! internals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ecm_core::bulk::{self, BulkCommitRequest, BulkOperation};
use ecm_core::config::M3USettings;
use ecm_core::m3u::digest::{apply_exclude_filters, render};
use ecm_core::m3u::snapshot::{build_snapshot, diff};
use ecm_core::normalize::normalize;
use ecm_core::probe::{run_probe_batch, ProbeOutcome, ProbeTarget, StreamProber};
use ecm_core::store::models::{
    ChannelAssignment, ConditionLogic, DummyEpgProfile, M3UDigestSettings, M3UGroupSummary,
    M3USnapshot, NameSource, NormalizationRule, NormalizationRuleGroup,
};
use ecm_core::store::{MemoryStore, Store};
use ecm_core::tags::TagIndex;
use ecm_core::upstream::{
    Channel, ChannelGroup, ChannelInput, EpgDataSource, Logo, M3UAccount, M3UFilter, M3UProfile,
    Stream, UpstreamClient, UpstreamGroupState,
};
use ecm_core::xmltv::{generate_for_profile, render_document, ChannelSource};

// -- Scenario 1: normalize "ESPN HD" -----------------------------------------

#[test]
fn scenario_1_normalize_espn_hd_removes_hd() {
    let group = NormalizationRuleGroup {
        id: 1,
        name: "Quality tags".into(),
        description: None,
        enabled: true,
        priority: 0,
        is_builtin: false,
    };
    let rule = NormalizationRule {
        id: 1,
        group_id: 1,
        name: "strip HD".into(),
        enabled: true,
        priority: 0,
        condition_type: Some("contains".into()),
        condition_value: Some("HD".into()),
        case_sensitive: false,
        conditions: Vec::new(),
        condition_logic: ConditionLogic::And,
        tag_group_id: None,
        tag_match_position: None,
        action_type: "remove".into(),
        action_value: Some("HD".into()),
        else_action_type: None,
        else_action_value: None,
        stop_processing: false,
    };
    let index = TagIndex::new();

    let result = normalize("ESPN HD", &[group], &[rule], &index);

    // "remove" is literal substring removal with no extra trim, so the
    // space that separated "ESPN" from "HD" survives.
    assert_eq!(result.normalized, "ESPN ");
    assert_eq!(result.rules_applied, vec![1]);
}

// -- Scenario 2: XMLTV synthesis for channel id 1 ----------------------------

#[test]
fn scenario_2_xmltv_synthesis_uses_rendered_tvg_id_template() {
    let profile = DummyEpgProfile {
        id: 1,
        name: "Default".into(),
        enabled: true,
        name_source: NameSource::Channel,
        stream_index: 0,
        substitution_pairs: Vec::new(),
        pattern_variants: Vec::new(),
        title_pattern: None,
        time_pattern: None,
        date_pattern: None,
        templates: HashMap::from([("fallback_title_template".into(), "{channel_name}".into())]),
        event_timezone: "UTC".into(),
        output_timezone: None,
        program_duration_minutes: 60,
        categories: Vec::new(),
        include_date_tag: false,
        include_live_tag: false,
        include_new_tag: false,
        tvg_id_template: "ecm-{channel_number}".into(),
        channel_assignments: vec![ChannelAssignment { channel_id: 1, tvg_id_override: None }],
    };

    let channel = Channel {
        id: 1,
        name: "Sports One".into(),
        channel_number: Some(100.0),
        group_id: None,
        tvg_id: None,
        gracenote_id: None,
        logo_url: None,
        stream_ids: Vec::new(),
        is_auto_created: false,
    };
    let mut channels = HashMap::new();
    channels.insert(1, ChannelSource { channel: &channel, resolved_name: "Sports One" });

    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let doc = generate_for_profile(&profile, &channels, now);

    assert_eq!(doc.channels.len(), 1);
    assert_eq!(doc.channels[0].tvg_id, "ecm-100");

    assert_eq!(doc.programmes.len(), 1);
    let programme = &doc.programmes[0];
    assert_eq!(programme.channel_tvg_id, "ecm-100");
    assert_eq!(programme.stop - programme.start, chrono::Duration::hours(24));

    let xml = render_document(&[doc]);
    assert!(xml.contains(r#"<channel id="ecm-100">"#));
    assert!(xml.contains(r#"channel="ecm-100""#) && xml.contains("<programme "));
}

// -- Scenario 3: probe run of 3 streams, one times out -----------------------

struct TimeoutForStream20;

#[async_trait]
impl StreamProber for TimeoutForStream20 {
    async fn probe(&self, url: &str, _bitrate_sample: Duration) -> Result<ProbeOutcome, String> {
        if url.contains("20") {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(ProbeOutcome { resolution: Some("1920x1080".into()), bitrate: Some(3000), codec: Some("h264".into()) })
    }
}

#[tokio::test]
async fn scenario_3_probe_run_one_stream_times_out() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let prober: Arc<dyn StreamProber> = Arc::new(TimeoutForStream20);
    let targets = vec![
        ProbeTarget { stream_id: 10, url: "http://stream/10".into(), name: "ten".into() },
        ProbeTarget { stream_id: 20, url: "http://stream/20".into(), name: "twenty".into() },
        ProbeTarget { stream_id: 30, url: "http://stream/30".into(), name: "thirty".into() },
    ];
    let settings = ecm_core::config::ProbeSettings {
        max_concurrent_probes: 2,
        stream_probe_timeout_secs: 1,
        bitrate_sample_duration_secs: 0,
        probe_retry_count: 0,
        probe_retry_delay_secs: 0,
        skip_recently_probed_hours: 6,
        strike_threshold: 5,
        deprioritize_failed_streams: true,
        struck_out_sample_cap: 500,
    };

    let progress = run_probe_batch(
        prober,
        store.clone(),
        settings,
        targets,
        tokio_util::sync::CancellationToken::new(),
        |_| {},
    )
    .await;

    assert_eq!(progress.success_count, 2);
    assert_eq!(progress.error_count, 1);

    let stats10 = store.get_stream_stats(10).await.unwrap().unwrap();
    let stats20 = store.get_stream_stats(20).await.unwrap().unwrap();
    let stats30 = store.get_stream_stats(30).await.unwrap().unwrap();
    assert_eq!(stats10.consecutive_failures, 0);
    assert_eq!(stats20.consecutive_failures, 1);
    assert_eq!(stats30.consecutive_failures, 0);

    // The run as a whole is a partial success: `warning`, not `error`,
    // since two of three streams probed cleanly.
    let run_is_warning = progress.success_count > 0 && progress.error_count > 0;
    assert!(run_is_warning);
}

// -- Scenario 4: bulk commit with temp-id remapping --------------------------

#[derive(Default)]
struct EmptyUpstream {
    channels: std::sync::Mutex<Vec<Channel>>,
    streams: Vec<Stream>,
    next_channel_id: std::sync::Mutex<i64>,
    attached: std::sync::Mutex<Vec<(i64, i64)>>,
}

#[async_trait]
impl UpstreamClient for EmptyUpstream {
    async fn list_channels(&self) -> ecm_core::upstream::Result<Vec<Channel>> {
        Ok(self.channels.lock().unwrap().clone())
    }
    async fn get_channel(&self, id: i64) -> ecm_core::upstream::Result<Channel> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(ecm_core::error::UpstreamError::RequestFailed { status: 404, message: "not found".into() })
    }
    async fn create_channel(&self, input: ChannelInput) -> ecm_core::upstream::Result<Channel> {
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
    async fn update_channel(&self, id: i64, _input: ChannelInput) -> ecm_core::upstream::Result<Channel> {
        self.get_channel(id).await
    }
    async fn delete_channel(&self, _id: i64) -> ecm_core::upstream::Result<()> {
        Ok(())
    }
    async fn list_channel_groups(&self) -> ecm_core::upstream::Result<Vec<ChannelGroup>> {
        Ok(Vec::new())
    }
    async fn create_channel_group(&self, name: &str) -> ecm_core::upstream::Result<ChannelGroup> {
        Ok(ChannelGroup { id: 1, name: name.to_string() })
    }
    async fn delete_channel_group(&self, _id: i64) -> ecm_core::upstream::Result<()> {
        Ok(())
    }
    async fn rename_channel_group(&self, id: i64, name: &str) -> ecm_core::upstream::Result<ChannelGroup> {
        Ok(ChannelGroup { id, name: name.to_string() })
    }
    async fn list_streams(&self, _m3u_account_id: Option<i64>) -> ecm_core::upstream::Result<Vec<Stream>> {
        Ok(self.streams.clone())
    }
    async fn get_streams_by_ids(&self, ids: &[i64]) -> ecm_core::upstream::Result<Vec<Stream>> {
        Ok(self.streams.iter().filter(|s| ids.contains(&s.id)).cloned().collect())
    }
    async fn add_stream_to_channel(&self, channel_id: i64, stream_id: i64) -> ecm_core::upstream::Result<()> {
        self.attached.lock().unwrap().push((channel_id, stream_id));
        Ok(())
    }
    async fn remove_stream_from_channel(&self, _channel_id: i64, _stream_id: i64) -> ecm_core::upstream::Result<()> {
        Ok(())
    }
    async fn reorder_channel_streams(&self, _channel_id: i64, _stream_ids: &[i64]) -> ecm_core::upstream::Result<()> {
        Ok(())
    }
    async fn bulk_assign_channel_numbers(&self, _assignments: &[(i64, f64)]) -> ecm_core::upstream::Result<()> {
        Ok(())
    }
    async fn list_logos(&self) -> ecm_core::upstream::Result<Vec<Logo>> {
        Ok(Vec::new())
    }
    async fn list_m3u_accounts(&self) -> ecm_core::upstream::Result<Vec<M3UAccount>> {
        Ok(Vec::new())
    }
    async fn trigger_m3u_refresh(&self, _m3u_account_id: i64) -> ecm_core::upstream::Result<()> {
        Ok(())
    }
    async fn trigger_epg_refresh(&self, _epg_source_id: i64) -> ecm_core::upstream::Result<()> {
        Ok(())
    }
    async fn list_m3u_filters(&self, _m3u_account_id: i64) -> ecm_core::upstream::Result<Vec<M3UFilter>> {
        Ok(Vec::new())
    }
    async fn list_m3u_group_states(&self, _m3u_account_id: i64) -> ecm_core::upstream::Result<Vec<UpstreamGroupState>> {
        Ok(Vec::new())
    }
    async fn list_m3u_profiles(&self) -> ecm_core::upstream::Result<Vec<M3UProfile>> {
        Ok(Vec::new())
    }
    async fn list_epg_data(&self) -> ecm_core::upstream::Result<Vec<EpgDataSource>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn scenario_4_bulk_commit_remaps_temp_channel_id() {
    let client = EmptyUpstream { streams: vec![Stream {
        id: 50,
        name: "ESPN".into(),
        url: "http://example.com/espn".into(),
        group_name: None,
        m3u_account_id: 1,
        m3u_account_priority: None,
    }], ..Default::default() };

    let request = BulkCommitRequest {
        operations: vec![
            BulkOperation::CreateChannel {
                temp_id: -1,
                name: "NEW".into(),
                channel_number: None,
                group_name: None,
                tvg_id: None,
                gracenote_id: None,
                logo_url: None,
            },
            BulkOperation::AddStreamToChannel { channel_id: -1, stream_id: 50 },
        ],
        groups_to_create: Vec::new(),
        validate_only: false,
        continue_on_error: false,
    };

    let result = bulk::commit(&client, request).await.unwrap();

    assert!(result.success);
    assert_eq!(result.operations_applied, 2);
    assert_eq!(client.channels.lock().unwrap().len(), 1);
    assert_eq!(client.attached.lock().unwrap().len(), 1);
    let new_id = *result.temp_id_map.get(&-1).expect("temp id -1 should be mapped");
    assert_eq!(client.channels.lock().unwrap()[0].id, new_id);
    assert_eq!(client.attached.lock().unwrap()[0], (new_id, 50));
}

// -- Scenario 5: M3U change detection, single row ----------------------------

#[test]
fn scenario_5_m3u_change_detection_reports_one_stream_added() {
    let settings = M3USettings { sample_stream_names_per_group: 500, change_log_stream_name_cap: 50 };

    let previous = M3USnapshot {
        id: 1,
        m3u_account_id: 1,
        taken_at: Utc::now(),
        groups: vec![M3UGroupSummary { name: "Sports".into(), stream_count: 1, enabled: true }],
        stream_names_by_group: HashMap::from([("Sports".into(), vec!["ESPN".into()])]),
        total_streams: 1,
    };
    let current = M3USnapshot {
        id: 2,
        m3u_account_id: 1,
        taken_at: Utc::now(),
        groups: vec![M3UGroupSummary { name: "Sports".into(), stream_count: 2, enabled: true }],
        stream_names_by_group: HashMap::from([("Sports".into(), vec!["ESPN".into(), "FOX".into()])]),
        total_streams: 2,
    };

    let change_set = diff(Some(&previous), &current, &settings);

    assert!(change_set.has_changes);
    assert_eq!(change_set.logs.len(), 1);
    let log = &change_set.logs[0];
    assert_eq!(log.change_type, ecm_core::store::models::ChangeType::StreamsAdded);
    assert_eq!(log.group_name.as_deref(), Some("Sports"));
    assert_eq!(log.count, 1);
    assert_eq!(log.stream_names, vec!["FOX".to_string()]);
}

#[test]
fn scenario_5b_build_snapshot_samples_enabled_group_streams() {
    let settings = M3USettings { sample_stream_names_per_group: 500, change_log_stream_name_cap: 50 };
    let group_states = vec![UpstreamGroupState { name: "Sports".into(), enabled: true }];
    let streams = vec![Stream {
        id: 1,
        name: "ESPN".into(),
        url: String::new(),
        group_name: Some("Sports".into()),
        m3u_account_id: 1,
        m3u_account_priority: None,
    }];

    let snapshot = build_snapshot(1, &group_states, &streams, &settings);
    assert_eq!(snapshot.stream_names_by_group.get("Sports").unwrap(), &vec!["ESPN".to_string()]);
}

// -- Scenario 6: digest with an exclude pattern -------------------------------

#[test]
fn scenario_6_digest_exclude_filters_out_matching_group() {
    let settings = M3UDigestSettings {
        include_group_changes: true,
        include_stream_changes: true,
        show_detailed_list: true,
        exclude_group_patterns: vec![r"ESPN\+".into()],
        ..Default::default()
    };

    let changes = vec![
        ecm_core::store::models::M3UChangeLog {
            id: 1,
            m3u_account_id: 1,
            change_time: Utc::now(),
            change_type: ecm_core::store::models::ChangeType::StreamsAdded,
            group_name: Some("ESPN+ PPV".into()),
            count: 2,
            stream_names: vec!["A".into(), "B".into()],
            enabled: None,
        },
        ecm_core::store::models::M3UChangeLog {
            id: 2,
            m3u_account_id: 1,
            change_time: Utc::now(),
            change_type: ecm_core::store::models::ChangeType::StreamsAdded,
            group_name: Some("News".into()),
            count: 1,
            stream_names: vec!["CNN".into()],
            enabled: None,
        },
    ];

    let filtered = apply_exclude_filters(&changes, &settings);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].group_name(), Some("News"));

    let digest = render(1, &filtered, &settings);
    assert!(digest.body.contains("News"));
    assert!(!digest.body.contains("ESPN+ PPV"));
    assert!(digest.body.contains("CNN")); // detail list entry for the kept change
}
