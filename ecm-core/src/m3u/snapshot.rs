//! M3U Change Detector (Component I): build a snapshot of one M3U
//! account's groups/streams and diff it against the previously stored
//! snapshot.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;

use crate::config::M3USettings;
use crate::store::models::{ChangeType, M3UChangeLog, M3UGroupSummary, M3USnapshot};
use crate::upstream::{Stream, UpstreamGroupState};

/// The outcome of one diff pass: either nothing changed, or a new
/// snapshot plus the change-log rows to persist alongside it.
pub struct ChangeSet {
    pub has_changes: bool,
    pub snapshot: M3USnapshot,
    pub logs: Vec<M3UChangeLog>,
}

/// Build the current snapshot from upstream-reported group states and
/// streams, sampling stream names per enabled group up to the
/// configured cap.
pub fn build_snapshot(
    m3u_account_id: i64,
    group_states: &[UpstreamGroupState],
    streams: &[Stream],
    settings: &M3USettings,
) -> M3USnapshot {
    let mut names_by_group: HashMap<String, Vec<String>> = HashMap::new();
    for stream in streams {
        let group = stream.group_name.clone().unwrap_or_default();
        names_by_group.entry(group).or_default().push(stream.name.clone());
    }

    let enabled_groups: BTreeSet<&str> = group_states
        .iter()
        .filter(|g| g.enabled)
        .map(|g| g.name.as_str())
        .collect();

    let mut stream_names_by_group = HashMap::new();
    for (group, mut names) in names_by_group {
        if enabled_groups.contains(group.as_str()) {
            names.truncate(settings.sample_stream_names_per_group);
            stream_names_by_group.insert(group, names);
        }
    }

    let groups = group_states
        .iter()
        .map(|g| M3UGroupSummary {
            name: g.name.clone(),
            stream_count: stream_names_by_group.get(&g.name).map(Vec::len).unwrap_or(0),
            enabled: g.enabled,
        })
        .collect();

    M3USnapshot {
        id: 0,
        m3u_account_id,
        taken_at: Utc::now(),
        groups,
        stream_names_by_group,
        total_streams: streams.len(),
    }
}

/// Diff `current` against `previous` (absent on an account's first
/// snapshot, in which case every group reads as newly added).
pub fn diff(
    previous: Option<&M3USnapshot>,
    current: &M3USnapshot,
    settings: &M3USettings,
) -> ChangeSet {
    let empty = M3USnapshot {
        id: 0,
        m3u_account_id: current.m3u_account_id,
        taken_at: current.taken_at,
        groups: Vec::new(),
        stream_names_by_group: HashMap::new(),
        total_streams: 0,
    };
    let previous = previous.unwrap_or(&empty);

    let prev_groups: HashMap<&str, &M3UGroupSummary> =
        previous.groups.iter().map(|g| (g.name.as_str(), g)).collect();
    let curr_groups: HashMap<&str, &M3UGroupSummary> =
        current.groups.iter().map(|g| (g.name.as_str(), g)).collect();

    let mut logs = Vec::new();
    let now = current.taken_at;

    for name in curr_groups.keys() {
        if !prev_groups.contains_key(name) {
            logs.push(change_log(current.m3u_account_id, now, ChangeType::GroupAdded, name, 1, Vec::new(), None));
        }
    }
    for name in prev_groups.keys() {
        if !curr_groups.contains_key(name) {
            logs.push(change_log(current.m3u_account_id, now, ChangeType::GroupRemoved, name, 1, Vec::new(), None));
        }
    }
    for (name, curr) in &curr_groups {
        if let Some(prev) = prev_groups.get(name) {
            if prev.enabled != curr.enabled {
                let change_type = if curr.enabled {
                    ChangeType::GroupEnabled
                } else {
                    ChangeType::GroupDisabled
                };
                logs.push(change_log(current.m3u_account_id, now, change_type, name, 1, Vec::new(), Some(curr.enabled)));
            }
        }
    }

    for (name, curr) in &curr_groups {
        let Some(prev) = prev_groups.get(name) else { continue };
        let prev_names: BTreeSet<&str> = previous
            .stream_names_by_group
            .get(*name)
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let curr_names: BTreeSet<&str> = current
            .stream_names_by_group
            .get(*name)
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default();

        if !curr.enabled || !prev.enabled {
            continue;
        }

        let added: Vec<String> = curr_names.difference(&prev_names).map(|s| s.to_string()).collect();
        let removed: Vec<String> = prev_names.difference(&curr_names).map(|s| s.to_string()).collect();

        if !added.is_empty() {
            let count = added.len();
            let mut sample = added;
            sample.truncate(settings.change_log_stream_name_cap);
            logs.push(change_log(current.m3u_account_id, now, ChangeType::StreamsAdded, name, count, sample, None));
        }
        if !removed.is_empty() {
            let count = removed.len();
            let mut sample = removed;
            sample.truncate(settings.change_log_stream_name_cap);
            logs.push(change_log(current.m3u_account_id, now, ChangeType::StreamsRemoved, name, count, sample, None));
        }
    }

    let has_changes = !logs.is_empty();
    ChangeSet {
        has_changes,
        snapshot: current.clone(),
        logs,
    }
}

#[allow(clippy::too_many_arguments)]
fn change_log(
    m3u_account_id: i64,
    change_time: chrono::DateTime<Utc>,
    change_type: ChangeType,
    group_name: &str,
    count: usize,
    stream_names: Vec<String>,
    enabled: Option<bool>,
) -> M3UChangeLog {
    M3UChangeLog {
        id: 0,
        m3u_account_id,
        change_time,
        change_type,
        group_name: Some(group_name.to_string()),
        count,
        stream_names,
        enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> M3USettings {
        M3USettings {
            sample_stream_names_per_group: 500,
            change_log_stream_name_cap: 50,
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

    #[test]
    fn test_first_snapshot_is_all_additions() {
        let groups = vec![UpstreamGroupState { name: "Sports".into(), enabled: true }];
        let streams = vec![stream("ESPN", "Sports")];
        let snap = build_snapshot(1, &groups, &streams, &settings());
        let result = diff(None, &snap, &settings());
        assert!(result.has_changes);
        assert!(result.logs.iter().any(|l| l.change_type == ChangeType::GroupAdded));
        assert!(result.logs.iter().any(|l| l.change_type == ChangeType::StreamsAdded));
    }

    #[test]
    fn test_no_changes_between_identical_snapshots() {
        let groups = vec![UpstreamGroupState { name: "Sports".into(), enabled: true }];
        let streams = vec![stream("ESPN", "Sports")];
        let prev = build_snapshot(1, &groups, &streams, &settings());
        let curr = build_snapshot(1, &groups, &streams, &settings());
        let result = diff(Some(&prev), &curr, &settings());
        assert!(!result.has_changes);
        assert!(result.logs.is_empty());
    }

    #[test]
    fn test_group_disabled_detected() {
        let enabled_groups = vec![UpstreamGroupState { name: "Sports".into(), enabled: true }];
        let disabled_groups = vec![UpstreamGroupState { name: "Sports".into(), enabled: false }];
        let streams = vec![stream("ESPN", "Sports")];
        let prev = build_snapshot(1, &enabled_groups, &streams, &settings());
        let curr = build_snapshot(1, &disabled_groups, &streams, &settings());
        let result = diff(Some(&prev), &curr, &settings());
        assert!(result.logs.iter().any(|l| l.change_type == ChangeType::GroupDisabled));
    }

    #[test]
    fn test_stream_added_and_removed() {
        let groups = vec![UpstreamGroupState { name: "Sports".into(), enabled: true }];
        let prev_streams = vec![stream("ESPN", "Sports")];
        let curr_streams = vec![stream("Fox Sports", "Sports")];
        let prev = build_snapshot(1, &groups, &prev_streams, &settings());
        let curr = build_snapshot(1, &groups, &curr_streams, &settings());
        let result = diff(Some(&prev), &curr, &settings());
        assert!(result.logs.iter().any(|l| l.change_type == ChangeType::StreamsAdded
            && l.stream_names == vec!["Fox Sports".to_string()]));
        assert!(result.logs.iter().any(|l| l.change_type == ChangeType::StreamsRemoved
            && l.stream_names == vec!["ESPN".to_string()]));
    }

    #[test]
    fn test_sample_stream_names_capped() {
        let groups = vec![UpstreamGroupState { name: "Sports".into(), enabled: true }];
        let streams: Vec<Stream> = (0..10).map(|i| stream(&format!("s{i}"), "Sports")).collect();
        let mut s = settings();
        s.sample_stream_names_per_group = 3;
        let snap = build_snapshot(1, &groups, &streams, &s);
        assert_eq!(snap.stream_names_by_group.get("Sports").unwrap().len(), 3);
    }
}
