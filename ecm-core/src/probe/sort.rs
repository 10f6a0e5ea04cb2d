//! Smart Sort (Component H): stable multi-key ordering of a channel's
//! streams, grounded on `spec.md` §4.H.

use std::cmp::Ordering;

use crate::store::models::StreamStats;

/// One sort key in priority order, as an operator-configured list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Resolution,
    Bitrate,
    M3uAccountPriority,
    Codec,
}

/// A stream candidate plus the fields Smart Sort reasons about.
#[derive(Debug, Clone)]
pub struct SortCandidate {
    pub stream_id: i64,
    pub m3u_account_priority: Option<i64>,
    pub stats: Option<StreamStats>,
}

fn resolution_rank(resolution: &str) -> Option<u32> {
    // Height in pixels, parsed from strings like "1920x1080" or "1080p".
    let digits: String = resolution.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(pos) = resolution.to_lowercase().find('x') {
        resolution[pos + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .ok()
    } else {
        digits.parse().ok()
    }
}

fn codec_rank(codec: &str, preference: &[String]) -> Option<usize> {
    preference.iter().position(|p| p.eq_ignore_ascii_case(codec))
}

/// Produce a stable ordering of `candidates` by `keys`, in configured
/// priority order. `codec_preference` ranks codecs low-to-high desirability
/// (index 0 is most preferred). Failed streams sort last, as a hard
/// partition, when `deprioritize_failed` is set.
pub fn sort_streams(
    mut candidates: Vec<SortCandidate>,
    keys: &[SortKey],
    codec_preference: &[String],
    deprioritize_failed: bool,
) -> Vec<SortCandidate> {
    candidates.sort_by(|a, b| {
        if deprioritize_failed {
            let a_failed = is_failed(a);
            let b_failed = is_failed(b);
            if a_failed != b_failed {
                return if a_failed { Ordering::Greater } else { Ordering::Less };
            }
        }

        for key in keys {
            let ordering = match key {
                SortKey::Resolution => {
                    let a_res = a.stats.as_ref().and_then(|s| s.resolution.as_deref()).and_then(resolution_rank);
                    let b_res = b.stats.as_ref().and_then(|s| s.resolution.as_deref()).and_then(resolution_rank);
                    compare_desc_with_unknowns_last(a_res, b_res)
                }
                SortKey::Bitrate => {
                    let a_bitrate = a.stats.as_ref().and_then(|s| s.bitrate);
                    let b_bitrate = b.stats.as_ref().and_then(|s| s.bitrate);
                    compare_desc_with_unknowns_last(a_bitrate, b_bitrate)
                }
                SortKey::M3uAccountPriority => {
                    compare_asc_with_unknowns_last(a.m3u_account_priority, b.m3u_account_priority)
                }
                SortKey::Codec => {
                    let a_codec = a.stats.as_ref().and_then(|s| s.codec.as_deref()).and_then(|c| codec_rank(c, codec_preference));
                    let b_codec = b.stats.as_ref().and_then(|s| s.codec.as_deref()).and_then(|c| codec_rank(c, codec_preference));
                    compare_asc_with_unknowns_last(a_codec, b_codec)
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.stream_id.cmp(&b.stream_id)
    });
    candidates
}

fn is_failed(candidate: &SortCandidate) -> bool {
    candidate
        .stats
        .as_ref()
        .map(|s| s.probe_status == crate::store::models::ProbeStatus::Failed)
        .unwrap_or(false)
}

fn compare_desc_with_unknowns_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_asc_with_unknowns_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
