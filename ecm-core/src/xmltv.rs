//! XMLTV Synthesizer (Component N): turns a "Dummy EPG" profile's
//! substitution/pattern-variant rules into a synthesized XMLTV document
//! for channels that have no real EPG feed.
//!
//! Grounded on `original_source/backend/dummy_epg_engine.py`
//! (`apply_substitutions`, `extract_groups_from_variants`,
//! `compute_event_times`, `render_template`, `generate_xmltv`) for the
//! pipeline shape and the AM/PM/two-digit-year/filler-programme rules;
//! `regex_util::compile` is reused for the named-group rewrite the
//! pattern fields share with the Normalization Engine. There is no XML
//! crate anywhere in the teacher's or the wider pack's dependency set,
//! so the document is hand-assembled as a string, matching how the
//! teacher elsewhere builds SMTP/webhook payloads directly rather than
//! reaching for a formatting crate.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::regex_util;
use crate::store::models::{ChannelAssignment, DummyEpgProfile, NameSource, PatternVariant};
use crate::upstream::models::Channel;

const XMLTV_UTC_FORMAT: &str = "%Y%m%d%H%M%S +0000";

/// One synthesized programme, already resolved to UTC start/stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Programme {
    pub channel_tvg_id: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub icon_url: Option<String>,
    pub date_tag: Option<String>,
    pub is_live: bool,
    pub is_new: bool,
}

/// One `<channel>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmltvChannel {
    pub tvg_id: String,
    pub display_name: String,
}

/// The full synthesized document: channels first, then programmes, per
/// `spec.md` §4.N.
#[derive(Debug, Clone, Default)]
pub struct XmltvDocument {
    pub channels: Vec<XmltvChannel>,
    pub programmes: Vec<Programme>,
}

/// Channel data handed in by the caller: the upstream `Channel` plus the
/// name a profile's `name_source` resolves to (channel name, or the
/// `stream_index`'th stream's name).
pub struct ChannelSource<'a> {
    pub channel: &'a Channel,
    pub resolved_name: &'a str,
}

/// Apply a profile's ordered substitution pairs to `input`, skipping
/// disabled pairs and regex pairs that fail to compile (a bad pattern is
/// logged and treated as a no-op, never aborts the pipeline).
pub fn apply_substitutions(profile: &DummyEpgProfile, input: &str) -> String {
    let mut working = input.to_string();
    for pair in &profile.substitution_pairs {
        if !pair.enabled {
            continue;
        }
        working = if pair.is_regex {
            match regex_util::compile(&pair.find) {
                Ok(re) => re.replace_all(&working, pair.replace.as_str()).into_owned(),
                Err(err) => {
                    tracing::warn!(pattern = %pair.find, %err, "dummy EPG substitution regex failed to compile");
                    working
                }
            }
        } else {
            working.replace(&pair.find, &pair.replace)
        };
    }
    working
}

/// The result of a variant match: its (possibly empty) named-group
/// captures, and the variant whose templates override the profile's.
struct MatchedVariant<'a> {
    groups: HashMap<String, String>,
    templates: &'a HashMap<String, String>,
}

/// Try each pattern variant in order against `name`; the first whose
/// `title_pattern` matches wins. Falls back to the profile's flat
/// `title_pattern` (as a single synthetic variant with no template
/// overrides) when `pattern_variants` is empty.
fn extract_groups<'a>(profile: &'a DummyEpgProfile, name: &str) -> Option<MatchedVariant<'a>> {
    if !profile.pattern_variants.is_empty() {
        return extract_groups_from_variants(&profile.pattern_variants, name);
    }
    let pattern = profile.title_pattern.as_deref()?;
    let re = regex_util::compile(pattern).ok()?;
    let caps = re.captures(name)?;
    Some(MatchedVariant {
        groups: named_captures(&re, &caps),
        templates: &profile.templates,
    })
}

fn extract_groups_from_variants<'a>(
    variants: &'a [PatternVariant],
    name: &str,
) -> Option<MatchedVariant<'a>> {
    for variant in variants {
        let Ok(re) = regex_util::compile(&variant.title_pattern) else {
            continue;
        };
        if let Some(caps) = re.captures(name) {
            return Some(MatchedVariant {
                groups: named_captures(&re, &caps),
                templates: &variant.templates,
            });
        }
    }
    None
}

fn named_captures(re: &regex::Regex, caps: &regex::Captures) -> HashMap<String, String> {
    re.capture_names()
        .flatten()
        .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
        .collect()
}

/// Look up a template key, preferring the matched variant's override
/// when it is non-empty, else the profile's own template of the same
/// key.
fn resolve_template(profile: &DummyEpgProfile, variant: Option<&MatchedVariant>, key: &str) -> Option<String> {
    if let Some(variant) = variant {
        if let Some(value) = variant.templates.get(key) {
            if !value.is_empty() {
                return Some(value.clone());
            }
        }
    }
    profile.templates.get(key).filter(|v| !v.is_empty()).cloned()
}

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn parse_month(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let lower = raw.to_lowercase();
    MONTH_NAMES
        .iter()
        .position(|m| lower.starts_with(m))
        .map(|idx| idx as u32 + 1)
}

/// The computed event start time, in the event timezone, plus whether
/// any time/date field was actually extracted (vs. wholly defaulted to
/// "now").
struct EventTime {
    local: DateTime<Tz>,
    extracted: bool,
}

/// Resolve the `hour, minute, ampm?, month, day, year?` named groups
/// (per `spec.md` §4.N) into a concrete local start time, defaulting any
/// missing field to "now" in `event_tz`.
fn compute_event_times(groups: &HashMap<String, String>, event_tz: Tz, now: DateTime<Utc>) -> EventTime {
    let now_local = now.with_timezone(&event_tz);
    let extracted = groups.contains_key("hour")
        || groups.contains_key("minute")
        || groups.contains_key("month")
        || groups.contains_key("day")
        || groups.contains_key("year");

    let mut hour: u32 = groups
        .get("hour")
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| now_local.hour());

    if let Some(ampm) = groups.get("ampm") {
        let ampm = ampm.to_lowercase();
        if ampm.starts_with("am") {
            if hour == 12 {
                hour = 0;
            }
        } else if ampm.starts_with("pm") && hour != 12 {
            hour += 12;
        }
    }

    let minute: u32 = groups
        .get("minute")
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| now_local.minute());

    let month = groups
        .get("month")
        .and_then(|v| parse_month(v))
        .unwrap_or_else(|| now_local.month());

    let day: u32 = groups
        .get("day")
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| now_local.day());

    let year: i32 = groups
        .get("year")
        .and_then(|v| {
            let n: i32 = v.parse().ok()?;
            Some(if v.len() <= 2 { n + 2000 } else { n })
        })
        .unwrap_or_else(|| now_local.year());

    let local = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .and_then(|naive| single_local(event_tz, naive))
        .unwrap_or_else(|| {
            now_local
                .with_hour(hour)
                .and_then(|d| d.with_minute(minute))
                .unwrap_or(now_local)
        });

    EventTime { local, extracted }
}

fn single_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).single()
}

/// Substitute `{key}` and `{key_normalize}` placeholders in `template`
/// from the render context. `_normalize` strips everything but
/// alphanumerics and collapses whitespace to `_`, for use in generated
/// URLs.
fn render_template(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        rest = &rest[start + 1..];
        let Some(end) = rest.find('}') else {
            out.push('{');
            out.push_str(rest);
            return out;
        };
        let key = &rest[..end];
        rest = &rest[end + 1..];
        if let Some(base) = key.strip_suffix("_normalize") {
            let value = context.get(base).map(|s| s.as_str()).unwrap_or("");
            out.push_str(&normalize_for_url(value));
        } else if let Some(value) = context.get(key) {
            out.push_str(value);
        }
        // unknown keys render as empty, matching a missing dict lookup.
    }
    out.push_str(rest);
    out
}

fn normalize_for_url(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_was_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_was_sep = false;
        } else if !prev_was_sep {
            out.push('_');
            prev_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

fn xmltv_fmt(dt: DateTime<Utc>) -> String {
    dt.format(XMLTV_UTC_FORMAT).to_string()
}

/// Render a profile's `tvg_id_template` against a channel's name/number,
/// the only variables available before a programme's event time (and
/// therefore its pattern-variant groups) has been computed.
fn render_tvg_id(template: &str, source: &ChannelSource) -> String {
    let mut ctx = HashMap::new();
    ctx.insert("channel_name".into(), source.channel.name.clone());
    ctx.insert(
        "channel_number".into(),
        source.channel.channel_number.map(|n| n.to_string()).unwrap_or_default(),
    );
    render_template(template, &ctx)
}

/// Build the render context: base variables plus the matched variant's
/// named groups plus computed time variables, per `spec.md` §4.N.
fn build_context(
    channel_name: &str,
    channel_number: Option<f64>,
    original_name: &str,
    substituted_name: &str,
    groups: &HashMap<String, String>,
    start: DateTime<Tz>,
) -> HashMap<String, String> {
    let mut ctx = HashMap::new();
    ctx.insert("channel_name".into(), channel_name.to_string());
    ctx.insert(
        "channel_number".into(),
        channel_number.map(|n| n.to_string()).unwrap_or_default(),
    );
    ctx.insert("original_name".into(), original_name.to_string());
    ctx.insert("substituted_name".into(), substituted_name.to_string());
    for (k, v) in groups {
        ctx.insert(k.clone(), v.clone());
    }
    ctx.insert("hour".into(), format!("{:02}", start.hour()));
    ctx.insert("minute".into(), format!("{:02}", start.minute()));
    ctx.insert("month".into(), format!("{:02}", start.month()));
    ctx.insert("day".into(), format!("{:02}", start.day()));
    ctx.insert("year".into(), start.year().to_string());
    ctx
}

/// Synthesize the XMLTV document for one profile against a channel data
/// map. Disabled profiles and channels missing from `channels` contribute
/// nothing, per `spec.md` §4.N.
pub fn generate_for_profile(
    profile: &DummyEpgProfile,
    channels: &HashMap<i64, ChannelSource>,
    now: DateTime<Utc>,
) -> XmltvDocument {
    let mut doc = XmltvDocument::default();
    if !profile.enabled {
        return doc;
    }
    let event_tz: Tz = profile.event_timezone.parse().unwrap_or(chrono_tz::UTC);
    let output_tz: Tz = profile
        .output_timezone
        .as_deref()
        .and_then(|tz| tz.parse().ok())
        .unwrap_or(event_tz);

    for assignment in &profile.channel_assignments {
        let Some(source) = channels.get(&assignment.channel_id) else {
            continue;
        };
        let tvg_id = assignment
            .tvg_id_override
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| {
                let rendered = render_tvg_id(&profile.tvg_id_template, source);
                (!rendered.is_empty()).then_some(rendered)
            })
            .or_else(|| source.channel.tvg_id.clone())
            .unwrap_or_else(|| source.channel.id.to_string());

        doc.channels.push(XmltvChannel {
            tvg_id: tvg_id.clone(),
            display_name: source.channel.name.clone(),
        });

        let original_name = resolved_original_name(profile, source);
        let substituted = apply_substitutions(profile, &original_name);
        let variant = extract_groups(profile, &substituted);

        let groups = variant.as_ref().map(|v| &v.groups).cloned().unwrap_or_default();
        let event_time = compute_event_times(&groups, event_tz, now);

        doc.programmes.extend(build_programmes(
            profile,
            &tvg_id,
            source,
            &original_name,
            &substituted,
            variant.as_ref(),
            &groups,
            event_time,
            output_tz,
        ));
    }

    doc
}

fn resolved_original_name(profile: &DummyEpgProfile, source: &ChannelSource) -> String {
    match profile.name_source {
        NameSource::Channel => source.channel.name.clone(),
        NameSource::Stream => source.resolved_name.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_programmes(
    profile: &DummyEpgProfile,
    tvg_id: &str,
    source: &ChannelSource,
    original_name: &str,
    substituted_name: &str,
    variant: Option<&MatchedVariant>,
    groups: &HashMap<String, String>,
    event_time: EventTime,
    output_tz: Tz,
) -> Vec<Programme> {
    let duration = Duration::minutes(profile.program_duration_minutes.max(1));

    if !event_time.extracted {
        let key_prefix = if variant.is_some() { "" } else { "fallback_" };
        let context = build_context(
            &source.channel.name,
            source.channel.channel_number,
            original_name,
            substituted_name,
            groups,
            event_time.local,
        );
        // No time group was extracted, so `event_time.local` is just
        // "now" in the event timezone. The single fallback programme
        // spans that date's midnight to the next midnight, not
        // now-to-now+24h.
        let today_midnight = event_time
            .local
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| single_local(event_time.local.timezone(), naive))
            .unwrap_or(event_time.local);
        let tomorrow_midnight = today_midnight + Duration::days(1);
        let start_utc = today_midnight.with_timezone(&Utc);
        let stop_utc = tomorrow_midnight.with_timezone(&Utc);
        return vec![make_programme(
            profile,
            tvg_id,
            variant,
            &context,
            key_prefix,
            start_utc,
            stop_utc,
            source.channel.logo_url.clone(),
        )];
    }

    let start_local = event_time.local.with_timezone(&output_tz);
    let stop_local = start_local + duration;
    let midnight = start_local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| single_local(output_tz, naive))
        .unwrap_or(start_local);
    let next_midnight = midnight + Duration::days(1);

    let context = build_context(
        &source.channel.name,
        source.channel.channel_number,
        original_name,
        substituted_name,
        groups,
        event_time.local,
    );

    let mut out = Vec::with_capacity(3);
    if midnight < start_local {
        out.push(make_programme(
            profile,
            tvg_id,
            variant,
            &context,
            "upcoming_",
            midnight.with_timezone(&Utc),
            start_local.with_timezone(&Utc),
            source.channel.logo_url.clone(),
        ));
    }

    out.push(make_programme(
        profile,
        tvg_id,
        variant,
        &context,
        "",
        start_local.with_timezone(&Utc),
        stop_local.with_timezone(&Utc),
        source.channel.logo_url.clone(),
    ));

    if stop_local < next_midnight {
        out.push(make_programme(
            profile,
            tvg_id,
            variant,
            &context,
            "ended_",
            stop_local.with_timezone(&Utc),
            next_midnight.with_timezone(&Utc),
            source.channel.logo_url.clone(),
        ));
    }

    out
}

#[allow(clippy::too_many_arguments)]
fn make_programme(
    profile: &DummyEpgProfile,
    tvg_id: &str,
    variant: Option<&MatchedVariant>,
    context: &HashMap<String, String>,
    key_prefix: &str,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    channel_logo: Option<String>,
) -> Programme {
    let title_key = format!("{key_prefix}title_template");
    let desc_key = format!("{key_prefix}description_template");
    let title = resolve_template(profile, variant, &title_key).map(|t| render_template(&t, context));
    let description = resolve_template(profile, variant, &desc_key).map(|t| render_template(&t, context));
    let icon_url = resolve_template(profile, variant, "program_poster_url_template")
        .map(|t| render_template(&t, context))
        .or(channel_logo);

    Programme {
        channel_tvg_id: tvg_id.to_string(),
        start,
        stop,
        title,
        description,
        categories: profile.categories.clone(),
        icon_url,
        date_tag: profile.include_date_tag.then(|| start.format("%Y-%m-%d").to_string()),
        is_live: profile.include_live_tag,
        is_new: profile.include_new_tag,
    }
}

/// Render a full multi-profile XMLTV document to its final XML string.
pub fn render_document(documents: &[XmltvDocument]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<tv generator-info-name=\"ecm-dummy-epg\" generator-info-url=\"https://example.invalid/\">\n");

    for doc in documents {
        for channel in &doc.channels {
            out.push_str(&format!("  <channel id=\"{}\">\n", escape(&channel.tvg_id)));
            out.push_str(&format!(
                "    <display-name>{}</display-name>\n",
                escape(&channel.display_name)
            ));
            out.push_str("  </channel>\n");
        }
    }

    for doc in documents {
        for programme in &doc.programmes {
            out.push_str(&format!(
                "  <programme start=\"{}\" stop=\"{}\" channel=\"{}\">\n",
                xmltv_fmt(programme.start),
                xmltv_fmt(programme.stop),
                escape(&programme.channel_tvg_id)
            ));
            if let Some(title) = &programme.title {
                out.push_str(&format!("    <title lang=\"en\">{}</title>\n", escape(title)));
            }
            if let Some(desc) = &programme.description {
                out.push_str(&format!("    <desc lang=\"en\">{}</desc>\n", escape(desc)));
            }
            for category in &programme.categories {
                out.push_str(&format!("    <category lang=\"en\">{}</category>\n", escape(category)));
            }
            if let Some(icon) = &programme.icon_url {
                out.push_str(&format!("    <icon src=\"{}\"/>\n", escape(icon)));
            }
            if let Some(date) = &programme.date_tag {
                out.push_str(&format!("    <date>{date}</date>\n"));
            }
            if programme.is_live {
                out.push_str("    <live/>\n");
            }
            if programme.is_new {
                out.push_str("    <new/>\n");
            }
            out.push_str("  </programme>\n");
        }
    }

    out.push_str("</tv>\n");
    out
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::SubstitutionPair;

    fn base_profile() -> DummyEpgProfile {
        DummyEpgProfile {
            id: 1,
            name: "Test profile".into(),
            enabled: true,
            name_source: NameSource::Channel,
            stream_index: 0,
            substitution_pairs: vec![],
            pattern_variants: vec![],
            title_pattern: None,
            time_pattern: None,
            date_pattern: None,
            templates: HashMap::new(),
            event_timezone: "UTC".into(),
            output_timezone: None,
            program_duration_minutes: 60,
            categories: vec!["Sports".into()],
            include_date_tag: true,
            include_live_tag: false,
            include_new_tag: false,
            tvg_id_template: "{channel_name_normalize}".into(),
            channel_assignments: vec![ChannelAssignment {
                channel_id: 1,
                tvg_id_override: None,
            }],
        }
    }

    fn channel(id: i64, name: &str) -> Channel {
        Channel {
            id,
            name: name.into(),
            channel_number: Some(101.0),
            group_id: None,
            tvg_id: Some(format!("tvg-{id}")),
            gracenote_id: None,
            logo_url: None,
            stream_ids: vec![],
            is_auto_created: false,
        }
    }

    #[test]
    fn test_disabled_profile_yields_empty_document() {
        let mut profile = base_profile();
        profile.enabled = false;
        let ch = channel(1, "ESPN HD");
        let mut map = HashMap::new();
        map.insert(1, ChannelSource { channel: &ch, resolved_name: "ESPN HD" });

        let doc = generate_for_profile(&profile, &map, Utc::now());
        assert!(doc.channels.is_empty());
        assert!(doc.programmes.is_empty());
    }

    #[test]
    fn test_missing_channel_is_skipped_silently() {
        let profile = base_profile();
        let map: HashMap<i64, ChannelSource> = HashMap::new();
        let doc = generate_for_profile(&profile, &map, Utc::now());
        assert!(doc.channels.is_empty());
        assert!(doc.programmes.is_empty());
    }

    #[test]
    fn test_no_time_extracted_emits_single_midnight_to_midnight_fallback_programme() {
        let mut profile = base_profile();
        profile.templates.insert("fallback_title_template".into(), "{channel_name}".into());
        let ch = channel(1, "ESPN HD");
        let mut map = HashMap::new();
        map.insert(1, ChannelSource { channel: &ch, resolved_name: "ESPN HD" });

        // Deliberately not midnight, so a fallback window of [now, now+24h]
        // would fail these assertions.
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 14, 37, 0).unwrap();
        let doc = generate_for_profile(&profile, &map, now);
        assert_eq!(doc.programmes.len(), 1);
        let p = &doc.programmes[0];
        assert_eq!(p.stop - p.start, Duration::hours(24));
        assert_eq!(p.start, Utc.with_ymd_and_hms(2026, 7, 29, 0, 0, 0).unwrap());
        assert_eq!(p.stop, Utc.with_ymd_and_hms(2026, 7, 30, 0, 0, 0).unwrap());
        assert_eq!(p.title.as_deref(), Some("ESPN HD"));
    }

    #[test]
    fn test_extracted_time_emits_upcoming_main_ended() {
        let mut profile = base_profile();
        profile.pattern_variants = vec![PatternVariant {
            name: "default".into(),
            title_pattern: r"(?<hour>\d{1,2}):(?<minute>\d{2}) (?<ampm>[AP]M) (?<month>\d{1,2})/(?<day>\d{1,2})".into(),
            time_pattern: None,
            date_pattern: None,
            templates: HashMap::from([("title_template".into(), "Main Event".into())]),
        }];
        let ch = channel(1, "Boxing 08:30 PM 07/28");
        let mut map = HashMap::new();
        map.insert(1, ChannelSource { channel: &ch, resolved_name: "Boxing 08:30 PM 07/28" });

        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let doc = generate_for_profile(&profile, &map, now);
        assert!(doc.programmes.len() >= 2);
        let main = doc.programmes.iter().find(|p| p.title.as_deref() == Some("Main Event")).unwrap();
        assert_eq!(main.start.hour(), 20);
        assert_eq!(main.start.minute(), 30);
    }

    #[test]
    fn test_twelve_am_is_midnight_and_twelve_pm_stays_noon() {
        let mut groups = HashMap::new();
        groups.insert("hour".into(), "12".into());
        groups.insert("minute".into(), "0".into());
        groups.insert("ampm".into(), "AM".into());
        groups.insert("month".into(), "7".into());
        groups.insert("day".into(), "28".into());
        groups.insert("year".into(), "26".into());
        let et = compute_event_times(&groups, chrono_tz::UTC, Utc::now());
        assert_eq!(et.local.hour(), 0);
        assert_eq!(et.local.year(), 2026);

        groups.insert("ampm".into(), "PM".into());
        let et = compute_event_times(&groups, chrono_tz::UTC, Utc::now());
        assert_eq!(et.local.hour(), 12);
    }

    #[test]
    fn test_substitution_pairs_apply_in_order_and_skip_disabled() {
        let mut profile = base_profile();
        profile.substitution_pairs = vec![
            SubstitutionPair { find: "HD".into(), replace: "".into(), is_regex: false, enabled: true },
            SubstitutionPair { find: "ESPN".into(), replace: "FOX".into(), is_regex: false, enabled: false },
        ];
        let result = apply_substitutions(&profile, "ESPN HD");
        assert_eq!(result, "ESPN ");
    }

    #[test]
    fn test_render_template_normalize_suffix_lowercases_and_strips() {
        let mut ctx = HashMap::new();
        ctx.insert("channel_name".into(), "ESPN HD!".into());
        let rendered = render_template("{channel_name_normalize}.png", &ctx);
        assert_eq!(rendered, "espn_hd.png");
    }

    #[test]
    fn test_render_document_has_channels_before_programmes() {
        let profile = base_profile();
        let ch = channel(1, "ESPN HD");
        let mut map = HashMap::new();
        map.insert(1, ChannelSource { channel: &ch, resolved_name: "ESPN HD" });
        let doc = generate_for_profile(&profile, &map, Utc::now());
        let xml = render_document(&[doc]);
        let channel_pos = xml.find("<channel").unwrap();
        let programme_pos = xml.find("<programme").unwrap_or(usize::MAX);
        assert!(channel_pos < programme_pos);
        assert!(xml.starts_with("<?xml"));
    }

    #[test]
    fn test_escape_handles_xml_special_characters() {
        assert_eq!(escape("A & B <C> \"D\""), "A &amp; B &lt;C&gt; &quot;D&quot;");
    }
}
