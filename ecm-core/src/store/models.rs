//! Entities persisted by the Local Store (Component B), matching `spec.md` §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMatchPosition {
    Prefix,
    Suffix,
    Contains,
}

/// A group of `NormalizationRule`s. Priority is the sole ordering key;
/// ties break by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationRuleGroup {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub priority: i64,
    pub is_builtin: bool,
}

/// One element of a compound condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionClause {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub value: Option<String>,
    #[serde(default)]
    pub negate: bool,
    pub case_sensitive: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationRule {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub enabled: bool,
    pub priority: i64,
    pub condition_type: Option<String>,
    pub condition_value: Option<String>,
    pub case_sensitive: bool,
    #[serde(default)]
    pub conditions: Vec<ConditionClause>,
    pub condition_logic: ConditionLogic,
    pub tag_group_id: Option<i64>,
    pub tag_match_position: Option<TagMatchPosition>,
    pub action_type: String,
    pub action_value: Option<String>,
    pub else_action_type: Option<String>,
    pub else_action_value: Option<String>,
    pub stop_processing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagGroup {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub group_id: i64,
    pub value: String,
    pub case_sensitive: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanAction {
    Delete,
    Keep,
    Disable,
}

/// A tagged-variant auto-creation condition, keyed by `type` per the
/// "cyclic or deep-inheritance shapes" design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutoCreationCondition {
    StreamNameContains { value: String, case_sensitive: bool },
    StreamNameRegex { pattern: String },
    GroupNameEquals { value: String },
    GroupNameContains { value: String, case_sensitive: bool },
    TagGroupMatch {
        tag_group_id: i64,
        position: TagMatchPosition,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutoCreationAction {
    CreateChannel {
        name_template: String,
        group_name: Option<String>,
    },
    CreateGroup { name: String },
    AttachToExisting { channel_key: String },
    SetChannelNumber { number: f64 },
    SkipStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCreationRule {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub priority: i64,
    pub conditions: Vec<AutoCreationCondition>,
    pub actions: Vec<AutoCreationAction>,
    pub run_on_refresh: bool,
    pub stop_on_first_match: bool,
    pub sort_order: SortOrder,
    pub orphan_action: OrphanAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    DryRun,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Warning,
    Failed,
    Cancelled,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConflict {
    pub stream_id: Option<i64>,
    pub channel_key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoCreationExecution {
    pub id: Uuid,
    pub rule_id: Option<i64>,
    pub rule_name: String,
    pub mode: ExecutionMode,
    pub triggered_by: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub streams_evaluated: u64,
    pub streams_matched: u64,
    pub channels_created: u64,
    pub channels_updated: u64,
    pub groups_created: u64,
    pub streams_merged: u64,
    pub conflicts: Vec<ExecutionConflict>,
    /// Entity ids created by this execution, retained to power rollback.
    pub created_channel_ids: Vec<i64>,
    pub created_group_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Failed,
    Pending,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStats {
    pub stream_id: i64,
    pub stream_name: String,
    pub probe_status: ProbeStatus,
    pub last_probed_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub resolution: Option<String>,
    pub bitrate: Option<u64>,
    pub codec: Option<String>,
    pub dismissed_at: Option<DateTime<Utc>>,
}

impl StreamStats {
    pub fn new(stream_id: i64, stream_name: impl Into<String>) -> Self {
        Self {
            stream_id,
            stream_name: stream_name.into(),
            probe_status: ProbeStatus::Unknown,
            last_probed_at: None,
            consecutive_failures: 0,
            resolution: None,
            bitrate: None,
            codec: None,
            dismissed_at: None,
        }
    }

    pub fn is_struck_out(&self, strike_threshold: u32) -> bool {
        strike_threshold > 0 && self.consecutive_failures >= strike_threshold
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3UGroupSummary {
    pub name: String,
    pub stream_count: usize,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3USnapshot {
    pub id: i64,
    pub m3u_account_id: i64,
    pub taken_at: DateTime<Utc>,
    pub groups: Vec<M3UGroupSummary>,
    pub stream_names_by_group: HashMap<String, Vec<String>>,
    pub total_streams: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    GroupAdded,
    GroupRemoved,
    StreamsAdded,
    StreamsRemoved,
    GroupEnabled,
    GroupDisabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3UChangeLog {
    pub id: i64,
    pub m3u_account_id: i64,
    pub change_time: DateTime<Utc>,
    pub change_type: ChangeType,
    pub group_name: Option<String>,
    pub count: usize,
    pub stream_names: Vec<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestFrequency {
    Immediate,
    Hourly,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3UDigestSettings {
    pub enabled: bool,
    pub frequency: DigestFrequency,
    pub email_recipients: Vec<String>,
    pub send_to_discord: bool,
    pub include_group_changes: bool,
    pub include_stream_changes: bool,
    pub show_detailed_list: bool,
    pub min_changes_threshold: u32,
    pub exclude_group_patterns: Vec<String>,
    pub exclude_stream_patterns: Vec<String>,
}

impl Default for M3UDigestSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: DigestFrequency::Daily,
            email_recipients: Vec::new(),
            send_to_discord: false,
            include_group_changes: true,
            include_stream_changes: true,
            show_detailed_list: true,
            min_changes_threshold: 1,
            exclude_group_patterns: Vec::new(),
            exclude_stream_patterns: Vec::new(),
        }
    }
}

/// In-memory task registry entry. Not persisted — rebuilt on process
/// start as each task implementation registers itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: String,
    pub task_name: String,
    pub description: String,
    pub parameter_schema: Vec<TaskParameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Boolean,
    Number,
    NumberArray,
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub label: String,
    pub description: String,
    pub default: serde_json::Value,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub enabled: bool,
    pub send_alerts: bool,
    pub alert_on_success: bool,
    pub alert_on_warning: bool,
    pub alert_on_error: bool,
    pub alert_on_info: bool,
    pub send_to_email: bool,
    pub send_to_discord: bool,
    pub send_to_telegram: bool,
    pub show_notifications: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Interval,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Cron,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSchedule {
    pub id: i64,
    pub task_id: String,
    pub name: Option<String>,
    pub enabled: bool,
    pub schedule_type: ScheduleType,
    pub interval_seconds: Option<i64>,
    /// `HH:MM`.
    pub schedule_time: Option<String>,
    pub timezone: String,
    /// 0 = Sunday.
    pub days_of_week: Option<Vec<u8>>,
    /// 1..31, or -1 for "last day of month".
    pub day_of_month: Option<i32>,
    pub cron_expression: Option<String>,
    pub parameters: serde_json::Value,
    /// Anchor for `biweekly`: the schedule's creation date rounded to the
    /// start of its ISO week.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Warning,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub run_id: Uuid,
    pub task_id: String,
    pub schedule_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub message: String,
    pub details: serde_json::Value,
    pub total_items: Option<u64>,
    pub success_count: Option<u64>,
    pub error_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    LetsEncrypt,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsProviderKind {
    #[serde(rename = "")]
    None,
    Cloudflare,
    Route53,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    pub enabled: bool,
    pub mode: TlsMode,
    pub domain: String,
    pub acme_email: String,
    pub use_staging: bool,
    pub dns_provider: DnsProviderKind,
    pub dns_api_token: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: Option<String>,
    pub auto_renew: bool,
    pub renew_days_before_expiry: u32,
    pub https_port: u16,
    pub cert_issued_at: Option<DateTime<Utc>>,
    pub cert_expires_at: Option<DateTime<Utc>>,
    pub cert_subject: Option<String>,
    pub cert_issuer: Option<String>,
    pub last_renewal_attempt: Option<DateTime<Utc>>,
    pub last_renewal_error: Option<String>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: TlsMode::Manual,
            domain: String::new(),
            acme_email: String::new(),
            use_staging: true,
            dns_provider: DnsProviderKind::None,
            dns_api_token: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: None,
            auto_renew: true,
            renew_days_before_expiry: 30,
            https_port: 8443,
            cert_issued_at: None,
            cert_expires_at: None,
            cert_subject: None,
            cert_issuer: None,
            last_renewal_attempt: None,
            last_renewal_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationType {
    /// Invalid type strings degrade to `info` per `spec.md` §4.P.
    pub fn parse_or_info(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "warning" => Self::Warning,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAction {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: Option<String>,
    pub message: String,
    pub source: String,
    pub source_id: Option<String>,
    pub action: Option<NotificationAction>,
    pub extra_data: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    Channel,
    Stream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstitutionPair {
    pub find: String,
    pub replace: String,
    pub is_regex: bool,
    pub enabled: bool,
}

/// One pattern-matching attempt tried in order against a name; the
/// first one whose `title_pattern` matches wins. Per-field template
/// overrides fall back to the owning profile's template of the same
/// key when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternVariant {
    pub name: String,
    pub title_pattern: String,
    pub time_pattern: Option<String>,
    pub date_pattern: Option<String>,
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAssignment {
    pub channel_id: i64,
    pub tvg_id_override: Option<String>,
}

/// A Dummy EPG profile (Component N): the operator-authored rules for
/// synthesizing an XMLTV feed for a set of channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyEpgProfile {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub name_source: NameSource,
    /// 1-based index into a channel's stream list, used when
    /// `name_source` is `stream`.
    pub stream_index: usize,
    pub substitution_pairs: Vec<SubstitutionPair>,
    pub pattern_variants: Vec<PatternVariant>,
    /// Flat fallback pattern set, used only when `pattern_variants` is
    /// empty.
    pub title_pattern: Option<String>,
    pub time_pattern: Option<String>,
    pub date_pattern: Option<String>,
    #[serde(default)]
    pub templates: HashMap<String, String>,
    pub event_timezone: String,
    pub output_timezone: Option<String>,
    pub program_duration_minutes: i64,
    pub categories: Vec<String>,
    pub include_date_tag: bool,
    pub include_live_tag: bool,
    pub include_new_tag: bool,
    pub tvg_id_template: String,
    pub channel_assignments: Vec<ChannelAssignment>,
}
