//! Error types for the Enhanced Channel Manager control plane.
//!
//! Uses `thiserror` for public API error types with one structured
//! sub-enum per subsystem, matching the error table in `spec.md` §7.

use std::path::PathBuf;

/// Top-level error type for the `ecm-core` library.
#[derive(Debug, thiserror::Error)]
pub enum EcmError {
    #[error("upstream API error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("rule evaluation error: {0}")]
    RuleEvaluation(#[from] RuleEvaluationError),

    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),

    #[error("DNS provider error: {0}")]
    DnsProvider(#[from] DnsProviderError),

    #[error("notification dispatch error: {0}")]
    Notification(#[from] NotificationError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the upstream API client. Authentication failures are
/// retried once (a single refresh-and-retry) before surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("authentication failed against upstream: {message}")]
    Authentication { message: String },

    #[error("upstream API unavailable: {message}")]
    Unavailable { message: String },

    #[error("upstream request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("upstream response could not be parsed: {message}")]
    ResponseParse { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },
}

/// Errors from the local store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    #[error("store backend failure: {message}")]
    Backend { message: String },

    #[error("migration failed: {message}")]
    Migration { message: String },

    #[error("serialization failure in store: {message}")]
    Serialization { message: String },
}

/// Structured validation issues: bulk-commit, rule CRUD, digest settings,
/// CSV, cron. Never mutates state; always returned to the caller as data.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid regex pattern: {pattern}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("invalid cron expression: {expression}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("referenced entity not found: {kind} {id}")]
    ReferenceNotFound { kind: String, id: String },

    #[error("schedule rejected: {reason}")]
    InvalidSchedule { reason: String },
}

/// Errors surfaced while evaluating a single normalization or
/// auto-creation rule. These are always caught at the rule boundary,
/// logged once per rule id, and treated as a non-match — they never
/// escape to a caller.
#[derive(Debug, thiserror::Error)]
pub enum RuleEvaluationError {
    #[error("condition evaluation failed for rule {rule_id}: {message}")]
    ConditionFailed { rule_id: i64, message: String },

    #[error("action application failed for rule {rule_id}: {message}")]
    ActionFailed { rule_id: i64, message: String },

    #[error("tag group {tag_group_id} not found")]
    TagGroupNotFound { tag_group_id: i64 },
}

/// Errors from the stream probe engine. Counts as a failure against the
/// stream's `consecutive_failures`, retried up to the configured count.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {timeout_secs}s for stream {stream_id}")]
    Timeout { stream_id: i64, timeout_secs: u64 },

    #[error("probe connection failed for stream {stream_id}: {message}")]
    ConnectionFailed { stream_id: i64, message: String },

    #[error("probe could not identify stream {stream_id}: {message}")]
    Unidentifiable { stream_id: i64, message: String },
}

/// Errors from the ACME client. Recorded in `last_renewal_error`; the
/// existing certificate is kept and renewal retries on the next interval.
#[derive(Debug, thiserror::Error)]
pub enum AcmeError {
    #[error("ACME directory fetch failed: {message}")]
    Directory { message: String },

    #[error("ACME account registration failed: {message}")]
    Account { message: String },

    #[error("ACME order failed: {message}")]
    Order { message: String },

    #[error("ACME challenge {challenge_type} failed for {domain}: {message}")]
    Challenge {
        challenge_type: String,
        domain: String,
        message: String,
    },

    #[error("ACME authorization timed out after {attempts} attempts")]
    AuthorizationTimeout { attempts: u32 },

    #[error("ACME finalize/download failed: {message}")]
    Finalize { message: String },

    #[error("JWS signing failed: {message}")]
    Signing { message: String },

    #[error("manual certificate is invalid: {message}")]
    InvalidManualCertificate { message: String },
}

/// Errors from DNS provider adapters used for DNS-01 challenges. These
/// abort the current issuance attempt and propagate to the task result.
#[derive(Debug, thiserror::Error)]
pub enum DnsProviderError {
    #[error("DNS provider credentials invalid")]
    InvalidCredentials,

    #[error("zone not found for domain {domain}")]
    ZoneNotFound { domain: String },

    #[error("TXT record operation failed: {message}")]
    RecordOperationFailed { message: String },

    #[error("DNS propagation did not complete within the timeout")]
    PropagationTimeout,
}

/// Errors dispatching a notification to an external channel. Logged;
/// never changes the outcome of the operation that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("SMTP dispatch failed: {message}")]
    Smtp { message: String },

    #[error("webhook dispatch failed for {target}: {message}")]
    Webhook { message: String, target: String },

    #[error("notification target is not configured: {target}")]
    NotConfigured { target: String },
}

/// Errors from the task engine: cron parsing, task registry, run
/// conflicts.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("task {task_id} is already running")]
    AlreadyRunning { task_id: String },

    #[error("schedule not found: {schedule_id}")]
    ScheduleNotFound { schedule_id: i64 },

    #[error("invalid cron expression: {expression}")]
    InvalidCron { expression: String },

    #[error("weekly schedule has an empty day-of-week set")]
    EmptyDaysOfWeek,

    #[error("run {run_id} not found")]
    RunNotFound { run_id: uuid::Uuid },

    #[error("config path invalid: {path}")]
    ConfigPath { path: PathBuf },
}

/// A type alias for results using the top-level `EcmError`.
pub type Result<T> = std::result::Result<T, EcmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_upstream() {
        let err = EcmError::Upstream(UpstreamError::Authentication {
            message: "token expired".into(),
        });
        assert_eq!(
            err.to_string(),
            "upstream API error: authentication failed against upstream: token expired"
        );
    }

    #[test]
    fn test_error_display_store() {
        let err = EcmError::Store(StoreError::NotFound {
            kind: "normalization_rule".into(),
            id: "42".into(),
        });
        assert_eq!(
            err.to_string(),
            "store error: entity not found: normalization_rule 42"
        );
    }

    #[test]
    fn test_error_display_validation_cron() {
        let err = ValidationError::InvalidCron {
            expression: "* * *".into(),
            reason: "expected 5 fields".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid cron expression: * * *: expected 5 fields"
        );
    }

    #[test]
    fn test_rule_evaluation_error_never_carries_context_across() {
        let err = RuleEvaluationError::ConditionFailed {
            rule_id: 7,
            message: "invalid regex".into(),
        };
        assert!(err.to_string().contains("rule 7"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EcmError = io_err.into();
        assert!(matches!(err, EcmError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: EcmError = serde_err.into();
        assert!(matches!(err, EcmError::Serialization(_)));
    }

    #[test]
    fn test_scheduler_error_variants() {
        let err = SchedulerError::AlreadyRunning {
            task_id: "stream_probe".into(),
        };
        assert_eq!(err.to_string(), "task stream_probe is already running");
    }
}
