//! Stream Probe Engine (Component G): a bounded worker pool that opens
//! each stream URL, extracts media characteristics, and records the
//! outcome in `StreamStats`.
//!
//! Grounded on `spec.md` §4.G; the semaphore-bounded `tokio::spawn` fan-out
//! with a per-task `tokio::time::timeout` mirrors the teacher's
//! `ScanOrchestrator::run_all` in `rustant-security/src/scanner.rs`.

pub mod ffprobe;
pub mod sort;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeSettings;
use crate::error::ProbeError;
use crate::store::models::{ProbeStatus, StreamStats};
use crate::store::Store;

/// Extracted media characteristics from a successful probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    pub resolution: Option<String>,
    pub bitrate: Option<u64>,
    pub codec: Option<String>,
}

/// Abstracts the actual media inspection (e.g. an `ffprobe` invocation)
/// so the worker pool's concurrency/retry/timeout logic is testable
/// without a real stream URL.
#[async_trait::async_trait]
pub trait StreamProber: Send + Sync {
    async fn probe(&self, url: &str, bitrate_sample: Duration) -> Result<ProbeOutcome, String>;
}

#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub stream_id: i64,
    pub url: String,
    pub name: String,
}

/// Throttled progress snapshot, published at ≤1 Hz by the caller.
#[derive(Debug, Clone, Default)]
pub struct ProbeProgress {
    pub total: usize,
    pub completed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub current_item: Option<String>,
}

/// Run one stream's probe contract, including the retry loop, and
/// persist the resulting `StreamStats`.
async fn probe_one(
    prober: &dyn StreamProber,
    store: &dyn Store,
    settings: &ProbeSettings,
    target: &ProbeTarget,
) -> Result<(), ProbeError> {
    let timeout = Duration::from_secs(settings.stream_probe_timeout_secs);
    let bitrate_sample = Duration::from_secs(settings.bitrate_sample_duration_secs);

    let mut last_error = None;
    let mut outcome = None;
    for attempt in 0..=settings.probe_retry_count {
        match tokio::time::timeout(timeout, prober.probe(&target.url, bitrate_sample)).await {
            Ok(Ok(o)) => {
                outcome = Some(o);
                break;
            }
            Ok(Err(message)) => last_error = Some(message),
            Err(_) => {
                last_error = Some(format!("timed out after {}s", settings.stream_probe_timeout_secs));
            }
        }
        if attempt < settings.probe_retry_count {
            tokio::time::sleep(Duration::from_secs(settings.probe_retry_delay_secs)).await;
        }
    }

    let mut stats = store
        .get_stream_stats(target.stream_id)
        .await
        .map_err(|e| ProbeError::ConnectionFailed {
            stream_id: target.stream_id,
            message: e.to_string(),
        })?
        .unwrap_or_else(|| StreamStats::new(target.stream_id, &target.name));

    let succeeded = outcome.is_some();
    match outcome {
        Some(o) => {
            stats.probe_status = ProbeStatus::Success;
            stats.resolution = o.resolution;
            stats.bitrate = o.bitrate;
            stats.codec = o.codec;
            stats.consecutive_failures = 0;
            stats.last_probed_at = Some(Utc::now());
        }
        None => {
            stats.probe_status = ProbeStatus::Failed;
            stats.consecutive_failures += 1;
            stats.last_probed_at = Some(Utc::now());
        }
    }

    store
        .upsert_stream_stats(stats)
        .await
        .map_err(|e| ProbeError::ConnectionFailed {
            stream_id: target.stream_id,
            message: e.to_string(),
        })?;

    if succeeded {
        Ok(())
    } else {
        Err(ProbeError::ConnectionFailed {
            stream_id: target.stream_id,
            message: last_error.unwrap_or_else(|| "unknown probe failure".into()),
        })
    }
}

/// Filter targets already probed within `skip_recently_probed_hours`,
/// unless `force` requests a re-probe regardless.
pub async fn filter_recently_probed(
    store: &dyn Store,
    settings: &ProbeSettings,
    targets: Vec<ProbeTarget>,
    force: bool,
) -> Result<Vec<ProbeTarget>, ProbeError> {
    if force || settings.skip_recently_probed_hours == 0 {
        return Ok(targets);
    }
    let cutoff = Utc::now() - chrono::Duration::hours(settings.skip_recently_probed_hours as i64);
    let mut kept = Vec::with_capacity(targets.len());
    for target in targets {
        let recent = store
            .get_stream_stats(target.stream_id)
            .await
            .map_err(|e| ProbeError::ConnectionFailed {
                stream_id: target.stream_id,
                message: e.to_string(),
            })?
            .and_then(|s| s.last_probed_at)
            .is_some_and(|ts| ts > cutoff);
        if !recent {
            kept.push(target);
        }
    }
    Ok(kept)
}

/// Run the probe pool over `targets`, bounded by
/// `settings.max_concurrent_probes`, honoring `cancel` at each worker's
/// pull and calling `on_progress` as each probe completes.
pub async fn run_probe_batch(
    prober: Arc<dyn StreamProber>,
    store: Arc<dyn Store>,
    settings: ProbeSettings,
    targets: Vec<ProbeTarget>,
    cancel: CancellationToken,
    on_progress: impl Fn(ProbeProgress) + Send + Sync + 'static,
) -> ProbeProgress {
    let total = targets.len();
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_probes.max(1)));
    let progress = Arc::new(Mutex::new(ProbeProgress {
        total,
        ..Default::default()
    }));
    let on_progress = Arc::new(on_progress);

    let mut handles = Vec::with_capacity(targets.len());
    for target in targets {
        if cancel.is_cancelled() {
            break;
        }
        let permit_sem = semaphore.clone();
        let prober = prober.clone();
        let store = store.clone();
        let settings = settings.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();
        let on_progress = on_progress.clone();

        let handle = tokio::spawn(async move {
            let _permit = match permit_sem.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if cancel.is_cancelled() {
                return;
            }
            let result = probe_one(prober.as_ref(), store.as_ref(), &settings, &target).await;
            let mut p = progress.lock().await;
            p.completed += 1;
            p.current_item = Some(target.name.clone());
            if result.is_ok() {
                p.success_count += 1;
            } else {
                p.error_count += 1;
            }
            on_progress(p.clone());
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.await;
    }

    Arc::try_unwrap(progress)
        .map(|m| m.into_inner())
        .unwrap_or_default()
}

/// The live struck-out set: streams whose `consecutive_failures` meet
/// or exceed `strike_threshold` (0 disables the feature).
pub fn struck_out(all_stats: &[StreamStats], strike_threshold: u32) -> Vec<&StreamStats> {
    if strike_threshold == 0 {
        return Vec::new();
    }
    all_stats
        .iter()
        .filter(|s| s.is_struck_out(strike_threshold))
        .collect()
}
