//! Configuration system for the Enhanced Channel Manager control plane.
//!
//! Uses `figment` for layered configuration: defaults -> `config.toml`
//! under `CONFIG_DIR` -> `ECM_*` environment variables, the same
//! layering the teacher applies to its own config. `dotenvy` loads a
//! local `.env` file first so development overrides land in the
//! environment layer without exporting them in the shell.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{EcmError, StoreError};

/// Probe Engine settings (Component G), `spec.md` §4.G.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub max_concurrent_probes: usize,
    pub stream_probe_timeout_secs: u64,
    pub bitrate_sample_duration_secs: u64,
    pub probe_retry_count: u32,
    pub probe_retry_delay_secs: u64,
    pub skip_recently_probed_hours: u64,
    pub strike_threshold: u32,
    pub deprioritize_failed_streams: bool,
    /// Supplemented per `SPEC_FULL.md` §7: the struck-out stream-name
    /// sample cap per group, observed as a hardcoded 500 in the original.
    pub struck_out_sample_cap: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 8,
            stream_probe_timeout_secs: 10,
            bitrate_sample_duration_secs: 3,
            probe_retry_count: 2,
            probe_retry_delay_secs: 2,
            skip_recently_probed_hours: 6,
            strike_threshold: 5,
            deprioritize_failed_streams: true,
            struck_out_sample_cap: 500,
        }
    }
}

/// M3U snapshot sampling settings (Component I).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct M3USettings {
    pub sample_stream_names_per_group: usize,
    pub change_log_stream_name_cap: usize,
}

impl Default for M3USettings {
    fn default() -> Self {
        Self {
            sample_stream_names_per_group: 500,
            change_log_stream_name_cap: 50,
        }
    }
}

/// ACME directory URLs (Component O).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeSettings {
    pub production_directory_url: String,
    pub staging_directory_url: String,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub renewal_check_interval_secs: u64,
    pub supervisor_stop_timeout_secs: u64,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            production_directory_url: "https://acme-v02.api.letsencrypt.org/directory".into(),
            staging_directory_url: "https://acme-staging-v02.api.letsencrypt.org/directory".into(),
            poll_interval_secs: 2,
            poll_max_attempts: 30,
            renewal_check_interval_secs: 24 * 3600,
            supervisor_stop_timeout_secs: 10,
        }
    }
}

/// Upstream API client settings (Component A).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9191/api".into(),
            username: String::new(),
            password: String::new(),
            page_size: 100,
            request_timeout_secs: 30,
        }
    }
}

/// Auto-Creation Pipeline global exclusions (Component F), `spec.md` §4.F.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCreationSettings {
    /// Stream names containing any of these substrings are never
    /// considered as pipeline candidates.
    pub excluded_terms: Vec<String>,
    /// Streams whose upstream group name matches any of these are
    /// never considered as pipeline candidates.
    pub excluded_groups: Vec<String>,
    /// When set, only streams from this upstream group are eligible —
    /// the "auto-sync-group filter" named in `spec.md` §4.F.
    pub auto_sync_group: Option<String>,
}

impl Default for AutoCreationSettings {
    fn default() -> Self {
        Self {
            excluded_terms: Vec::new(),
            excluded_groups: Vec::new(),
            auto_sync_group: None,
        }
    }
}

/// SMTP dispatch settings shared by the Digest Dispatcher and the
/// Notification/Alert Fanout (Components J, P).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub use_tls: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            use_tls: true,
        }
    }
}

/// Webhook dispatch targets (Discord, Telegram), shared by the same
/// two components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub discord_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            discord_url: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            request_timeout_secs: 10,
        }
    }
}

/// Notification dispatch settings (Components J, P).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifySettings {
    pub smtp: SmtpSettings,
    pub webhook: WebhookSettings,
}

/// Process-wide cache settings (Component C).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

/// Top-level configuration for `ecm-core`. Loaded once at startup and
/// shared (`Arc<EcmConfig>`) across every subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EcmConfig {
    pub config_dir: PathBuf,
    pub upstream: UpstreamSettings,
    pub probe: ProbeSettings,
    pub m3u: M3USettings,
    pub acme: AcmeSettings,
    pub autocreate: AutoCreationSettings,
    pub notify: NotifySettings,
    pub cache: CacheSettings,
    pub admin_port: u16,
    /// Refused at startup if set to `"1"` inside a process that is not
    /// the spawned TLS child, per `ECM_HTTPS_SUBPROCESS`.
    pub https_subprocess: bool,
    /// `ECM_HTTPS_PORT`, overrides `TlsSettings.https_port` when set.
    #[serde(skip)]
    pub https_port_override: Option<u16>,
}

fn default_config_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ecm", "enhanced-channel-manager")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".ecm"))
}

impl EcmConfig {
    /// Load configuration from defaults, then `CONFIG_DIR/config.toml`
    /// if present, then `ECM_*` environment variables, matching the
    /// teacher's own `figment` layering order.
    pub fn load() -> Result<Self, EcmError> {
        let _ = dotenvy::dotenv();

        let config_dir = std::env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_dir());

        let config_file = config_dir.join("config.toml");

        let mut figment = Figment::new()
            .merge(Serialized::defaults(EcmConfig {
                config_dir: config_dir.clone(),
                ..Default::default()
            }))
            .merge(Env::prefixed("ECM_").split("_").map(|k| k.as_str().into()));

        if config_file.exists() {
            figment = figment.merge(Toml::file(&config_file));
        }

        let https_port_override = std::env::var("ECM_HTTPS_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok());

        let mut config: EcmConfig = figment
            .extract()
            .map_err(|e| StoreError::Backend {
                message: format!("config load failed: {e}"),
            })?;

        config.config_dir = config_dir;
        config.https_subprocess = std::env::var("ECM_HTTPS_SUBPROCESS")
            .map(|v| v == "1")
            .unwrap_or(false);
        config.https_port_override = https_port_override;

        Ok(config)
    }

    pub fn tls_dir(&self) -> PathBuf {
        self.config_dir.join("tls")
    }

    pub fn store_path(&self) -> PathBuf {
        self.config_dir.join("store.sqlite")
    }

    pub fn acme_account_path(&self) -> PathBuf {
        self.tls_dir().join("acme_account.json")
    }
}

/// Directory/mode bits `spec.md` §3/§6 mandate for secret-bearing state:
/// directories 0700, files holding secrets 0600.
#[cfg(unix)]
pub fn ensure_secret_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
pub fn ensure_secret_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(unix)]
pub fn write_secret_file(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    atomic_write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn write_secret_file(path: &Path, contents: &[u8], _mode: u32) -> std::io::Result<()> {
    atomic_write(path, contents)
}

/// Write-to-`.tmp`-then-rename, matching the teacher's atomic config
/// persistence pattern so a crash mid-write never leaves a truncated
/// secret file on disk.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}
