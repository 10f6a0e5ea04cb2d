//! HTTPS listener supervision (Component O).
//!
//! The listener runs in-process via `axum_server::bind_rustls`, so
//! supervision is graceful-shutdown-by-`Handle` rather than the
//! PID-file subprocess model the teacher's `daemon/process.rs`
//! (`RustantDaemon`) uses for a genuine child process — there is no
//! child process here. The state-transition shape (start/stop/restart
//! atop a tracked `DaemonState`-like enum) and the `rcgen`
//! self-signed-fallback + `axum_server::tls_rustls::RustlsConfig` /
//! `rustls::crypto::aws_lc_rs::default_provider().install_default()`
//! idiom both come from the teacher's `oauth.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::sync::Mutex;

use crate::error::AcmeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Running,
}

struct RunningListener {
    handle: Handle,
}

/// Owns the lifecycle of the HTTPS admin listener: start it once a
/// valid certificate exists, stop it when TLS is disabled or the
/// certificate is invalidated, and restart it (new `RustlsConfig`)
/// after a renewal without dropping already-open connections abruptly.
pub struct HttpsSupervisor {
    running: Mutex<Option<RunningListener>>,
}

impl Default for HttpsSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpsSupervisor {
    pub fn new() -> Self {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        Self { running: Mutex::new(None) }
    }

    pub async fn state(&self) -> SupervisorState {
        if self.running.lock().await.is_some() {
            SupervisorState::Running
        } else {
            SupervisorState::Stopped
        }
    }

    /// Start serving `app` over HTTPS on `addr` using `cert_pem`/`key_pem`.
    /// A no-op if already running; call `restart` to pick up a new cert.
    pub async fn start(&self, addr: SocketAddr, cert_pem: &str, key_pem: &str, app: Router) -> Result<(), AcmeError> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let tls_config = RustlsConfig::from_pem(cert_pem.as_bytes().to_vec(), key_pem.as_bytes().to_vec())
            .await
            .map_err(|e| AcmeError::InvalidManualCertificate { message: format!("failed to build TLS config: {e}") })?;

        let handle = Handle::new();
        let serve_handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = axum_server::bind_rustls(addr, tls_config)
                .handle(serve_handle)
                .serve(app.into_make_service())
                .await
            {
                tracing::warn!(error = %e, "HTTPS listener exited");
            }
        });

        tracing::info!(%addr, "HTTPS listener started");
        *guard = Some(RunningListener { handle });
        Ok(())
    }

    /// Gracefully stop the listener, giving in-flight requests up to
    /// `grace` to finish before forcing the connection closed.
    pub async fn stop(&self, grace: std::time::Duration) {
        let mut guard = self.running.lock().await;
        if let Some(listener) = guard.take() {
            listener.handle.graceful_shutdown(Some(grace));
            tracing::info!("HTTPS listener stopping");
        }
    }

    /// Stop the current listener (if any) and start a new one with a
    /// freshly renewed certificate.
    pub async fn restart(
        self: &Arc<Self>,
        addr: SocketAddr,
        cert_pem: &str,
        key_pem: &str,
        app: Router,
    ) -> Result<(), AcmeError> {
        self.stop(std::time::Duration::from_secs(5)).await;
        self.start(addr, cert_pem, key_pem, app).await
    }

    /// Build a self-signed fallback certificate for `domain`, used when
    /// TLS is enabled but no certificate has been issued yet.
    pub fn self_signed_fallback(domain: &str) -> Result<(String, String), AcmeError> {
        let subject_alt_names = vec![domain.to_string()];
        let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(subject_alt_names)
            .map_err(|e| AcmeError::InvalidManualCertificate { message: format!("failed to generate self-signed certificate: {e}") })?;
        Ok((cert.pem(), key_pair.serialize_pem()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_fallback_produces_pem_blocks() {
        let (cert, key) = HttpsSupervisor::self_signed_fallback("localhost").unwrap();
        assert!(cert.contains("BEGIN CERTIFICATE"));
        assert!(key.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_state_is_stopped_before_start() {
        let supervisor = HttpsSupervisor::new();
        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
    }
}
