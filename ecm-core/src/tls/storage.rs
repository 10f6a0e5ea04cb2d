//! Certificate storage: on-disk layout and manual cert/key validation.
//!
//! Grounded on `original_source/backend/tls/storage.py`'s
//! `CertificateStorage` (directory layout, 0700/0640/0600 permission
//! scheme, cert+key pair validation before a write is accepted).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::AcmeError;

/// Metadata about a stored certificate. There is no X.509-parsing crate
/// in the dependency stack, so `subject`/`issuer`/`expires_at` are
/// recorded at issuance time from the request parameters rather than
/// re-derived by decoding the certificate's DER bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CertificateInfo {
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days().max(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Manages certificate/key/chain storage under `tls_dir`.
pub struct CertificateStorage {
    tls_dir: PathBuf,
}

impl CertificateStorage {
    pub fn new(tls_dir: impl Into<PathBuf>) -> Self {
        Self { tls_dir: tls_dir.into() }
    }

    pub fn cert_path(&self) -> PathBuf {
        self.tls_dir.join("cert.pem")
    }

    pub fn key_path(&self) -> PathBuf {
        self.tls_dir.join("key.pem")
    }

    pub fn chain_path(&self) -> PathBuf {
        self.tls_dir.join("chain.pem")
    }

    pub fn fullchain_path(&self) -> PathBuf {
        self.tls_dir.join("fullchain.pem")
    }

    /// Create the TLS directory with `0700` permissions if missing.
    pub fn ensure_directory(&self) -> Result<(), AcmeError> {
        std::fs::create_dir_all(&self.tls_dir).map_err(|e| AcmeError::InvalidManualCertificate {
            message: format!("failed to create TLS directory: {e}"),
        })?;
        set_mode(&self.tls_dir, 0o700)?;
        Ok(())
    }

    /// Validate that `cert_pem`/`key_pem` are well-formed PEM documents
    /// of a private key and a certificate, then persist them with
    /// restrictive file modes (`key.pem` 0600, certs 0640).
    pub fn save_certificate(
        &self,
        cert_pem: &str,
        key_pem: &str,
        chain_pem: Option<&str>,
    ) -> Result<(), AcmeError> {
        validate_pair(cert_pem, key_pem)?;
        self.ensure_directory()?;

        write_restricted(&self.cert_path(), cert_pem.as_bytes(), 0o640)?;
        write_restricted(&self.key_path(), key_pem.as_bytes(), 0o600)?;

        if let Some(chain) = chain_pem {
            write_restricted(&self.chain_path(), chain.as_bytes(), 0o640)?;
            let fullchain = format!("{cert_pem}\n{chain}");
            write_restricted(&self.fullchain_path(), fullchain.as_bytes(), 0o640)?;
        }

        Ok(())
    }

    pub fn load_certificate(&self) -> Option<(String, String)> {
        let cert = std::fs::read_to_string(self.cert_path()).ok()?;
        let key = std::fs::read_to_string(self.key_path()).ok()?;
        Some((cert, key))
    }

    pub fn has_certificate(&self) -> bool {
        self.cert_path().exists() && self.key_path().exists()
    }

    pub fn delete_certificate(&self) -> std::io::Result<()> {
        for path in [self.cert_path(), self.key_path(), self.chain_path(), self.fullchain_path()] {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Confirm `cert_pem`/`key_pem` each decode as a single well-formed PEM
/// block of the expected kind. This does not cross-check that the key's
/// public half matches the certificate's embedded public key — that
/// would need an X.509 decoder, which isn't in the dependency stack.
fn validate_pair(cert_pem: &str, key_pem: &str) -> Result<(), AcmeError> {
    let mut cert_reader = std::io::Cursor::new(cert_pem.as_bytes());
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| AcmeError::InvalidManualCertificate { message: format!("invalid certificate PEM: {e}") })?;
    if certs.is_empty() {
        return Err(AcmeError::InvalidManualCertificate { message: "no certificate found in PEM".into() });
    }

    let mut key_reader = std::io::Cursor::new(key_pem.as_bytes());
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| AcmeError::InvalidManualCertificate { message: format!("invalid private key PEM: {e}") })?;
    if key.is_none() {
        return Err(AcmeError::InvalidManualCertificate { message: "no private key found in PEM".into() });
    }

    Ok(())
}

fn write_restricted(path: &Path, contents: &[u8], mode: u32) -> Result<(), AcmeError> {
    std::fs::write(path, contents)
        .map_err(|e| AcmeError::InvalidManualCertificate { message: format!("failed to write {}: {e}", path.display()) })?;
    set_mode(path, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), AcmeError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| AcmeError::InvalidManualCertificate { message: format!("failed to chmod {}: {e}", path.display()) })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), AcmeError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_until_expiry_never_negative() {
        let info = CertificateInfo {
            subject: "example.com".into(),
            issuer: "Test CA".into(),
            issued_at: Utc::now() - chrono::Duration::days(100),
            expires_at: Utc::now() - chrono::Duration::days(10),
        };
        assert_eq!(info.days_until_expiry(Utc::now()), 0);
        assert!(info.is_expired(Utc::now()));
    }

    #[test]
    fn test_save_rejects_malformed_pem() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CertificateStorage::new(dir.path());
        let result = storage.save_certificate("not a cert", "not a key", None);
        assert!(result.is_err());
    }

    #[test]
    fn test_has_certificate_false_before_save() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CertificateStorage::new(dir.path());
        assert!(!storage.has_certificate());
    }
}
