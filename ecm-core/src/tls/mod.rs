//! TLS Lifecycle (Component O): ACME issuance, certificate storage, the
//! renewal loop, and HTTPS listener supervision.
//!
//! Grounded on `original_source/backend/tls/acme_client.py` (order state
//! machine, JWS signing, DNS-01 key-authorization digest) for `acme`,
//! `original_source/backend/tls/storage.py` for `storage`, and the
//! teacher's `oauth.rs` (`rcgen` self-signed fallback, `axum_server`
//! bind-rustls) plus `daemon/process.rs` (state-transition lifecycle) for
//! `supervisor`.

pub mod acme;
pub mod dns;
pub mod renewal;
pub mod storage;
pub mod supervisor;

pub use acme::{AcmeClient, CertificateResult, ChallengeInfo, ChallengeType, PendingOrder};
pub use dns::DnsProvider;
pub use renewal::{issue_or_renew, renewal_loop, RenewalOutcome};
pub use storage::{CertificateInfo, CertificateStorage};
pub use supervisor::{HttpsSupervisor, SupervisorState};
