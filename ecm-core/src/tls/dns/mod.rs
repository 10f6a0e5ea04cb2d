//! DNS provider adapters for ACME DNS-01 challenges.
//!
//! Grounded on `original_source/backend/tls/dns_providers/base.py`'s
//! `DNSProvider` interface (`create_txt_record`/`delete_txt_record`).

pub mod cloudflare;
pub mod route53;

use async_trait::async_trait;

use crate::error::DnsProviderError;

pub use cloudflare::CloudflareDns;
pub use route53::Route53Dns;

/// A DNS provider capable of creating and removing the
/// `_acme-challenge.<domain>` TXT record DNS-01 validation needs.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create the TXT record, returning a provider-specific handle the
    /// caller passes back to `delete_txt_record` for cleanup.
    async fn create_txt_record(&self, name: &str, value: &str) -> Result<String, DnsProviderError>;

    async fn delete_txt_record(&self, record_id: &str) -> Result<(), DnsProviderError>;
}
