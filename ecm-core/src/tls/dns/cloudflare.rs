//! Cloudflare DNS-01 provider.
//!
//! Grounded on `original_source/backend/tls/dns_providers/cloudflare.py`
//! (`CloudflareDNS`): zone auto-detection by walking the domain's label
//! suffixes, bearer-token auth, minimum 60s TTL.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::DnsProviderError;

use super::DnsProvider;

const BASE_URL: &str = "https://api.cloudflare.com/client/v4";

pub struct CloudflareDns {
    client: reqwest::Client,
    api_token: String,
    zone_id: Mutex<Option<String>>,
}

impl CloudflareDns {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_token: api_token.into(),
            zone_id: Mutex::new(None),
        }
    }

    async fn get_zone_id(&self, domain: &str) -> Result<String, DnsProviderError> {
        if let Some(zone_id) = self.zone_id.lock().await.clone() {
            return Ok(zone_id);
        }

        let labels: Vec<&str> = domain.split('.').collect();
        for i in 0..labels.len().saturating_sub(1) {
            let zone_name = labels[i..].join(".");
            let resp = self
                .client
                .get(format!("{BASE_URL}/zones"))
                .bearer_auth(&self.api_token)
                .query(&[("name", zone_name.as_str())])
                .send()
                .await
                .map_err(|e| DnsProviderError::RecordOperationFailed { message: e.to_string() })?;

            let body: CfListResponse = resp
                .json()
                .await
                .map_err(|e| DnsProviderError::RecordOperationFailed { message: e.to_string() })?;

            if let Some(zone) = body.result.into_iter().next() {
                *self.zone_id.lock().await = Some(zone.id.clone());
                return Ok(zone.id);
            }
        }

        Err(DnsProviderError::ZoneNotFound { domain: domain.to_string() })
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn create_txt_record(&self, name: &str, value: &str) -> Result<String, DnsProviderError> {
        let domain = name.trim_start_matches("_acme-challenge.");
        let zone_id = self.get_zone_id(domain).await?;

        let resp = self
            .client
            .post(format!("{BASE_URL}/zones/{zone_id}/dns_records"))
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({
                "type": "TXT",
                "name": name,
                "content": value,
                "ttl": 60,
            }))
            .send()
            .await
            .map_err(|e| DnsProviderError::RecordOperationFailed { message: e.to_string() })?;

        let body: CfRecordResponse = resp
            .json()
            .await
            .map_err(|e| DnsProviderError::RecordOperationFailed { message: e.to_string() })?;

        if !body.success {
            return Err(DnsProviderError::RecordOperationFailed { message: cf_errors(&body.errors) });
        }

        let record = body.result.ok_or(DnsProviderError::RecordOperationFailed {
            message: "Cloudflare response missing record".into(),
        })?;
        Ok(format!("{zone_id}:{}", record.id))
    }

    async fn delete_txt_record(&self, record_id: &str) -> Result<(), DnsProviderError> {
        let (zone_id, record_id) = record_id
            .split_once(':')
            .ok_or(DnsProviderError::RecordOperationFailed { message: "malformed Cloudflare record handle".into() })?;

        let resp = self
            .client
            .delete(format!("{BASE_URL}/zones/{zone_id}/dns_records/{record_id}"))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| DnsProviderError::RecordOperationFailed { message: e.to_string() })?;

        let body: CfDeleteResponse = resp
            .json()
            .await
            .map_err(|e| DnsProviderError::RecordOperationFailed { message: e.to_string() })?;

        if !body.success {
            // The record may already be gone; treat as success per the
            // original's "not found" tolerance on delete.
            let message = cf_errors(&body.errors);
            if message.to_lowercase().contains("not found") {
                return Ok(());
            }
            return Err(DnsProviderError::RecordOperationFailed { message });
        }
        Ok(())
    }
}

fn cf_errors(errors: &[CfError]) -> String {
    errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Deserialize)]
struct CfError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CfZone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CfListResponse {
    result: Vec<CfZone>,
}

#[derive(Debug, Deserialize)]
struct CfRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CfRecordResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<CfError>,
    result: Option<CfRecord>,
}

#[derive(Debug, Deserialize)]
struct CfDeleteResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<CfError>,
}
