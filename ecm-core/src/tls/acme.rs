//! ACME (RFC 8555) client for Let's Encrypt issuance.
//!
//! Grounded on `original_source/backend/tls/acme_client.py`'s
//! `ACMEClient`: directory fetch, RSA account key + JWS signing,
//! `newOrder → authorizations → respond to challenge → poll → finalize
//! with CSR → poll order → download cert chain` state machine, and the
//! `token.thumbprint` key-authorization / DNS-01 TXT digest derivation.
//! CSR generation reuses the teacher's `oauth.rs` `rcgen` idiom
//! (`KeyPair::generate()` + `.serialize_pem()`).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::AcmeError;

pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt certificates are issued with a fixed ~90 day validity;
/// there's no X.509 decoder in the stack to read the real `notAfter`
/// back out of the downloaded chain, so renewal accounting uses this
/// constant from issuance time instead.
pub const CERT_VALIDITY_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    Http01,
    Dns01,
}

impl ChallengeType {
    fn as_str(self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChallengeInfo {
    pub challenge_type: ChallengeType,
    pub token: String,
    pub key_authorization: String,
    pub domain: String,
    /// Set for `http-01`: the path the HTTP-01 listener must answer
    /// `key_authorization` on.
    pub http01_path: Option<String>,
    /// Set for `dns-01`: the `_acme-challenge.<domain>` TXT record name
    /// and base64url-SHA256 digest value to publish.
    pub dns01_record_name: Option<String>,
    pub dns01_record_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CertificateResult {
    pub cert_pem: String,
    pub key_pem: String,
    pub chain_pem: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// An order in progress between `prepare_order` and `finalize_order`.
pub struct PendingOrder {
    order_url: String,
    finalize_url: String,
    authorization_url: String,
    challenge_url: String,
}

#[derive(Debug, Deserialize)]
struct Directory {
    #[serde(rename = "newNonce")]
    new_nonce: String,
    #[serde(rename = "newAccount")]
    new_account: String,
    #[serde(rename = "newOrder")]
    new_order: String,
}

pub struct AcmeClient {
    http: reqwest::Client,
    directory_url: String,
    email: String,
    account_key: RsaPrivateKey,
    directory: Mutex<Option<Directory>>,
    account_url: Mutex<Option<String>>,
    nonce: Mutex<Option<String>>,
}

impl AcmeClient {
    pub fn new(email: impl Into<String>, use_staging: bool, account_key_pem: Option<&str>) -> Result<Self, AcmeError> {
        let account_key = match account_key_pem {
            Some(pem) => RsaPrivateKey::from_pkcs8_pem(pem)
                .map_err(|e| AcmeError::Account { message: format!("invalid stored account key: {e}") })?,
            None => RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
                .map_err(|e| AcmeError::Account { message: format!("failed to generate account key: {e}") })?,
        };

        Ok(Self {
            http: reqwest::Client::new(),
            directory_url: if use_staging { LETSENCRYPT_STAGING.into() } else { LETSENCRYPT_PRODUCTION.into() },
            email: email.into(),
            account_key,
            directory: Mutex::new(None),
            account_url: Mutex::new(None),
            nonce: Mutex::new(None),
        })
    }

    /// Serialize the account key for persistence alongside the
    /// certificate, so subsequent renewals reuse the same account.
    pub fn account_key_pem(&self) -> Result<String, AcmeError> {
        self.account_key
            .to_pkcs8_pem(Default::default())
            .map(|pem| pem.to_string())
            .map_err(|e| AcmeError::Account { message: e.to_string() })
    }

    /// Fetch the ACME directory and register (or re-fetch) the account.
    pub async fn initialize(&self) -> Result<(), AcmeError> {
        let resp = self
            .http
            .get(&self.directory_url)
            .send()
            .await
            .map_err(|e| AcmeError::Directory { message: e.to_string() })?;
        let directory: Directory = resp.json().await.map_err(|e| AcmeError::Directory { message: e.to_string() })?;
        let new_account_url = directory.new_account.clone();
        *self.directory.lock().await = Some(directory);

        let payload = json!({
            "termsOfServiceAgreed": true,
            "contact": [format!("mailto:{}", self.email)],
        });
        let (_, headers) = self.acme_request(&new_account_url, Some(&payload), true).await?;
        let account_url = headers
            .get("location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AcmeError::Account { message: "account registration response missing Location".into() })?
            .to_string();
        *self.account_url.lock().await = Some(account_url);

        Ok(())
    }

    /// Begin issuance for `domain`: create the order, fetch its first
    /// authorization, and prepare the requested challenge. The caller
    /// must publish the challenge (HTTP-01 response or DNS-01 TXT
    /// record) before calling `finalize_order`.
    pub async fn prepare_order(
        &self,
        domain: &str,
        challenge_type: ChallengeType,
    ) -> Result<(PendingOrder, ChallengeInfo), AcmeError> {
        if self.account_url.lock().await.is_none() {
            self.initialize().await?;
        }
        let directory_url = self.directory_new_order().await?;

        let order_payload = json!({ "identifiers": [{ "type": "dns", "value": domain }] });
        let (order, order_headers) = self.acme_request(&directory_url, Some(&order_payload), false).await?;
        let order_url = order_headers
            .get("location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AcmeError::Order { message: "order response missing Location".into() })?
            .to_string();

        let authorizations = order["authorizations"]
            .as_array()
            .ok_or_else(|| AcmeError::Order { message: "order response missing authorizations".into() })?;
        let authorization_url = authorizations
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| AcmeError::Order { message: "order has no authorizations".into() })?
            .to_string();

        let (authorization, _) = self.acme_request(&authorization_url, None, false).await?;
        let challenges = authorization["challenges"]
            .as_array()
            .ok_or_else(|| AcmeError::Challenge { challenge_type: challenge_type.as_str().into(), domain: domain.into(), message: "authorization missing challenges".into() })?;

        let challenge = challenges
            .iter()
            .find(|c| c["type"].as_str() == Some(challenge_type.as_str()))
            .ok_or_else(|| AcmeError::Challenge {
                challenge_type: challenge_type.as_str().into(),
                domain: domain.into(),
                message: "requested challenge type not offered".into(),
            })?;

        let token = challenge["token"]
            .as_str()
            .ok_or_else(|| AcmeError::Challenge { challenge_type: challenge_type.as_str().into(), domain: domain.into(), message: "challenge missing token".into() })?
            .to_string();
        let challenge_url = challenge["url"]
            .as_str()
            .ok_or_else(|| AcmeError::Challenge { challenge_type: challenge_type.as_str().into(), domain: domain.into(), message: "challenge missing url".into() })?
            .to_string();

        let thumbprint = self.key_thumbprint()?;
        let key_authorization = format!("{token}.{thumbprint}");

        let info = match challenge_type {
            ChallengeType::Http01 => ChallengeInfo {
                challenge_type,
                token: token.clone(),
                key_authorization: key_authorization.clone(),
                domain: domain.to_string(),
                http01_path: Some(format!("/.well-known/acme-challenge/{token}")),
                dns01_record_name: None,
                dns01_record_value: None,
            },
            ChallengeType::Dns01 => {
                let digest = Sha256::digest(key_authorization.as_bytes());
                ChallengeInfo {
                    challenge_type,
                    token: token.clone(),
                    key_authorization: key_authorization.clone(),
                    domain: domain.to_string(),
                    http01_path: None,
                    dns01_record_name: Some(format!("_acme-challenge.{domain}")),
                    dns01_record_value: Some(URL_SAFE_NO_PAD.encode(digest)),
                }
            }
        };

        let finalize_url = order["finalize"]
            .as_str()
            .ok_or_else(|| AcmeError::Order { message: "order missing finalize url".into() })?
            .to_string();

        Ok((
            PendingOrder { order_url, finalize_url, authorization_url, challenge_url },
            info,
        ))
    }

    /// Tell the ACME server the challenge is ready, poll authorization
    /// and order status, then submit a CSR and download the chain.
    pub async fn finalize_order(&self, order: PendingOrder, domain: &str) -> Result<CertificateResult, AcmeError> {
        self.acme_request(&order.challenge_url, Some(&json!({})), false).await?;

        self.poll_until(
            &order.authorization_url,
            |body| body["status"].as_str() == Some("valid"),
            |body| body["status"].as_str() == Some("invalid"),
        )
        .await?;

        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| AcmeError::Finalize { message: format!("failed to generate certificate key: {e}") })?;
        let params = rcgen::CertificateParams::new(vec![domain.to_string()])
            .map_err(|e| AcmeError::Finalize { message: format!("invalid domain for CSR: {e}") })?;
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| AcmeError::Finalize { message: format!("failed to build CSR: {e}") })?;
        let csr_b64 = URL_SAFE_NO_PAD.encode(csr.der().as_ref());

        self.acme_request(&order.finalize_url, Some(&json!({ "csr": csr_b64 })), false).await?;

        let final_order = self
            .poll_until(
                &order.order_url,
                |body| body["status"].as_str() == Some("valid"),
                |body| body["status"].as_str() == Some("invalid"),
            )
            .await?;

        let cert_url = final_order["certificate"]
            .as_str()
            .ok_or_else(|| AcmeError::Finalize { message: "order missing certificate url".into() })?;

        let (body, _) = self.acme_request(cert_url, None, false).await?;
        let fullchain_pem = body
            .as_str()
            .ok_or_else(|| AcmeError::Finalize { message: "certificate download was not text".into() })?
            .to_string();

        let (cert_pem, chain_pem) = split_fullchain(&fullchain_pem);
        let key_pem = key_pair.serialize_pem();

        Ok(CertificateResult {
            cert_pem,
            key_pem,
            chain_pem,
            expires_at: Utc::now() + Duration::days(CERT_VALIDITY_DAYS),
        })
    }

    async fn poll_until(
        &self,
        url: &str,
        is_valid: impl Fn(&Value) -> bool,
        is_invalid: impl Fn(&Value) -> bool,
    ) -> Result<Value, AcmeError> {
        const MAX_ATTEMPTS: u32 = 30;
        for _ in 0..MAX_ATTEMPTS {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            let (body, _) = self.acme_request(url, None, false).await?;
            if is_valid(&body) {
                return Ok(body);
            }
            if is_invalid(&body) {
                return Err(AcmeError::Order { message: format!("ACME resource {url} became invalid") });
            }
        }
        Err(AcmeError::AuthorizationTimeout { attempts: MAX_ATTEMPTS })
    }

    async fn directory_new_order(&self) -> Result<String, AcmeError> {
        let guard = self.directory.lock().await;
        guard
            .as_ref()
            .map(|d| d.new_order.clone())
            .ok_or_else(|| AcmeError::Directory { message: "ACME directory not initialized".into() })
    }

    async fn fresh_nonce(&self) -> Result<String, AcmeError> {
        let new_nonce_url = {
            let guard = self.directory.lock().await;
            guard.as_ref().map(|d| d.new_nonce.clone())
        }
        .ok_or_else(|| AcmeError::Directory { message: "ACME directory not initialized".into() })?;

        let resp = self
            .http
            .head(&new_nonce_url)
            .send()
            .await
            .map_err(|e| AcmeError::Directory { message: e.to_string() })?;
        resp.headers()
            .get("replay-nonce")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AcmeError::Directory { message: "newNonce response missing Replay-Nonce".into() })
    }

    /// Sign and POST a JWS-wrapped request, per RFC 8555 §6.2. `payload
    /// = None` sends a POST-as-GET (used to fetch orders/authorizations).
    async fn acme_request(
        &self,
        url: &str,
        payload: Option<&Value>,
        use_jwk: bool,
    ) -> Result<(Value, reqwest::header::HeaderMap), AcmeError> {
        let nonce = {
            let mut guard = self.nonce.lock().await;
            match guard.take() {
                Some(n) => n,
                None => self.fresh_nonce().await?,
            }
        };

        let body = self.sign_jws(url, payload, &nonce, use_jwk)?;

        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/jose+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AcmeError::Order { message: e.to_string() })?;

        if let Some(next_nonce) = resp.headers().get("replay-nonce").and_then(|v| v.to_str().ok()) {
            *self.nonce.lock().await = Some(next_nonce.to_string());
        }

        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(AcmeError::Order { message: format!("ACME request to {url} failed with {status}: {text}") });
        }

        let value: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((value, headers))
    }

    fn sign_jws(&self, url: &str, payload: Option<&Value>, nonce: &str, use_jwk: bool) -> Result<Value, AcmeError> {
        let payload_b64 = match payload {
            None => String::new(),
            Some(value) => URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap_or_default()),
        };

        let mut protected = serde_json::Map::new();
        protected.insert("alg".into(), json!("RS256"));
        protected.insert("nonce".into(), json!(nonce));
        protected.insert("url".into(), json!(url));
        if use_jwk {
            protected.insert("jwk".into(), self.jwk()?);
        } else {
            let account_url = self.account_url.try_lock().ok().and_then(|g| g.clone());
            protected.insert("kid".into(), json!(account_url));
        }
        let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected).unwrap_or_default());

        let signing_input = format!("{protected_b64}.{payload_b64}");
        let digest = Sha256::digest(signing_input.as_bytes());
        let signature = self
            .account_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| AcmeError::Signing { message: e.to_string() })?;

        Ok(json!({
            "protected": protected_b64,
            "payload": payload_b64,
            "signature": URL_SAFE_NO_PAD.encode(signature),
        }))
    }

    fn jwk(&self) -> Result<Value, AcmeError> {
        let public_key = RsaPublicKey::from(&self.account_key);
        Ok(json!({
            "kty": "RSA",
            "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }))
    }

    /// RFC 7638 JWK thumbprint of the account key, used to build the
    /// key authorization for both challenge types.
    fn key_thumbprint(&self) -> Result<String, AcmeError> {
        let jwk = self.jwk()?;
        let canonical = json!({
            "e": jwk["e"],
            "kty": jwk["kty"],
            "n": jwk["n"],
        });
        let bytes = serde_json::to_vec(&canonical).map_err(|e| AcmeError::Signing { message: e.to_string() })?;
        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(bytes)))
    }
}

fn split_fullchain(fullchain_pem: &str) -> (String, Option<String>) {
    const END_MARKER: &str = "-----END CERTIFICATE-----";
    let Some(split_at) = fullchain_pem.find(END_MARKER) else {
        return (fullchain_pem.to_string(), None);
    };
    let cert_pem = format!("{}{END_MARKER}\n", &fullchain_pem[..split_at]);
    let rest = fullchain_pem[split_at + END_MARKER.len()..].trim();
    (cert_pem, (!rest.is_empty()).then(|| rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fullchain_separates_leaf_from_chain() {
        let fullchain = "-----BEGIN CERTIFICATE-----\nLEAF\n-----END CERTIFICATE-----\n-----BEGIN CERTIFICATE-----\nCHAIN\n-----END CERTIFICATE-----\n";
        let (cert, chain) = split_fullchain(fullchain);
        assert!(cert.contains("LEAF"));
        assert!(chain.unwrap().contains("CHAIN"));
    }

    #[test]
    fn test_split_fullchain_single_cert_has_no_chain() {
        let fullchain = "-----BEGIN CERTIFICATE-----\nLEAF\n-----END CERTIFICATE-----\n";
        let (cert, chain) = split_fullchain(fullchain);
        assert!(cert.contains("LEAF"));
        assert!(chain.is_none());
    }

    #[tokio::test]
    async fn test_account_key_pem_roundtrips() {
        let client = AcmeClient::new("ops@example.com", true, None).unwrap();
        let pem = client.account_key_pem().unwrap();
        let restored = AcmeClient::new("ops@example.com", true, Some(&pem)).unwrap();
        assert_eq!(
            client.account_key.to_pkcs8_pem(Default::default()).unwrap().to_string(),
            restored.account_key.to_pkcs8_pem(Default::default()).unwrap().to_string(),
        );
    }

    #[test]
    fn test_jwk_thumbprint_is_deterministic() {
        let client = AcmeClient::new("ops@example.com", true, None).unwrap();
        let t1 = client.key_thumbprint().unwrap();
        let t2 = client.key_thumbprint().unwrap();
        assert_eq!(t1, t2);
    }
}
