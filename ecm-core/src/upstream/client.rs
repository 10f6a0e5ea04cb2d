//! `reqwest`-backed implementation of [`UpstreamClient`]. Holds a single
//! access/refresh token pair behind a mutex so concurrent callers don't
//! each trigger their own refresh; a request that comes back `401` is
//! retried exactly once after a refresh.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use crate::config::UpstreamSettings;
use crate::error::UpstreamError;

use super::models::{RawPage, TokenPair};
use super::{
    paginate_pages, Channel, ChannelGroup, ChannelInput, EpgDataSource, Logo, M3UAccount,
    M3UFilter, M3UProfile, Page, Result, Stream, UpstreamClient,
};

struct Tokens {
    access: String,
    refresh: String,
}

/// Authenticated HTTP client against the upstream IPTV/EPG API.
pub struct UpstreamHttpClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    tokens: Mutex<Option<Tokens>>,
}

impl UpstreamHttpClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Transport {
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            tokens: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn current_access_token(&self) -> Option<String> {
        self.tokens
            .lock()
            .expect("token mutex poisoned")
            .as_ref()
            .map(|t| t.access.clone())
    }

    async fn login(&self) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/api/accounts/token/"))
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(UpstreamError::Authentication {
                message: format!("login failed with status {}", resp.status()),
            });
        }
        let pair: TokenPair = resp
            .json()
            .await
            .map_err(|e| UpstreamError::ResponseParse {
                message: e.to_string(),
            })?;
        let access = pair.access.clone();
        *self.tokens.lock().expect("token mutex poisoned") = Some(Tokens {
            access: pair.access,
            refresh: pair.refresh,
        });
        Ok(access)
    }

    async fn refresh(&self) -> Result<String> {
        let refresh_token = self
            .tokens
            .lock()
            .expect("token mutex poisoned")
            .as_ref()
            .map(|t| t.refresh.clone());
        let Some(refresh_token) = refresh_token else {
            return self.login().await;
        };
        let resp = self
            .http
            .post(self.url("/api/accounts/token/refresh/"))
            .json(&json!({ "refresh": refresh_token }))
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return self.login().await;
        }
        let pair: TokenPair = resp
            .json()
            .await
            .map_err(|e| UpstreamError::ResponseParse {
                message: e.to_string(),
            })?;
        let access = pair.access.clone();
        if let Some(t) = self.tokens.lock().expect("token mutex poisoned").as_mut() {
            t.access = pair.access;
        }
        Ok(access)
    }

    /// Issue a request, attaching the current bearer token and retrying
    /// once after a forced refresh if the upstream answers `401`.
    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = match self.current_access_token() {
            Some(t) => t,
            None => self.login().await?,
        };
        let resp = self.do_send(method.clone(), path, body.clone(), &token).await?;
        if resp.status().as_u16() != 401 {
            return Ok(resp);
        }
        let token = self.refresh().await?;
        self.do_send(method, path, body, &token).await
    }

    async fn do_send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
        token: &str,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .request(method, self.url(path))
            .bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        req.send().await.map_err(|e| UpstreamError::Transport {
            message: e.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(reqwest::Method::GET, path, None).await?;
        Self::parse(resp).await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let resp = self.send(method, path, Some(body)).await?;
        Self::parse(resp).await
    }

    async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::RequestFailed {
                status: status.as_u16(),
                message: body,
            });
        }
        resp.json()
            .await
            .map_err(|e| UpstreamError::ResponseParse {
                message: e.to_string(),
            })
    }

    async fn fetch_page<T: serde::de::DeserializeOwned>(
        &self,
        base_path: &str,
        cursor: Option<String>,
    ) -> Result<Page<T>> {
        let path = match cursor {
            Some(next) => next,
            None => base_path.to_string(),
        };
        let raw: RawPage<T> = self.get_json(&path).await?;
        Ok(Page {
            results: raw.results,
            count: raw.count,
            next: raw.next,
        })
    }

    async fn collect_all<T: serde::de::DeserializeOwned + Send + 'static>(
        &self,
        base_path: &str,
    ) -> Result<Vec<T>> {
        let base = base_path.to_string();
        let stream = paginate_pages::<T, _, _>(move |cursor| {
            let base = base.clone();
            async move { self.fetch_page(&base, cursor).await }
        });
        let mut out = Vec::new();
        futures::pin_mut!(stream);
        while let Some(page) = stream.next().await {
            out.extend(page?.results);
        }
        Ok(out)
    }
}

#[async_trait]
impl UpstreamClient for UpstreamHttpClient {
    async fn list_channels(&self) -> Result<Vec<Channel>> {
        self.collect_all("/api/channels/channels/").await
    }

    async fn get_channel(&self, id: i64) -> Result<Channel> {
        self.get_json(&format!("/api/channels/channels/{id}/")).await
    }

    async fn create_channel(&self, input: ChannelInput) -> Result<Channel> {
        self.send_json(
            reqwest::Method::POST,
            "/api/channels/channels/",
            serde_json::to_value(input).map_err(|e| UpstreamError::ResponseParse {
                message: e.to_string(),
            })?,
        )
        .await
    }

    async fn update_channel(&self, id: i64, input: ChannelInput) -> Result<Channel> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/api/channels/channels/{id}/"),
            serde_json::to_value(input).map_err(|e| UpstreamError::ResponseParse {
                message: e.to_string(),
            })?,
        )
        .await
    }

    async fn delete_channel(&self, id: i64) -> Result<()> {
        let resp = self
            .send(
                reqwest::Method::DELETE,
                &format!("/api/channels/channels/{id}/"),
                None,
            )
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(UpstreamError::RequestFailed {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            })
        }
    }

    async fn list_channel_groups(&self) -> Result<Vec<ChannelGroup>> {
        self.collect_all("/api/channels/groups/").await
    }

    async fn create_channel_group(&self, name: &str) -> Result<ChannelGroup> {
        self.send_json(
            reqwest::Method::POST,
            "/api/channels/groups/",
            json!({ "name": name }),
        )
        .await
    }

    async fn delete_channel_group(&self, id: i64) -> Result<()> {
        let resp = self
            .send(
                reqwest::Method::DELETE,
                &format!("/api/channels/groups/{id}/"),
                None,
            )
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(UpstreamError::RequestFailed {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            })
        }
    }

    async fn rename_channel_group(&self, id: i64, name: &str) -> Result<ChannelGroup> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/api/channels/groups/{id}/"),
            json!({ "name": name }),
        )
        .await
    }

    async fn list_streams(&self, m3u_account_id: Option<i64>) -> Result<Vec<Stream>> {
        match m3u_account_id {
            Some(id) => {
                self.collect_all(&format!("/api/channels/streams/?m3u_account={id}"))
                    .await
            }
            None => self.collect_all("/api/channels/streams/").await,
        }
    }

    async fn get_streams_by_ids(&self, ids: &[i64]) -> Result<Vec<Stream>> {
        let ids_csv = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.collect_all(&format!("/api/channels/streams/?ids={ids_csv}"))
            .await
    }

    async fn add_stream_to_channel(&self, channel_id: i64, stream_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/api/channels/channels/{channel_id}/streams/"),
                json!({ "stream_id": stream_id }),
            )
            .await?;
        Ok(())
    }

    async fn remove_stream_from_channel(&self, channel_id: i64, stream_id: i64) -> Result<()> {
        let resp = self
            .send(
                reqwest::Method::DELETE,
                &format!("/api/channels/channels/{channel_id}/streams/{stream_id}/"),
                None,
            )
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(UpstreamError::RequestFailed {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            })
        }
    }

    async fn reorder_channel_streams(&self, channel_id: i64, stream_ids: &[i64]) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::PATCH,
                &format!("/api/channels/channels/{channel_id}/streams/order/"),
                json!({ "stream_ids": stream_ids }),
            )
            .await?;
        Ok(())
    }

    async fn bulk_assign_channel_numbers(&self, assignments: &[(i64, f64)]) -> Result<()> {
        let payload: Vec<_> = assignments
            .iter()
            .map(|(id, number)| json!({ "id": id, "channel_number": number }))
            .collect();
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::PATCH,
                "/api/channels/channels/bulk-numbers/",
                json!({ "assignments": payload }),
            )
            .await?;
        Ok(())
    }

    async fn list_logos(&self) -> Result<Vec<Logo>> {
        self.collect_all("/api/channels/logos/").await
    }

    async fn list_m3u_accounts(&self) -> Result<Vec<M3UAccount>> {
        self.collect_all("/api/m3u/accounts/").await
    }

    async fn trigger_m3u_refresh(&self, m3u_account_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/api/m3u/accounts/{m3u_account_id}/refresh/"),
                json!({}),
            )
            .await?;
        Ok(())
    }

    async fn trigger_epg_refresh(&self, epg_source_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/api/epg/sources/{epg_source_id}/refresh/"),
                json!({}),
            )
            .await?;
        Ok(())
    }

    async fn list_m3u_filters(&self, m3u_account_id: i64) -> Result<Vec<M3UFilter>> {
        self.collect_all(&format!("/api/m3u/accounts/{m3u_account_id}/filters/"))
            .await
    }

    async fn list_m3u_group_states(&self, m3u_account_id: i64) -> Result<Vec<UpstreamGroupState>> {
        self.collect_all(&format!("/api/m3u/accounts/{m3u_account_id}/groups/"))
            .await
    }

    async fn list_m3u_profiles(&self) -> Result<Vec<M3UProfile>> {
        self.collect_all("/api/m3u/profiles/").await
    }

    async fn list_epg_data(&self) -> Result<Vec<EpgDataSource>> {
        self.collect_all("/api/epg/sources/").await
    }
}
