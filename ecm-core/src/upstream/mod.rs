//! Upstream API Client (Component A): authenticated HTTP client with
//! token refresh, pagination, and retries against the external IPTV/EPG
//! backend. The core never stores channel/stream records itself — this
//! client is the sole gateway to that data.

pub mod client;
pub mod models;

pub use client::UpstreamHttpClient;
pub use models::*;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::UpstreamError;

pub type Result<T> = std::result::Result<T, UpstreamError>;

/// A page of paginated results, mirroring the upstream's
/// `{results, count, next}` envelope.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub count: u64,
    pub next: Option<String>,
}

/// Abstracts every upstream operation the control plane consumes, so
/// tests substitute a mock instead of making real HTTP calls. Swapped
/// atomically process-wide when TLS/upstream settings change, per
/// `spec.md` §9's injectable-singleton design note.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<Channel>>;
    async fn get_channel(&self, id: i64) -> Result<Channel>;
    async fn create_channel(&self, input: ChannelInput) -> Result<Channel>;
    async fn update_channel(&self, id: i64, input: ChannelInput) -> Result<Channel>;
    async fn delete_channel(&self, id: i64) -> Result<()>;

    async fn list_channel_groups(&self) -> Result<Vec<ChannelGroup>>;
    async fn create_channel_group(&self, name: &str) -> Result<ChannelGroup>;
    async fn delete_channel_group(&self, id: i64) -> Result<()>;
    async fn rename_channel_group(&self, id: i64, name: &str) -> Result<ChannelGroup>;

    async fn list_streams(&self, m3u_account_id: Option<i64>) -> Result<Vec<Stream>>;
    async fn get_streams_by_ids(&self, ids: &[i64]) -> Result<Vec<Stream>>;
    async fn add_stream_to_channel(&self, channel_id: i64, stream_id: i64) -> Result<()>;
    async fn remove_stream_from_channel(&self, channel_id: i64, stream_id: i64) -> Result<()>;
    async fn reorder_channel_streams(&self, channel_id: i64, stream_ids: &[i64]) -> Result<()>;

    async fn bulk_assign_channel_numbers(&self, assignments: &[(i64, f64)]) -> Result<()>;

    async fn list_logos(&self) -> Result<Vec<Logo>>;

    async fn list_m3u_accounts(&self) -> Result<Vec<M3UAccount>>;
    async fn trigger_m3u_refresh(&self, m3u_account_id: i64) -> Result<()>;
    async fn trigger_epg_refresh(&self, epg_source_id: i64) -> Result<()>;

    async fn list_m3u_filters(&self, m3u_account_id: i64) -> Result<Vec<M3UFilter>>;
    async fn list_m3u_group_states(&self, m3u_account_id: i64) -> Result<Vec<UpstreamGroupState>>;
    async fn list_m3u_profiles(&self) -> Result<Vec<M3UProfile>>;
    async fn list_epg_data(&self) -> Result<Vec<EpgDataSource>>;
}

/// Build a lazily-paginating stream over a page-fetching closure, used
/// by `UpstreamHttpClient` to expose `paginate::<T>` without repeating
/// the "follow `next` until exhausted" loop at each call site.
pub fn paginate_pages<'a, T, F, Fut>(fetch_page: F) -> BoxStream<'a, Result<Page<T>>>
where
    T: Send + 'a,
    F: Fn(Option<String>) -> Fut + Send + Sync + 'a,
    Fut: std::future::Future<Output = Result<Page<T>>> + Send + 'a,
{
    Box::pin(futures::stream::unfold(Some(None::<String>), move |state| {
        let fetch_page = &fetch_page;
        async move {
            let cursor = state?;
            match fetch_page(cursor).await {
                Ok(page) => {
                    let next_state = page.next.clone().map(Some);
                    Some((Ok(page), next_state))
                }
                Err(e) => Some((Err(e), None)),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_paginate_pages_follows_next() {
        let call_count = AtomicUsize::new(0);
        let stream = paginate_pages::<i32, _, _>(move |cursor| {
            let n = call_count.fetch_add(1, Ordering::SeqCst);
            async move {
                match (n, cursor) {
                    (0, None) => Ok(Page {
                        results: vec![1, 2],
                        count: 4,
                        next: Some("page2".into()),
                    }),
                    (1, Some(_)) => Ok(Page {
                        results: vec![3, 4],
                        count: 4,
                        next: None,
                    }),
                    _ => panic!("unexpected call"),
                }
            }
        });
        let pages: Vec<_> = stream.collect().await;
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].as_ref().unwrap().results, vec![1, 2]);
        assert_eq!(pages[1].as_ref().unwrap().results, vec![3, 4]);
    }
}
