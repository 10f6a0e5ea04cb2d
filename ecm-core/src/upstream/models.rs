//! Wire-shape types for upstream entities. These mirror the upstream's
//! own data model (the core does not own or extend it); only the fields
//! the control plane actually reads or writes are modeled.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub channel_number: Option<f64>,
    pub group_id: Option<i64>,
    pub tvg_id: Option<String>,
    pub gracenote_id: Option<String>,
    pub logo_url: Option<String>,
    pub stream_ids: Vec<i64>,
    pub is_auto_created: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelInput {
    pub name: Option<String>,
    pub channel_number: Option<f64>,
    pub group_id: Option<i64>,
    pub tvg_id: Option<String>,
    pub gracenote_id: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub group_name: Option<String>,
    pub m3u_account_id: i64,
    pub m3u_account_priority: Option<i64>,
}

/// A named group's enable state within one M3U account's playlist, as
/// distinct from `ChannelGroup` (the channel-organization grouping).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamGroupState {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logo {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3UAccount {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3UFilter {
    pub id: i64,
    pub m3u_account_id: i64,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3UProfile {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub tvg_id_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgDataSource {
    pub id: i64,
    pub name: String,
}

/// Raw pagination envelope as returned by the upstream API.
#[derive(Debug, Deserialize)]
pub(crate) struct RawPage<T> {
    pub results: Vec<T>,
    pub count: u64,
    pub next: Option<String>,
}

/// Token pair returned by the upstream's authentication endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenPair {
    pub access: String,
    pub refresh: String,
}
