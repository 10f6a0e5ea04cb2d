//! # ecm-core
//!
//! Core library for the Enhanced Channel Manager operational control
//! plane: normalization, auto-creation, stream probing, TLS lifecycle,
//! task scheduling, and M3U/XMLTV synthesis layered in front of an
//! upstream IPTV/EPG API.

pub mod autocreate;
pub mod bulk;
pub mod cache;
pub mod config;
pub mod csv;
pub mod error;
pub mod m3u;
pub mod normalize;
pub mod notify;
pub mod probe;
pub mod regex_util;
pub mod store;
pub mod tags;
pub mod task_engine;
pub mod tls;
pub mod upstream;
pub mod xmltv;

pub use config::EcmConfig;
pub use error::{EcmError, Result};
pub use store::{Store, models};
pub use upstream::{UpstreamClient, UpstreamHttpClient};
