//! Core data models used throughout the crawler.
//!
//! Persisted records (origins, history snapshots, sources) and the items the
//! channel collaborator hands back during enumeration.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin category as stored in `origin.category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginCategory {
    Web = 0,
    Channel = 1,
    Dark = 2,
}

impl OriginCategory {
    /// The category this crawler tracks.
    pub const TRACKED: OriginCategory = OriginCategory::Channel;

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Web),
            1 => Some(Self::Channel),
            2 => Some(Self::Dark),
            _ => None,
        }
    }
}

/// How an origin is addressed on the channel protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Domain {
    /// Public username, e.g. `some_channel`.
    Username(String),
    /// Numeric channel id: `-` followed by 13 digits.
    ChannelId(i64),
}

impl Domain {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let is_channel_id = raw.len() == 14
            && raw.starts_with('-')
            && raw[1..].chars().all(|c| c.is_ascii_digit());

        match raw.parse::<i64>() {
            Ok(id) if is_channel_id => Domain::ChannelId(id),
            _ => Domain::Username(raw.to_string()),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Username(name) => f.write_str(name),
            Domain::ChannelId(id) => write!(f, "{}", id),
        }
    }
}

/// A tracked content source.
#[derive(Debug, Clone)]
pub struct Origin {
    pub id: i64,
    pub domain: String,
    pub name: Option<String>,
    pub is_dead_score: i64,
    pub category: OriginCategory,
    /// Highest native item id processed so far.
    pub last_checked: Option<i64>,
    pub created_time: DateTime<Utc>,
}

impl Origin {
    pub fn domain(&self) -> Domain {
        Domain::parse(&self.domain)
    }

    pub fn cursor(&self) -> i64 {
        self.last_checked.unwrap_or(0)
    }
}

/// One metadata snapshot row.
#[derive(Debug, Clone)]
pub struct OriginHistory {
    pub id: i64,
    pub origin_id: i64,
    pub additional_infos: String,
    pub updated_time: DateTime<Utc>,
}

/// An origin joined with its most recent history snapshot.
#[derive(Debug, Clone)]
pub struct TrackedOrigin {
    pub origin: Origin,
    pub latest_history: Option<OriginHistory>,
}

#[derive(Debug, Clone)]
pub struct NewOrigin {
    pub domain: Domain,
    pub name: Option<String>,
    pub category: OriginCategory,
}

/// Platform-agnostic half of a discovered item.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub origin_id: i64,
    pub author_id: Option<i64>,
    pub spam_score: i64,
    pub published_time: DateTime<Utc>,
}

/// Platform-specific half, keyed by the native item id.
#[derive(Debug, Clone)]
pub struct NewSourceDetail {
    pub native_id: i64,
    pub message_text: Option<String>,
    pub views_count: Option<i64>,
    pub shares_count: Option<i64>,
}

/// Raw probe result, kept as-is until normalised into a [`ChannelSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMetadata(pub serde_json::Value);

/// Normalised metadata stored in `origin_history.additional_infos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: i64,
    pub about: Option<String>,
    pub read_inbox_max_id: Option<i64>,
    pub pts: Option<i64>,
    pub hidden_prehistory: bool,
    pub participants_count: Option<i64>,
    pub admins_count: Option<i64>,
    pub date: Option<DateTime<Utc>>,
    pub access_hash: Option<i64>,
}

/// Media attached to a channel item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Media {
    Document {
        #[serde(default)]
        file_name: Option<String>,
    },
    Photo,
    #[serde(other)]
    Other,
}

/// One enumerated message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelItem {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub views: Option<i64>,
    #[serde(default)]
    pub forwards: Option<i64>,
    #[serde(default)]
    pub media: Option<Media>,
}

impl ChannelItem {
    /// File name of the attached document, if the item carries one.
    pub fn document_name(&self) -> Option<&str> {
        match &self.media {
            Some(Media::Document { file_name }) => file_name.as_deref(),
            _ => None,
        }
    }
}

pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
