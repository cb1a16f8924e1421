//! Liveness probing and snapshot freshness.
//!
//! Once per origin per cycle the tracker probes the channel. An unreachable
//! origin gets its dead score raised by one and is skipped. A reachable one
//! whose latest snapshot is at least `check_history_offset` old gets its
//! dead score reset and a fresh snapshot appended. A reachable origin is
//! always traversed, whatever happened to the refresh.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::channel::ChannelClient;
use crate::error::ChannelError;
use crate::models::{ChannelMetadata, ChannelSnapshot, OriginHistory, TrackedOrigin};
use crate::store::{verify_written, OriginStore};

/// What the freshness check did for a reachable origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Refreshed { history_id: i64 },
    /// Stale, but the snapshot could not be parsed or stored.
    RefreshFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Reachable(Freshness),
    Unreachable,
    /// The channel client is disabled; nothing was changed.
    Unavailable,
}

impl HealthOutcome {
    pub fn allows_traversal(&self) -> bool {
        matches!(self, HealthOutcome::Reachable(_))
    }
}

pub struct HealthTracker<'a> {
    store: &'a OriginStore,
    channel: &'a dyn ChannelClient,
    offset: chrono::Duration,
}

impl<'a> HealthTracker<'a> {
    pub fn new(
        store: &'a OriginStore,
        channel: &'a dyn ChannelClient,
        offset: chrono::Duration,
    ) -> Self {
        Self {
            store,
            channel,
            offset,
        }
    }

    pub async fn check(&self, tracked: &TrackedOrigin, now: DateTime<Utc>) -> HealthOutcome {
        let origin = &tracked.origin;
        let domain = origin.domain();

        let metadata = match self.channel.probe(&domain).await {
            Ok(metadata) => metadata,
            Err(ChannelError::Unavailable) => {
                warn!("Channel client unavailable, origin left untouched");
                return HealthOutcome::Unavailable;
            }
            Err(e) => {
                error!(error = %e, "Origin does not respond to the channel API");
                let raised = origin.is_dead_score + 1;
                match self
                    .store
                    .update_dead_score(origin.id, raised)
                    .await
                    .and_then(|written| verify_written(raised, written))
                {
                    Ok(score) => info!(dead_score = score, "Dead score incremented"),
                    Err(e) => error!(error = %e, "Error while incrementing dead score"),
                }
                return HealthOutcome::Unreachable;
            }
        };

        if !is_stale(tracked.latest_history.as_ref(), now, self.offset) {
            return HealthOutcome::Reachable(Freshness::Fresh);
        }

        info!("Origin snapshot is stale, refreshing its data");

        match self
            .store
            .update_dead_score(origin.id, 0)
            .await
            .and_then(|written| verify_written(0, written))
        {
            Ok(_) => info!("Dead score reset"),
            Err(e) => error!(error = %e, "Error while resetting dead score"),
        }

        let snapshot = match parse_snapshot(&metadata) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Could not parse channel metadata, snapshot not refreshed");
                return HealthOutcome::Reachable(Freshness::RefreshFailed);
            }
        };

        match self.store.append_history_at(origin.id, &snapshot, now).await {
            Ok(history_id) => {
                info!(history_id, "New origin history added");
                HealthOutcome::Reachable(Freshness::Refreshed { history_id })
            }
            Err(e) => {
                error!(error = %e, "Error while inserting origin history");
                HealthOutcome::Reachable(Freshness::RefreshFailed)
            }
        }
    }
}

/// A missing snapshot is always stale; otherwise stale once `now - updated >= offset`.
pub fn is_stale(
    latest: Option<&OriginHistory>,
    now: DateTime<Utc>,
    offset: chrono::Duration,
) -> bool {
    match latest {
        Some(history) => now - history.updated_time >= offset,
        None => true,
    }
}

#[derive(Deserialize)]
struct RawFullChannel {
    full_chat: RawFullChat,
    chats: Vec<RawChat>,
}

#[derive(Deserialize)]
struct RawFullChat {
    id: i64,
    about: Option<String>,
    read_inbox_max_id: Option<i64>,
    pts: Option<i64>,
    #[serde(default)]
    hidden_prehistory: bool,
    participants_count: Option<i64>,
    admins_count: Option<i64>,
}

#[derive(Deserialize)]
struct RawChat {
    date: Option<DateTime<Utc>>,
    access_hash: Option<i64>,
}

/// Normalises a probe result into the fields kept in `origin_history`.
pub fn parse_snapshot(metadata: &ChannelMetadata) -> Result<ChannelSnapshot, ChannelError> {
    let raw: RawFullChannel = serde_json::from_value(metadata.0.clone())
        .map_err(|e| ChannelError::Decode(e.to_string()))?;

    let chat = raw
        .chats
        .first()
        .ok_or_else(|| ChannelError::Decode("probe result has no chats".to_string()))?;

    Ok(ChannelSnapshot {
        channel_id: raw.full_chat.id,
        about: raw.full_chat.about,
        read_inbox_max_id: raw.full_chat.read_inbox_max_id,
        pts: raw.full_chat.pts,
        hidden_prehistory: raw.full_chat.hidden_prehistory,
        participants_count: raw.full_chat.participants_count,
        admins_count: raw.full_chat.admins_count,
        date: chat.date,
        access_hash: chat.access_hash,
    })
}
