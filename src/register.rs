//! One-shot registration of a new origin.
//!
//! Checks the origin is not tracked yet, probes it once, and stores it with
//! an initial history snapshot. Reuses the store and snapshot parsing of the
//! crawl loop but runs exactly once.

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use crate::channel::{build_channel_client, ChannelClient};
use crate::config::{ChannelCredentials, Config};
use crate::db;
use crate::error::StoreError;
use crate::health::parse_snapshot;
use crate::models::{Domain, NewOrigin, OriginCategory};
use crate::store::OriginStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered {
        origin_id: i64,
        /// `None` if the initial snapshot could not be parsed or stored.
        history_id: Option<i64>,
    },
    AlreadyPresent { origin_ids: Vec<i64> },
    Unreachable { reason: String },
}

pub async fn register_origin(
    store: &OriginStore,
    channel: &dyn ChannelClient,
    identifier: &str,
) -> Result<RegistrationOutcome, StoreError> {
    let domain = Domain::parse(identifier);
    info!(%domain, "Adding the requested new domain");

    let existing = store.find_origin_by_domain(&domain).await?;
    if !existing.is_empty() {
        return Ok(RegistrationOutcome::AlreadyPresent {
            origin_ids: existing.iter().map(|o| o.id).collect(),
        });
    }

    let metadata = match channel.probe(&domain).await {
        Ok(metadata) => metadata,
        Err(e) => {
            return Ok(RegistrationOutcome::Unreachable {
                reason: e.to_string(),
            })
        }
    };

    let origin_id = store
        .insert_origin(&NewOrigin {
            domain: domain.clone(),
            name: None,
            category: OriginCategory::TRACKED,
        })
        .await?;
    info!(origin_id, %domain, "Origin added to the database");

    let history_id = match parse_snapshot(&metadata) {
        Ok(snapshot) => match store.append_history(origin_id, &snapshot).await {
            Ok(history_id) => Some(history_id),
            Err(e) => {
                error!(origin_id, error = %e, "Error while inserting the initial origin history");
                None
            }
        },
        Err(e) => {
            error!(origin_id, error = %e, "Could not parse channel metadata for the initial snapshot");
            None
        }
    };

    Ok(RegistrationOutcome::Registered {
        origin_id,
        history_id,
    })
}

/// `ocrawl add-origin <identifier>`.
pub async fn run_add_origin(config: &Config, identifier: &str) -> Result<()> {
    let channel = build_channel_client(&config.channel, ChannelCredentials::from_env())?;
    let me = channel
        .session()
        .await
        .context("Connection to the channel client failed")?;
    info!(user = %me, "Client online");

    let pool = db::connect(config)
        .await
        .context("Connection to the database failed")?;
    let store = OriginStore::new(pool);

    let outcome = register_origin(&store, channel.as_ref(), identifier).await;
    store.pool().close().await;

    match outcome? {
        RegistrationOutcome::Registered {
            origin_id,
            history_id,
        } => {
            println!("origin {} added with id {}", identifier, origin_id);
            match history_id {
                Some(id) => println!("  initial history id: {}", id),
                None => println!("  initial history: not stored (refreshed on next crawl)"),
            }
            println!("ok");
            Ok(())
        }
        RegistrationOutcome::AlreadyPresent { origin_ids } => {
            bail!(
                "origin {} already present (ids: {:?})",
                identifier,
                origin_ids
            )
        }
        RegistrationOutcome::Unreachable { reason } => {
            bail!(
                "origin {} does not respond to the channel API: {}",
                identifier,
                reason
            )
        }
    }
}
