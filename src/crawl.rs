//! Crawl cycle orchestration.
//!
//! One cycle lists the tracked origins and handles them strictly one at a
//! time: health check first, then traversal if the origin answered. There
//! is no fan-out; the next origin starts only after the previous one's last
//! analyzer call returned.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{error, info, info_span, Instrument};

use crate::analysis::{Analyzer, ProcessAnalyzer};
use crate::channel::{build_channel_client, ChannelClient};
use crate::config::{ChannelCredentials, Config, CrawlConfig};
use crate::db;
use crate::error::StoreError;
use crate::health::{Freshness, HealthOutcome, HealthTracker};
use crate::models::{Domain, TrackedOrigin};
use crate::store::OriginStore;
use crate::traversal::{CursorTraversal, CursorUpdate, TraversalReport};

/// Result of handling one origin.
#[derive(Debug, Clone)]
pub struct OriginReport {
    pub origin_id: i64,
    pub domain: String,
    pub health: HealthOutcome,
    /// `None` when the origin was not traversed.
    pub traversal: Option<TraversalReport>,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub origins: Vec<OriginReport>,
}

impl CrawlSummary {
    pub fn unreachable(&self) -> usize {
        self.count_health(|h| matches!(h, HealthOutcome::Unreachable))
    }

    pub fn refreshed(&self) -> usize {
        self.count_health(|h| {
            matches!(
                h,
                HealthOutcome::Reachable(Freshness::Refreshed { .. })
            )
        })
    }

    pub fn traversed(&self) -> impl Iterator<Item = &TraversalReport> {
        self.origins.iter().filter_map(|o| o.traversal.as_ref())
    }

    pub fn ingested(&self) -> usize {
        self.traversed().map(|t| t.ingested.len()).sum()
    }

    fn count_health(&self, pred: impl Fn(&HealthOutcome) -> bool) -> usize {
        self.origins.iter().filter(|o| pred(&o.health)).count()
    }
}

pub struct Crawler<'a> {
    store: &'a OriginStore,
    channel: &'a dyn ChannelClient,
    analyzer: &'a dyn Analyzer,
    settings: &'a CrawlConfig,
    extensions: BTreeSet<String>,
}

impl<'a> Crawler<'a> {
    pub fn new(
        store: &'a OriginStore,
        channel: &'a dyn ChannelClient,
        analyzer: &'a dyn Analyzer,
        settings: &'a CrawlConfig,
    ) -> Self {
        Self {
            store,
            channel,
            analyzer,
            settings,
            extensions: settings.supported_extensions(),
        }
    }

    /// Runs one cycle over every tracked origin, or only those matching `only`.
    pub async fn run_cycle(&self, only: Option<&Domain>) -> Result<CrawlSummary, StoreError> {
        let tracked = self.store.list_tracked_origins().await?;
        info!(count = tracked.len(), "Sourced origins from the database");

        let mut summary = CrawlSummary::default();
        for origin in tracked
            .iter()
            .filter(|t| only.map_or(true, |domain| t.origin.domain() == *domain))
        {
            let span = info_span!(
                "origin",
                origin_id = origin.origin.id,
                domain = %origin.origin.domain
            );
            let report = self.crawl_origin(origin).instrument(span).await;
            summary.origins.push(report);
        }

        Ok(summary)
    }

    pub async fn crawl_origin(&self, tracked: &TrackedOrigin) -> OriginReport {
        let origin = &tracked.origin;
        let tracker = HealthTracker::new(
            self.store,
            self.channel,
            self.settings.check_history_offset(),
        );
        let health = tracker.check(tracked, Utc::now()).await;

        let traversal = if health.allows_traversal() {
            let download_root = self.settings.download_root();
            let traversal = CursorTraversal::new(
                self.store,
                self.channel,
                self.analyzer,
                &self.extensions,
                &download_root,
            );
            let report = traversal.run(origin).await;
            info!(
                enumerated = report.enumerated,
                ingested = report.ingested.len(),
                "Search terminated for origin"
            );
            Some(report)
        } else {
            None
        };

        OriginReport {
            origin_id: origin.id,
            domain: origin.domain.clone(),
            health,
            traversal,
        }
    }
}

/// `ocrawl crawl`: connect, verify collaborators, run one cycle, print a summary.
pub async fn run_crawl(config: &Config, only: Option<String>) -> Result<()> {
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
    info!("Database connected");

    let download_root = config.crawl.download_root();
    std::fs::create_dir_all(&download_root).with_context(|| {
        format!(
            "Failed to create download directory: {}",
            download_root.display()
        )
    })?;

    let analyzer = ProcessAnalyzer::from_config(&config.analyzer);
    let crawler = Crawler::new(&store, channel.as_ref(), &analyzer, &config.crawl);
    info!(filetypes = ?config.crawl.supported_extensions(), "Looking for supported files");

    let only = only.map(|raw| Domain::parse(&raw));
    let summary = match crawler.run_cycle(only.as_ref()).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Error while retrieving the origins from the database");
            store.pool().close().await;
            bail!("could not list origins: {}", e);
        }
    };

    if let Some(domain) = &only {
        if summary.origins.is_empty() {
            store.pool().close().await;
            bail!("origin not tracked: {}", domain);
        }
    }

    print_summary(&summary);
    store.pool().close().await;
    Ok(())
}

fn print_summary(summary: &CrawlSummary) {
    let sum = |f: fn(&TraversalReport) -> usize| summary.traversed().map(f).sum::<usize>();
    let cursors_advanced = summary
        .traversed()
        .filter(|t| matches!(t.cursor, CursorUpdate::Advanced(_)))
        .count();

    println!("crawl");
    println!("  origins: {}", summary.origins.len());
    println!("  unreachable: {}", summary.unreachable());
    println!("  snapshots refreshed: {}", summary.refreshed());
    println!("  items enumerated: {}", sum(|t| t.enumerated));
    println!("  supported items: {}", sum(|t| t.supported));
    println!("  sources ingested: {}", summary.ingested());
    println!("  already present: {}", sum(|t| t.already_present));
    println!("  integrity anomalies: {}", sum(|t| t.anomalies));
    println!(
        "  persistence failures: {}",
        sum(|t| t.persistence_failures + t.lookup_failures)
    );
    println!("  download failures: {}", sum(|t| t.download_failures));
    println!("  analysis failures: {}", sum(|t| t.analysis_failures));
    println!("  cursors advanced: {}", cursors_advanced);
    println!("ok");
}
