//! Incremental enumeration of one origin's items.
//!
//! Items are read oldest first, strictly after the stored cursor. Items
//! carrying a document with a supported extension are deduplicated, ingested,
//! downloaded and handed to the analyzer, one at a time. The highest item id
//! seen becomes the new cursor, except that an item whose outcome could not
//! be settled (dedup lookup or persistence failed) holds the cursor just
//! before it so the next cycle sees it again.

use futures::StreamExt;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::analysis::Analyzer;
use crate::channel::ChannelClient;
use crate::ingest::ingest_source;
use crate::models::{ChannelItem, Domain, NewSource, NewSourceDetail, Origin};
use crate::store::{verify_written, OriginStore};

/// What happened to the stored cursor at the end of a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorUpdate {
    #[default]
    Unchanged,
    Advanced(i64),
    /// The new value could not be written or verified.
    Failed { candidate: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalReport {
    pub enumerated: usize,
    pub supported: usize,
    /// Source ids created during this traversal, in item order.
    pub ingested: Vec<i64>,
    pub already_present: usize,
    pub anomalies: usize,
    pub lookup_failures: usize,
    pub persistence_failures: usize,
    pub download_failures: usize,
    pub analysis_failures: usize,
    pub enumeration_failed: bool,
    pub previous_cursor: i64,
    pub cursor: CursorUpdate,
}

enum ItemOutcome {
    Ingested { source_id: i64 },
    AlreadyPresent,
    Anomaly,
    LookupFailed,
    PersistenceFailed,
}

/// Running cursor candidate for one traversal.
#[derive(Debug, Clone, Copy)]
struct CursorTracker {
    stored: i64,
    max_seen: i64,
    held_at: Option<i64>,
}

impl CursorTracker {
    fn new(stored: i64) -> Self {
        Self {
            stored,
            max_seen: stored,
            held_at: None,
        }
    }

    fn observe(&mut self, id: i64) {
        self.max_seen = self.max_seen.max(id);
    }

    fn hold(&mut self, id: i64) {
        self.held_at = Some(self.held_at.map_or(id, |held| held.min(id)));
    }

    fn candidate(&self) -> i64 {
        match self.held_at {
            Some(held) => self.max_seen.min(held - 1).max(self.stored),
            None => self.max_seen,
        }
    }
}

pub struct CursorTraversal<'a> {
    store: &'a OriginStore,
    channel: &'a dyn ChannelClient,
    analyzer: &'a dyn Analyzer,
    extensions: &'a BTreeSet<String>,
    download_root: &'a Path,
}

impl<'a> CursorTraversal<'a> {
    pub fn new(
        store: &'a OriginStore,
        channel: &'a dyn ChannelClient,
        analyzer: &'a dyn Analyzer,
        extensions: &'a BTreeSet<String>,
        download_root: &'a Path,
    ) -> Self {
        Self {
            store,
            channel,
            analyzer,
            extensions,
            download_root,
        }
    }

    pub async fn run(&self, origin: &Origin) -> TraversalReport {
        let domain = origin.domain();
        let stored = origin.cursor();
        let mut tracker = CursorTracker::new(stored);
        let mut report = TraversalReport {
            previous_cursor: stored,
            ..TraversalReport::default()
        };

        let mut items = self.channel.enumerate(&domain, stored);
        while let Some(next) = items.next().await {
            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    error!(error = %e, "Enumeration stopped early");
                    report.enumeration_failed = true;
                    break;
                }
            };

            report.enumerated += 1;
            tracker.observe(item.id);

            if !is_supported(&item, self.extensions) {
                continue;
            }
            report.supported += 1;

            match self.process_item(origin, &domain, &item, &mut report).await {
                ItemOutcome::Ingested { source_id } => report.ingested.push(source_id),
                ItemOutcome::AlreadyPresent => report.already_present += 1,
                ItemOutcome::Anomaly => report.anomalies += 1,
                ItemOutcome::LookupFailed => {
                    report.lookup_failures += 1;
                    tracker.hold(item.id);
                }
                ItemOutcome::PersistenceFailed => {
                    report.persistence_failures += 1;
                    tracker.hold(item.id);
                }
            }
        }
        drop(items);

        let candidate = tracker.candidate();
        report.cursor = if candidate == stored {
            info!(cursor = stored, "No new messages, cursor left untouched");
            CursorUpdate::Unchanged
        } else {
            match self
                .store
                .update_cursor(origin.id, candidate)
                .await
                .and_then(|written| verify_written(candidate, written))
            {
                Ok(cursor) => {
                    info!(cursor, "Last checked updated");
                    CursorUpdate::Advanced(cursor)
                }
                Err(e) => {
                    error!(error = %e, candidate, "Error while updating last checked");
                    CursorUpdate::Failed { candidate }
                }
            }
        };

        report
    }

    async fn process_item(
        &self,
        origin: &Origin,
        domain: &Domain,
        item: &ChannelItem,
        report: &mut TraversalReport,
    ) -> ItemOutcome {
        let existing = match self.store.find_existing_item(domain, item.id).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(item_id = item.id, error = %e, "Error while checking source existence");
                return ItemOutcome::LookupFailed;
            }
        };

        match existing.len() {
            0 => {}
            1 => {
                warn!(item_id = item.id, "Source already scraped for this origin");
                return ItemOutcome::AlreadyPresent;
            }
            matches => {
                error!(
                    item_id = item.id,
                    matches, "Multiple sources assigned to the same item, integrity anomaly"
                );
                return ItemOutcome::Anomaly;
            }
        }

        let (source, detail) = build_records(origin.id, item);
        let source_id = match ingest_source(self.store.pool(), &source, &detail).await {
            Ok(source_id) => source_id,
            Err(e) => {
                error!(item_id = item.id, error = %e, "Source ingestion rolled back");
                return ItemOutcome::PersistenceFailed;
            }
        };
        info!(item_id = item.id, source_id, "Valid source found");

        let file_name = item.document_name().unwrap_or_default();
        let target = download_path(self.download_root, origin.id, item.id, file_name);
        info!(file = %target.display(), "Downloading");

        match self.channel.download(domain, item, &target).await {
            Ok(bytes) => debug!(bytes, "Download complete"),
            Err(e) => {
                error!(source_id, error = %e, "Download failed, skipping analysis");
                report.download_failures += 1;
                return ItemOutcome::Ingested { source_id };
            }
        }

        match self.analyzer.analyze(&target, source_id).await {
            Ok(analysis) => info!(source_id, output = %analysis.stdout, "Analysis complete"),
            Err(e) => {
                error!(source_id, error = %e, "Analysis failed");
                report.analysis_failures += 1;
            }
        }

        ItemOutcome::Ingested { source_id }
    }
}

/// True if the item has a document whose name ends in a supported extension.
pub fn is_supported(item: &ChannelItem, extensions: &BTreeSet<String>) -> bool {
    match item.document_name() {
        Some(name) => {
            let name = name.to_lowercase();
            extensions
                .iter()
                .any(|ext| name.ends_with(&format!(".{}", ext)))
        }
        None => false,
    }
}

fn build_records(origin_id: i64, item: &ChannelItem) -> (NewSource, NewSourceDetail) {
    (
        NewSource {
            origin_id,
            author_id: None,
            spam_score: 0,
            published_time: item.date,
        },
        NewSourceDetail {
            native_id: item.id,
            message_text: item.text.clone(),
            views_count: item.views,
            shares_count: item.forwards,
        },
    )
}

/// `<root>/<origin_id>/<native_id>-<file name>`, with the file name reduced
/// to a safe basename.
pub fn download_path(root: &Path, origin_id: i64, native_id: i64, file_name: &str) -> PathBuf {
    root.join(origin_id.to_string())
        .join(format!("{}-{}", native_id, sanitize_file_name(file_name)))
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
