use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::OriginStore;

pub async fn list_origins(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = OriginStore::new(pool);
    let summaries = store.origin_summaries().await;
    store.pool().close().await;
    let summaries = summaries?;

    println!(
        "{:<6} {:<24} {:<6} {:<12} {:<26} SOURCES",
        "ID", "DOMAIN", "DEAD", "CURSOR", "SNAPSHOT"
    );
    for summary in &summaries {
        let origin = &summary.tracked.origin;
        let cursor = origin
            .last_checked
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let snapshot = summary
            .tracked
            .latest_history
            .as_ref()
            .map(|h| h.updated_time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!(
            "{:<6} {:<24} {:<6} {:<12} {:<26} {}",
            origin.id, origin.domain, origin.is_dead_score, cursor, snapshot, summary.source_count
        );
    }
    println!("{} origin(s) tracked", summaries.len());

    Ok(())
}
