use chrono::{Duration, NaiveDate, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::preprint::PreprintCollector;
use super::rss::RssCollector;
use super::PaperCollector;
use crate::config::{FeedConfig, Settings};
use crate::db::source::{SourceEntry, SourceType};
use crate::db::Database;
use crate::dedup::remove_duplicates;
use crate::paper::Paper;
use crate::TARGET_WEB_REQUEST;

const API_PRIORITY: i64 = 10;
const RSS_PRIORITY: i64 = 5;

/// Registry entries derived from configuration: the preprint API first, then each feed.
pub fn default_sources(settings: &Settings) -> Vec<SourceEntry> {
    let mut sources = vec![SourceEntry::new(
        &settings.preprint_server,
        &settings.preprint_base_url,
        SourceType::Api,
        API_PRIORITY,
    )];
    sources.extend(
        settings
            .rss_feeds
            .iter()
            .map(|feed| SourceEntry::new(&feed.name, &feed.url, SourceType::Rss, RSS_PRIORITY)),
    );
    sources
}

struct Slot {
    name: String,
    url: Option<String>,
    collector: Arc<dyn PaperCollector>,
}

/// Papers from one collection pass plus the sources that answered.
#[derive(Clone, Debug, Default)]
pub struct CollectionOutcome {
    pub papers: Vec<Paper>,
    pub sources: Vec<String>,
    pub failed: Vec<String>,
}

/// Runs every collector over the same window and dedups the concatenation.
pub struct Orchestrator {
    slots: Vec<Slot>,
    db: Option<Database>,
    days: i64,
}

impl Orchestrator {
    pub fn new(days: i64) -> Self {
        Orchestrator {
            slots: Vec::new(),
            db: None,
            days: days.max(1),
        }
    }

    /// Sources with a url get their `last_fetch` stamped after a successful fetch.
    pub fn with_collector(
        mut self,
        name: &str,
        url: Option<&str>,
        collector: Arc<dyn PaperCollector>,
    ) -> Self {
        self.slots.push(Slot {
            name: name.to_string(),
            url: url.map(str::to_string),
            collector,
        });
        self
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// One collector per enabled registry entry, highest priority first.
    pub async fn from_registry(
        db: &Database,
        settings: &Settings,
        client: reqwest::Client,
    ) -> Result<Self, sqlx::Error> {
        let mut orchestrator = Orchestrator::new(settings.collection_days).with_database(db.clone());
        for source in db.enabled_sources().await? {
            let collector: Arc<dyn PaperCollector> = match source.source_type {
                SourceType::Api => Arc::new(PreprintCollector::new(
                    client.clone(),
                    &source.url,
                    &settings.preprint_server,
                    &settings.preprint_category,
                )),
                SourceType::Rss => Arc::new(RssCollector::new(
                    client.clone(),
                    vec![FeedConfig {
                        name: source.name.clone(),
                        url: source.url.clone(),
                    }],
                )),
            };
            orchestrator = orchestrator.with_collector(&source.name, Some(&source.url), collector);
        }
        Ok(orchestrator)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `[today - days, today]`.
    pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (today - Duration::days(self.days), today)
    }

    /// Never fails: a collector error contributes zero papers and is logged.
    pub async fn collect(&self) -> CollectionOutcome {
        let (start, end) = self.window(Utc::now().date_naive());
        self.collect_between(start, end).await
    }

    /// Collectors run concurrently; their papers are concatenated in registration order.
    pub async fn collect_between(&self, start: NaiveDate, end: NaiveDate) -> CollectionOutcome {
        let mut outcome = CollectionOutcome::default();
        let mut gathered = Vec::new();

        let results = join_all(self.slots.iter().map(|slot| slot.collector.collect(start, end))).await;
        for (slot, result) in self.slots.iter().zip(results) {
            match result {
                Ok(mut papers) => {
                    info!(target: TARGET_WEB_REQUEST, "{}: {} papers", slot.name, papers.len());
                    gathered.append(&mut papers);
                    outcome.sources.push(slot.name.clone());
                    self.stamp(slot).await;
                }
                Err(e) => {
                    error!(target: TARGET_WEB_REQUEST, "Collector {} failed: {}", slot.name, e);
                    outcome.failed.push(slot.name.clone());
                }
            }
        }

        let collected = gathered.len();
        outcome.papers = remove_duplicates(gathered);
        info!(
            target: TARGET_WEB_REQUEST,
            "Collected {} papers ({} after dedup) from {} of {} sources",
            collected,
            outcome.papers.len(),
            outcome.sources.len(),
            self.slots.len()
        );
        outcome
    }

    async fn stamp(&self, slot: &Slot) {
        if let (Some(db), Some(url)) = (&self.db, &slot.url) {
            if let Err(e) = db.touch_last_fetch(url).await {
                warn!(target: TARGET_WEB_REQUEST, "Failed to record fetch time for {}: {}", url, e);
            }
        }
    }
}
