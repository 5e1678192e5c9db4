use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, instrument};

use super::core::{now_timestamp, Database};
use crate::TARGET_DB;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rss,
    Api,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Rss => "rss",
            SourceType::Api => "api",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "rss" => Some(SourceType::Rss),
            "api" => Some(SourceType::Api),
            _ => None,
        }
    }
}

/// One row of the source registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: Option<i64>,
    pub name: String,
    pub url: String,
    pub source_type: SourceType,
    pub priority: i64,
    pub enabled: bool,
    pub last_fetch: Option<String>,
}

impl SourceEntry {
    pub fn new(name: &str, url: &str, source_type: SourceType, priority: i64) -> Self {
        SourceEntry {
            id: None,
            name: name.to_string(),
            url: url.to_string(),
            source_type,
            priority,
            enabled: true,
            last_fetch: None,
        }
    }
}

impl Database {
    /// Registers sources that are not known yet; existing rows (matched by url) are left
    /// untouched so operator edits survive restarts.
    #[instrument(target = "db_query", level = "info", skip(self, sources))]
    pub async fn seed_sources(&self, sources: &[SourceEntry]) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for source in sources {
            inserted += sqlx::query(
                r#"
                INSERT OR IGNORE INTO rss_sources (name, url, source_type, priority, enabled)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&source.name)
            .bind(&source.url)
            .bind(source.source_type.as_str())
            .bind(source.priority)
            .bind(source.enabled)
            .execute(self.pool())
            .await?
            .rows_affected();
        }
        debug!(target: TARGET_DB, "Seeded {} new sources", inserted);
        Ok(inserted)
    }

    /// All sources, highest priority first.
    pub async fn list_sources(&self, enabled_only: bool) -> Result<Vec<SourceEntry>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, url, source_type, priority, enabled, last_fetch
            FROM rss_sources
            WHERE enabled = TRUE OR ?1 = FALSE
            ORDER BY priority DESC, id ASC
            "#,
        )
        .bind(enabled_only)
        .fetch_all(self.pool())
        .await?;

        let mut sources = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_type: String = row.try_get("source_type")?;
            let Some(source_type) = SourceType::parse(&raw_type) else {
                debug!(target: TARGET_DB, "Ignoring source with unknown type '{}'", raw_type);
                continue;
            };
            sources.push(SourceEntry {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                url: row.try_get("url")?,
                source_type,
                priority: row.try_get("priority")?,
                enabled: row.try_get("enabled")?,
                last_fetch: row.try_get("last_fetch")?,
            });
        }
        Ok(sources)
    }

    pub async fn enabled_sources(&self) -> Result<Vec<SourceEntry>, sqlx::Error> {
        self.list_sources(true).await
    }

    pub async fn set_source_enabled(&self, id: i64, enabled: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE rss_sources SET enabled = ?1 WHERE id = ?2")
            .bind(enabled)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_fetch(&self, url: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE rss_sources SET last_fetch = ?1 WHERE url = ?2")
            .bind(now_timestamp())
            .bind(url)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
