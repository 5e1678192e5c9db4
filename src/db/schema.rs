use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS papers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doi TEXT UNIQUE,
                title TEXT NOT NULL,
                authors TEXT NOT NULL DEFAULT '[]',
                abstract TEXT,
                url TEXT,
                normalized_url TEXT,
                publication_date TEXT,
                journal TEXT,
                source TEXT,
                taxa TEXT,
                evolutionary_scale TEXT,
                research_method TEXT,
                evolutionary_mechanism TEXT,
                key_findings TEXT, -- JSON array
                innovation_summary TEXT,
                importance_score INTEGER,
                analysis_attempts INTEGER NOT NULL DEFAULT 0,
                analysis_error TEXT,
                embedded BOOLEAN NOT NULL DEFAULT FALSE,
                embedding_id TEXT,
                embedding_attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_papers_normalized_url ON papers (normalized_url);
            CREATE INDEX IF NOT EXISTS idx_papers_created_at ON papers (created_at);
            CREATE INDEX IF NOT EXISTS idx_papers_taxa ON papers (taxa);
            CREATE INDEX IF NOT EXISTS idx_papers_importance_score ON papers (importance_score);
            CREATE INDEX IF NOT EXISTS idx_papers_embedded ON papers (embedded);
            CREATE INDEX IF NOT EXISTS idx_papers_publication_date ON papers (publication_date);

            -- Multiple reports per date are allowed; each flywheel run writes its own.
            CREATE TABLE IF NOT EXISTS daily_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_date TEXT NOT NULL,
                total_papers INTEGER NOT NULL DEFAULT 0,
                high_value_papers INTEGER NOT NULL DEFAULT 0,
                top_paper_ids TEXT NOT NULL DEFAULT '[]',
                report_content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_daily_reports_report_date ON daily_reports (report_date);

            CREATE TABLE IF NOT EXISTS paper_clusters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL,
                cluster_name TEXT NOT NULL,
                paper_ids TEXT NOT NULL DEFAULT '[]',
                cluster_summary TEXT,
                key_findings TEXT NOT NULL DEFAULT '[]',
                FOREIGN KEY (report_id) REFERENCES daily_reports (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_paper_clusters_report_id ON paper_clusters (report_id);

            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                paper_id INTEGER NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                is_helpful BOOLEAN,
                comment TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (paper_id) REFERENCES papers (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_paper_id ON feedback (paper_id);

            CREATE TABLE IF NOT EXISTS rss_sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                source_type TEXT NOT NULL, -- rss, api
                priority INTEGER NOT NULL DEFAULT 0,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                last_fetch TEXT
            );

            CREATE TABLE IF NOT EXISTS collection_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL, -- running, success, failed
                total_papers INTEGER NOT NULL DEFAULT 0,
                new_papers INTEGER NOT NULL DEFAULT 0,
                analyzed_papers INTEGER NOT NULL DEFAULT 0,
                embedded_papers INTEGER NOT NULL DEFAULT 0,
                report_id INTEGER,
                sources TEXT NOT NULL DEFAULT '[]',
                error_message TEXT,
                created_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_collection_logs_created_at ON collection_logs (created_at);
            "#,
        )
        .execute(&mut *conn)
        .await?;

        // Databases created before the retry counters existed.
        let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('papers')")
            .fetch_all(&mut *conn)
            .await?;
        for (column, definition) in PAPER_COLUMN_UPGRADES {
            if !columns.iter().any(|name| name == column) {
                sqlx::query(&format!("ALTER TABLE papers ADD COLUMN {} {}", column, definition))
                    .execute(&mut *conn)
                    .await?;
                info!(target: TARGET_DB, "Added papers.{}", column);
            }
        }
        info!(target: TARGET_DB, "Tables ensured to exist");

        Ok(())
    }
}

const PAPER_COLUMN_UPGRADES: [(&str, &str); 3] = [
    ("analysis_attempts", "INTEGER NOT NULL DEFAULT 0"),
    ("analysis_error", "TEXT"),
    ("embedding_attempts", "INTEGER NOT NULL DEFAULT 0"),
];
