use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{info, instrument};

use super::core::{now_timestamp, Database};
use crate::error::{FlywheelError, Result};
use crate::TARGET_DB;

pub const MAX_COMMENT_CHARS: usize = 1000;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewFeedback {
    pub paper_id: i64,
    pub rating: i64,
    pub is_helpful: Option<bool>,
    pub comment: Option<String>,
}

impl NewFeedback {
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.rating) {
            return Err(FlywheelError::Validation(format!(
                "rating must be between 1 and 5, got {}",
                self.rating
            )));
        }
        if let Some(comment) = &self.comment {
            if comment.chars().count() > MAX_COMMENT_CHARS {
                return Err(FlywheelError::Validation(format!(
                    "comment exceeds {} characters",
                    MAX_COMMENT_CHARS
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Feedback {
    pub id: i64,
    pub paper_id: i64,
    pub rating: i64,
    pub is_helpful: Option<bool>,
    pub comment: Option<String>,
    pub created_at: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FeedbackSummary {
    pub paper_id: i64,
    pub count: i64,
    pub average_rating: Option<f64>,
    pub helpful: i64,
}

impl Database {
    /// Appends feedback for an existing paper.
    #[instrument(target = "db_query", level = "info", skip(self, feedback), fields(paper_id = feedback.paper_id))]
    pub async fn add_feedback(&self, feedback: &NewFeedback) -> Result<i64> {
        feedback.validate()?;
        if self.get_paper(feedback.paper_id).await?.is_none() {
            return Err(FlywheelError::NotFound(format!(
                "paper {}",
                feedback.paper_id
            )));
        }

        let id = sqlx::query(
            r#"
            INSERT INTO feedback (paper_id, rating, is_helpful, comment, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(feedback.paper_id)
        .bind(feedback.rating)
        .bind(feedback.is_helpful)
        .bind(&feedback.comment)
        .bind(now_timestamp())
        .execute(self.pool())
        .await?
        .last_insert_rowid();

        info!(target: TARGET_DB, "Recorded feedback {} for paper {}", id, feedback.paper_id);
        Ok(id)
    }

    pub async fn feedback_for_paper(&self, paper_id: i64) -> Result<Vec<Feedback>> {
        let rows = sqlx::query(
            r#"
            SELECT id, paper_id, rating, is_helpful, comment, created_at
            FROM feedback
            WHERE paper_id = ?1
            ORDER BY id DESC
            "#,
        )
        .bind(paper_id)
        .fetch_all(self.pool())
        .await?;

        let mut feedback = Vec::with_capacity(rows.len());
        for row in rows {
            feedback.push(Feedback {
                id: row.try_get("id")?,
                paper_id: row.try_get("paper_id")?,
                rating: row.try_get("rating")?,
                is_helpful: row.try_get("is_helpful")?,
                comment: row.try_get("comment")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(feedback)
    }

    pub async fn feedback_summary(&self, paper_id: i64) -> Result<FeedbackSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count,
                   AVG(rating) AS average_rating,
                   COALESCE(SUM(CASE WHEN is_helpful THEN 1 ELSE 0 END), 0) AS helpful
            FROM feedback
            WHERE paper_id = ?1
            "#,
        )
        .bind(paper_id)
        .fetch_one(self.pool())
        .await?;

        Ok(FeedbackSummary {
            paper_id,
            count: row.try_get("count")?,
            average_rating: row.try_get("average_rating")?,
            helpful: row.try_get("helpful")?,
        })
    }
}
