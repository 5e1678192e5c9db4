//! Source collectors: one per source family, each yielding normalized papers.

pub mod client;
pub mod orchestrator;
pub mod preprint;
pub mod rss;
pub mod util;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::paper::Paper;

pub use client::create_http_client;
pub use orchestrator::{default_sources, CollectionOutcome, Orchestrator};
pub use preprint::PreprintCollector;
pub use rss::RssCollector;

#[async_trait]
pub trait PaperCollector: Send + Sync {
    fn name(&self) -> &str;

    /// Papers published in `[start, end]`, as far as the source can tell.
    async fn collect(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Paper>>;
}
