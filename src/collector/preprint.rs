//! Collector for the bioRxiv-style details API.
//!
//! `GET {base}/details/{server}/{start}/{end}?category={category}` answers with
//! `{"collection": [...]}`, one record per preprint version.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info};

use super::client::fetch_text;
use super::util::{split_authors, strip_html};
use super::PaperCollector;
use crate::error::{FlywheelError, Result};
use crate::paper::Paper;
use crate::TARGET_WEB_REQUEST;

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    collection: Vec<PreprintRecord>,
}

#[derive(Debug, Deserialize)]
struct PreprintRecord {
    title: Option<String>,
    authors: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    doi: Option<String>,
    date: Option<String>,
    server: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PreprintCollector {
    client: reqwest::Client,
    base_url: String,
    server: String,
    category: String,
}

impl PreprintCollector {
    pub fn new(client: reqwest::Client, base_url: &str, server: &str, category: &str) -> Self {
        PreprintCollector {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            server: server.to_string(),
            category: category.to_string(),
        }
    }

    fn details_url(&self, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/details/{}/{}/{}?category={}",
            self.base_url,
            self.server,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            self.category
        )
    }

    fn journal_name(&self, record_server: Option<&str>) -> String {
        match record_server.unwrap_or(&self.server).to_lowercase().as_str() {
            "biorxiv" => "bioRxiv".to_string(),
            "medrxiv" => "medRxiv".to_string(),
            other => other.to_string(),
        }
    }

    fn to_paper(&self, record: PreprintRecord) -> Option<Paper> {
        let title = strip_html(record.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            return None;
        }

        let doi = record
            .doi
            .map(|doi| doi.trim().to_string())
            .filter(|doi| !doi.is_empty());

        Some(Paper {
            url: doi.as_ref().map(|doi| format!("https://doi.org/{}", doi)),
            doi,
            authors: record.authors.as_deref().map(split_authors).unwrap_or_default(),
            abstract_text: record
                .abstract_text
                .map(|text| strip_html(&text))
                .filter(|text| !text.is_empty()),
            publication_date: record.date,
            journal: Some(self.journal_name(record.server.as_deref())),
            source: Some(self.server.clone()),
            ..Paper::new(title)
        })
    }
}

#[async_trait]
impl PaperCollector for PreprintCollector {
    fn name(&self) -> &str {
        &self.server
    }

    async fn collect(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Paper>> {
        if start > end {
            return Err(FlywheelError::Validation(format!(
                "collection window starts after it ends ({} > {})",
                start, end
            )));
        }

        let url = self.details_url(start, end);
        let body = fetch_text(&self.client, &url).await?;
        let response: DetailsResponse = serde_json::from_str(&body)
            .map_err(|e| FlywheelError::Parse(format!("preprint response from {}: {}", url, e)))?;

        let received = response.collection.len();
        let papers: Vec<Paper> = response
            .collection
            .into_iter()
            .filter_map(|record| self.to_paper(record))
            .collect();

        debug!(target: TARGET_WEB_REQUEST, "{} records, {} usable", received, papers.len());
        info!(target: TARGET_WEB_REQUEST, "Collected {} papers from {}", papers.len(), self.server);
        Ok(papers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::client::create_http_client;

    fn window() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 7).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_collect_maps_records() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "messages": [{"status": "ok"}],
            "collection": [
                {
                    "title": "Rapid adaptation of stickleback armour",
                    "authors": "Smith, J.; Doe, A.",
                    "abstract": "<p>Armour plates evolve fast.</p>",
                    "doi": "10.1101/2024.05.02.000001",
                    "date": "2024-05-02",
                    "server": "bioRxiv",
                    "category": "evolutionary biology"
                },
                {"title": "", "doi": "10.1101/2024.05.02.000002"},
                {"title": "No DOI here", "authors": "Roe, B."}
            ]
        });
        let mock = server
            .mock("GET", "/details/biorxiv/2024-05-01/2024-05-07")
            .match_query(mockito::Matcher::UrlEncoded(
                "category".into(),
                "evolutionary_biology".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let collector = PreprintCollector::new(
            create_http_client().unwrap(),
            &server.url(),
            "biorxiv",
            "evolutionary_biology",
        );
        let (start, end) = window();
        let papers = collector.collect(start, end).await.unwrap();
        mock.assert_async().await;

        assert_eq!(papers.len(), 2);
        let first = &papers[0];
        assert_eq!(first.title, "Rapid adaptation of stickleback armour");
        assert_eq!(first.authors, vec!["Smith, J.", "Doe, A."]);
        assert_eq!(first.abstract_text.as_deref(), Some("Armour plates evolve fast."));
        assert_eq!(first.url.as_deref(), Some("https://doi.org/10.1101/2024.05.02.000001"));
        assert_eq!(first.journal.as_deref(), Some("bioRxiv"));
        assert_eq!(first.source.as_deref(), Some("biorxiv"));
        assert_eq!(first.publication_date.as_deref(), Some("2024-05-02"));

        assert_eq!(papers[1].doi, None);
        assert_eq!(papers[1].url, None);
    }

    #[tokio::test]
    async fn test_server_error_is_upstream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let collector =
            PreprintCollector::new(create_http_client().unwrap(), &server.url(), "biorxiv", "x");
        let (start, end) = window();
        let err = collector.collect(start, end).await.unwrap_err();
        assert!(matches!(err, FlywheelError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let collector =
            PreprintCollector::new(create_http_client().unwrap(), &server.url(), "biorxiv", "x");
        let (start, end) = window();
        let err = collector.collect(start, end).await.unwrap_err();
        assert!(matches!(err, FlywheelError::Parse(_)));
    }

    #[tokio::test]
    async fn test_inverted_window_rejected() {
        let collector = PreprintCollector::new(
            create_http_client().unwrap(),
            "http://127.0.0.1:9",
            "biorxiv",
            "x",
        );
        let (start, end) = window();
        assert!(matches!(
            collector.collect(end, start).await,
            Err(FlywheelError::Validation(_))
        ));
    }
}
