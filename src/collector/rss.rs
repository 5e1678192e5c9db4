//! Collector for journal RSS/Atom feeds.

use async_trait::async_trait;
use chrono::NaiveDate;
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use std::io::Cursor;
use tracing::{debug, error, info, warn};

use super::client::fetch_text;
use super::util::{cleanup_xml, dc_identifiers, first_doi, is_valid_url, split_authors, strip_html};
use super::PaperCollector;
use crate::config::FeedConfig;
use crate::error::{FlywheelError, Result};
use crate::paper::Paper;
use crate::TARGET_WEB_REQUEST;

pub const RSS_SOURCE: &str = "rss";

/// Parses a feed body, retrying once on cleaned-up XML.
pub fn parse_feed(body: &str) -> Result<Feed> {
    match parser::parse(Cursor::new(body)) {
        Ok(feed) => Ok(feed),
        Err(first_err) => {
            let cleaned = cleanup_xml(body);
            if !(cleaned.contains("<rss") || cleaned.contains("<feed") || cleaned.contains("<rdf")) {
                return Err(FlywheelError::Parse(format!(
                    "not an RSS or Atom document: {}",
                    first_err
                )));
            }
            parser::parse(Cursor::new(cleaned)).map_err(|second_err| {
                FlywheelError::Parse(format!(
                    "feed unparseable even after cleanup. First error: {}. Second error: {}",
                    first_err, second_err
                ))
            })
        }
    }
}

/// Maps one entry to a paper. Entries without a title are dropped.
///
/// The DOI is looked up in `identifier` (the entry's `dc:identifier`), then the guid, the
/// summary and the link.
pub fn entry_to_paper(entry: Entry, journal: &str, identifier: Option<&str>) -> Option<Paper> {
    let title = entry
        .title
        .as_ref()
        .map(|t| strip_html(&t.content))
        .unwrap_or_default();
    if title.is_empty() {
        return None;
    }

    let raw_summary = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));
    let abstract_text = raw_summary
        .as_deref()
        .map(strip_html)
        .filter(|text| !text.is_empty());

    let link = entry
        .links
        .first()
        .map(|link| link.href.trim().to_string())
        .filter(|href| is_valid_url(href));
    let doi = first_doi([
        identifier,
        Some(entry.id.as_str()),
        raw_summary.as_deref(),
        link.as_deref(),
    ]);

    let authors = entry
        .authors
        .iter()
        .flat_map(|person| split_authors(&person.name))
        .collect();

    let publication_date = entry
        .published
        .or(entry.updated)
        .map(|date| date.format("%Y-%m-%d").to_string());

    Some(Paper {
        doi,
        authors,
        abstract_text,
        url: link,
        publication_date,
        journal: Some(journal.to_string()),
        source: Some(RSS_SOURCE.to_string()),
        ..Paper::new(title)
    })
}

/// Reads a set of feeds. A failing feed is logged and skipped.
#[derive(Clone, Debug)]
pub struct RssCollector {
    client: reqwest::Client,
    feeds: Vec<FeedConfig>,
}

impl RssCollector {
    pub fn new(client: reqwest::Client, feeds: Vec<FeedConfig>) -> Self {
        RssCollector { client, feeds }
    }

    pub async fn collect_feed(&self, feed: &FeedConfig, start: NaiveDate) -> Result<Vec<Paper>> {
        let body = fetch_text(&self.client, &feed.url).await?;
        let parsed = parse_feed(&body)?;
        let journal = parsed
            .title
            .as_ref()
            .map(|t| strip_html(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| feed.name.clone());

        let entries = parsed.entries.len();
        let mut identifiers = dc_identifiers(&body);
        if identifiers.len() != entries {
            debug!(target: TARGET_WEB_REQUEST, "{}: {} dc:identifier slots for {} entries, ignoring them", feed.name, identifiers.len(), entries);
            identifiers = vec![None; entries];
        }

        let cutoff = start.format("%Y-%m-%d").to_string();
        let papers: Vec<Paper> = parsed
            .entries
            .into_iter()
            .zip(identifiers)
            .filter_map(|(entry, identifier)| entry_to_paper(entry, &journal, identifier.as_deref()))
            .filter(|paper| {
                paper
                    .publication_date
                    .as_deref()
                    .map_or(true, |date| date >= cutoff.as_str())
            })
            .collect();

        debug!(target: TARGET_WEB_REQUEST, "{}: {} entries, {} papers", feed.name, entries, papers.len());
        Ok(papers)
    }
}

#[async_trait]
impl PaperCollector for RssCollector {
    fn name(&self) -> &str {
        RSS_SOURCE
    }

    /// Fails only when every configured feed failed.
    async fn collect(&self, start: NaiveDate, _end: NaiveDate) -> Result<Vec<Paper>> {
        let mut papers = Vec::new();
        let mut failures = Vec::new();

        for feed in &self.feeds {
            match self.collect_feed(feed, start).await {
                Ok(mut batch) => {
                    info!(target: TARGET_WEB_REQUEST, "Collected {} papers from feed {}", batch.len(), feed.name);
                    papers.append(&mut batch);
                }
                Err(e) => {
                    warn!(target: TARGET_WEB_REQUEST, "Feed {} ({}) failed: {}", feed.name, feed.url, e);
                    failures.push(format!("{}: {}", feed.name, e));
                }
            }
        }

        if !self.feeds.is_empty() && failures.len() == self.feeds.len() {
            error!(target: TARGET_WEB_REQUEST, "All {} feeds failed", failures.len());
            return Err(FlywheelError::Upstream(failures.join("; ")));
        }
        Ok(papers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::client::create_http_client;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Evolution Letters</title>
    <link>https://example.org</link>
    <description>Latest</description>
    <item>
      <title>Island gigantism in &lt;i&gt;rodents&lt;/i&gt;</title>
      <link>https://example.org/articles/1</link>
      <guid>doi:10.1093/evlett/qrae001</guid>
      <description>&lt;p&gt;Body size shifts on islands.&lt;/p&gt;</description>
      <dc:creator>Lopez, M.; Chen, W. &amp; Okafor, N.</dc:creator>
      <pubDate>Thu, 02 May 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Sexual selection in guppies</title>
      <link>https://example.org/articles/10.1093/evlett/qrae002</link>
      <guid>https://example.org/articles/2</guid>
      <description>Colour patterns.</description>
      <pubDate>Fri, 03 May 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title></title>
      <link>https://example.org/articles/3</link>
    </item>
    <item>
      <title>Old news</title>
      <link>https://example.org/articles/4</link>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 28).unwrap()
    }

    #[test]
    fn test_entries_map_to_papers() {
        let feed = parse_feed(FEED).unwrap();
        let papers: Vec<Paper> = feed
            .entries
            .into_iter()
            .filter_map(|entry| entry_to_paper(entry, "Evolution Letters", None))
            .collect();

        assert_eq!(papers.len(), 3);
        let first = &papers[0];
        assert_eq!(first.title, "Island gigantism in rodents");
        assert_eq!(first.doi.as_deref(), Some("10.1093/evlett/qrae001"));
        assert_eq!(first.abstract_text.as_deref(), Some("Body size shifts on islands."));
        assert_eq!(first.authors, vec!["Lopez, M.", "Chen, W.", "Okafor, N."]);
        assert_eq!(first.publication_date.as_deref(), Some("2024-05-02"));
        assert_eq!(first.source.as_deref(), Some(RSS_SOURCE));

        // No DOI in the guid or summary, so it comes from the link.
        assert_eq!(papers[1].doi.as_deref(), Some("10.1093/evlett/qrae002"));
    }

    const BIORXIV_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://connect.biorxiv.org/biorxiv_xml/evolutionary_biology">
    <title>bioRxiv Subject Collection: Evolutionary Biology</title>
    <link>https://www.biorxiv.org</link>
    <description>Latest preprints</description>
    <items>
      <rdf:Seq>
        <rdf:li rdf:resource="https://www.biorxiv.org/content/10.1101/2024.05.01.591234v1?rss=1"/>
        <rdf:li rdf:resource="https://www.biorxiv.org/content/10.1101/2024.05.02.591300v1?rss=1"/>
      </rdf:Seq>
    </items>
  </channel>
  <item rdf:about="https://www.biorxiv.org/content/10.1101/2024.05.01.591234v1?rss=1">
    <title>Convergent loss of flight in island rails</title>
    <link>http://biorxiv.org/cgi/content/short/2024.05.01.591234v1?rss=1</link>
    <description>Flightlessness evolved repeatedly.</description>
    <dc:creator>Ito, K.</dc:creator>
    <dc:date>2024-05-03</dc:date>
    <dc:identifier>doi:10.1101/2024.05.01.591234</dc:identifier>
  </item>
  <item rdf:about="https://www.biorxiv.org/content/10.1101/2024.05.02.591300v1?rss=1">
    <title>Hybrid zones in sunflowers</title>
    <link>http://biorxiv.org/cgi/content/short/2024.05.02.591300v1?rss=1</link>
    <description>Introgression across a cline.</description>
    <dc:date>2024-05-04</dc:date>
  </item>
</rdf:RDF>"#;

    #[test]
    fn test_identifier_comes_before_link() {
        let feed = parse_feed(FEED).unwrap();
        let entry = feed.entries.into_iter().nth(1).unwrap();
        let paper = entry_to_paper(entry, "Evolution Letters", Some("doi:10.1093/evlett/qrae999")).unwrap();
        assert_eq!(paper.doi.as_deref(), Some("10.1093/evlett/qrae999"));
    }

    #[tokio::test]
    async fn test_dc_identifier_supplies_biorxiv_doi() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/evolutionary_biology")
            .with_status(200)
            .with_header("content-type", "application/rdf+xml")
            .with_body(BIORXIV_FEED)
            .create_async()
            .await;

        let collector = RssCollector::new(
            create_http_client().unwrap(),
            vec![FeedConfig {
                name: "biorxiv".into(),
                url: format!("{}/evolutionary_biology", server.url()),
            }],
        );
        let papers = collector.collect(start(), start()).await.unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].doi.as_deref(), Some("10.1101/2024.05.01.591234"));
        assert_eq!(
            papers[0].url.as_deref(),
            Some("http://biorxiv.org/cgi/content/short/2024.05.01.591234v1?rss=1")
        );
        assert_eq!(papers[1].title, "Hybrid zones in sunflowers");
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(parse_feed("hello world"), Err(FlywheelError::Parse(_))));
    }

    #[tokio::test]
    async fn test_failing_feed_does_not_abort_batch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/good.rss")
            .with_status(200)
            .with_header("content-type", "application/rss+xml")
            .with_body(FEED)
            .create_async()
            .await;
        server.mock("GET", "/bad.rss").with_status(500).create_async().await;

        let collector = RssCollector::new(
            create_http_client().unwrap(),
            vec![
                FeedConfig { name: "bad".into(), url: format!("{}/bad.rss", server.url()) },
                FeedConfig { name: "good".into(), url: format!("{}/good.rss", server.url()) },
            ],
        );
        let papers = collector.collect(start(), start()).await.unwrap();
        assert_eq!(papers.len(), 2);
        assert!(papers.iter().all(|p| p.journal.as_deref() == Some("Evolution Letters")));
    }

    #[tokio::test]
    async fn test_all_feeds_failing_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/bad.rss").with_status(500).create_async().await;

        let collector = RssCollector::new(
            create_http_client().unwrap(),
            vec![FeedConfig { name: "bad".into(), url: format!("{}/bad.rss", server.url()) }],
        );
        assert!(matches!(
            collector.collect(start(), start()).await,
            Err(FlywheelError::Upstream(_))
        ));
    }
}
