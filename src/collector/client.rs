//! HTTP client creation and request handling for source fetches.

use reqwest::{cookie::Jar, header};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{FlywheelError, Result};
use crate::TARGET_WEB_REQUEST;

/// Budget for one source request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A client that presents itself like a desktop browser; some publishers refuse bots.
pub fn create_http_client() -> Result<reqwest::Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static(
            "application/json, application/rss+xml, application/atom+xml, application/xml, text/xml, */*;q=0.9",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-US,en;q=0.5"),
    );

    let cookie_store = Jar::default();
    reqwest::Client::builder()
        .cookie_store(true)
        .cookie_provider(Arc::new(cookie_store))
        .gzip(true)
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers)
        .timeout(REQUEST_TIMEOUT)
        .redirect(reqwest::redirect::Policy::default())
        .build()
        .map_err(|e| FlywheelError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// GETs `url` and returns the body. Non-success statuses and timeouts are upstream errors.
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    debug!(target: TARGET_WEB_REQUEST, "Fetching {}", url);

    let response = match timeout(REQUEST_TIMEOUT, client.get(url).send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(target: TARGET_WEB_REQUEST, "Request to {} failed: {}", url, e);
            return Err(e.into());
        }
        Err(_) => {
            warn!(target: TARGET_WEB_REQUEST, "Request to {} timed out after {} seconds", url, REQUEST_TIMEOUT.as_secs());
            return Err(FlywheelError::Upstream(format!(
                "request to {} timed out after {} seconds",
                url,
                REQUEST_TIMEOUT.as_secs()
            )));
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!(target: TARGET_WEB_REQUEST, "Request to {} returned HTTP {}", url, status);
        return Err(FlywheelError::Upstream(format!("HTTP {} from {}", status, url)));
    }

    Ok(response.text().await?)
}
