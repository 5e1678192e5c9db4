//! Typed settings, read from the environment once per process.

use once_cell::sync::Lazy;
use std::time::Duration;

use crate::environment::{get_env_or, get_env_parsed, get_env_var_as_vec, get_first_env};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_PREPRINT_API_URL: &str = "https://api.biorxiv.org";
pub const DEFAULT_SCHEDULE: &str = "0 0 */4 * * *";

/// Feeds registered when `RSS_FEEDS` is not set.
pub const DEFAULT_RSS_FEEDS: &[(&str, &str)] = &[
    (
        "bioRxiv Evolutionary Biology",
        "https://connect.biorxiv.org/biorxiv_xml/evolutionary_biology",
    ),
    (
        "Nature Ecology & Evolution",
        "https://www.nature.com/natecolevol.rss",
    ),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

/// An RSS feed entry from configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub llm_provider: LlmProvider,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub llm_model: String,
    pub ollama_host: String,
    pub ollama_port: u16,
    pub llm_max_retries: u32,
    pub llm_retry_delay: Duration,

    pub embedding_api_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,

    pub database_url: String,
    pub qdrant_url: Option<String>,
    pub vector_persist_dir: String,
    pub log_level: String,

    pub preprint_base_url: String,
    pub preprint_server: String,
    pub preprint_category: String,
    pub rss_feeds: Vec<FeedConfig>,

    pub collection_days: i64,
    pub schedule: String,
    pub analysis_concurrency: usize,
    pub embedding_concurrency: usize,
    pub analysis_batch_limit: i64,
    pub api_port: u16,
}

static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

impl Settings {
    /// The process-wide settings, loaded on first use.
    pub fn global() -> &'static Settings {
        &SETTINGS
    }

    pub fn from_env() -> Self {
        let openai_api_key = get_env_or("OPENAI_API_KEY", "");
        let openai_base_url = get_env_or("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL);

        let llm_provider = match get_env_or("LLM_PROVIDER", "openai").to_lowercase().as_str() {
            "ollama" => LlmProvider::Ollama,
            _ => LlmProvider::OpenAI,
        };

        Settings {
            llm_provider,
            llm_model: get_env_or("LLM_MODEL", "gpt-4o-mini"),
            ollama_host: get_env_or("OLLAMA_HOST", "http://localhost"),
            ollama_port: get_env_parsed("OLLAMA_PORT", 11434u16),
            llm_max_retries: get_env_parsed("LLM_MAX_RETRIES", 3u32).max(1),
            llm_retry_delay: Duration::from_millis(get_env_parsed("LLM_RETRY_DELAY_MS", 1000u64)),

            embedding_api_url: get_first_env(&["EMBEDDING_API_URL"])
                .unwrap_or_else(|| openai_base_url.clone()),
            embedding_api_key: get_first_env(&["EMBEDDING_API_KEY"])
                .unwrap_or_else(|| openai_api_key.clone()),
            embedding_model: get_env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimension: get_env_parsed("EMBEDDING_DIMENSION", 1536usize),

            database_url: get_env_or("DATABASE_URL", "flywheel.db"),
            qdrant_url: get_first_env(&["QDRANT_URL"]),
            vector_persist_dir: get_first_env(&["VECTOR_PERSIST_DIR", "CHROMA_PERSIST_DIR"])
                .unwrap_or_else(|| "vector_store".to_string()),
            log_level: get_env_or("LOG_LEVEL", "info"),

            preprint_base_url: get_env_or("PREPRINT_API_URL", DEFAULT_PREPRINT_API_URL),
            preprint_server: get_env_or("PREPRINT_SERVER", "biorxiv"),
            preprint_category: get_env_or("PREPRINT_CATEGORY", "evolutionary_biology"),
            rss_feeds: parse_feed_list(&get_env_var_as_vec("RSS_FEEDS", ';')),

            collection_days: get_env_parsed("COLLECTION_DAYS", 7i64).max(1),
            schedule: get_env_or("FLYWHEEL_SCHEDULE", DEFAULT_SCHEDULE),
            analysis_concurrency: get_env_parsed("ANALYSIS_CONCURRENCY", 3usize).max(1),
            embedding_concurrency: get_env_parsed("EMBEDDING_CONCURRENCY", 5usize).max(1),
            analysis_batch_limit: get_env_parsed("ANALYSIS_BATCH_LIMIT", 200i64).max(1),
            api_port: get_env_parsed("PORT", 8080u16),

            openai_api_key,
            openai_base_url,
        }
    }
}

/// Parses `name|url` or bare `url` entries. An empty list yields the defaults.
pub fn parse_feed_list(entries: &[String]) -> Vec<FeedConfig> {
    if entries.is_empty() {
        return DEFAULT_RSS_FEEDS
            .iter()
            .map(|(name, url)| FeedConfig {
                name: name.to_string(),
                url: url.to_string(),
            })
            .collect();
    }

    entries
        .iter()
        .map(|entry| match entry.split_once('|') {
            Some((name, url)) => FeedConfig {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            },
            None => FeedConfig {
                name: entry.trim().to_string(),
                url: entry.trim().to_string(),
            },
        })
        .filter(|feed| !feed.url.is_empty())
        .collect()
}
