pub mod analysis;
pub mod api;
pub mod collector;
pub mod config;
pub mod context;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod environment;
pub mod error;
pub mod flywheel;
pub mod llm;
pub mod logging;
pub mod paper;
pub mod prompt;
pub mod report;
pub mod vector;

#[cfg(test)]
mod test_support;

pub use error::{FlywheelError, Result};

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_VECTOR: &str = "vector";
pub const TARGET_FLYWHEEL: &str = "flywheel";
pub const TARGET_API: &str = "api";
