use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::dedup::canonical_key;
use crate::paper::{AnalysisResult, Paper};

/// `paper:<id>`, else `doi:<doi>`, else the title key. `None` bypasses the cache.
pub fn cache_key(paper: &Paper) -> Option<String> {
    if let Some(id) = paper.id {
        return Some(format!("paper:{}", id));
    }
    canonical_key(paper)
}

/// Successful analyses for the lifetime of the process. No eviction.
#[derive(Debug, Default)]
pub struct AnalysisCache {
    entries: Mutex<HashMap<String, AnalysisResult>>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, AnalysisResult>> {
        // A panic while holding the lock cannot leave a half-written entry behind.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<AnalysisResult> {
        self.entries().get(key).cloned()
    }

    pub fn insert(&self, key: String, analysis: AnalysisResult) {
        self.entries().insert(key, analysis);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
