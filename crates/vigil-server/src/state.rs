use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use vigil_storage::{ApiKeyRow, Store};

use crate::config::ServerConfig;
use crate::runtime::{EvalRouter, NotifyRouter};

/// Cached API-key lookup. Disabling a key propagates once the TTL
/// expires (a few seconds), which is the documented eventual-invalidation
/// window.
pub struct ApiKeyCache {
    entries: Mutex<HashMap<String, (Option<ApiKeyRow>, Instant)>>,
    ttl: std::time::Duration,
}

impl ApiKeyCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: std::time::Duration::from_secs(ttl_seconds),
        }
    }

    pub fn get(&self, key: &str) -> Option<Option<ApiKeyRow>> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key).and_then(|(row, at)| {
            if at.elapsed() < self.ttl {
                Some(row.clone())
            } else {
                None
            }
        })
    }

    pub fn put(&self, key: &str, row: Option<ApiKeyRow>) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Negative entries are cached too, bounding lookup storms from
        // misconfigured agents.
        entries.insert(key.to_string(), (row, Instant::now()));
        if entries.len() > 10_000 {
            entries.clear();
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<ServerConfig>,
    pub eval: EvalRouter,
    pub notify: NotifyRouter,
    pub api_keys: Arc<ApiKeyCache>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        config: Arc<ServerConfig>,
        eval: EvalRouter,
        notify: NotifyRouter,
    ) -> Self {
        let api_keys = Arc::new(ApiKeyCache::new(config.ingest.api_key_cache_ttl_seconds));
        Self {
            store,
            config,
            eval,
            notify,
            api_keys,
            start_time: Utc::now(),
        }
    }
}
