use serde::Deserialize;
use std::time::Duration;

use crate::feed::{StartPosition, WatchOptions, WatchRequest};
use crate::retry::RetryConfig;

/// Default number of times the acquirer clears a rejected checkpoint and
/// reopens the stream before giving up.
pub const DEFAULT_MAX_RESYNCS: u32 = 1;

/// Consumer settings. Only the source (database and collection) is required.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub database: String,
    pub collection: String,
    /// Upstream filter stages restricting which changes are emitted
    pub pipeline: Vec<serde_json::Value>,
    pub watch_options: WatchOptions,
    pub handler_retry: RetryConfig,
    pub commit_retry: RetryConfig,
    pub max_resyncs: u32,
}

impl ConsumerConfig {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            pipeline: Vec::new(),
            watch_options: WatchOptions::default(),
            handler_retry: RetryConfig::handler_default(),
            commit_retry: RetryConfig::commit_default(),
            max_resyncs: DEFAULT_MAX_RESYNCS,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Vec<serde_json::Value>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_watch_options(mut self, options: WatchOptions) -> Self {
        self.watch_options = options;
        self
    }

    /// Use the same wait for handler and commit retries, keeping the commit
    /// attempt budget.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.handler_retry.backoff = backoff;
        self.commit_retry.backoff = backoff;
        self
    }

    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_retry = RetryConfig::bounded(attempts, self.commit_retry.backoff);
        self
    }

    pub fn with_max_resyncs(mut self, max_resyncs: u32) -> Self {
        self.max_resyncs = max_resyncs;
        self
    }

    /// Request template; the acquirer fills in the start position.
    pub fn watch_request(&self) -> WatchRequest {
        WatchRequest {
            database: self.database.clone(),
            collection: self.collection.clone(),
            pipeline: self.pipeline.clone(),
            options: self.watch_options.clone(),
            start: StartPosition::Tail,
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// Redis checkpoint location, read from `CHANGE_STREAM_*` environment
/// variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RedisOffsetStoreConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Hash holding the checkpoint fields
    pub hash: String,
    /// Field name of the resume token; the timestamp lives in `<key>_ts`
    pub key: String,
    /// Outbox list for `set_offset_and_push`
    #[serde(default)]
    pub list_key: Option<String>,
}

impl RedisOffsetStoreConfig {
    pub const ENV_PREFIX: &'static str = "CHANGE_STREAM_";

    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed(Self::ENV_PREFIX).from_env::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::new("app", "users");

        assert_eq!(config.handler_retry.max_attempts, None);
        assert_eq!(config.handler_retry.backoff, Duration::from_secs(1));
        assert_eq!(config.commit_retry.max_attempts, Some(3));
        assert_eq!(config.max_resyncs, 1);

        let request = config.watch_request();
        assert_eq!(request.database, "app");
        assert_eq!(request.collection, "users");
        assert_eq!(request.start, StartPosition::Tail);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ConsumerConfig::new("app", "users")
            .with_pipeline(vec![serde_json::json!({"$match": {"operationType": "insert"}})])
            .with_backoff(Duration::from_millis(5))
            .with_commit_attempts(5)
            .with_max_resyncs(2);

        assert_eq!(config.pipeline.len(), 1);
        assert_eq!(config.handler_retry.backoff, Duration::from_millis(5));
        assert_eq!(
            config.commit_retry,
            RetryConfig::bounded(5, Duration::from_millis(5))
        );
        assert_eq!(config.max_resyncs, 2);
    }

    #[test]
    fn test_redis_config_from_iter() {
        let vars = vec![
            ("CHANGE_STREAM_HASH".to_string(), "offsets".to_string()),
            ("CHANGE_STREAM_KEY".to_string(), "users".to_string()),
        ];
        let config: RedisOffsetStoreConfig = envy::prefixed(RedisOffsetStoreConfig::ENV_PREFIX)
            .from_iter(vars)
            .unwrap();

        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.hash, "offsets");
        assert_eq!(config.key, "users");
        assert_eq!(config.list_key, None);
    }
}
