use async_trait::async_trait;
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info, warn};

use super::{OffsetListStore, OffsetPublishStore, OffsetStore};
use crate::config::RedisOffsetStoreConfig;
use crate::error::{OffsetResult, OffsetStoreError};
use crate::models::StreamOffset;

/// Checkpoint stored in a Redis hash.
///
/// Layout:
/// ```text
/// HSET <hash> <key> <resume_token> <key>_ts <rfc3339 utc timestamp>
/// LPUSH <list_key> <payload>          (set_offset_and_push, same MULTI)
/// PUBLISH <channel> <message>         (set_offset_and_publish, same MULTI)
/// ```
#[derive(Clone)]
pub struct RedisOffsetStore {
    conn: ConnectionManager,
    hash: String,
    key: String,
    ts_field: String,
    list_key: Option<String>,
}

impl RedisOffsetStore {
    /// Build a store over an existing connection.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `hash` or `key` is empty.
    pub fn new(
        conn: ConnectionManager,
        hash: impl Into<String>,
        key: impl Into<String>,
        list_key: Option<String>,
    ) -> OffsetResult<Self> {
        let hash = hash.into();
        let key = key.into();

        if hash.is_empty() {
            return Err(OffsetStoreError::Configuration(
                "hash can't be empty".to_string(),
            ));
        }
        if key.is_empty() {
            return Err(OffsetStoreError::Configuration(
                "key can't be empty".to_string(),
            ));
        }

        Ok(Self {
            conn,
            ts_field: format!("{}_ts", key),
            hash,
            key,
            list_key: list_key.filter(|k| !k.is_empty()),
        })
    }

    /// Connect using the given configuration.
    pub async fn connect(config: &RedisOffsetStoreConfig) -> OffsetResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        info!(
            hash = %config.hash,
            key = %config.key,
            list_key = ?config.list_key,
            "Redis offset store connected"
        );

        Self::new(conn, &config.hash, &config.key, config.list_key.clone())
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reset the checkpoint so the next start begins at the feed's tail.
    pub async fn clear_offset(&self) -> OffsetResult<()> {
        warn!(hash = %self.hash, key = %self.key, "Clearing stored offset");
        self.set_offset(&StreamOffset::default()).await
    }

    fn hset_cmd(&self, offset: &StreamOffset) -> redis::Cmd {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(&self.hash)
            .arg(&self.key)
            .arg(&offset.resume_token)
            .arg(&self.ts_field)
            .arg(format_timestamp(offset.timestamp));
        cmd
    }
}

/// Timestamps are stored as RFC 3339 UTC with sub-second precision kept;
/// an absent timestamp is stored as an empty string.
fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_default()
}

/// Unparsable values and the zero time (`0001-01-01T00:00:00Z`) written by
/// older consumers both read back as "no timestamp".
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) if ts.year() > 1 => Some(ts.with_timezone(&Utc)),
        Ok(_) => None,
        Err(e) => {
            warn!(value = %raw, error = %e, "Ignoring unparsable offset timestamp");
            None
        }
    }
}

fn offset_from_fields(token: Option<String>, ts: Option<String>) -> Option<StreamOffset> {
    let token = token.unwrap_or_default();
    let ts = ts.unwrap_or_default();

    if token.is_empty() && ts.is_empty() {
        return None;
    }

    Some(StreamOffset {
        resume_token: token,
        timestamp: parse_timestamp(&ts),
    })
}

#[async_trait]
impl OffsetStore for RedisOffsetStore {
    async fn get_offset(&self) -> OffsetResult<Option<StreamOffset>> {
        let mut conn = self.conn.clone();
        let (token, ts): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(&self.hash)
            .arg(&self.key)
            .arg(&self.ts_field)
            .query_async(&mut conn)
            .await?;

        let offset = offset_from_fields(token, ts);
        debug!(
            hash = %self.hash,
            key = %self.key,
            found = offset.is_some(),
            "Loaded offset from Redis"
        );
        Ok(offset)
    }

    async fn set_offset(&self, offset: &StreamOffset) -> OffsetResult<()> {
        let mut conn = self.conn.clone();
        self.hset_cmd(offset)
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!(resume_token = %offset.resume_token, "Offset saved to Redis");
        Ok(())
    }
}

#[async_trait]
impl OffsetListStore for RedisOffsetStore {
    async fn set_offset_and_push(
        &self,
        offset: &StreamOffset,
        payload: &[u8],
    ) -> OffsetResult<()> {
        let list_key = self.list_key.as_deref().ok_or_else(|| {
            OffsetStoreError::Configuration("list key is required to push events".to_string())
        })?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .add_command(self.hset_cmd(offset))
            .ignore()
            .cmd("LPUSH")
            .arg(list_key)
            .arg(payload)
            .ignore();

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(
            resume_token = %offset.resume_token,
            list_key = %list_key,
            bytes = payload.len(),
            "Offset saved and event pushed"
        );
        Ok(())
    }
}

#[async_trait]
impl OffsetPublishStore for RedisOffsetStore {
    async fn set_offset_and_publish(
        &self,
        offset: &StreamOffset,
        channel: &str,
        message: &str,
    ) -> OffsetResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .add_command(self.hset_cmd(offset))
            .ignore()
            .cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .ignore();

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(
            resume_token = %offset.resume_token,
            channel = %channel,
            "Offset saved and event published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_keeps_subseconds() {
        let ts = Utc.timestamp_opt(1_714_557_600, 123_000_000).unwrap();
        let raw = format_timestamp(Some(ts));
        assert_eq!(raw, "2024-05-01T10:00:00.123Z");
        assert_eq!(parse_timestamp(&raw), Some(ts));
    }

    #[test]
    fn test_missing_fields_mean_no_offset() {
        assert_eq!(offset_from_fields(None, None), None);
        assert_eq!(
            offset_from_fields(Some(String::new()), Some(String::new())),
            None
        );
    }

    #[test]
    fn test_zero_time_reads_as_no_timestamp() {
        let offset =
            offset_from_fields(Some("8263A1".into()), Some("0001-01-01T00:00:00Z".into()))
                .unwrap();
        assert_eq!(offset.resume_token, "8263A1");
        assert_eq!(offset.timestamp, None);
    }

    #[test]
    fn test_garbage_timestamp_is_ignored() {
        let offset = offset_from_fields(Some("8263A1".into()), Some("yesterday".into())).unwrap();
        assert_eq!(offset.timestamp, None);
    }

    #[test]
    fn test_timestamp_only_offset() {
        let offset = offset_from_fields(None, Some("2024-05-01T10:00:00Z".into())).unwrap();
        assert!(!offset.has_resume_token());
        assert_eq!(
            offset.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
    }
}
