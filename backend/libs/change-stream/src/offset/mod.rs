//! Checkpoint persistence.
//!
//! Capabilities are layered: every backend implements [`OffsetStore`]; a
//! backend that can append to a durable list in the same atomic step
//! implements [`OffsetListStore`], one that can publish implements
//! [`OffsetPublishStore`]. Consumer variants that fan out require the
//! extended trait at compile time.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::OffsetResult;
use crate::models::StreamOffset;

mod memory;
mod redis_store;

pub use self::memory::InMemoryOffsetStore;
pub use self::redis_store::RedisOffsetStore;

/// Durable storage of a single checkpoint.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Last committed checkpoint, `None` if nothing was ever stored.
    async fn get_offset(&self) -> OffsetResult<Option<StreamOffset>>;

    /// Overwrite the checkpoint. Partial writes must never be visible.
    async fn set_offset(&self, offset: &StreamOffset) -> OffsetResult<()>;
}

/// Store that can persist the checkpoint and append to a durable list as one
/// all-or-nothing operation (outbox).
#[async_trait]
pub trait OffsetListStore: OffsetStore {
    async fn set_offset_and_push(&self, offset: &StreamOffset, payload: &[u8])
        -> OffsetResult<()>;
}

/// Store that can persist the checkpoint and publish a message in one atomic
/// step. Delivery to subscribers is best effort; the checkpoint is durable
/// whether or not anyone was listening.
#[async_trait]
pub trait OffsetPublishStore: OffsetStore {
    async fn set_offset_and_publish(
        &self,
        offset: &StreamOffset,
        channel: &str,
        message: &str,
    ) -> OffsetResult<()>;
}

/// Store that remembers nothing: every start resumes from the feed's tail.
///
/// Used when no store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOffsetStore;

#[async_trait]
impl OffsetStore for NoopOffsetStore {
    async fn get_offset(&self) -> OffsetResult<Option<StreamOffset>> {
        Ok(None)
    }

    async fn set_offset(&self, _offset: &StreamOffset) -> OffsetResult<()> {
        Ok(())
    }
}

#[async_trait]
impl OffsetListStore for NoopOffsetStore {
    async fn set_offset_and_push(
        &self,
        _offset: &StreamOffset,
        _payload: &[u8],
    ) -> OffsetResult<()> {
        Ok(())
    }
}

#[async_trait]
impl OffsetPublishStore for NoopOffsetStore {
    async fn set_offset_and_publish(
        &self,
        _offset: &StreamOffset,
        _channel: &str,
        _message: &str,
    ) -> OffsetResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<S: OffsetStore + ?Sized> OffsetStore for Arc<S> {
    async fn get_offset(&self) -> OffsetResult<Option<StreamOffset>> {
        (**self).get_offset().await
    }

    async fn set_offset(&self, offset: &StreamOffset) -> OffsetResult<()> {
        (**self).set_offset(offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_noop_store_forgets_everything() {
        let store = NoopOffsetStore;
        let offset = StreamOffset::new("8263A1", Utc::now());

        store.set_offset(&offset).await.unwrap();
        store.set_offset_and_push(&offset, b"payload").await.unwrap();
        store
            .set_offset_and_publish(&offset, "events", "payload")
            .await
            .unwrap();

        assert_eq!(store.get_offset().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_arc_store_delegates() {
        let store: Arc<dyn OffsetStore> = Arc::new(InMemoryOffsetStore::new());
        let offset = StreamOffset::new("8263A1", Utc::now());

        store.set_offset(&offset).await.unwrap();
        assert_eq!(store.get_offset().await.unwrap(), Some(offset));
    }
}
