use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{OffsetListStore, OffsetPublishStore, OffsetStore};
use crate::error::{OffsetResult, OffsetStoreError};
use crate::models::StreamOffset;

#[derive(Debug, Default)]
struct MemoryState {
    offset: Option<StreamOffset>,
    history: Vec<StreamOffset>,
    pushed: Vec<Vec<u8>>,
    published: Vec<(String, String)>,
    failing_reads: u32,
    failing_writes: u32,
}

impl MemoryState {
    fn check_write(&mut self) -> OffsetResult<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(OffsetStoreError::Backend(
                "injected write failure".to_string(),
            ));
        }
        Ok(())
    }

    fn commit(&mut self, offset: &StreamOffset) {
        self.offset = Some(offset.clone());
        self.history.push(offset.clone());
    }
}

/// Process-local checkpoint store.
///
/// Implements every capability, keeps the outbox list and published messages
/// for inspection, and can be told to fail upcoming reads or writes. Failed
/// writes leave the state untouched, like an aborted transaction.
///
/// ```
/// use change_stream::{InMemoryOffsetStore, OffsetStore, StreamOffset};
/// use chrono::Utc;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryOffsetStore::new();
/// store.fail_next_writes(1).await;
///
/// let offset = StreamOffset::new("T1", Utc::now());
/// assert!(store.set_offset(&offset).await.is_err());
/// assert_eq!(store.get_offset().await.unwrap(), None);
///
/// store.set_offset(&offset).await.unwrap();
/// assert_eq!(store.get_offset().await.unwrap(), Some(offset));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryOffsetStore {
    state: Mutex<MemoryState>,
}

impl InMemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a checkpoint.
    pub fn with_offset(offset: StreamOffset) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                offset: Some(offset),
                ..Default::default()
            }),
        }
    }

    /// Fail the next `count` writes of any kind.
    pub async fn fail_next_writes(&self, count: u32) {
        self.state.lock().await.failing_writes = count;
    }

    /// Fail the next `count` reads.
    pub async fn fail_next_reads(&self, count: u32) {
        self.state.lock().await.failing_reads = count;
    }

    pub async fn current(&self) -> Option<StreamOffset> {
        self.state.lock().await.offset.clone()
    }

    /// Every successfully written checkpoint, oldest first.
    pub async fn history(&self) -> Vec<StreamOffset> {
        self.state.lock().await.history.clone()
    }

    /// Outbox payloads in push order.
    pub async fn pushed(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.pushed.clone()
    }

    /// Published `(channel, message)` pairs in publish order.
    pub async fn published(&self) -> Vec<(String, String)> {
        self.state.lock().await.published.clone()
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn get_offset(&self) -> OffsetResult<Option<StreamOffset>> {
        let mut state = self.state.lock().await;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(OffsetStoreError::Backend(
                "injected read failure".to_string(),
            ));
        }
        Ok(state.offset.clone())
    }

    async fn set_offset(&self, offset: &StreamOffset) -> OffsetResult<()> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.commit(offset);
        debug!(resume_token = %offset.resume_token, "Offset stored in memory");
        Ok(())
    }
}

#[async_trait]
impl OffsetListStore for InMemoryOffsetStore {
    async fn set_offset_and_push(
        &self,
        offset: &StreamOffset,
        payload: &[u8],
    ) -> OffsetResult<()> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.commit(offset);
        state.pushed.push(payload.to_vec());
        Ok(())
    }
}

#[async_trait]
impl OffsetPublishStore for InMemoryOffsetStore {
    async fn set_offset_and_publish(
        &self,
        offset: &StreamOffset,
        channel: &str,
        message: &str,
    ) -> OffsetResult<()> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.commit(offset);
        state
            .published
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}
