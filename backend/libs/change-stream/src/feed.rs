//! Contract for the upstream change feed.
//!
//! The feed itself (driver, wire protocol) lives outside this crate. An
//! adapter implements [`ChangeFeed`] and [`ChangeCursor`] for its driver and
//! maps the driver's "resume point no longer in history" condition to
//! [`FeedError::ResumePointInvalid`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::FeedResult;
use crate::models::ChangeEvent;

/// Where a newly opened cursor starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// Strictly after the event carrying this resume token
    ResumeAfter(String),
    /// At the first event whose cluster time is at or after this instant
    StartAtOperationTime(DateTime<Utc>),
    /// At the current end of the feed, no replay
    Tail,
}

/// Post-image lookup mode for update events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullDocument {
    #[default]
    Default,
    UpdateLookup,
    WhenAvailable,
    Required,
}

/// Pre-image mode; anything but `Off` needs pre-image capture upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullDocumentBeforeChange {
    #[default]
    Off,
    WhenAvailable,
    Required,
}

/// Feed options that do not affect positioning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub full_document: FullDocument,
    pub full_document_before_change: FullDocumentBeforeChange,
    pub batch_size: Option<u32>,
    pub max_await_time: Option<Duration>,
}

/// Everything a feed needs to open a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRequest {
    pub database: String,
    pub collection: String,
    /// Upstream filter/aggregation stages
    pub pipeline: Vec<serde_json::Value>,
    pub options: WatchOptions,
    pub start: StartPosition,
}

impl WatchRequest {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            pipeline: Vec::new(),
            options: WatchOptions::default(),
            start: StartPosition::Tail,
        }
    }

    pub fn positioned(&self, start: StartPosition) -> Self {
        Self {
            start,
            ..self.clone()
        }
    }
}

/// Source of positioned cursors.
#[async_trait]
pub trait ChangeFeed<T, K>: Send + Sync {
    type Cursor: ChangeCursor<T, K>;

    /// Open a cursor. Must fail with [`FeedError::ResumePointInvalid`] when
    /// the requested resume token or time is no longer available.
    ///
    /// [`FeedError::ResumePointInvalid`]: crate::error::FeedError::ResumePointInvalid
    async fn watch(&self, request: &WatchRequest) -> FeedResult<Self::Cursor>;
}

/// Blocking iterator over change events.
#[async_trait]
pub trait ChangeCursor<T, K>: Send {
    /// Next event. Blocks until one is available; `None` once the cursor is
    /// exhausted or closed, `Some(Err)` on a terminal error.
    async fn next(&mut self) -> Option<FeedResult<ChangeEvent<T, K>>>;

    /// Release server-side resources.
    async fn close(&mut self) -> FeedResult<()>;
}
