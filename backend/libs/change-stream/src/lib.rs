//! # Resumable Change Stream Consumer
//!
//! Consumes a database change feed one event at a time and persists a
//! checkpoint (resume token plus cluster time) after every handled event, so a
//! restarted consumer continues where the previous one stopped.
//!
//! ## Guarantees
//!
//! - **At-least-once**: the checkpoint for an event is written only after its
//!   handler succeeded. A crash in between redelivers that event.
//! - **Ordered**: one event in flight; the next one is pulled only after the
//!   previous checkpoint was committed.
//! - **Self-healing start**: when the feed no longer knows the stored resume
//!   point, the checkpoint is cleared and the stream reopened at its tail.
//!
//! ## Fan-out
//!
//! Besides running a handler, a consumer can write each event to an outbox
//! list ([`Consumer::consume_in_list`]) or publish a projection of it
//! ([`Consumer::consume_and_publish`]) in the same atomic step as the
//! checkpoint.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use change_stream::{ChangeFeed, Consumer, ConsumerConfig, RedisOffsetStore, RedisOffsetStoreConfig};
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Deserialize)]
//! struct User {
//!     name: String,
//! }
//!
//! async fn run<F: ChangeFeed<User, String>>(feed: F) -> anyhow::Result<()> {
//!     let store = RedisOffsetStore::connect(&RedisOffsetStoreConfig::from_env()?).await?;
//!
//!     let consumer = Consumer::new(feed, ConsumerConfig::new("app", "users"))
//!         .with_offset_store(Arc::new(store));
//!
//!     consumer
//!         .consume_handler(|event| async move {
//!             if let Some(user) = event.full_document {
//!                 println!("{} changed", user.name);
//!             }
//!             Ok::<_, anyhow::Error>(())
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The upstream driver is plugged in through [`ChangeFeed`] and
//! [`ChangeCursor`].

pub mod acquire;
pub mod config;
pub mod consumer;
pub mod encoder;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod models;
pub mod offset;
pub mod retry;
pub mod shutdown;

pub use acquire::{start_position, StreamAcquirer};
pub use config::{ConsumerConfig, RedisOffsetStoreConfig};
pub use consumer::{Consumer, PublishTarget};
pub use encoder::{EventDecoder, EventEncoder, GzipCodec};
pub use error::{
    EncodeError, FeedError, FeedResult, OffsetResult, OffsetStoreError, StreamError, StreamResult,
};
pub use feed::{
    ChangeCursor, ChangeFeed, FullDocument, FullDocumentBeforeChange, StartPosition, WatchOptions,
    WatchRequest,
};
pub use metrics::ConsumerMetrics;
pub use models::{
    ChangeEvent, DocumentKey, EventId, Namespace, OperationType, StreamOffset, TruncatedArray,
    UpdateDescription,
};
pub use offset::{
    InMemoryOffsetStore, NoopOffsetStore, OffsetListStore, OffsetPublishStore, OffsetStore,
    RedisOffsetStore,
};
pub use retry::RetryConfig;
pub use shutdown::ShutdownSignal;
