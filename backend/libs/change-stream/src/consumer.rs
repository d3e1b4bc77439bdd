//! Consumption loops.
//!
//! A [`Consumer`] opens a cursor positioned after the stored checkpoint and
//! processes one envelope at a time: the checkpoint for envelope N is written
//! only after N has been handled, and N+1 is pulled only after that write
//! succeeded. A crash between the two steps redelivers N on the next start.

use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::acquire::StreamAcquirer;
use crate::config::ConsumerConfig;
use crate::encoder::EventEncoder;
use crate::error::{EncodeError, OffsetResult, StreamError, StreamResult};
use crate::feed::{ChangeCursor, ChangeFeed};
use crate::metrics::ConsumerMetrics;
use crate::models::{ChangeEvent, StreamOffset};
use crate::offset::{NoopOffsetStore, OffsetListStore, OffsetPublishStore, OffsetStore};
use crate::retry::{with_retry, RetryError};
use crate::shutdown::ShutdownSignal;

type CursorOf<F, T, K> = <F as ChangeFeed<T, K>>::Cursor;

/// Where `consume_and_publish` sends a projected document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    /// Empty means "do not publish, only advance the checkpoint"
    pub channel: String,
    pub message: String,
}

impl PublishTarget {
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Target that only advances the checkpoint.
    pub fn skip() -> Self {
        Self {
            channel: String::new(),
            message: String::new(),
        }
    }
}

/// Resumable consumer of a change feed.
///
/// `T` is the document shape, `K` the document key shape, `F` the feed and
/// `S` the checkpoint store (no-op unless one is configured).
pub struct Consumer<T, K, F, S = NoopOffsetStore> {
    feed: F,
    store: Arc<S>,
    config: ConsumerConfig,
    encoder: Option<Arc<dyn EventEncoder>>,
    shutdown: ShutdownSignal,
    metrics: Option<ConsumerMetrics>,
    _marker: PhantomData<fn() -> (T, K)>,
}

impl<T, K, F> Consumer<T, K, F, NoopOffsetStore> {
    pub fn new(feed: F, config: ConsumerConfig) -> Self {
        Self {
            feed,
            store: Arc::new(NoopOffsetStore),
            config,
            encoder: None,
            shutdown: ShutdownSignal::never(),
            metrics: None,
            _marker: PhantomData,
        }
    }
}

impl<T, K, F, S> Consumer<T, K, F, S> {
    /// Persist checkpoints in `store` instead of forgetting them.
    pub fn with_offset_store<S2>(self, store: Arc<S2>) -> Consumer<T, K, F, S2> {
        Consumer {
            feed: self.feed,
            store,
            config: self.config,
            encoder: self.encoder,
            shutdown: self.shutdown,
            metrics: self.metrics,
            _marker: PhantomData,
        }
    }

    /// Transform applied to serialized envelopes by `consume_in_list`.
    pub fn with_encoder(mut self, encoder: Arc<dyn EventEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Stop consuming once `true` is sent on the channel.
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown = ShutdownSignal::new(rx);
        self
    }

    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn offset_store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<T, K, F, S> Consumer<T, K, F, S>
where
    F: ChangeFeed<T, K>,
    S: OffsetStore,
{
    /// Run `handler` on every envelope, then advance the checkpoint.
    ///
    /// Handler failures are retried with the handler policy (forever by
    /// default); checkpoint writes with the commit policy.
    ///
    /// Returns `Ok(())` when the cursor is exhausted or shutdown is requested.
    ///
    /// # Errors
    ///
    /// - acquisition errors (`OffsetStore`, `Feed`, `ResyncExhausted`)
    /// - `Cursor` when the feed reports a terminal error
    /// - `CommitFailed` when the checkpoint cannot be written
    /// - `HandlerFailed` only if the handler policy is bounded
    pub async fn consume_handler<H, Fut, E>(&self, mut handler: H) -> StreamResult<()>
    where
        T: Clone,
        K: Clone,
        H: FnMut(ChangeEvent<T, K>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let mut cursor = self.open().await?;
        let mut shutdown = self.shutdown.clone();

        let result = self
            .handler_loop(&mut cursor, &mut shutdown, &mut handler)
            .await;

        self.close(&mut cursor).await;
        result
    }

    async fn handler_loop<H, Fut, E>(
        &self,
        cursor: &mut CursorOf<F, T, K>,
        shutdown: &mut ShutdownSignal,
        handler: &mut H,
    ) -> StreamResult<()>
    where
        T: Clone,
        K: Clone,
        H: FnMut(ChangeEvent<T, K>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let metrics = self.metrics.as_ref();

        loop {
            let Some(event) = self.next_event(cursor, shutdown).await? else {
                return Ok(());
            };

            let handled = with_retry(&self.config.handler_retry, shutdown, "handle_event", || {
                let attempt = handler(event.clone());
                async move {
                    let result = attempt.await;
                    if result.is_err() {
                        if let Some(metrics) = metrics {
                            metrics.handler_retries.inc();
                        }
                    }
                    result
                }
            })
            .await;

            match handled {
                Ok(()) => {}
                Err(RetryError::Cancelled) => {
                    info!(
                        resume_token = %event.resume_token(),
                        "Shutdown requested while retrying handler"
                    );
                    return Ok(());
                }
                Err(RetryError::Exhausted {
                    attempts,
                    last_error,
                }) => {
                    error!(
                        resume_token = %event.resume_token(),
                        attempts = attempts,
                        error = %last_error,
                        "Handler retry budget exhausted"
                    );
                    return Err(StreamError::HandlerFailed {
                        attempts,
                        message: last_error.to_string(),
                    });
                }
            }

            let offset = event.stream_offset();
            let committed = self
                .commit(shutdown, &offset, || self.store.set_offset(&offset))
                .await?;
            if !committed {
                return Ok(());
            }

            self.record_handled(&event);
        }
    }

    /// Position a cursor after the stored checkpoint.
    async fn open(&self) -> StreamResult<CursorOf<F, T, K>> {
        StreamAcquirer::new(&self.feed, &*self.store, self.config.max_resyncs)
            .with_metrics(self.metrics.as_ref())
            .acquire::<T, K>(&self.config.watch_request())
            .await
    }

    /// Pull the next envelope; `None` when the cursor is exhausted or
    /// shutdown was requested.
    async fn next_event(
        &self,
        cursor: &mut CursorOf<F, T, K>,
        shutdown: &mut ShutdownSignal,
    ) -> StreamResult<Option<ChangeEvent<T, K>>> {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Shutdown requested, stopping change stream consumer");
                Ok(None)
            }
            next = cursor.next() => match next {
                Some(Ok(event)) => Ok(Some(event)),
                Some(Err(e)) => {
                    error!(error = %e, "Change stream cursor failed");
                    Err(StreamError::Cursor(e))
                }
                None => {
                    info!("Change stream cursor exhausted");
                    Ok(None)
                }
            },
        }
    }

    /// Run a checkpoint write with the commit policy.
    ///
    /// Returns `false` if shutdown interrupted the retry wait.
    async fn commit<W, Fut>(
        &self,
        shutdown: &mut ShutdownSignal,
        offset: &StreamOffset,
        mut write: W,
    ) -> StreamResult<bool>
    where
        W: FnMut() -> Fut,
        Fut: Future<Output = OffsetResult<()>>,
    {
        let metrics = self.metrics.as_ref();

        let result = with_retry(&self.config.commit_retry, shutdown, "commit_offset", || {
            let attempt = write();
            async move {
                let result = attempt.await;
                if result.is_err() {
                    if let Some(metrics) = metrics {
                        metrics.commit_failures.inc();
                    }
                }
                result
            }
        })
        .await;

        match result {
            Ok(()) => Ok(true),
            Err(RetryError::Cancelled) => {
                info!(
                    resume_token = %offset.resume_token,
                    "Shutdown requested before offset was committed"
                );
                Ok(false)
            }
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => {
                error!(
                    resume_token = %offset.resume_token,
                    attempts = attempts,
                    error = %last_error,
                    "Failed to commit offset"
                );
                Err(StreamError::CommitFailed {
                    attempts,
                    source: last_error,
                })
            }
        }
    }

    fn record_handled(&self, event: &ChangeEvent<T, K>) {
        debug!(
            resume_token = %event.resume_token(),
            operation_type = %event.operation_type,
            cluster_time = %event.cluster_time,
            "Change event committed"
        );
        if let Some(metrics) = &self.metrics {
            metrics.events_handled.inc();
        }
    }

    async fn close(&self, cursor: &mut CursorOf<F, T, K>) {
        if let Err(e) = cursor.close().await {
            warn!(error = %e, "Failed to close change stream cursor");
        }
    }
}

impl<T, K, F, S> Consumer<T, K, F, S>
where
    F: ChangeFeed<T, K>,
    S: OffsetListStore,
    T: Serialize,
    K: Serialize,
{
    /// Append every envelope to the store's outbox list together with its
    /// checkpoint.
    ///
    /// Envelopes are serialized as JSON and passed through the configured
    /// encoder. A serialization or encoding failure stops the loop with
    /// `StreamError::Encode`; retrying would fail the same way.
    pub async fn consume_in_list(&self) -> StreamResult<()> {
        let mut cursor = self.open().await?;
        let mut shutdown = self.shutdown.clone();

        let result = self.list_loop(&mut cursor, &mut shutdown).await;

        self.close(&mut cursor).await;
        result
    }

    async fn list_loop(
        &self,
        cursor: &mut CursorOf<F, T, K>,
        shutdown: &mut ShutdownSignal,
    ) -> StreamResult<()> {
        loop {
            let Some(event) = self.next_event(cursor, shutdown).await? else {
                return Ok(());
            };

            let payload = self.encode(&event)?;
            let offset = event.stream_offset();

            let committed = self
                .commit(shutdown, &offset, || {
                    self.store.set_offset_and_push(&offset, &payload)
                })
                .await?;
            if !committed {
                return Ok(());
            }

            self.record_handled(&event);
        }
    }

    fn encode(&self, event: &ChangeEvent<T, K>) -> Result<Vec<u8>, EncodeError> {
        let raw = serde_json::to_vec(event)?;
        match &self.encoder {
            Some(encoder) => encoder.encode(&raw),
            None => Ok(raw),
        }
    }
}

impl<T, K, F, S> Consumer<T, K, F, S>
where
    F: ChangeFeed<T, K>,
    S: OffsetPublishStore,
{
    /// Publish a projection of every envelope's full document together with
    /// its checkpoint.
    ///
    /// Envelopes without a full document, or whose projection has an empty
    /// channel, only advance the checkpoint.
    pub async fn consume_and_publish<P>(&self, mut projection: P) -> StreamResult<()>
    where
        P: FnMut(&T) -> PublishTarget,
    {
        let mut cursor = self.open().await?;
        let mut shutdown = self.shutdown.clone();

        let result = self
            .publish_loop(&mut cursor, &mut shutdown, &mut projection)
            .await;

        self.close(&mut cursor).await;
        result
    }

    async fn publish_loop<P>(
        &self,
        cursor: &mut CursorOf<F, T, K>,
        shutdown: &mut ShutdownSignal,
        projection: &mut P,
    ) -> StreamResult<()>
    where
        P: FnMut(&T) -> PublishTarget,
    {
        loop {
            let Some(event) = self.next_event(cursor, shutdown).await? else {
                return Ok(());
            };

            let offset = event.stream_offset();
            let target = event
                .full_document
                .as_ref()
                .map(|doc| projection(doc))
                .filter(|target| !target.channel.is_empty());

            let committed = match &target {
                Some(target) => {
                    self.commit(shutdown, &offset, || {
                        self.store
                            .set_offset_and_publish(&offset, &target.channel, &target.message)
                    })
                    .await?
                }
                None => {
                    debug!(
                        resume_token = %offset.resume_token,
                        "Nothing to publish, advancing offset only"
                    );
                    self.commit(shutdown, &offset, || self.store.set_offset(&offset))
                        .await?
                }
            };
            if !committed {
                return Ok(());
            }

            self.record_handled(&event);
        }
    }
}
