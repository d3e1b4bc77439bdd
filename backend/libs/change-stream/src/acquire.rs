use tracing::{debug, info, warn};

use crate::error::{StreamError, StreamResult};
use crate::feed::{ChangeFeed, StartPosition, WatchRequest};
use crate::metrics::ConsumerMetrics;
use crate::models::StreamOffset;
use crate::offset::OffsetStore;

/// Translate a stored checkpoint into a positioning hint.
///
/// A resume token wins over a timestamp. Starting at a timestamp may replay
/// events that were already handled.
pub fn start_position(offset: Option<&StreamOffset>) -> StartPosition {
    match offset {
        Some(o) if o.has_resume_token() => StartPosition::ResumeAfter(o.resume_token.clone()),
        Some(StreamOffset {
            timestamp: Some(ts),
            ..
        }) => StartPosition::StartAtOperationTime(*ts),
        _ => StartPosition::Tail,
    }
}

/// Opens a cursor positioned at the stored checkpoint.
///
/// When the feed reports that the checkpoint is no longer resumable, the
/// checkpoint is cleared and the stream reopened from the tail, at most
/// `max_resyncs` times.
pub struct StreamAcquirer<'a, F, S> {
    feed: &'a F,
    store: &'a S,
    max_resyncs: u32,
    metrics: Option<&'a ConsumerMetrics>,
}

impl<'a, F, S> StreamAcquirer<'a, F, S>
where
    S: OffsetStore,
{
    pub fn new(feed: &'a F, store: &'a S, max_resyncs: u32) -> Self {
        Self {
            feed,
            store,
            max_resyncs,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<&'a ConsumerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Read the checkpoint and open a cursor after it.
    ///
    /// # Errors
    ///
    /// - `OffsetStore` if the checkpoint cannot be read or cleared
    /// - `ResyncExhausted` if the feed still rejects the position after
    ///   `max_resyncs` clears
    /// - `Feed` for any other open failure
    pub async fn acquire<T, K>(
        &self,
        template: &WatchRequest,
    ) -> StreamResult<<F as ChangeFeed<T, K>>::Cursor>
    where
        F: ChangeFeed<T, K>,
    {
        let mut resyncs = 0u32;

        loop {
            let offset = self
                .store
                .get_offset()
                .await
                .map_err(StreamError::OffsetStore)?;
            let start = start_position(offset.as_ref());

            debug!(
                database = %template.database,
                collection = %template.collection,
                start = ?start,
                "Opening change stream"
            );

            let request = template.positioned(start.clone());
            match self.feed.watch(&request).await {
                Ok(cursor) => {
                    info!(
                        database = %template.database,
                        collection = %template.collection,
                        start = ?start,
                        resyncs = resyncs,
                        "Change stream opened"
                    );
                    return Ok(cursor);
                }
                Err(e) if e.is_resume_invalid() => {
                    if resyncs >= self.max_resyncs {
                        warn!(
                            start = ?start,
                            resyncs = resyncs,
                            error = %e,
                            "Change stream keeps rejecting the resume point"
                        );
                        return Err(StreamError::ResyncExhausted {
                            attempts: resyncs,
                            source: e,
                        });
                    }

                    resyncs += 1;
                    warn!(
                        start = ?start,
                        error = %e,
                        attempt = resyncs,
                        "Stored offset is no longer resumable, clearing it"
                    );

                    self.store
                        .set_offset(&StreamOffset::default())
                        .await
                        .map_err(StreamError::OffsetStore)?;

                    if let Some(metrics) = self.metrics {
                        metrics.resyncs.inc();
                    }
                }
                Err(e) => return Err(StreamError::Feed(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_start_position_prefers_token() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        assert_eq!(
            start_position(Some(&StreamOffset::new("T1", ts))),
            StartPosition::ResumeAfter("T1".into())
        );
        assert_eq!(
            start_position(Some(&StreamOffset::at_time(ts))),
            StartPosition::StartAtOperationTime(ts)
        );
        assert_eq!(
            start_position(Some(&StreamOffset::default())),
            StartPosition::Tail
        );
        assert_eq!(start_position(None), StartPosition::Tail);
    }
}
