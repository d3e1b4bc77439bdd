use prometheus::{IntCounter, Opts};
use tracing::warn;

/// Prometheus counters for one consumer, labelled with its name.
#[derive(Clone)]
pub struct ConsumerMetrics {
    pub events_handled: IntCounter,
    pub handler_retries: IntCounter,
    pub commit_failures: IntCounter,
    pub resyncs: IntCounter,
}

impl ConsumerMetrics {
    /// Create the counters and register them with the default registry.
    ///
    /// Registration failures (for example a second consumer with the same
    /// name) are logged; the counters still work but are not exported.
    pub fn new(consumer: &str) -> prometheus::Result<Self> {
        let registry = prometheus::default_registry();

        let counter = |name: &str, help: &str| {
            IntCounter::with_opts(Opts::new(name, help).const_label("consumer", consumer))
        };

        let events_handled = counter(
            "change_stream_events_handled_total",
            "Change events handled and committed",
        )?;
        let handler_retries = counter(
            "change_stream_handler_retries_total",
            "Failed handler attempts that were retried",
        )?;
        let commit_failures = counter(
            "change_stream_commit_failures_total",
            "Failed offset commit attempts",
        )?;
        let resyncs = counter(
            "change_stream_resyncs_total",
            "Checkpoints cleared after the feed rejected the resume point",
        )?;

        for metric in [
            Box::new(events_handled.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(handler_retries.clone()),
            Box::new(commit_failures.clone()),
            Box::new(resyncs.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register change stream metric: {}", e);
            }
        }

        Ok(Self {
            events_handled,
            handler_retries,
            commit_failures,
            resyncs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_is_tolerated() {
        let first = ConsumerMetrics::new("metrics-test").unwrap();
        let second = ConsumerMetrics::new("metrics-test").unwrap();

        first.events_handled.inc();
        second.events_handled.inc_by(2);

        assert_eq!(first.events_handled.get(), 1);
        assert_eq!(second.events_handled.get(), 2);
    }
}
