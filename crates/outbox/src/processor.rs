//! The background processing loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use domain::{OutboxDlqEntry, OutboxEvent};
use storage::{Storage, UnitOfWork};

use crate::backoff;
use crate::config::OutboxConfig;
use crate::error::Result;
use crate::handler::{HandlerError, HandlerRegistry};

/// Outcome of one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingReport {
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    /// True when the pass was skipped because another was active.
    pub skipped: bool,
}

impl ProcessingReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Polls staged events and drives them through their handlers.
///
/// Only one pass runs at a time: overlapping ticks are skipped via a
/// re-entrancy flag rather than queued.
pub struct OutboxProcessor<S: Storage> {
    storage: S,
    registry: HandlerRegistry,
    config: OutboxConfig,
    running: AtomicBool,
}

impl<S: Storage> OutboxProcessor<S> {
    /// Creates a processor over the given storage and handler registry.
    pub fn new(storage: S, registry: HandlerRegistry, config: OutboxConfig) -> Self {
        Self {
            storage,
            registry,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Runs one processing pass now.
    pub async fn run_once(&self) -> Result<ProcessingReport> {
        self.run_once_at(Utc::now()).await
    }

    /// [`Self::run_once`] with an explicit clock.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<ProcessingReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("processing pass already active, skipping tick");
            return Ok(ProcessingReport::skipped());
        }

        let result = self.process_batch(now).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Spawns the periodic background loop.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        S: 'static,
    {
        let interval = self.config.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    tracing::error!(error = %err, "outbox processing pass failed");
                }
            }
        })
    }

    async fn process_batch(&self, now: DateTime<Utc>) -> Result<ProcessingReport> {
        // Claim a batch: mark the rows processing in their own transaction
        // so a crashed dispatch never holds row locks.
        let mut uow = self.storage.begin().await?;
        let mut batch = uow.ready_outbox_events(self.config.batch_size, now).await?;
        for event in &mut batch {
            event.mark_processing();
            uow.update_outbox_event(event).await?;
        }
        uow.commit().await?;

        let mut report = ProcessingReport::default();
        for mut event in batch {
            let started = std::time::Instant::now();
            let outcome = self.dispatch(&event).await;
            metrics::histogram!("outbox_dispatch_duration_seconds")
                .record(started.elapsed().as_secs_f64());

            let mut uow = self.storage.begin().await?;
            match outcome {
                Ok(()) => {
                    event.mark_processed(now);
                    uow.update_outbox_event(&event).await?;
                    report.processed += 1;
                    metrics::counter!("outbox_processed_total").increment(1);
                }
                Err(err) => {
                    if event.retry_count + 1 >= self.config.max_retries {
                        // Retry budget exhausted: move the event, with its
                        // full failure history, out of the live outbox.
                        event.record_failure(err.to_string(), now, now);
                        let entry = OutboxDlqEntry::from_event(&event, now);
                        uow.insert_dlq_entry(&entry).await?;
                        uow.delete_outbox_event(event.id).await?;
                        report.dead_lettered += 1;
                        metrics::counter!("outbox_dead_lettered_total").increment(1);
                        tracing::error!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            retries = event.retry_count,
                            "event moved to dead-letter queue"
                        );
                    } else {
                        let delay = backoff::backoff_delay(&self.config, event.retry_count);
                        let retry_at = now
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::hours(1));
                        event.record_failure(err.to_string(), retry_at, now);
                        uow.update_outbox_event(&event).await?;
                        report.failed += 1;
                        metrics::counter!("outbox_failed_total").increment(1);
                        tracing::warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            retry_count = event.retry_count,
                            retry_at = %retry_at,
                            error = %err,
                            "event delivery failed, scheduled for retry"
                        );
                    }
                }
            }
            uow.commit().await?;
        }

        if report.processed + report.failed + report.dead_lettered > 0 {
            tracing::info!(
                processed = report.processed,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "processing pass finished"
            );
        }
        Ok(report)
    }

    async fn dispatch(&self, event: &OutboxEvent) -> std::result::Result<(), HandlerError> {
        let handlers = self.registry.handlers_for(&event.event_type);
        if handlers.is_empty() {
            // A deployment without e.g. an analytics handler must not
            // dead-letter every event it is not interested in.
            tracing::warn!(
                event_type = %event.event_type,
                "no handler registered, marking processed"
            );
            return Ok(());
        }
        for handler in handlers {
            handler.handle(event).await.map_err(|err| {
                HandlerError::new(format!("{}: {}", handler.name(), err.message))
            })?;
        }
        Ok(())
    }
}
