//! Write-Back Dispatcher - Bounded Pool of Archive Writes
//!
//! Segment queues evict while their lock is held, so eviction must never wait
//! on storage. The dispatcher takes the evicted segment, spawns the write on
//! the tokio runtime and returns immediately. At most `num_threads` writes run
//! at once; the rest wait on a semaphore.
//!
//! ## Write Lifecycle
//!
//! ```text
//! submit(segment, on_complete)
//!     │
//!     ▼
//! wait for a permit ──▶ write_segment ──fail──▶ backoff ──▶ retry
//!                            │                            (write_retries)
//!                            ▼ ok / retries exhausted
//!                      on_complete(&outcome)   ◄── queue releases its slot here
//!                            │
//!                            ▼
//!                      WriteHandle resolves
//! ```
//!
//! The completion callback always runs before the handle resolves, so anyone
//! awaiting a handle observes the queue already updated.
//!
//! ## Failure Policy
//!
//! Retries back off exponentially (`retry_backoff_ms * 2^attempt`). When all
//! attempts fail, [`FailurePolicy::Release`] gives the slot back and the
//! samples are lost (logged and counted); [`FailurePolicy::Retain`] keeps the
//! segment queryable in its slot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parchive_core::ParameterGroupSegment;
use parchive_observability::metrics;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::task::TaskTracker;

use crate::archive::ParameterArchive;
use crate::config::{FailurePolicy, FillerConfig};

/// How a submitted write ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored after `attempts` tries
    Persisted { attempts: u32 },
    /// Every attempt failed and the segment was given up
    Released { error: String },
    /// Every attempt failed and the segment stays in its slot
    Retained { error: String },
    /// The write task went away without reporting (runtime shut down)
    Abandoned,
}

impl WriteOutcome {
    /// Whether the queue slot holding the segment should be cleared
    pub fn releases_slot(&self) -> bool {
        matches!(
            self,
            WriteOutcome::Persisted { .. } | WriteOutcome::Released { .. }
        )
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, WriteOutcome::Persisted { .. })
    }
}

/// Resolves once a submitted write has finished and its callback has run
#[derive(Debug)]
pub struct WriteHandle {
    rx: oneshot::Receiver<WriteOutcome>,
}

impl Future for WriteHandle {
    type Output = WriteOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(WriteOutcome::Abandoned))
    }
}

pub struct WriteBackDispatcher {
    archive: Arc<dyn ParameterArchive>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    workers: usize,
    config: Arc<FillerConfig>,
    processor: Arc<str>,
}

impl WriteBackDispatcher {
    pub fn new(archive: Arc<dyn ParameterArchive>, config: &FillerConfig) -> Self {
        let workers = config.worker_count();

        tracing::info!(
            processor = %config.processor_name,
            workers,
            retries = config.write_retries,
            policy = ?config.failure_policy,
            "Starting write-back dispatcher"
        );

        Self {
            archive,
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
            workers,
            config: Arc::new(config.clone()),
            processor: Arc::from(config.processor_name.as_str()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Writes submitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Hand a segment to the archive.
    ///
    /// Never blocks: the write runs on its own task. `on_complete` runs on
    /// that task once the outcome is known.
    pub fn submit<F>(&self, segment: Arc<ParameterGroupSegment>, on_complete: F) -> WriteHandle
    where
        F: FnOnce(&WriteOutcome) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let archive = Arc::clone(&self.archive);
        let permits = Arc::clone(&self.permits);
        let processor = Arc::clone(&self.processor);
        let config = Arc::clone(&self.config);

        metrics::ARCHIVE_WRITES_IN_FLIGHT.inc();

        self.tracker.spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => {
                    let timer = metrics::ARCHIVE_WRITE_LATENCY
                        .with_label_values(&[&*processor])
                        .start_timer();
                    let outcome = write_with_retries(
                        archive.as_ref(),
                        &segment,
                        &config,
                        &processor,
                    )
                    .await;
                    timer.observe_duration();
                    outcome
                }
                Err(_) => WriteOutcome::Abandoned,
            };

            on_complete(&outcome);
            metrics::ARCHIVE_WRITES_IN_FLIGHT.dec();

            let _ = tx.send(outcome);
        });

        WriteHandle { rx }
    }

    /// Stop expecting new writes and wait for the running ones.
    ///
    /// Returns `false` if `timeout` passed first; those writes keep running
    /// but nobody waits for them any more.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }
}

async fn write_with_retries(
    archive: &dyn ParameterArchive,
    segment: &ParameterGroupSegment,
    config: &FillerConfig,
    processor: &str,
) -> WriteOutcome {
    let retries = config.write_retries.max(1);

    for attempt in 0..retries {
        match archive.write_segment(segment).await {
            Ok(()) => {
                metrics::ARCHIVE_SEGMENTS_WRITTEN_TOTAL
                    .with_label_values(&[processor])
                    .inc();
                metrics::ARCHIVE_SAMPLES_WRITTEN_TOTAL
                    .with_label_values(&[processor])
                    .inc_by(segment.len() as u64);

                tracing::debug!(
                    group_id = segment.group_id(),
                    interval = segment.interval(),
                    samples = segment.len(),
                    attempt = attempt + 1,
                    "Segment archived"
                );
                return WriteOutcome::Persisted {
                    attempts: attempt + 1,
                };
            }
            Err(e) if attempt + 1 < retries => {
                metrics::ARCHIVE_WRITE_FAILURES_TOTAL
                    .with_label_values(&[processor, "retry"])
                    .inc();

                let delay = config.retry_backoff(attempt);
                tracing::warn!(
                    group_id = segment.group_id(),
                    interval = segment.interval(),
                    attempt = attempt + 1,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Segment write failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                let error = e.to_string();
                return match config.failure_policy {
                    FailurePolicy::Release => {
                        metrics::ARCHIVE_WRITE_FAILURES_TOTAL
                            .with_label_values(&[processor, "released"])
                            .inc();
                        tracing::error!(
                            group_id = segment.group_id(),
                            interval = segment.interval(),
                            start = segment.start(),
                            end = segment.end(),
                            samples = segment.len(),
                            error = %error,
                            "Segment write failed after all retries, data dropped"
                        );
                        WriteOutcome::Released { error }
                    }
                    FailurePolicy::Retain => {
                        metrics::ARCHIVE_WRITE_FAILURES_TOTAL
                            .with_label_values(&[processor, "retained"])
                            .inc();
                        tracing::error!(
                            group_id = segment.group_id(),
                            interval = segment.interval(),
                            start = segment.start(),
                            end = segment.end(),
                            samples = segment.len(),
                            error = %error,
                            "Segment write failed after all retries, keeping it in memory"
                        );
                        WriteOutcome::Retained { error }
                    }
                };
            }
        }
    }

    // retries is at least 1, so the loop always returns
    WriteOutcome::Abandoned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use parchive_core::{IntervalScheme, Value};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Fails the first `failures` writes, then succeeds
    struct FlakyArchive {
        failures: u32,
        calls: AtomicU32,
        concurrent: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FlakyArchive {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                concurrent: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ParameterArchive for FlakyArchive {
        fn intervals(&self) -> IntervalScheme {
            IntervalScheme::default()
        }

        async fn write_segment(&self, _segment: &ParameterGroupSegment) -> Result<()> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);

            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(Error::ArchiveWrite("injected".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn config(num_threads: usize, policy: FailurePolicy) -> FillerConfig {
        FillerConfig {
            num_threads: Some(num_threads),
            retry_backoff_ms: 1,
            failure_policy: policy,
            ..Default::default()
        }
    }

    fn segment() -> Arc<ParameterGroupSegment> {
        Arc::new(
            ParameterGroupSegment::open(1, Arc::from(&[1u32][..]), 0, 10, &[Value::Int64(1)])
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_persisted_runs_callback_first() {
        let archive = Arc::new(FlakyArchive::new(0));
        let dispatcher = WriteBackDispatcher::new(archive, &config(2, FailurePolicy::Release));

        let seen = Arc::new(AtomicU32::new(0));
        let flag = Arc::clone(&seen);
        let outcome = dispatcher
            .submit(segment(), move |outcome| {
                assert!(outcome.is_persisted());
                flag.store(1, Ordering::SeqCst);
            })
            .await;

        assert_eq!(outcome, WriteOutcome::Persisted { attempts: 1 });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let archive = Arc::new(FlakyArchive::new(2));
        let dispatcher =
            WriteBackDispatcher::new(archive.clone(), &config(1, FailurePolicy::Release));

        let outcome = dispatcher.submit(segment(), |_| {}).await;

        assert_eq!(outcome, WriteOutcome::Persisted { attempts: 3 });
        assert_eq!(archive.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_follow_configured_backoff() {
        let archive = Arc::new(FlakyArchive::new(2));
        let config = FillerConfig {
            retry_backoff_ms: 40,
            ..config(1, FailurePolicy::Release)
        };
        let dispatcher = WriteBackDispatcher::new(archive, &config);

        let started = std::time::Instant::now();
        let outcome = dispatcher.submit(segment(), |_| {}).await;

        assert!(outcome.is_persisted());
        assert!(started.elapsed() >= config.retry_backoff(0) + config.retry_backoff(1));
    }

    #[tokio::test]
    async fn test_exhausted_retries_release() {
        let archive = Arc::new(FlakyArchive::new(u32::MAX));
        let dispatcher = WriteBackDispatcher::new(archive, &config(1, FailurePolicy::Release));

        let outcome = dispatcher.submit(segment(), |_| {}).await;

        assert!(matches!(outcome, WriteOutcome::Released { .. }));
        assert!(outcome.releases_slot());
    }

    #[tokio::test]
    async fn test_exhausted_retries_retain() {
        let archive = Arc::new(FlakyArchive::new(u32::MAX));
        let dispatcher = WriteBackDispatcher::new(archive, &config(1, FailurePolicy::Retain));

        let outcome = dispatcher.submit(segment(), |_| {}).await;

        assert!(matches!(outcome, WriteOutcome::Retained { .. }));
        assert!(!outcome.releases_slot());
    }

    #[tokio::test]
    async fn test_worker_limit_bounds_concurrency() {
        let archive = Arc::new(FlakyArchive::new(0));
        let dispatcher =
            WriteBackDispatcher::new(archive.clone(), &config(2, FailurePolicy::Release));

        let handles: Vec<WriteHandle> = (0..8).map(|_| dispatcher.submit(segment(), |_| {})).collect();
        for handle in handles {
            assert!(handle.await.is_persisted());
        }

        assert!(archive.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(archive.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_drain_waits_for_writes() {
        let archive = Arc::new(FlakyArchive::new(0));
        let dispatcher =
            WriteBackDispatcher::new(archive.clone(), &config(1, FailurePolicy::Release));

        for _ in 0..4 {
            let _ = dispatcher.submit(segment(), |_| {});
        }

        assert!(dispatcher.drain(Duration::from_secs(5)).await);
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(archive.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let archive = Arc::new(FlakyArchive::new(0));
        let dispatcher = WriteBackDispatcher::new(archive, &config(1, FailurePolicy::Release));

        for _ in 0..50 {
            let _ = dispatcher.submit(segment(), |_| {});
        }

        assert!(!dispatcher.drain(Duration::from_millis(1)).await);
    }
}
