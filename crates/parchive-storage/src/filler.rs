//! Realtime Filler - Buffers Live Parameter Batches into Archive Segments
//!
//! The filler sits between the processor delivering parameter batches and the
//! parameter archive. It keeps one [`SegmentQueue`] per parameter group, so
//! unrelated groups never contend on a lock, and hands completed segments to
//! the [`WriteBackDispatcher`].
//!
//! ## Ingestion
//!
//! For a batch at time `t` in a group whose oldest live segment starts at `S`:
//!
//! ```text
//!  t < S - past_jump_threshold    backward jump: flush the queue, then store
//!  t < S - sorting_threshold      too old: drop
//!  otherwise                      evict what t - sorting_threshold leaves behind, then store
//! ```
//!
//! Storing fails when the queue needs a new segment and has no slot for it;
//! the batch is then dropped with a saturation warning.
//!
//! ## Reading
//!
//! [`RealtimeFiller::get_segments`] returns copies of everything a group's
//! queue still holds, including segments whose archive write has not
//! completed. The same samples may already be readable from the archive, so
//! callers merging both sources drop duplicates by `(interval, segment_start)`.
//!
//! ## Example
//!
//! ```ignore
//! let archive = Arc::new(ObjectStoreArchive::in_memory(&ArchiveConfig::default()));
//! let groups = Arc::new(CachedGroupIdStore::new(SqliteGroupIdStore::new_in_memory().await?));
//! let filler = Arc::new(RealtimeFiller::new(FillerConfig::default(), archive, groups)?);
//!
//! let (tx, rx) = tokio::sync::mpsc::channel(1024);
//! let subscriber = filler.spawn_subscriber(rx);
//!
//! tx.send(ParameterBatch::new(now, [(1, Value::Float64(21.5))])).await?;
//!
//! filler.shutdown().await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parchive_core::{
    GroupId, IntervalScheme, ParameterBatch, ParameterId, ParameterValueSegment,
};
use parchive_metadata::GroupIdStore;
use parchive_observability::metrics;
use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::archive::ParameterArchive;
use crate::config::FillerConfig;
use crate::dispatcher::WriteBackDispatcher;
use crate::error::Result;
use crate::queue::{Eviction, QueueStats, SegmentQueue};

type QueueHandle = Arc<Mutex<SegmentQueue>>;

/// Type alias for the queue map to reduce type complexity
type QueueMap = RwLock<HashMap<GroupId, QueueHandle>>;

/// What happened to one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored in a live segment
    Accepted { group_id: GroupId },
    /// Stored after a backward time jump flushed `flushed` segments
    AcceptedAfterJump { group_id: GroupId, flushed: usize },
    Dropped(DropReason),
    Rejected(RejectReason),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            IngestOutcome::Accepted { .. } | IngestOutcome::AcceptedAfterJump { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Older than the queue start by more than the sorting threshold
    Stale,
    /// The queue had no slot for a new segment
    QueueSaturated,
    /// The group registry failed
    GroupResolution,
    /// The batch carried no parameters
    EmptyBatch,
    /// The batch did not fit its group's columns
    InvalidBatch,
}

impl DropReason {
    fn label(&self) -> &'static str {
        match self {
            DropReason::Stale => "stale",
            DropReason::QueueSaturated => "saturated",
            DropReason::GroupResolution => "group_error",
            DropReason::EmptyBatch => "empty",
            DropReason::InvalidBatch => "invalid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ShuttingDown,
    Disabled,
}

/// Result of [`RealtimeFiller::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Live segments handed to the archive during shutdown
    pub flushed_segments: usize,
    /// Whether every pending write finished within the timeout
    pub drained: bool,
}

pub struct RealtimeFiller {
    config: FillerConfig,
    intervals: IntervalScheme,
    groups: Arc<dyn GroupIdStore>,
    dispatcher: WriteBackDispatcher,
    queues: QueueMap,
    shutdown: CancellationToken,
}

impl RealtimeFiller {
    pub fn new(
        config: FillerConfig,
        archive: Arc<dyn ParameterArchive>,
        groups: Arc<dyn GroupIdStore>,
    ) -> Result<Self> {
        config.validate()?;

        let intervals = archive.intervals();
        let dispatcher = WriteBackDispatcher::new(archive, &config);

        tracing::info!(
            processor = %config.processor_name,
            enabled = config.enabled,
            sorting_threshold_ms = config.sorting_threshold_ms,
            past_jump_threshold_secs = config.past_jump_threshold_secs,
            max_segment_size = config.max_segment_size,
            "Realtime filler created"
        );

        Ok(Self {
            config,
            intervals,
            groups,
            dispatcher,
            queues: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn processor_name(&self) -> &str {
        &self.config.processor_name
    }

    pub fn config(&self) -> &FillerConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Store one batch of parameter values
    pub async fn process_parameters(&self, batch: &ParameterBatch) -> IngestOutcome {
        if !self.config.enabled {
            return IngestOutcome::Rejected(RejectReason::Disabled);
        }
        if self.shutdown.is_cancelled() {
            return IngestOutcome::Rejected(RejectReason::ShuttingDown);
        }

        let processor = self.processor_name();
        metrics::FILLER_BATCHES_TOTAL
            .with_label_values(&[processor])
            .inc();

        if batch.is_empty() {
            return self.dropped(DropReason::EmptyBatch);
        }

        let group_id = match self.groups.resolve_group_id(batch.parameter_ids()).await {
            Ok(id) => id,
            Err(e) => {
                metrics::FILLER_GROUP_ERRORS_TOTAL
                    .with_label_values(&[processor])
                    .inc();
                tracing::error!(
                    processor = %processor,
                    parameters = batch.len(),
                    error = %e,
                    "Failed to resolve parameter group, dropping batch"
                );
                return self.dropped(DropReason::GroupResolution);
            }
        };

        let Some(queue) = self.get_queue(group_id, batch.parameter_ids()).await else {
            return IngestOutcome::Rejected(RejectReason::ShuttingDown);
        };
        let outcome = {
            let mut guard = queue.lock();
            self.ingest_locked(&queue, &mut guard, group_id, batch)
        };

        if let IngestOutcome::Dropped(reason) = outcome {
            return self.dropped(reason);
        }
        outcome
    }

    /// Ingestion steps that run under the queue lock
    fn ingest_locked(
        &self,
        handle: &QueueHandle,
        queue: &mut SegmentQueue,
        group_id: GroupId,
        batch: &ParameterBatch,
    ) -> IngestOutcome {
        // Shutdown may have flushed this queue while the batch was in flight
        if self.shutdown.is_cancelled() {
            return IngestOutcome::Rejected(RejectReason::ShuttingDown);
        }

        let t = batch.timestamp();
        let mut flushed = None;

        if let Ok(start) = queue.start() {
            if t < start.saturating_sub(self.config.past_jump_threshold_ms()) {
                metrics::FILLER_BACKWARD_JUMPS_TOTAL
                    .with_label_values(&[self.processor_name()])
                    .inc();
                tracing::warn!(
                    processor = %self.processor_name(),
                    group_id,
                    timestamp = t,
                    queue_start = start,
                    "Time jumped backward, flushing queue"
                );
                flushed = Some(queue.flush(|e| self.dispatch(handle, e)));
            } else if t < start.saturating_sub(self.config.sorting_threshold_ms) {
                tracing::warn!(
                    processor = %self.processor_name(),
                    group_id,
                    timestamp = t,
                    queue_start = start,
                    sorting_threshold_ms = self.config.sorting_threshold_ms,
                    "Dropping sample older than the sorting threshold"
                );
                return IngestOutcome::Dropped(DropReason::Stale);
            } else {
                let threshold = t.saturating_sub(self.config.sorting_threshold_ms);
                queue.send_to_archive(threshold, |e| self.dispatch(handle, e));
            }
        }

        match queue.add_record(t, batch.values()) {
            Ok(true) => match flushed {
                Some(flushed) => IngestOutcome::AcceptedAfterJump { group_id, flushed },
                None => IngestOutcome::Accepted { group_id },
            },
            Ok(false) => {
                tracing::warn!(
                    processor = %self.processor_name(),
                    group_id,
                    timestamp = t,
                    stats = ?queue.stats(),
                    "Segment queue saturated, dropping sample. Increase num_threads so \
                     archive writes keep up, or use a backfiller for data this far apart"
                );
                IngestOutcome::Dropped(DropReason::QueueSaturated)
            }
            Err(e) => {
                tracing::error!(
                    processor = %self.processor_name(),
                    group_id,
                    error = %e,
                    "Batch does not match its parameter group"
                );
                IngestOutcome::Dropped(DropReason::InvalidBatch)
            }
        }
    }

    fn dropped(&self, reason: DropReason) -> IngestOutcome {
        metrics::FILLER_BATCHES_DROPPED_TOTAL
            .with_label_values(&[self.processor_name(), reason.label()])
            .inc();
        IngestOutcome::Dropped(reason)
    }

    /// Submit an evicted segment; its slot is cleared when the write settles
    fn dispatch(&self, handle: &QueueHandle, eviction: Eviction) {
        let Eviction { slot, segment } = eviction;
        let queue = Arc::clone(handle);
        let written = Arc::clone(&segment);

        // Completion is observed through the slot, not the handle
        let _ = self.dispatcher.submit(segment, move |outcome| {
            if outcome.releases_slot() {
                queue.lock().release(slot, &written);
            }
        });
    }

    /// Get the queue of a group, creating it if it doesn't exist.
    ///
    /// Returns `None` instead of creating a queue once shutdown has started.
    async fn get_queue(
        &self,
        group_id: GroupId,
        parameter_ids: &[ParameterId],
    ) -> Option<QueueHandle> {
        // Try to get existing queue (read lock - fast path)
        {
            let queues = self.queues.read().await;
            if let Some(queue) = queues.get(&group_id) {
                return Some(Arc::clone(queue));
            }
        }

        let mut queues = self.queues.write().await;

        // Double-check in case another task created it while we waited
        if let Some(queue) = queues.get(&group_id) {
            return Some(Arc::clone(queue));
        }
        if self.shutdown.is_cancelled() {
            return None;
        }

        tracing::debug!(
            processor = %self.processor_name(),
            group_id,
            parameters = parameter_ids.len(),
            "Creating segment queue"
        );

        let queue = Arc::new(Mutex::new(SegmentQueue::new(
            group_id,
            Arc::from(parameter_ids),
            self.intervals,
            self.config.max_segment_size,
        )));
        queues.insert(group_id, Arc::clone(&queue));

        metrics::FILLER_ACTIVE_QUEUES
            .with_label_values(&[self.processor_name()])
            .set(queues.len() as i64);

        Some(queue)
    }

    /// Copies of one parameter's samples held in memory for a group.
    ///
    /// Includes segments still being written to the archive. Empty if the
    /// group has no queue.
    pub async fn get_segments(
        &self,
        parameter_id: ParameterId,
        group_id: GroupId,
        ascending: bool,
    ) -> Vec<ParameterValueSegment> {
        let queue = match self.queues.read().await.get(&group_id) {
            Some(queue) => Arc::clone(queue),
            None => return Vec::new(),
        };

        let guard = queue.lock();
        guard.parameter_value_segments(parameter_id, ascending)
    }

    /// Number of parameter groups with a queue
    pub async fn queue_count(&self) -> usize {
        self.queues.read().await.len()
    }

    pub async fn queue_stats(&self, group_id: GroupId) -> Option<QueueStats> {
        let queue = self.queues.read().await.get(&group_id).cloned()?;
        let stats = queue.lock().stats();
        Some(stats)
    }

    /// Archive writes submitted and not yet finished
    pub fn writes_in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Feed batches from a channel until it closes or shutdown starts
    pub fn spawn_subscriber(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<ParameterBatch>,
    ) -> tokio::task::JoinHandle<()> {
        let filler = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!(processor = %filler.processor_name(), "Subscribed to parameter batches");

            loop {
                tokio::select! {
                    _ = filler.shutdown.cancelled() => break,
                    batch = rx.recv() => match batch {
                        Some(batch) => {
                            if let IngestOutcome::Rejected(_) = filler.process_parameters(&batch).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }

            tracing::info!(processor = %filler.processor_name(), "Parameter subscription ended");
        })
    }

    /// Stop accepting batches, flush every queue and wait for the writes.
    ///
    /// Waits at most `shutdown_timeout_secs`; writes still running after that
    /// are abandoned with a warning. Calling it again only waits again.
    pub async fn shutdown(&self) -> ShutdownSummary {
        self.shutdown.cancel();

        tracing::info!(
            processor = %self.processor_name(),
            "Shutting down realtime filler, flushing all queues"
        );

        // Under the write lock, so no queue can be created behind our back
        let handles: Vec<QueueHandle> = self.queues.write().await.values().cloned().collect();

        let mut flushed_segments = 0;
        for handle in &handles {
            let mut queue = handle.lock();
            flushed_segments += queue.flush(|e| self.dispatch(handle, e));
        }

        let timeout = self.config.shutdown_timeout();
        let drained = self.dispatcher.drain(timeout).await;

        if drained {
            tracing::info!(
                processor = %self.processor_name(),
                flushed_segments,
                queues = handles.len(),
                "Realtime filler shutdown complete"
            );
        } else {
            tracing::warn!(
                processor = %self.processor_name(),
                flushed_segments,
                pending = self.dispatcher.in_flight(),
                timeout_secs = timeout.as_secs(),
                "Archive writes still pending after shutdown timeout, abandoning them"
            );
        }

        ShutdownSummary {
            flushed_segments,
            drained,
        }
    }
}
