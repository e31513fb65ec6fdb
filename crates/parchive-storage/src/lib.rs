//! Parchive Storage Layer
//!
//! This crate turns a live stream of parameter batches into archived segments.
//! It buffers recent samples in memory so that slightly out-of-order data can
//! still be merged, and writes finished segments to an object store in the
//! background.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────┐
//! │      Processor       │
//! └──────────┬───────────┘
//!            │ ParameterBatch
//!            ▼
//! ┌──────────────────────┐      ┌──────────────┐
//! │    RealtimeFiller    │─────►│ GroupIdStore │ parameter set -> group id
//! └──────────┬───────────┘      └──────────────┘
//!            │ one queue per group
//!            ▼
//! ┌──────────────────────┐
//! │    SegmentQueue      │ ◄── get_segments() reads here
//! │    16-slot ring      │
//! └──────────┬───────────┘
//!            │ evicted segments
//!            ▼
//! ┌──────────────────────┐
//! │ WriteBackDispatcher  │ retries, bounded workers
//! └──────────┬───────────┘
//!            │ encoded segment
//!            ▼
//! ┌──────────────────────┐
//! │  ObjectStoreArchive  │ S3 / local / memory
//! └──────────────────────┘
//! ```
//!
//! A segment stays in its queue slot until the archive acknowledges it, so a
//! reader never sees a gap between the in-memory view and the archive.
//!
//! ## Main Components
//!
//! - [`RealtimeFiller`]: per-batch ingestion, reads, shutdown
//! - [`SegmentQueue`]: ring of segments for one parameter group
//! - [`WriteBackDispatcher`]: asynchronous archive writes
//! - [`ObjectStoreArchive`]: [`ParameterArchive`] over `object_store`
//! - [`segment`]: the columnar segment file format
//! - [`config`]: TOML configuration with environment overrides

pub mod archive;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filler;
pub mod queue;
pub mod segment;

pub use archive::{ObjectStoreArchive, ParameterArchive};
pub use config::{ArchiveConfig, FailurePolicy, FillerConfig, ParchiveConfig, RegistryConfig};
pub use dispatcher::{WriteBackDispatcher, WriteHandle, WriteOutcome};
pub use error::{Error, Result};
pub use filler::{DropReason, IngestOutcome, RealtimeFiller, RejectReason, ShutdownSummary};
pub use queue::{Eviction, QueueStats, SegmentQueue, QUEUE_CAPACITY};
pub use segment::{SegmentDecoder, SegmentEncoder};
