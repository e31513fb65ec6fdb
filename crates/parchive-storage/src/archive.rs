//! Parameter Archive - Durable Home of Completed Segments
//!
//! The filler never writes storage itself. It hands evicted segments to a
//! [`ParameterArchive`] through the write-back dispatcher and asks the same
//! archive which interval scheme to align its queues on.
//!
//! [`ObjectStoreArchive`] is the implementation shipped with this crate. It
//! stores each segment as one object in any `object_store` backend (S3, local
//! filesystem, in-memory for tests):
//!
//! ```text
//! <prefix>/<group_id>/<interval>/<start>_<end>.seg
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(object_store::local::LocalFileSystem::new_with_prefix("/var/lib/parchive")?);
//! let archive = ObjectStoreArchive::new(store, &ArchiveConfig::default());
//!
//! archive.write_segment(&segment).await?;
//! let views = archive.read_parameter(group_id, interval, parameter_id).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use parchive_core::{
    GroupId, IntervalId, IntervalScheme, ParameterGroupSegment, ParameterId,
    ParameterValueSegment, SegmentInfo,
};

use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::segment::{SegmentDecoder, SegmentEncoder};

/// Persistent storage for completed segments
#[async_trait]
pub trait ParameterArchive: Send + Sync {
    /// Interval boundaries segments must be aligned on
    fn intervals(&self) -> IntervalScheme;

    /// Durably store one segment.
    ///
    /// Called from dispatcher tasks, several at once; the segment no longer
    /// receives samples.
    async fn write_segment(&self, segment: &ParameterGroupSegment) -> Result<()>;
}

/// [`ParameterArchive`] on top of an object store
pub struct ObjectStoreArchive {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    encoder: SegmentEncoder,
    intervals: IntervalScheme,
}

impl ObjectStoreArchive {
    pub fn new(store: Arc<dyn ObjectStore>, config: &ArchiveConfig) -> Self {
        Self {
            store,
            prefix: config.prefix.trim_matches('/').to_string(),
            encoder: SegmentEncoder::new(config.compression),
            intervals: config.intervals,
        }
    }

    /// Archive kept entirely in memory (for tests and dry runs)
    pub fn in_memory(config: &ArchiveConfig) -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), config)
    }

    fn interval_dir(&self, group_id: GroupId, interval: IntervalId) -> Path {
        Path::from(format!("{}/{}/{}", self.prefix, group_id, interval))
    }

    fn segment_key(&self, segment: &ParameterGroupSegment) -> String {
        format!(
            "{}/{}/{}/{}_{}.seg",
            self.prefix,
            segment.group_id(),
            segment.interval(),
            segment.start(),
            segment.end()
        )
    }

    /// Encode and upload a segment, returning where it went
    pub async fn put_segment(&self, segment: &ParameterGroupSegment) -> Result<SegmentInfo> {
        let data = self.encoder.encode(segment)?;
        let key = self.segment_key(segment);
        let path = Path::from(key.as_str());

        let info = SegmentInfo {
            key,
            group_id: segment.group_id(),
            interval: segment.interval(),
            start: segment.start(),
            end: segment.end(),
            sample_count: segment.len() as u32,
            parameter_count: segment.parameter_ids().len() as u32,
            size_bytes: data.len() as u64,
        };

        self.store.put(&path, data.into()).await?;

        tracing::debug!(
            key = %info.key,
            size = info.size_bytes,
            samples = info.sample_count,
            "Stored segment"
        );

        Ok(info)
    }

    async fn fetch(&self, path: &Path) -> Result<Bytes> {
        Ok(self.store.get(path).await?.bytes().await?)
    }

    async fn decoders(
        &self,
        group_id: GroupId,
        interval: IntervalId,
    ) -> Result<Vec<(String, SegmentDecoder)>> {
        let prefix = self.interval_dir(group_id, interval);
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut decoders = Vec::with_capacity(objects.len());
        for meta in objects {
            let data = self.fetch(&meta.location).await?;
            decoders.push((meta.location.to_string(), SegmentDecoder::new(data)?));
        }
        decoders.sort_by_key(|(_, d)| (d.start(), d.end()));

        Ok(decoders)
    }

    /// Describe the segments stored for one group and interval, oldest first
    pub async fn list_segments(
        &self,
        group_id: GroupId,
        interval: IntervalId,
    ) -> Result<Vec<SegmentInfo>> {
        Ok(self
            .decoders(group_id, interval)
            .await?
            .into_iter()
            .map(|(key, decoder)| decoder.info(key))
            .collect())
    }

    /// Every column of every segment of one group and interval, oldest first
    pub async fn read_segments(
        &self,
        group_id: GroupId,
        interval: IntervalId,
    ) -> Result<Vec<Vec<ParameterValueSegment>>> {
        self.decoders(group_id, interval)
            .await?
            .into_iter()
            .map(|(_, decoder)| -> Result<Vec<ParameterValueSegment>> {
                Ok(decoder.read_all()?)
            })
            .collect()
    }

    /// One parameter's samples from every segment of a group and interval
    pub async fn read_parameter(
        &self,
        group_id: GroupId,
        interval: IntervalId,
        parameter_id: ParameterId,
    ) -> Result<Vec<ParameterValueSegment>> {
        let mut views = Vec::new();
        for (_, decoder) in self.decoders(group_id, interval).await? {
            if let Some(view) = decoder.column(parameter_id)? {
                views.push(view);
            }
        }
        Ok(views)
    }
}

#[async_trait]
impl ParameterArchive for ObjectStoreArchive {
    fn intervals(&self) -> IntervalScheme {
        self.intervals
    }

    async fn write_segment(&self, segment: &ParameterGroupSegment) -> Result<()> {
        self.put_segment(segment).await.map(|_| ())
    }
}
