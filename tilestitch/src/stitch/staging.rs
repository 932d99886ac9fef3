//! Disk-backed staging for the stitch phase.
//!
//! A staging area holds one layer's fragments between decode and
//! dissolve. Records are appended tile-batch by tile-batch and routed
//! into hash partitions by their dissolve key, so every fragment of one
//! entity lands in the same partition and dissolve can load a single
//! partition at a time. Memory use is bounded by the largest partition,
//! not the layer.
//!
//! The shipped store spills `bincode`-framed records to files under a
//! run-scoped directory. The directory is removed when the area is
//! dropped, whether the stitch succeeded or not.

use crate::feature::FeatureRecord;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors raised by a staging store.
#[derive(Debug, Error)]
pub enum StagingError {
    /// Failed to create the staging directory
    #[error("failed to create staging area {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    /// Failed to write a spill file
    #[error("failed to write staged records to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    /// Failed to read a spill file back
    #[error("failed to read staged records from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    /// Record encoding or decoding failed
    #[error("staged record codec failure: {0}")]
    Codec(#[from] bincode::Error),
}

/// One staged fragment: the dissolve key plus the record itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillRecord {
    /// Canonical grouping key derived from the identifier column
    pub key: String,
    /// The fragment being staged
    pub record: FeatureRecord,
}

impl SpillRecord {
    /// Partition index for this record's key.
    pub fn partition(&self, partitions: u32) -> u32 {
        partition_for(&self.key, partitions)
    }
}

/// Routes a dissolve key to a partition.
///
/// `DefaultHasher` is seed-free, so the same key maps to the same
/// partition for the lifetime of the spill files.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % u64::from(partitions.max(1))) as u32
}

/// Creates staging areas, one per layer per run.
pub trait StagingStore: Send + Sync {
    /// Opens an empty staging area for one layer.
    ///
    /// The combination of `run_id` and `layer` must be unique for the
    /// lifetime of the area; the store may refuse or clobber a name
    /// that is already in use.
    fn open(&self, run_id: &str, layer: &str) -> Result<Box<dyn StagingArea>, StagingError>;
}

/// One layer's staged fragments.
///
/// Appends happen first, reads after; an implementation may flush
/// buffered writes on the first read. Dropping the area releases its
/// storage.
pub trait StagingArea: Send {
    /// Appends one tile batch worth of records.
    fn append(&mut self, records: Vec<SpillRecord>) -> Result<(), StagingError>;

    /// Number of partitions records are routed into.
    fn partition_count(&self) -> u32;

    /// Reads back everything staged in one partition.
    fn read_partition(&mut self, partition: u32) -> Result<Vec<SpillRecord>, StagingError>;
}

/// Staging store spilling records to a local directory.
#[derive(Debug, Clone)]
pub struct DiskStagingStore {
    root: PathBuf,
    partitions: u32,
}

impl DiskStagingStore {
    /// Creates a store rooted at `root` with the given partition count.
    pub fn new(root: impl Into<PathBuf>, partitions: u32) -> Self {
        Self {
            root: root.into(),
            partitions: partitions.max(1),
        }
    }
}

impl StagingStore for DiskStagingStore {
    fn open(&self, run_id: &str, layer: &str) -> Result<Box<dyn StagingArea>, StagingError> {
        let dir = self.root.join(format!("{}_{}", run_id, layer));
        fs::create_dir_all(&dir).map_err(|source| StagingError::Create {
            path: dir.clone(),
            source,
        })?;

        let mut writers = Vec::with_capacity(self.partitions as usize);
        for partition in 0..self.partitions {
            let path = partition_path(&dir, partition);
            let file = File::create(&path).map_err(|source| StagingError::Create {
                path: path.clone(),
                source,
            })?;
            writers.push(BufWriter::new(file));
        }

        Ok(Box::new(DiskStagingArea {
            dir,
            writers,
            counts: vec![0; self.partitions as usize],
        }))
    }
}

fn partition_path(dir: &Path, partition: u32) -> PathBuf {
    dir.join(format!("part_{:03}.bin", partition))
}

/// On-disk staging area for one layer.
///
/// Each partition is one append-only spill file of bincode frames. The
/// whole directory disappears on drop.
struct DiskStagingArea {
    dir: PathBuf,
    writers: Vec<BufWriter<File>>,
    counts: Vec<u64>,
}

impl StagingArea for DiskStagingArea {
    fn append(&mut self, records: Vec<SpillRecord>) -> Result<(), StagingError> {
        let partitions = self.writers.len() as u32;
        for record in records {
            let partition = record.partition(partitions) as usize;
            bincode::serialize_into(&mut self.writers[partition], &record)?;
            self.counts[partition] += 1;
        }
        Ok(())
    }

    fn partition_count(&self) -> u32 {
        self.writers.len() as u32
    }

    fn read_partition(&mut self, partition: u32) -> Result<Vec<SpillRecord>, StagingError> {
        let index = partition as usize;
        let path = partition_path(&self.dir, partition);

        self.writers[index]
            .flush()
            .map_err(|source| StagingError::Write {
                path: path.clone(),
                source,
            })?;

        let file = File::open(&path).map_err(|source| StagingError::Read {
            path: path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut records = Vec::with_capacity(self.counts[index] as usize);
        for _ in 0..self.counts[index] {
            records.push(bincode::deserialize_from(&mut reader)?);
        }
        Ok(records)
    }
}

impl Drop for DiskStagingArea {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!(
                path = %self.dir.display(),
                error = %e,
                "failed to remove staging area"
            );
        }
    }
}
