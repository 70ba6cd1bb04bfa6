//! Storage capability ports.
//!
//! The rewrite engine depends only on these traits. Production bindings
//! to containerd live in [`containerd`]; [`memory`] provides in-memory
//! implementations that record blob writes and simulate snapshot state
//! for tests.

pub mod containerd;
pub mod memory;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image_manip_core::{Descriptor, Digest, Result};

/// A filesystem mount handed out by the snapshotter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Mount type (e.g. `overlay`, `bind`)
    pub kind: String,
    pub source: String,
    pub options: Vec<String>,
}

/// Blob metadata from the content store.
#[derive(Debug, Clone, Default)]
pub struct BlobInfo {
    pub size: i64,
    pub labels: HashMap<String, String>,
}

/// Committed snapshot metadata.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub name: String,
    pub parent: String,
}

/// A record in the image index.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub name: String,
    /// Manifest descriptor the name points at
    pub target: Descriptor,
    pub labels: HashMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A garbage-collection lease pinning everything created under it.
#[derive(Debug, Clone)]
pub struct Lease {
    pub id: String,
}

/// Content-addressed blob storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Persist a blob under its descriptor. Writes are idempotent by
    /// digest; `labels` are applied even when the blob already exists.
    async fn write_blob(
        &self,
        desc: &Descriptor,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<()>;

    async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>>;

    async fn info(&self, digest: &Digest) -> Result<BlobInfo>;
}

/// Copy-on-write filesystem views keyed by chain ID.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Produce a writable view on top of `parent` (empty = no parent).
    async fn prepare(&self, key: &str, parent: &str) -> Result<Vec<Mount>>;

    /// Seal `key` as a read-only snapshot named `name`. Fails with
    /// `AlreadyExists` when the name is taken; callers treat that as
    /// success because chain-ID names are content-derived.
    async fn commit(&self, name: &str, key: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn stat(&self, key: &str) -> Result<SnapshotInfo>;

    /// Disk usage of a snapshot in bytes.
    async fn usage(&self, key: &str) -> Result<u64>;

    async fn mounts(&self, key: &str) -> Result<Vec<Mount>>;
}

/// Layer application and diff export.
#[async_trait]
pub trait Differ: Send + Sync {
    /// Unpack a compressed layer blob into the writable mounts.
    async fn apply(&self, desc: &Descriptor, mounts: &[Mount]) -> Result<()>;

    /// Export the changes `key` holds on top of `parent` as a new
    /// compressed layer blob in the content store. The blob's info
    /// labels carry its uncompressed digest.
    async fn create_diff(&self, key: &str, parent: &str) -> Result<Descriptor>;
}

/// The image name index.
#[async_trait]
pub trait ImageIndex: Send + Sync {
    async fn get(&self, name: &str) -> Result<ImageRecord>;

    async fn list(&self) -> Result<Vec<ImageRecord>>;

    async fn create(&self, record: &ImageRecord) -> Result<ImageRecord>;

    /// Replace the record for `record.name`; fails with `NotFound` when
    /// no such image exists.
    async fn update(&self, record: &ImageRecord) -> Result<ImageRecord>;
}

/// Time-bounded garbage-collection roots.
#[async_trait]
pub trait Leaser: Send + Sync {
    async fn create_lease(&self, ttl: Duration) -> Result<Lease>;

    async fn release(&self, lease: &Lease) -> Result<()>;
}

/// Mounting snapshotter views outside the differ, for the file-removal
/// path.
#[async_trait]
pub trait Mounter: Send + Sync {
    async fn mount(&self, mounts: &[Mount], target: &Path) -> Result<()>;

    async fn unmount(&self, target: &Path) -> Result<()>;
}
