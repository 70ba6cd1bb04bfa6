//! Production capability bindings to containerd.
//!
//! One shared gRPC channel serves the content, snapshots, diff, images
//! and leases services. Every request carries the ambient namespace and,
//! once the runtime holds one, the lease ID in its metadata, so all
//! blobs and snapshots created here are pinned until the lease goes
//! away.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use containerd_client::services::v1::snapshots::{
    snapshots_client::SnapshotsClient, CommitSnapshotRequest, MountsRequest,
    PrepareSnapshotRequest, RemoveSnapshotRequest, StatSnapshotRequest, UsageRequest,
    ViewSnapshotRequest,
};
use containerd_client::services::v1::{
    content_client::ContentClient, diff_client::DiffClient, images_client::ImagesClient,
    leases_client::LeasesClient, ApplyRequest, CreateImageRequest,
    CreateRequest as CreateLeaseRequest, DeleteRequest as DeleteLeaseRequest, DiffRequest,
    GetImageRequest, Image as ApiImage, Info as ApiBlobInfo, InfoRequest, ListImagesRequest,
    ReadContentRequest, UpdateImageRequest, UpdateRequest as UpdateContentRequest,
    WriteAction, WriteContentRequest,
};
use containerd_client::types::{Descriptor as ApiDescriptor, Mount as ApiMount};
use image_manip_core::{Descriptor, Digest, ManipError, Result};
use nix::mount::{MntFlags, MsFlags};
use tokio_util::sync::CancellationToken;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Channel;
use tonic::Request;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    BlobInfo, ContentStore, Differ, ImageIndex, ImageRecord, Lease, Leaser, Mount, Mounter,
    SnapshotInfo, Snapshotter,
};

const NAMESPACE_HEADER: &str = "containerd-namespace";
const LEASE_HEADER: &str = "containerd-lease";
const GC_EXPIRE_LABEL: &str = "containerd.io/gc.expire";

/// All storage capabilities over one containerd gRPC channel.
pub struct ContainerdStore {
    channel: Channel,
    namespace: AsciiMetadataValue,
    lease: Mutex<Option<AsciiMetadataValue>>,
    snapshotter_name: Mutex<String>,
    cancel: CancellationToken,
}

impl ContainerdStore {
    /// Connect to the containerd socket (`unix://` prefix optional).
    pub async fn connect(
        address: &str,
        namespace: &str,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let path = address.strip_prefix("unix://").unwrap_or(address);
        let channel = containerd_client::connect(path.to_string())
            .await
            .map_err(|e| {
                ManipError::HostRuntime(format!("failed to connect to containerd at {address}: {e}"))
            })?;
        let namespace = AsciiMetadataValue::try_from(namespace)
            .map_err(|e| ManipError::Config(format!("invalid namespace: {e}")))?;
        Ok(Self {
            channel,
            namespace,
            lease: Mutex::new(None),
            snapshotter_name: Mutex::new(String::new()),
            cancel,
        })
    }

    /// Record the snapshotter every snapshot/diff call addresses.
    pub fn set_snapshotter_name(&self, name: &str) {
        *lock(&self.snapshotter_name) = name.to_string();
    }

    /// Attach the lease ID to every subsequent request.
    pub fn set_lease(&self, lease: &Lease) -> Result<()> {
        let value = AsciiMetadataValue::try_from(lease.id.as_str())
            .map_err(|e| ManipError::Config(format!("invalid lease id: {e}")))?;
        *lock(&self.lease) = Some(value);
        Ok(())
    }

    fn snapshotter(&self) -> String {
        lock(&self.snapshotter_name).clone()
    }

    fn attach_metadata<T>(&self, request: &mut Request<T>) {
        let metadata = request.metadata_mut();
        metadata.insert(NAMESPACE_HEADER, self.namespace.clone());
        if let Some(lease) = lock(&self.lease).as_ref() {
            metadata.insert(LEASE_HEADER, lease.clone());
        }
    }

    /// Wrap a message with namespace and lease metadata; fails once
    /// cancellation was requested.
    fn request<T>(&self, message: T) -> Result<Request<T>> {
        if self.cancel.is_cancelled() {
            return Err(ManipError::Aborted);
        }
        let mut request = Request::new(message);
        self.attach_metadata(&mut request);
        Ok(request)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_api_descriptor(desc: &Descriptor) -> ApiDescriptor {
    ApiDescriptor {
        media_type: desc.media_type.clone(),
        digest: desc.digest.to_string(),
        size: desc.size,
        ..Default::default()
    }
}

fn from_api_descriptor(desc: ApiDescriptor) -> Result<Descriptor> {
    Ok(Descriptor::new(
        desc.media_type,
        Digest::parse(&desc.digest)?,
        desc.size,
    ))
}

fn to_api_mount(mount: &Mount) -> ApiMount {
    ApiMount {
        r#type: mount.kind.clone(),
        source: mount.source.clone(),
        options: mount.options.clone(),
        ..Default::default()
    }
}

fn from_api_mount(mount: ApiMount) -> Mount {
    Mount {
        kind: mount.r#type,
        source: mount.source,
        options: mount.options,
    }
}

fn to_timestamp(t: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: t.timestamp(),
        nanos: t.timestamp_subsec_nanos() as i32,
    }
}

fn from_timestamp(ts: prost_types::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, ts.nanos as u32)
}

fn to_api_image(record: &ImageRecord) -> ApiImage {
    ApiImage {
        name: record.name.clone(),
        labels: record.labels.clone(),
        target: Some(to_api_descriptor(&record.target)),
        created_at: record.created_at.map(to_timestamp),
        updated_at: record.updated_at.map(to_timestamp),
    }
}

fn from_api_image(image: ApiImage) -> Result<ImageRecord> {
    let target = image.target.ok_or_else(|| {
        ManipError::InvalidImage(format!("image {} has no target", image.name))
    })?;
    Ok(ImageRecord {
        name: image.name,
        target: from_api_descriptor(target)?,
        labels: image.labels,
        created_at: image.created_at.and_then(from_timestamp),
        updated_at: image.updated_at.and_then(from_timestamp),
    })
}

#[async_trait]
impl ContentStore for ContainerdStore {
    async fn write_blob(
        &self,
        desc: &Descriptor,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<()> {
        let ref_name = format!("image-manip-write-{}", Uuid::new_v4());
        let requests = vec![
            WriteContentRequest {
                action: WriteAction::Write as i32,
                r#ref: ref_name.clone(),
                data: data.to_vec(),
                ..Default::default()
            },
            WriteContentRequest {
                action: WriteAction::Commit as i32,
                r#ref: ref_name,
                total: data.len() as i64,
                expected: desc.digest.to_string(),
                offset: data.len() as i64,
                labels: labels.clone(),
                ..Default::default()
            },
        ];
        let mut request = Request::new(tokio_stream::iter(requests));
        self.attach_metadata(&mut request);
        if self.cancel.is_cancelled() {
            return Err(ManipError::Aborted);
        }

        let mut client = ContentClient::new(self.channel.clone());
        let written = async {
            let mut stream = client.write(request).await?.into_inner();
            while stream.message().await?.is_some() {}
            Ok::<(), tonic::Status>(())
        }
        .await;
        match written {
            Ok(()) => Ok(()),
            // Writes are idempotent by digest: the blob is already
            // there, only its labels still need to land.
            Err(status) if status.code() == tonic::Code::AlreadyExists => {
                debug!(digest = %desc.digest, "blob exists, updating labels");
                self.update_blob_labels(&desc.digest, labels).await
            }
            Err(status) => Err(status.into()),
        }
    }

    async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let request = self.request(ReadContentRequest {
            digest: digest.to_string(),
            ..Default::default()
        })?;
        let mut client = ContentClient::new(self.channel.clone());
        let mut stream = client.read(request).await?.into_inner();
        let mut data = Vec::new();
        while let Some(chunk) = stream.message().await? {
            data.extend(chunk.data);
        }
        Ok(data)
    }

    async fn info(&self, digest: &Digest) -> Result<BlobInfo> {
        let request = self.request(InfoRequest {
            digest: digest.to_string(),
        })?;
        let mut client = ContentClient::new(self.channel.clone());
        let info = client
            .info(request)
            .await?
            .into_inner()
            .info
            .ok_or_else(|| ManipError::NotFound(format!("blob {digest}")))?;
        Ok(BlobInfo {
            size: info.size,
            labels: info.labels,
        })
    }
}

impl ContainerdStore {
    async fn update_blob_labels(
        &self,
        digest: &Digest,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        let paths = labels.keys().map(|k| format!("labels.{k}")).collect();
        let request = self.request(UpdateContentRequest {
            info: Some(ApiBlobInfo {
                digest: digest.to_string(),
                labels,
                ..Default::default()
            }),
            update_mask: Some(prost_types::FieldMask { paths }),
        })?;
        let mut client = ContentClient::new(self.channel.clone());
        client.update(request).await?;
        Ok(())
    }
}

#[async_trait]
impl Snapshotter for ContainerdStore {
    async fn prepare(&self, key: &str, parent: &str) -> Result<Vec<Mount>> {
        let request = self.request(PrepareSnapshotRequest {
            snapshotter: self.snapshotter(),
            key: key.to_string(),
            parent: parent.to_string(),
            labels: HashMap::new(),
        })?;
        let mut client = SnapshotsClient::new(self.channel.clone());
        let mounts = client.prepare(request).await?.into_inner().mounts;
        Ok(mounts.into_iter().map(from_api_mount).collect())
    }

    async fn commit(&self, name: &str, key: &str) -> Result<()> {
        let request = self.request(CommitSnapshotRequest {
            snapshotter: self.snapshotter(),
            name: name.to_string(),
            key: key.to_string(),
            labels: HashMap::new(),
        })?;
        let mut client = SnapshotsClient::new(self.channel.clone());
        client.commit(request).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let request = self.request(RemoveSnapshotRequest {
            snapshotter: self.snapshotter(),
            key: key.to_string(),
        })?;
        let mut client = SnapshotsClient::new(self.channel.clone());
        client.remove(request).await?;
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<SnapshotInfo> {
        let request = self.request(StatSnapshotRequest {
            snapshotter: self.snapshotter(),
            key: key.to_string(),
        })?;
        let mut client = SnapshotsClient::new(self.channel.clone());
        let info = client
            .stat(request)
            .await?
            .into_inner()
            .info
            .ok_or_else(|| ManipError::NotFound(format!("snapshot {key}")))?;
        Ok(SnapshotInfo {
            name: info.name,
            parent: info.parent,
        })
    }

    async fn usage(&self, key: &str) -> Result<u64> {
        let request = self.request(UsageRequest {
            snapshotter: self.snapshotter(),
            key: key.to_string(),
        })?;
        let mut client = SnapshotsClient::new(self.channel.clone());
        let usage = client.usage(request).await?.into_inner();
        Ok(usage.size.max(0) as u64)
    }

    async fn mounts(&self, key: &str) -> Result<Vec<Mount>> {
        let request = self.request(MountsRequest {
            snapshotter: self.snapshotter(),
            key: key.to_string(),
        })?;
        let mut client = SnapshotsClient::new(self.channel.clone());
        let mounts = client.mounts(request).await?.into_inner().mounts;
        Ok(mounts.into_iter().map(from_api_mount).collect())
    }
}

#[async_trait]
impl Differ for ContainerdStore {
    async fn apply(&self, desc: &Descriptor, mounts: &[Mount]) -> Result<()> {
        let request = self.request(ApplyRequest {
            diff: Some(to_api_descriptor(desc)),
            mounts: mounts.iter().map(to_api_mount).collect(),
            ..Default::default()
        })?;
        let mut client = DiffClient::new(self.channel.clone());
        client.apply(request).await?;
        Ok(())
    }

    async fn create_diff(&self, key: &str, parent: &str) -> Result<Descriptor> {
        let snapshotter = self.snapshotter();
        let view_key = format!("{key}-view");

        let view_request = self.request(ViewSnapshotRequest {
            snapshotter: snapshotter.clone(),
            key: view_key.clone(),
            parent: parent.to_string(),
            labels: HashMap::new(),
        })?;
        let mut snapshots = SnapshotsClient::new(self.channel.clone());
        let lower = snapshots.view(view_request).await?.into_inner().mounts;

        let upper_request = self.request(MountsRequest {
            snapshotter: snapshotter.clone(),
            key: key.to_string(),
        })?;
        let upper = snapshots.mounts(upper_request).await?.into_inner().mounts;

        let diff_request = self.request(DiffRequest {
            left: lower,
            right: upper,
            r#ref: format!("diff-{key}"),
            ..Default::default()
        })?;
        let mut differ = DiffClient::new(self.channel.clone());
        let result = differ.diff(diff_request).await;

        // The view only existed to produce lower mounts.
        match self.request(RemoveSnapshotRequest {
            snapshotter,
            key: view_key.clone(),
        }) {
            Ok(remove_request) => {
                if let Err(err) = snapshots.remove(remove_request).await {
                    warn!(key = %view_key, error = %err, "failed to remove view snapshot");
                }
            }
            Err(err) => warn!(key = %view_key, error = %err, "failed to remove view snapshot"),
        }

        let diff = result?
            .into_inner()
            .diff
            .ok_or_else(|| ManipError::HostRuntime("differ returned no descriptor".to_string()))?;
        from_api_descriptor(diff)
    }
}

#[async_trait]
impl ImageIndex for ContainerdStore {
    async fn get(&self, name: &str) -> Result<ImageRecord> {
        let request = self.request(GetImageRequest {
            name: name.to_string(),
        })?;
        let mut client = ImagesClient::new(self.channel.clone());
        let image = client
            .get(request)
            .await?
            .into_inner()
            .image
            .ok_or_else(|| ManipError::NotFound(format!("image {name}")))?;
        from_api_image(image)
    }

    async fn list(&self) -> Result<Vec<ImageRecord>> {
        let request = self.request(ListImagesRequest {
            ..Default::default()
        })?;
        let mut client = ImagesClient::new(self.channel.clone());
        let images = client.list(request).await?.into_inner().images;
        images.into_iter().map(from_api_image).collect()
    }

    async fn create(&self, record: &ImageRecord) -> Result<ImageRecord> {
        let request = self.request(CreateImageRequest {
            image: Some(to_api_image(record)),
            ..Default::default()
        })?;
        let mut client = ImagesClient::new(self.channel.clone());
        let image = client
            .create(request)
            .await?
            .into_inner()
            .image
            .ok_or_else(|| ManipError::HostRuntime("image create returned nothing".to_string()))?;
        from_api_image(image)
    }

    async fn update(&self, record: &ImageRecord) -> Result<ImageRecord> {
        let request = self.request(UpdateImageRequest {
            image: Some(to_api_image(record)),
            ..Default::default()
        })?;
        let mut client = ImagesClient::new(self.channel.clone());
        let image = client
            .update(request)
            .await?
            .into_inner()
            .image
            .ok_or_else(|| ManipError::HostRuntime("image update returned nothing".to_string()))?;
        from_api_image(image)
    }
}

#[async_trait]
impl Leaser for ContainerdStore {
    async fn create_lease(&self, ttl: Duration) -> Result<Lease> {
        let expire = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| ManipError::Config(format!("invalid lease ttl: {e}")))?;
        let request = self.request(CreateLeaseRequest {
            id: format!("image-manip-{}", Uuid::new_v4()),
            labels: HashMap::from([(GC_EXPIRE_LABEL.to_string(), expire.to_rfc3339())]),
        })?;
        let mut client = LeasesClient::new(self.channel.clone());
        let lease = client
            .create(request)
            .await?
            .into_inner()
            .lease
            .ok_or_else(|| ManipError::HostRuntime("lease create returned nothing".to_string()))?;
        debug!(lease = %lease.id, "lease created");
        Ok(Lease { id: lease.id })
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let request = self.request(DeleteLeaseRequest {
            id: lease.id.clone(),
            sync: false,
        })?;
        let mut client = LeasesClient::new(self.channel.clone());
        client.delete(request).await?;
        Ok(())
    }
}

/// Mounts snapshotter views onto a host directory via `mount(2)`.
pub struct SysMounter;

impl SysMounter {
    pub fn new() -> Self {
        SysMounter
    }
}

impl Default for SysMounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Split containerd mount options into mount flags and fs-specific data.
fn split_mount_options(options: &[String]) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for option in options {
        match option.as_str() {
            "ro" => flags |= MsFlags::MS_RDONLY,
            "rw" => {}
            "bind" => flags |= MsFlags::MS_BIND,
            "rbind" => flags |= MsFlags::MS_BIND | MsFlags::MS_REC,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            other => data.push(other.to_string()),
        }
    }
    (flags, data.join(","))
}

#[async_trait]
impl Mounter for SysMounter {
    async fn mount(&self, mounts: &[Mount], target: &Path) -> Result<()> {
        for m in mounts {
            let (flags, data) = split_mount_options(&m.options);
            let data = if data.is_empty() {
                None
            } else {
                Some(data)
            };
            nix::mount::mount(
                Some(m.source.as_str()),
                target,
                Some(m.kind.as_str()),
                flags,
                data.as_deref(),
            )
            .map_err(|e| {
                ManipError::HostRuntime(format!(
                    "failed to mount {} at {}: {e}",
                    m.source,
                    target.display()
                ))
            })?;
        }
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        nix::mount::umount2(target, MntFlags::empty()).map_err(|e| {
            ManipError::HostRuntime(format!("failed to unmount {}: {e}", target.display()))
        })
    }
}
