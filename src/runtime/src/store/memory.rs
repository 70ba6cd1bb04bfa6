//! In-memory capability implementations.
//!
//! One shared backend simulates the content store, a snapshot tree
//! (each node holding its materialized rootfs as a path→bytes map), the
//! image index and leases. The differ produces real gzipped tarballs —
//! deletions become `.wh.` whiteout entries — so diff-IDs and chain IDs
//! behave exactly like the production bindings. Used by the test suites
//! of this crate and of the CLI.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use image_manip_core::{media, Descriptor, Digest, ManipError, Result};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    BlobInfo, ContentStore, Differ, ImageIndex, ImageRecord, Lease, Leaser, Mount, Mounter,
    SnapshotInfo, Snapshotter,
};
use crate::runtime::Runtime;

#[derive(Debug, Default, Clone)]
struct BlobEntry {
    data: Vec<u8>,
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Clone)]
struct SnapNode {
    parent: String,
    committed: bool,
    /// Materialized rootfs: relative path → file bytes
    files: BTreeMap<String, Vec<u8>>,
}

/// Shared state behind every in-memory capability.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, BlobEntry>>,
    snapshots: RwLock<HashMap<String, SnapNode>>,
    images: RwLock<HashMap<String, ImageRecord>>,
    leases: RwLock<Vec<Lease>>,
    released: RwLock<Vec<String>>,
    mounted: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryBackend {
    /// A runtime wired entirely to `backend`.
    pub fn runtime(backend: &Arc<MemoryBackend>) -> Runtime {
        Runtime::with_capabilities(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            "memory",
            "default",
        )
    }

    /// Store a blob computed from `data`, returning its descriptor.
    pub async fn put_blob(
        &self,
        media_type: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Descriptor {
        let desc = Descriptor::new(media_type, Digest::from_bytes(data), data.len() as i64);
        let mut blobs = self.blobs.write().await;
        let entry = blobs.entry(desc.digest.to_string()).or_default();
        entry.data = data.to_vec();
        entry.labels.extend(labels);
        desc
    }

    /// Labels recorded on a blob, if it exists.
    pub async fn blob_labels(&self, digest: &Digest) -> Option<HashMap<String, String>> {
        self.blobs
            .read()
            .await
            .get(digest.as_str())
            .map(|entry| entry.labels.clone())
    }

    pub async fn image(&self, name: &str) -> Option<ImageRecord> {
        self.images.read().await.get(name).cloned()
    }

    pub async fn snapshot_exists(&self, name: &str) -> bool {
        self.snapshots
            .read()
            .await
            .get(name)
            .map(|node| node.committed)
            .unwrap_or(false)
    }

    /// The materialized rootfs of a committed snapshot.
    pub async fn snapshot_files(&self, name: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        self.snapshots
            .read()
            .await
            .get(name)
            .map(|node| node.files.clone())
    }

    pub async fn released_leases(&self) -> Vec<String> {
        self.released.read().await.clone()
    }
}

/// Build a gzipped layer tarball from `files`, returning the compressed
/// bytes and the diff-ID of the uncompressed tar.
pub fn build_layer(files: &[(&str, &[u8])]) -> (Vec<u8>, Digest) {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *content)
            .expect("append tar entry");
    }
    let tar_bytes = builder.into_inner().expect("finish tar");
    let diff_id = Digest::from_bytes(&tar_bytes);
    (gzip(&tar_bytes), diff_id)
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Remove `path` (and anything under it) from a rootfs map.
fn remove_path(files: &mut BTreeMap<String, Vec<u8>>, path: &str) {
    let prefix = format!("{path}/");
    files.retain(|name, _| name != path && !name.starts_with(&prefix));
}

const WHITEOUT_PREFIX: &str = ".wh.";

#[async_trait]
impl ContentStore for MemoryBackend {
    async fn write_blob(
        &self,
        desc: &Descriptor,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<()> {
        let computed = Digest::from_bytes(data);
        if computed != desc.digest {
            return Err(ManipError::HostRuntime(format!(
                "content digest {computed} does not match descriptor {}",
                desc.digest
            )));
        }
        let mut blobs = self.blobs.write().await;
        let entry = blobs.entry(desc.digest.to_string()).or_default();
        entry.data = data.to_vec();
        entry.labels.extend(labels);
        Ok(())
    }

    async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(digest.as_str())
            .map(|entry| entry.data.clone())
            .ok_or_else(|| ManipError::NotFound(format!("blob {digest}")))
    }

    async fn info(&self, digest: &Digest) -> Result<BlobInfo> {
        self.blobs
            .read()
            .await
            .get(digest.as_str())
            .map(|entry| BlobInfo {
                size: entry.data.len() as i64,
                labels: entry.labels.clone(),
            })
            .ok_or_else(|| ManipError::NotFound(format!("blob {digest}")))
    }
}

#[async_trait]
impl Snapshotter for MemoryBackend {
    async fn prepare(&self, key: &str, parent: &str) -> Result<Vec<Mount>> {
        let mut snapshots = self.snapshots.write().await;
        if snapshots.contains_key(key) {
            return Err(ManipError::AlreadyExists(format!("snapshot {key}")));
        }
        let files = if parent.is_empty() {
            BTreeMap::new()
        } else {
            let node = snapshots
                .get(parent)
                .filter(|node| node.committed)
                .ok_or_else(|| ManipError::NotFound(format!("parent snapshot {parent}")))?;
            node.files.clone()
        };
        snapshots.insert(
            key.to_string(),
            SnapNode {
                parent: parent.to_string(),
                committed: false,
                files,
            },
        );
        Ok(vec![Mount {
            kind: "memory".to_string(),
            source: key.to_string(),
            options: Vec::new(),
        }])
    }

    async fn commit(&self, name: &str, key: &str) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        if snapshots
            .get(name)
            .map(|node| node.committed)
            .unwrap_or(false)
        {
            return Err(ManipError::AlreadyExists(format!("snapshot {name}")));
        }
        let node = snapshots
            .remove(key)
            .ok_or_else(|| ManipError::NotFound(format!("snapshot {key}")))?;
        snapshots.insert(
            name.to_string(),
            SnapNode {
                committed: true,
                ..node
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.snapshots
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ManipError::NotFound(format!("snapshot {key}")))
    }

    async fn stat(&self, key: &str) -> Result<SnapshotInfo> {
        self.snapshots
            .read()
            .await
            .get(key)
            .filter(|node| node.committed)
            .map(|node| SnapshotInfo {
                name: key.to_string(),
                parent: node.parent.clone(),
            })
            .ok_or_else(|| ManipError::NotFound(format!("snapshot {key}")))
    }

    async fn usage(&self, key: &str) -> Result<u64> {
        self.snapshots
            .read()
            .await
            .get(key)
            .map(|node| node.files.values().map(|data| data.len() as u64).sum())
            .ok_or_else(|| ManipError::NotFound(format!("snapshot {key}")))
    }

    async fn mounts(&self, key: &str) -> Result<Vec<Mount>> {
        let snapshots = self.snapshots.read().await;
        if !snapshots.contains_key(key) {
            return Err(ManipError::NotFound(format!("snapshot {key}")));
        }
        Ok(vec![Mount {
            kind: "memory".to_string(),
            source: key.to_string(),
            options: Vec::new(),
        }])
    }
}

#[async_trait]
impl Differ for MemoryBackend {
    async fn apply(&self, desc: &Descriptor, mounts: &[Mount]) -> Result<()> {
        let key = mounts
            .first()
            .map(|m| m.source.clone())
            .ok_or_else(|| ManipError::HostRuntime("no mounts to apply onto".to_string()))?;
        let blob = self.read_blob(&desc.digest).await?;
        let tar_bytes = gunzip(&blob)?;

        let mut snapshots = self.snapshots.write().await;
        let node = snapshots
            .get_mut(&key)
            .ok_or_else(|| ManipError::NotFound(format!("snapshot {key}")))?;

        let mut archive = tar::Archive::new(&tar_bytes[..]);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let path = path.trim_start_matches("./").trim_end_matches('/').to_string();
            if path.is_empty() {
                continue;
            }

            let (dir, name) = match path.rsplit_once('/') {
                Some((dir, name)) => (format!("{dir}/"), name.to_string()),
                None => (String::new(), path.clone()),
            };
            if let Some(victim) = name.strip_prefix(WHITEOUT_PREFIX) {
                remove_path(&mut node.files, &format!("{dir}{victim}"));
                continue;
            }
            if entry.header().entry_type().is_file() {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                node.files.insert(path, data);
            }
        }
        Ok(())
    }

    async fn create_diff(&self, key: &str, parent: &str) -> Result<Descriptor> {
        let snapshots = self.snapshots.read().await;
        let child = snapshots
            .get(key)
            .ok_or_else(|| ManipError::NotFound(format!("snapshot {key}")))?;
        let parent_files = if parent.is_empty() {
            BTreeMap::new()
        } else {
            snapshots
                .get(parent)
                .ok_or_else(|| ManipError::NotFound(format!("snapshot {parent}")))?
                .files
                .clone()
        };

        let mut builder = tar::Builder::new(Vec::new());
        for deleted in parent_files.keys().filter(|k| !child.files.contains_key(*k)) {
            let whiteout = match deleted.rsplit_once('/') {
                Some((dir, name)) => format!("{dir}/{WHITEOUT_PREFIX}{name}"),
                None => format!("{WHITEOUT_PREFIX}{deleted}"),
            };
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, whiteout, std::io::empty())?;
        }
        for (path, data) in &child.files {
            if parent_files.get(path) == Some(data) {
                continue;
            }
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_slice())?;
        }
        let tar_bytes = builder.into_inner()?;
        drop(snapshots);

        let diff_id = Digest::from_bytes(&tar_bytes);
        let compressed = gzip(&tar_bytes);
        let labels = HashMap::from([(
            media::UNCOMPRESSED_LABEL.to_string(),
            diff_id.to_string(),
        )]);
        Ok(self
            .put_blob(media::LAYER_TAR_GZIP, &compressed, labels)
            .await)
    }
}

#[async_trait]
impl ImageIndex for MemoryBackend {
    async fn get(&self, name: &str) -> Result<ImageRecord> {
        self.images
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ManipError::NotFound(format!("image {name}")))
    }

    async fn list(&self) -> Result<Vec<ImageRecord>> {
        let mut records: Vec<ImageRecord> = self.images.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn create(&self, record: &ImageRecord) -> Result<ImageRecord> {
        let mut images = self.images.write().await;
        if images.contains_key(&record.name) {
            return Err(ManipError::AlreadyExists(format!("image {}", record.name)));
        }
        let mut record = record.clone();
        record.created_at = Some(Utc::now());
        images.insert(record.name.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, record: &ImageRecord) -> Result<ImageRecord> {
        let mut images = self.images.write().await;
        let existing = images
            .get(&record.name)
            .ok_or_else(|| ManipError::NotFound(format!("image {}", record.name)))?;
        let mut record = record.clone();
        record.created_at = existing.created_at;
        images.insert(record.name.clone(), record.clone());
        Ok(record)
    }
}

#[async_trait]
impl Leaser for MemoryBackend {
    async fn create_lease(&self, _ttl: Duration) -> Result<Lease> {
        let lease = Lease {
            id: format!("memory-{}", Uuid::new_v4()),
        };
        self.leases.write().await.push(lease.clone());
        Ok(lease)
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        self.released.write().await.push(lease.id.clone());
        Ok(())
    }
}

#[async_trait]
impl Mounter for MemoryBackend {
    async fn mount(&self, mounts: &[Mount], target: &Path) -> Result<()> {
        let key = mounts
            .first()
            .map(|m| m.source.clone())
            .ok_or_else(|| ManipError::HostRuntime("nothing to mount".to_string()))?;
        let files = self
            .snapshots
            .read()
            .await
            .get(&key)
            .map(|node| node.files.clone())
            .ok_or_else(|| ManipError::NotFound(format!("snapshot {key}")))?;

        for (path, data) in files {
            let full = target.join(&path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full, data)?;
        }
        self.mounted
            .write()
            .await
            .insert(target.to_path_buf(), key);
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let key = self
            .mounted
            .write()
            .await
            .remove(target)
            .ok_or_else(|| ManipError::NotFound(format!("mount {}", target.display())))?;

        let mut files = BTreeMap::new();
        collect_files(target, target, &mut files)?;
        if let Some(node) = self.snapshots.write().await.get_mut(&key) {
            node.files = files;
        }
        Ok(())
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut BTreeMap<String, Vec<u8>>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| ManipError::HostRuntime(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            out.insert(relative, std::fs::read(&path)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::default())
    }

    #[tokio::test]
    async fn test_write_blob_is_idempotent_and_merges_labels() {
        let backend = backend();
        let desc = backend.put_blob("text/plain", b"data", HashMap::new()).await;

        backend
            .write_blob(
                &desc,
                b"data",
                HashMap::from([("k".to_string(), "v".to_string())]),
            )
            .await
            .unwrap();

        let info = backend.info(&desc.digest).await.unwrap();
        assert_eq!(info.labels.get("k"), Some(&"v".to_string()));
        assert_eq!(info.size, 4);
    }

    #[tokio::test]
    async fn test_write_blob_rejects_digest_mismatch() {
        let backend = backend();
        let desc = Descriptor::new("text/plain", Digest::from_bytes(b"other"), 4);
        assert!(backend
            .write_blob(&desc, b"data", HashMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_prepare_requires_committed_parent() {
        let backend = backend();
        let err = backend.prepare("key", "sha256:missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_commit_then_recommit_is_already_exists() {
        let backend = backend();
        backend.prepare("key-a", "").await.unwrap();
        backend.commit("chain-1", "key-a").await.unwrap();

        backend.prepare("key-b", "").await.unwrap();
        let err = backend.commit("chain-1", "key-b").await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_apply_and_diff_round_trip() {
        let backend = backend();
        let (blob, diff_id) = build_layer(&[("etc/app.conf", b"v1")]);
        let desc = backend
            .put_blob(
                media::LAYER_TAR_GZIP,
                &blob,
                HashMap::from([(media::UNCOMPRESSED_LABEL.to_string(), diff_id.to_string())]),
            )
            .await;

        let mounts = backend.prepare("key", "").await.unwrap();
        backend.apply(&desc, &mounts).await.unwrap();

        let diff_desc = backend.create_diff("key", "").await.unwrap();
        let info = backend.info(&diff_desc.digest).await.unwrap();
        let uncompressed = info.labels.get(media::UNCOMPRESSED_LABEL).unwrap();
        // A diff of a layer applied onto an empty parent reproduces the
        // layer's content, so the diff-ID matches.
        assert_eq!(uncompressed, diff_id.as_str());
    }

    #[tokio::test]
    async fn test_diff_emits_whiteouts_for_deletions() {
        let backend = backend();
        backend.prepare("base-key", "").await.unwrap();
        {
            let mut snapshots = backend.snapshots.write().await;
            let node = snapshots.get_mut("base-key").unwrap();
            node.files.insert("etc/secret".to_string(), b"x".to_vec());
        }
        backend.commit("base", "base-key").await.unwrap();

        backend.prepare("child", "base").await.unwrap();
        {
            let mut snapshots = backend.snapshots.write().await;
            let node = snapshots.get_mut("child").unwrap();
            node.files.remove("etc/secret");
        }

        let diff_desc = backend.create_diff("child", "base").await.unwrap();
        let blob = backend.read_blob(&diff_desc.digest).await.unwrap();
        let tar_bytes = gunzip(&blob).unwrap();
        let mut archive = tar::Archive::new(&tar_bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["etc/.wh.secret".to_string()]);
    }

    #[tokio::test]
    async fn test_image_index_update_requires_existing() {
        let backend = backend();
        let record = ImageRecord {
            name: "app:latest".to_string(),
            target: Descriptor::new(media::MANIFEST_V2, Digest::from_bytes(b"m"), 1),
            labels: HashMap::new(),
            created_at: None,
            updated_at: None,
        };
        assert!(backend.update(&record).await.unwrap_err().is_not_found());
        backend.create(&record).await.unwrap();
        assert!(backend.update(&record).await.is_ok());
    }
}
