//! Diff engine: apply layers onto ephemeral snapshots and export the
//! result as new layers.
//!
//! Every operation here works with an ephemeral snapshotter key that is
//! committed under its content-derived chain ID on success and removed
//! best-effort on failure. The lease held by the runtime handle covers
//! anything cleanup misses.

use std::path::Path;
use std::time::Instant;

use image_manip_core::{media, Descriptor, Digest, Layer, LayerChain, ManipError, Result, Snapshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::runtime::Runtime;
use crate::store::Mount;

/// A unique ephemeral snapshotter key.
fn unique_key(prefix: &str) -> String {
    format!("image-manip-{prefix}-{}", Uuid::new_v4())
}

impl Runtime {
    /// Apply `layers` in order on top of `parent` and export the result
    /// as one new layer, committed under its chain ID.
    ///
    /// Returns the new layer and the committed snapshot's chain ID.
    /// `AlreadyExists` on commit means another operation already
    /// produced the same content and is treated as success.
    pub(crate) async fn create_snapshot(
        &self,
        parent: &Snapshot,
        layers: &LayerChain,
    ) -> Result<(Layer, Digest)> {
        let key = unique_key("rewrite");
        let mounts = self
            .snapshotter()
            .prepare(&key, parent.name().as_str())
            .await?;

        match self.apply_and_export(&key, parent, layers, &mounts).await {
            Ok(result) => Ok(result),
            Err(err) => {
                // The lease still covers the key if this remove fails.
                if let Err(rm_err) = self.snapshotter().remove(&key).await {
                    warn!(key = %key, error = %rm_err, "failed to cleanup aborted apply");
                }
                Err(err)
            }
        }
    }

    async fn apply_and_export(
        &self,
        key: &str,
        parent: &Snapshot,
        layers: &LayerChain,
        mounts: &[Mount],
    ) -> Result<(Layer, Digest)> {
        let start = Instant::now();
        for layer in layers.iter() {
            self.check_cancelled()?;
            self.apply_layer_to_mount(mounts, layer.desc()).await?;
        }
        info!(
            count = layers.len(),
            elapsed = ?start.elapsed(),
            "applied layers to snapshot"
        );

        let new_layer = self.create_diff(key, parent.name().as_str()).await?;

        let snapshot_id = parent.new_child(new_layer.diff_id().clone()).name().clone();
        match self.snapshotter().commit(snapshot_id.as_str(), key).await {
            Err(err) if err.is_already_exists() => {}
            other => other?,
        }
        Ok((new_layer, snapshot_id))
    }

    /// Unpack one compressed layer blob into writable mounts.
    pub(crate) async fn apply_layer_to_mount(
        &self,
        mounts: &[Mount],
        desc: &Descriptor,
    ) -> Result<()> {
        info!(layer = %desc.digest, "apply layer to mount");
        let start = Instant::now();
        self.differ()
            .apply(desc, mounts)
            .await
            .map_err(|err| ManipError::ApplyFailed {
                digest: desc.digest.to_string(),
                message: err.to_string(),
            })?;
        info!(layer = %desc.digest, elapsed = ?start.elapsed(), "layer applied");
        Ok(())
    }

    /// Export the diff between `key` and `parent` as a new layer.
    ///
    /// # Errors
    ///
    /// `DiffMissingDiffId` when the differ's output blob lacks a
    /// parseable uncompressed digest label.
    pub(crate) async fn create_diff(&self, key: &str, parent: &str) -> Result<Layer> {
        info!(key = %key, "create diff for snapshot");
        let start = Instant::now();

        let desc = self.differ().create_diff(key, parent).await?;
        let blob_info = self.content().info(&desc.digest).await?;

        let diff_id = blob_info
            .labels
            .get(media::UNCOMPRESSED_LABEL)
            .ok_or_else(|| ManipError::DiffMissingDiffId(desc.digest.to_string()))
            .and_then(|raw| {
                Digest::parse(raw)
                    .map_err(|_| ManipError::DiffMissingDiffId(desc.digest.to_string()))
            })?;

        info!(key = %key, elapsed = ?start.elapsed(), "diff for snapshot created");
        Ok(Layer::new(
            Descriptor::new(media::LAYER_TAR_GZIP, desc.digest, blob_info.size),
            diff_id,
        ))
    }

    /// Delete one path from a rootfs built from the full original chain
    /// and export the change as a single layer.
    ///
    /// The prepared snapshot is mounted under a temporary directory in
    /// `XDG_RUNTIME_DIR`; the unmount runs on every exit path. The
    /// deletion itself is a plain filesystem remove; encoding it as a
    /// whiteout is the differ's concern when it exports the diff.
    pub(crate) async fn create_removal_layer(
        &self,
        diff_ids: &[Digest],
        file: &str,
    ) -> Result<(Layer, Digest)> {
        let key = unique_key("file-removal");
        let parent = Snapshot::new(diff_ids);

        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());
        let mount_target = tempfile::Builder::new()
            .prefix("remove-file-")
            .tempdir_in(runtime_dir)?;

        self.snapshotter()
            .prepare(&key, parent.name().as_str())
            .await?;
        let mounts = self.snapshotter().mounts(&key).await?;
        self.mounter().mount(&mounts, mount_target.path()).await?;

        let removal = self
            .remove_path_and_diff(&key, &parent, mount_target.path(), file)
            .await;

        if let Err(err) = self.mounter().unmount(mount_target.path()).await {
            warn!(target = %mount_target.path().display(), error = %err, "failed to unmount rootfs");
        }

        let new_layer = match removal {
            Ok(layer) => layer,
            Err(err) => {
                if let Err(rm_err) = self.snapshotter().remove(&key).await {
                    warn!(key = %key, error = %rm_err, "failed to cleanup aborted removal");
                }
                return Err(err);
            }
        };

        let snapshot_id = parent.new_child(new_layer.diff_id().clone()).name().clone();
        match self.snapshotter().commit(snapshot_id.as_str(), &key).await {
            Err(err) if err.is_already_exists() => {}
            other => other?,
        }
        Ok((new_layer, snapshot_id))
    }

    async fn remove_path_and_diff(
        &self,
        key: &str,
        parent: &Snapshot,
        mount_target: &Path,
        file: &str,
    ) -> Result<Layer> {
        let victim = mount_target.join(file.trim_start_matches('/'));
        info!(path = %victim.display(), "removing path from rootfs");

        match tokio::fs::metadata(&victim).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&victim).await?,
            Ok(_) => tokio::fs::remove_file(&victim).await?,
            // Removing a path that does not exist is a no-op, matching
            // recursive-remove semantics.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        self.create_diff(key, parent.name().as_str()).await
    }

    /// Ensure every prefix of the layer chain exists as a committed
    /// snapshot; a no-op for chains that are already unpacked.
    pub async fn unpack_image(&self, layers: &LayerChain) -> Result<()> {
        let mut parent = Snapshot::new(&[]);
        for layer in layers.iter() {
            self.check_cancelled()?;
            let child = parent.new_child(layer.diff_id().clone());
            if self.snapshotter().stat(child.name().as_str()).await.is_ok() {
                parent = child;
                continue;
            }

            let key = unique_key("unpack");
            let mounts = self
                .snapshotter()
                .prepare(&key, parent.name().as_str())
                .await?;
            let applied = self.apply_layer_to_mount(&mounts, layer.desc()).await;
            let committed = match applied {
                Ok(()) => match self.snapshotter().commit(child.name().as_str(), &key).await {
                    Err(err) if err.is_already_exists() => Ok(()),
                    other => other,
                },
                Err(err) => Err(err),
            };
            if let Err(err) = committed {
                if let Err(rm_err) = self.snapshotter().remove(&key).await {
                    warn!(key = %key, error = %rm_err, "failed to cleanup aborted unpack");
                }
                return Err(err);
            }
            parent = child;
        }
        Ok(())
    }
}
