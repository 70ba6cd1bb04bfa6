//! Image resolution and loading.
//!
//! A reference resolves to exactly one image record (exact name first,
//! then unique digest prefix). Loading reads the manifest and config
//! blobs, rejects multi-platform targets and enforces the layer /
//! diff-ID parity invariant.

use image_manip_core::manifest::Manifest;
use image_manip_core::{media, Descriptor, Digest, LayerChain, ManipError, Result};
use oci_spec::image::ImageConfiguration;
use tracing::debug;

use crate::runtime::Runtime;
use crate::store::ImageRecord;

/// An image loaded from the store, with its manifest and config parsed
/// and its layer chain validated.
#[derive(Debug, Clone)]
pub struct Image {
    name: String,
    target: Descriptor,
    manifest: Manifest,
    config: ImageConfiguration,
    layers: LayerChain,
}

impl Image {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Manifest descriptor the name is bound to.
    pub fn target(&self) -> &Descriptor {
        &self.target
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config(&self) -> &ImageConfiguration {
        &self.config
    }

    pub fn layers(&self) -> &LayerChain {
        &self.layers
    }

    /// Rootfs diff-IDs parsed from the config.
    pub fn diff_ids(&self) -> &[Digest] {
        self.layers.diff_ids()
    }
}

impl Runtime {
    /// Resolve a reference to exactly one image record.
    ///
    /// Matches the exact image name first, then the target digest or a
    /// unique prefix of its hex part.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches, `Ambiguous` when the prefix
    /// matches more than one image.
    pub async fn find_image(&self, image_ref: &str) -> Result<ImageRecord> {
        let records = self.images().list().await?;

        if let Some(record) = records.iter().find(|r| r.name == image_ref) {
            return Ok(record.clone());
        }

        let query = image_ref.strip_prefix("sha256:").unwrap_or(image_ref);
        let matches: Vec<&ImageRecord> = records
            .iter()
            .filter(|r| {
                r.target.digest.as_str() == image_ref
                    || r.target.digest.encoded().starts_with(query)
            })
            .collect();

        match matches.len() {
            0 => Err(ManipError::NotFound(format!("image {image_ref:?}"))),
            1 => Ok(matches[0].clone()),
            _ => Err(ManipError::Ambiguous(image_ref.to_string())),
        }
    }

    /// Load a fully validated image.
    ///
    /// # Errors
    ///
    /// `Unsupported` for index targets, `InvalidImage` for malformed
    /// blobs or a layer / diff-ID length mismatch, plus resolution
    /// errors from [`Runtime::find_image`].
    pub async fn load_image(&self, image_ref: &str) -> Result<Image> {
        let record = self.find_image(image_ref).await?;
        let target = record.target.clone();

        if !media::is_manifest_type(&target.media_type) {
            return Err(ManipError::Unsupported(target.media_type.clone()));
        }

        let manifest_bytes = self.content().read_blob(&target.digest).await?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| ManipError::InvalidImage(format!("failed to parse manifest: {e}")))?;

        let config_bytes = self.content().read_blob(&manifest.config.digest).await?;
        let config: ImageConfiguration = serde_json::from_slice(&config_bytes)
            .map_err(|e| ManipError::InvalidImage(format!("failed to parse config: {e}")))?;

        if manifest.layers.len() != config.rootfs().diff_ids().len() {
            return Err(ManipError::InvalidImage(format!(
                "manifest has {} layers but config has {} diff IDs",
                manifest.layers.len(),
                config.rootfs().diff_ids().len()
            )));
        }

        let diff_ids = config
            .rootfs()
            .diff_ids()
            .iter()
            .map(|s| Digest::parse(s))
            .collect::<Result<Vec<Digest>>>()
            .map_err(|e| ManipError::InvalidImage(format!("bad diff ID: {e}")))?;
        let layers = LayerChain::new(&manifest.layers, &diff_ids)?;

        debug!(image = %record.name, layers = layers.len(), "image loaded");

        Ok(Image {
            name: record.name,
            target,
            manifest,
            config,
            layers,
        })
    }
}
