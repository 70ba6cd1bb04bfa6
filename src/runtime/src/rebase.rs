//! Rewrite operations: rebase, squash, remove.
//!
//! All three reduce to the same executor: compute a base (config +
//! layer chain) and a rewrite window, walk a pick/fixup plan over the
//! window producing new layers, then write the new config and manifest
//! and bind the name. A pending group of length one is reused
//! byte-for-byte without touching the differ.

use image_manip_core::options::{RebaseOptions, RemoveOptions, SquashOptions, DEFAULT_SQUASH_MARKER};
use image_manip_core::{Descriptor, Digest, Layer, LayerChain, ManipError, Result, Snapshot};
use oci_spec::image::ImageConfiguration;
use tracing::info;

use crate::plan::{Action, Plan};
use crate::runtime::Runtime;

/// The base an executor builds on: its config and full layer chain.
struct RewriteBase {
    config: ImageConfiguration,
    layers: LayerChain,
}

impl Runtime {
    /// Rebase an image at a base-layer digest, optionally onto a new
    /// base image, optionally squashing the rewritten window.
    ///
    /// Returns the manifest descriptor bound to the result name.
    pub async fn rebase(&self, opts: &RebaseOptions) -> Result<Descriptor> {
        info!(
            image = %opts.image,
            base_layer = %opts.base_layer_digest,
            new_base = opts.new_base_image.as_deref().unwrap_or("<self>"),
            auto_squash = opts.auto_squash,
            "start rebase"
        );
        let image = self.load_image(&opts.image).await?;

        let base_digest = Digest::parse(&opts.base_layer_digest)?;
        let index = image
            .layers()
            .descriptors()
            .iter()
            .position(|d| d.digest == base_digest)
            .ok_or_else(|| ManipError::BaseLayerNotFound {
                image: opts.image.clone(),
                digest: base_digest.to_string(),
            })?;
        let keep = index + 1;

        if keep == image.layers().len() && opts.new_base_image.is_none() {
            info!(image = %opts.image, "base layer is the top layer, nothing to rebase");
            return Ok(image.target().clone());
        }

        let window = image.layers().slice(keep..image.layers().len());
        let base = match &opts.new_base_image {
            Some(new_base_ref) => {
                let new_base = self.load_image(new_base_ref).await?;
                RewriteBase {
                    config: new_base.config().clone(),
                    layers: new_base.layers().clone(),
                }
            }
            None => RewriteBase {
                config: self.truncated_base_config(image.config(), keep)?,
                layers: image.layers().slice(0..keep),
            },
        };

        let plan = if opts.auto_squash {
            Plan::squash_all(window.len())
        } else {
            Plan::preserve(window.len())
        };

        let new_layers = self.execute_plan(&base, &window, &plan).await?;

        let new_name = opts.new_image_name.as_deref().unwrap_or(&opts.image);
        self.write_image(new_name, &base.config, &base.layers, &new_layers)
            .await
    }

    /// Squash everything above a base layer into one layer, clobbering
    /// the image's own tag.
    ///
    /// Without an explicit digest, the most recent history entry whose
    /// comment contains the build-frontend marker picks the base layer.
    pub async fn squash(&self, opts: &SquashOptions) -> Result<Descriptor> {
        let base_layer_digest = match &opts.base_layer_digest {
            Some(digest) => digest.clone(),
            None => {
                let matches = self
                    .comment_contains(&opts.image, DEFAULT_SQUASH_MARKER)
                    .await?;
                let digest = matches.first().ok_or_else(|| {
                    ManipError::NotFound(format!(
                        "no history entry with comment containing {DEFAULT_SQUASH_MARKER:?} in image {:?}",
                        opts.image
                    ))
                })?;
                info!(image = %opts.image, base_layer = %digest, "auto-detected squash base layer");
                digest.to_string()
            }
        };

        self.rebase(&RebaseOptions {
            image: opts.image.clone(),
            base_layer_digest,
            new_base_image: None,
            new_image_name: None,
            auto_squash: true,
        })
        .await
    }

    /// Append a layer that deletes one path from the image rootfs.
    pub async fn remove(&self, opts: &RemoveOptions) -> Result<Descriptor> {
        info!(image = %opts.image, file = %opts.file, "start file removal");
        let image = self.load_image(&opts.image).await?;

        let (new_layer, _) = self
            .create_removal_layer(image.diff_ids(), &opts.file)
            .await?;
        let new_layers = LayerChain::from_layer(new_layer);

        let new_name = opts.new_image_name.as_deref().unwrap_or(&opts.image);
        self.write_image(new_name, image.config(), image.layers(), &new_layers)
            .await
    }

    /// Walk the plan over the window, producing one new layer per
    /// group.
    async fn execute_plan(
        &self,
        base: &RewriteBase,
        window: &LayerChain,
        plan: &Plan,
    ) -> Result<LayerChain> {
        let mut current_parent = Snapshot::new(base.layers.diff_ids());
        let mut pending = LayerChain::default();
        let mut new_layers = LayerChain::default();

        for (i, action) in plan.actions().iter().enumerate() {
            self.check_cancelled()?;
            let layer = window.get(i).ok_or_else(|| {
                ManipError::InvalidImage(format!(
                    "plan has {} actions but the window has {} layers",
                    plan.len(),
                    window.len()
                ))
            })?;

            match action {
                Action::Pick => {
                    if !pending.is_empty() {
                        let flushed = self.flush_pending(&current_parent, &pending).await?;
                        current_parent = current_parent.new_child(flushed.diff_id().clone());
                        new_layers.push(flushed);
                    }
                    pending.clear();
                    pending.push(layer);
                }
                Action::Fixup => {
                    if i == 0 {
                        return Err(ManipError::FixupAtStart);
                    }
                    pending.push(layer);
                }
            }
        }

        if !pending.is_empty() {
            let flushed = self.flush_pending(&current_parent, &pending).await?;
            new_layers.push(flushed);
        }

        Ok(new_layers)
    }

    /// Emit one layer for the open group.
    ///
    /// A group of one reuses the original layer as-is; its descriptor
    /// and diff-ID are already known, so the differ never runs.
    async fn flush_pending(&self, parent: &Snapshot, pending: &LayerChain) -> Result<Layer> {
        if pending.len() == 1 {
            if let Some(layer) = pending.get(0) {
                return Ok(layer);
            }
        }
        let (layer, _) = self.create_snapshot(parent, pending).await?;
        Ok(layer)
    }
}
