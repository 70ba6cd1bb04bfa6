//! New image assembly: config generation, blob writes with GC labels,
//! name binding and unpack.
//!
//! Write order matters for GC safety: new layers already exist (the
//! diff engine wrote them), then the config blob goes in pinning the
//! unpacked snapshot chain, then the manifest blob goes in pinning the
//! config and every layer. A reader that can see the manifest can
//! therefore resolve everything it references.

use std::collections::HashMap;

use chrono::Utc;
use image_manip_core::manifest::Manifest;
use image_manip_core::{media, Descriptor, Digest, LayerChain, ManipError, Result};
use oci_spec::image::{History, HistoryBuilder, ImageConfiguration, ImageConfigurationBuilder, RootFsBuilder};
use tracing::{info, warn};

use crate::runtime::Runtime;
use crate::store::ImageRecord;

/// Author recorded in configs and history entries written by this tool.
const DEFAULT_AUTHOR: &str = "image-manip";

fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

fn build_err(err: impl std::fmt::Display) -> ManipError {
    ManipError::Serialization(err.to_string())
}

/// Base history truncated so that its non-empty entries match
/// `keep_layers`; empty-layer entries stay interleaved up to the cut.
fn truncate_history(history: &[History], keep_layers: usize) -> Vec<History> {
    let mut kept = Vec::new();
    let mut count = 0;
    for entry in history {
        if entry.empty_layer().unwrap_or(false) {
            kept.push(entry.clone());
            continue;
        }
        if count + 1 <= keep_layers {
            kept.push(entry.clone());
            count += 1;
        } else {
            break;
        }
    }
    kept
}

impl Runtime {
    /// The original config cut down to its first `keep` layers, used as
    /// the base when rebasing an image onto its own prefix.
    pub(crate) fn truncated_base_config(
        &self,
        config: &ImageConfiguration,
        keep: usize,
    ) -> Result<ImageConfiguration> {
        let diff_ids: Vec<String> = config.rootfs().diff_ids()[..keep].to_vec();
        let rootfs = RootFsBuilder::default()
            .typ("layers")
            .diff_ids(diff_ids)
            .build()
            .map_err(build_err)?;

        let mut builder = ImageConfigurationBuilder::default()
            .architecture(config.architecture().clone())
            .os(config.os().clone())
            .rootfs(rootfs)
            .history(truncate_history(config.history(), keep));
        if let Some(created) = config.created() {
            builder = builder.created(created.clone());
        }
        if let Some(author) = config.author() {
            builder = builder.author(author.clone());
        }
        if let Some(cfg) = config.config() {
            builder = builder.config(cfg.clone());
        }
        builder.build().map_err(build_err)
    }

    /// Assemble the result config: base platform and container config,
    /// base diff-IDs extended with the new layers, base history plus
    /// one non-empty entry per new layer.
    pub(crate) fn generate_image_config(
        &self,
        base_config: &ImageConfiguration,
        new_layers: &LayerChain,
    ) -> Result<ImageConfiguration> {
        let created = Utc::now().to_rfc3339();

        let mut arch = base_config.architecture().to_string();
        if arch.is_empty() {
            arch = host_arch().to_string();
            warn!(arch = %arch, "base config has no architecture, assuming host");
        }
        let mut os = base_config.os().to_string();
        if os.is_empty() {
            os = std::env::consts::OS.to_string();
            warn!(os = %os, "base config has no OS, assuming host");
        }

        let author = if DEFAULT_AUTHOR.trim().is_empty() {
            base_config.author().clone().unwrap_or_default()
        } else {
            DEFAULT_AUTHOR.trim().to_string()
        };

        let mut diff_ids: Vec<String> = base_config.rootfs().diff_ids().clone();
        diff_ids.extend(new_layers.diff_ids().iter().map(|d| d.to_string()));
        let rootfs = RootFsBuilder::default()
            .typ("layers")
            .diff_ids(diff_ids)
            .build()
            .map_err(build_err)?;

        // Non-empty base entries never exceed the base chain length,
        // even when the base config carries extra trailing entries.
        let mut history =
            truncate_history(base_config.history(), base_config.rootfs().diff_ids().len());
        for layer in new_layers.iter() {
            history.push(
                HistoryBuilder::default()
                    .created(created.clone())
                    .created_by(format!(
                        "ADD {} in {}",
                        layer.desc().digest,
                        layer.desc().media_type
                    ))
                    .author(author.clone())
                    .empty_layer(false)
                    .build()
                    .map_err(build_err)?,
            );
        }

        let mut builder = ImageConfigurationBuilder::default()
            .created(created)
            .author(author)
            .architecture(arch.as_str())
            .os(os.as_str())
            .rootfs(rootfs)
            .history(history);
        if let Some(cfg) = base_config.config() {
            builder = builder.config(cfg.clone());
        }
        builder.build().map_err(build_err)
    }

    /// Write the config blob; its GC label pins the unpacked snapshot
    /// chain under the runtime's snapshotter.
    pub(crate) async fn write_image_config(
        &self,
        config: &ImageConfiguration,
    ) -> Result<Descriptor> {
        let config_json = serde_json::to_vec(config)?;
        let config_desc = Descriptor::new(
            media::CONFIG_V1,
            Digest::from_bytes(&config_json),
            config_json.len() as i64,
        );

        let diff_ids = config
            .rootfs()
            .diff_ids()
            .iter()
            .map(|s| Digest::parse(s))
            .collect::<Result<Vec<Digest>>>()?;
        let snapshot = image_manip_core::chain_id(&diff_ids);
        let labels = HashMap::from([(
            media::gc_snapshot_ref(self.snapshotter_name()),
            snapshot.to_string(),
        )]);

        self.content()
            .write_blob(&config_desc, &config_json, labels)
            .await?;
        Ok(config_desc)
    }

    /// Write the manifest blob; its GC labels pin the config and every
    /// layer it lists, in order.
    pub(crate) async fn write_image_manifest(
        &self,
        config_desc: Descriptor,
        layers: Vec<Descriptor>,
    ) -> Result<Descriptor> {
        let mut labels = HashMap::from([(
            media::gc_content_ref(0),
            config_desc.digest.to_string(),
        )]);
        for (i, layer) in layers.iter().enumerate() {
            labels.insert(media::gc_content_ref(i + 1), layer.digest.to_string());
        }

        let manifest = Manifest::docker_v2(config_desc, layers);
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        let manifest_desc = Descriptor::new(
            media::MANIFEST_V2,
            Digest::from_bytes(&manifest_json),
            manifest_json.len() as i64,
        );

        self.content()
            .write_blob(&manifest_desc, &manifest_json, labels)
            .await?;
        Ok(manifest_desc)
    }

    /// Bind `record.name` to its target, creating the record when the
    /// index reports it missing.
    pub(crate) async fn update_image(&self, record: &ImageRecord) -> Result<ImageRecord> {
        match self.images().update(record).await {
            Err(err) if err.is_not_found() => self.images().create(record).await,
            other => other,
        }
    }

    /// Write config and manifest blobs for the rewritten image, bind
    /// the name and unpack the chain into the snapshotter.
    pub(crate) async fn write_image(
        &self,
        name: &str,
        base_config: &ImageConfiguration,
        base_layers: &LayerChain,
        new_layers: &LayerChain,
    ) -> Result<Descriptor> {
        let config = self.generate_image_config(base_config, new_layers)?;
        let config_desc = self.write_image_config(&config).await?;

        let mut all_layers = base_layers.clone();
        all_layers.extend(new_layers);
        let manifest_desc = self
            .write_image_manifest(config_desc, all_layers.descriptors().to_vec())
            .await?;

        let record = ImageRecord {
            name: name.to_string(),
            target: manifest_desc.clone(),
            labels: HashMap::new(),
            created_at: None,
            updated_at: Some(Utc::now()),
        };
        self.update_image(&record).await?;

        self.unpack_image(&all_layers).await?;

        info!(image = %name, manifest = %manifest_desc.digest, "image written");
        Ok(manifest_desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(empty: bool, by: &str) -> History {
        HistoryBuilder::default()
            .created_by(by.to_string())
            .empty_layer(empty)
            .build()
            .unwrap()
    }

    #[test]
    fn test_truncate_history_keeps_interleaved_empty_entries() {
        let history = vec![
            entry(false, "layer0"),
            entry(true, "ENV a=b"),
            entry(false, "layer1"),
            entry(false, "layer2"),
        ];
        let kept = truncate_history(&history, 2);
        let by: Vec<_> = kept
            .iter()
            .map(|h| h.created_by().clone().unwrap_or_default())
            .collect();
        assert_eq!(by, vec!["layer0", "ENV a=b", "layer1"]);
    }

    #[test]
    fn test_truncate_history_zero_layers() {
        let history = vec![entry(true, "ENV a=b"), entry(false, "layer0")];
        let kept = truncate_history(&history, 0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].empty_layer(), Some(true));
    }

    #[test]
    fn test_truncate_history_keeps_everything_when_long_enough() {
        let history = vec![entry(false, "layer0"), entry(false, "layer1")];
        assert_eq!(truncate_history(&history, 5).len(), 2);
    }

    #[test]
    fn test_host_arch_is_oci_name() {
        let arch = host_arch();
        assert_ne!(arch, "x86_64");
        assert_ne!(arch, "aarch64");
    }
}
