//! History queries.
//!
//! Walks config history entries alongside the layer chain: empty-layer
//! entries consume no layer index. This drives `history list`,
//! `history search` and the squash base-layer auto-detection.

use image_manip_core::{chain_id, Digest, LayerChain, Result};
use oci_spec::image::History;
use serde::Serialize;

use crate::runtime::Runtime;

/// A printable history row; rows are built oldest-first and printed
/// newest-first by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    /// Chain ID of the last non-empty layer's snapshot seen so far
    pub last_snapshot: String,
    /// Digest of the last non-empty layer seen so far
    pub last_layer: String,
    pub created: Option<String>,
    pub created_by: String,
    pub size: u64,
    pub comment: String,
    pub empty: bool,
}

impl Runtime {
    /// The layer chain and history entries of an image.
    pub async fn image_history(
        &self,
        image_ref: &str,
    ) -> Result<(LayerChain, Vec<History>)> {
        let image = self.load_image(image_ref).await?;
        Ok((image.layers().clone(), image.config().history().clone()))
    }

    /// Digests of the layers whose history comment contains `pattern`,
    /// most recent first.
    pub async fn comment_contains(
        &self,
        image_ref: &str,
        pattern: &str,
    ) -> Result<Vec<Digest>> {
        let (layers, histories) = self.image_history(image_ref).await?;
        let mut digests = Vec::new();
        let mut layer_index = layers.len();

        for entry in histories.iter().rev() {
            if entry.empty_layer().unwrap_or(false) {
                continue;
            }
            if layer_index == 0 {
                break;
            }
            layer_index -= 1;
            let comment = entry.comment().clone().unwrap_or_default();
            if comment.contains(pattern) {
                if let Some(layer) = layers.get(layer_index) {
                    digests.push(layer.desc().digest.clone());
                }
            }
        }
        Ok(digests)
    }

    /// All history rows for an image, with snapshot names and sizes
    /// resolved through the snapshotter.
    pub async fn history_rows(&self, image_ref: &str) -> Result<Vec<HistoryRow>> {
        let (layers, histories) = self.image_history(image_ref).await?;
        let mut rows = Vec::new();
        let mut layer_index = 0;
        let mut last_snapshot = String::new();
        let mut last_layer = String::new();

        for entry in &histories {
            // Once the layer chain is exhausted nothing further can be
            // attributed, including trailing metadata-only entries.
            if layer_index >= layers.len() {
                break;
            }
            let (size, empty) = if entry.empty_layer().unwrap_or(false) {
                (0, true)
            } else {
                let snapshot = chain_id(&layers.diff_ids()[..layer_index + 1]);
                let stat = self.snapshotter().stat(snapshot.as_str()).await?;
                let size = self.snapshotter().usage(snapshot.as_str()).await?;
                last_snapshot = stat.name;
                if let Some(layer) = layers.get(layer_index) {
                    last_layer = layer.desc().digest.to_string();
                }
                layer_index += 1;
                (size, false)
            };

            rows.push(HistoryRow {
                last_snapshot: last_snapshot.clone(),
                last_layer: last_layer.clone(),
                created: entry.created().clone(),
                created_by: entry.created_by().clone().unwrap_or_default(),
                size,
                comment: entry.comment().clone().unwrap_or_default(),
                empty,
            });
        }
        Ok(rows)
    }

    /// History rows whose `created_by` contains `keyword`
    /// (case-insensitive).
    pub async fn search_history_rows(
        &self,
        image_ref: &str,
        keyword: &str,
    ) -> Result<Vec<HistoryRow>> {
        let rows = self.history_rows(image_ref).await?;
        let needle = keyword.to_lowercase();
        Ok(rows
            .into_iter()
            .filter(|row| row.created_by.to_lowercase().contains(&needle))
            .collect())
    }
}
