//! Base verification and tagging.

use chrono::Utc;
use image_manip_core::{ManipError, Result};
use tracing::info;

use crate::runtime::Runtime;
use crate::store::ImageRecord;

impl Runtime {
    /// Check that `image_ref` is built on top of `base_ref`: the base's
    /// layer digests must be a prefix of the image's.
    ///
    /// # Errors
    ///
    /// `VerifyMismatch` with the offending index and both digests; a
    /// missing layer reports the image side as `<missing>`.
    pub async fn verify_base(&self, image_ref: &str, base_ref: &str) -> Result<()> {
        let image = self.load_image(image_ref).await?;
        let base = self.load_image(base_ref).await?;

        let image_layers = image.layers().descriptors();
        let base_layers = base.layers().descriptors();

        for (index, base_layer) in base_layers.iter().enumerate() {
            let actual = match image_layers.get(index) {
                Some(layer) => layer.digest.to_string(),
                None => "<missing>".to_string(),
            };
            if actual != base_layer.digest.to_string() {
                return Err(ManipError::VerifyMismatch {
                    index,
                    expected: base_layer.digest.to_string(),
                    actual,
                });
            }
        }

        info!(image = %image_ref, base = %base_ref, "image is based on base");
        Ok(())
    }

    /// Bind `target` to the manifest `source` resolves to.
    pub async fn tag(&self, source: &str, target: &str) -> Result<()> {
        let record = self.find_image(source).await?;
        self.update_image(&ImageRecord {
            name: target.to_string(),
            target: record.target,
            labels: record.labels,
            created_at: None,
            updated_at: Some(Utc::now()),
        })
        .await?;
        info!(source = %source, target = %target, "image tagged");
        Ok(())
    }
}
