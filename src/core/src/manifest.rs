//! Image manifest wire type.
//!
//! A minimal single-platform manifest: schema version, media type, a
//! config descriptor and the ordered layer descriptors. Fields other
//! tools add (annotations, subject) are ignored on parse and never
//! written.

use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::media;

/// A single-platform image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    /// Image config blob
    pub config: Descriptor,

    /// Layer blobs in bottom-up application order
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Build a Docker schema-2 manifest over a config and layer set.
    pub fn docker_v2(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: media::MANIFEST_V2.to_string(),
            config,
            layers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;

    fn layer(n: u8) -> Descriptor {
        Descriptor::new(media::LAYER_TAR_GZIP, Digest::from_bytes(&[n]), n as i64)
    }

    #[test]
    fn test_docker_v2_shape() {
        let config = Descriptor::new(media::CONFIG_V1, Digest::from_bytes(b"cfg"), 10);
        let manifest = Manifest::docker_v2(config, vec![layer(1), layer(2)]);

        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.media_type, media::MANIFEST_V2);
        assert_eq!(manifest.layers.len(), 2);
    }

    #[test]
    fn test_round_trip() {
        let config = Descriptor::new(media::CONFIG_V1, Digest::from_bytes(b"cfg"), 10);
        let manifest = Manifest::docker_v2(config, vec![layer(1)]);

        let json = serde_json::to_string_pretty(&manifest).unwrap();
        assert!(json.contains("\"schemaVersion\": 2"));

        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_parses_foreign_manifest() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:aa", "size": 3},
            "layers": [
                {"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": "sha256:bb", "size": 4}
            ],
            "annotations": {"org.example": "1"}
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.config.digest.as_str(), "sha256:aa");
    }
}
