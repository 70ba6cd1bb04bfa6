//! Content-store blob pointers.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// A pointer to a blob in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced blob
    pub media_type: String,

    /// Content digest of the blob
    pub digest: Digest,

    /// Blob size in bytes
    pub size: i64,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_camel_case() {
        let desc = Descriptor::new(
            "application/vnd.docker.image.rootfs.diff.tar.gzip",
            Digest::from_bytes(b"layer"),
            42,
        );
        let json = serde_json::to_value(&desc).unwrap();
        assert!(json.get("mediaType").is_some());
        assert!(json.get("digest").is_some());
        assert_eq!(json["size"], 42);
    }

    #[test]
    fn test_deserialize_ignores_unknown_fields() {
        let json = r#"{
            "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
            "digest": "sha256:abc123",
            "size": 7,
            "annotations": {"k": "v"}
        }"#;
        let desc: Descriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.size, 7);
        assert_eq!(desc.digest.as_str(), "sha256:abc123");
    }
}
