//! Media types and garbage-collection label keys.
//!
//! Blobs written by a rewrite use the Docker schema-2 media types; the
//! loader additionally accepts their OCI equivalents. GC labels keep
//! every blob a manifest needs pinned in the content store, and tie a
//! config blob to its unpacked snapshot chain.

/// Docker schema-2 manifest
pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker schema-2 manifest list
pub const MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker image config
pub const CONFIG_V1: &str = "application/vnd.docker.container.image.v1+json";
/// Docker gzipped layer tarball
pub const LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// OCI image manifest
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Content-store label carrying a layer blob's uncompressed digest
pub const UNCOMPRESSED_LABEL: &str = "containerd.io/uncompressed";

/// True for single-platform manifest media types.
pub fn is_manifest_type(media_type: &str) -> bool {
    matches!(media_type, MANIFEST_V2 | OCI_MANIFEST)
}

/// True for multi-platform index media types.
pub fn is_index_type(media_type: &str) -> bool {
    matches!(media_type, MANIFEST_LIST_V2 | OCI_INDEX)
}

/// GC label key pinning the n-th content blob a manifest references.
pub fn gc_content_ref(index: usize) -> String {
    format!("containerd.io/gc.ref.content.{index}")
}

/// GC label key pinning the snapshot a config's rootfs unpacks to.
pub fn gc_snapshot_ref(snapshotter: &str) -> String {
    format!("containerd.io/gc.ref.snapshot.{snapshotter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_type_gate() {
        assert!(is_manifest_type(MANIFEST_V2));
        assert!(is_manifest_type(OCI_MANIFEST));
        assert!(!is_manifest_type(MANIFEST_LIST_V2));
        assert!(!is_manifest_type(OCI_INDEX));
        assert!(!is_manifest_type("application/json"));
    }

    #[test]
    fn test_index_type_gate() {
        assert!(is_index_type(MANIFEST_LIST_V2));
        assert!(is_index_type(OCI_INDEX));
        assert!(!is_index_type(MANIFEST_V2));
    }

    #[test]
    fn test_gc_label_keys() {
        assert_eq!(gc_content_ref(0), "containerd.io/gc.ref.content.0");
        assert_eq!(gc_content_ref(3), "containerd.io/gc.ref.content.3");
        assert_eq!(
            gc_snapshot_ref("overlayfs"),
            "containerd.io/gc.ref.snapshot.overlayfs"
        );
    }
}
