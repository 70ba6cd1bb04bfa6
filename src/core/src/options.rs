//! Operation options.
//!
//! Plain option structs filled by the CLI flags or bound from HTTP
//! request bodies; defaults match the CLI defaults.

use serde::{Deserialize, Serialize};

/// Default containerd endpoint.
pub const DEFAULT_CONTAINERD_ADDRESS: &str = "unix:///var/run/containerd/containerd.sock";
/// Default containerd namespace.
pub const DEFAULT_NAMESPACE: &str = "k8s.io";
/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Snapshotter used when neither the flags nor the host configure one.
pub const DEFAULT_SNAPSHOTTER: &str = "overlayfs";

/// History comment marker used by squash auto-detection: the most
/// recent layer whose comment contains it becomes the squash base.
pub const DEFAULT_SQUASH_MARKER: &str = "buildkit.dockerfile.v0";

/// Connection-level options shared by every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootOptions {
    pub containerd_address: String,
    pub namespace: String,
    /// Snapshotter name; `None` picks the host default.
    pub snapshotter: Option<String>,
    pub log_level: String,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            containerd_address: DEFAULT_CONTAINERD_ADDRESS.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            snapshotter: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Options for `rebase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseOptions {
    /// Image to rewrite
    pub image: String,
    /// Digest of the last layer to keep as base
    pub base_layer_digest: String,
    /// Replacement base image; `None` keeps the original prefix
    #[serde(default)]
    pub new_base_image: Option<String>,
    /// Name to bind the result to; `None` clobbers the original tag
    #[serde(default)]
    pub new_image_name: Option<String>,
    /// Collapse the whole rewritten window into one layer
    #[serde(default)]
    pub auto_squash: bool,
}

/// Options for `squash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquashOptions {
    pub image: String,
    /// Squash everything above this layer; `None` auto-detects by the
    /// history comment marker.
    #[serde(default)]
    pub base_layer_digest: Option<String>,
}

/// Options for `remove`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveOptions {
    pub image: String,
    /// Path to delete from the image rootfs
    pub file: String,
    #[serde(default)]
    pub new_image_name: Option<String>,
}

/// Options for `verify-base`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyBaseOptions {
    pub image: String,
    pub base_image: String,
}

/// Options for `tag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagOptions {
    pub source: String,
    pub target: String,
}

/// Output options shared by `history list` and `history search`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryOptions {
    pub image: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub no_trunc: bool,
}

/// Options for `history search`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHistoryOptions {
    #[serde(flatten)]
    pub history: HistoryOptions,
    pub keyword: String,
}

/// Sort order for `ls`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    None,
    Created,
    Size,
}

impl std::str::FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "none" => Ok(SortBy::None),
            "created" => Ok(SortBy::Created),
            "size" => Ok(SortBy::Size),
            other => Err(format!("unknown sort key: {other} (allowed: created, size)")),
        }
    }
}

/// Options for `ls`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListImagesOptions {
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub digests: bool,
    #[serde(default)]
    pub names: bool,
    #[serde(default)]
    pub no_trunc: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_defaults() {
        let root = RootOptions::default();
        assert_eq!(root.containerd_address, DEFAULT_CONTAINERD_ADDRESS);
        assert_eq!(root.namespace, "k8s.io");
        assert_eq!(root.log_level, "info");
        assert!(root.snapshotter.is_none());
    }

    #[test]
    fn test_sort_by_parse() {
        assert_eq!("created".parse::<SortBy>().unwrap(), SortBy::Created);
        assert_eq!("SIZE".parse::<SortBy>().unwrap(), SortBy::Size);
        assert_eq!("".parse::<SortBy>().unwrap(), SortBy::None);
        assert!("oldest".parse::<SortBy>().is_err());
    }

    #[test]
    fn test_rebase_options_from_json() {
        let opts: RebaseOptions = serde_json::from_str(
            r#"{"image": "app:latest", "base_layer_digest": "sha256:abc"}"#,
        )
        .unwrap();
        assert_eq!(opts.image, "app:latest");
        assert!(!opts.auto_squash);
        assert!(opts.new_base_image.is_none());
    }
}
