//! Image listing: attribute collection, filtering and sorting.

use chrono::{DateTime, Utc};
use image_manip_core::manifest::Manifest;
use image_manip_core::options::{ListImagesOptions, SortBy};
use image_manip_core::{Digest, ManipError, Result};
use oci_spec::image::ImageConfiguration;
use serde::Serialize;
use tracing::warn;

use crate::runtime::Runtime;
use crate::store::ImageRecord;

/// Listable attributes of one image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageAttr {
    pub name: String,
    pub repository: String,
    pub tag: String,
    /// Manifest digest
    pub digest: Digest,
    /// Short image ID: the target digest prefix (not the config digest)
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Compressed blob size: manifest + config + layers
    pub size: i64,
    pub platform: String,
}

/// Parsed `ls` filters.
#[derive(Debug, Default)]
struct Filters {
    reference: Vec<String>,
    labels: Vec<(String, Option<String>)>,
    dangling: Option<bool>,
    before: Vec<String>,
    since: Vec<String>,
}

fn parse_filters(raw: &[String]) -> Result<Filters> {
    let mut filters = Filters::default();
    for item in raw {
        let (kind, value) = item
            .split_once('=')
            .ok_or_else(|| ManipError::Config(format!("invalid filter {item:?}")))?;
        match kind {
            "reference" => filters.reference.push(value.to_string()),
            "label" => match value.split_once('=') {
                Some((k, v)) => filters.labels.push((k.to_string(), Some(v.to_string()))),
                None => filters.labels.push((value.to_string(), None)),
            },
            "dangling" => {
                filters.dangling = Some(value.parse().map_err(|_| {
                    ManipError::Config(format!("invalid dangling filter {value:?}"))
                })?)
            }
            "before" => filters.before.push(value.to_string()),
            "since" => filters.since.push(value.to_string()),
            other => {
                return Err(ManipError::Config(format!("unknown filter type {other:?}")))
            }
        }
    }
    Ok(filters)
}

/// Split `repo:tag`, treating a missing tag (or a digest-only name) as
/// `<none>`.
fn split_reference(name: &str) -> (String, String) {
    if name.contains('@') || name.starts_with("sha256:") {
        return ("<none>".to_string(), "<none>".to_string());
    }
    match name.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (name.to_string(), "<none>".to_string()),
    }
}

fn is_dangling(record: &ImageRecord) -> bool {
    record.name.is_empty() || record.name.starts_with("sha256:") || record.name.contains('@')
}

impl Runtime {
    /// Collect, filter and sort image attributes for `ls`.
    pub async fn list_images(&self, opts: &ListImagesOptions) -> Result<Vec<ImageAttr>> {
        let filters = parse_filters(&opts.filters)?;
        let records = self.images().list().await?;

        let mut cutoff_before: Option<DateTime<Utc>> = None;
        for name in &filters.before {
            let record = self.find_image(name).await?;
            cutoff_before = match (cutoff_before, record.created_at) {
                (Some(current), Some(t)) => Some(current.min(t)),
                (None, t) => t,
                (current, None) => current,
            };
        }
        let mut cutoff_since: Option<DateTime<Utc>> = None;
        for name in &filters.since {
            let record = self.find_image(name).await?;
            cutoff_since = match (cutoff_since, record.created_at) {
                (Some(current), Some(t)) => Some(current.max(t)),
                (None, t) => t,
                (current, None) => current,
            };
        }

        let mut attrs = Vec::new();
        for record in records {
            if let Some(dangling) = filters.dangling {
                if is_dangling(&record) != dangling {
                    continue;
                }
            }
            if !filters.reference.is_empty()
                && !filters.reference.iter().any(|p| record.name.contains(p))
            {
                continue;
            }
            if !filters
                .labels
                .iter()
                .all(|(k, v)| match record.labels.get(k) {
                    Some(actual) => v.as_deref().map_or(true, |want| actual.as_str() == want),
                    None => false,
                })
            {
                continue;
            }
            if let Some(cutoff) = cutoff_before {
                match record.created_at {
                    Some(t) if t < cutoff => {}
                    _ => continue,
                }
            }
            if let Some(cutoff) = cutoff_since {
                match record.created_at {
                    Some(t) if t > cutoff => {}
                    _ => continue,
                }
            }

            match self.image_attr(&record).await {
                Ok(attr) => attrs.push(attr),
                Err(err) => {
                    warn!(image = %record.name, error = %err, "skipping unreadable image");
                }
            }
        }

        match opts.sort_by {
            SortBy::None => {}
            SortBy::Created => {
                attrs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            }
            SortBy::Size => attrs.sort_by(|a, b| b.size.cmp(&a.size)),
        }
        Ok(attrs)
    }

    async fn image_attr(&self, record: &ImageRecord) -> Result<ImageAttr> {
        let manifest_bytes = self.content().read_blob(&record.target.digest).await?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| ManipError::InvalidImage(format!("failed to parse manifest: {e}")))?;
        let config_bytes = self.content().read_blob(&manifest.config.digest).await?;
        let config: ImageConfiguration = serde_json::from_slice(&config_bytes)
            .map_err(|e| ManipError::InvalidImage(format!("failed to parse config: {e}")))?;

        let size = record.target.size
            + manifest.config.size
            + manifest.layers.iter().map(|l| l.size).sum::<i64>();
        let (repository, tag) = split_reference(&record.name);

        Ok(ImageAttr {
            name: record.name.clone(),
            repository,
            tag,
            digest: record.target.digest.clone(),
            id: record.target.digest.short().to_string(),
            created_at: record.created_at,
            size,
            platform: format!("{}/{}", config.architecture(), config.os()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters() {
        let filters = parse_filters(&[
            "reference=nginx".to_string(),
            "label=env=prod".to_string(),
            "label=team".to_string(),
            "dangling=true".to_string(),
        ])
        .unwrap();
        assert_eq!(filters.reference, vec!["nginx"]);
        assert_eq!(filters.labels.len(), 2);
        assert_eq!(filters.dangling, Some(true));
    }

    #[test]
    fn test_parse_filters_rejects_unknown() {
        assert!(parse_filters(&["color=red".to_string()]).is_err());
        assert!(parse_filters(&["reference".to_string()]).is_err());
    }

    #[test]
    fn test_split_reference() {
        assert_eq!(
            split_reference("docker.io/library/nginx:1.25"),
            ("docker.io/library/nginx".to_string(), "1.25".to_string())
        );
        assert_eq!(
            split_reference("localhost:5000/app"),
            ("localhost:5000/app".to_string(), "<none>".to_string())
        );
        assert_eq!(
            split_reference("sha256:abc123"),
            ("<none>".to_string(), "<none>".to_string())
        );
    }

    #[test]
    fn test_is_dangling() {
        let record = |name: &str| ImageRecord {
            name: name.to_string(),
            target: image_manip_core::Descriptor::new(
                image_manip_core::media::MANIFEST_V2,
                Digest::from_bytes(b"m"),
                1,
            ),
            labels: Default::default(),
            created_at: None,
            updated_at: None,
        };
        assert!(is_dangling(&record("sha256:abc")));
        assert!(!is_dangling(&record("nginx:latest")));
    }
}
