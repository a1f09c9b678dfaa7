//! CLI command implementations

pub mod layers;
pub mod revisions;
pub mod secrets;
pub mod status;

/// First 12 characters of an identifier
pub(crate) fn short(id: &str) -> String {
    id.chars().take(12).collect()
}

/// Digest part of a content-addressed image, shortened
pub(crate) fn short_image(image: &str) -> String {
    match image.split_once("@sha256:") {
        Some((repository, digest)) => format!("{}@{}", repository, short(digest)),
        None => image.to_string(),
    }
}

pub(crate) fn replicas(scale: &ebb_types::ScaleConfig) -> String {
    format!("{}-{}", scale.min_replicas, scale.max_replicas)
}
