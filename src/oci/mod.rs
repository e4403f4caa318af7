//! OCI registry backed package storage
//!
//! Packages are stored as single-layer images: the image name is
//! `<registry>/<package>`, the tag is the revision, the layer is the
//! package's file tree and the config history carries provenance tasks.
//!
//! | Piece | Source of truth | Cached locally |
//! |-------|-----------------|----------------|
//! | tag → digest | registry | never |
//! | layer tar | registry | `<cache>/resources/<digest>` |
//! | image config | registry | `<cache>/config/<digest>` |

mod cache;
mod client;
mod http;
mod layers;
mod repository;
mod storage;

pub use cache::BlobCache;
pub use client::{History, ImageConfig, RegistryClient};
pub use http::HttpRegistryClient;
pub use layers::flatten_layers;
pub use repository::{OciRepository, OciRepositoryOpener};
pub use storage::{
    tasks_from_history, Storage, LIFECYCLE_LABEL, PACKAGE_LABEL, REVISION_LABEL, TASK_MARKER,
};

use crate::error::{PorchletError, PorchletResult};
use std::fmt;

/// An image addressed by a mutable tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageTagName {
    /// `host/path`
    pub image: String,
    pub tag: String,
}

impl ImageTagName {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageTagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

/// An image addressed by its immutable content digest.
///
/// An empty digest denotes a package with no content yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDigestName {
    /// `host/path`
    pub image: String,
    /// `sha256:<hex>`
    pub digest: String,
}

impl ImageDigestName {
    pub fn new(image: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            digest: digest.into(),
        }
    }
}

impl fmt::Display for ImageDigestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.image, self.digest)
    }
}

/// Split `host[:port]/path` into host and repository path
pub(crate) fn split_image(image: &str) -> PorchletResult<(&str, &str)> {
    match image.split_once('/') {
        Some((host, path)) if !host.is_empty() && !path.is_empty() => Ok((host, path)),
        _ => Err(PorchletError::InvalidReference(format!(
            "{:?} must be of the form host/path",
            image
        ))),
    }
}
