//! Registry client seam
//!
//! Everything above this trait works in terms of tags, digests, config
//! documents and uncompressed layer tars; the wire protocol stays below it.

use crate::error::PorchletResult;
use crate::oci::{ImageDigestName, ImageTagName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Access to an OCI distribution registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Images (`host/path`) whose name starts with `prefix`
    async fn list_images(&self, prefix: &str) -> PorchletResult<Vec<String>>;

    /// Tags of `image`; an unknown image has no tags
    async fn list_tags(&self, image: &str) -> PorchletResult<Vec<String>>;

    /// Current digest of a tag
    async fn resolve_tag(&self, tag: &ImageTagName) -> PorchletResult<ImageDigestName>;

    /// Raw image config document
    async fn fetch_config(&self, image: &ImageDigestName) -> PorchletResult<Vec<u8>>;

    /// All layers flattened into one uncompressed tar
    async fn fetch_layers(&self, image: &ImageDigestName) -> PorchletResult<Vec<u8>>;

    /// Push a single-layer image and point `tag` at it.
    ///
    /// `layer` is an uncompressed tar; the client fills in `rootfs`.
    async fn push_image(
        &self,
        tag: &ImageTagName,
        layer: Vec<u8>,
        config: ImageConfig,
    ) -> PorchletResult<ImageDigestName>;

    /// Delete the manifest behind a digest
    async fn delete_image(&self, image: &ImageDigestName) -> PorchletResult<()>;
}

/// OCI image config document (the parts we read and write)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub os: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default)]
    pub config: ContainerConfig,

    #[serde(default)]
    pub rootfs: RootFs,

    /// One entry per build step, oldest first
    #[serde(default)]
    pub history: Vec<History>,
}

impl ImageConfig {
    /// Label value, if set
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config.labels.get(key).map(String::as_str)
    }
}

/// Runtime config block of an image config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(
        rename = "Labels",
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "null_as_empty"
    )]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,

    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: vec![],
        }
    }
}

/// A history entry of an image config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<BTreeMap<String, String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}
