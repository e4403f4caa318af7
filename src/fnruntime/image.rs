//! Function image reference normalization

use crate::config::schema::CatalogEntry;
use crate::error::{PorchletError, PorchletResult};
use async_trait::async_trait;
use tracing::debug;

/// Looks up the concrete image for a function registered by name
#[async_trait]
pub trait FunctionResolver: Send + Sync {
    /// Resolve `name` (e.g. `set-namespace:v0.4:latest`) in `namespace`
    async fn resolve(&self, namespace: &str, name: &str) -> PorchletResult<String>;
}

/// Resolves functions from the `[[function.catalog]]` config entries
pub struct CatalogFunctionResolver {
    entries: Vec<CatalogEntry>,
}

impl CatalogFunctionResolver {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl FunctionResolver for CatalogFunctionResolver {
    async fn resolve(&self, namespace: &str, name: &str) -> PorchletResult<String> {
        self.entries
            .iter()
            .find(|e| e.namespace == namespace && e.name == name)
            .map(|e| e.image.clone())
            .ok_or_else(|| PorchletError::not_found("functions", format!("{}:{}", namespace, name)))
    }
}

/// Expand a function image reference.
///
/// - `ns:name:version:tag` (four segments) is a registered function and is
///   looked up through `resolver`; on failure the reference is returned as is
/// - a reference without `/` gets `default_prefix` prepended
///   (`set-namespace:v0.4` → `gcr.io/kpt-fn/set-namespace:v0.4`)
/// - anything else is already a full reference
pub async fn add_default_image_path_prefix(
    image: &str,
    default_prefix: &str,
    resolver: Option<&dyn FunctionResolver>,
) -> String {
    let segments: Vec<&str> = image.split(':').collect();
    if segments.len() == 4 {
        let name = segments[1..].join(":");
        let Some(resolver) = resolver else {
            return image.to_string();
        };
        return match resolver.resolve(segments[0], &name).await {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Could not resolve function {}: {}", image, e);
                image.to_string()
            }
        };
    }

    if !image.contains('/') {
        let prefix = default_prefix.trim_end_matches('/');
        return format!("{}/{}", prefix, image);
    }

    image.to_string()
}
