//! Repository backed by an OCI registry
//!
//! Package `<pkg>` of a repository with registry prefix `<host>/<path>` is
//! the image `<host>/<path>/<pkg>`; each tag of that image is a revision.

use crate::api::{package_revision_name, PackageResources, PackageRevision};
use crate::error::{PorchletError, PorchletResult};
use crate::oci::cache::BlobCache;
use crate::oci::client::RegistryClient;
use crate::oci::http::HttpRegistryClient;
use crate::oci::storage::Storage;
use crate::oci::{ImageDigestName, ImageTagName};
use crate::repository::{PackageRevisionFilter, Repository, RepositoryOpener, RepositorySpec};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// A repository whose revisions are tagged images
pub struct OciRepository {
    spec: RepositorySpec,
    storage: Storage,
}

impl OciRepository {
    pub fn new(spec: RepositorySpec, storage: Storage) -> Self {
        Self { spec, storage }
    }

    fn prefix(&self) -> &str {
        self.spec.registry.trim_end_matches('/')
    }

    fn image_name(&self, package_name: &str) -> String {
        format!("{}/{}", self.prefix(), package_name)
    }

    fn tag(&self, obj: &PackageRevision) -> ImageTagName {
        ImageTagName::new(self.image_name(&obj.spec.package_name), &obj.spec.revision)
    }

    async fn load_revision(
        &self,
        image: &ImageDigestName,
        package_name: &str,
        revision: &str,
    ) -> PorchletResult<PackageRevision> {
        let config = self.storage.load_config(image).await?;

        let mut obj = PackageRevision::new(
            &self.spec.namespace,
            &self.spec.name,
            package_name,
            revision,
        );
        obj.metadata.creation_timestamp = config.created.clone();
        obj.spec.lifecycle = self.storage.load_lifecycle(image).await?;
        obj.spec.tasks = self.storage.load_tasks(image).await?;
        Ok(obj)
    }

    async fn exists(&self, tag: &ImageTagName) -> PorchletResult<bool> {
        let tags = self.storage.client().list_tags(&tag.image).await?;
        Ok(tags.iter().any(|t| *t == tag.tag))
    }

    fn stored(&self, obj: &PackageRevision) -> PackageRevision {
        let mut stored = PackageRevision::new(
            &self.spec.namespace,
            &self.spec.name,
            &obj.spec.package_name,
            &obj.spec.revision,
        );
        stored.metadata.creation_timestamp = obj.metadata.creation_timestamp.clone();
        stored.spec.lifecycle = Some(obj.effective_lifecycle());
        stored.spec.tasks = obj.spec.tasks.clone();
        stored
    }
}

#[async_trait]
impl Repository for OciRepository {
    async fn list_package_revisions(
        &self,
        filter: &PackageRevisionFilter,
    ) -> PorchletResult<Vec<PackageRevision>> {
        let prefix = format!("{}/", self.prefix());
        let client = self.storage.client();
        let mut result = Vec::new();

        for image in client.list_images(self.prefix()).await? {
            let Some(package_name) = image.strip_prefix(&prefix) else {
                continue;
            };
            if filter
                .package_name
                .as_deref()
                .is_some_and(|p| p != package_name)
            {
                continue;
            }

            for tag in client.list_tags(&image).await? {
                if filter.revision.as_deref().is_some_and(|r| r != tag) {
                    continue;
                }
                // Names derive from (repository, package, revision) alone.
                let wanted = filter.name.as_deref();
                if wanted
                    .is_some_and(|n| n != package_revision_name(&self.spec.name, package_name, &tag))
                {
                    continue;
                }
                let digest = self
                    .storage
                    .resolve_tag(&ImageTagName::new(&image, &tag))
                    .await?;
                let obj = self.load_revision(&digest, package_name, &tag).await?;
                if filter.matches(&obj) {
                    result.push(obj);
                    if wanted.is_some() {
                        return Ok(result);
                    }
                }
            }
        }

        debug!(
            "Listed {} package revisions in repository {}",
            result.len(),
            self.spec.name
        );
        Ok(result)
    }

    async fn load_resources(&self, obj: &PackageRevision) -> PorchletResult<PackageResources> {
        let digest = self.storage.resolve_tag(&self.tag(obj)).await?;
        self.storage.load_resources(&digest).await
    }

    async fn create_package_revision(
        &self,
        obj: &PackageRevision,
        resources: &PackageResources,
    ) -> PorchletResult<PackageRevision> {
        let tag = self.tag(obj);
        if self.exists(&tag).await? {
            return Err(PorchletError::registry(&tag, "package revision already exists"));
        }

        let stored = self.stored(obj);
        self.storage
            .push(&tag, resources, &stored.spec.tasks, stored.effective_lifecycle())
            .await?;
        info!("Created package revision {} as {}", stored.metadata.name, tag);
        Ok(stored)
    }

    async fn update_package_revision(
        &self,
        obj: &PackageRevision,
        resources: &PackageResources,
    ) -> PorchletResult<PackageRevision> {
        let tag = self.tag(obj);
        let stored = self.stored(obj);
        self.storage
            .push(&tag, resources, &stored.spec.tasks, stored.effective_lifecycle())
            .await?;
        info!("Updated package revision {} ({})", stored.metadata.name, tag);
        Ok(stored)
    }

    async fn delete_package_revision(&self, obj: &PackageRevision) -> PorchletResult<()> {
        let tag = self.tag(obj);
        let digest = self.storage.resolve_tag(&tag).await?;
        self.storage.client().delete_image(&digest).await?;
        info!("Deleted package revision {} ({})", obj.metadata.name, tag);
        Ok(())
    }
}

/// Opens repositories against their registries with a shared disk cache
#[derive(Debug, Clone)]
pub struct OciRepositoryOpener {
    cache: BlobCache,
}

impl OciRepositoryOpener {
    pub fn new(cache: BlobCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl RepositoryOpener for OciRepositoryOpener {
    async fn open(&self, spec: &RepositorySpec) -> PorchletResult<Arc<dyn Repository>> {
        let mut client = HttpRegistryClient::new(spec.insecure);
        if let Some(username) = &spec.username {
            client = client.with_basic_auth(username, spec.password.as_deref().unwrap_or(""));
        }
        let client: Arc<dyn RegistryClient> = Arc::new(client);
        let storage = Storage::new(client, self.cache.clone());
        Ok(Arc::new(OciRepository::new(spec.clone(), storage)))
    }
}
