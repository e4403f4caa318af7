//! Package repositories
//!
//! A repository is a named location holding package revisions. The
//! lifecycle store finds repositories through a [`RepositoryResolver`] and
//! reaches their contents through a [`RepositoryOpener`].

#[cfg(test)]
pub(crate) mod memory;
mod registry;

pub use registry::{FileRepositoryResolver, RepositoriesFile, RepositorySpec};

use crate::api::{Lifecycle, PackageResources, PackageRevision};
use crate::error::PorchletResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Restricts which revisions a listing returns; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRevisionFilter {
    pub name: Option<String>,
    pub repository: Option<String>,
    pub package_name: Option<String>,
    pub revision: Option<String>,
    pub lifecycle: Option<Lifecycle>,
}

impl PackageRevisionFilter {
    /// Filter matching exactly one object name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, obj: &PackageRevision) -> bool {
        fn field(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }

        field(&self.name, &obj.metadata.name)
            && field(&self.repository, &obj.spec.repository)
            && field(&self.package_name, &obj.spec.package_name)
            && field(&self.revision, &obj.spec.revision)
            && self
                .lifecycle
                .map_or(true, |l| l == obj.effective_lifecycle())
    }
}

/// Storage for the package revisions of one repository
#[async_trait]
pub trait Repository: Send + Sync {
    /// Revisions matching `filter`
    async fn list_package_revisions(
        &self,
        filter: &PackageRevisionFilter,
    ) -> PorchletResult<Vec<PackageRevision>>;

    /// File tree of an existing revision
    async fn load_resources(&self, obj: &PackageRevision) -> PorchletResult<PackageResources>;

    /// Store a new revision; fails if it already exists
    async fn create_package_revision(
        &self,
        obj: &PackageRevision,
        resources: &PackageResources,
    ) -> PorchletResult<PackageRevision>;

    /// Replace the contents and metadata of an existing revision
    async fn update_package_revision(
        &self,
        obj: &PackageRevision,
        resources: &PackageResources,
    ) -> PorchletResult<PackageRevision>;

    async fn delete_package_revision(&self, obj: &PackageRevision) -> PorchletResult<()>;
}

/// Looks up repository registrations.
///
/// Implementations are consulted on every request, so registrations can
/// change while the process runs.
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    /// The repository `name` in `namespace`, if registered
    async fn get(&self, namespace: &str, name: &str) -> PorchletResult<Option<RepositorySpec>>;

    /// All repositories registered in `namespace`
    async fn list(&self, namespace: &str) -> PorchletResult<Vec<RepositorySpec>>;
}

/// Opens a registered repository for access
#[async_trait]
pub trait RepositoryOpener: Send + Sync {
    async fn open(&self, spec: &RepositorySpec) -> PorchletResult<Arc<dyn Repository>>;
}
