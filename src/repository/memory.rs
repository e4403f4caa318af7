//! In-memory repositories for tests

use crate::api::{Lifecycle, PackageResources, PackageRevision};
use crate::error::{PorchletError, PorchletResult};
use crate::repository::{
    PackageRevisionFilter, Repository, RepositoryOpener, RepositoryResolver, RepositorySpec,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub(crate) struct MemoryRepository {
    revisions: Mutex<BTreeMap<String, (PackageRevision, PackageResources)>>,
    pub fail_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn resources(&self, name: &str) -> Option<PackageResources> {
        self.revisions
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, r)| r.clone())
    }

    pub fn len(&self) -> usize {
        self.revisions.lock().unwrap().len()
    }

    fn check_writable(&self) -> PorchletResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PorchletError::registry("memory", "write refused"));
        }
        Ok(())
    }

    fn store(&self, obj: &PackageRevision, resources: &PackageResources) -> PackageRevision {
        let mut stored = obj.clone();
        stored.metadata.name = stored.identity_name();
        stored.spec.lifecycle = Some(obj.spec.lifecycle.unwrap_or(Lifecycle::Draft));
        self.revisions.lock().unwrap().insert(
            stored.metadata.name.clone(),
            (stored.clone(), resources.clone()),
        );
        stored
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_package_revisions(
        &self,
        filter: &PackageRevisionFilter,
    ) -> PorchletResult<Vec<PackageRevision>> {
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .values()
            .map(|(obj, _)| obj.clone())
            .filter(|obj| filter.matches(obj))
            .collect())
    }

    async fn load_resources(&self, obj: &PackageRevision) -> PorchletResult<PackageResources> {
        self.resources(&obj.metadata.name)
            .ok_or_else(|| PorchletError::registry(&obj.metadata.name, "tag not found"))
    }

    async fn create_package_revision(
        &self,
        obj: &PackageRevision,
        resources: &PackageResources,
    ) -> PorchletResult<PackageRevision> {
        self.check_writable()?;
        if self.resources(&obj.identity_name()).is_some() {
            return Err(PorchletError::registry(&obj.metadata.name, "already exists"));
        }
        Ok(self.store(obj, resources))
    }

    async fn update_package_revision(
        &self,
        obj: &PackageRevision,
        resources: &PackageResources,
    ) -> PorchletResult<PackageRevision> {
        self.check_writable()?;
        Ok(self.store(obj, resources))
    }

    async fn delete_package_revision(&self, obj: &PackageRevision) -> PorchletResult<()> {
        self.check_writable()?;
        self.revisions.lock().unwrap().remove(&obj.metadata.name);
        Ok(())
    }
}

/// Hands out one shared [`MemoryRepository`] per repository name
#[derive(Default)]
pub(crate) struct MemoryOpener {
    repositories: Mutex<HashMap<String, Arc<MemoryRepository>>>,
}

impl MemoryOpener {
    pub fn repository(&self, name: &str) -> Arc<MemoryRepository> {
        self.repositories
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl RepositoryOpener for MemoryOpener {
    async fn open(&self, spec: &RepositorySpec) -> PorchletResult<Arc<dyn Repository>> {
        let repository: Arc<dyn Repository> = self.repository(&spec.name);
        Ok(repository)
    }
}

#[derive(Default)]
pub(crate) struct MemoryResolver {
    pub specs: Mutex<Vec<RepositorySpec>>,
}

impl MemoryResolver {
    pub fn with(specs: Vec<RepositorySpec>) -> Self {
        Self {
            specs: Mutex::new(specs),
        }
    }
}

#[async_trait]
impl RepositoryResolver for MemoryResolver {
    async fn get(&self, namespace: &str, name: &str) -> PorchletResult<Option<RepositorySpec>> {
        Ok(self
            .specs
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
            .cloned())
    }

    async fn list(&self, namespace: &str) -> PorchletResult<Vec<RepositorySpec>> {
        Ok(self
            .specs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.namespace == namespace)
            .cloned()
            .collect())
    }
}
