//! The PackageRevision resource store

use crate::api::{
    parse_repository_name, PackageRevision, PACKAGE_REVISIONS_RESOURCE, REPOSITORIES_RESOURCE,
};
use crate::engine::PackageEngine;
use crate::error::{PorchletError, PorchletResult};
use crate::lifecycle::selector::parse_field_selector;
use crate::lifecycle::strategy::{canonicalize, validate_approve, validate_create, validate_update};
use crate::repository::{PackageRevisionFilter, RepositoryResolver, RepositorySpec};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-request scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub namespace: Option<String>,
}

impl RequestContext {
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    fn require_namespace(&self) -> PorchletResult<&str> {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| PorchletError::BadRequest("namespace must be specified".to_string()))
    }
}

/// In-place edit applied to a copy of the stored revision
pub type Mutation<'a> = &'a (dyn Fn(&mut PackageRevision) + Send + Sync);

/// Check run against the stored revision before it is deleted
pub type DeleteValidation<'a> = &'a (dyn Fn(&PackageRevision) -> PorchletResult<()> + Send + Sync);

/// Resource operations on package revisions
#[async_trait]
pub trait PackageRevisionStorage: Send + Sync {
    /// Revisions matching a field selector (empty matches all)
    async fn list(
        &self,
        ctx: &RequestContext,
        field_selector: &str,
    ) -> PorchletResult<Vec<PackageRevision>>;

    async fn get(&self, ctx: &RequestContext, name: &str) -> PorchletResult<PackageRevision>;

    async fn create(
        &self,
        ctx: &RequestContext,
        obj: PackageRevision,
    ) -> PorchletResult<PackageRevision>;

    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        mutation: Mutation<'_>,
    ) -> PorchletResult<PackageRevision>;

    /// Delete a revision; `true` means it is gone once this returns
    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<DeleteValidation<'_>>,
    ) -> PorchletResult<(PackageRevision, bool)>;
}

/// Store validating lifecycle rules in front of the package engine
pub struct PackageRevisions {
    resolver: Arc<dyn RepositoryResolver>,
    engine: PackageEngine,
}

impl PackageRevisions {
    pub fn new(resolver: Arc<dyn RepositoryResolver>, engine: PackageEngine) -> Self {
        Self { resolver, engine }
    }

    /// Promote a Proposed revision to Published
    pub async fn approve(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> PorchletResult<PackageRevision> {
        let (repository, old) = self.get_package(ctx, name).await?;

        let errors = validate_approve(&old);
        if !errors.is_empty() {
            return Err(PorchletError::invalid(name, errors));
        }

        self.engine
            .approve_package_revision(&repository, &old)
            .await
            .map_err(internal)
    }

    async fn repository(&self, namespace: &str, name: &str) -> PorchletResult<Option<RepositorySpec>> {
        self.resolver.get(namespace, name).await.map_err(|e| {
            PorchletError::Internal(format!(
                "error getting repository {}/{}: {}",
                namespace, name, e
            ))
        })
    }

    async fn get_package(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> PorchletResult<(RepositorySpec, PackageRevision)> {
        let namespace = ctx.require_namespace()?;
        let repository_name = parse_repository_name(name)
            .ok_or_else(|| PorchletError::BadRequest(format!("invalid name {:?}", name)))?;

        let repository = self
            .repository(namespace, repository_name)
            .await?
            .ok_or_else(|| PorchletError::not_found(PACKAGE_REVISIONS_RESOURCE, name))?;

        let revisions = self
            .engine
            .list_package_revisions(&repository, &PackageRevisionFilter::by_name(name))
            .await
            .map_err(PorchletError::into_internal)?;

        let obj = revisions
            .into_iter()
            .next()
            .ok_or_else(|| PorchletError::not_found(PACKAGE_REVISIONS_RESOURCE, name))?;
        Ok((repository, obj))
    }
}

#[async_trait]
impl PackageRevisionStorage for PackageRevisions {
    async fn list(
        &self,
        ctx: &RequestContext,
        field_selector: &str,
    ) -> PorchletResult<Vec<PackageRevision>> {
        let namespace = ctx.require_namespace()?;
        let filter = parse_field_selector(field_selector)?;

        let repositories: Vec<RepositorySpec> = match &filter.repository {
            Some(name) => self.repository(namespace, name).await?.into_iter().collect(),
            None => self.resolver.list(namespace).await.map_err(internal)?,
        };

        let mut result = Vec::new();
        for repository in &repositories {
            let revisions = self
                .engine
                .list_package_revisions(repository, &filter)
                .await
                .map_err(PorchletError::into_internal)?;
            result.extend(revisions);
        }
        debug!("Listed {} package revisions in {}", result.len(), namespace);
        Ok(result)
    }

    async fn get(&self, ctx: &RequestContext, name: &str) -> PorchletResult<PackageRevision> {
        let (_, obj) = self.get_package(ctx, name).await?;
        Ok(obj)
    }

    async fn create(
        &self,
        ctx: &RequestContext,
        mut obj: PackageRevision,
    ) -> PorchletResult<PackageRevision> {
        let namespace = ctx.require_namespace()?.to_string();

        if !obj.metadata.name.is_empty() {
            warn!("Client provided metadata.name {:?}", obj.metadata.name);
        }

        if obj.spec.repository.is_empty() {
            return Err(PorchletError::BadRequest(
                "spec.repository is required".to_string(),
            ));
        }

        let repository = self
            .repository(&namespace, &obj.spec.repository)
            .await?
            .ok_or_else(|| PorchletError::not_found(REPOSITORIES_RESOURCE, &obj.spec.repository))?;

        let errors = validate_create(&obj);
        if !errors.is_empty() {
            return Err(PorchletError::invalid(obj.metadata.name.clone(), errors));
        }

        canonicalize(&mut obj);
        obj.metadata.namespace = namespace;
        obj.metadata.name = obj.identity_name();

        let created = self
            .engine
            .create_package_revision(&repository, &obj)
            .await
            .map_err(internal)?;
        info!("Created package revision {}", created.metadata.name);
        Ok(created)
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        mutation: Mutation<'_>,
    ) -> PorchletResult<PackageRevision> {
        let (repository, old) = self.get_package(ctx, name).await?;

        let mut new = old.clone();
        mutation(&mut new);
        canonicalize(&mut new);

        let errors = validate_update(&new, &old);
        if !errors.is_empty() {
            return Err(PorchletError::invalid(name, errors));
        }

        self.engine
            .update_package_revision(&repository, &old, &new)
            .await
            .map_err(internal)
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        validate: Option<DeleteValidation<'_>>,
    ) -> PorchletResult<(PackageRevision, bool)> {
        ctx.require_namespace()?;
        let (repository, old) = self.get_package(ctx, name).await?;

        if let Some(validate) = validate {
            if let Err(e) = validate(&old) {
                info!("delete failed validation: {}", e);
                return Err(e);
            }
        }

        self.engine
            .delete_package_revision(&repository, &old)
            .await
            .map_err(internal)?;
        info!("Deleted package revision {}", name);
        Ok((old, true))
    }
}

fn internal(e: PorchletError) -> PorchletError {
    match e {
        PorchletError::Internal(_) => e,
        other => PorchletError::Internal(other.to_string()),
    }
}
