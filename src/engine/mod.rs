//! Package engine
//!
//! Turns task lists into package contents and hands the result to the
//! owning repository. Tasks are replayed in order: `init` writes a Kptfile,
//! `eval` runs a function over the current tree, and anything else is
//! recorded without touching content.

mod kptfile;

pub use kptfile::{render_kptfile, KPTFILE};

use crate::api::{Lifecycle, PackageResources, PackageRevision, Task, TaskType};
use crate::error::PorchletResult;
use crate::fnruntime::FunctionRunner;
use crate::repository::{PackageRevisionFilter, RepositoryOpener, RepositorySpec};
use std::sync::Arc;
use tracing::{debug, info};

/// Applies package operations to repositories
#[derive(Clone)]
pub struct PackageEngine {
    opener: Arc<dyn RepositoryOpener>,
    runner: Arc<dyn FunctionRunner>,
}

impl PackageEngine {
    pub fn new(opener: Arc<dyn RepositoryOpener>, runner: Arc<dyn FunctionRunner>) -> Self {
        Self { opener, runner }
    }

    pub async fn list_package_revisions(
        &self,
        repository: &RepositorySpec,
        filter: &PackageRevisionFilter,
    ) -> PorchletResult<Vec<PackageRevision>> {
        let repo = self.opener.open(repository).await?;
        repo.list_package_revisions(filter).await
    }

    /// Build a new revision from its tasks and store it.
    ///
    /// A revision created without tasks is initialized as an empty package.
    pub async fn create_package_revision(
        &self,
        repository: &RepositorySpec,
        obj: &PackageRevision,
    ) -> PorchletResult<PackageRevision> {
        let repo = self.opener.open(repository).await?;

        let mut obj = obj.clone();
        if obj.spec.tasks.is_empty() {
            obj.spec.tasks.push(Task::init(Default::default()));
        }

        let resources = self
            .apply_tasks(&obj, PackageResources::new(), &obj.spec.tasks)
            .await?;
        repo.create_package_revision(&obj, &resources).await
    }

    /// Store `new` over `old`, replaying only the tasks appended since `old`
    pub async fn update_package_revision(
        &self,
        repository: &RepositorySpec,
        old: &PackageRevision,
        new: &PackageRevision,
    ) -> PorchletResult<PackageRevision> {
        let repo = self.opener.open(repository).await?;
        let resources = repo.load_resources(old).await?;

        let appended = new.spec.tasks.get(old.spec.tasks.len()..).unwrap_or(&[]);
        let resources = self.apply_tasks(new, resources, appended).await?;
        repo.update_package_revision(new, &resources).await
    }

    /// Mark a revision Published
    pub async fn approve_package_revision(
        &self,
        repository: &RepositorySpec,
        obj: &PackageRevision,
    ) -> PorchletResult<PackageRevision> {
        let mut published = obj.clone();
        published.spec.lifecycle = Some(Lifecycle::Published);
        let result = self
            .update_package_revision(repository, obj, &published)
            .await?;
        info!("Published {}", result.metadata.name);
        Ok(result)
    }

    pub async fn delete_package_revision(
        &self,
        repository: &RepositorySpec,
        obj: &PackageRevision,
    ) -> PorchletResult<()> {
        let repo = self.opener.open(repository).await?;
        repo.delete_package_revision(obj).await
    }

    async fn apply_tasks(
        &self,
        obj: &PackageRevision,
        mut resources: PackageResources,
        tasks: &[Task],
    ) -> PorchletResult<PackageResources> {
        for task in tasks {
            match task_kind(task) {
                Some(TaskType::Init) => {
                    let spec = task.init.clone().unwrap_or_default();
                    resources.insert(KPTFILE, render_kptfile(&obj.spec.package_name, &spec));
                    debug!("Initialized package {}", obj.spec.package_name);
                }
                Some(TaskType::Eval) => {
                    if let Some(spec) = &task.eval {
                        resources = self.runner.eval(spec, &resources).await?;
                    } else {
                        debug!("Eval task {:?} has no function, recorded only", task.name);
                    }
                }
                other => {
                    debug!("Recording task {:?} ({:?}) without replay", task.name, other);
                }
            }
        }
        Ok(resources)
    }
}

/// The task's declared type, or the one implied by its payload
fn task_kind(task: &Task) -> Option<TaskType> {
    task.task_type.clone().or_else(|| {
        if task.init.is_some() {
            Some(TaskType::Init)
        } else if task.eval.is_some() {
            Some(TaskType::Eval)
        } else {
            None
        }
    })
}
