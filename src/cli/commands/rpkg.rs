//! Rpkg command - manage package revisions in registered repositories

use crate::api::{InitTaskSpec, Lifecycle, PackageRevision, Task};
use crate::cli::args::{OutputFormat, RpkgAction, RpkgArgs};
use crate::config::{Config, ConfigManager};
use crate::engine::PackageEngine;
use crate::error::PorchletResult;
use crate::fnruntime::{CatalogFunctionResolver, ContainerFunctionRunner, FunctionResolver};
use crate::lifecycle::{PackageRevisionStorage, PackageRevisions, RequestContext};
use crate::oci::{BlobCache, OciRepositoryOpener};
use crate::repository::FileRepositoryResolver;
use console::style;
use std::sync::Arc;
use tracing::debug;

/// Execute the rpkg command
pub async fn execute(args: RpkgArgs, config: &Config, manager: &ConfigManager) -> PorchletResult<()> {
    let store = build_store(config, manager);
    let namespace = args.namespace;
    let ctx = RequestContext::namespaced(namespace.as_str());

    match args.action {
        RpkgAction::List { selector, format } => {
            let revisions = store.list(&ctx, &selector).await?;
            print_revisions(&revisions, format)?;
        }
        RpkgAction::Get { name, format } => {
            let revision = store.get(&ctx, &name).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&revision)?),
                _ => print_revisions(std::slice::from_ref(&revision), format)?,
            }
        }
        RpkgAction::Init {
            package,
            repository,
            revision,
            description,
            keywords,
            site,
        } => {
            let mut obj = PackageRevision::new(namespace.as_str(), repository, package, revision);
            obj.spec.tasks.push(Task::init(InitTaskSpec {
                description: description.unwrap_or_default(),
                keywords,
                site: site.unwrap_or_default(),
            }));
            let created = store.create(&ctx, obj).await?;
            report(&created, "created");
        }
        RpkgAction::Propose { name } => {
            let updated = store
                .update(&ctx, &name, &|obj: &mut PackageRevision| {
                    obj.spec.lifecycle = Some(Lifecycle::Proposed)
                })
                .await?;
            report(&updated, "proposed");
        }
        RpkgAction::Reject { name } => {
            let updated = store
                .update(&ctx, &name, &|obj: &mut PackageRevision| {
                    obj.spec.lifecycle = Some(Lifecycle::Draft)
                })
                .await?;
            report(&updated, "rejected");
        }
        RpkgAction::Approve { name } => {
            let approved = store.approve(&ctx, &name).await?;
            report(&approved, "approved");
        }
        RpkgAction::Delete { name } => {
            let (deleted, _) = store.delete(&ctx, &name, None).await?;
            report(&deleted, "deleted");
        }
    }

    Ok(())
}

/// Wire the store over registry-backed repositories and container functions
fn build_store(config: &Config, manager: &ConfigManager) -> PackageRevisions {
    let functions: Arc<dyn FunctionResolver> =
        Arc::new(CatalogFunctionResolver::new(config.function.catalog.clone()));
    let runner = ContainerFunctionRunner::from_config(config.runtime.clone(), config.function.clone())
        .with_resolver(functions);

    let cache_dir = ConfigManager::cache_dir(config);
    let repositories = manager.repositories_path(config);
    debug!(
        "Repositories from {}, cache at {}",
        repositories.display(),
        cache_dir.display()
    );

    let opener = OciRepositoryOpener::new(BlobCache::new(cache_dir));
    let engine = PackageEngine::new(Arc::new(opener), Arc::new(runner));
    PackageRevisions::new(Arc::new(FileRepositoryResolver::new(repositories)), engine)
}

fn report(obj: &PackageRevision, action: &str) {
    println!(
        "{} {} {}",
        style("✓").green().bold(),
        obj.metadata.name,
        style(action).dim()
    );
}

fn print_revisions(revisions: &[PackageRevision], format: OutputFormat) -> PorchletResult<()> {
    match format {
        OutputFormat::Table => print_table(revisions),
        OutputFormat::Json => print_json(revisions)?,
        OutputFormat::Plain => print_plain(revisions),
    }
    Ok(())
}

fn print_table(revisions: &[PackageRevision]) {
    if revisions.is_empty() {
        println!("{}", style("No package revisions").dim());
        return;
    }

    println!(
        "{:<28} {:<20} {:<10} {:<10} {:<16}",
        style("NAME").bold(),
        style("PACKAGE").bold(),
        style("REVISION").bold(),
        style("LIFECYCLE").bold(),
        style("REPOSITORY").bold()
    );
    println!("{}", "-".repeat(88));

    for revision in revisions {
        let lifecycle = revision.effective_lifecycle();
        let lifecycle_styled = match lifecycle {
            Lifecycle::Draft => style(lifecycle.as_str()).yellow(),
            Lifecycle::Proposed => style(lifecycle.as_str()).cyan(),
            Lifecycle::Published => style(lifecycle.as_str()).green(),
        };

        println!(
            "{:<28} {:<20} {:<10} {:<10} {:<16}",
            revision.metadata.name,
            revision.spec.package_name,
            revision.spec.revision,
            lifecycle_styled,
            revision.spec.repository
        );
    }

    println!();
    println!("{} revision(s)", revisions.len());
}

fn print_json(revisions: &[PackageRevision]) -> PorchletResult<()> {
    let json = serde_json::to_string_pretty(revisions)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(revisions: &[PackageRevision]) {
    for revision in revisions {
        println!("{}", revision.metadata.name);
    }
}
