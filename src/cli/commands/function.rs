//! Fn command - run a function over a local package directory

use crate::api::PackageResources;
use crate::archive::{read_package_archive, write_package_archive};
use crate::cli::args::{EvalArgs, FunctionAction, FunctionArgs};
use crate::cli::commands::runtime_probe;
use crate::config::Config;
use crate::error::{PorchletError, PorchletResult};
use crate::fnruntime::{
    add_default_image_path_prefix, CatalogFunctionResolver, ContainerFn, FunctionPermission,
    StorageMount,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Execute the fn command
pub async fn execute(args: FunctionArgs, config: &Config) -> PorchletResult<()> {
    match args.action {
        FunctionAction::Eval(args) => eval(args, config).await,
    }
}

async fn eval(args: EvalArgs, config: &Config) -> PorchletResult<()> {
    let dir = args.dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let probe = runtime_probe(config)?;
    let f = container_fn(&args, config).await?;

    let resources = read_package_dir(&dir).await?;
    debug!(
        "Read {} files from {}",
        resources.contents.len(),
        dir.display()
    );

    let pb = create_spinner(&format!("Running {}...", f.image));
    let input = write_package_archive(&resources)?;
    let mut output = Vec::new();
    let outcome = f.run(&probe, &input[..], &mut output).await;
    pb.finish_and_clear();
    let result = outcome?;

    let transformed = read_package_archive(&output[..])?;
    if let Some(stderr) = result.stderr.as_deref().filter(|s| !s.trim().is_empty()) {
        eprintln!("{}", style(stderr.trim_end()).dim());
    }

    let (target, previous) = match &args.output {
        Some(out) => (out.clone(), None),
        None => (dir, Some(&resources)),
    };
    write_package_dir(&target, &transformed, previous).await?;
    info!("Wrote {} files to {}", transformed.contents.len(), target.display());

    println!(
        "{} {} {}",
        style("✓").green().bold(),
        style(&result.image).cyan(),
        style(format!("({} files)", transformed.contents.len())).dim()
    );
    Ok(())
}

/// Build the invocation, with flags taking precedence over `[function]` config
async fn container_fn(args: &EvalArgs, config: &Config) -> PorchletResult<ContainerFn> {
    let resolver = CatalogFunctionResolver::new(config.function.catalog.clone());
    let image = add_default_image_path_prefix(
        &args.image,
        &config.function.default_registry,
        Some(&resolver),
    )
    .await;

    let storage_mounts = args
        .mounts
        .iter()
        .map(|m| m.parse::<StorageMount>())
        .collect::<PorchletResult<Vec<_>>>()?;

    let mut f = ContainerFn::new(image);
    f.pull_policy = args.image_pull_policy.or(config.function.pull_policy);
    f.timeout = Some(Duration::from_secs(
        args.timeout.unwrap_or(config.function.timeout_secs),
    ));
    f.permission = FunctionPermission {
        allow_network: args.network,
        allow_mount: args.allow_mount,
    };
    f.uidgid = args.user.clone().or_else(|| config.function.uidgid.clone());
    f.storage_mounts = storage_mounts;
    f.env = args.env.clone();
    Ok(f)
}

/// Read every regular file under `dir`, keyed by slash-separated relative path
async fn read_package_dir(dir: &Path) -> PorchletResult<PackageResources> {
    let mut resources = PackageResources::new();
    let mut pending = vec![(dir.to_path_buf(), String::new())];

    while let Some((current, prefix)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| PorchletError::io(format!("reading {}", current.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PorchletError::io(format!("reading {}", current.display()), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PorchletError::io(format!("inspecting {}", relative), e))?;

            if file_type.is_symlink() {
                return Err(PorchletError::UnsupportedEntry {
                    path: relative,
                    kind: "symlink".to_string(),
                });
            } else if file_type.is_dir() {
                pending.push((entry.path(), relative));
            } else if file_type.is_file() {
                let data = tokio::fs::read(entry.path())
                    .await
                    .map_err(|e| PorchletError::io(format!("reading {}", relative), e))?;
                resources.insert(relative, data);
            } else {
                return Err(PorchletError::UnsupportedEntry {
                    path: relative,
                    kind: "special file".to_string(),
                });
            }
        }
    }

    Ok(resources)
}

/// Write `resources` under `dir`.
///
/// Files listed in `previous` but missing from `resources` are removed, so
/// a function can delete files when run in place.
async fn write_package_dir(
    dir: &Path,
    resources: &PackageResources,
    previous: Option<&PackageResources>,
) -> PorchletResult<()> {
    for path in resources.contents.keys() {
        check_relative(path)?;
    }

    if let Some(previous) = previous {
        for path in previous.contents.keys() {
            if resources.contents.contains_key(path) {
                continue;
            }
            let target = dir.join(path);
            match tokio::fs::remove_file(&target).await {
                Ok(()) => debug!("Removed {}", target.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(PorchletError::io(format!("removing {}", target.display()), e))
                }
            }
        }
    }

    for (path, content) in &resources.contents {
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PorchletError::io(format!("creating {}", parent.display()), e))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| PorchletError::io(format!("writing {}", target.display()), e))?;
    }

    Ok(())
}

fn check_relative(path: &str) -> PorchletResult<()> {
    let escapes = Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(PorchletError::Archive(format!(
            "function output contains invalid path {:?}",
            path
        )));
    }
    Ok(())
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(spinner) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(spinner);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CatalogEntry;
    use crate::fnruntime::ImagePullPolicy;
    use clap::Parser;
    use tempfile::TempDir;

    fn eval_args(extra: &[&str]) -> EvalArgs {
        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: EvalArgs,
        }
        let mut argv = vec!["eval"];
        argv.extend_from_slice(extra);
        Wrapper::parse_from(argv).args
    }

    #[tokio::test]
    async fn flags_override_config() {
        let mut config = Config::default();
        config.function.pull_policy = Some(ImagePullPolicy::Always);
        config.function.timeout_secs = 60;
        config.function.uidgid = Some("1000:1000".to_string());

        let args = eval_args(&[
            "set-namespace:v0.4",
            "--image-pull-policy",
            "never",
            "--timeout",
            "5",
            "--network",
            "-e",
            "namespace=prod",
        ]);
        let f = container_fn(&args, &config).await.unwrap();

        assert_eq!(f.image, "gcr.io/kpt-fn/set-namespace:v0.4");
        assert_eq!(f.pull_policy, Some(ImagePullPolicy::Never));
        assert_eq!(f.timeout, Some(Duration::from_secs(5)));
        assert!(f.permission.allow_network);
        assert!(!f.permission.allow_mount);
        assert_eq!(f.uidgid.as_deref(), Some("1000:1000"));
        assert_eq!(f.env, vec!["namespace=prod"]);
    }

    #[tokio::test]
    async fn config_defaults_apply() {
        let mut config = Config::default();
        config.function.timeout_secs = 42;
        config.function.catalog = vec![CatalogEntry {
            namespace: "default".to_string(),
            name: "set-labels:v1:latest".to_string(),
            image: "registry.local/fns/set-labels:v1".to_string(),
        }];

        let f = container_fn(&eval_args(&["default:set-labels:v1:latest"]), &config)
            .await
            .unwrap();
        assert_eq!(f.image, "registry.local/fns/set-labels:v1");
        assert_eq!(f.timeout, Some(Duration::from_secs(42)));
        assert_eq!(f.pull_policy, None);
    }

    #[tokio::test]
    async fn malformed_mount_is_rejected() {
        let args = eval_args(&["img", "--mount", "type=nfs,src=a,dst=b"]);
        assert!(container_fn(&args, &Config::default()).await.is_err());
    }

    #[tokio::test]
    async fn reads_nested_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("sub/deep")).unwrap();
        std::fs::write(temp.path().join("Kptfile"), "kind: Kptfile\n").unwrap();
        std::fs::write(temp.path().join("sub/deep/cm.yaml"), "kind: ConfigMap\n").unwrap();

        let resources = read_package_dir(temp.path()).await.unwrap();
        let paths: Vec<&str> = resources.contents.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["Kptfile", "sub/deep/cm.yaml"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("real.yaml"), "a: 1\n").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real.yaml"), temp.path().join("link.yaml"))
            .unwrap();

        let err = read_package_dir(temp.path()).await.unwrap_err();
        assert!(matches!(err, PorchletError::UnsupportedEntry { ref path, .. } if path == "link.yaml"));
    }

    #[tokio::test]
    async fn in_place_write_removes_dropped_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("keep.yaml"), "old\n").unwrap();
        std::fs::write(temp.path().join("drop.yaml"), "gone\n").unwrap();
        let previous = read_package_dir(temp.path()).await.unwrap();

        let mut result = PackageResources::new();
        result.insert("keep.yaml", "new\n");
        result.insert("added/x.yaml", "x\n");
        write_package_dir(temp.path(), &result, Some(&previous)).await.unwrap();

        assert_eq!(std::fs::read_to_string(temp.path().join("keep.yaml")).unwrap(), "new\n");
        assert!(!temp.path().join("drop.yaml").exists());
        assert!(temp.path().join("added/x.yaml").exists());
    }

    #[tokio::test]
    async fn binary_files_round_trip_unchanged() {
        let temp = TempDir::new().unwrap();
        let blob = vec![0xffu8, 0x00, 0xfe, 0x89, b'P', b'N', b'G'];
        std::fs::write(temp.path().join("logo.png"), &blob).unwrap();

        let resources = read_package_dir(temp.path()).await.unwrap();
        assert_eq!(resources.contents["logo.png"], blob);

        write_package_dir(temp.path(), &resources, Some(&resources)).await.unwrap();
        assert_eq!(std::fs::read(temp.path().join("logo.png")).unwrap(), blob);
    }

    #[tokio::test]
    async fn escaping_output_paths_are_refused() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        let mut result = PackageResources::new();
        result.insert("../evil.yaml", "x\n");

        assert!(write_package_dir(&out, &result, None).await.is_err());
        assert!(!temp.path().join("evil.yaml").exists());
    }
}
