//! Function evaluation over package resources
//!
//! A function receives the package as a tar archive on stdin and writes the
//! transformed package as a tar archive on stdout.

use crate::api::{FunctionEvalTaskSpec, PackageResources};
use crate::archive::{read_package_archive, write_package_archive};
use crate::config::schema::{FunctionConfig, RuntimeConfig};
use crate::error::PorchletResult;
use crate::fnruntime::container::ContainerFn;
use crate::fnruntime::image::{add_default_image_path_prefix, FunctionResolver};
use crate::fnruntime::probe::RuntimeProbe;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Runs a function over a package's file tree
#[async_trait]
pub trait FunctionRunner: Send + Sync {
    /// Evaluate the function and return the transformed file tree
    async fn eval(
        &self,
        spec: &FunctionEvalTaskSpec,
        resources: &PackageResources,
    ) -> PorchletResult<PackageResources>;
}

/// Runs functions as sandboxed containers
pub struct ContainerFunctionRunner {
    runtime: RuntimeConfig,
    probe: OnceCell<Arc<RuntimeProbe>>,
    settings: FunctionConfig,
    resolver: Option<Arc<dyn FunctionResolver>>,
}

impl ContainerFunctionRunner {
    pub fn new(probe: Arc<RuntimeProbe>, settings: FunctionConfig) -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            probe: OnceCell::new_with(Some(probe)),
            settings,
            resolver: None,
        }
    }

    /// Select the engine on the first evaluation rather than up front, so
    /// commands that never run a function do not depend on engine settings
    pub fn from_config(runtime: RuntimeConfig, settings: FunctionConfig) -> Self {
        Self {
            runtime,
            probe: OnceCell::new(),
            settings,
            resolver: None,
        }
    }

    /// Resolve four-segment function references through `resolver`
    pub fn with_resolver(mut self, resolver: Arc<dyn FunctionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Build the invocation for an eval task
    pub async fn container_fn(&self, spec: &FunctionEvalTaskSpec) -> ContainerFn {
        let image = add_default_image_path_prefix(
            &spec.image,
            &self.settings.default_registry,
            self.resolver.as_deref(),
        )
        .await;

        let mut f = ContainerFn::new(image);
        f.pull_policy = self.settings.pull_policy;
        f.timeout = Some(Duration::from_secs(self.settings.timeout_secs));
        f.uidgid = self.settings.uidgid.clone();
        f.env = spec
            .config_map
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f
    }

    async fn engine(&self) -> PorchletResult<&Arc<RuntimeProbe>> {
        self.probe
            .get_or_try_init(|| async {
                debug!("Selecting container engine for function evaluation");
                RuntimeProbe::from_config(&self.runtime).map(Arc::new)
            })
            .await
    }
}

#[async_trait]
impl FunctionRunner for ContainerFunctionRunner {
    async fn eval(
        &self,
        spec: &FunctionEvalTaskSpec,
        resources: &PackageResources,
    ) -> PorchletResult<PackageResources> {
        let f = self.container_fn(spec).await;
        let input = write_package_archive(resources)?;
        let mut output = Vec::new();

        let probe = self.engine().await?;
        let result = f.run(probe, &input[..], &mut output).await?;
        if let Some(stderr) = result.stderr.as_deref().filter(|s| !s.is_empty()) {
            warn!("Function {} reported: {}", result.image, stderr);
        }
        info!("Evaluated function {}", result.image);

        read_package_archive(&output[..])
    }
}
