//! Container engine availability probe
//!
//! Checking the engine shells out to `docker version` / `podman version`,
//! so the result is computed once per probe and shared by every function
//! run. Construct one `RuntimeProbe` at startup and pass it by `Arc`.

use crate::config::schema::RuntimeConfig;
use crate::error::{PorchletError, PorchletResult};
use crate::fnruntime::ContainerEngine;
use semver::Version;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Oldest docker client accepted
pub const MIN_SUPPORTED_DOCKER_VERSION: &str = "v20.10.0";

/// Upper bound for the version query
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

const DOCKER_INSTALL_TEXT: &str = "docker must be running to use this command
To install docker, follow the instructions at https://docs.docker.com/get-docker/.
";

const PODMAN_INSTALL_TEXT: &str = "podman must be installed.
To install podman, follow the instructions at https://podman.io/getting-started/installation.
";

/// One-time engine availability check
pub struct RuntimeProbe {
    engine: ContainerEngine,
    binary: String,
    result: OnceCell<Result<(), String>>,
}

impl RuntimeProbe {
    /// Create a probe for the engine's default binary
    pub fn new(engine: ContainerEngine) -> Self {
        Self::with_binary(engine, engine.bin())
    }

    /// Create a probe for an engine installed under a different name or path
    pub fn with_binary(engine: ContainerEngine, binary: impl Into<String>) -> Self {
        Self {
            engine,
            binary: binary.into(),
            result: OnceCell::new(),
        }
    }

    /// Select the engine from `PORCHLET_FN_RUNTIME` or `[runtime]` config
    pub fn from_config(runtime: &RuntimeConfig) -> PorchletResult<Self> {
        let engine = ContainerEngine::from_env_or(&runtime.engine)?;
        Ok(match &runtime.binary {
            Some(binary) => Self::with_binary(engine, binary),
            None => Self::new(engine),
        })
    }

    /// The engine this probe checks
    pub fn engine(&self) -> ContainerEngine {
        self.engine
    }

    /// The binary used to drive the engine
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Verify the engine is usable.
    ///
    /// Only the first call runs the check; concurrent callers wait for it and
    /// every later call returns the same outcome, including a failure.
    pub async fn ensure_available(&self) -> PorchletResult<()> {
        let result = self
            .result
            .get_or_init(|| async {
                debug!("Probing container engine: {}", self.binary);
                let outcome = match self.engine {
                    ContainerEngine::Docker => docker_available(&self.binary).await,
                    ContainerEngine::Podman => podman_available(&self.binary).await,
                };
                outcome.map_err(|e| e.to_string())
            })
            .await;

        result
            .clone()
            .map_err(PorchletError::RuntimeUnavailable)
    }
}

/// Run `docker version` and check the reported client version
async fn docker_available(binary: &str) -> PorchletResult<()> {
    let unavailable = || PorchletError::RuntimeUnavailable(DOCKER_INSTALL_TEXT.to_string());

    let query = Command::new(binary)
        .args(["version", "--format", "{{.Client.Version}}"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(VERSION_TIMEOUT, query).await {
        Ok(Ok(output)) if output.status.success() => output,
        _ => return Err(unavailable()),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout.strip_suffix('\n').unwrap_or(&stdout);
    if version.is_empty() {
        return Err(unavailable());
    }

    is_supported_version(version)?;
    info!("Using docker client {}", version);
    Ok(())
}

/// Run `podman version`; any successful run is accepted
async fn podman_available(binary: &str) -> PorchletResult<()> {
    let query = Command::new(binary)
        .arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(VERSION_TIMEOUT, query).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        _ => Err(PorchletError::RuntimeUnavailable(PODMAN_INSTALL_TEXT.to_string())),
    }
}

/// Parse a `v`-prefixed version, accepting `vMAJOR` and `vMAJOR.MINOR`
/// shorthands by padding the missing components with zero.
fn parse_version(v: &str) -> Option<Version> {
    let raw = v.strip_prefix('v')?;
    let split = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(split);
    let padded = match core.matches('.').count() {
        0 => format!("{}.0.0", core),
        1 => format!("{}.0", core),
        _ => core.to_string(),
    };
    Version::parse(&format!("{}{}", padded, suffix)).ok()
}

/// Check a docker client version (as printed, without a leading `v`)
/// against [`MIN_SUPPORTED_DOCKER_VERSION`]
pub fn is_supported_version(v: &str) -> PorchletResult<()> {
    let suggested = format!(
        "docker client version must be {} or greater",
        MIN_SUPPORTED_DOCKER_VERSION
    );
    let current = format!("v{}", v);

    let Some(found) = parse_version(&current) else {
        return Err(PorchletError::RuntimeUnavailable(format!(
            "{}: found invalid version {}",
            suggested, current
        )));
    };
    let minimum = parse_version(MIN_SUPPORTED_DOCKER_VERSION)
        .ok_or_else(|| PorchletError::Internal("invalid minimum docker version".to_string()))?;

    if found < minimum {
        return Err(PorchletError::RuntimeUnavailable(format!(
            "{}: found {}",
            suggested, current
        )));
    }
    Ok(())
}
