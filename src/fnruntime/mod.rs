//! Function runtime
//!
//! Runs containerized package functions under a restricted profile:
//! - docker (default) or podman, selected by `PORCHLET_FN_RUNTIME`
//! - no network, unprivileged user, no-new-privileges
//! - bounded by a timeout, with engine pull chatter filtered from stderr

mod container;
mod filter;
mod image;
mod probe;
mod runner;

pub use container::{
    ContainerEnv, ContainerFn, FunctionPermission, FunctionResult, ImagePullPolicy, MountType,
    StorageMount, DEFAULT_FUNCTION_TIMEOUT,
};
pub use filter::{filter_docker_output, filter_podman_output};
pub use image::{add_default_image_path_prefix, CatalogFunctionResolver, FunctionResolver};
pub use probe::{is_supported_version, RuntimeProbe, MIN_SUPPORTED_DOCKER_VERSION};
pub use runner::{ContainerFunctionRunner, FunctionRunner};

use crate::error::{PorchletError, PorchletResult};
use std::fmt;

/// Environment variable selecting the container engine
pub const CONTAINER_RUNTIME_ENV: &str = "PORCHLET_FN_RUNTIME";

/// Supported container engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerEngine {
    #[default]
    Docker,
    Podman,
}

impl ContainerEngine {
    /// Parse an engine name; empty means the default engine
    pub fn select(value: &str) -> PorchletResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "docker" | "" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(PorchletError::UnsupportedRuntime(value.to_string())),
        }
    }

    /// Select the engine from the environment, falling back to the
    /// configured value when the variable is unset or empty
    pub fn from_env_or(configured: &str) -> PorchletResult<Self> {
        match std::env::var(CONTAINER_RUNTIME_ENV) {
            Ok(value) if !value.is_empty() => Self::select(&value),
            _ => Self::select(configured),
        }
    }

    /// Default binary name for this engine
    pub fn bin(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Strip this engine's own progress output from captured stderr
    pub fn filter_cli_output(&self, stderr: &str) -> String {
        match self {
            Self::Docker => filter_docker_output(stderr),
            Self::Podman => filter_podman_output(stderr),
        }
    }
}

impl fmt::Display for ContainerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn select_is_case_insensitive() {
        assert_eq!(ContainerEngine::select("Docker").unwrap(), ContainerEngine::Docker);
        assert_eq!(ContainerEngine::select("PODMAN").unwrap(), ContainerEngine::Podman);
    }

    #[test]
    fn select_empty_defaults_to_docker() {
        assert_eq!(ContainerEngine::select("").unwrap(), ContainerEngine::Docker);
    }

    #[test]
    fn select_rejects_unknown() {
        let err = ContainerEngine::select("containerd").unwrap_err();
        assert!(matches!(err, PorchletError::UnsupportedRuntime(ref v) if v == "containerd"));
        assert!(err.to_string().contains("must be either docker or podman"));
    }

    #[test]
    #[serial]
    fn env_overrides_configured_engine() {
        std::env::set_var(CONTAINER_RUNTIME_ENV, "podman");
        let engine = ContainerEngine::from_env_or("docker");
        std::env::remove_var(CONTAINER_RUNTIME_ENV);
        assert_eq!(engine.unwrap(), ContainerEngine::Podman);
    }

    #[test]
    #[serial]
    fn unset_env_uses_configured_engine() {
        std::env::remove_var(CONTAINER_RUNTIME_ENV);
        assert_eq!(
            ContainerEngine::from_env_or("podman").unwrap(),
            ContainerEngine::Podman
        );
        assert_eq!(
            ContainerEngine::from_env_or("").unwrap(),
            ContainerEngine::Docker
        );
    }
}
