//! Configuration schema for Porchlet
//!
//! Configuration is stored at `~/.config/porchlet/config.toml`

use crate::fnruntime::{ImagePullPolicy, DEFAULT_FUNCTION_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Container engine settings
    pub runtime: RuntimeConfig,

    /// Function execution defaults
    pub function: FunctionConfig,

    /// Registry cache settings
    pub cache: CacheConfig,

    /// Repository registration settings
    pub repositories: RepositoriesConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engine name ("docker" or "podman"); `PORCHLET_FN_RUNTIME` wins
    pub engine: String,

    /// Engine binary if not on PATH under its usual name
    pub binary: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            binary: None,
        }
    }
}

/// A function registered by name, referenced as `namespace:name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub namespace: String,
    pub name: String,
    pub image: String,
}

/// Function execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    /// Registry prefix for short function names
    pub default_registry: String,

    /// Kill functions after this many seconds
    pub timeout_secs: u64,

    /// Image pull policy (Always, IfNotPresent, Never)
    pub pull_policy: Option<ImagePullPolicy>,

    /// `uid:gid` to run functions as (default: nobody)
    pub uidgid: Option<String>,

    /// Registered functions
    pub catalog: Vec<CatalogEntry>,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            default_registry: "gcr.io/kpt-fn/".to_string(),
            timeout_secs: DEFAULT_FUNCTION_TIMEOUT.as_secs(),
            pull_policy: None,
            uidgid: None,
            catalog: vec![],
        }
    }
}

/// Registry cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root (default: the platform cache dir)
    pub dir: Option<PathBuf>,
}

/// Repository registration configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoriesConfig {
    /// Repository file (default: `repositories.toml` beside the config)
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[runtime]"));
        assert!(toml.contains("[function]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.runtime.engine, "docker");
        assert_eq!(config.function.timeout_secs, 300);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [runtime]
            engine = "podman"

            [function]
            pull_policy = "Never"

            [[function.catalog]]
            namespace = "default"
            name = "set-labels:v1:latest"
            image = "registry.local/fns/set-labels:v1"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.engine, "podman");
        assert_eq!(config.function.pull_policy, Some(ImagePullPolicy::Never));
        assert_eq!(config.function.catalog.len(), 1);
        assert_eq!(config.function.default_registry, "gcr.io/kpt-fn/"); // default preserved
    }
}
