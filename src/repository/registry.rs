//! Repository registrations stored in a TOML file
//!
//! ```toml
//! [[repository]]
//! name = "blueprints"
//! namespace = "default"
//! registry = "localhost:5000/blueprints"
//! insecure = true
//! ```

use crate::error::{PorchletError, PorchletResult};
use crate::repository::RepositoryResolver;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

fn default_namespace() -> String {
    "default".to_string()
}

/// A registered repository
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Image prefix packages live under (`host/path`)
    pub registry: String,

    /// Talk plain http to the registry
    #[serde(default)]
    pub insecure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl RepositorySpec {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        registry: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            registry: registry.into(),
            insecure: false,
            username: None,
            password: None,
        }
    }
}

// Keep passwords out of logs
impl fmt::Debug for RepositorySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositorySpec")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("registry", &self.registry)
            .field("insecure", &self.insecure)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Contents of the repositories file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoriesFile {
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositorySpec>,
}

/// Resolver reading a TOML file on every lookup
#[derive(Debug, Clone)]
pub struct FileRepositoryResolver {
    path: PathBuf,
}

impl FileRepositoryResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file; a missing file registers nothing
    pub async fn load(&self) -> PorchletResult<RepositoriesFile> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No repositories file at {}", self.path.display());
                return Ok(RepositoriesFile::default());
            }
            Err(e) => {
                return Err(PorchletError::io(
                    format!("reading repositories from {}", self.path.display()),
                    e,
                ))
            }
        };

        toml::from_str(&content).map_err(|e| PorchletError::ConfigInvalid {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl RepositoryResolver for FileRepositoryResolver {
    async fn get(&self, namespace: &str, name: &str) -> PorchletResult<Option<RepositorySpec>> {
        Ok(self
            .load()
            .await?
            .repositories
            .into_iter()
            .find(|r| r.namespace == namespace && r.name == name))
    }

    async fn list(&self, namespace: &str) -> PorchletResult<Vec<RepositorySpec>> {
        Ok(self
            .load()
            .await?
            .repositories
            .into_iter()
            .filter(|r| r.namespace == namespace)
            .collect())
    }
}
