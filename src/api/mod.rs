//! PackageRevision resource types
//!
//! The object model served by the lifecycle store and persisted by
//! repositories. Field names serialize in camelCase to match the
//! resource API.

mod task;

pub use task::{FunctionEvalTaskSpec, InitTaskSpec, Task, TaskType};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Resource name used in not-found errors for package revisions
pub const PACKAGE_REVISIONS_RESOURCE: &str = "packagerevisions";

/// Resource name used in not-found errors for repositories
pub const REPOSITORIES_RESOURCE: &str = "repositories";

/// Number of hex characters of the identity hash kept in object names
const NAME_HASH_LEN: usize = 40;

/// Promotion state of a package revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Mutable, unpublished
    Draft,
    /// Pending review
    Proposed,
    /// Immutable terminal state
    Published,
}

impl Lifecycle {
    /// Canonical string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Proposed => "Proposed",
            Self::Published => "Published",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(Self::Draft),
            "Proposed" => Ok(Self::Proposed),
            "Published" => Ok(Self::Published),
            other => Err(format!("unknown lifecycle {:?}", other)),
        }
    }
}

/// Render an optional lifecycle the way validation messages show it
pub fn lifecycle_str(lifecycle: Option<Lifecycle>) -> &'static str {
    lifecycle.map(|l| l.as_str()).unwrap_or("")
}

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Server-assigned name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Namespace the revision lives in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Creation time (RFC 3339), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

/// Desired state of a package revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRevisionSpec {
    /// Package name within the repository
    #[serde(default)]
    pub package_name: String,

    /// Owning repository
    #[serde(default)]
    pub repository: String,

    /// Revision tag (e.g. `v1`)
    #[serde(default)]
    pub revision: String,

    /// Lifecycle; unset is treated as Draft
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,

    /// Provenance records, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
}

/// A versioned snapshot of a package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRevision {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PackageRevisionSpec,
}

impl PackageRevision {
    /// Build a revision for the given identity, with its name derived
    pub fn new(
        namespace: impl Into<String>,
        repository: impl Into<String>,
        package_name: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        let mut obj = Self {
            metadata: ObjectMeta {
                namespace: namespace.into(),
                ..Default::default()
            },
            spec: PackageRevisionSpec {
                repository: repository.into(),
                package_name: package_name.into(),
                revision: revision.into(),
                ..Default::default()
            },
        };
        obj.metadata.name = obj.identity_name();
        obj
    }

    /// The deterministic object name for this revision's identity
    pub fn identity_name(&self) -> String {
        package_revision_name(
            &self.spec.repository,
            &self.spec.package_name,
            &self.spec.revision,
        )
    }

    /// Lifecycle with unset treated as Draft
    pub fn effective_lifecycle(&self) -> Lifecycle {
        self.spec.lifecycle.unwrap_or(Lifecycle::Draft)
    }
}

/// Derive the object name for a `(repository, package, revision)` identity.
///
/// The repository name stays readable as the prefix so the owning
/// repository can be recovered with [`parse_repository_name`].
pub fn package_revision_name(repository: &str, package_name: &str, revision: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repository.as_bytes());
    hasher.update(b"/");
    hasher.update(package_name.as_bytes());
    hasher.update(b"/");
    hasher.update(revision.as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{}-{}", repository, &hash[..NAME_HASH_LEN])
}

/// Recover the repository name from a package revision name
pub fn parse_repository_name(name: &str) -> Option<&str> {
    let (repository, hash) = name.rsplit_once('-')?;
    if repository.is_empty()
        || hash.len() != NAME_HASH_LEN
        || !hash.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }
    Some(repository)
}

/// Raw file contents of a package, keyed by relative path
pub type PackageContents = BTreeMap<String, Vec<u8>>;

/// The file tree of a package revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageResources {
    pub contents: PackageContents,
}

impl PackageResources {
    /// An empty file tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the tree holds no files
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Add or replace a file
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.contents.insert(path.into(), content.into());
    }

    /// A file's contents when it is valid UTF-8
    pub fn text(&self, path: &str) -> Option<&str> {
        self.contents
            .get(path)
            .and_then(|data| std::str::from_utf8(data).ok())
    }
}
