//! Error types for Porchlet
//!
//! All modules use `PorchletResult<T>` as their return type.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Porchlet operations
pub type PorchletResult<T> = Result<T, PorchletError>;

/// A single field validation failure, addressed by its path in the object
/// (e.g. `spec.lifecycle`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted field path
    pub path: String,
    /// The offending value, rendered as a string
    pub value: String,
    /// Human-readable explanation
    pub detail: String,
}

impl FieldError {
    /// Create an "invalid value" field error
    pub fn invalid(
        path: impl Into<String>,
        value: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: Invalid value: \"{}\": {}",
            self.path, self.value, self.detail
        )
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// All errors that can occur in Porchlet
#[derive(Error, Debug)]
pub enum PorchletError {
    // Request errors
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },

    #[error("{kind} \"{name}\" is invalid: [{}]", join_field_errors(.errors))]
    Invalid {
        kind: String,
        name: String,
        errors: Vec<FieldError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    // Environment errors
    #[error("unsupported runtime: \"{0}\" the runtime must be either docker or podman")]
    UnsupportedRuntime(String),

    #[error("{0}")]
    RuntimeUnavailable(String),

    // Function errors
    #[error("function exited with code {exit_code}: {stderr}")]
    ExecFailed { exit_code: i32, stderr: String },

    #[error("unexpected function error: {0}")]
    UnexpectedFunction(String),

    #[error("function requires storage mounts but mounting is not permitted: {0}")]
    MountNotPermitted(String),

    #[error("Invalid storage mount {spec}: {reason}")]
    InvalidMount { spec: String, reason: String },

    // Package content errors
    #[error("package cannot contain {kind} ({path:?})")]
    UnsupportedEntry { path: String, kind: String },

    #[error("Invalid package archive: {0}")]
    Archive(String),

    // Registry errors
    #[error("Registry error for {image}: {reason}")]
    Registry { image: String, reason: String },

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl PorchletError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a not-found error for a resource kind
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            name: name.into(),
        }
    }

    /// Create a validation error for a package revision
    pub fn invalid(name: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self::Invalid {
            kind: "PackageRevision".to_string(),
            name: name.into(),
            errors,
        }
    }

    /// Create a registry error
    pub fn registry(image: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::Registry {
            image: image.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap any error as an internal error, keeping validation and
    /// not-found errors intact so callers still see them.
    pub fn into_internal(self) -> Self {
        match self {
            Self::BadRequest(_) | Self::NotFound { .. } | Self::Invalid { .. } | Self::Internal(_) => {
                self
            }
            other => Self::Internal(other.to_string()),
        }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a field validation error
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    /// Field errors carried by a validation error
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Invalid { errors, .. } => errors,
            _ => &[],
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedRuntime(_) => Some("Set PORCHLET_FN_RUNTIME to docker or podman"),
            Self::RuntimeUnavailable(msg) if msg.starts_with("docker") => {
                Some("Install docker from https://docs.docker.com/get-docker/")
            }
            Self::RuntimeUnavailable(_) => {
                Some("Install podman from https://podman.io/getting-started/installation")
            }
            Self::MountNotPermitted(_) => Some("Re-run with --allow-mount"),
            _ => None,
        }
    }
}
