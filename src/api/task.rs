//! Provenance task records
//!
//! Tasks are append-only records of the operations that produced a
//! package revision. They are persisted in image history and replayed by
//! the package engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Kind of operation a task describes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Init,
    Clone,
    Edit,
    Patch,
    Eval,
    Update,
    /// Written by a newer producer; kept verbatim but never replayed
    Other(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::Clone => "clone",
            Self::Edit => "edit",
            Self::Patch => "patch",
            Self::Eval => "eval",
            Self::Update => "update",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "init" => Self::Init,
            "clone" => Self::Clone,
            "edit" => Self::Edit,
            "patch" => Self::Patch,
            "eval" => Self::Eval,
            "update" => Self::Update,
            _ => Self::Other(value),
        }
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        match value {
            TaskType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

/// Parameters for initializing a new package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitTaskSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub site: String,
}

/// Parameters for running a function over the package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionEvalTaskSpec {
    /// Function image, short names are expanded
    pub image: String,

    /// Key/value configuration passed to the function as environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_map: BTreeMap<String, String>,
}

/// One provenance record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Optional human-readable label
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitTaskSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval: Option<FunctionEvalTaskSpec>,

    /// Fields this version does not know, written back unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// An init task
    pub fn init(spec: InitTaskSpec) -> Self {
        Self {
            name: "init".to_string(),
            task_type: Some(TaskType::Init),
            init: Some(spec),
            ..Default::default()
        }
    }

    /// A function evaluation task
    pub fn eval(image: impl Into<String>, config_map: BTreeMap<String, String>) -> Self {
        Self {
            name: "eval".to_string(),
            task_type: Some(TaskType::Eval),
            eval: Some(FunctionEvalTaskSpec {
                image: image.into(),
                config_map,
            }),
            ..Default::default()
        }
    }
}
