//! Porchlet - package orchestration over OCI registries
//!
//! Serves package revisions through a lifecycle-enforcing store, keeps
//! their contents in registry images behind a digest-keyed disk cache, and
//! runs package functions in sandboxed containers.

pub mod api;
pub mod archive;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fnruntime;
pub mod lifecycle;
pub mod oci;
pub mod repository;

pub use error::{PorchletError, PorchletResult};
