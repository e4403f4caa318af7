//! Package revision lifecycle store
//!
//! Serves list/get/create/update/delete over package revisions, enforcing
//! the Draft → Proposed → Published state machine before anything reaches
//! a repository.

mod selector;
mod store;
mod strategy;

pub use selector::parse_field_selector;
pub use store::{
    DeleteValidation, Mutation, PackageRevisionStorage, PackageRevisions, RequestContext,
};
pub use strategy::{canonicalize, validate_approve, validate_create, validate_update};
