//! Create and update validation for package revisions
//!
//! ```text
//!   Draft ──update──▶ Proposed ──approve──▶ Published
//!     ▲                  │
//!     └─────update───────┘
//! ```
//!
//! Published revisions accept only deletion.

use crate::api::{lifecycle_str, Lifecycle, PackageRevision};
use crate::error::FieldError;

const LIFECYCLE_PATH: &str = "spec.lifecycle";

/// Lifecycles a revision may be updated from or to
const UPDATABLE: [Lifecycle; 2] = [Lifecycle::Draft, Lifecycle::Proposed];

fn allowed(lifecycle: Option<Lifecycle>, values: &[Lifecycle]) -> bool {
    lifecycle.map_or(true, |l| values.contains(&l))
}

fn joined(values: &[Lifecycle]) -> String {
    values
        .iter()
        .map(Lifecycle::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Default an unset lifecycle to Draft
pub fn canonicalize(obj: &mut PackageRevision) {
    if obj.spec.lifecycle.is_none() {
        obj.spec.lifecycle = Some(Lifecycle::Draft);
    }
}

/// New revisions start as drafts
pub fn validate_create(obj: &PackageRevision) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if !allowed(obj.spec.lifecycle, &[Lifecycle::Draft]) {
        errors.push(FieldError::invalid(
            LIFECYCLE_PATH,
            lifecycle_str(obj.spec.lifecycle),
            format!("value can be only created as {}", joined(&[Lifecycle::Draft])),
        ));
    }
    errors
}

/// Check a general update from `old` to `new`; all failures are reported
pub fn validate_update(new: &PackageRevision, old: &PackageRevision) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !allowed(old.spec.lifecycle, &UPDATABLE) {
        errors.push(FieldError::invalid(
            LIFECYCLE_PATH,
            lifecycle_str(old.spec.lifecycle),
            format!(
                "can only update package with lifecycle value one of {}",
                joined(&UPDATABLE)
            ),
        ));
    }

    if !allowed(new.spec.lifecycle, &UPDATABLE) {
        errors.push(FieldError::invalid(
            LIFECYCLE_PATH,
            lifecycle_str(new.spec.lifecycle),
            format!("value can be only updated to {}", joined(&UPDATABLE)),
        ));
    }

    for (path, new_value, old_value) in [
        ("spec.repository", &new.spec.repository, &old.spec.repository),
        ("spec.packageName", &new.spec.package_name, &old.spec.package_name),
        ("spec.revision", &new.spec.revision, &old.spec.revision),
    ] {
        if new_value != old_value {
            errors.push(FieldError::invalid(path, new_value.as_str(), "field is immutable"));
        }
    }

    if !new.spec.tasks.starts_with(&old.spec.tasks) {
        errors.push(FieldError::invalid(
            "spec.tasks",
            format!("{} tasks", new.spec.tasks.len()),
            "tasks can only be appended",
        ));
    }

    errors
}

/// Only proposed revisions can be published
pub fn validate_approve(old: &PackageRevision) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if old.spec.lifecycle != Some(Lifecycle::Proposed) {
        errors.push(FieldError::invalid(
            LIFECYCLE_PATH,
            lifecycle_str(old.spec.lifecycle),
            format!(
                "can only approve package with lifecycle value {}",
                Lifecycle::Proposed
            ),
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Task;

    fn revision(lifecycle: Option<Lifecycle>) -> PackageRevision {
        let mut obj = PackageRevision::new("default", "blueprints", "basens", "v1");
        obj.spec.lifecycle = lifecycle;
        obj
    }

    #[test]
    fn create_accepts_only_draft_or_unset() {
        assert!(validate_create(&revision(None)).is_empty());
        assert!(validate_create(&revision(Some(Lifecycle::Draft))).is_empty());

        for lifecycle in [Lifecycle::Proposed, Lifecycle::Published] {
            let errors = validate_create(&revision(Some(lifecycle)));
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].path, "spec.lifecycle");
            assert_eq!(errors[0].value, lifecycle.as_str());
            assert_eq!(errors[0].detail, "value can be only created as Draft");
        }
    }

    #[test]
    fn update_transitions() {
        use Lifecycle::*;
        let ok = [
            (None, Some(Draft)),
            (Some(Draft), Some(Proposed)),
            (Some(Proposed), Some(Draft)),
            (Some(Proposed), Some(Proposed)),
        ];
        for (from, to) in ok {
            assert!(
                validate_update(&revision(to), &revision(from)).is_empty(),
                "{:?} -> {:?}",
                from,
                to
            );
        }
    }

    #[test]
    fn update_cannot_publish() {
        let errors = validate_update(
            &revision(Some(Lifecycle::Published)),
            &revision(Some(Lifecycle::Proposed)),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].detail, "value can be only updated to Draft,Proposed");
    }

    #[test]
    fn published_is_frozen() {
        let errors = validate_update(
            &revision(Some(Lifecycle::Draft)),
            &revision(Some(Lifecycle::Published)),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].detail,
            "can only update package with lifecycle value one of Draft,Proposed"
        );

        let errors = validate_update(
            &revision(Some(Lifecycle::Published)),
            &revision(Some(Lifecycle::Published)),
        );
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn identity_is_immutable() {
        let old = revision(Some(Lifecycle::Draft));
        let mut new = old.clone();
        new.spec.revision = "v2".to_string();
        new.spec.package_name = "other".to_string();

        let paths: Vec<String> = validate_update(&new, &old)
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["spec.packageName", "spec.revision"]);
    }

    #[test]
    fn tasks_are_append_only() {
        let mut old = revision(Some(Lifecycle::Draft));
        old.spec.tasks.push(Task::init(Default::default()));

        let mut appended = old.clone();
        appended.spec.tasks.push(Task::eval("set-labels", Default::default()));
        assert!(validate_update(&appended, &old).is_empty());

        let mut rewritten = old.clone();
        rewritten.spec.tasks = vec![Task::eval("set-labels", Default::default())];
        let errors = validate_update(&rewritten, &old);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "spec.tasks");
    }

    #[test]
    fn approve_requires_proposed() {
        assert!(validate_approve(&revision(Some(Lifecycle::Proposed))).is_empty());
        for lifecycle in [None, Some(Lifecycle::Draft), Some(Lifecycle::Published)] {
            let errors = validate_approve(&revision(lifecycle));
            assert_eq!(
                errors[0].detail,
                "can only approve package with lifecycle value Proposed"
            );
        }
    }

    #[test]
    fn canonicalize_defaults_to_draft() {
        let mut obj = revision(None);
        canonicalize(&mut obj);
        assert_eq!(obj.spec.lifecycle, Some(Lifecycle::Draft));

        let mut obj = revision(Some(Lifecycle::Proposed));
        canonicalize(&mut obj);
        assert_eq!(obj.spec.lifecycle, Some(Lifecycle::Proposed));
    }
}
