//! Field selector parsing for list requests

use crate::error::{PorchletError, PorchletResult};
use crate::repository::PackageRevisionFilter;

/// Parse `field=value` terms separated by commas (`==` is accepted too).
///
/// Only equality on the identity fields and `spec.lifecycle` is supported.
pub fn parse_field_selector(selector: &str) -> PorchletResult<PackageRevisionFilter> {
    let mut filter = PackageRevisionFilter::default();

    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if term.contains("!=") {
            return Err(PorchletError::BadRequest(format!(
                "unsupported operator in field selector {:?}",
                term
            )));
        }
        let (field, value) = term
            .split_once("==")
            .or_else(|| term.split_once('='))
            .ok_or_else(|| {
                PorchletError::BadRequest(format!("invalid field selector {:?}", term))
            })?;
        let value = value.trim().to_string();

        match field.trim() {
            "metadata.name" => filter.name = Some(value),
            "spec.repository" => filter.repository = Some(value),
            "spec.packageName" => filter.package_name = Some(value),
            "spec.revision" => filter.revision = Some(value),
            "spec.lifecycle" => {
                let lifecycle = value.parse().map_err(|e: String| {
                    PorchletError::BadRequest(format!("invalid field selector: {}", e))
                })?;
                filter.lifecycle = Some(lifecycle);
            }
            other => {
                return Err(PorchletError::BadRequest(format!(
                    "unknown field selector {:?}",
                    other
                )))
            }
        }
    }

    Ok(filter)
}
