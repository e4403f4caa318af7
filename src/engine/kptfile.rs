//! Kptfile rendering for newly initialized packages

use crate::api::InitTaskSpec;

/// Package metadata file name
pub const KPTFILE: &str = "Kptfile";

/// Render the Kptfile for a fresh package.
///
/// Free-form strings are written as JSON strings, which are valid YAML
/// scalars, so no quoting rules leak into the output.
pub fn render_kptfile(package_name: &str, spec: &InitTaskSpec) -> String {
    let mut out = String::new();
    out.push_str("apiVersion: kpt.dev/v1\n");
    out.push_str("kind: Kptfile\n");
    out.push_str("metadata:\n");
    out.push_str(&format!("  name: {}\n", quote(package_name)));
    out.push_str("  annotations:\n");
    out.push_str("    config.kubernetes.io/local-config: \"true\"\n");

    if spec.description.is_empty() && spec.site.is_empty() && spec.keywords.is_empty() {
        return out;
    }

    out.push_str("info:\n");
    if !spec.site.is_empty() {
        out.push_str(&format!("  site: {}\n", quote(&spec.site)));
    }
    if !spec.description.is_empty() {
        out.push_str(&format!("  description: {}\n", quote(&spec.description)));
    }
    if !spec.keywords.is_empty() {
        out.push_str("  keywords:\n");
        for keyword in &spec.keywords {
            out.push_str(&format!("    - {}\n", quote(keyword)));
        }
    }
    out
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_kptfile() {
        let kptfile = render_kptfile("basens", &InitTaskSpec::default());
        assert!(kptfile.starts_with("apiVersion: kpt.dev/v1\nkind: Kptfile\n"));
        assert!(kptfile.contains("  name: \"basens\"\n"));
        assert!(!kptfile.contains("info:"));
    }

    #[test]
    fn info_section_quotes_values() {
        let spec = InitTaskSpec {
            description: "base: namespace".to_string(),
            keywords: vec!["ns".to_string(), "with \"quotes\"".to_string()],
            site: String::new(),
        };
        let kptfile = render_kptfile("basens", &spec);
        assert!(kptfile.contains("  description: \"base: namespace\"\n"));
        assert!(kptfile.contains("    - \"with \\\"quotes\\\"\"\n"));
        assert!(!kptfile.contains("site:"));
    }
}
