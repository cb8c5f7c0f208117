//! Extraction of relative references from resource bodies.
//!
//! A relative reference is a `reference` field holding `Type/Id` — exactly
//! two non-empty segments. Absolute URLs and `#fragment` references to
//! contained resources are left alone.

use serde_json::Value;

/// One reference found inside a resource body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    /// Dotted path to the `reference` field, array indices in brackets,
    /// e.g. `subject.reference` or `contact[0].organization.reference`.
    pub path: String,
    pub target_type: String,
    pub target_id: String,
}

/// Walk a resource tree and collect every relative reference in it.
///
/// Pure function of the input: equal trees yield equal sequences, in
/// document order.
pub fn extract_references(resource: &Value) -> Vec<ResourceReference> {
    let mut found = Vec::new();
    walk(resource, &mut String::new(), &mut found);
    found
}

fn walk(value: &Value, path: &mut String, found: &mut Vec<ResourceReference>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let saved = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(key);

                if key == "reference" {
                    if let Some(s) = child.as_str() {
                        if let Some((target_type, target_id)) = parse_relative(s) {
                            found.push(ResourceReference {
                                path: path.clone(),
                                target_type,
                                target_id,
                            });
                        }
                    }
                } else {
                    walk(child, path, found);
                }
                path.truncate(saved);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let saved = path.len();
                path.push_str(&format!("[{}]", i));
                walk(item, path, found);
                path.truncate(saved);
            }
        }
        _ => {}
    }
}

/// Parse `Type/Id` into its two segments. Anything else — absolute URLs,
/// fragments, empty segments — yields `None`.
fn parse_relative(reference: &str) -> Option<(String, String)> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') || reference.contains("://") {
        return None;
    }
    let mut segments = reference.split('/');
    let target_type = segments.next()?;
    let target_id = segments.next()?;
    if segments.next().is_some() || target_type.is_empty() || target_id.is_empty() {
        return None;
    }
    Some((target_type.to_string(), target_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_reference() {
        let resource = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/p1"}
        });
        let refs = extract_references(&resource);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path, "subject.reference");
        assert_eq!(refs[0].target_type, "Patient");
        assert_eq!(refs[0].target_id, "p1");
    }

    #[test]
    fn test_array_references_get_indexed_paths() {
        let resource = json!({
            "resourceType": "DiagnosticReport",
            "result": [
                {"reference": "Observation/o1"},
                {"reference": "Observation/o2"}
            ]
        });
        let refs = extract_references(&resource);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].path, "result[0].reference");
        assert_eq!(refs[1].path, "result[1].reference");
        assert_eq!(refs[1].target_id, "o2");
    }

    #[test]
    fn test_nested_reference_path() {
        let resource = json!({
            "contact": [{"organization": {"reference": "Organization/org9"}}]
        });
        let refs = extract_references(&resource);
        assert_eq!(refs[0].path, "contact[0].organization.reference");
        assert_eq!(refs[0].target_type, "Organization");
    }

    #[test]
    fn test_absolute_and_fragment_references_ignored() {
        let resource = json!({
            "a": {"reference": "http://x/Patient/1"},
            "b": {"reference": "#p1"}
        });
        assert!(extract_references(&resource).is_empty());
    }

    #[test]
    fn test_malformed_references_ignored() {
        let resource = json!({
            "a": {"reference": "Patient/"},
            "b": {"reference": "/p1"},
            "c": {"reference": ""},
            "d": {"reference": "Patient/p1/extra"},
            "e": {"reference": 42}
        });
        assert!(extract_references(&resource).is_empty());
    }

    #[test]
    fn test_whitespace_trimmed() {
        let resource = json!({"subject": {"reference": "  Patient/p1  "}});
        let refs = extract_references(&resource);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target_id, "p1");
    }

    #[test]
    fn test_pure_function_of_input() {
        let resource = json!({
            "subject": {"reference": "Patient/p1"},
            "performer": [{"reference": "Practitioner/d1"}]
        });
        assert_eq!(extract_references(&resource), extract_references(&resource));
    }
}
