use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Core FHIR resource structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    /// All other fields are stored here
    #[serde(flatten)]
    pub rest: Value,
}

/// FHIR resource metadata
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Meta {
    #[serde(rename = "versionId", skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,
}

impl Resource {
    /// Parse a resource from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Convert the resource to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Write versionId / lastUpdated into a resource body's meta, creating it
/// if absent. Used when turning a stored version vertex back into a resource.
pub fn inject_meta(resource: &mut Value, version_id: Option<&str>, last_updated: Option<&str>) {
    let obj = match resource.as_object_mut() {
        Some(o) => o,
        None => return,
    };
    let meta = obj
        .entry("meta".to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        if let Some(vid) = version_id {
            meta.insert("versionId".to_string(), Value::String(vid.to_string()));
        }
        if let Some(ts) = last_updated {
            meta.insert("lastUpdated".to_string(), Value::String(ts.to_string()));
        }
    }
}

/// Collect identifier token values from a resource body.
///
/// Returns each `identifier[].value` string; when a system is present the
/// `system|value` composite is included as well, so token queries match in
/// either form.
pub fn identifier_values(resource: &Value) -> Vec<String> {
    let mut values = Vec::new();
    let identifiers = match resource.get("identifier").and_then(|v| v.as_array()) {
        Some(arr) => arr,
        None => return values,
    };
    for identifier in identifiers {
        let value = match identifier.get("value").and_then(|v| v.as_str()) {
            Some(v) => v,
            None => continue,
        };
        values.push(value.to_string());
        if let Some(system) = identifier.get("system").and_then(|v| v.as_str()) {
            values.push(format!("{}|{}", system, value));
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_patient() {
        let json = r#"{
            "resourceType": "Patient",
            "id": "p1",
            "meta": {
                "versionId": "2",
                "lastUpdated": "2026-01-01T00:00:00Z"
            },
            "name": [{"family": "Doe", "given": ["Jane"]}]
        }"#;

        let resource = Resource::from_json(json).unwrap();
        assert_eq!(resource.resource_type, "Patient");
        assert_eq!(resource.id, Some("p1".to_string()));
        assert_eq!(resource.meta.unwrap().version_id, Some("2".to_string()));
    }

    #[test]
    fn test_roundtrip_keeps_extra_fields() {
        let json = r#"{"resourceType":"Patient","id":"456","gender":"female"}"#;
        let resource = Resource::from_json(json).unwrap();
        let output = resource.to_json().unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(reparsed["gender"], "female");
    }

    #[test]
    fn test_inject_meta_creates_meta() {
        let mut body = json!({"resourceType": "Patient", "id": "p1"});
        inject_meta(&mut body, Some("3"), Some("2026-02-03T04:05:06Z"));
        assert_eq!(body["meta"]["versionId"], "3");
        assert_eq!(body["meta"]["lastUpdated"], "2026-02-03T04:05:06Z");
    }

    #[test]
    fn test_inject_meta_preserves_existing_fields() {
        let mut body = json!({"resourceType": "Patient", "meta": {"source": "import"}});
        inject_meta(&mut body, Some("1"), None);
        assert_eq!(body["meta"]["source"], "import");
        assert_eq!(body["meta"]["versionId"], "1");
    }

    #[test]
    fn test_identifier_values() {
        let body = json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": "http://hospital.example/mrn", "value": "abc"},
                {"value": "def"},
                {"system": "http://hospital.example/mrn"}
            ]
        });
        let values = identifier_values(&body);
        assert_eq!(
            values,
            vec![
                "abc".to_string(),
                "http://hospital.example/mrn|abc".to_string(),
                "def".to_string(),
            ]
        );
    }

    #[test]
    fn test_identifier_values_absent() {
        let body = json!({"resourceType": "Patient"});
        assert!(identifier_values(&body).is_empty());
    }
}
