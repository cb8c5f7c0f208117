//! FHIR JSON Schema ownership and validation.
//!
//! The schema document enumerates the supported resource types through its
//! top-level `discriminator.mapping`. Validation is shallow and lenient by
//! contract: a `$ref` that cannot be resolved within the document is treated
//! as satisfied, so the self-referential parts of the FHIR schema never fail
//! a resource that the resolvable parts accept.

use std::path::Path;

use serde_json::Value;

pub struct SchemaValidator {
    schema: Option<SchemaDocument>,
}

struct SchemaDocument {
    raw: Value,
    /// Keys of `discriminator.mapping`, ascending.
    types: Vec<String>,
}

impl SchemaValidator {
    /// Load the schema document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("cannot read {}: {}", path.as_ref().display(), e))?;
        let raw: Value =
            serde_json::from_str(&text).map_err(|e| format!("schema is not valid JSON: {}", e))?;
        Ok(Self::from_value(raw))
    }

    /// Build a validator from an in-memory schema document.
    pub fn from_value(raw: Value) -> Self {
        let mut types: Vec<String> = raw
            .pointer("/discriminator/mapping")
            .and_then(|m| m.as_object())
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        Self {
            schema: Some(SchemaDocument { raw, types }),
        }
    }

    /// A validator with no schema. Every validation fails until a schema is
    /// loaded, which turns all create/update/patch operations into errors.
    pub fn unloaded() -> Self {
        Self { schema: None }
    }

    pub fn is_loaded(&self) -> bool {
        self.schema.is_some()
    }

    /// Resource types enumerated by the schema, ascending.
    pub fn supported_types(&self) -> &[String] {
        self.schema.as_ref().map(|s| s.types.as_slice()).unwrap_or(&[])
    }

    /// Validate a resource body against the schema.
    pub fn validate(&self, doc: &Value) -> Result<(), String> {
        let schema = self
            .schema
            .as_ref()
            .ok_or_else(|| "FHIR schema is not loaded".to_string())?;

        let (resource_type, _) = self.extract_resource_info(doc)?;
        if !schema.types.iter().any(|t| t == &resource_type) {
            return Err(format!("Unknown resourceType: {}", resource_type));
        }

        // An unresolvable definition is not a failure.
        let definition = match schema.resolve_definition(&resource_type) {
            Some(d) => d,
            None => return Ok(()),
        };

        if let Some(required) = definition.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if doc.get(field).is_none() {
                    return Err(format!("Missing required field: {}.{}", resource_type, field));
                }
            }
        }

        let properties = definition.get("properties").and_then(|p| p.as_object());
        let closed = definition.get("additionalProperties") == Some(&Value::Bool(false));
        let body = doc.as_object().ok_or_else(|| "Resource must be a JSON object".to_string())?;

        for (key, value) in body {
            // Primitive-extension siblings (`_status` etc.) ride along.
            if key.starts_with('_') {
                continue;
            }
            let prop = match properties.and_then(|p| p.get(key)) {
                Some(p) => p,
                None => {
                    if closed {
                        return Err(format!("Unknown field for {}: {}", resource_type, key));
                    }
                    continue;
                }
            };
            if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
                let ok = match expected {
                    "string" => value.is_string(),
                    "boolean" => value.is_boolean(),
                    "number" => value.is_number(),
                    "array" => value.is_array(),
                    _ => true,
                };
                if !ok {
                    return Err(format!(
                        "Field {}.{} must be of type {}",
                        resource_type, key, expected
                    ));
                }
            }
        }

        Ok(())
    }

    /// Pull `(resourceType, id)` out of a resource body.
    pub fn extract_resource_info(&self, doc: &Value) -> Result<(String, Option<String>), String> {
        let resource_type = match doc.get("resourceType") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) | None => {
                return Err("Missing resourceType".to_string());
            }
            Some(_) => return Err("resourceType must be a string".to_string()),
        };
        let id = match doc.get("id") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err("Invalid id: must be string".to_string()),
        };
        Ok((resource_type, id))
    }
}

impl SchemaDocument {
    /// Follow the discriminator mapping for a type to its definition.
    /// Only intra-document `#/` pointers resolve; anything else is `None`.
    fn resolve_definition(&self, resource_type: &str) -> Option<&Value> {
        let target = self
            .raw
            .pointer("/discriminator/mapping")?
            .get(resource_type)?
            .as_str()?;
        let pointer = target.strip_prefix('#')?;
        self.raw.pointer(pointer)
    }
}
