use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use graphir_core::OperationOutcome;

use crate::AppState;

/// $validate operation (POST /{resource_type}/$validate)
///
/// Never persists. Always returns 200 OK with an OperationOutcome:
/// severity=information on success, severity=error on failure.
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    // If wrapped in Parameters, extract the resource parameter
    let resource = if body.get("resourceType").and_then(|v| v.as_str()) == Some("Parameters") {
        extract_resource_from_parameters(&body).unwrap_or(body)
    } else {
        body
    };

    let body_type = resource
        .get("resourceType")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !body_type.is_empty() && body_type != resource_type {
        return Json(json!(OperationOutcome::invalid(format!(
            "Resource type in body ({}) does not match URL ({})",
            body_type, resource_type
        ))));
    }

    match state.validator.validate(&resource) {
        Ok(()) => Json(json!(OperationOutcome::success("Validation successful"))),
        Err(message) => Json(json!(OperationOutcome::invalid(message))),
    }
}

/// Extract a resource from a FHIR Parameters wrapper.
/// Looks for the parameter named "resource".
fn extract_resource_from_parameters(params: &Value) -> Option<Value> {
    params
        .get("parameter")
        .and_then(|p| p.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|p| p.get("name").and_then(|n| n.as_str()) == Some("resource"))
        })
        .and_then(|p| p.get("resource"))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_resource_from_parameters() {
        let params = json!({
            "resourceType": "Parameters",
            "parameter": [{
                "name": "resource",
                "resource": {"resourceType": "Patient", "id": "p1"}
            }]
        });
        let resource = extract_resource_from_parameters(&params).unwrap();
        assert_eq!(resource["resourceType"], "Patient");

        let empty = json!({"resourceType": "Parameters", "parameter": []});
        assert!(extract_resource_from_parameters(&empty).is_none());
    }
}
