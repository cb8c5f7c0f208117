//! End-to-end integration test
//!
//! Drives the full stack over HTTP: CRUD + conditional headers, version
//! history, bundles, Patient/$everything, and the graph surface.

use graphir_core::SchemaValidator;
use graphir_server::{build_router, config::ServerConfig, AppState};
use graphir_store::SqliteGraph;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn test_schema() -> Value {
    json!({
        "id": "http://hl7.org/fhir/json-schema/6.0.0-ballot3",
        "discriminator": {
            "mapping": {
                "Patient": "#/definitions/Patient",
                "Observation": "#/definitions/Observation",
                "Encounter": "#/definitions/Encounter",
                "Condition": "#/definitions/Condition",
                "Bundle": "#/definitions/Bundle",
                "OperationOutcome": "#/definitions/OperationOutcome"
            }
        },
        "definitions": {}
    })
}

/// Start a test server on a random port, returns (fhir_base, root_base, _temp_dir)
async fn start_test_server() -> (String, String, TempDir) {
    let temp_dir = TempDir::new().unwrap();

    let graph = SqliteGraph::open(temp_dir.path().join("graph.sqlite")).unwrap();
    let validator = SchemaValidator::from_value(test_schema());
    let config = ServerConfig::default();
    let base_path = config.fhir.base_path.clone();

    let state = Arc::new(AppState::new(Arc::new(graph), validator, config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let root = format!("http://{}", addr);
    let fhir = format!("{}{}", root, base_path);
    (fhir, root, temp_dir)
}

#[tokio::test]
async fn test_health_and_metadata() {
    let (fhir, root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/health", root)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["fhirVersion"], "6.0.0-ballot3");

    let resp = client.get(format!("{}/metadata", fhir)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["resourceType"], "CapabilityStatement");
    assert_eq!(body["status"], "active");
    assert_eq!(body["kind"], "instance");
    assert_eq!(body["fhirVersion"], "6.0.0-ballot3");
    assert_eq!(body["patchFormat"][0], "application/json-patch+json");

    let patient = body["rest"][0]["resource"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["type"] == "Patient")
        .unwrap();
    assert_eq!(patient["versioning"], "versioned");
    assert_eq!(patient["conditionalDelete"], "single");
    assert_eq!(patient["searchParam"][0]["name"], "_id");

    let system: Vec<&str> = body["rest"][0]["interaction"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["code"].as_str())
        .collect();
    assert_eq!(system, ["transaction", "batch", "search-system", "history-system"]);
}

#[tokio::test]
async fn test_crud_with_conditional_headers() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // Create
    let patient = json!({"resourceType": "Patient", "id": "p1", "gender": "male"});
    let resp = client
        .post(format!("{}/Patient", fhir))
        .header("Content-Type", "application/fhir+json")
        .json(&patient)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert!(resp
        .headers()
        .get("Location")
        .unwrap()
        .to_str()
        .unwrap()
        .ends_with("/Patient/p1"));
    let etag = resp.headers().get("ETag").unwrap().to_str().unwrap().to_string();
    assert_eq!(etag, "W/\"1\"");
    assert!(resp.headers().get("Last-Modified").is_some());

    // Read
    let resp = client.get(format!("{}/Patient/p1", fhir)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["gender"], "male");
    assert_eq!(body["meta"]["versionId"], "1");

    // Conditional read: matching If-None-Match is 304
    let resp = client
        .get(format!("{}/Patient/p1", fhir))
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 304);

    // Update with a stale If-Match fails the precondition
    let updated = json!({"resourceType": "Patient", "id": "p1", "gender": "female"});
    let resp = client
        .put(format!("{}/Patient/p1", fhir))
        .header("If-Match", "W/\"9\"")
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 412);

    // Update with the right If-Match succeeds
    let resp = client
        .put(format!("{}/Patient/p1", fhir))
        .header("If-Match", &etag)
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["meta"]["versionId"], "2");

    // If-Match against a resource that does not exist proceeds as create
    let other = json!({"resourceType": "Patient", "id": "p2"});
    let resp = client
        .put(format!("{}/Patient/p2", fhir))
        .header("If-Match", "W/\"5\"")
        .json(&other)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn test_version_history_and_vread() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // create, update, soft-delete
    let v1 = json!({"resourceType": "Patient", "id": "p1", "gender": "male"});
    client.post(format!("{}/Patient", fhir)).json(&v1).send().await.unwrap();
    let v2 = json!({"resourceType": "Patient", "id": "p1", "gender": "female"});
    client.put(format!("{}/Patient/p1", fhir)).json(&v2).send().await.unwrap();
    let resp = client.delete(format!("{}/Patient/p1", fhir)).send().await.unwrap();
    assert_eq!(resp.status(), 204);

    // read after delete is not-found
    let resp = client.get(format!("{}/Patient/p1", fhir)).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    // deleting again is a conflict
    let resp = client.delete(format!("{}/Patient/p1", fhir)).send().await.unwrap();
    assert_eq!(resp.status(), 409);

    // history: three versions, newest first, deletion entry has no body
    let resp = client
        .get(format!("{}/Patient/p1/_history", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "history");
    assert_eq!(bundle["total"], 3);
    let entries = bundle["entry"].as_array().unwrap();
    assert_eq!(entries[0]["request"]["method"], "DELETE");
    assert!(entries[0].get("resource").is_none());
    assert_eq!(entries[1]["request"]["method"], "PUT");
    assert_eq!(entries[1]["resource"]["gender"], "female");
    assert_eq!(entries[2]["request"]["method"], "POST");

    // vread: old versions stay readable, the tombstone is gone
    let resp = client
        .get(format!("{}/Patient/p1/_history/1", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["gender"], "male");

    let resp = client
        .get(format!("{}/Patient/p1/_history/3", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 410);

    let resp = client
        .get(format!("{}/Patient/p1/_history/9", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // the update and the deletion also show up in type and system history
    let resp = client
        .get(format!("{}/Patient/_history", fhir))
        .send()
        .await
        .unwrap();
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["total"], 3);

    let resp = client.get(format!("{}/_history", fhir)).send().await.unwrap();
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["total"], 3);
}

#[tokio::test]
async fn test_conditional_create() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    for id in ["pa", "pb"] {
        let patient = json!({
            "resourceType": "Patient",
            "id": id,
            "identifier": [{"value": "abc"}]
        });
        client.post(format!("{}/Patient", fhir)).json(&patient).send().await.unwrap();
    }
    let unique = json!({
        "resourceType": "Patient",
        "id": "pc",
        "identifier": [{"value": "unique"}]
    });
    client.post(format!("{}/Patient", fhir)).json(&unique).send().await.unwrap();

    let candidate = json!({"resourceType": "Patient", "identifier": [{"value": "x"}]});

    // two matches: 412 with a duplicate outcome
    let resp = client
        .post(format!("{}/Patient", fhir))
        .header("If-None-Exist", "identifier=abc")
        .json(&candidate)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 412);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    assert_eq!(outcome["issue"][0]["code"], "duplicate");

    // one match: 200 with the existing resource
    let resp = client
        .post(format!("{}/Patient", fhir))
        .header("If-None-Exist", "identifier=unique")
        .json(&candidate)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "pc");

    // zero matches: created
    let resp = client
        .post(format!("{}/Patient", fhir))
        .header("If-None-Exist", "identifier=nothing")
        .json(&candidate)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn test_conditional_update_and_delete() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // conditional update with no match and an id in the body creates
    let patient = json!({
        "resourceType": "Patient",
        "id": "p1",
        "identifier": [{"value": "abc"}],
        "gender": "male"
    });
    let resp = client
        .put(format!("{}/Patient?identifier=abc", fhir))
        .json(&patient)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // one match: updated
    let updated = json!({
        "resourceType": "Patient",
        "id": "p1",
        "identifier": [{"value": "abc"}],
        "gender": "female"
    });
    let resp = client
        .put(format!("{}/Patient?identifier=abc", fhir))
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["meta"]["versionId"], "2");

    // conditional delete with zero criteria is a validation failure
    let resp = client.delete(format!("{}/Patient", fhir)).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    // conditional delete of the single match tombstones it
    let resp = client
        .delete(format!("{}/Patient?identifier=abc", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client.get(format!("{}/Patient/p1", fhir)).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    // nothing left to match
    let resp = client
        .delete(format!("{}/Patient?identifier=abc", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_json_patch() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let patient = json!({"resourceType": "Patient", "id": "p1", "gender": "male"});
    client.post(format!("{}/Patient", fhir)).json(&patient).send().await.unwrap();

    let patch = json!([{"op": "replace", "path": "/gender", "value": "female"}]);
    let resp = client
        .patch(format!("{}/Patient/p1", fhir))
        .header("Content-Type", "application/json-patch+json")
        .json(&patch)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client.get(format!("{}/Patient/p1", fhir)).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["gender"], "female");
    assert_eq!(body["meta"]["versionId"], "2");

    // failed test op: 422, nothing stored
    let patch = json!([
        {"op": "test", "path": "/gender", "value": "unknown"},
        {"op": "replace", "path": "/gender", "value": "other"}
    ]);
    let resp = client
        .patch(format!("{}/Patient/p1", fhir))
        .header("Content-Type", "application/json-patch+json")
        .json(&patch)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);

    let resp = client.get(format!("{}/Patient/p1", fhir)).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["gender"], "female");
    assert_eq!(body["meta"]["versionId"], "2");
}

#[tokio::test]
async fn test_transaction_and_batch_bundles() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let entries = json!([
        {
            "fullUrl": "urn:uuid:patient-1",
            "resource": {"resourceType": "Patient", "gender": "female"},
            "request": {"method": "POST", "url": "Patient"}
        },
        {
            "request": {"method": "DELETE", "url": "Patient/p9"}
        }
    ]);

    // transaction: the missing DELETE target fails the whole bundle
    let bundle = json!({"resourceType": "Bundle", "type": "transaction", "entry": entries});
    let resp = client.post(&fhir).json(&bundle).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    assert_eq!(outcome["issue"][0]["code"], "not-found");

    // deletes run before creates, so the failed transaction wrote nothing
    let resp = client.get(format!("{}/Patient", fhir)).send().await.unwrap();
    let searchset: Value = resp.json().await.unwrap();
    assert_eq!(searchset["total"], 0);

    // batch: per-entry outcomes, overall 200
    let bundle = json!({"resourceType": "Bundle", "type": "batch", "entry": entries});
    let resp = client.post(&fhir).json(&bundle).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "batch-response");
    let responses = body["entry"].as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert!(responses[0]["response"]["status"].as_str().unwrap().contains("201"));
    assert!(responses[1]["response"]["status"].as_str().unwrap().contains("404"));

    // a successful transaction answers in request order
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "resource": {"resourceType": "Patient", "id": "tx1"},
                "request": {"method": "PUT", "url": "Patient/tx1"}
            },
            {
                "request": {"method": "GET", "url": "Patient/tx1"}
            }
        ]
    });
    let resp = client.post(&fhir).json(&bundle).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "transaction-response");
    let responses = body["entry"].as_array().unwrap();
    assert!(responses[0]["response"]["status"].as_str().unwrap().contains("201"));
    assert!(responses[1]["response"]["status"].as_str().unwrap().contains("200"));
    assert_eq!(responses[1]["resource"]["id"], "tx1");

    // unsupported methods are refused
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [{"request": {"method": "OPTIONS", "url": "Patient"}}]
    });
    let resp = client.post(&fhir).json(&bundle).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["entry"][0]["response"]["status"]
        .as_str()
        .unwrap()
        .contains("405"));
}

#[tokio::test]
async fn test_patient_everything() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let patient = json!({"resourceType": "Patient", "id": "p1"});
    client.post(format!("{}/Patient", fhir)).json(&patient).send().await.unwrap();

    let obs = json!({
        "resourceType": "Observation",
        "id": "o1",
        "status": "final",
        "subject": {"reference": "Patient/p1"}
    });
    client.post(format!("{}/Observation", fhir)).json(&obs).send().await.unwrap();

    let resp = client
        .get(format!("{}/Patient/p1/$everything", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "searchset");
    assert_eq!(bundle["total"], 2);
    let entries = bundle["entry"].as_array().unwrap();
    assert_eq!(entries[0]["resource"]["resourceType"], "Patient");
    assert_eq!(entries[1]["resource"]["resourceType"], "Observation");
    assert_eq!(bundle["link"][0]["relation"], "self");

    let resp = client
        .get(format!("{}/Patient/nobody/$everything", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_graph_surface_reference_materialization() {
    let (fhir, root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let patient = json!({"resourceType": "Patient", "id": "p1"});
    client.post(format!("{}/Patient", fhir)).json(&patient).send().await.unwrap();

    let obs = json!({
        "resourceType": "Observation",
        "id": "o1",
        "status": "final",
        "subject": {"reference": "Patient/p1"}
    });
    let resp = client
        .post(format!("{}/graph?materializeReferences=true", root))
        .json(&obs)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["fhirId"], "o1");
    assert_eq!(body["materializedReferences"], 1);

    // re-posting the same resource adds no further edges
    let resp = client
        .post(format!("{}/graph?materializeReferences=true", root))
        .json(&obs)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["materializedReferences"], 0);

    let resp = client
        .get(format!("{}/graph/Observation/o1/references", root))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let refs: Value = resp.json().await.unwrap();
    assert_eq!(refs[0]["path"], "subject.reference");
    assert_eq!(refs[0]["targetResourceType"], "Patient");
    assert_eq!(refs[0]["targetFhirId"], "p1");

    let resp = client
        .get(format!("{}/graph/Observation/o1", root))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["subject"]["reference"], "Patient/p1");

    let resp = client.get(format!("{}/graph/count", root)).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["vertices"].as_i64().unwrap() >= 2);

    // hard delete drops the vertex and its edges
    let resp = client
        .delete(format!("{}/graph/Observation/o1", root))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .get(format!("{}/graph/Observation/o1", root))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_search_and_validate() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    for (id, mrn) in [("p1", "abc"), ("p2", "abc"), ("p3", "zzz")] {
        let patient = json!({
            "resourceType": "Patient",
            "id": id,
            "identifier": [{"value": mrn}]
        });
        client.post(format!("{}/Patient", fhir)).json(&patient).send().await.unwrap();
    }

    let resp = client
        .get(format!("{}/Patient?identifier=abc", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["type"], "searchset");
    assert_eq!(bundle["total"], 2);
    assert_eq!(bundle["link"][0]["relation"], "self");

    let resp = client
        .get(format!("{}/Patient?_id=p3", fhir))
        .send()
        .await
        .unwrap();
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["total"], 1);
    assert_eq!(bundle["entry"][0]["resource"]["id"], "p3");

    // unknown parameters are refused
    let resp = client
        .get(format!("{}/Patient?name=Doe", fhir))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // cross-type search
    let resp = client
        .get(format!("{}/_search?_type=Patient&identifier=zzz", fhir))
        .send()
        .await
        .unwrap();
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["total"], 1);

    // $validate never persists
    let candidate = json!({"resourceType": "Patient", "id": "v1"});
    let resp = client
        .post(format!("{}/Patient/$validate", fhir))
        .json(&candidate)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["issue"][0]["severity"], "information");
    let resp = client.get(format!("{}/Patient/v1", fhir)).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    let mismatched = json!({"resourceType": "Observation", "status": "final"});
    let resp = client
        .post(format!("{}/Patient/$validate", fhir))
        .json(&mismatched)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["issue"][0]["severity"], "error");
}

#[tokio::test]
async fn test_invalid_resources_rejected() {
    let (fhir, _root, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // missing resourceType
    let resp = client
        .post(format!("{}/Patient", fhir))
        .json(&json!({"name": [{"family": "Doe"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // unknown resourceType
    let resp = client
        .post(format!("{}/Starship", fhir))
        .json(&json!({"resourceType": "Starship"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // non-string id
    let resp = client
        .post(format!("{}/Patient", fhir))
        .json(&json!({"resourceType": "Patient", "id": 7}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // body type disagreeing with the URL
    let resp = client
        .post(format!("{}/Observation", fhir))
        .json(&json!({"resourceType": "Patient", "id": "p1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
}
