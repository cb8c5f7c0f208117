//! JSON Patch (RFC 6902) application: `add`, `replace`, `remove`, `test`.
//!
//! Deliberately lenient where the wire format demands it: operations with
//! an unrecognized `op` are skipped, and any failure to apply — a bad
//! pointer, an out-of-bounds index, a failed `test` — yields no patched
//! document rather than a hard error.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
    Test { path: String, value: Value },
    #[serde(other)]
    Unknown,
}

/// Parse a patch document (a JSON array of operations).
pub fn parse_patch(body: &Value) -> Result<Vec<PatchOp>, String> {
    serde_json::from_value(body.clone()).map_err(|e| format!("Invalid JSON Patch: {}", e))
}

/// Apply a patch to a document. Returns the patched copy, or `None` when
/// any operation fails to apply.
pub fn apply(document: &Value, ops: &[PatchOp]) -> Option<Value> {
    let mut doc = document.clone();
    for op in ops {
        match op {
            PatchOp::Add { path, value } => add(&mut doc, path, value.clone())?,
            PatchOp::Replace { path, value } => replace(&mut doc, path, value.clone())?,
            PatchOp::Remove { path } => remove(&mut doc, path)?,
            PatchOp::Test { path, value } => {
                if resolve(&doc, path)? != value {
                    return None;
                }
            }
            PatchOp::Unknown => {}
        }
    }
    Some(doc)
}

/// Split a JSON pointer into unescaped segments. Empty pointer = the root.
fn segments(path: &str) -> Vec<String> {
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() {
        return Vec::new();
    }
    path.split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn array_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Navigate to the parent of the addressed location, returning it with the
/// final segment. `None` for the root pointer or an unreachable path.
fn parent<'a>(doc: &'a mut Value, segs: &[String]) -> Option<(&'a mut Value, String)> {
    let (last, init) = segs.split_last()?;
    let mut current = doc;
    for seg in init {
        current = match current {
            Value::Object(map) => map.get_mut(seg)?,
            Value::Array(arr) => arr.get_mut(array_index(seg)?)?,
            _ => return None,
        };
    }
    Some((current, last.clone()))
}

fn add(doc: &mut Value, path: &str, value: Value) -> Option<()> {
    let segs = segments(path);
    if segs.is_empty() {
        *doc = value;
        return Some(());
    }
    let (target, last) = parent(doc, &segs)?;
    match target {
        Value::Object(map) => {
            map.insert(last, value);
            Some(())
        }
        Value::Array(arr) => {
            if last == "-" {
                arr.push(value);
                return Some(());
            }
            let idx = array_index(&last)?;
            if idx > arr.len() {
                return None;
            }
            arr.insert(idx, value);
            Some(())
        }
        _ => None,
    }
}

fn replace(doc: &mut Value, path: &str, value: Value) -> Option<()> {
    let segs = segments(path);
    if segs.is_empty() {
        *doc = value;
        return Some(());
    }
    let (target, last) = parent(doc, &segs)?;
    match target {
        Value::Object(map) => {
            if !map.contains_key(&last) {
                return None;
            }
            map.insert(last, value);
            Some(())
        }
        Value::Array(arr) => {
            let idx = array_index(&last)?;
            let slot = arr.get_mut(idx)?;
            *slot = value;
            Some(())
        }
        _ => None,
    }
}

fn remove(doc: &mut Value, path: &str) -> Option<()> {
    let segs = segments(path);
    if segs.is_empty() {
        return None;
    }
    let (target, last) = parent(doc, &segs)?;
    match target {
        Value::Object(map) => map.remove(&last).map(|_| ()),
        Value::Array(arr) => {
            let idx = array_index(&last)?;
            if idx >= arr.len() {
                return None;
            }
            arr.remove(idx);
            Some(())
        }
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for seg in segments(path) {
        current = match current {
            Value::Object(map) => map.get(&seg)?,
            Value::Array(arr) => arr.get(array_index(&seg)?)?,
            _ => return None,
        };
    }
    Some(current)
}
