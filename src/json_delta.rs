//! Human-readable differences between consecutive request bodies.
//!
//! Each request to a chat-style API repeats the whole conversation so far, so
//! two consecutive bodies are mostly identical. [`delta`] reduces the second
//! body to what changed. The result is itself JSON, shaped like the new value:
//!
//! - `"-key": null` the key was removed
//! - `"+key": value` the key was added
//! - `"*key": delta` the value changed (recursively)
//! - `"key+": [items]` the array only grew; these items were appended
//!
//! Arrays that changed in any other way are shown in full.

use serde_json::{Map, Value};

/// Returns `None` when `prev` and `new` are identical.
pub fn delta(prev: &Value, new: &Value) -> Option<Value> {
    match (prev, new) {
        (Value::Object(prev), Value::Object(new)) => object_delta(prev, new),
        _ => (prev != new).then(|| new.clone()),
    }
}

/// The tail of `new` when `new` starts with all of `prev`.
fn appended<'a>(prev: &[Value], new: &'a [Value]) -> Option<&'a [Value]> {
    if prev.len() > new.len() {
        return None;
    }
    prev.iter()
        .zip(new)
        .all(|(a, b)| a == b)
        .then(|| &new[prev.len()..])
}

fn object_delta(prev: &Map<String, Value>, new: &Map<String, Value>) -> Option<Value> {
    let mut out = Map::new();

    let mut removed: Vec<&String> = prev.keys().filter(|k| !new.contains_key(*k)).collect();
    removed.sort();
    for key in removed {
        out.insert(format!("-{key}"), Value::Null);
    }

    let mut added: Vec<&String> = new.keys().filter(|k| !prev.contains_key(*k)).collect();
    added.sort();
    for key in added {
        out.insert(format!("+{key}"), new[key].clone());
    }

    let mut shared: Vec<&String> = new.keys().filter(|k| prev.contains_key(*k)).collect();
    shared.sort();
    for key in shared {
        let (a, b) = (&prev[key], &new[key]);
        if let (Value::Array(a), Value::Array(b)) = (a, b)
            && let Some(tail) = appended(a, b)
        {
            if !tail.is_empty() {
                out.insert(format!("{key}+"), Value::Array(tail.to_vec()));
            }
            continue;
        }
        if let Some(changed) = delta(a, b) {
            out.insert(format!("*{key}"), changed);
        }
    }

    (!out.is_empty()).then_some(Value::Object(out))
}
