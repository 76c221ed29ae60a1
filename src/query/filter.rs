//! `where`-clause metadata filtering (spec §4.H): operators `$gt`, `$gte`,
//! `$lt`, `$lte`, `$in`, `$contains`, `$exists`, `$startsWith`, with implicit
//! equality for a bare value and dot-path nested keys.

use serde_json::Value;

use crate::types::Metadata;

fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |cur, segment| cur.get(segment))
}

fn numeric(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn compare(op_value: &Value, actual: &Value) -> Option<std::cmp::Ordering> {
    match (numeric(op_value), numeric(actual)) {
        (Some(a), Some(b)) => b.partial_cmp(&a),
        _ => actual.as_str().zip(op_value.as_str()).map(|(a, b)| a.cmp(b)),
    }
}

fn eval_operator(field_value: Option<&Value>, op: &str, op_value: &Value) -> bool {
    match op {
        "$exists" => field_value.is_some() == op_value.as_bool().unwrap_or(true),
        "$gt" => field_value.and_then(|v| compare(op_value, v)).map(|o| o.is_gt()).unwrap_or(false),
        "$gte" => field_value.and_then(|v| compare(op_value, v)).map(|o| o.is_ge()).unwrap_or(false),
        "$lt" => field_value.and_then(|v| compare(op_value, v)).map(|o| o.is_lt()).unwrap_or(false),
        "$lte" => field_value.and_then(|v| compare(op_value, v)).map(|o| o.is_le()).unwrap_or(false),
        "$in" => match (field_value, op_value.as_array()) {
            (Some(v), Some(arr)) => arr.contains(v),
            _ => false,
        },
        "$contains" => match field_value {
            Some(Value::Array(arr)) => arr.contains(op_value),
            Some(Value::String(s)) => op_value.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
            _ => false,
        },
        "$startsWith" => match (field_value.and_then(Value::as_str), op_value.as_str()) {
            (Some(s), Some(prefix)) => s.starts_with(prefix),
            _ => false,
        },
        _ => false,
    }
}

fn matches_condition(field_value: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, op_value)| eval_operator(field_value, op, op_value))
        }
        // A bare (non-operator) value means implicit equality.
        other => field_value == Some(other),
    }
}

/// Evaluate a `where` clause (a JSON object of dot-path keys to
/// conditions) against an entity's metadata.
pub fn matches_where(metadata: &Metadata, where_clause: &Value) -> bool {
    let Some(conditions) = where_clause.as_object() else { return true };
    let root = Value::Object(metadata.clone());
    conditions.iter().all(|(path, condition)| matches_condition(get_path(&root, path), condition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(v: Value) -> Metadata {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn implicit_equality() {
        let m = meta(json!({"status": "active"}));
        assert!(matches_where(&m, &json!({"status": "active"})));
        assert!(!matches_where(&m, &json!({"status": "inactive"})));
    }

    #[test]
    fn gt_gte_lt_lte() {
        let m = meta(json!({"age": 30}));
        assert!(matches_where(&m, &json!({"age": {"$gt": 20}})));
        assert!(matches_where(&m, &json!({"age": {"$gte": 30}})));
        assert!(matches_where(&m, &json!({"age": {"$lt": 40}})));
        assert!(!matches_where(&m, &json!({"age": {"$lte": 20}})));
    }

    #[test]
    fn in_and_contains_and_starts_with() {
        let m = meta(json!({"tag": "rust", "tags": ["a", "b"], "name": "hello world"}));
        assert!(matches_where(&m, &json!({"tag": {"$in": ["rust", "go"]}})));
        assert!(matches_where(&m, &json!({"tags": {"$contains": "a"}})));
        assert!(matches_where(&m, &json!({"name": {"$startsWith": "hello"}})));
    }

    #[test]
    fn exists_and_dot_paths() {
        let m = meta(json!({"author": {"name": "Ada"}}));
        assert!(matches_where(&m, &json!({"author.name": "Ada"})));
        assert!(matches_where(&m, &json!({"missing": {"$exists": false}})));
        assert!(!matches_where(&m, &json!({"author.name": {"$exists": false}})));
    }
}
