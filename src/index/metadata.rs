//! Metadata & Type Index (spec component G): O(1) per-type counters and
//! value-based field-type inference for bucketed secondary indexing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::types::NounType;

/// Fixed-width per-type counters, O(1) regardless of entity count.
pub struct TypeCounters {
    counts: Vec<AtomicI64>,
    /// Entities of type Document created as VFS synthetic wrappers
    /// (`metadata.vfsType` set), tracked separately so `byType(excludeVFS)`
    /// can subtract them in O(1) without a second full-width array.
    vfs_wrappers: AtomicI64,
}

impl Default for TypeCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCounters {
    pub fn new() -> Self {
        Self {
            counts: (0..NounType::ALL.len()).map(|_| AtomicI64::new(0)).collect(),
            vfs_wrappers: AtomicI64::new(0),
        }
    }

    fn slot(t: NounType) -> usize {
        NounType::ALL.iter().position(|x| *x == t).expect("closed enum")
    }

    pub fn increment(&self, t: NounType, is_vfs_wrapper: bool) {
        self.counts[Self::slot(t)].fetch_add(1, Ordering::Relaxed);
        if is_vfs_wrapper {
            self.vfs_wrappers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn decrement(&self, t: NounType, is_vfs_wrapper: bool) {
        self.counts[Self::slot(t)].fetch_sub(1, Ordering::Relaxed);
        if is_vfs_wrapper {
            self.vfs_wrappers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self, t: NounType) -> i64 {
        self.counts[Self::slot(t)].load(Ordering::Relaxed)
    }

    /// Zero every slot, for a full `clear()`.
    pub fn reset(&self) {
        for c in &self.counts {
            c.store(0, Ordering::Relaxed);
        }
        self.vfs_wrappers.store(0, Ordering::Relaxed);
    }

    /// Non-zero slots, optionally excluding VFS synthetic `Document` wrappers.
    pub fn by_type(&self, exclude_vfs: bool) -> HashMap<String, i64> {
        let mut map = HashMap::new();
        for (i, t) in NounType::ALL.iter().enumerate() {
            let mut n = self.counts[i].load(Ordering::Relaxed);
            if exclude_vfs && *t == NounType::Document {
                n -= self.vfs_wrappers.load(Ordering::Relaxed);
            }
            if n != 0 {
                map.insert(t.as_str().to_string(), n);
            }
        }
        map
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

// ============================================================================
// FIELD-TYPE INFERENCE
// ============================================================================

/// Maximum number of sampled values considered per inference call.
pub const MAX_SAMPLE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    TimestampMs,
    TimestampS,
    DateIso8601,
    DatetimeIso8601,
    Uuid,
    Array,
    Object,
    String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldTypeInference {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub confidence: f64,
    /// Bucket width in milliseconds for temporal inferences, used to keep a
    /// field-value index from exploding on e.g. `extractedAt`.
    pub bucket_size: Option<i64>,
    pub sample_size: usize,
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap())
}

fn iso_datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?$").unwrap()
    })
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
    })
}

const BOOL_STRINGS: &[&str] = &["true", "false", "0", "1", "yes", "no"];

fn as_bool_like(v: &Value) -> bool {
    match v {
        Value::Bool(_) => true,
        Value::String(s) => BOOL_STRINGS.contains(&s.to_lowercase().as_str()),
        _ => false,
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn is_integer_value(v: &Value) -> bool {
    match v {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false),
        Value::String(s) => s.parse::<i64>().is_ok(),
        _ => false,
    }
}

/// Infer a field's type from up to [`MAX_SAMPLE_SIZE`] sampled values,
/// following the specification's rule order: boolean, integer, float,
/// timestamp_ms, timestamp_s, date/datetime ISO 8601, uuid, array, object,
/// then a string fallback.
pub fn infer_field_type(samples: &[Value]) -> FieldTypeInference {
    let sample_size = samples.len().min(MAX_SAMPLE_SIZE);
    let samples = &samples[..sample_size];

    if samples.is_empty() || samples.iter().all(|v| v.is_null()) {
        return FieldTypeInference { field_type: FieldType::String, confidence: 0.5, bucket_size: None, sample_size };
    }

    if samples.iter().all(as_bool_like) {
        return FieldTypeInference { field_type: FieldType::Boolean, confidence: 1.0, bucket_size: None, sample_size };
    }

    if samples.iter().all(Value::is_array) {
        return FieldTypeInference { field_type: FieldType::Array, confidence: 1.0, bucket_size: None, sample_size };
    }
    if samples.iter().all(Value::is_object) {
        return FieldTypeInference { field_type: FieldType::Object, confidence: 1.0, bucket_size: None, sample_size };
    }

    if let Some(ints) = samples.iter().map(as_i64).collect::<Option<Vec<_>>>() {
        if ints.iter().all(|n| (1_000_000_000_000..=20_000_000_000_000).contains(n)) {
            return FieldTypeInference { field_type: FieldType::TimestampMs, confidence: 0.95, bucket_size: Some(60_000), sample_size };
        }
        if ints.iter().all(|n| (1_000_000_000..=20_000_000_000).contains(n)) {
            return FieldTypeInference { field_type: FieldType::TimestampS, confidence: 0.95, bucket_size: Some(60_000), sample_size };
        }
        return FieldTypeInference { field_type: FieldType::Integer, confidence: 1.0, bucket_size: None, sample_size };
    }

    if let Some(floats) = samples.iter().map(as_f64).collect::<Option<Vec<_>>>() {
        let any_non_integer = floats.iter().any(|f| f.fract() != 0.0) || !samples.iter().all(is_integer_value);
        if any_non_integer {
            return FieldTypeInference { field_type: FieldType::Float, confidence: 1.0, bucket_size: None, sample_size };
        }
    }

    if samples.iter().all(|v| v.as_str().map(|s| iso_datetime_re().is_match(s)).unwrap_or(false)) {
        return FieldTypeInference { field_type: FieldType::DatetimeIso8601, confidence: 0.95, bucket_size: Some(60_000), sample_size };
    }
    if samples.iter().all(|v| v.as_str().map(|s| iso_date_re().is_match(s)).unwrap_or(false)) {
        return FieldTypeInference { field_type: FieldType::DateIso8601, confidence: 0.95, bucket_size: Some(86_400_000), sample_size };
    }
    if samples.iter().all(|v| v.as_str().map(|s| uuid_re().is_match(s)).unwrap_or(false)) {
        return FieldTypeInference { field_type: FieldType::Uuid, confidence: 1.0, bucket_size: None, sample_size };
    }

    FieldTypeInference { field_type: FieldType::String, confidence: 0.8, bucket_size: None, sample_size }
}

/// Quantize a millisecond timestamp to its bucket, so a field-value index
/// keyed on bucketed values doesn't explode the key space.
pub fn bucket_value(value_ms: i64, bucket_size_ms: i64) -> i64 {
    if bucket_size_ms <= 0 {
        return value_ms;
    }
    (value_ms / bucket_size_ms) * bucket_size_ms
}

/// Persisted, reloadable cache of per-field inferences.
#[derive(Default)]
pub struct FieldInferenceCache {
    entries: RwLock<HashMap<String, FieldTypeInference>>,
}

impl FieldInferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_infer(&self, field: &str, samples: &[Value]) -> FieldTypeInference {
        if let Some(cached) = self.entries.read().unwrap().get(field) {
            return cached.clone();
        }
        let inferred = infer_field_type(samples);
        self.entries.write().unwrap().insert(field.to_string(), inferred.clone());
        inferred
    }

    /// Looks up a previously inferred field type without sampling.
    pub fn get(&self, field: &str) -> Option<FieldTypeInference> {
        self.entries.read().unwrap().get(field).cloned()
    }

    pub fn to_json(&self) -> Value {
        let entries = self.entries.read().unwrap();
        serde_json::to_value(&*entries).unwrap_or(Value::Null)
    }

    pub fn load_from_json(&self, value: &Value) {
        if let Ok(map) = serde_json::from_value::<HashMap<String, FieldTypeInference>>(value.clone()) {
            *self.entries.write().unwrap() = map;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_counters_are_o1_and_exclude_vfs() {
        let counters = TypeCounters::new();
        counters.increment(NounType::Person, false);
        counters.increment(NounType::Person, false);
        counters.increment(NounType::Document, false);
        counters.increment(NounType::Document, true);
        let all = counters.by_type(false);
        assert_eq!(all.get("Person"), Some(&2));
        assert_eq!(all.get("Document"), Some(&2));
        let excl = counters.by_type(true);
        assert_eq!(excl.get("Document"), Some(&1));
    }

    #[test]
    fn timestamp_ms_bucketing_matches_seed_test() {
        let samples = vec![json!(1705420800000i64), json!(1705420860000i64), json!(1705420920000i64)];
        let inf = infer_field_type(&samples);
        assert_eq!(inf.field_type, FieldType::TimestampMs);
        assert_eq!(inf.bucket_size, Some(60_000));
        assert_eq!(inf.confidence, 0.95);
    }

    #[test]
    fn sample_size_capped_at_100() {
        let samples: Vec<Value> = (0..500).map(|i| json!(i)).collect();
        let inf = infer_field_type(&samples);
        assert_eq!(inf.sample_size, MAX_SAMPLE_SIZE);
    }

    #[test]
    fn boolean_inference() {
        let samples = vec![json!(true), json!("false"), json!("yes")];
        assert_eq!(infer_field_type(&samples).field_type, FieldType::Boolean);
    }

    #[test]
    fn uuid_inference() {
        let samples = vec![json!("550e8400-e29b-41d4-a716-446655440000")];
        assert_eq!(infer_field_type(&samples).field_type, FieldType::Uuid);
    }
}
