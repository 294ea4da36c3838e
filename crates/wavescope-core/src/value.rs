//! Sample value model.
//!
//! Transports deliver one [`Value`] tree per update: scalars, typed scalar
//! arrays, and nested structures. Before any buffering happens the tree is
//! flattened into a [`SampleBatch`]: a flat `field path → numeric array`
//! map with `.` as the path separator. Flattening is a pure function of the
//! input tree: it performs no I/O and touches no shared state.
//!
//! Scalars flatten to one-element arrays so that downstream code only ever
//! deals with arrays. Empty arrays and non-numeric leaves are dropped
//! during flattening. Each array remembers the element width of its source
//! type; the ingestion layer uses this for its per-object byte estimate.

use fxhash::FxHashMap;

/// Path separator used when flattening nested structures.
pub const PATH_SEPARATOR: char = '.';

/// A typed scalar array as delivered by a transport.
///
/// The variant records the on-the-wire element type so the element width
/// survives the conversion to `f64` samples.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarArray {
    /// Signed 8-bit samples.
    I8(Vec<i8>),
    /// Signed 16-bit samples.
    I16(Vec<i16>),
    /// Signed 32-bit samples.
    I32(Vec<i32>),
    /// Signed 64-bit samples.
    I64(Vec<i64>),
    /// 32-bit float samples.
    F32(Vec<f32>),
    /// 64-bit float samples.
    F64(Vec<f64>),
}

impl ScalarArray {
    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    /// Returns true if the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the byte width of one element of the source type.
    #[must_use]
    pub fn elem_width(&self) -> usize {
        match self {
            Self::I8(_) => 1,
            Self::I16(_) => 2,
            Self::I32(_) | Self::F32(_) => 4,
            Self::I64(_) | Self::F64(_) => 8,
        }
    }

    /// Converts the samples to `f64`.
    #[must_use]
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Self::I8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::I16(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::I32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            #[allow(clippy::cast_precision_loss)]
            Self::I64(v) => v.iter().map(|&x| x as f64).collect(),
            Self::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::F64(v) => v.clone(),
        }
    }
}

/// A nested value tree delivered by a transport.
///
/// The tree shape is opaque pass-through: field names and array shapes are
/// whatever the remote channel published.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A signed integer scalar.
    Long(i64),
    /// A floating-point scalar.
    Double(f64),
    /// A string leaf. Skipped during flattening.
    Str(String),
    /// A typed scalar array.
    Array(ScalarArray),
    /// A nested structure. Field order is preserved.
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Builds a value tree from JSON.
    ///
    /// Integers map to [`Value::Long`], other numbers to [`Value::Double`],
    /// numeric arrays to [`ScalarArray::F64`] (or [`ScalarArray::I64`] when
    /// every element is an integer), and objects to [`Value::Struct`].
    /// Booleans, nulls, and mixed arrays are dropped.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Long(i))
                } else {
                    n.as_f64().map(Self::Double)
                }
            }
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            serde_json::Value::Array(items) => {
                if items.iter().all(|i| i.as_i64().is_some()) {
                    let v: Vec<i64> = items.iter().filter_map(serde_json::Value::as_i64).collect();
                    Some(Self::Array(ScalarArray::I64(v)))
                } else if items.iter().all(serde_json::Value::is_number) {
                    let v: Vec<f64> = items.iter().filter_map(serde_json::Value::as_f64).collect();
                    Some(Self::Array(ScalarArray::F64(v)))
                } else {
                    None
                }
            }
            serde_json::Value::Object(map) => {
                let fields = map
                    .iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|val| (k.clone(), val)))
                    .collect();
                Some(Self::Struct(fields))
            }
            serde_json::Value::Bool(_) | serde_json::Value::Null => None,
        }
    }
}

/// A flattened numeric array for one field path.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldArray {
    /// Samples converted to `f64`.
    pub values: Vec<f64>,
    /// Byte width of one element of the source type.
    pub elem_width: usize,
}

impl FieldArray {
    /// Creates a field array from `f64` samples.
    #[must_use]
    pub fn from_f64(values: Vec<f64>) -> Self {
        Self {
            values,
            elem_width: 8,
        }
    }

    /// Returns the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the array has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A trigger or data timestamp in seconds past the epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp {
    /// Whole seconds past the epoch.
    pub secs: i64,
    /// Nanosecond remainder.
    pub nanos: u32,
}

impl Timestamp {
    /// Creates a timestamp from seconds and nanoseconds.
    #[must_use]
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// Returns the timestamp as fractional seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + 1e-9 * f64::from(self.nanos)
    }
}

/// One delivered unit of `field path → array` data.
///
/// Produced by [`flatten`]; everything downstream of the transport works on
/// this flat representation.
#[derive(Debug, Clone, Default)]
pub struct SampleBatch {
    fields: FxHashMap<String, FieldArray>,
}

impl SampleBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field array.
    pub fn insert(&mut self, path: impl Into<String>, array: FieldArray) {
        self.fields.insert(path.into(), array);
    }

    /// Returns the array for a field path.
    #[must_use]
    pub fn array(&self, path: &str) -> Option<&FieldArray> {
        self.fields.get(path)
    }

    /// Returns the newest sample of a field, treating it as a scalar.
    #[must_use]
    pub fn scalar(&self, path: &str) -> Option<f64> {
        self.fields.get(path).and_then(|a| a.values.last().copied())
    }

    /// Reads a structured timestamp rooted at `path`.
    ///
    /// Expects the flattened `{path}.secondsPastEpoch` field and, optionally,
    /// `{path}.nanoseconds`.
    #[must_use]
    pub fn timestamp(&self, path: &str) -> Option<Timestamp> {
        let secs = self.scalar(&format!("{path}{PATH_SEPARATOR}secondsPastEpoch"))?;
        let nanos = self
            .scalar(&format!("{path}{PATH_SEPARATOR}nanoseconds"))
            .unwrap_or(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(Timestamp::new(secs as i64, nanos as u32))
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the batch carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over `(path, array)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldArray)> {
        self.fields.iter()
    }

    /// Returns the field paths, sorted for stable presentation.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Flattens a value tree into a [`SampleBatch`].
///
/// Nested struct fields join their path components with
/// [`PATH_SEPARATOR`]. Scalars become one-element arrays. Empty arrays and
/// non-numeric leaves are dropped.
#[must_use]
pub fn flatten(root: &Value) -> SampleBatch {
    let mut batch = SampleBatch::new();
    flatten_into("", root, &mut batch);
    batch
}

fn flatten_into(prefix: &str, value: &Value, out: &mut SampleBatch) {
    match value {
        Value::Long(x) => {
            #[allow(clippy::cast_precision_loss)]
            out.insert(
                prefix,
                FieldArray {
                    values: vec![*x as f64],
                    elem_width: 8,
                },
            );
        }
        Value::Double(x) => {
            out.insert(
                prefix,
                FieldArray {
                    values: vec![*x],
                    elem_width: 8,
                },
            );
        }
        Value::Array(a) => {
            if !a.is_empty() {
                out.insert(
                    prefix,
                    FieldArray {
                        values: a.to_f64(),
                        elem_width: a.elem_width(),
                    },
                );
            }
        }
        Value::Struct(fields) => {
            for (name, child) in fields {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}{PATH_SEPARATOR}{name}")
                };
                flatten_into(&path, child, out);
            }
        }
        Value::Str(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_sample() -> Value {
        Value::Struct(vec![
            (
                "voltage".into(),
                Value::Array(ScalarArray::I16(vec![1, 2, 3])),
            ),
            ("arrayId".into(), Value::Long(7)),
            (
                "timeStamp".into(),
                Value::Struct(vec![
                    ("secondsPastEpoch".into(), Value::Long(100)),
                    ("nanoseconds".into(), Value::Long(500_000_000)),
                ]),
            ),
            ("label".into(), Value::Str("ch1".into())),
            ("empty".into(), Value::Array(ScalarArray::F64(vec![]))),
        ])
    }

    #[test]
    fn test_flatten_nested_paths() {
        let batch = flatten(&nested_sample());

        assert_eq!(batch.array("voltage").unwrap().values, vec![1.0, 2.0, 3.0]);
        assert_eq!(batch.array("voltage").unwrap().elem_width, 2);
        assert_eq!(
            batch.scalar("timeStamp.secondsPastEpoch"),
            Some(100.0)
        );
        assert_eq!(batch.scalar("timeStamp.nanoseconds"), Some(500_000_000.0));
    }

    #[test]
    fn test_flatten_scalar_to_one_element_array() {
        let batch = flatten(&nested_sample());
        let id = batch.array("arrayId").unwrap();
        assert_eq!(id.values, vec![7.0]);
        assert_eq!(id.elem_width, 8);
    }

    #[test]
    fn test_flatten_drops_empty_and_non_numeric() {
        let batch = flatten(&nested_sample());
        assert!(batch.array("empty").is_none());
        assert!(batch.array("label").is_none());
    }

    #[test]
    fn test_flatten_is_pure() {
        let value = nested_sample();
        let a = flatten(&value);
        let b = flatten(&value);
        assert_eq!(a.field_names(), b.field_names());
        assert_eq!(a.array("voltage"), b.array("voltage"));
    }

    #[test]
    fn test_structured_timestamp() {
        let batch = flatten(&nested_sample());
        let ts = batch.timestamp("timeStamp").unwrap();
        assert_eq!(ts.secs, 100);
        assert_eq!(ts.nanos, 500_000_000);
        assert!((ts.as_secs_f64() - 100.5).abs() < 1e-9);
    }

    #[test]
    fn test_elem_widths() {
        assert_eq!(ScalarArray::I8(vec![1]).elem_width(), 1);
        assert_eq!(ScalarArray::I16(vec![1]).elem_width(), 2);
        assert_eq!(ScalarArray::I32(vec![1]).elem_width(), 4);
        assert_eq!(ScalarArray::F32(vec![1.0]).elem_width(), 4);
        assert_eq!(ScalarArray::I64(vec![1]).elem_width(), 8);
        assert_eq!(ScalarArray::F64(vec![1.0]).elem_width(), 8);
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({
            "waveform": [1.5, 2.5],
            "counts": [1, 2, 3],
            "gain": 2.0,
            "id": 42,
            "name": "det1",
            "meta": { "ok": true }
        });
        let value = Value::from_json(&json).unwrap();
        let batch = flatten(&value);

        assert_eq!(batch.array("waveform").unwrap().values, vec![1.5, 2.5]);
        assert_eq!(batch.array("counts").unwrap().elem_width, 8);
        assert_eq!(batch.scalar("gain"), Some(2.0));
        assert_eq!(batch.scalar("id"), Some(42.0));
        assert!(batch.array("name").is_none());
        // bool leaf dropped, struct survives as empty
        assert!(batch.array("meta.ok").is_none());
    }
}
