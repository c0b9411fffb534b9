//! Runtime values held by record fields.
//!
//! Each [`Value`] variant corresponds to a [`FieldKind`], so validation is a
//! single kind check driven by the field descriptor rather than runtime type
//! inspection.
//!
//! [`FieldKind`]: crate::core::schema::FieldKind

use ndarray::ArrayD;

use crate::core::device::Device;
use crate::core::errors::{DataError, DataResult};
use crate::core::record::Record;
use crate::core::schema::FieldKind;
use crate::domain::region::RegionGraph;

/// A numeric array together with its current device placement.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    /// The array data.
    pub data: ArrayD<f32>,
    /// The device the data currently lives on.
    pub device: Device,
}

impl TensorValue {
    /// Creates a tensor value on the CPU.
    pub fn cpu(data: ArrayD<f32>) -> Self {
        Self {
            data,
            device: Device::Cpu,
        }
    }

    /// The shape of the underlying array.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// Collaborator contract for materializing lazy field values.
///
/// The core never embeds file-system or codec logic itself; anything that
/// resolves a reference into a concrete value implements this trait.
pub trait Loader {
    /// Materializes the value behind a reference (e.g. a file path).
    fn load(&self, reference: &str) -> DataResult<Value>;
}

/// The explicit state machine for a lazily loaded field.
///
/// `load` is the only unloaded-to-loaded transition; there is no automatic
/// reversal or eviction. Unloading is explicit via [`LazyValue::unload`].
/// First access on a shared instance is not race-free; callers that share a
/// record across threads must serialize the first load themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum LazyValue {
    /// Only the external reference is held.
    Unloaded {
        /// The external reference, e.g. a file path or URL.
        reference: String,
    },
    /// The referenced content has been materialized and cached.
    Loaded {
        /// The external reference the value was loaded from.
        reference: String,
        /// The materialized value.
        value: Box<Value>,
    },
}

impl LazyValue {
    /// Creates an unloaded lazy value from a reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self::Unloaded {
            reference: reference.into(),
        }
    }

    /// The external reference, regardless of state.
    pub fn reference(&self) -> &str {
        match self {
            Self::Unloaded { reference } | Self::Loaded { reference, .. } => reference,
        }
    }

    /// Returns true once the referenced content has been materialized.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    /// Materializes the value through the loader, caching it on first access.
    ///
    /// Subsequent calls return the cached value without consulting the
    /// loader again.
    pub fn load(&mut self, loader: &dyn Loader) -> DataResult<&Value> {
        if let Self::Unloaded { reference } = self {
            let value = loader.load(reference)?;
            *self = Self::Loaded {
                reference: std::mem::take(reference),
                value: Box::new(value),
            };
        }
        match self {
            Self::Loaded { value, .. } => Ok(value),
            Self::Unloaded { .. } => unreachable!("load transitions to Loaded"),
        }
    }

    /// Returns the cached value, if materialized.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Loaded { value, .. } => Some(value),
            Self::Unloaded { .. } => None,
        }
    }

    /// Explicitly drops the cached value, returning to the unloaded state.
    pub fn unload(&mut self) {
        if let Self::Loaded { reference, .. } = self {
            *self = Self::Unloaded {
                reference: std::mem::take(reference),
            };
        }
    }
}

/// A single field value of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A 64-bit integer scalar.
    Int(i64),
    /// A 64-bit float scalar.
    Float(f64),
    /// A boolean scalar.
    Bool(bool),
    /// A text scalar.
    Text(String),
    /// A numeric array with device placement.
    Tensor(TensorValue),
    /// A variable-length sequence of text tokens.
    TextSeq(Vec<String>),
    /// An owned nested record.
    Record(Record),
    /// An owned sequence of nested records.
    RecordSeq(Vec<Record>),
    /// A parsed region graph.
    RegionGraph(RegionGraph),
    /// A lazily loaded value.
    Lazy(LazyValue),
}

impl Value {
    /// A short lowercase name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
            Value::Tensor(_) => "tensor",
            Value::TextSeq(_) => "text-seq",
            Value::Record(_) => "record",
            Value::RecordSeq(_) => "record-seq",
            Value::RegionGraph(_) => "region-graph",
            Value::Lazy(_) => "loadable",
        }
    }

    /// Checks that this value matches a declared field kind.
    ///
    /// Returns a reason string on mismatch so validation can aggregate
    /// failures across fields.
    pub fn check_kind(&self, kind: &FieldKind) -> Result<(), String> {
        let ok = match (self, kind) {
            (Value::Int(_), FieldKind::Int)
            | (Value::Float(_), FieldKind::Float)
            | (Value::Bool(_), FieldKind::Bool)
            | (Value::Text(_), FieldKind::Text)
            | (Value::TextSeq(_), FieldKind::TextSeq)
            | (Value::RegionGraph(_), FieldKind::RegionGraph)
            | (Value::Lazy(_), FieldKind::Loadable) => true,
            (Value::Tensor(tensor), FieldKind::Tensor { shape }) => {
                if let Some(expected) = shape {
                    if tensor.shape() != expected.as_slice() {
                        return Err(format!(
                            "expected tensor of shape {:?}, got {:?}",
                            expected,
                            tensor.shape()
                        ));
                    }
                }
                true
            }
            (Value::Record(record), FieldKind::Record(type_name)) => {
                if record.type_name() != type_name {
                    return Err(format!(
                        "expected nested record of type '{}', got '{}'",
                        type_name,
                        record.type_name()
                    ));
                }
                true
            }
            (Value::RecordSeq(records), FieldKind::RecordSeq(type_name)) => {
                for record in records {
                    if record.type_name() != type_name {
                        return Err(format!(
                            "expected records of type '{}', found '{}'",
                            type_name,
                            record.type_name()
                        ));
                    }
                }
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "expected {}, got {}",
                kind.name(),
                self.kind_name()
            ))
        }
    }

    /// Returns the tensor payload or an invalid-input error.
    pub fn as_tensor(&self) -> DataResult<&TensorValue> {
        match self {
            Value::Tensor(tensor) => Ok(tensor),
            other => Err(DataError::invalid_input(format!(
                "expected tensor value, got {}",
                other.kind_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    struct TextLoader;

    impl Loader for TextLoader {
        fn load(&self, reference: &str) -> DataResult<Value> {
            Ok(Value::Text(format!("contents of {reference}")))
        }
    }

    struct CountingLoader(std::cell::Cell<usize>);

    impl Loader for CountingLoader {
        fn load(&self, _reference: &str) -> DataResult<Value> {
            self.0.set(self.0.get() + 1);
            Ok(Value::Int(7))
        }
    }

    #[test]
    fn lazy_value_loads_once_and_caches() {
        let loader = CountingLoader(std::cell::Cell::new(0));
        let mut lazy = LazyValue::new("item.bin");
        assert!(!lazy.is_loaded());

        lazy.load(&loader).unwrap();
        lazy.load(&loader).unwrap();
        assert!(lazy.is_loaded());
        assert_eq!(loader.0.get(), 1);
        assert_eq!(lazy.value(), Some(&Value::Int(7)));
    }

    #[test]
    fn lazy_value_unload_is_explicit() {
        let mut lazy = LazyValue::new("page.hocr");
        lazy.load(&TextLoader).unwrap();
        assert!(lazy.is_loaded());

        lazy.unload();
        assert!(!lazy.is_loaded());
        assert_eq!(lazy.reference(), "page.hocr");
    }

    #[test]
    fn kind_check_reports_shape_mismatch() {
        let tensor = Value::Tensor(TensorValue::cpu(ArrayD::zeros(vec![2, 3])));
        let err = tensor
            .check_kind(&FieldKind::Tensor {
                shape: Some(vec![4, 4]),
            })
            .unwrap_err();
        assert!(err.contains("shape"));
    }

    #[test]
    fn kind_check_accepts_matching_scalar() {
        assert!(Value::Int(3).check_kind(&FieldKind::Int).is_ok());
        assert!(Value::Int(3).check_kind(&FieldKind::Text).is_err());
    }
}
