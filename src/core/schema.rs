//! Schema registry for record types.
//!
//! Every record type is described once by an ordered list of
//! [`FieldDescriptor`]s. The descriptors drive validation, batching, device
//! placement, and columnar encoding, so a record type never needs per-type
//! boilerplate for any of those operations.
//!
//! The registry only grows: descriptors can never be removed or redefined
//! once registered, which keeps every derived table schema consistent for
//! all record instances created afterward.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{DataError, DataResult};

/// The semantic kind of a record field.
///
/// The kind determines how a value is validated, how it combines into a
/// batch, whether it is device-bearing, and which columnar type it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// A single 64-bit integer.
    Int,
    /// A single 64-bit float.
    Float,
    /// A single boolean.
    Bool,
    /// A single text value.
    Text,
    /// A numeric array. When `shape` is present every instance must have
    /// exactly that shape; otherwise shapes may vary per instance and are
    /// padded during batching.
    Tensor {
        /// Fixed per-instance shape, if the field has one.
        shape: Option<Vec<usize>>,
    },
    /// A variable-length sequence of text tokens.
    TextSeq,
    /// A nested record of the named registered type.
    Record(String),
    /// A variable-length sequence of records of the named registered type.
    RecordSeq(String),
    /// A parsed hierarchical region graph (page/paragraph/line/word).
    RegionGraph,
    /// A lazily loaded value: the record stores only an external reference
    /// until first access materializes it through a [`Loader`].
    ///
    /// [`Loader`]: crate::core::value::Loader
    Loadable,
}

impl FieldKind {
    /// Returns true if values of this kind live on a compute device and must
    /// be relocated by the device conversion engine.
    pub fn is_device_bearing(&self) -> bool {
        matches!(self, FieldKind::Tensor { .. })
    }

    /// Returns true if two kinds are compatible for registration purposes.
    ///
    /// Tensor kinds are compatible regardless of their declared fixed shape;
    /// everything else requires exact equality.
    pub fn is_compatible(&self, other: &FieldKind) -> bool {
        match (self, other) {
            (FieldKind::Tensor { .. }, FieldKind::Tensor { .. }) => true,
            (a, b) => a == b,
        }
    }

    /// A short lowercase name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Text => "text",
            FieldKind::Tensor { .. } => "tensor",
            FieldKind::TextSeq => "text-seq",
            FieldKind::Record(_) => "record",
            FieldKind::RecordSeq(_) => "record-seq",
            FieldKind::RegionGraph => "region-graph",
            FieldKind::Loadable => "loadable",
        }
    }
}

/// Per-field metadata describing how a value validates, batches, moves
/// across devices, and columnarizes. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// The field name, unique within its record type.
    pub name: String,
    /// The semantic kind of the field.
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Creates a new field descriptor.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The ordered set of field descriptors for one registered record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// The registered name of the record type.
    pub type_name: String,
    /// The field descriptors, in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

impl RecordSchema {
    /// Looks up a field descriptor by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the positional index of a field, if declared.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Process-wide, append-only store of record schemas.
///
/// Registration is idempotent for identical descriptors and fails with
/// [`DataError::SchemaConflict`] when a field is re-registered with an
/// incompatible kind. Once a type's registration completes, concurrent reads
/// need no coordination.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<RecordSchema>>>,
    table_schemas: RwLock<HashMap<String, Arc<crate::core::table::TableSchema>>>,
}

static GLOBAL_REGISTRY: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::new);

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry instance.
    ///
    /// Prefer passing a registry reference explicitly; this accessor exists
    /// for applications that want a single shared registry per process.
    pub fn global() -> &'static SchemaRegistry {
        &GLOBAL_REGISTRY
    }

    /// Registers a record type with its ordered field descriptors.
    ///
    /// Re-registering an identical schema is a no-op returning the stored
    /// schema. Re-registering with different field names, order, or
    /// incompatible kinds fails with [`DataError::SchemaConflict`]; the
    /// existing registration is left untouched.
    pub fn register(
        &self,
        type_name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) -> DataResult<Arc<RecordSchema>> {
        let type_name = type_name.into();

        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(DataError::schema_conflict(
                    &type_name,
                    format!("duplicate field '{}'", field.name),
                ));
            }
        }

        let mut schemas = self
            .schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = schemas.get(&type_name) {
            check_redefinition(existing, &fields)?;
            return Ok(Arc::clone(existing));
        }

        debug!(type_name = %type_name, fields = fields.len(), "registering record type");
        let schema = Arc::new(RecordSchema {
            type_name: type_name.clone(),
            fields,
        });
        schemas.insert(type_name, Arc::clone(&schema));
        Ok(schema)
    }

    /// Returns the schema registered for a record type.
    pub fn describe(&self, type_name: &str) -> DataResult<Arc<RecordSchema>> {
        let schemas = self
            .schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        schemas.get(type_name).cloned().ok_or_else(|| {
            DataError::invalid_input(format!("record type '{type_name}' is not registered"))
        })
    }

    /// The cache of table schemas derived from this registry, one per record
    /// type for the registry's lifetime.
    pub(crate) fn table_schema_cache(
        &self,
    ) -> &RwLock<HashMap<String, Arc<crate::core::table::TableSchema>>> {
        &self.table_schemas
    }

    /// Returns true if the record type has been registered.
    pub fn contains(&self, type_name: &str) -> bool {
        let schemas = self
            .schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        schemas.contains_key(type_name)
    }
}

/// Validates that a repeated registration matches the stored schema.
fn check_redefinition(existing: &RecordSchema, fields: &[FieldDescriptor]) -> DataResult<()> {
    if existing.fields.len() != fields.len() {
        return Err(DataError::schema_conflict(
            &existing.type_name,
            format!(
                "re-registered with {} fields, originally {}",
                fields.len(),
                existing.fields.len()
            ),
        ));
    }
    for (old, new) in existing.fields.iter().zip(fields) {
        if old.name != new.name {
            return Err(DataError::schema_conflict(
                &existing.type_name,
                format!(
                    "field order changed: expected '{}', got '{}'",
                    old.name, new.name
                ),
            ));
        }
        if !old.kind.is_compatible(&new.kind) {
            return Err(DataError::schema_conflict(
                &existing.type_name,
                format!(
                    "field '{}' re-registered as {} but was {}",
                    new.name,
                    new.kind.name(),
                    old.kind.name()
                ),
            ));
        }
    }
    Ok(())
}
