//! The record model.
//!
//! A [`Record`] is an ordered mapping of field name to [`Value`], validated
//! against the field descriptors of its registered type at construction.
//! Records own their field values exclusively; nested records are owned, not
//! shared.

use std::sync::Arc;

use crate::core::errors::{DataError, DataResult, FieldFailure};
use crate::core::schema::{FieldKind, RecordSchema};
use crate::core::value::{LazyValue, Loader, Value};

/// One structured, schema-validated data instance.
///
/// Field values are stored in schema declaration order, so iteration order is
/// deterministic and positional access is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: Vec<Value>,
}

impl Record {
    /// Validates raw field values against the schema and constructs a record.
    ///
    /// Every field declared by the schema must be supplied exactly once and
    /// match its declared kind. All failing fields are collected before
    /// returning, so callers see every problem at once.
    pub fn validate(
        schema: Arc<RecordSchema>,
        raw_values: Vec<(String, Value)>,
    ) -> DataResult<Self> {
        let mut failures = Vec::new();
        let mut slots: Vec<Option<Value>> = (0..schema.fields.len()).map(|_| None).collect();
        let mut supplied = vec![false; schema.fields.len()];

        for (name, value) in raw_values {
            match schema.field_index(&name) {
                Some(index) => {
                    if supplied[index] {
                        failures.push(FieldFailure {
                            field: name,
                            reason: "supplied more than once".into(),
                        });
                        continue;
                    }
                    supplied[index] = true;
                    if let Err(reason) = value.check_kind(&schema.fields[index].kind) {
                        failures.push(FieldFailure {
                            field: name,
                            reason,
                        });
                        continue;
                    }
                    slots[index] = Some(value);
                }
                None => failures.push(FieldFailure {
                    field: name,
                    reason: format!("not declared by record type '{}'", schema.type_name),
                }),
            }
        }

        for (descriptor, was_supplied) in schema.fields.iter().zip(&supplied) {
            if !was_supplied {
                failures.push(FieldFailure {
                    field: descriptor.name.clone(),
                    reason: "missing".into(),
                });
            }
        }

        if !failures.is_empty() {
            return Err(DataError::validation(failures));
        }

        let values = slots.into_iter().map(|slot| slot.expect("checked")).collect();
        Ok(Self { schema, values })
    }

    /// Constructs a record from values already in schema order.
    ///
    /// Used internally by the batching engine and the table codec after the
    /// values are known to match the schema; still re-checks kinds so a
    /// malformed decode cannot produce an invalid record.
    pub(crate) fn from_ordered(
        schema: Arc<RecordSchema>,
        values: Vec<Value>,
    ) -> DataResult<Self> {
        if values.len() != schema.fields.len() {
            return Err(DataError::invalid_input(format!(
                "expected {} values for type '{}', got {}",
                schema.fields.len(),
                schema.type_name,
                values.len()
            )));
        }
        let mut failures = Vec::new();
        for (descriptor, value) in schema.fields.iter().zip(&values) {
            if let Err(reason) = value.check_kind(&descriptor.kind) {
                failures.push(FieldFailure {
                    field: descriptor.name.clone(),
                    reason,
                });
            }
        }
        if !failures.is_empty() {
            return Err(DataError::validation(failures));
        }
        Ok(Self { schema, values })
    }

    /// The registered name of this record's type.
    pub fn type_name(&self) -> &str {
        &self.schema.type_name
    }

    /// The schema this record was validated against.
    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Returns a field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.field_index(name).map(|i| &self.values[i])
    }

    /// Returns a field value by position.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Iterates over `(name, value)` pairs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }

    /// Consumes the record, returning its values in schema order.
    pub(crate) fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Materializes a loadable field through the loader, caching the result
    /// on this record. Subsequent accesses are O(1). Not race-free on shared
    /// instances; requires exclusive access by construction.
    pub fn load_field(&mut self, name: &str, loader: &dyn Loader) -> DataResult<&Value> {
        let index = self.field_index_checked(name, FieldKind::Loadable)?;
        match &mut self.values[index] {
            Value::Lazy(lazy) => lazy.load(loader),
            _ => unreachable!("kind checked at construction"),
        }
    }

    /// Explicitly drops the cached content of a loadable field.
    ///
    /// Invalidation is always explicit; there is no automatic eviction.
    pub fn unload_field(&mut self, name: &str) -> DataResult<()> {
        let index = self.field_index_checked(name, FieldKind::Loadable)?;
        match &mut self.values[index] {
            Value::Lazy(lazy) => {
                lazy.unload();
                Ok(())
            }
            _ => unreachable!("kind checked at construction"),
        }
    }

    /// Returns the lazy state of a loadable field.
    pub fn lazy_field(&self, name: &str) -> DataResult<&LazyValue> {
        let index = self.field_index_checked(name, FieldKind::Loadable)?;
        match &self.values[index] {
            Value::Lazy(lazy) => Ok(lazy),
            _ => unreachable!("kind checked at construction"),
        }
    }

    fn field_index_checked(&self, name: &str, expected: FieldKind) -> DataResult<usize> {
        let index = self.schema.field_index(name).ok_or_else(|| {
            DataError::invalid_input(format!(
                "field '{name}' is not declared by record type '{}'",
                self.schema.type_name
            ))
        })?;
        let kind = &self.schema.fields[index].kind;
        if !kind.is_compatible(&expected) {
            return Err(DataError::invalid_input(format!(
                "field '{name}' has kind {}, expected {}",
                kind.name(),
                expected.name()
            )));
        }
        Ok(index)
    }
}
