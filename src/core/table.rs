//! Columnar table codec.
//!
//! Converts records to flat, type-tagged rows and back against a table
//! schema derived once per record type from its field descriptors. Scalars
//! map directly to columnar primitives, fixed-shape tensors to fixed-size
//! list columns, variable tensors to a shape/data struct, nested records to
//! struct columns, and region graphs to the canonical flat node encoding
//! with parent-index back-references (trees are not natively columnar).
//!
//! Derived schemas are cached on the registry for the lifetime of the
//! registered type, so two records of the same type always produce mutually
//! compatible rows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{DataError, DataResult};
use crate::core::record::Record;
use crate::core::schema::{FieldKind, SchemaRegistry};
use crate::core::value::{LazyValue, TensorValue, Value};
use crate::domain::region::{FlatRegionNode, RegionGraph};

/// The columnar type of one table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit integer column.
    Int,
    /// 64-bit float column.
    Float,
    /// Boolean column.
    Bool,
    /// UTF-8 string column.
    Text,
    /// Fixed-size list of floats; the length is the flattened tensor size.
    FixedList {
        /// Number of elements per row.
        len: usize,
    },
    /// Variable-length list with a homogeneous element type.
    VarList(Box<ColumnType>),
    /// Struct column with named, typed members.
    Struct(Vec<(String, ColumnType)>),
    /// Flattened region-graph nodes: a nested list of structs with
    /// parent-index back-references.
    RegionNodeList,
}

/// A fixed mapping from field name to columnar type for one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// The record type this schema was derived from.
    pub type_name: String,
    /// Columns in field declaration order.
    pub columns: Vec<(String, ColumnType)>,
}

impl TableSchema {
    /// Looks up a column type by field name.
    pub fn column(&self, name: &str) -> Option<&ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }
}

/// The flattened, type-tagged cell values for one record instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// The record type the row encodes.
    pub type_name: String,
    /// Cells in field declaration order.
    pub cells: Vec<(String, CellValue)>,
}

impl TableRow {
    /// Looks up a cell by field name.
    pub fn cell(&self, name: &str) -> Option<&CellValue> {
        self.cells.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// One encoded cell of a table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// An integer scalar.
    Int(i64),
    /// A float scalar.
    Float(f64),
    /// A boolean scalar.
    Bool(bool),
    /// A text scalar, also used for loadable references.
    Text(String),
    /// A list of floats (fixed or variable length).
    FloatList(Vec<f32>),
    /// A list of integers.
    IntList(Vec<i64>),
    /// A list of strings.
    TextList(Vec<String>),
    /// A struct of named cells.
    Struct(Vec<(String, CellValue)>),
    /// A list of structs.
    StructList(Vec<CellValue>),
    /// Flattened region-graph nodes.
    Regions(Vec<FlatRegionNode>),
}

impl SchemaRegistry {
    /// Returns the table schema for a registered record type, deriving it on
    /// first request and caching it for the lifetime of the registry.
    pub fn table_schema(&self, type_name: &str) -> DataResult<Arc<TableSchema>> {
        {
            let cache = self
                .table_schema_cache()
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(schema) = cache.get(type_name) {
                return Ok(Arc::clone(schema));
            }
        }

        let mut visiting = Vec::new();
        let columns = self.derive_columns(type_name, &mut visiting)?;
        let schema = Arc::new(TableSchema {
            type_name: type_name.to_string(),
            columns,
        });
        debug!(type_name, "derived table schema");

        let mut cache = self
            .table_schema_cache()
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(Arc::clone(
            cache
                .entry(type_name.to_string())
                .or_insert_with(|| Arc::clone(&schema)),
        ))
    }

    fn derive_columns(
        &self,
        type_name: &str,
        visiting: &mut Vec<String>,
    ) -> DataResult<Vec<(String, ColumnType)>> {
        if visiting.iter().any(|t| t == type_name) {
            return Err(DataError::invalid_input(format!(
                "record type '{type_name}' is recursively nested and cannot be columnarized"
            )));
        }
        visiting.push(type_name.to_string());

        let schema = self.describe(type_name)?;
        let mut columns = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let column = match &field.kind {
                FieldKind::Int => ColumnType::Int,
                FieldKind::Float => ColumnType::Float,
                FieldKind::Bool => ColumnType::Bool,
                FieldKind::Text => ColumnType::Text,
                FieldKind::Tensor { shape: Some(shape) } => ColumnType::FixedList {
                    len: shape.iter().product(),
                },
                FieldKind::Tensor { shape: None } => ColumnType::Struct(vec![
                    ("shape".to_string(), ColumnType::VarList(Box::new(ColumnType::Int))),
                    ("data".to_string(), ColumnType::VarList(Box::new(ColumnType::Float))),
                ]),
                FieldKind::TextSeq => ColumnType::VarList(Box::new(ColumnType::Text)),
                FieldKind::Record(nested) => {
                    ColumnType::Struct(self.derive_columns(nested, visiting)?)
                }
                FieldKind::RecordSeq(nested) => ColumnType::VarList(Box::new(
                    ColumnType::Struct(self.derive_columns(nested, visiting)?),
                )),
                FieldKind::RegionGraph => ColumnType::RegionNodeList,
                FieldKind::Loadable => ColumnType::Text,
            };
            columns.push((field.name.clone(), column));
        }

        visiting.pop();
        Ok(columns)
    }
}

/// Encodes a record as a flat table row.
///
/// Loadable fields persist only their reference: load state is not part of
/// the row, so a decoded record's lazy fields always start unloaded.
pub fn to_row(record: &Record) -> DataResult<TableRow> {
    let schema = Arc::clone(record.schema());
    let cells = schema
        .fields
        .iter()
        .zip(record.fields())
        .map(|(descriptor, (name, value))| {
            Ok((name.to_string(), encode_value(value, &descriptor.kind)?))
        })
        .collect::<DataResult<Vec<_>>>()?;
    Ok(TableRow {
        type_name: record.type_name().to_string(),
        cells,
    })
}

/// Decodes a table row back into a record of the given registered type.
///
/// Fails with [`DataError::SchemaMismatch`] if the row's encoded field set
/// does not exactly match the schema's expected fields.
pub fn from_row(row: &TableRow, type_name: &str, registry: &SchemaRegistry) -> DataResult<Record> {
    if row.type_name != type_name {
        return Err(DataError::schema_mismatch(format!(
            "row encodes type '{}', expected '{type_name}'",
            row.type_name
        )));
    }
    let schema = registry.describe(type_name)?;
    if row.cells.len() != schema.fields.len() {
        return Err(DataError::schema_mismatch(format!(
            "row for '{type_name}' has {} fields, schema expects {}",
            row.cells.len(),
            schema.fields.len()
        )));
    }

    let mut values = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let cell = row.cell(&field.name).ok_or_else(|| {
            DataError::schema_mismatch(format!(
                "row for '{type_name}' is missing field '{}'",
                field.name
            ))
        })?;
        values.push(decode_value(cell, &field.kind, &field.name, registry)?);
    }
    Record::from_ordered(schema, values)
}

fn encode_value(value: &Value, kind: &FieldKind) -> DataResult<CellValue> {
    Ok(match value {
        Value::Int(i) => CellValue::Int(*i),
        Value::Float(f) => CellValue::Float(*f),
        Value::Bool(b) => CellValue::Bool(*b),
        Value::Text(t) => CellValue::Text(t.clone()),
        Value::Tensor(tensor) => match kind {
            // Fixed-shape tensors flatten into a fixed-size list; the shape
            // is recovered from the descriptor at decode time.
            FieldKind::Tensor { shape: Some(_) } => {
                CellValue::FloatList(tensor.data.iter().copied().collect())
            }
            _ => encode_tensor(tensor),
        },
        Value::TextSeq(tokens) => CellValue::TextList(tokens.clone()),
        Value::Record(record) => CellValue::Struct(to_row(record)?.cells),
        Value::RecordSeq(records) => CellValue::StructList(
            records
                .iter()
                .map(|r| Ok(CellValue::Struct(to_row(r)?.cells)))
                .collect::<DataResult<Vec<_>>>()?,
        ),
        Value::RegionGraph(graph) => CellValue::Regions(graph.flatten()),
        // Only the reference persists; loaded content is not columnar data.
        Value::Lazy(lazy) => CellValue::Text(lazy.reference().to_string()),
    })
}

fn encode_tensor(tensor: &TensorValue) -> CellValue {
    let data: Vec<f32> = tensor.data.iter().copied().collect();
    CellValue::Struct(vec![
        (
            "shape".to_string(),
            CellValue::IntList(tensor.shape().iter().map(|d| *d as i64).collect()),
        ),
        ("data".to_string(), CellValue::FloatList(data)),
    ])
}

fn decode_value(
    cell: &CellValue,
    kind: &FieldKind,
    field: &str,
    registry: &SchemaRegistry,
) -> DataResult<Value> {
    let mismatch = || {
        DataError::schema_mismatch(format!(
            "field '{field}' holds a cell incompatible with kind {}",
            kind.name()
        ))
    };

    Ok(match (kind, cell) {
        (FieldKind::Int, CellValue::Int(i)) => Value::Int(*i),
        (FieldKind::Float, CellValue::Float(f)) => Value::Float(*f),
        (FieldKind::Bool, CellValue::Bool(b)) => Value::Bool(*b),
        (FieldKind::Text, CellValue::Text(t)) => Value::Text(t.clone()),
        (FieldKind::Tensor { shape: Some(shape) }, CellValue::FloatList(data)) => {
            let array = ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(shape), data.clone())
                .map_err(|e| {
                    DataError::schema_mismatch(format!(
                        "field '{field}' fixed-list length disagrees with declared shape: {e}"
                    ))
                })?;
            Value::Tensor(TensorValue::cpu(array))
        }
        (FieldKind::Tensor { shape: None }, CellValue::Struct(members)) => {
            Value::Tensor(decode_tensor(members, field)?)
        }
        (FieldKind::TextSeq, CellValue::TextList(tokens)) => Value::TextSeq(tokens.clone()),
        (FieldKind::Record(nested), CellValue::Struct(cells)) => {
            let row = TableRow {
                type_name: nested.clone(),
                cells: cells.clone(),
            };
            Value::Record(from_row(&row, nested, registry)?)
        }
        (FieldKind::RecordSeq(nested), CellValue::StructList(items)) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                let CellValue::Struct(cells) = item else {
                    return Err(mismatch());
                };
                let row = TableRow {
                    type_name: nested.clone(),
                    cells: cells.clone(),
                };
                records.push(from_row(&row, nested, registry)?);
            }
            Value::RecordSeq(records)
        }
        (FieldKind::RegionGraph, CellValue::Regions(nodes)) => {
            Value::RegionGraph(RegionGraph::from_flat(nodes)?)
        }
        (FieldKind::Loadable, CellValue::Text(reference)) => {
            Value::Lazy(LazyValue::new(reference.clone()))
        }
        _ => return Err(mismatch()),
    })
}

fn decode_tensor(members: &[(String, CellValue)], field: &str) -> DataResult<TensorValue> {
    let shape = match members.iter().find(|(n, _)| n == "shape") {
        Some((_, CellValue::IntList(dims))) => dims
            .iter()
            .map(|d| {
                usize::try_from(*d).map_err(|_| {
                    DataError::schema_mismatch(format!(
                        "field '{field}' has negative tensor dimension {d}"
                    ))
                })
            })
            .collect::<DataResult<Vec<usize>>>()?,
        _ => {
            return Err(DataError::schema_mismatch(format!(
                "field '{field}' tensor cell is missing its shape"
            )))
        }
    };
    let data = match members.iter().find(|(n, _)| n == "data") {
        Some((_, CellValue::FloatList(data))) => data.clone(),
        _ => {
            return Err(DataError::schema_mismatch(format!(
                "field '{field}' tensor cell is missing its data"
            )))
        }
    };
    let array = ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&shape), data).map_err(|e| {
        DataError::schema_mismatch(format!("field '{field}' tensor shape/data disagree: {e}"))
    })?;
    // Columnar storage is host memory; decoded tensors start on the CPU.
    Ok(TensorValue::cpu(array))
}
