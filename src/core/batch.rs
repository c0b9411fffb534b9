//! Batching engine.
//!
//! Combines N records of the same registered type into one batched structure
//! and reverses the operation exactly. Each field is combined according to
//! its declared kind: uniform tensors are stacked along a new leading axis,
//! variable-shape tensors and text sequences are padded to the batch maximum
//! with configurable fill values, nested records are combined recursively,
//! and region graphs are retained per item since their topology differs per
//! item. Enough per-item metadata (original shapes, valid lengths) is kept
//! to make `split(combine(rs)) == rs` hold for every supported kind.

use std::sync::Arc;

use itertools::Itertools;
use ndarray::{ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::device::Device;
use crate::core::errors::{DataError, DataResult};
use crate::core::record::Record;
use crate::core::schema::{FieldKind, RecordSchema};
use crate::core::value::{LazyValue, TensorValue, Value};
use crate::domain::region::RegionGraph;

/// Fill-value configuration for padded fields.
///
/// The padding policy is explicit configuration rather than a hard-coded
/// default so callers can match whatever convention their models expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Fill value for padded numeric tensors.
    pub numeric_fill: f32,
    /// Fill value for padded text sequences.
    pub text_fill: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            numeric_fill: 0.0,
            text_fill: String::new(),
        }
    }
}

/// The combined representation of one field across a batch of records.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchedField {
    /// Integer scalars, one per item.
    Ints(Vec<i64>),
    /// Float scalars, one per item.
    Floats(Vec<f64>),
    /// Boolean scalars, one per item.
    Bools(Vec<bool>),
    /// Text scalars, one per item.
    Texts(Vec<String>),
    /// Tensors stacked along a new leading batch axis, padded to the
    /// per-axis maximum where shapes vary. `shapes` holds each item's
    /// original shape so padding is distinguishable from data.
    Tensors {
        /// The stacked data of shape `[batch, max_d0, max_d1, ...]`.
        data: ArrayD<f32>,
        /// The device the stacked data lives on.
        device: Device,
        /// Original per-item shapes.
        shapes: Vec<Vec<usize>>,
    },
    /// Text sequences padded to the maximum length across the batch, with
    /// parallel valid lengths.
    TextSeqs {
        /// Padded sequences, each of the same length.
        padded: Vec<Vec<String>>,
        /// The original length of each sequence.
        valid_lens: Vec<usize>,
    },
    /// A nested record field, combined recursively.
    Records(Box<Batch>),
    /// Record sequences retained per item; lengths differ per item.
    RecordSeqs(Vec<Vec<Record>>),
    /// Region graphs retained per item; graph topology differs per item.
    RegionGraphs(Vec<RegionGraph>),
    /// Lazy references retained per item, with their load state.
    Lazies(Vec<LazyValue>),
}

/// The combined representation of a sequence of records.
///
/// A batch is record-shaped: each field holds the combined representation of
/// that field across the source records, plus the explicit batch size. It
/// does not retain the source records.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    schema: Arc<RecordSchema>,
    batch_size: usize,
    fields: Vec<BatchedField>,
}

impl Batch {
    /// The number of records combined into this batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The schema of the combined records.
    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// The combined fields in schema order.
    pub fn fields(&self) -> &[BatchedField] {
        &self.fields
    }

    /// Returns a combined field by name.
    pub fn field(&self, name: &str) -> Option<&BatchedField> {
        self.schema.field_index(name).map(|i| &self.fields[i])
    }

    /// Replaces the fields, keeping schema and size. Used by the device
    /// conversion engine.
    pub(crate) fn with_fields(&self, fields: Vec<BatchedField>) -> Batch {
        Batch {
            schema: Arc::clone(&self.schema),
            batch_size: self.batch_size,
            fields,
        }
    }
}

/// Combines a non-empty, type-homogeneous sequence of records into a batch
/// using default fill values.
pub fn combine(records: &[Record]) -> DataResult<Batch> {
    combine_with(records, &BatchOptions::default())
}

/// Combines records into a batch with explicit fill-value options.
///
/// All records must share the same registered type; records differing in
/// field kind fail with [`DataError::BatchHeterogeneity`].
pub fn combine_with(records: &[Record], options: &BatchOptions) -> DataResult<Batch> {
    let first = records
        .first()
        .ok_or_else(|| DataError::invalid_input("cannot combine an empty record sequence"))?;
    let schema = Arc::clone(first.schema());

    for record in &records[1..] {
        if record.type_name() != schema.type_name {
            return Err(DataError::batch_heterogeneity(format!(
                "mixed record types '{}' and '{}'",
                schema.type_name,
                record.type_name()
            )));
        }
        if record.schema().as_ref() != schema.as_ref() {
            return Err(DataError::batch_heterogeneity(format!(
                "records of type '{}' carry diverging schemas",
                schema.type_name
            )));
        }
    }

    let mut fields = Vec::with_capacity(schema.fields.len());
    for (index, descriptor) in schema.fields.iter().enumerate() {
        let values: Vec<&Value> = records
            .iter()
            .map(|r| r.get_index(index).expect("validated record"))
            .collect();
        fields.push(combine_field(&descriptor.kind, &values, options)?);
    }

    debug!(
        type_name = %schema.type_name,
        batch_size = records.len(),
        "combined records into batch"
    );
    Ok(Batch {
        schema,
        batch_size: records.len(),
        fields,
    })
}

/// Splits a batch back into the original records.
///
/// Inverse of [`combine`]: original unpadded shapes and sequence lengths are
/// recovered from the stored per-item metadata.
pub fn split(batch: Batch) -> DataResult<Vec<Record>> {
    let Batch {
        schema,
        batch_size,
        fields,
    } = batch;

    // Per-field vectors of per-item values, transposed into records below.
    let mut columns: Vec<Vec<Value>> = Vec::with_capacity(fields.len());
    for field in fields {
        let column = split_field(field, batch_size)?;
        if column.len() != batch_size {
            return Err(DataError::invalid_input(format!(
                "batched field yielded {} items, expected {batch_size}",
                column.len()
            )));
        }
        columns.push(column);
    }

    let mut records = Vec::with_capacity(batch_size);
    for item in 0..batch_size {
        let values = columns
            .iter_mut()
            .map(|column| std::mem::replace(&mut column[item], Value::Bool(false)))
            .collect();
        records.push(Record::from_ordered(Arc::clone(&schema), values)?);
    }
    Ok(records)
}

fn combine_field(
    kind: &FieldKind,
    values: &[&Value],
    options: &BatchOptions,
) -> DataResult<BatchedField> {
    match kind {
        FieldKind::Int => Ok(BatchedField::Ints(
            values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => *i,
                    _ => unreachable!("validated record"),
                })
                .collect(),
        )),
        FieldKind::Float => Ok(BatchedField::Floats(
            values
                .iter()
                .map(|v| match v {
                    Value::Float(f) => *f,
                    _ => unreachable!("validated record"),
                })
                .collect(),
        )),
        FieldKind::Bool => Ok(BatchedField::Bools(
            values
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => *b,
                    _ => unreachable!("validated record"),
                })
                .collect(),
        )),
        FieldKind::Text => Ok(BatchedField::Texts(
            values
                .iter()
                .map(|v| match v {
                    Value::Text(t) => t.clone(),
                    _ => unreachable!("validated record"),
                })
                .collect(),
        )),
        FieldKind::Tensor { .. } => {
            let tensors: Vec<&TensorValue> = values
                .iter()
                .map(|v| match v {
                    Value::Tensor(t) => t,
                    _ => unreachable!("validated record"),
                })
                .collect();
            combine_tensors(&tensors, options)
        }
        FieldKind::TextSeq => {
            let seqs: Vec<&Vec<String>> = values
                .iter()
                .map(|v| match v {
                    Value::TextSeq(s) => s,
                    _ => unreachable!("validated record"),
                })
                .collect();
            Ok(combine_text_seqs(&seqs, options))
        }
        FieldKind::Record(_) => {
            let nested: Vec<Record> = values
                .iter()
                .map(|v| match v {
                    Value::Record(r) => r.clone(),
                    _ => unreachable!("validated record"),
                })
                .collect();
            Ok(BatchedField::Records(Box::new(combine_with(
                &nested, options,
            )?)))
        }
        FieldKind::RecordSeq(_) => Ok(BatchedField::RecordSeqs(
            values
                .iter()
                .map(|v| match v {
                    Value::RecordSeq(rs) => rs.clone(),
                    _ => unreachable!("validated record"),
                })
                .collect(),
        )),
        FieldKind::RegionGraph => Ok(BatchedField::RegionGraphs(
            values
                .iter()
                .map(|v| match v {
                    Value::RegionGraph(g) => g.clone(),
                    _ => unreachable!("validated record"),
                })
                .collect(),
        )),
        FieldKind::Loadable => Ok(BatchedField::Lazies(
            values
                .iter()
                .map(|v| match v {
                    Value::Lazy(l) => l.clone(),
                    _ => unreachable!("validated record"),
                })
                .collect(),
        )),
    }
}

/// Stacks tensors along a new leading axis, padding variable shapes to the
/// per-axis maximum.
fn combine_tensors(tensors: &[&TensorValue], options: &BatchOptions) -> DataResult<BatchedField> {
    let rank = tensors[0].data.ndim();
    if tensors.iter().any(|t| t.data.ndim() != rank) {
        return Err(DataError::batch_heterogeneity(format!(
            "tensor ranks differ across the batch: {:?}",
            tensors.iter().map(|t| t.data.ndim()).collect::<Vec<_>>()
        )));
    }
    if !tensors.iter().map(|t| t.device).all_equal() {
        return Err(DataError::invalid_input(
            "cannot combine tensors placed on different devices",
        ));
    }

    let shapes: Vec<Vec<usize>> = tensors.iter().map(|t| t.data.shape().to_vec()).collect();
    let mut max_shape = vec![0usize; rank];
    for shape in &shapes {
        for (axis, dim) in shape.iter().enumerate() {
            max_shape[axis] = max_shape[axis].max(*dim);
        }
    }
    let uniform = shapes.iter().all_equal();
    if !uniform {
        debug!(?max_shape, "padding variable tensor shapes");
    }

    let mut batched_shape = Vec::with_capacity(rank + 1);
    batched_shape.push(tensors.len());
    batched_shape.extend_from_slice(&max_shape);

    let mut data = ArrayD::from_elem(IxDyn(&batched_shape), options.numeric_fill);
    let mut index = vec![0usize; rank + 1];
    for (item, tensor) in tensors.iter().enumerate() {
        index[0] = item;
        for (coords, value) in tensor.data.indexed_iter() {
            index[1..].copy_from_slice(coords.slice());
            data[IxDyn(&index)] = *value;
        }
    }

    Ok(BatchedField::Tensors {
        data,
        device: tensors[0].device,
        shapes,
    })
}

/// Pads text sequences to the maximum length with the configured fill.
fn combine_text_seqs(seqs: &[&Vec<String>], options: &BatchOptions) -> BatchedField {
    let valid_lens: Vec<usize> = seqs.iter().map(|s| s.len()).collect();
    let max_len = valid_lens.iter().copied().max().unwrap_or(0);
    let padded = seqs
        .iter()
        .map(|seq| {
            let mut row = (*seq).clone();
            row.resize(max_len, options.text_fill.clone());
            row
        })
        .collect();
    BatchedField::TextSeqs { padded, valid_lens }
}

fn split_field(field: BatchedField, batch_size: usize) -> DataResult<Vec<Value>> {
    match field {
        BatchedField::Ints(items) => Ok(items.into_iter().map(Value::Int).collect()),
        BatchedField::Floats(items) => Ok(items.into_iter().map(Value::Float).collect()),
        BatchedField::Bools(items) => Ok(items.into_iter().map(Value::Bool).collect()),
        BatchedField::Texts(items) => Ok(items.into_iter().map(Value::Text).collect()),
        BatchedField::Tensors {
            data,
            device,
            shapes,
        } => split_tensors(data, device, &shapes),
        BatchedField::TextSeqs { padded, valid_lens } => Ok(padded
            .into_iter()
            .zip(valid_lens)
            .map(|(mut row, len)| {
                row.truncate(len);
                Value::TextSeq(row)
            })
            .collect()),
        BatchedField::Records(nested) => {
            let records = split(*nested)?;
            Ok(records.into_iter().map(Value::Record).collect())
        }
        BatchedField::RecordSeqs(items) => {
            Ok(items.into_iter().map(Value::RecordSeq).collect())
        }
        BatchedField::RegionGraphs(items) => {
            Ok(items.into_iter().map(Value::RegionGraph).collect())
        }
        BatchedField::Lazies(items) => Ok(items.into_iter().map(Value::Lazy).collect()),
    }
    .and_then(|values: Vec<Value>| {
        if values.len() == batch_size {
            Ok(values)
        } else {
            Err(DataError::invalid_input(format!(
                "batched field holds {} items, expected {batch_size}",
                values.len()
            )))
        }
    })
}

/// Recovers the original unpadded tensors from the stacked representation.
fn split_tensors(
    data: ArrayD<f32>,
    device: Device,
    shapes: &[Vec<usize>],
) -> DataResult<Vec<Value>> {
    let mut out = Vec::with_capacity(shapes.len());
    for (item, shape) in shapes.iter().enumerate() {
        let mut tensor = ArrayD::zeros(IxDyn(shape));
        let mut index = vec![0usize; shape.len() + 1];
        index[0] = item;
        for (coords, value) in tensor.indexed_iter_mut() {
            index[1..].copy_from_slice(coords.slice());
            *value = data[IxDyn(&index)];
        }
        out.push(Value::Tensor(TensorValue {
            data: tensor,
            device,
        }));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{FieldDescriptor, SchemaRegistry};
    use ndarray::ArrayD;

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .register(
                "page-meta",
                vec![FieldDescriptor::new("index", FieldKind::Int)],
            )
            .unwrap();
        registry
            .register(
                "doc",
                vec![
                    FieldDescriptor::new("label", FieldKind::Int),
                    FieldDescriptor::new("tokens", FieldKind::TextSeq),
                    FieldDescriptor::new("features", FieldKind::Tensor { shape: None }),
                    FieldDescriptor::new("meta", FieldKind::Record("page-meta".into())),
                ],
            )
            .unwrap();
        registry
    }

    fn doc_record(registry: &SchemaRegistry, label: i64, tokens: &[&str], dim: usize) -> Record {
        let meta_schema = registry.describe("page-meta").unwrap();
        let meta = Record::validate(
            meta_schema,
            vec![("index".into(), Value::Int(label * 10))],
        )
        .unwrap();
        let schema = registry.describe("doc").unwrap();
        Record::validate(
            schema,
            vec![
                ("label".into(), Value::Int(label)),
                (
                    "tokens".into(),
                    Value::TextSeq(tokens.iter().map(|t| t.to_string()).collect()),
                ),
                (
                    "features".into(),
                    Value::Tensor(TensorValue::cpu(ArrayD::from_shape_fn(
                        vec![dim, 2],
                        |idx| (idx[0] * 2 + idx[1]) as f32 + label as f32,
                    ))),
                ),
                ("meta".into(), Value::Record(meta)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn combine_then_split_round_trips() {
        let registry = registry();
        let records = vec![
            doc_record(&registry, 1, &["a", "b", "c"], 3),
            doc_record(&registry, 2, &["d", "e", "f", "g", "h"], 5),
        ];
        let batch = combine(&records).unwrap();
        assert_eq!(batch.batch_size(), 2);
        let recovered = split(batch).unwrap();
        assert_eq!(recovered, records);
    }

    #[test]
    fn variable_text_sequences_are_padded_with_valid_lengths() {
        let registry = registry();
        let records = vec![
            doc_record(&registry, 1, &["a", "b", "c"], 2),
            doc_record(&registry, 2, &["d", "e", "f", "g", "h"], 2),
        ];
        let batch = combine(&records).unwrap();
        match batch.field("tokens").unwrap() {
            BatchedField::TextSeqs { padded, valid_lens } => {
                assert_eq!(valid_lens, &[3, 5]);
                assert_eq!(padded[0].len(), 5);
                assert_eq!(padded[0][3], "");
                assert_eq!(padded[1][4], "h");
            }
            other => panic!("expected text sequences, got {other:?}"),
        }
    }

    #[test]
    fn variable_tensors_are_padded_and_recovered() {
        let registry = registry();
        let records = vec![
            doc_record(&registry, 0, &["x"], 2),
            doc_record(&registry, 0, &["y"], 4),
        ];
        let batch = combine(&records).unwrap();
        match batch.field("features").unwrap() {
            BatchedField::Tensors { data, shapes, .. } => {
                assert_eq!(data.shape(), &[2, 4, 2]);
                assert_eq!(shapes, &[vec![2, 2], vec![4, 2]]);
                // Padding region of the first item holds the fill value.
                assert_eq!(data[[0, 3, 1]], 0.0);
            }
            other => panic!("expected tensors, got {other:?}"),
        }
        let recovered = split(batch).unwrap();
        assert_eq!(recovered, records);
    }

    #[test]
    fn custom_fill_values_apply() {
        let registry = registry();
        let records = vec![
            doc_record(&registry, 0, &["x"], 1),
            doc_record(&registry, 0, &["y", "z"], 2),
        ];
        let options = BatchOptions {
            numeric_fill: -9.0,
            text_fill: "<pad>".into(),
        };
        let batch = combine_with(&records, &options).unwrap();
        match batch.field("tokens").unwrap() {
            BatchedField::TextSeqs { padded, .. } => assert_eq!(padded[0][1], "<pad>"),
            other => panic!("expected text sequences, got {other:?}"),
        }
        match batch.field("features").unwrap() {
            BatchedField::Tensors { data, .. } => assert_eq!(data[[0, 1, 0]], -9.0),
            other => panic!("expected tensors, got {other:?}"),
        }
    }

    #[test]
    fn nested_records_combine_recursively() {
        let registry = registry();
        let records = vec![
            doc_record(&registry, 1, &["a"], 1),
            doc_record(&registry, 2, &["b"], 1),
        ];
        let batch = combine(&records).unwrap();
        match batch.field("meta").unwrap() {
            BatchedField::Records(nested) => {
                assert_eq!(nested.batch_size(), 2);
                assert_eq!(
                    nested.field("index").unwrap(),
                    &BatchedField::Ints(vec![10, 20])
                );
            }
            other => panic!("expected nested batch, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(combine(&[]).is_err());
    }

    #[test]
    fn mixed_types_are_rejected() {
        let registry = registry();
        let doc = doc_record(&registry, 1, &["a"], 1);
        let meta_schema = registry.describe("page-meta").unwrap();
        let meta =
            Record::validate(meta_schema, vec![("index".into(), Value::Int(0))]).unwrap();
        let err = combine(&[doc, meta]).unwrap_err();
        assert!(matches!(err, DataError::BatchHeterogeneity { .. }));
    }

    #[test]
    fn mixed_tensor_ranks_are_rejected() {
        let registry = SchemaRegistry::new();
        let schema = registry
            .register(
                "t",
                vec![FieldDescriptor::new("x", FieldKind::Tensor { shape: None })],
            )
            .unwrap();
        let a = Record::validate(
            Arc::clone(&schema),
            vec![(
                "x".into(),
                Value::Tensor(TensorValue::cpu(ArrayD::zeros(vec![2]))),
            )],
        )
        .unwrap();
        let b = Record::validate(
            schema,
            vec![(
                "x".into(),
                Value::Tensor(TensorValue::cpu(ArrayD::zeros(vec![2, 2]))),
            )],
        )
        .unwrap();
        let err = combine(&[a, b]).unwrap_err();
        assert!(matches!(err, DataError::BatchHeterogeneity { .. }));
    }
}
