//! Core data-model functionality.
//!
//! This module contains the schema registry, the record model, the batching
//! engine, the device conversion engine, and the columnar table codec.

pub mod batch;
pub mod device;
pub mod errors;
pub mod record;
pub mod schema;
pub mod table;
pub mod value;

pub use batch::{combine, split, Batch, BatchOptions, BatchedField};
pub use device::{CpuRuntime, Device, DeviceRuntime};
pub use errors::{DataError, DataResult, FieldFailure};
pub use record::Record;
pub use schema::{FieldDescriptor, FieldKind, RecordSchema, SchemaRegistry};
pub use table::{CellValue, ColumnType, TableRow, TableSchema};
pub use value::{LazyValue, Loader, TensorValue, Value};
