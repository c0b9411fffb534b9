//! # docmodel
//!
//! Schema-driven data-model runtime for document AI pipelines.
//!
//! This crate provides:
//! - A process-wide schema registry describing how each field of a record
//!   type validates, batches, moves across devices, and columnarizes
//! - A record model with eager, aggregated validation and lazy fields
//! - A batching engine with exact `combine`/`split` round-trips
//! - A device conversion engine over a pluggable device runtime
//! - A columnar table codec with a canonical flat encoding for region graphs
//! - A hierarchical hOCR region parser producing normalized page/paragraph/
//!   line/word graphs with repaired coordinates and confidences
//!
//! ## Modules
//!
//! * [`core`] - Schema registry, records, batching, device conversion, table codec
//! * [`domain`] - Geometry and region-graph domain types
//! * [`parser`] - Generic markup parsing and the hOCR region parser

pub mod core;
pub mod domain;
pub mod parser;

/// Prelude module for convenient imports.
pub mod prelude {
    // Error handling
    pub use crate::core::errors::{DataError, DataResult};

    // Schema and records
    pub use crate::core::record::Record;
    pub use crate::core::schema::{FieldDescriptor, FieldKind, RecordSchema, SchemaRegistry};
    pub use crate::core::value::{LazyValue, Loader, TensorValue, Value};

    // Batching and device placement
    pub use crate::core::batch::{combine, split, Batch, BatchOptions};
    pub use crate::core::device::{CpuRuntime, Device, DeviceRuntime};

    // Table codec
    pub use crate::core::table::{CellValue, ColumnType, TableRow, TableSchema};

    // Geometry and regions
    pub use crate::domain::geometry::{BoundingBox, CoordinateSystem, OutOfRangePolicy};
    pub use crate::domain::region::{
        FlatRegionNode, RegionGraph, RegionKind, RegionNode, UNKNOWN_CONFIDENCE,
    };

    // Parsing
    pub use crate::parser::hocr::{HocrParser, HocrParserConfig};
}
