//! Domain types for document regions.
//!
//! This module contains the geometric primitives and the hierarchical region
//! graph produced by the hOCR parser.

pub mod geometry;
pub mod region;

pub use geometry::{BoundingBox, CoordinateSystem, OutOfRangePolicy};
pub use region::{FlatRegionNode, RegionGraph, RegionKind, RegionNode, UNKNOWN_CONFIDENCE};
