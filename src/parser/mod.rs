//! Markup parsing.
//!
//! [`markup`] turns a document into a generic element tree; [`hocr`] walks
//! that tree and produces a hierarchical region graph.

pub mod hocr;
pub mod markup;

pub use hocr::{HocrParser, HocrParserConfig};
pub use markup::Element;
