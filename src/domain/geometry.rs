//! Geometric primitives for document regions.
//!
//! This module provides the axis-aligned bounding box used throughout the
//! region graph, including normalization from absolute pixel coordinates to
//! relative units, clamping of out-of-range input, and containment clipping.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{DataError, DataResult};

/// The coordinate system a bounding box is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Absolute pixel coordinates relative to the page image.
    AbsolutePixel,
    /// Relative units in [0, 1] against the page dimensions.
    Relative,
}

/// Policy for handling coordinates that fall outside the valid range after
/// normalization. Out-of-range annotation input is a data-quality issue, not
/// a structural error, so the default repairs rather than rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutOfRangePolicy {
    /// Clamp offending coordinates to the valid boundary.
    #[default]
    Clamp,
    /// Reject the box with an error.
    Reject,
}

/// An axis-aligned rectangular region in corner format.
///
/// Invariant: `x0 <= x1` and `y0 <= y1`; in relative form all coordinates
/// lie in [0, 1]. Inputs violating the invariant are repaired or rejected
/// according to [`OutOfRangePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x0: f32,
    /// Top edge.
    pub y0: f32,
    /// Right edge.
    pub x1: f32,
    /// Bottom edge.
    pub y1: f32,
    /// The coordinate system the corners are expressed in.
    pub system: CoordinateSystem,
}

impl BoundingBox {
    /// Creates a box in absolute pixel coordinates, swapping corners if they
    /// arrive out of order.
    pub fn from_pixels(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
            system: CoordinateSystem::AbsolutePixel,
        }
    }

    /// Creates a box already in relative units, clamping into [0, 1].
    pub fn from_relative(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1).clamp(0.0, 1.0),
            y0: y0.min(y1).clamp(0.0, 1.0),
            x1: x0.max(x1).clamp(0.0, 1.0),
            y1: y0.max(y1).clamp(0.0, 1.0),
            system: CoordinateSystem::Relative,
        }
    }

    /// Width of the box.
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    /// Height of the box.
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Area of the box.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// The box as `(x, y, width, height)`.
    pub fn xywh(&self) -> (f32, f32, f32, f32) {
        (self.x0, self.y0, self.width(), self.height())
    }

    /// The corner coordinates as an array.
    pub fn corners(&self) -> [f32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }

    /// Returns true if `other` lies fully within this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x0 >= self.x0 && other.y0 >= self.y0 && other.x1 <= self.x1 && other.y1 <= self.y1
    }

    /// Normalizes the box to relative units against the page dimensions.
    ///
    /// Normalizing an already relative box is the identity. Coordinates
    /// falling outside [0, 1] are clamped to the boundary under the default
    /// policy or rejected under [`OutOfRangePolicy::Reject`].
    pub fn normalized(
        &self,
        page_width: f32,
        page_height: f32,
        policy: OutOfRangePolicy,
    ) -> DataResult<BoundingBox> {
        if self.system == CoordinateSystem::Relative {
            return Ok(*self);
        }
        if page_width <= 0.0 || page_height <= 0.0 {
            return Err(DataError::invalid_input(format!(
                "page dimensions must be positive, got {page_width}x{page_height}"
            )));
        }

        let x0 = self.x0 / page_width;
        let y0 = self.y0 / page_height;
        let x1 = self.x1 / page_width;
        let y1 = self.y1 / page_height;

        let out_of_range = [x0, y0, x1, y1].iter().any(|c| *c < 0.0 || *c > 1.0);
        if out_of_range {
            match policy {
                OutOfRangePolicy::Reject => {
                    return Err(DataError::invalid_input(format!(
                        "normalized coordinates out of range: ({x0}, {y0}, {x1}, {y1})"
                    )));
                }
                OutOfRangePolicy::Clamp => {
                    debug!(
                        x0, y0, x1, y1,
                        "clamping out-of-range normalized coordinates"
                    );
                }
            }
        }

        Ok(BoundingBox {
            x0: x0.clamp(0.0, 1.0),
            y0: y0.clamp(0.0, 1.0),
            x1: x1.clamp(0.0, 1.0),
            y1: y1.clamp(0.0, 1.0),
            system: CoordinateSystem::Relative,
        })
    }

    /// Clips this box to lie within `parent`.
    ///
    /// Both boxes must be in the same coordinate system. A box entirely
    /// outside the parent collapses to a degenerate box on the nearest
    /// parent edge rather than being rejected.
    pub fn clipped_to(&self, parent: &BoundingBox) -> BoundingBox {
        let x0 = self.x0.clamp(parent.x0, parent.x1);
        let y0 = self.y0.clamp(parent.y0, parent.y1);
        let x1 = self.x1.clamp(parent.x0, parent.x1);
        let y1 = self.y1.clamp(parent.y0, parent.y1);
        BoundingBox {
            x0,
            y0,
            x1,
            y1,
            system: self.system,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pixels_orders_corners() {
        let b = BoundingBox::from_pixels(300.0, 150.0, 100.0, 100.0);
        assert_eq!(b.corners(), [100.0, 100.0, 300.0, 150.0]);
        assert_eq!(b.width(), 200.0);
        assert_eq!(b.height(), 50.0);
    }

    #[test]
    fn normalize_produces_relative_units() {
        let b = BoundingBox::from_pixels(100.0, 100.0, 300.0, 150.0);
        let n = b.normalized(2000.0, 3000.0, OutOfRangePolicy::Clamp).unwrap();
        assert_eq!(n.system, CoordinateSystem::Relative);
        assert!((n.x0 - 0.05).abs() < 1e-6);
        assert!((n.y0 - 100.0 / 3000.0).abs() < 1e-6);
        assert!((n.x1 - 0.15).abs() < 1e-6);
        assert!((n.y1 - 0.05).abs() < 1e-6);
    }

    #[test]
    fn normalize_is_idempotent() {
        let b = BoundingBox::from_pixels(10.0, 20.0, 30.0, 40.0);
        let once = b.normalized(100.0, 100.0, OutOfRangePolicy::Clamp).unwrap();
        let twice = once.normalized(100.0, 100.0, OutOfRangePolicy::Clamp).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_clamps_out_of_range_by_default() {
        let b = BoundingBox::from_pixels(-10.0, 0.0, 120.0, 50.0);
        let n = b.normalized(100.0, 100.0, OutOfRangePolicy::Clamp).unwrap();
        assert_eq!(n.x0, 0.0);
        assert_eq!(n.x1, 1.0);
    }

    #[test]
    fn normalize_rejects_when_strict() {
        let b = BoundingBox::from_pixels(0.0, 0.0, 120.0, 50.0);
        assert!(b
            .normalized(100.0, 100.0, OutOfRangePolicy::Reject)
            .is_err());
    }

    #[test]
    fn clipping_repairs_containment() {
        let parent = BoundingBox::from_relative(0.1, 0.1, 0.9, 0.9);
        let child = BoundingBox::from_relative(0.05, 0.2, 0.5, 0.95);
        let clipped = child.clipped_to(&parent);
        assert!(parent.contains(&clipped));
        assert_eq!(clipped.corners(), [0.1, 0.2, 0.5, 0.9]);
    }
}
