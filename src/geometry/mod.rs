//! Plate corner geometry
//!
//! Canonical ordering and validation of the four corner points that
//! delimit a plate in the source image.

use serde::{Deserialize, Serialize};

use crate::error::{PlateError, Result};

/// Fraction of the bounding-box area a quadrilateral must exceed
const MIN_AREA_FRACTION: f64 = 1e-3;

/// Image coordinate, row 0 at the top
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Point2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Four corners in canonical order: top-left, top-right, bottom-right, bottom-left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral {
    corners: [Point2D; 4],
}

impl Quadrilateral {
    /// Order four points and reject degenerate input.
    ///
    /// Ordering is always re-derived from the points, even when the caller
    /// already supplied them in canonical order. Top-left has the smallest
    /// `x + y`, bottom-right the largest; top-right has the smallest `y - x`
    /// and bottom-left the largest.
    pub fn from_points(points: [Point2D; 4]) -> Result<Self> {
        if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(PlateError::DegenerateGeometry(
                "corner coordinates must be finite".to_string(),
            ));
        }

        let sums = points.map(|p| p.x + p.y);
        let diffs = points.map(|p| p.y - p.x);

        let top_left = argmin(&sums);
        let bottom_right = argmax(&sums);
        let top_right = argmin(&diffs);
        let bottom_left = argmax(&diffs);

        let picked = [top_left, top_right, bottom_right, bottom_left];
        for i in 0..4 {
            for j in (i + 1)..4 {
                if picked[i] == picked[j] {
                    return Err(PlateError::DegenerateGeometry(format!(
                        "point {} claimed by two corners",
                        picked[i]
                    )));
                }
            }
        }

        let quad = Self {
            corners: picked.map(|i| points[i]),
        };
        quad.validate()?;
        Ok(quad)
    }

    /// Convenience for `(x, y)` tuples
    pub fn from_tuples(points: [(f64, f64); 4]) -> Result<Self> {
        Self::from_points(points.map(Point2D::from))
    }

    fn validate(&self) -> Result<()> {
        let bbox_area = self.bounding_box_area();
        let min_area = bbox_area * MIN_AREA_FRACTION;
        if bbox_area <= 0.0 {
            return Err(PlateError::DegenerateGeometry(
                "corners have an empty bounding box".to_string(),
            ));
        }

        // Every consecutive triple must turn; 0.5 * |cross| is the triangle area
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            let c = self.corners[(i + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            if 0.5 * cross.abs() <= min_area {
                return Err(PlateError::DegenerateGeometry(format!(
                    "corners {}, {} and {} are collinear",
                    i,
                    (i + 1) % 4,
                    (i + 2) % 4
                )));
            }
        }

        let area = self.signed_area();
        if area <= min_area {
            return Err(PlateError::DegenerateGeometry(format!(
                "enclosed area {:.3} below minimum {:.3}",
                area, min_area
            )));
        }

        Ok(())
    }

    /// Corners as `[tl, tr, br, bl]`
    pub fn corners(&self) -> &[Point2D; 4] {
        &self.corners
    }

    pub fn top_left(&self) -> Point2D {
        self.corners[0]
    }

    pub fn top_right(&self) -> Point2D {
        self.corners[1]
    }

    pub fn bottom_right(&self) -> Point2D {
        self.corners[2]
    }

    pub fn bottom_left(&self) -> Point2D {
        self.corners[3]
    }

    /// Shoelace area; positive for clockwise order in image coordinates
    pub fn signed_area(&self) -> f64 {
        let mut twice = 0.0;
        for i in 0..4 {
            let p = self.corners[i];
            let q = self.corners[(i + 1) % 4];
            twice += p.x * q.y - q.x * p.y;
        }
        twice / 2.0
    }

    fn bounding_box_area(&self) -> f64 {
        let min_x = self.corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let min_y = self.corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_x = self.corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = self.corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
        (max_x - min_x) * (max_y - min_y)
    }

    /// Mean length of the top and bottom edges
    pub fn mean_width(&self) -> f64 {
        let top = self.top_left().distance(&self.top_right());
        let bottom = self.bottom_left().distance(&self.bottom_right());
        (top + bottom) / 2.0
    }

    /// Mean length of the left and right edges
    pub fn mean_height(&self) -> f64 {
        let left = self.top_left().distance(&self.bottom_left());
        let right = self.top_right().distance(&self.bottom_right());
        (left + right) / 2.0
    }
}

/// Corners of an axis-aligned detector box `(x1, y1, x2, y2)`
pub fn corners_from_box(x1: f64, y1: f64, x2: f64, y2: f64) -> [Point2D; 4] {
    [
        Point2D::new(x1, y1),
        Point2D::new(x2, y1),
        Point2D::new(x2, y2),
        Point2D::new(x1, y2),
    ]
}

fn argmin(values: &[f64; 4]) -> usize {
    let mut best = 0;
    for i in 1..4 {
        if values[i] < values[best] {
            best = i;
        }
    }
    best
}

fn argmax(values: &[f64; 4]) -> usize {
    let mut best = 0;
    for i in 1..4 {
        if values[i] > values[best] {
            best = i;
        }
    }
    best
}
