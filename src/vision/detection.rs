//! Plate detection contract
//!
//! The detector itself is an external model. This module only defines what
//! it hands back and how one candidate is chosen among several.

use image::DynamicImage;

use crate::geometry::{corners_from_box, Point2D};

/// One detector candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Corner points in any order; the normalizer re-derives the order
    pub corners: [Point2D; 4],
    /// Detector score
    pub confidence: f32,
}

impl Detection {
    /// Candidate from an axis-aligned box `(x1, y1, x2, y2)`
    pub fn from_box(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f32) -> Self {
        Self {
            corners: corners_from_box(x1, y1, x2, y2),
            confidence,
        }
    }
}

/// External plate detector
pub trait PlateDetector: Send + Sync {
    /// Zero or more candidate plates in `image`
    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Vec<Detection>>;
}

/// Highest-scoring candidate; the earliest wins a tie
pub fn best_candidate(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best: Option<&Detection>, candidate| match best {
        Some(current) if current.confidence >= candidate.confidence => Some(current),
        _ => Some(candidate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_candidate_picks_highest_confidence() {
        let detections = vec![
            Detection::from_box(0.0, 0.0, 10.0, 5.0, 0.4),
            Detection::from_box(20.0, 20.0, 60.0, 35.0, 0.9),
            Detection::from_box(5.0, 5.0, 15.0, 10.0, 0.9),
        ];

        let best = best_candidate(&detections).unwrap();
        assert_eq!(best.corners[0], Point2D::new(20.0, 20.0));
    }

    #[test]
    fn test_best_candidate_empty() {
        assert!(best_candidate(&[]).is_none());
    }
}
