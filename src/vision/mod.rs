//! Vision Layer
//!
//! Single-image plate reading: corner normalization, perspective
//! rectification, OCR preprocessing and recognition.
//!
//! Each stage is a plain function taking explicit configuration; the
//! [`PlatePipeline`] only sequences them and owns the recognizer pool.

pub mod detection;
pub mod ocr;
pub mod preprocess;
pub mod rectify;

pub use detection::{best_candidate, Detection, PlateDetector};
pub use ocr::{
    CharConfidence, LineEngine, LineRecognizer, RecognitionResult, RecognizerPool,
    TextLine, TextRecognizer,
};
pub use preprocess::{preprocess, Preprocessed};
pub use rectify::rectify;

use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::RectificationConfig;
use crate::error::Result;
use crate::geometry::{Point2D, Quadrilateral};

/// Everything produced while reading one plate
#[derive(Debug, Clone)]
pub struct PlateReading {
    /// Perspective-corrected plate
    pub rectified: DynamicImage,
    /// Binarized, cleaned and padded image handed to the recognizer
    pub prepared: Preprocessed,
    /// Recognizer output
    pub recognition: RecognitionResult,
}

/// Rectify then preprocess, without recognition
pub fn prepare(
    image: &DynamicImage,
    corners: [Point2D; 4],
    config: &RectificationConfig,
) -> Result<(DynamicImage, Preprocessed)> {
    let quad = Quadrilateral::from_points(corners)?;
    let rectified = rectify(image, &quad, config)?;
    let prepared = preprocess(&rectified, config)?;
    Ok((rectified, prepared))
}

/// Single-image pipeline sharing one recognizer pool
pub struct PlatePipeline {
    recognizers: Arc<RecognizerPool>,
}

impl PlatePipeline {
    pub fn new(recognizers: Arc<RecognizerPool>) -> Self {
        Self { recognizers }
    }

    /// Shared recognizer pool
    pub fn recognizers(&self) -> &Arc<RecognizerPool> {
        &self.recognizers
    }

    /// Read the plate delimited by `corners`
    pub fn read_plate(
        &self,
        image: &DynamicImage,
        corners: [Point2D; 4],
        config: &RectificationConfig,
    ) -> Result<PlateReading> {
        let start = Instant::now();

        let (rectified, prepared) = prepare(image, corners, config)?;
        debug!(
            "Prepared plate {}x{} (threshold {}) in {:?}",
            prepared.padded.width(),
            prepared.padded.height(),
            prepared.threshold,
            start.elapsed()
        );

        let recognition = self.recognizers.recognize(&prepared.padded, None)?;
        info!(
            "Read plate '{}' (mean confidence {:.2}) in {:?}",
            recognition.text,
            recognition.mean_confidence(),
            start.elapsed()
        );

        Ok(PlateReading {
            rectified,
            prepared,
            recognition,
        })
    }
}
