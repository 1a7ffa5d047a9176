//! Error taxonomy shared by every pipeline stage

use thiserror::Error;

/// Errors produced by rectification, preprocessing, recognition and consensus
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlateError {
    /// Corner points are collinear, coincident or enclose no area
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requested time window is empty or lies outside the video
    #[error("invalid time range: start={start}s end={end}s (duration {duration}s)")]
    InvalidTimeRange { start: f64, end: f64, duration: f64 },

    /// Recognizer returned no characters
    #[error("recognizer returned no characters")]
    EmptyRecognition,

    /// Every sampled frame failed
    #[error("no usable frames ({frames_processed} processed)")]
    NoUsableFrames { frames_processed: usize },

    /// Video source could not decode a frame
    #[error("failed to decode frame at {timestamp:.3}s: {message}")]
    FrameDecode { timestamp: f64, message: String },

    /// Detector found no candidate in a frame
    #[error("no plate detected")]
    NoPlateDetected,

    /// Recognizer collaborator failed
    #[error("recognizer failed: {0}")]
    Recognizer(String),

    /// Request deadline passed before the work finished
    #[error("request deadline exceeded")]
    Cancelled,
}

impl PlateError {
    /// Whether a video request can carry on after this error for one frame
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            PlateError::EmptyRecognition
                | PlateError::FrameDecode { .. }
                | PlateError::NoPlateDetected
                | PlateError::Recognizer(_)
                | PlateError::DegenerateGeometry(_)
        )
    }
}

/// Library result type
pub type Result<T> = std::result::Result<T, PlateError>;
