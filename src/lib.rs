//! PlateLens - License plate rectification and reading
//!
//! Turns a detected plate region into a fronto-parallel, binarized image,
//! reads it with an external recognizer, and reaches a consensus over several
//! frames of a video.

pub mod config;
pub mod error;
pub mod geometry;
pub mod video;
pub mod vision;

pub use config::{AppConfig, MorphOp, RectificationConfig, Threshold, VideoSettings};
pub use error::{PlateError, Result};
pub use geometry::{Point2D, Quadrilateral};
pub use video::{
    aggregate, sample_frames, ConsensusResult, FrameSample, VideoInfo, VideoRecognizer,
    VideoSource,
};
pub use vision::{
    preprocess, rectify, CharConfidence, Detection, PlateDetector, PlatePipeline, Preprocessed,
    RecognitionResult, RecognizerPool, TextRecognizer,
};
