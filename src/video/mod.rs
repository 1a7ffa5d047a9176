//! Video Layer
//!
//! Samples frames from a time window, reads the plate in each frame on a
//! bounded set of worker threads and votes the readings into one answer.

pub mod consensus;
pub mod sampler;

pub use consensus::{aggregate, normalize_key, ConsensusResult};
pub use sampler::{sample_frames, FrameSample, VideoInfo};

use crossbeam_channel::{bounded, RecvTimeoutError};
use image::DynamicImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{RectificationConfig, VideoSettings};
use crate::error::{PlateError, Result};
use crate::vision::{
    best_candidate, prepare, PlateDetector, RecognitionResult, RecognizerPool, TextRecognizer,
};

/// External video demuxer
pub trait VideoSource: Send + Sync {
    /// Total length in seconds
    fn duration_seconds(&self) -> f64;

    /// Nominal frame rate
    fn frames_per_second(&self) -> f64;

    /// Decode the frame shown at `timestamp_seconds`
    fn decode_frame(&self, timestamp_seconds: f64) -> anyhow::Result<DynamicImage>;

    fn info(&self) -> VideoInfo {
        VideoInfo {
            duration_seconds: self.duration_seconds(),
            frames_per_second: self.frames_per_second(),
        }
    }
}

/// Outcome of one frame
#[derive(Debug, Clone)]
struct FrameOutcome {
    sample: FrameSample,
    result: Result<RecognitionResult>,
}

/// Video plate reader: detector, recognizer pool and worker settings
pub struct VideoRecognizer {
    detector: Arc<dyn PlateDetector>,
    recognizers: Arc<RecognizerPool>,
    settings: VideoSettings,
}

impl VideoRecognizer {
    /// Use an existing pool; its size must match `settings.recognizers`
    pub fn new(
        detector: Arc<dyn PlateDetector>,
        recognizers: Arc<RecognizerPool>,
        settings: VideoSettings,
    ) -> Result<Self> {
        settings.validate()?;
        if recognizers.size() != settings.recognizers {
            return Err(PlateError::InvalidConfig(format!(
                "recognizer pool has {} instances, settings ask for {}",
                recognizers.size(),
                settings.recognizers
            )));
        }
        Ok(Self {
            detector,
            recognizers,
            settings,
        })
    }

    /// Build a pool of `settings.recognizers` instances with `factory`
    pub fn with_factory<F>(
        detector: Arc<dyn PlateDetector>,
        settings: VideoSettings,
        factory: F,
    ) -> Result<Self>
    where
        F: FnMut() -> anyhow::Result<Box<dyn TextRecognizer>>,
    {
        settings.validate()?;
        let recognizers = Arc::new(RecognizerPool::from_factory(settings.recognizers, factory)?);
        Self::new(detector, recognizers, settings)
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.settings
    }

    /// Read the plate across `frame_count` frames of `[start, end]`.
    ///
    /// Frames are prepared in parallel; recognition goes through the shared
    /// pool. When the request deadline passes, unfinished frames are
    /// abandoned and the completed ones are aggregated. Fails with
    /// `NoUsableFrames` when no frame produced a vote.
    pub fn recognize_video(
        &self,
        video: Arc<dyn VideoSource>,
        start_seconds: f64,
        end_seconds: f64,
        frame_count: usize,
        config: &RectificationConfig,
    ) -> Result<ConsensusResult> {
        config.validate()?;

        let request_id = Uuid::new_v4();
        let span = info_span!("recognize_video", %request_id);
        let _enter = span.enter();

        let samples = sample_frames(start_seconds, end_seconds, frame_count, &video.info())?;
        info!(
            "Sampling {} of {} requested frames from {:.2}s-{:.2}s",
            samples.len(),
            frame_count,
            start_seconds,
            end_seconds
        );

        let deadline = self.settings.timeout().map(|t| Instant::now() + t);
        let outcomes = self.run_workers(video, &samples, config, deadline);

        let frames_processed = outcomes.len();
        if frames_processed < samples.len() {
            warn!(
                "Deadline reached: {} of {} frames finished",
                frames_processed,
                samples.len()
            );
        }

        let successes: Vec<(FrameSample, RecognitionResult)> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome.result {
                Ok(result) => Some((outcome.sample, result)),
                Err(e) => {
                    if e.is_frame_local() {
                        debug!("Frame {} skipped: {}", outcome.sample.frame_index, e);
                    } else {
                        warn!("Frame {} failed: {}", outcome.sample.frame_index, e);
                    }
                    None
                }
            })
            .collect();

        let consensus = aggregate(successes, frames_processed, self.settings.min_text_len);
        if consensus.usable_frames == 0 {
            warn!("No usable frames out of {} processed", frames_processed);
            return Err(PlateError::NoUsableFrames { frames_processed });
        }

        info!(
            "Consensus '{}' ({}/{} votes, {} frames processed)",
            consensus.final_text,
            consensus.winning_votes,
            consensus.usable_frames,
            consensus.frames_processed
        );
        Ok(consensus)
    }

    /// Fan frames out to workers and collect outcomes until done or the deadline
    fn run_workers(
        &self,
        video: Arc<dyn VideoSource>,
        samples: &[FrameSample],
        config: &RectificationConfig,
        deadline: Option<Instant>,
    ) -> Vec<FrameOutcome> {
        if samples.is_empty() {
            return Vec::new();
        }

        let (job_tx, job_rx) = bounded::<FrameSample>(samples.len());
        let (result_tx, result_rx) = bounded::<FrameOutcome>(samples.len());
        for sample in samples {
            // Capacity equals the job count, so this never blocks
            let _ = job_tx.send(*sample);
        }
        drop(job_tx);

        let cancelled = Arc::new(AtomicBool::new(false));
        let workers = self.settings.workers.min(samples.len());
        debug!("Starting {} frame workers", workers);

        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancelled = cancelled.clone();
            let video = video.clone();
            let detector = self.detector.clone();
            let recognizers = self.recognizers.clone();
            let config = config.clone();

            // Detached: a worker stuck in a collaborator call must not hold up the request
            std::thread::spawn(move || {
                for sample in job_rx.iter() {
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }
                    let result = read_frame(
                        video.as_ref(),
                        detector.as_ref(),
                        &recognizers,
                        sample,
                        &config,
                        deadline,
                        &cancelled,
                    );
                    if result_tx.send(FrameOutcome { sample, result }).is_err() {
                        break;
                    }
                }
                debug!("Frame worker {} exiting", worker);
            });
        }
        drop(result_tx);

        let mut outcomes = Vec::with_capacity(samples.len());
        while outcomes.len() < samples.len() {
            let received = match deadline {
                Some(deadline) => result_rx.recv_deadline(deadline),
                None => result_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(outcome) => {
                    // Past the deadline the frame never got its recognition slot
                    if matches!(outcome.result, Err(PlateError::Cancelled)) {
                        continue;
                    }
                    outcomes.push(outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        outcomes
    }
}

/// Decode, detect, prepare and recognize one frame
fn read_frame(
    video: &dyn VideoSource,
    detector: &dyn PlateDetector,
    recognizers: &RecognizerPool,
    sample: FrameSample,
    config: &RectificationConfig,
    deadline: Option<Instant>,
    cancelled: &AtomicBool,
) -> Result<RecognitionResult> {
    let frame = video
        .decode_frame(sample.timestamp_seconds)
        .map_err(|e| PlateError::FrameDecode {
            timestamp: sample.timestamp_seconds,
            message: format!("{:#}", e),
        })?;

    let detections = detector
        .detect(&frame)
        .map_err(|e| PlateError::Recognizer(format!("detector failed: {:#}", e)))?;
    let detection = best_candidate(&detections).ok_or(PlateError::NoPlateDetected)?;

    let (_, prepared) = prepare(&frame, detection.corners, config)?;

    if cancelled.load(Ordering::Relaxed) {
        return Err(PlateError::Cancelled);
    }
    recognizers.recognize(&prepared.padded, deadline)
}
