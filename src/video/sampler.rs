//! Frame sampling
//!
//! Picks evenly spaced, de-duplicated frames from a time window.

use serde::Serialize;

use crate::error::{PlateError, Result};

/// One frame selected for processing
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameSample {
    pub frame_index: u64,
    /// Presentation time of `frame_index`
    pub timestamp_seconds: f64,
}

/// Stream properties the sampler needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub duration_seconds: f64,
    pub frames_per_second: f64,
}

impl VideoInfo {
    /// Number of decodable frames, at least one for a non-empty stream
    pub fn frame_total(&self) -> u64 {
        let frames = (self.duration_seconds * self.frames_per_second).ceil();
        if frames.is_finite() && frames >= 1.0 {
            frames as u64
        } else {
            0
        }
    }
}

/// Sample up to `frame_count` frames from `[start, end]`.
///
/// The window is clamped to the video first. Timestamps are spread evenly
/// including both ends (the midpoint when one frame is asked for), mapped
/// to the nearest frame and de-duplicated, so the result may be shorter
/// than requested. A count covering the whole window returns every frame
/// in it.
pub fn sample_frames(
    start_seconds: f64,
    end_seconds: f64,
    frame_count: usize,
    video: &VideoInfo,
) -> Result<Vec<FrameSample>> {
    if frame_count == 0 {
        return Err(PlateError::InvalidConfig(
            "frame_count must be at least 1".to_string(),
        ));
    }
    if !video.frames_per_second.is_finite() || video.frames_per_second <= 0.0 {
        return Err(PlateError::InvalidConfig(format!(
            "frame rate must be positive, got {}",
            video.frames_per_second
        )));
    }

    let duration = video.duration_seconds;
    let invalid = || PlateError::InvalidTimeRange {
        start: start_seconds,
        end: end_seconds,
        duration,
    };
    if !duration.is_finite() || duration <= 0.0 || start_seconds.is_nan() || end_seconds.is_nan() {
        return Err(invalid());
    }

    let start = start_seconds.clamp(0.0, duration);
    let end = end_seconds.clamp(0.0, duration);
    if end <= start {
        return Err(invalid());
    }

    let last_index = video.frame_total().saturating_sub(1);
    let fps = video.frames_per_second;
    let index_at = |timestamp: f64| ((timestamp * fps).round() as u64).min(last_index);

    let first_frame = index_at(start);
    let last_frame = index_at(end);
    let window_frames = last_frame - first_frame + 1;
    let to_sample = |frame_index: u64| FrameSample {
        frame_index,
        timestamp_seconds: frame_index as f64 / fps,
    };

    // Asking for at least as many frames as the window holds yields all of them
    if frame_count as u64 >= window_frames {
        return Ok((first_frame..=last_frame).map(to_sample).collect());
    }

    let timestamps: Vec<f64> = if frame_count == 1 {
        vec![(start + end) / 2.0]
    } else {
        let step = (end - start) / (frame_count - 1) as f64;
        (0..frame_count).map(|i| start + step * i as f64).collect()
    };

    let mut samples: Vec<FrameSample> = Vec::with_capacity(frame_count);
    for timestamp in timestamps {
        let frame_index = index_at(timestamp);
        // Timestamps are non-decreasing, so duplicates are adjacent
        if samples.last().map(|s| s.frame_index) == Some(frame_index) {
            continue;
        }
        samples.push(to_sample(frame_index));
    }

    Ok(samples)
}
