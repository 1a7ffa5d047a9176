//! Multi-frame consensus voting
//!
//! Reduces per-frame readings to one answer. Ranking is by vote count,
//! then by summed per-character confidence, then by earliest frame, so the
//! outcome does not depend on the order frames finished in.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use super::sampler::FrameSample;
use crate::vision::RecognitionResult;

/// Final answer of a video request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    /// Original text of the earliest frame voting for the winner
    pub final_text: String,
    /// Winning votes over usable frames, 0 when nothing voted
    pub confidence: f64,
    /// Frames that went through the pipeline, failed ones included
    pub frames_processed: usize,
    /// Votes for the winning key
    pub winning_votes: usize,
    /// Frames whose reading produced a voting key
    pub usable_frames: usize,
    /// Successful readings, ordered by frame index
    pub per_frame: Vec<(FrameSample, RecognitionResult)>,
}

/// Comparison key: trimmed, uppercased, alphanumerics only
pub fn normalize_key(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

#[derive(Debug)]
struct Tally {
    votes: usize,
    confidence_sum: f64,
    /// Position in the sorted frame list of the first contributing frame
    first: usize,
}

/// Vote over the successful frames.
///
/// Readings whose key is shorter than `min_key_len` (or empty) are kept in
/// `per_frame` but do not vote.
pub fn aggregate(
    mut frames: Vec<(FrameSample, RecognitionResult)>,
    frames_processed: usize,
    min_key_len: usize,
) -> ConsensusResult {
    frames.sort_by_key(|(sample, _)| sample.frame_index);

    let mut tallies: HashMap<String, Tally> = HashMap::new();
    let mut usable_frames = 0;

    for (position, (_, result)) in frames.iter().enumerate() {
        let key = normalize_key(&result.text);
        if key.is_empty() || key.chars().count() < min_key_len {
            continue;
        }
        usable_frames += 1;

        let tally = tallies.entry(key).or_insert(Tally {
            votes: 0,
            confidence_sum: 0.0,
            first: position,
        });
        tally.votes += 1;
        tally.confidence_sum += result.confidence_sum();
    }

    let winner = tallies.iter().max_by(|(_, a), (_, b)| rank(a, b));

    let (final_text, winning_votes) = match winner {
        Some((key, tally)) => {
            debug!(
                "Consensus winner '{}' with {}/{} votes (confidence sum {:.2}, {} candidates)",
                key,
                tally.votes,
                usable_frames,
                tally.confidence_sum,
                tallies.len()
            );
            (frames[tally.first].1.text.clone(), tally.votes)
        }
        None => (String::new(), 0),
    };

    let confidence = if usable_frames == 0 {
        0.0
    } else {
        winning_votes as f64 / usable_frames as f64
    };

    ConsensusResult {
        final_text,
        confidence,
        frames_processed,
        winning_votes,
        usable_frames,
        per_frame: frames,
    }
}

/// Greater means a better candidate
fn rank(a: &Tally, b: &Tally) -> Ordering {
    a.votes
        .cmp(&b.votes)
        .then_with(|| a.confidence_sum.total_cmp(&b.confidence_sum))
        // Earlier frame is better, so reverse
        .then_with(|| b.first.cmp(&a.first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::CharConfidence;

    fn frame(index: u64, text: &str, confidence: f32) -> (FrameSample, RecognitionResult) {
        (
            FrameSample {
                frame_index: index,
                timestamp_seconds: index as f64 / 10.0,
            },
            RecognitionResult {
                text: text.to_string(),
                per_character: text
                    .chars()
                    .map(|character| CharConfidence { character, confidence })
                    .collect(),
            },
        )
    }

    #[test]
    fn test_majority_wins() {
        let frames = vec![
            frame(0, "ABC123", 0.9),
            frame(1, "ABC123", 0.9),
            frame(2, "XYZ999", 0.9),
        ];

        let result = aggregate(frames, 3, 1);
        assert_eq!(result.final_text, "ABC123");
        assert!((result.confidence - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.winning_votes, 2);
        assert_eq!(result.usable_frames, 3);
        assert_eq!(result.frames_processed, 3);
    }

    #[test]
    fn test_tie_broken_by_confidence_sum() {
        let frames = vec![frame(0, "ABC123", 0.9), frame(1, "ABD123", 0.4)];

        let result = aggregate(frames, 2, 1);
        assert_eq!(result.final_text, "ABC123");
        assert!((result.confidence - 0.5).abs() < 1e-12);

        // Higher confidence on the later frame wins instead
        let frames = vec![frame(0, "ABC123", 0.4), frame(1, "ABD123", 0.9)];
        assert_eq!(aggregate(frames, 2, 1).final_text, "ABD123");
    }

    #[test]
    fn test_full_tie_goes_to_earliest_frame() {
        let frames = vec![frame(7, "ZZZ111", 0.5), frame(3, "AAA222", 0.5)];
        let result = aggregate(frames, 2, 1);
        assert_eq!(result.final_text, "AAA222");
    }

    #[test]
    fn test_independent_of_completion_order() {
        let frames = vec![
            frame(0, "ab-c 123", 0.7),
            frame(1, "XYZ999", 0.95),
            frame(2, "ABC123", 0.6),
            frame(3, "XYZ999", 0.3),
            frame(4, "abc123", 0.8),
        ];
        let expected = aggregate(frames.clone(), 5, 1);

        let mut reversed = frames.clone();
        reversed.reverse();
        let mut rotated = frames;
        rotated.rotate_left(2);

        assert_eq!(aggregate(reversed, 5, 1), expected);
        assert_eq!(aggregate(rotated, 5, 1), expected);
        assert_eq!(expected.final_text, "ab-c 123");
        assert_eq!(expected.winning_votes, 3);
    }

    #[test]
    fn test_final_text_keeps_original_formatting() {
        let frames = vec![frame(4, "abc 123", 0.5), frame(9, "ABC-123", 0.9)];
        let result = aggregate(frames, 2, 1);
        assert_eq!(result.final_text, "abc 123");
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_no_votes_yields_empty_result() {
        let result = aggregate(Vec::new(), 4, 1);
        assert_eq!(result.final_text, "");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.frames_processed, 4);
        assert_eq!(result.usable_frames, 0);
    }

    #[test]
    fn test_short_readings_do_not_vote() {
        let frames = vec![frame(0, "A1", 0.99), frame(1, "--", 0.99), frame(2, "KLM456", 0.2)];
        let result = aggregate(frames, 3, 3);

        assert_eq!(result.final_text, "KLM456");
        assert_eq!(result.usable_frames, 1);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.per_frame.len(), 3);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  ab-c 12.3 "), "ABC123");
        assert_eq!(normalize_key("--"), "");
    }
}
