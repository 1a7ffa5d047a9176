//! OCR (Optical Character Recognition) adapter
//!
//! Wraps an external text recognizer behind a fixed-size pool and normalizes
//! whatever it returns into a [`RecognitionResult`].

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::GrayImage;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

use crate::error::{PlateError, Result};

/// One recognized character with its confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CharConfidence {
    pub character: char,
    /// Confidence in [0, 1]
    pub confidence: f32,
}

/// Text read from one prepared image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    pub per_character: Vec<CharConfidence>,
}

impl RecognitionResult {
    /// Sum of per-character confidences
    pub fn confidence_sum(&self) -> f64 {
        self.per_character.iter().map(|c| c.confidence as f64).sum()
    }

    /// Mean per-character confidence, 0 when empty
    pub fn mean_confidence(&self) -> f64 {
        if self.per_character.is_empty() {
            return 0.0;
        }
        self.confidence_sum() / self.per_character.len() as f64
    }
}

/// External text recognition engine
///
/// Implementations may hold a loaded model and need not be reentrant;
/// callers reach them only through a [`RecognizerPool`].
pub trait TextRecognizer: Send {
    /// Read characters from a prepared image, in reading order
    fn recognize(&mut self, image: &GrayImage) -> anyhow::Result<Vec<CharConfidence>>;
}

/// One text line from a line-level engine
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub confidence: f32,
}

/// Engine that reports whole lines with one confidence each
pub trait LineEngine: Send {
    fn read_lines(&mut self, image: &GrayImage) -> anyhow::Result<Vec<TextLine>>;
}

/// Adapts a [`LineEngine`] to [`TextRecognizer`].
///
/// Lines with non-positive confidence are dropped, the rest are joined with
/// a single space and every character inherits its line's confidence.
pub struct LineRecognizer<E> {
    engine: E,
}

impl<E: LineEngine> LineRecognizer<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }
}

impl<E: LineEngine> TextRecognizer for LineRecognizer<E> {
    fn recognize(&mut self, image: &GrayImage) -> anyhow::Result<Vec<CharConfidence>> {
        let lines = self.engine.read_lines(image)?;

        let mut chars = Vec::new();
        for line in lines.iter().filter(|l| l.confidence > 0.0) {
            let text = line.text.trim();
            if text.is_empty() {
                continue;
            }
            if !chars.is_empty() {
                chars.push(CharConfidence {
                    character: ' ',
                    confidence: line.confidence,
                });
            }
            chars.extend(text.chars().map(|character| CharConfidence {
                character,
                confidence: line.confidence,
            }));
        }

        Ok(chars)
    }
}

/// Fixed set of recognizer instances shared by concurrent callers
pub struct RecognizerPool {
    slots: Vec<Mutex<Box<dyn TextRecognizer>>>,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
}

impl RecognizerPool {
    /// Build a pool; fails on an empty instance list
    pub fn new(recognizers: Vec<Box<dyn TextRecognizer>>) -> Result<Self> {
        if recognizers.is_empty() {
            return Err(PlateError::InvalidConfig(
                "recognizer pool needs at least one instance".to_string(),
            ));
        }

        let (free_tx, free_rx) = bounded(recognizers.len());
        for index in 0..recognizers.len() {
            // Capacity equals the slot count, so this never blocks
            let _ = free_tx.send(index);
        }

        Ok(Self {
            slots: recognizers.into_iter().map(Mutex::new).collect(),
            free_tx,
            free_rx,
        })
    }

    /// Build `count` instances with `factory`, typically `VideoSettings::recognizers`
    pub fn from_factory<F>(count: usize, mut factory: F) -> Result<Self>
    where
        F: FnMut() -> anyhow::Result<Box<dyn TextRecognizer>>,
    {
        let recognizers = (0..count)
            .map(|_| {
                factory().map_err(|e| PlateError::Recognizer(format!("failed to load: {:#}", e)))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Loaded {} recognizer instances", recognizers.len());
        Self::new(recognizers)
    }

    /// Pool with a single instance
    pub fn single(recognizer: Box<dyn TextRecognizer>) -> Self {
        let (free_tx, free_rx) = bounded(1);
        let _ = free_tx.send(0);
        Self {
            slots: vec![Mutex::new(recognizer)],
            free_tx,
            free_rx,
        }
    }

    /// Number of instances
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Wait for a free instance, up to `deadline` when given
    pub fn checkout(&self, deadline: Option<Instant>) -> Result<PooledRecognizer<'_>> {
        let index = match deadline {
            Some(deadline) => self.free_rx.recv_deadline(deadline).map_err(|e| match e {
                RecvTimeoutError::Timeout => PlateError::Cancelled,
                RecvTimeoutError::Disconnected => {
                    PlateError::Recognizer("recognizer pool closed".to_string())
                }
            })?,
            None => self
                .free_rx
                .recv()
                .map_err(|_| PlateError::Recognizer("recognizer pool closed".to_string()))?,
        };

        Ok(PooledRecognizer {
            guard: Some(self.slots[index].lock()),
            index,
            release: &self.free_tx,
        })
    }

    /// Check out an instance and run one recognition on it
    pub fn recognize(&self, image: &GrayImage, deadline: Option<Instant>) -> Result<RecognitionResult> {
        let mut recognizer = self.checkout(deadline)?;
        recognizer.recognize(image)
    }
}

/// Exclusive use of one pooled instance; returned to the pool on drop
pub struct PooledRecognizer<'a> {
    guard: Option<MutexGuard<'a, Box<dyn TextRecognizer>>>,
    index: usize,
    release: &'a Sender<usize>,
}

impl PooledRecognizer<'_> {
    /// Run the recognizer and normalize its output
    pub fn recognize(&mut self, image: &GrayImage) -> Result<RecognitionResult> {
        let recognizer = self
            .guard
            .as_mut()
            .ok_or_else(|| PlateError::Recognizer("recognizer already released".to_string()))?;

        let start = Instant::now();
        let chars = recognizer
            .recognize(image)
            .map_err(|e| PlateError::Recognizer(format!("{:#}", e)))?;
        debug!(
            "Recognizer {} returned {} characters in {:?}",
            self.index,
            chars.len(),
            start.elapsed()
        );

        normalize_output(chars)
    }
}

impl Drop for PooledRecognizer<'_> {
    fn drop(&mut self) {
        // Unlock before the slot becomes visible to other callers
        self.guard.take();
        let _ = self.release.send(self.index);
    }
}

/// Clamp confidences and build the result; no characters is `EmptyRecognition`
pub fn normalize_output(chars: Vec<CharConfidence>) -> Result<RecognitionResult> {
    let per_character: Vec<CharConfidence> = chars
        .into_iter()
        .map(|c| CharConfidence {
            character: c.character,
            confidence: if c.confidence.is_finite() {
                c.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
        })
        .collect();

    if per_character.iter().all(|c| c.character.is_whitespace()) {
        return Err(PlateError::EmptyRecognition);
    }

    let text = per_character.iter().map(|c| c.character).collect();
    Ok(RecognitionResult {
        text,
        per_character,
    })
}
