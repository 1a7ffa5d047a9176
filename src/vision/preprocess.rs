//! OCR preprocessing
//!
//! Turns a rectified plate into a padded black/white image: luminance,
//! global threshold, optional erosion or dilation, then a white border.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};
use tracing::debug;

use crate::config::{check_output_size, MorphOp, RectificationConfig, Threshold};
use crate::error::{PlateError, Result};

/// Background level used for padding
pub const BACKGROUND: u8 = 255;

/// Output of the preprocessing stage
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Binarized and cleaned image, original size
    pub cleaned: GrayImage,
    /// `cleaned` embedded in a `padding_px` white border
    pub padded: GrayImage,
    /// Threshold level that was applied
    pub threshold: u8,
}

/// Run the full preprocessing chain
pub fn preprocess(image: &DynamicImage, config: &RectificationConfig) -> Result<Preprocessed> {
    config.validate_kernel()?;

    let gray = image.to_luma8();

    let level = match config.threshold {
        Threshold::Auto => otsu_threshold(&luminance_histogram(&gray)),
        Threshold::Fixed(level) => level,
    };
    let binary = binarize(&gray, level);

    let cleaned = apply_morphology(&binary, config.morph_op, config.kernel_size);
    let padded = pad(&cleaned, config.padding_px)?;

    debug!(
        "Preprocessed {}x{} (threshold {:?} -> {}, {:?} k={}, padding {})",
        gray.width(),
        gray.height(),
        config.threshold,
        level,
        config.morph_op,
        config.kernel_size,
        config.padding_px
    );

    Ok(Preprocessed {
        cleaned,
        padded,
        threshold: level,
    })
}

/// Pixel count per luminance level
pub fn luminance_histogram(gray: &GrayImage) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    histogram
}

/// Level maximising the between-class variance of the histogram.
///
/// Pixels `<= level` form the dark class. The lowest level wins among
/// equal variances; an empty or single-valued histogram yields 0.
pub fn otsu_threshold(histogram: &[u64; 256]) -> u8 {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }

    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut sum_dark = 0.0;
    let mut weight_dark = 0u64;
    let mut best_variance = 0.0;
    let mut best_level = 0u8;

    for (level, &count) in histogram.iter().enumerate() {
        weight_dark += count;
        if weight_dark == 0 {
            continue;
        }
        let weight_light = total - weight_dark;
        if weight_light == 0 {
            break;
        }

        sum_dark += level as f64 * count as f64;
        let mean_dark = sum_dark / weight_dark as f64;
        let mean_light = (sum_total - sum_dark) / weight_light as f64;

        let variance =
            weight_dark as f64 * weight_light as f64 * (mean_dark - mean_light).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }

    best_level
}

/// Pixels above `level` become white, the rest black
pub fn binarize(gray: &GrayImage, level: u8) -> GrayImage {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = if pixel[0] > level { 255 } else { 0 };
    }
    out
}

/// Erode or dilate white regions with a square `kernel_size` kernel
fn apply_morphology(binary: &GrayImage, op: MorphOp, kernel_size: u32) -> GrayImage {
    // LInf radius k covers a (2k+1) x (2k+1) square; validated kernels fit in a u8
    let radius = (kernel_size / 2).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return binary.clone();
    }

    match op {
        MorphOp::None => binary.clone(),
        MorphOp::Erosion => erode(binary, Norm::LInf, radius),
        MorphOp::Dilation => dilate(binary, Norm::LInf, radius),
    }
}

/// Embed the image in a uniform background border
pub fn pad(image: &GrayImage, padding: u32) -> Result<GrayImage> {
    if padding == 0 {
        return Ok(image.clone());
    }

    let grow = |length: u32| {
        padding
            .checked_mul(2)
            .and_then(|border| length.checked_add(border))
            .ok_or_else(|| {
                PlateError::InvalidConfig(format!("padding_px {} too large", padding))
            })
    };
    let (width, height) = (grow(image.width())?, grow(image.height())?);
    check_output_size(width as u64, height as u64)?;

    let mut canvas = GrayImage::from_pixel(width, height, Luma([BACKGROUND]));
    image::imageops::replace(&mut canvas, image, padding as i64, padding as i64);
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two clusters: 40..=60 and 190..=210
    fn bimodal_histogram() -> [u64; 256] {
        let mut histogram = [0u64; 256];
        for level in 40..=60 {
            histogram[level] = 100;
        }
        for level in 190..=210 {
            histogram[level] = 80;
        }
        histogram
    }

    #[test]
    fn test_otsu_splits_bimodal_histogram() {
        let level = otsu_threshold(&bimodal_histogram());
        // Any cut between the clusters separates them perfectly; the lowest wins
        assert_eq!(level, 60);
        assert!(level >= 60 && level < 190);
    }

    #[test]
    fn test_otsu_known_value() {
        // Between-class variance: t=0 -> 96, t=1 -> 112.7, t=2 -> 81
        let mut histogram = [0u64; 256];
        histogram[0] = 4;
        histogram[1] = 2;
        histogram[2] = 2;
        histogram[3] = 2;
        assert_eq!(otsu_threshold(&histogram), 1);

        // 10 at level 10, 30 at level 200, 10 at level 220
        let mut histogram = [0u64; 256];
        histogram[10] = 10;
        histogram[200] = 30;
        histogram[220] = 10;
        let level = otsu_threshold(&histogram);
        assert!((10..200).contains(&level));
        assert_eq!(level, 10);
    }

    #[test]
    fn test_otsu_degenerate_histograms() {
        assert_eq!(otsu_threshold(&[0u64; 256]), 0);

        let mut flat = [0u64; 256];
        flat[128] = 50;
        assert_eq!(otsu_threshold(&flat), 0);
    }

    #[test]
    fn test_binarize() {
        let gray = GrayImage::from_raw(4, 1, vec![0, 100, 101, 255]).unwrap();
        let binary = binarize(&gray, 100);
        assert_eq!(binary.into_raw(), vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_auto_threshold_on_image() {
        // Dark text stripe on a light plate
        let gray = GrayImage::from_fn(20, 10, |x, _| {
            if (8..12).contains(&x) { Luma([30]) } else { Luma([220]) }
        });
        let result = preprocess(
            &DynamicImage::ImageLuma8(gray),
            &RectificationConfig { padding_px: 0, ..Default::default() },
        )
        .unwrap();

        assert!(result.threshold >= 30 && result.threshold < 220);
        assert_eq!(result.cleaned.get_pixel(9, 5)[0], 0);
        assert_eq!(result.cleaned.get_pixel(2, 5)[0], 255);
    }

    #[test]
    fn test_fixed_threshold_and_color_input() {
        let rgb = image::RgbImage::from_fn(4, 1, |x, _| {
            if x < 2 { image::Rgb([20, 20, 20]) } else { image::Rgb([240, 240, 240]) }
        });
        let config = RectificationConfig {
            threshold: Threshold::Fixed(128),
            padding_px: 0,
            ..Default::default()
        };

        let result = preprocess(&DynamicImage::ImageRgb8(rgb), &config).unwrap();
        assert_eq!(result.threshold, 128);
        assert_eq!(result.cleaned.into_raw(), vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_erosion_and_dilation() {
        // Single white pixel in the middle of a black 5x5 image
        let mut binary = GrayImage::new(5, 5);
        binary.put_pixel(2, 2, Luma([255]));

        let dilated = apply_morphology(&binary, MorphOp::Dilation, 3);
        let white = dilated.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(white, 9);
        assert_eq!(dilated.get_pixel(1, 1)[0], 255);
        assert_eq!(dilated.get_pixel(0, 0)[0], 0);

        let eroded = apply_morphology(&dilated, MorphOp::Erosion, 3);
        assert_eq!(eroded.get_pixel(2, 2)[0], 255);
        assert_eq!(eroded.pixels().filter(|p| p[0] == 255).count(), 1);
    }

    #[test]
    fn test_kernel_one_is_identity() {
        let mut binary = GrayImage::new(3, 3);
        binary.put_pixel(1, 1, Luma([255]));
        assert_eq!(apply_morphology(&binary, MorphOp::Dilation, 1), binary);
    }

    #[test]
    fn test_padding_adds_white_border() {
        let image = GrayImage::new(4, 2);
        let padded = pad(&image, 3).unwrap();

        assert_eq!(padded.dimensions(), (10, 8));
        assert_eq!(padded.get_pixel(0, 0)[0], BACKGROUND);
        assert_eq!(padded.get_pixel(9, 7)[0], BACKGROUND);
        assert_eq!(padded.get_pixel(3, 3)[0], 0);
        assert_eq!(padded.get_pixel(6, 4)[0], 0);
        assert_eq!(padded.get_pixel(7, 4)[0], BACKGROUND);
    }

    #[test]
    fn test_oversized_padding_rejected() {
        let image = GrayImage::new(4, 2);
        assert!(matches!(pad(&image, u32::MAX), Err(PlateError::InvalidConfig(_))));
        // Fits in u32 but not in the pixel budget
        assert!(matches!(pad(&image, 1 << 20), Err(PlateError::InvalidConfig(_))));

        let config = RectificationConfig { padding_px: u32::MAX / 2, ..Default::default() };
        assert!(matches!(
            preprocess(&DynamicImage::ImageLuma8(image), &config),
            Err(PlateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_preprocess_returns_both_images() {
        let gray = GrayImage::from_pixel(6, 4, Luma([200]));
        let config = RectificationConfig { padding_px: 5, ..Default::default() };

        let result = preprocess(&DynamicImage::ImageLuma8(gray), &config).unwrap();
        assert_eq!(result.cleaned.dimensions(), (6, 4));
        assert_eq!(result.padded.dimensions(), (16, 14));
    }

    #[test]
    fn test_even_kernel_rejected() {
        let gray = DynamicImage::ImageLuma8(GrayImage::new(4, 4));
        let config = RectificationConfig { kernel_size: 2, ..Default::default() };
        assert!(matches!(preprocess(&gray, &config), Err(PlateError::InvalidConfig(_))));
    }
}
