//! Perspective rectification
//!
//! Maps the plate quadrilateral onto an axis-aligned rectangle, then
//! optionally rotates the result about its centre.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::debug;

use crate::config::{check_output_size, RectificationConfig};
use crate::error::{PlateError, Result};
use crate::geometry::Quadrilateral;

/// Output size in pixels for a quadrilateral under a configuration
pub fn target_dimensions(quad: &Quadrilateral, config: &RectificationConfig) -> (u32, u32) {
    let (width, height) = match config.forced_aspect_ratio {
        Some(ratio) => (config.reference_height * ratio, config.reference_height),
        None => (quad.mean_width(), quad.mean_height()),
    };

    (
        scaled_length(width, config.output_scale),
        scaled_length(height, config.output_scale),
    )
}

fn scaled_length(length: f64, scale: f64) -> u32 {
    (length * scale).round().clamp(1.0, u32::MAX as f64) as u32
}

/// Warp the quadrilateral region of `image` into a flat rectangle.
///
/// Samples falling outside the source are filled with black. Grayscale
/// sources stay grayscale; everything else is resampled as RGB.
pub fn rectify(
    image: &DynamicImage,
    quad: &Quadrilateral,
    config: &RectificationConfig,
) -> Result<DynamicImage> {
    config.validate()?;

    let (width, height) = target_dimensions(quad, config);
    check_output_size(width as u64, height as u64)?;
    let (w, h) = (width as f32, height as f32);

    let source = quad.corners().map(|p| (p.x as f32, p.y as f32));
    let target = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let projection = Projection::from_control_points(source, target).ok_or_else(|| {
        PlateError::DegenerateGeometry("no projective transform maps the corners".to_string())
    })?;

    debug!(
        "Rectifying {}x{} source region into {}x{}",
        image.width(),
        image.height(),
        width,
        height
    );

    let warped = warp_image(image, &projection, width, height);

    if config.rotation_degrees == 0.0 {
        return Ok(warped);
    }
    rotate_expanded(&warped, config.rotation_degrees)
}

/// Rotate counter-clockwise about the centre, growing the canvas to the
/// bounding box of the rotated rectangle so no content is clipped.
pub fn rotate_expanded(image: &DynamicImage, degrees: f64) -> Result<DynamicImage> {
    let (width, height) = (image.width() as f64, image.height() as f64);
    let theta = degrees.to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());

    // Trim float noise so 0/90 degree cases do not gain a pixel
    let new_width = ((width * cos + height * sin) - 1e-6).ceil().max(1.0);
    let new_height = ((width * sin + height * cos) - 1e-6).ceil().max(1.0);
    check_output_size(new_width as u64, new_height as u64)?;
    let (new_width, new_height) = (new_width as u32, new_height as u32);

    // Image y points down, so a negative angle turns the content counter-clockwise on screen
    let projection = Projection::translate(new_width as f32 / 2.0, new_height as f32 / 2.0)
        * Projection::rotate(-theta as f32)
        * Projection::translate(-(width as f32) / 2.0, -(height as f32) / 2.0);

    debug!(
        "Rotating {}x{} by {} degrees into {}x{}",
        image.width(),
        image.height(),
        degrees,
        new_width,
        new_height
    );

    Ok(warp_image(image, &projection, new_width, new_height))
}

fn warp_image(
    image: &DynamicImage,
    projection: &Projection,
    width: u32,
    height: u32,
) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(gray) => {
            let mut out = GrayImage::new(width, height);
            warp_into(gray, projection, Interpolation::Bilinear, Luma([0]), &mut out);
            DynamicImage::ImageLuma8(out)
        }
        other => {
            let rgb = other.to_rgb8();
            let mut out = RgbImage::new(width, height);
            warp_into(&rgb, projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
            DynamicImage::ImageRgb8(out)
        }
    }
}
