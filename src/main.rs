//! PlateLens - License plate rectification and reading
//!
//! Command line front end for the rectification and preprocessing stages
//! and the video frame sampler.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use platelens::config::{self, AppConfig};
use platelens::geometry::Quadrilateral;
use platelens::video::{sample_frames, VideoInfo};
use platelens::vision::{preprocess, rectify};
use platelens::{MorphOp, Point2D, RectificationConfig, Threshold};

/// PlateLens - License plate rectification and reading
#[derive(Parser, Debug)]
#[command(name = "platelens")]
#[command(about = "Rectify, clean up and read license plates")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Warp the plate delimited by four corners to a flat image
    Rectify {
        /// Source image
        input: PathBuf,

        /// Corner as `x,y`; give exactly four, in any order
        #[arg(
            short,
            long = "point",
            value_parser = parse_point,
            num_args = 1,
            required = true,
            allow_hyphen_values = true
        )]
        points: Vec<Point2D>,

        /// Rectified image
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the binarized, padded image
        #[arg(long)]
        prepared: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Binarize, clean and pad an already rectified plate
    Preprocess {
        /// Source image
        input: PathBuf,

        /// Prepared image
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the frames a video request would sample, as JSON
    SampleFrames {
        /// Window start in seconds
        #[arg(long, default_value = "0")]
        start: f64,

        /// Window end in seconds
        #[arg(long)]
        end: f64,

        /// Video duration in seconds
        #[arg(long)]
        duration: f64,

        /// Video frame rate
        #[arg(long)]
        fps: f64,

        /// Frames to sample (config value when omitted)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Per-run overrides of `[rectification]`
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Output width / height
    #[arg(long)]
    aspect: Option<f64>,

    /// Output upscale factor
    #[arg(long)]
    scale: Option<f64>,

    /// Rotation in degrees, counter-clockwise
    #[arg(long, allow_hyphen_values = true)]
    rotate: Option<f64>,

    /// `auto` or a level 0-255
    #[arg(long, value_parser = parse_threshold)]
    threshold: Option<Threshold>,

    /// `none`, `erosion` or `dilation`
    #[arg(long, value_parser = parse_morph)]
    morph: Option<MorphOp>,

    /// Morphology kernel size, odd
    #[arg(long)]
    kernel: Option<u32>,

    /// White border in pixels
    #[arg(long)]
    padding: Option<u32>,
}

impl Overrides {
    fn apply(&self, config: &mut RectificationConfig) {
        if let Some(aspect) = self.aspect {
            config.forced_aspect_ratio = Some(aspect);
        }
        if let Some(scale) = self.scale {
            config.output_scale = scale;
        }
        if let Some(rotate) = self.rotate {
            config.rotation_degrees = rotate;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(morph) = self.morph {
            config.morph_op = morph;
        }
        if let Some(kernel) = self.kernel {
            config.kernel_size = kernel;
        }
        if let Some(padding) = self.padding {
            config.padding_px = padding;
        }
    }
}

fn parse_point(value: &str) -> Result<Point2D, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{}`", value))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x in `{}`: {}", value, e))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y in `{}`: {}", value, e))?;
    Ok(Point2D::new(x, y))
}

fn parse_threshold(value: &str) -> Result<Threshold, String> {
    if value.eq_ignore_ascii_case("auto") {
        return Ok(Threshold::Auto);
    }
    value
        .parse::<u8>()
        .map(Threshold::Fixed)
        .map_err(|_| format!("expected `auto` or 0-255, got `{}`", value))
}

fn parse_morph(value: &str) -> Result<MorphOp, String> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Ok(MorphOp::None),
        "erosion" | "erode" => Ok(MorphOp::Erosion),
        "dilation" | "dilate" => Ok(MorphOp::Dilation),
        _ => Err(format!("expected none, erosion or dilation, got `{}`", value)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };

    match cli.command {
        Command::Rectify {
            input,
            points,
            output,
            prepared,
            overrides,
        } => {
            let config = rectification_config(&config_path, &overrides)?;
            run_rectify(&input, &points, &output, prepared.as_deref(), &config)
        }
        Command::Preprocess {
            input,
            output,
            overrides,
        } => {
            let config = rectification_config(&config_path, &overrides)?;
            run_preprocess(&input, &output, &config)
        }
        Command::SampleFrames {
            start,
            end,
            duration,
            fps,
            count,
        } => {
            let app_config = load_app_config(&config_path)?;
            let frame_count = count.unwrap_or(app_config.video.frame_count);
            let video = VideoInfo {
                duration_seconds: duration,
                frames_per_second: fps,
            };
            let samples = sample_frames(start, end, frame_count, &video)?;
            println!("{}", serde_json::to_string_pretty(&samples)?);
            Ok(())
        }
        Command::InitConfig { force } => {
            if config_path.exists() && !force {
                bail!("{:?} already exists (use --force to overwrite)", config_path);
            }
            config::save_config(&AppConfig::default(), &config_path)?;
            info!("Wrote default configuration to {:?}", config_path);
            Ok(())
        }
    }
}

fn load_app_config(path: &Path) -> Result<AppConfig> {
    let config = config::load_or_default(path)?;
    if path.exists() {
        info!("Loaded configuration from {:?}", path);
    } else {
        info!("Using default configuration");
    }
    Ok(config)
}

/// File values with command line overrides on top
fn rectification_config(path: &Path, overrides: &Overrides) -> Result<RectificationConfig> {
    let mut config = load_app_config(path)?.rectification;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run_rectify(
    input: &Path,
    points: &[Point2D],
    output: &Path,
    prepared: Option<&Path>,
    config: &RectificationConfig,
) -> Result<()> {
    let corners: [Point2D; 4] = points
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 4 corner points, got {}", points.len()))?;
    let quad = Quadrilateral::from_points(corners)?;

    let image = image::open(input).with_context(|| format!("Failed to open {:?}", input))?;
    let rectified = rectify(&image, &quad, config)?;
    rectified
        .save(output)
        .with_context(|| format!("Failed to write {:?}", output))?;
    info!(
        "Rectified plate {}x{} written to {:?}",
        rectified.width(),
        rectified.height(),
        output
    );

    if let Some(path) = prepared {
        let result = preprocess(&rectified, config)?;
        result
            .padded
            .save(path)
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("Prepared image (threshold {}) written to {:?}", result.threshold, path);
    }

    Ok(())
}

fn run_preprocess(input: &Path, output: &Path, config: &RectificationConfig) -> Result<()> {
    let image = image::open(input).with_context(|| format!("Failed to open {:?}", input))?;
    let result = preprocess(&image, config)?;
    result
        .padded
        .save(output)
        .with_context(|| format!("Failed to write {:?}", output))?;
    info!(
        "Prepared image {}x{} (threshold {}) written to {:?}",
        result.padded.width(),
        result.padded.height(),
        result.threshold,
        output
    );
    Ok(())
}
