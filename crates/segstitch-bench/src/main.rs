//! segstitch-bench: CLI tool for stitching experiments and diagnostics.
//!
//! Loads two overlapping label tiles (8- or 16-bit grayscale PNG or TIFF),
//! stitches tile B onto tile A, runs the configured cleanup, and cuts
//! patches around every instance of tile A. Prints per-stage diagnostics.
//! Useful for:
//!
//! - Tuning the match threshold and overlap metric
//! - Comparing propagation against exact connected components on masks
//! - Measuring per-stage durations on realistic tile sizes
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin segstitch-bench -- [OPTIONS] <TILE_A> <TILE_B>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use image::{DynamicImage, ImageBuffer, Luma};
use ndarray::{Array2, Array3};
use segstitch_labels::diagnostics::{Clock, PostprocessDiagnostics};
use segstitch_labels::pipeline::labels_as_image;
use segstitch_labels::{Connectivity, OverlapMetric, PostprocessConfig, Tile};

/// Tile stitching experimentation and diagnostics for segstitch.
///
/// Stitches two overlapping label tiles with configurable parameters and
/// prints per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "segstitch-bench", version)]
struct Cli {
    /// Reference tile (grayscale label image, 0 = background).
    tile_a: PathBuf,

    /// Tile relabelled onto the reference.
    tile_b: PathBuf,

    /// Intensity image for patch extraction. Defaults to tile A's labels.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Overlap score a tile B instance must exceed to take a tile A id.
    #[arg(long, default_value_t = PostprocessConfig::DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Erase instances without a match in either tile.
    #[arg(long)]
    strict: bool,

    /// Overlap metric.
    #[arg(long, value_enum, default_value_t = Metric::Iou)]
    metric: Metric,

    /// Treat both tiles as binary masks and label them first.
    #[arg(long)]
    binary: bool,

    /// Connected-components strategy for `--binary` tiles.
    #[arg(long, value_enum, default_value_t = Labeler::Propagation)]
    connectivity: Labeler,

    /// Propagation rounds for `--connectivity propagation`.
    #[arg(long, default_value_t = segstitch_labels::components::DEFAULT_ITERATIONS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    iterations: usize,

    /// Fill enclosed holes of every instance after stitching.
    #[arg(long)]
    fill_holes: bool,

    /// Label expansion rounds after stitching (0 disables expansion).
    #[arg(long, default_value_t = PostprocessConfig::DEFAULT_EXPAND_ITERATIONS)]
    expand_iterations: usize,

    /// Patch edge length in pixels.
    #[arg(long, default_value_t = PostprocessConfig::DEFAULT_PATCH_SIZE, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    patch_size: usize,

    /// Write stitched tile A as a 16-bit PNG.
    #[arg(long)]
    output_a: Option<PathBuf>,

    /// Write stitched tile B as a 16-bit PNG.
    #[arg(long)]
    output_b: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full post-processing config as a JSON string.
    ///
    /// When provided, all other parameter flags are ignored. Missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Log filter, e.g. `info` or `segstitch_labels=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Overlap metric selection.
#[derive(Clone, Copy, ValueEnum)]
enum Metric {
    /// Intersection over union.
    Iou,
    /// Intersection over the smaller area.
    Ioma,
}

/// Connected-components strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Labeler {
    /// Iterated 3x3 maximum of pixel seeds.
    Propagation,
    /// Single-pass union-find labelling.
    Exact,
}

/// Build a [`PostprocessConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PostprocessConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PostprocessConfig {
        threshold: cli.threshold,
        strict: cli.strict,
        metric: match cli.metric {
            Metric::Iou => OverlapMetric::Iou,
            Metric::Ioma => OverlapMetric::IntersectionOverMinimumArea,
        },
        connectivity: match cli.connectivity {
            Labeler::Propagation => Connectivity::Propagation {
                iterations: cli.iterations,
            },
            Labeler::Exact => Connectivity::Exact,
        },
        fill_holes: cli.fill_holes,
        expand_iterations: cli.expand_iterations,
        patch_size: cli.patch_size,
        ..PostprocessConfig::default()
    })
}

/// Decode a label image as a `(height, width)` map of ids.
fn load_labels(path: &Path) -> Result<Array2<u32>, String> {
    let image = image::open(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    labels_from_image(image).map_err(|msg| format!("Error decoding {}: {msg}", path.display()))
}

/// Widen the raw samples of a single-channel 8- or 16-bit image to ids.
///
/// Samples are taken as stored: an 8-bit id `5` stays `5`.
fn labels_from_image(image: DynamicImage) -> Result<Array2<u32>, String> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let ids: Vec<u32> = match image {
        DynamicImage::ImageLuma8(buffer) => buffer.into_raw().into_iter().map(u32::from).collect(),
        DynamicImage::ImageLuma16(buffer) => {
            buffer.into_raw().into_iter().map(u32::from).collect()
        }
        other => {
            return Err(format!(
                "label images must be 8- or 16-bit grayscale, got {:?}",
                other.color()
            ));
        }
    };
    Array2::from_shape_vec((height, width), ids).map_err(|e| e.to_string())
}

/// Decode an intensity image as a single-channel `(1, height, width)` array.
fn load_image(path: &Path) -> Result<Array3<f32>, String> {
    let image = image::open(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?
        .to_luma32f();
    let (width, height) = image.dimensions();
    Array3::from_shape_vec((1, height as usize, width as usize), image.into_raw())
        .map_err(|e| format!("Error reshaping {}: {e}", path.display()))
}

/// Encode a label map as a 16-bit grayscale PNG.
fn save_labels(path: &Path, labels: &Array2<u32>) -> Result<(), String> {
    let (height, width) = labels.dim();
    let raw = labels
        .iter()
        .map(|&id| u16::try_from(id).map_err(|_| format!("label {id} does not fit in 16 bits")))
        .collect::<Result<Vec<u16>, String>>()?;
    let buffer = u32::try_from(width)
        .ok()
        .zip(u32::try_from(height).ok())
        .and_then(|(w, h)| ImageBuffer::<Luma<u16>, _>::from_raw(w, h, raw))
        .ok_or_else(|| format!("tile of {height}x{width} is too large to encode"))?;
    buffer
        .save(path)
        .map_err(|e| format!("Error writing {}: {e}", path.display()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Keep the handle alive for the whole run.
    let _logger = match flexi_logger::Logger::try_with_str(&cli.log_level)
        .and_then(flexi_logger::Logger::start)
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error initializing logger: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let loaded = load_labels(&cli.tile_a).and_then(|a| Ok((a, load_labels(&cli.tile_b)?)));
    let (tile_a, tile_b) = match loaded {
        Ok(tiles) => tiles,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let image = match cli.image {
        Some(ref path) => match load_image(path) {
            Ok(image) => image,
            Err(msg) => {
                eprintln!("{msg}");
                return ExitCode::FAILURE;
            }
        },
        None => labels_as_image(tile_a.view()),
    };
    let (mask_a, mask_b) = (tile_a.map(|&v| v > 0), tile_b.map(|&v| v > 0));

    log::info!(
        "tiles {} and {}: {:?}",
        cli.tile_a.display(),
        cli.tile_b.display(),
        tile_a.dim()
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let (a, b) = if cli.binary {
            (Tile::Mask(mask_a.view()), Tile::Mask(mask_b.view()))
        } else {
            (Tile::Labels(tile_a.view()), Tile::Labels(tile_b.view()))
        };
        let result = match segstitch_labels::postprocess_with_clock(
            a,
            b,
            image.view(),
            &config,
            &StdClock,
        ) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("Post-processing error: {e}");
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&result.diagnostics) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", result.diagnostics.report());
        }

        // Write label images on the first run only.
        if run == 0 {
            let outputs = [
                (cli.output_a.as_deref(), &result.tile_a),
                (cli.output_b.as_deref(), &result.tile_b),
            ];
            for (path, labels) in outputs {
                let Some(path) = path else { continue };
                match save_labels(path, labels) {
                    Ok(()) => eprintln!("Labels written to {}", path.display()),
                    Err(msg) => eprintln!("{msg}"),
                }
            }
        }

        all_diagnostics.push(result.diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PostprocessDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PostprocessDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<16} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(32));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Components", |d| d.components.as_ref().map(|s| s.duration)),
        ("Stitch", |d| Some(d.stitch.duration)),
        ("Fill Holes", |d| d.fill_holes.as_ref().map(|s| s.duration)),
        ("Expand", |d| d.expand.as_ref().map(|s| s.duration)),
        ("Patches", |d| Some(d.patches.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<16} {stage_mean:>10.3}ms");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Rgb, RgbImage};

    use super::*;

    #[test]
    fn eight_bit_ids_are_not_rescaled() {
        let mut gray = GrayImage::new(3, 2);
        gray.put_pixel(2, 1, Luma([5]));
        gray.put_pixel(0, 0, Luma([255]));
        let labels = labels_from_image(DynamicImage::ImageLuma8(gray)).unwrap();
        assert_eq!(labels.dim(), (2, 3));
        assert_eq!(labels[[1, 2]], 5);
        assert_eq!(labels[[0, 0]], 255);
        assert_eq!(labels[[0, 1]], 0);
    }

    #[test]
    fn sixteen_bit_ids_are_kept() {
        let mut gray = ImageBuffer::<Luma<u16>, Vec<u16>>::new(2, 2);
        gray.put_pixel(1, 0, Luma([1285]));
        let labels = labels_from_image(DynamicImage::ImageLuma16(gray)).unwrap();
        assert_eq!(labels[[0, 1]], 1285);
    }

    #[test]
    fn colour_label_image_is_rejected() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        assert!(labels_from_image(DynamicImage::ImageRgb8(rgb)).is_err());
    }
}
