//! End-to-end post-processing of two overlapping tiles.
//!
//! ```text
//! [components] -> stitch -> [fill holes] -> [expand] -> patches
//! ```
//!
//! Bracketed stages are conditional: components only runs for
//! binary-mask tiles, hole filling and expansion only when enabled in
//! [`PostprocessConfig`].

use ndarray::{Array3, ArrayView2, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::components::{ComponentLabeler, Connectivity};
use crate::diagnostics::{
    Clock, PostprocessDiagnostics, PostprocessSummary, StageDiagnostics, StageMetrics, WebClock,
};
use crate::morphology::{expand_labels, fill_label_holes};
use crate::overlap::OverlapMetric;
use crate::patches::extract_patches;
use crate::remap::unique_ids;
use crate::stitch::{MatchedPair, StitchMode, stitch_tiles};
use crate::target::TargetSegmentation;
use crate::types::{Convergence, LabelError, LabelMap, PatchBatch, ensure_same_shape};

/// Tunables for [`postprocess`].
///
/// Missing fields take their defaults when deserialized, so a partial
/// JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessConfig {
    /// Overlap score a B instance must strictly exceed to take an A id.
    pub threshold: f32,

    /// Erase instances without a match in either tile.
    pub strict: bool,

    /// Overlap score used for matching.
    pub metric: OverlapMetric,

    /// Labelling strategy for binary-mask tiles.
    pub connectivity: Connectivity,

    /// Fill enclosed holes of every instance after stitching.
    pub fill_holes: bool,

    /// Label expansion rounds after stitching. `0` disables expansion.
    pub expand_iterations: usize,

    /// Edge length of extracted patches in pixels.
    pub patch_size: usize,

    /// Which planes of a `[nuclei, cells]` stack to process in
    /// [`postprocess_stack`].
    pub target: TargetSegmentation,
}

impl PostprocessConfig {
    /// Default match threshold.
    pub const DEFAULT_THRESHOLD: f32 = crate::stitch::DEFAULT_THRESHOLD;
    /// Default label expansion rounds.
    pub const DEFAULT_EXPAND_ITERATIONS: usize = crate::morphology::DEFAULT_EXPAND_ITERATIONS;
    /// Default patch edge length.
    pub const DEFAULT_PATCH_SIZE: usize = crate::patches::DEFAULT_PATCH_SIZE;

    /// Stitch mode implied by [`strict`](Self::strict).
    #[must_use]
    pub const fn stitch_mode(&self) -> StitchMode {
        if self.strict {
            StitchMode::Strict
        } else {
            StitchMode::Lenient
        }
    }

    /// Check every field is in range.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::InvalidConfig`] describing the first field
    /// out of range.
    pub fn validate(&self) -> Result<(), LabelError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(LabelError::InvalidConfig(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.patch_size == 0 {
            return Err(LabelError::InvalidConfig(
                "patch_size must be positive".to_owned(),
            ));
        }
        if let Connectivity::Propagation { iterations: 0 } = self.connectivity {
            return Err(LabelError::InvalidConfig(
                "propagation connectivity needs at least one round".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            strict: false,
            metric: OverlapMetric::default(),
            connectivity: Connectivity::default(),
            fill_holes: false,
            expand_iterations: Self::DEFAULT_EXPAND_ITERATIONS,
            patch_size: Self::DEFAULT_PATCH_SIZE,
            target: TargetSegmentation::default(),
        }
    }
}

/// One tile as handed to [`postprocess`].
#[derive(Debug, Clone, Copy)]
pub enum Tile<'a> {
    /// An instance label map.
    Labels(ArrayView2<'a, u32>),
    /// A binary foreground mask, labelled with the configured
    /// connectivity before stitching.
    Mask(ArrayView2<'a, bool>),
}

impl Tile<'_> {
    fn shape(&self) -> &[usize] {
        match self {
            Self::Labels(labels) => labels.shape(),
            Self::Mask(mask) => mask.shape(),
        }
    }
}

impl<'a> From<ArrayView2<'a, u32>> for Tile<'a> {
    fn from(labels: ArrayView2<'a, u32>) -> Self {
        Self::Labels(labels)
    }
}

impl<'a> From<ArrayView2<'a, bool>> for Tile<'a> {
    fn from(mask: ArrayView2<'a, bool>) -> Self {
        Self::Mask(mask)
    }
}

/// Output of [`postprocess`].
#[derive(Debug, Clone)]
pub struct PostprocessResult {
    /// Tile A after stitching and cleanup.
    pub tile_a: LabelMap,
    /// Tile B after stitching and cleanup.
    pub tile_b: LabelMap,
    /// Matches applied while stitching.
    pub pairs: Vec<MatchedPair>,
    /// Patches of every tile A instance.
    pub patches: PatchBatch,
    /// Per-stage timing and counts.
    pub diagnostics: PostprocessDiagnostics,
}

fn instance_count(labels: &LabelMap) -> usize {
    unique_ids(labels.iter().copied()).len()
}

/// Pixels that were background in `before` and are labelled in `after`.
fn claimed_pixels(before: &LabelMap, after: &LabelMap) -> u64 {
    Zip::from(before)
        .and(after)
        .fold(0u64, |n, &b, &a| n + u64::from(b == 0 && a > 0))
}

/// Stitch, clean, and cut patches from two overlapping tiles.
///
/// `image` is the channel-first intensity array over tile A's grid.
///
/// # Errors
///
/// Returns [`LabelError::InvalidConfig`] for an out-of-range
/// configuration, [`LabelError::ShapeMismatch`] if the tiles or the image
/// grid disagree, and [`LabelError::PatchTooLarge`] if the patch size
/// exceeds the tile.
pub fn postprocess(
    tile_a: Tile<'_>,
    tile_b: Tile<'_>,
    image: ArrayView3<'_, f32>,
    config: &PostprocessConfig,
) -> Result<PostprocessResult, LabelError> {
    postprocess_with_clock(tile_a, tile_b, image, config, &WebClock)
}

/// [`postprocess`] with an explicit timestamp source.
///
/// # Errors
///
/// Same as [`postprocess`].
pub fn postprocess_with_clock<C: Clock>(
    tile_a: Tile<'_>,
    tile_b: Tile<'_>,
    image: ArrayView3<'_, f32>,
    config: &PostprocessConfig,
    clock: &C,
) -> Result<PostprocessResult, LabelError> {
    config.validate()?;
    ensure_same_shape(tile_a.shape(), tile_b.shape())?;
    let total_start = clock.now();

    // Components (mask tiles only).
    let start = clock.now();
    let mut labelled = Vec::new();
    let mut convergence = Convergence {
        iterations: 0,
        converged: true,
    };
    let mut label_tile = |tile: Tile<'_>| -> Result<LabelMap, LabelError> {
        match tile {
            Tile::Labels(labels) => Ok(labels.to_owned()),
            Tile::Mask(mask) => {
                let components = config.connectivity.label(mask)?;
                convergence.iterations = convergence
                    .iterations
                    .max(components.convergence.iterations);
                convergence.converged &= components.convergence.converged;
                labelled.push(instance_count(&components.labels));
                Ok(components.labels)
            }
        }
    };
    let raw_a = label_tile(tile_a)?;
    let raw_b = label_tile(tile_b)?;
    let components = (!labelled.is_empty()).then(|| StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Components {
            connectivity: config.connectivity.to_string(),
            instance_count: labelled.iter().sum(),
            iterations: convergence.iterations,
            converged: convergence.converged,
        },
    });

    // Stitch.
    let start = clock.now();
    let instances_a = instance_count(&raw_a);
    let instances_b = instance_count(&raw_b);
    let stitched = stitch_tiles(
        raw_a.view(),
        raw_b.view(),
        config.threshold,
        config.stitch_mode(),
        config.metric,
    )?;
    let stitch = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Stitch {
            metric: config.metric.to_string(),
            threshold: config.threshold,
            strict: config.strict,
            instances_a,
            instances_b,
            matched_pairs: stitched.pairs.len(),
        },
    };
    let (mut out_a, mut out_b) = (stitched.tile_a, stitched.tile_b);

    // Fill holes.
    let fill_holes = if config.fill_holes {
        let start = clock.now();
        let filled_a = fill_label_holes(out_a.view())?;
        let filled_b = fill_label_holes(out_b.view())?;
        let filled_pixels = claimed_pixels(&out_a, &filled_a) + claimed_pixels(&out_b, &filled_b);
        out_a = filled_a;
        out_b = filled_b;
        Some(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::FillHoles { filled_pixels },
        })
    } else {
        None
    };

    // Expand.
    let expand = if config.expand_iterations > 0 {
        let start = clock.now();
        let grown_a = expand_labels(out_a.view(), config.expand_iterations);
        let grown_b = expand_labels(out_b.view(), config.expand_iterations);
        let grown_pixels = claimed_pixels(&out_a, &grown_a) + claimed_pixels(&out_b, &grown_b);
        out_a = grown_a;
        out_b = grown_b;
        Some(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Expand {
                iterations: config.expand_iterations,
                grown_pixels,
            },
        })
    } else {
        None
    };

    // Patches.
    let start = clock.now();
    let batch = extract_patches(out_a.view(), image, config.patch_size)?;
    let patches = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Patches {
            patch_size: config.patch_size,
            channels: image.len_of(Axis(0)),
            patch_count: batch.len(),
        },
    };

    let (height, width) = out_a.dim();
    let summary = PostprocessSummary {
        height,
        width,
        instances_a: instance_count(&out_a),
        instances_b: instance_count(&out_b),
        matched_pairs: stitched.pairs.len(),
        patch_count: batch.len(),
    };
    log::debug!(
        "postprocess: {} matches, {} patches",
        summary.matched_pairs,
        summary.patch_count
    );

    Ok(PostprocessResult {
        tile_a: out_a,
        tile_b: out_b,
        pairs: stitched.pairs,
        patches: batch,
        diagnostics: PostprocessDiagnostics {
            components,
            stitch,
            fill_holes,
            expand,
            patches,
            total_duration: clock.elapsed(&total_start),
            summary,
        },
    })
}

/// Run [`postprocess`] on each plane of two `[nuclei, cells]` label stacks
/// selected by `config.target`.
///
/// # Errors
///
/// Returns [`LabelError::Shape`] if either stack is not two planes, and
/// any error of [`postprocess`].
pub fn postprocess_stack(
    stack_a: ArrayView3<'_, u32>,
    stack_b: ArrayView3<'_, u32>,
    image: ArrayView3<'_, f32>,
    config: &PostprocessConfig,
) -> Result<Vec<PostprocessResult>, LabelError> {
    let planes_a = config.target.select(stack_a)?;
    let planes_b = config.target.select(stack_b)?;
    planes_a
        .axis_iter(Axis(0))
        .zip(planes_b.axis_iter(Axis(0)))
        .map(|(a, b)| postprocess(Tile::Labels(a), Tile::Labels(b), image, config))
        .collect()
}

/// Channel-first single-channel image from a label map, for callers with
/// no intensity data.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn labels_as_image(labels: ArrayView2<'_, u32>) -> Array3<f32> {
    labels.map(|&v| v as f32).insert_axis(Axis(0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::{Array2, s};

    use super::*;

    fn tiles() -> (LabelMap, LabelMap) {
        let mut a = Array2::<u32>::zeros((16, 16));
        a.slice_mut(s![2..8, 2..8]).fill(4);
        a.slice_mut(s![10..14, 10..14]).fill(9);
        let mut b = Array2::<u32>::zeros((16, 16));
        b.slice_mut(s![2..8, 3..9]).fill(21);
        b.slice_mut(s![0..2, 12..16]).fill(30);
        (a, b)
    }

    #[test]
    fn default_config_is_valid() {
        let config = PostprocessConfig::default();
        config.validate().unwrap();
        assert_eq!(config.patch_size, 64);
        assert_eq!(config.expand_iterations, 5);
        assert!((config.threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn out_of_range_config_is_rejected() {
        let config = PostprocessConfig {
            threshold: 1.5,
            ..PostprocessConfig::default()
        };
        assert!(matches!(config.validate(), Err(LabelError::InvalidConfig(_))));
        let config = PostprocessConfig {
            connectivity: Connectivity::Propagation { iterations: 0 },
            ..PostprocessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_config_fills_defaults() {
        let config: PostprocessConfig =
            serde_json::from_str(r#"{"threshold": 0.7, "strict": true}"#).unwrap();
        assert!((config.threshold - 0.7).abs() < f32::EPSILON);
        assert!(config.strict);
        assert_eq!(config.patch_size, PostprocessConfig::DEFAULT_PATCH_SIZE);

        let json = serde_json::to_string(&config).unwrap();
        let back: PostprocessConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn full_flow_stitches_and_extracts() {
        let (a, b) = tiles();
        let image = labels_as_image(a.view());
        let config = PostprocessConfig {
            patch_size: 4,
            expand_iterations: 0,
            ..PostprocessConfig::default()
        };
        let result = postprocess(a.view().into(), b.view().into(), image.view(), &config).unwrap();
        // 6x6 vs 6x6 shifted by one column: IoU 30/42.
        assert_eq!(result.pairs.len(), 1);
        assert_eq!(result.tile_b[[3, 5]], 4);
        assert_eq!(result.tile_b[[0, 12]], 30);
        assert_eq!(result.patches.ids, vec![4, 9]);
        assert!(result.diagnostics.components.is_none());
        assert!(result.diagnostics.expand.is_none());
        assert_eq!(result.diagnostics.summary.patch_count, 2);
    }

    #[test]
    fn mask_tiles_are_labelled_first() {
        let (a, b) = tiles();
        let mask_a = a.map(|&v| v > 0);
        let image = Array3::<f32>::zeros((1, 16, 16));
        let config = PostprocessConfig {
            patch_size: 4,
            ..PostprocessConfig::default()
        };
        let result =
            postprocess(mask_a.view().into(), b.view().into(), image.view(), &config).unwrap();
        let components = result.diagnostics.components.unwrap();
        assert!(matches!(
            components.metrics,
            StageMetrics::Components {
                instance_count: 2,
                converged: true,
                ..
            }
        ));
        assert_eq!(result.patches.len(), 2);
    }

    #[test]
    fn mismatched_tiles_are_rejected() {
        let a = Array2::<u32>::zeros((4, 4));
        let b = Array2::<u32>::zeros((4, 5));
        let image = Array3::<f32>::zeros((1, 4, 4));
        let err = postprocess(
            a.view().into(),
            b.view().into(),
            image.view(),
            &PostprocessConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LabelError::ShapeMismatch { .. }));
    }

    #[test]
    fn stack_runs_each_selected_plane() {
        let (a, b) = tiles();
        let stack_a = ndarray::stack(Axis(0), &[a.view(), a.view()]).unwrap();
        let stack_b = ndarray::stack(Axis(0), &[b.view(), b.view()]).unwrap();
        let image = labels_as_image(a.view());
        let config = PostprocessConfig {
            patch_size: 4,
            target: TargetSegmentation::NucleiAndCells,
            ..PostprocessConfig::default()
        };
        let results =
            postprocess_stack(stack_a.view(), stack_b.view(), image.view(), &config).unwrap();
        assert_eq!(results.len(), 2);
    }
}
