//! Post-processing diagnostics: timing, counts, and convergence for each
//! stage.
//!
//! Every call to [`postprocess`](crate::postprocess) collects diagnostics
//! alongside its results. They are meant for threshold tuning and for
//! spotting inputs where an iterative operator ran out of rounds.
//!
//! Durations use [`std::time::Duration`]. Timestamps come from a [`Clock`];
//! the default [`WebClock`] uses the `web-time` crate, which maps to
//! `performance.now()` on WASM and `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) because
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// Current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by `web_time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single post-processing run.
///
/// Stages that are conditionally skipped have `Option` fields that are
/// `None` when the stage did not run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostprocessDiagnostics {
    /// Labelling of binary-mask tiles (only for mask inputs).
    pub components: Option<StageDiagnostics>,
    /// Tile stitching.
    pub stitch: StageDiagnostics,
    /// Instance hole filling (only when `config.fill_holes == true`).
    pub fill_holes: Option<StageDiagnostics>,
    /// Label expansion (only when `config.expand_iterations > 0`).
    pub expand: Option<StageDiagnostics>,
    /// Patch extraction from tile A.
    pub patches: StageDiagnostics,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PostprocessSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Connected-components labelling of mask tiles.
    Components {
        /// Strategy used.
        connectivity: String,
        /// Components found across both tiles.
        instance_count: usize,
        /// Most rounds used by either tile.
        iterations: usize,
        /// Whether both tiles reached a fixed point.
        converged: bool,
    },
    /// Tile stitching.
    Stitch {
        /// Overlap metric.
        metric: String,
        /// Match threshold.
        threshold: f32,
        /// Whether unmatched instances were erased.
        strict: bool,
        /// Instances in tile A before stitching.
        instances_a: usize,
        /// Instances in tile B before stitching.
        instances_b: usize,
        /// Accepted matches.
        matched_pairs: usize,
    },
    /// Hole filling.
    FillHoles {
        /// Background pixels assigned to an instance, both tiles.
        filled_pixels: u64,
    },
    /// Label expansion.
    Expand {
        /// Expansion rounds.
        iterations: usize,
        /// Background pixels claimed by an instance, both tiles.
        grown_pixels: u64,
    },
    /// Patch extraction.
    Patches {
        /// Patch edge length.
        patch_size: usize,
        /// Intensity channels per patch.
        channels: usize,
        /// Patches extracted.
        patch_count: usize,
    },
}

/// High-level summary counts for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostprocessSummary {
    /// Tile height in pixels.
    pub height: usize,
    /// Tile width in pixels.
    pub width: usize,
    /// Instances in stitched tile A.
    pub instances_a: usize,
    /// Instances in stitched tile B.
    pub instances_b: usize,
    /// Accepted matches.
    pub matched_pairs: usize,
    /// Patches extracted.
    pub patch_count: usize,
}

impl PostprocessDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Post-processing Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Tiles: {}x{}  |  Instances: A={} B={}",
            self.summary.height,
            self.summary.width,
            self.summary.instances_a,
            self.summary.instances_b,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages: Vec<(&str, &StageDiagnostics)> = Vec::new();
        if let Some(ref c) = self.components {
            stages.push(("Components", c));
        }
        stages.push(("Stitch", &self.stitch));
        if let Some(ref f) = self.fill_holes {
            stages.push(("Fill Holes", f));
        }
        if let Some(ref e) = self.expand {
            stages.push(("Expand", e));
        }
        stages.push(("Patches", &self.patches));

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Matched pairs: {}  |  Patches: {}",
            self.summary.matched_pairs, self.summary.patch_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Components {
            connectivity,
            instance_count,
            iterations,
            converged,
        } => {
            let state = if *converged { "converged" } else { "NOT converged" };
            format!("{connectivity}: {instance_count} components, {iterations} rounds ({state})")
        }
        StageMetrics::Stitch {
            metric,
            threshold,
            strict,
            instances_a,
            instances_b,
            matched_pairs,
        } => {
            let mode = if *strict { "strict" } else { "lenient" };
            format!(
                "{metric}>{threshold:.2} {mode}: A={instances_a} B={instances_b} matched={matched_pairs}",
            )
        }
        StageMetrics::FillHoles { filled_pixels } => format!("filled={filled_pixels} px"),
        StageMetrics::Expand {
            iterations,
            grown_pixels,
        } => format!("{iterations} rounds, grown={grown_pixels} px"),
        StageMetrics::Patches {
            patch_size,
            channels,
            patch_count,
        } => format!("{patch_count} x {channels}x{patch_size}x{patch_size}"),
    }
}
