//! segstitch-labels: Pure label-map algebra for instance segmentation
//! (sans-IO).
//!
//! Post-processes instance label maps through:
//! connected components -> tile stitching -> hole filling ->
//! label expansion -> per-instance patch extraction.
//!
//! Every operation is a pure function over `ndarray` views and returns
//! new arrays. This crate has **no I/O dependencies**; decoding and
//! encoding label images lives in `segstitch-bench`.
//!
//! The iterative operators (connected components, flood fill, dilation,
//! expansion) all reduce to one primitive, a 3×3 maximum under a mask
//! ([`propagate`]). Each round reads a full snapshot of the previous one
//! and rows are processed on the rayon thread pool.

pub mod components;
pub mod diagnostics;
pub mod edt;
pub mod encode;
pub mod metrics;
pub mod morphology;
pub mod overlap;
pub mod patches;
pub mod pipeline;
pub mod propagate;
pub mod remap;
pub mod shape;
pub mod stitch;
pub mod target;
pub mod types;

pub use components::{
    ComponentLabeler, Components, Connectivity, connected_components,
    connected_components_batch, exact_components,
};
pub use edt::instance_edt;
pub use encode::{
    DenseInstances, InstanceSet, Layout, Representation, SparseInstances, encode, one_hot,
};
pub use metrics::{eccentricity, instance_eccentricity};
pub use morphology::{
    FloodFill, dilate, expand_labels, fill_holes, fill_label_holes, find_boundaries,
    find_hard_boundaries, flood_fill,
};
pub use overlap::{OverlapMetric, intersection_over_minimum_area, iou, iou_heatmap};
pub use patches::{centroids, extract_patches, masked_patches};
pub use pipeline::{
    PostprocessConfig, PostprocessResult, Tile, postprocess, postprocess_stack,
    postprocess_with_clock,
};
pub use remap::{RemapTable, fast_remap};
pub use stitch::{MatchedPair, StitchMode, Stitched, match_labels, stitch_tiles};
pub use target::TargetSegmentation;
pub use types::{Centroid, Convergence, IdList, LabelError, LabelMap, OverlapMatrix, PatchBatch};
