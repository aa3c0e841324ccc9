//! Integration test: two overlapping predictions of the same synthetic
//! field of nuclei, stitched, cleaned, and cut into patches.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;

use ndarray::{Array2, Array3, Axis};
use segstitch_labels::{
    Connectivity, PostprocessConfig, StitchMode, Tile, exact_components, fill_holes,
    instance_eccentricity, iou_heatmap, postprocess,
};

const SIZE: usize = 48;

/// Disk centres and radii of the synthetic nuclei.
const NUCLEI: [(usize, usize, usize); 4] = [(10, 10, 5), (12, 32, 6), (34, 14, 4), (35, 36, 7)];

fn disk(r: usize, c: usize, centre: (usize, usize), radius: usize) -> bool {
    let dr = r.abs_diff(centre.0);
    let dc = c.abs_diff(centre.1);
    dr * dr + dc * dc <= radius * radius
}

/// Label map with nucleus `k` drawn as `first_id + k`, shifted by
/// `offset` columns.
fn field(first_id: u32, offset: usize) -> Array2<u32> {
    Array2::from_shape_fn((SIZE, SIZE), |(r, c)| {
        NUCLEI
            .iter()
            .zip(first_id..)
            .find(|&(&(cr, cc, radius), _)| disk(r, c, (cr, cc + offset), radius))
            .map_or(0, |(_, id)| id)
    })
}

fn ids(labels: &Array2<u32>) -> BTreeSet<u32> {
    labels.iter().copied().filter(|&v| v > 0).collect()
}

#[test]
fn shifted_prediction_takes_reference_ids() {
    let tile_a = field(1, 0);
    let tile_b = field(100, 1);
    let image = Array3::from_shape_fn((2, SIZE, SIZE), |(ch, r, c)| {
        if ch == 0 {
            1.0
        } else {
            f32::from(u8::try_from((r + c) % 200).unwrap())
        }
    });
    let config = PostprocessConfig {
        patch_size: 16,
        expand_iterations: 0,
        ..PostprocessConfig::default()
    };

    let result = postprocess(
        Tile::Labels(tile_a.view()),
        Tile::Labels(tile_b.view()),
        image.view(),
        &config,
    )
    .expect("postprocess should succeed");

    assert_eq!(result.pairs.len(), NUCLEI.len());
    assert_eq!(ids(&result.tile_b), ids(&tile_a));
    assert_eq!(result.tile_a, tile_a, "lenient stitching never touches tile A");
    assert_eq!(result.patches.len(), NUCLEI.len());
    assert_eq!(result.patches.patches.dim(), (4, 2, 16, 16));
    let first_channel = result.patches.patches.index_axis(Axis(1), 0);
    assert!(first_channel.iter().all(|&v| (v - 1.0).abs() < f32::EPSILON));

    let report = result.diagnostics.report();
    assert!(report.contains("Stitch"));
    assert!(report.contains("matched=4"));
}

#[test]
fn strict_stitching_drops_unpaired_nucleus() {
    let tile_a = field(1, 0);
    let mut tile_b = field(100, 1);
    // Remove the last nucleus from tile B.
    tile_b.mapv_inplace(|v| if v == 103 { 0 } else { v });
    let image = Array3::<f32>::zeros((1, SIZE, SIZE));
    let config = PostprocessConfig {
        strict: true,
        patch_size: 8,
        expand_iterations: 0,
        ..PostprocessConfig::default()
    };
    assert_eq!(config.stitch_mode(), StitchMode::Strict);

    let result = postprocess(
        tile_a.view().into(),
        tile_b.view().into(),
        image.view(),
        &config,
    )
    .unwrap();
    assert_eq!(ids(&result.tile_a), BTreeSet::from([1, 2, 3]));
    assert_eq!(ids(&result.tile_b), BTreeSet::from([1, 2, 3]));
    assert_eq!(result.patches.ids, vec![1, 2, 3]);
}

#[test]
fn mask_prediction_is_labelled_then_stitched() {
    let tile_a = field(1, 0);
    let mask_b = field(1, 1).map(|&v| v > 0);
    let image = Array3::<f32>::zeros((1, SIZE, SIZE));

    for connectivity in [Connectivity::default(), Connectivity::Exact] {
        let config = PostprocessConfig {
            connectivity,
            patch_size: 8,
            ..PostprocessConfig::default()
        };
        let result = postprocess(
            tile_a.view().into(),
            mask_b.view().into(),
            image.view(),
            &config,
        )
        .unwrap();
        assert_eq!(result.pairs.len(), NUCLEI.len(), "{connectivity}");
        assert!(result.diagnostics.components.is_some());
        // Expansion grows both tiles but keeps the id sets aligned.
        assert_eq!(ids(&result.tile_b), ids(&result.tile_a));
    }

    let exact = exact_components(mask_b.view()).unwrap();
    assert_eq!(ids(&exact.labels).len(), NUCLEI.len());
}

#[test]
fn hollow_nucleus_is_filled_during_postprocess() {
    let mut tile_a = field(1, 0);
    // Hollow out the largest nucleus.
    let (cr, cc, _) = NUCLEI[3];
    for r in cr - 2..=cr + 2 {
        for c in cc - 2..=cc + 2 {
            tile_a[[r, c]] = 0;
        }
    }
    let holes_before = fill_holes(tile_a.map(|&v| v > 0).view()).unwrap();
    assert!(holes_before[[cr, cc]]);

    let image = Array3::<f32>::zeros((1, SIZE, SIZE));
    let config = PostprocessConfig {
        fill_holes: true,
        expand_iterations: 0,
        patch_size: 8,
        ..PostprocessConfig::default()
    };
    let result = postprocess(
        tile_a.view().into(),
        tile_a.view().into(),
        image.view(),
        &config,
    )
    .unwrap();
    assert_eq!(result.tile_a[[cr, cc]], 4);
    assert_eq!(result.tile_b[[cr, cc]], 4);
    assert!(result.diagnostics.fill_holes.is_some());
}

#[test]
fn heatmap_and_shape_metrics_on_field() {
    let tile_a = field(1, 0);
    let heat = iou_heatmap(tile_a.view(), tile_a.view()).unwrap();
    for (&v, &l) in heat.iter().zip(tile_a.iter()) {
        let expected = if l > 0 { 1.0 } else { 0.0 };
        assert!((v - expected).abs() < 1e-6);
    }

    let (eccentricities, ids) = instance_eccentricity(tile_a.view());
    assert_eq!(ids, vec![1, 2, 3, 4]);
    for e in eccentricities {
        assert!(e < 0.3, "disks should be nearly round, got {e}");
    }
}
