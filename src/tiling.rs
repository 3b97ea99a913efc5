//! Multi-scale anchor tiling.
//!
//! Generates the default (prior) boxes the SSD paper associates with each
//! feature map cell: boxes tile every map in a convolutional manner, centered
//! on `(i + 0.5) / f_k`, with one box per configured aspect ratio at scale
//! `s_k` plus an extra aspect-ratio-1 box at scale `sqrt(s_k * s_{k+1})`.
//! Scales are linearly spaced between `s_min` and `s_max` across the maps
//! ("SSD: Single Shot MultiBox Detector", Liu et al., sec. 2.2,
//! <https://arxiv.org/abs/1512.02325>).

use crate::anchors::{Anchor, AnchorSet, DEFAULT_VARIANCES};
use crate::boxes::CenterBox;
use crate::error::{Error, Result};

/// One square feature map contributing anchors: its grid size `f_k` and the
/// aspect ratios tiled at each of its `f_k * f_k` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMapSpec {
    pub grid: usize,
    pub aspect_ratios: Vec<f32>,
}

impl FeatureMapSpec {
    pub fn new(grid: usize, aspect_ratios: Vec<f32>) -> Self {
        FeatureMapSpec { grid, aspect_ratios }
    }

    /// Anchors per cell: one per aspect ratio plus the extra ratio-1 box.
    pub fn anchors_per_cell(&self) -> usize {
        self.aspect_ratios.len() + 1
    }
}

/// The canonical SSD300 layout: six maps from Conv4_3 (38x38) down to
/// Conv11_2 (1x1), with 4-6-6-6-4-4 boxes per cell, 8732 anchors total.
pub fn ssd300_feature_maps() -> Vec<FeatureMapSpec> {
    let narrow = vec![1.0, 2.0, 0.5];
    let wide = vec![1.0, 2.0, 3.0, 0.5, 1.0 / 3.0];

    vec![
        FeatureMapSpec::new(38, narrow.clone()),
        FeatureMapSpec::new(19, wide.clone()),
        FeatureMapSpec::new(10, wide.clone()),
        FeatureMapSpec::new(5, wide),
        FeatureMapSpec::new(3, narrow.clone()),
        FeatureMapSpec::new(1, narrow),
    ]
}

/// Scale of the k-th map (1-based), linearly spaced so the first map sits at
/// `s_min` and the last at `s_max`. Evaluating at `k = m + 1` extrapolates
/// one step past `s_max`, which the extra ratio-1 box of the last map needs.
fn scale(k: usize, map_count: usize, s_min: f32, s_max: f32) -> f32 {
    let step = if map_count > 1 {
        (s_max - s_min) / (map_count as f32 - 1.0)
    } else {
        s_max - s_min
    };

    s_min + step * (k as f32 - 1.0)
}

/// Box centers for a square grid of size `f_k`: `(i + 0.5) / f_k`.
fn cell_centers(grid: usize) -> Vec<f32> {
    (0..grid).map(|i| (i as f32 + 0.5) / grid as f32).collect()
}

/// Generates the full ordered anchor set for the given feature maps.
///
/// Anchor order is: maps in the given order, cells row-major within each
/// map, and within a cell the extra ratio-1 box followed by one box per
/// aspect ratio in listed order. That order is load-bearing: it must match the
/// order of the network's per-anchor output heads.
///
/// Boxes are clipped to the unit square, so anchors near the border (or
/// larger than the image, as on the coarsest maps) stay in `[0, 1]`.
pub fn generate_anchors(
    feature_maps: &[FeatureMapSpec],
    s_min: f32,
    s_max: f32,
    variances: [f32; 4],
) -> Result<AnchorSet> {
    if !(0.0 < s_min && s_min < s_max && s_max <= 1.0) {
        return Err(Error::InvalidParameter {
            name: "scale range",
            value: s_min,
            valid: "0 < s_min < s_max <= 1",
        });
    }

    let m = feature_maps.len();
    let mut anchors = Vec::new();

    for (index, map) in feature_maps.iter().enumerate() {
        let k = index + 1;
        let sk = scale(k, m, s_min, s_max);
        let sk_next = scale(k + 1, m, s_min, s_max);

        // (width, height) of every box shape tiled at each cell of this map.
        let mut shapes = Vec::with_capacity(map.anchors_per_cell());

        let s_extra = (sk * sk_next).sqrt();
        shapes.push((s_extra, s_extra));

        for &ar in &map.aspect_ratios {
            shapes.push((sk * ar.sqrt(), sk / ar.sqrt()));
        }

        let centers = cell_centers(map.grid);

        for &cy in &centers {
            for &cx in &centers {
                for &(w, h) in &shapes {
                    let bbox = CenterBox { cx, cy, w, h }.to_corner_form().clamp_unit();
                    anchors.push(Anchor::new(bbox, variances));
                }
            }
        }
    }

    AnchorSet::new(anchors)
}

/// The SSD300 anchor set with the standard scale range and variances.
pub fn ssd300_anchors() -> Result<AnchorSet> {
    generate_anchors(&ssd300_feature_maps(), 0.2, 0.9, DEFAULT_VARIANCES)
}
