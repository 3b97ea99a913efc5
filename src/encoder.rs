use std::sync::Arc;

use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;

use crate::anchors::{Anchor, AnchorSet};
use crate::boxes::{iou, BoundingBox};
use crate::data::GroundTruth;
// The crate Result alias stays out of scope here: the Config derive expands
// serde impls that name the two-parameter std Result unqualified.
use crate::error::{self, Error};

/// Matching parameters.
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Minimum Jaccard overlap for an anchor to be claimed by a ground-truth
    /// box. 0.5 per the SSD paper's matching strategy.
    #[config(default = 0.5)]
    pub iou_threshold: f32,
}

/// Per-anchor training target produced by matching.
///
/// Unmatched anchors carry the background one-hot (`[1, 0, ..., 0]`) and a
/// zero regression that the loss must ignore (`is_matched = false`). Matched
/// anchors carry exactly one set class bit among `1..=K` and the
/// variance-scaled offset to their ground-truth box.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTarget {
    pub is_matched: bool,
    pub regression: [f32; 4],
    pub class_onehot: Vec<f32>,
}

impl EncodedTarget {
    fn background(num_classes: usize) -> Self {
        let mut class_onehot = vec![0.0; num_classes + 1];
        class_onehot[0] = 1.0;

        EncodedTarget {
            is_matched: false,
            regression: [0.0; 4],
            class_onehot,
        }
    }

    fn matched(regression: [f32; 4], class_id: usize, num_classes: usize) -> Self {
        let mut class_onehot = vec![0.0; num_classes + 1];
        class_onehot[class_id] = 1.0;

        EncodedTarget {
            is_matched: true,
            regression,
            class_onehot,
        }
    }
}

/// Assigns ground truth to anchors and encodes regression targets.
///
/// Matching follows the SSD paper: every anchor whose overlap with a
/// ground-truth box exceeds the threshold is claimed by it, so one
/// ground-truth box may legitimately own many anchors. An anchor eligible
/// for several ground-truth boxes goes to the one with the highest overlap
/// (ties to the lowest ground-truth index). A ground-truth box that claims
/// nothing is force-matched to its single best anchor so no box starves.
///
/// Pure and stateless over its inputs and the shared read-only
/// [`AnchorSet`]; safe to call concurrently from data-loader workers.
pub struct Encoder {
    anchors: Arc<AnchorSet>,
    num_classes: usize,
    config: EncoderConfig,
}

impl Encoder {
    pub fn new(
        anchors: Arc<AnchorSet>,
        num_classes: usize,
        config: EncoderConfig,
    ) -> error::Result<Self> {
        if !(0.0..=1.0).contains(&config.iou_threshold) {
            return Err(Error::InvalidParameter {
                name: "iou_threshold",
                value: config.iou_threshold,
                valid: "[0, 1]",
            });
        }

        if num_classes == 0 {
            return Err(Error::InvalidParameter {
                name: "num_classes",
                value: 0.0,
                valid: ">= 1",
            });
        }

        Ok(Encoder {
            anchors,
            num_classes,
            config,
        })
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Encodes one image's ground truth into a target per anchor.
    ///
    /// Empty ground truth is valid and yields an all-background result. A
    /// degenerate ground-truth box or an out-of-range class id fails.
    pub fn encode(&self, ground_truth: &[GroundTruth]) -> error::Result<Vec<EncodedTarget>> {
        for gt in ground_truth {
            gt.validate(self.num_classes)?;
        }

        // Assignment table keyed by anchor index: (ground-truth index, IoU).
        let mut assigned: Vec<Option<(usize, f32)>> = vec![None; self.anchors.len()];

        // For the force-match pass: each ground-truth box's single best
        // anchor by global IoU.
        let mut best_anchor: Vec<(usize, f32)> = Vec::with_capacity(ground_truth.len());

        for (gt_index, gt) in ground_truth.iter().enumerate() {
            let mut best = (0usize, f32::MIN);

            for (anchor_index, anchor) in self.anchors.iter().enumerate() {
                let overlap = iou(&gt.bbox, &anchor.bbox)?;

                if overlap > best.1 {
                    best = (anchor_index, overlap);
                }

                if overlap < self.config.iou_threshold {
                    continue;
                }

                // Strict > keeps the lowest ground-truth index on equal
                // overlap, since boxes are visited in order.
                match assigned[anchor_index] {
                    Some((_, existing)) if overlap <= existing => {}
                    _ => assigned[anchor_index] = Some((gt_index, overlap)),
                }
            }

            best_anchor.push(best);
        }

        // Guarantee at least one positive anchor per ground-truth box. Read
        // ownership off the settled assignment table: clearing the threshold
        // is not enough, since every such anchor may have gone to a box with
        // higher overlap.
        let mut owns_anchor = vec![false; ground_truth.len()];
        for &(gt_index, _) in assigned.iter().flatten() {
            owns_anchor[gt_index] = true;
        }

        for (gt_index, &(anchor_index, overlap)) in best_anchor.iter().enumerate() {
            if !owns_anchor[gt_index] {
                assigned[anchor_index] = Some((gt_index, overlap));
            }
        }

        let targets = assigned
            .iter()
            .zip(self.anchors.iter())
            .map(|(assignment, anchor)| match assignment {
                Some((gt_index, _)) => {
                    let gt = &ground_truth[*gt_index];
                    EncodedTarget::matched(
                        encode_offsets(&gt.bbox, anchor),
                        gt.class_id,
                        self.num_classes,
                    )
                }
                None => EncodedTarget::background(self.num_classes),
            })
            .collect();

        Ok(targets)
    }

    /// Flattens encoded targets into the `[P, 4 + (K+1) + 1]` tensor the
    /// loss consumes: regression offsets, class one-hot, match flag — in
    /// that positional order.
    pub fn targets_to_tensor<B: Backend>(
        &self,
        targets: &[EncodedTarget],
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let row_len = 4 + self.num_classes + 1 + 1;
        let mut flat = Vec::with_capacity(targets.len() * row_len);

        for target in targets {
            flat.extend_from_slice(&target.regression);
            flat.extend_from_slice(&target.class_onehot);
            flat.push(if target.is_matched { 1.0 } else { 0.0 });
        }

        Tensor::<B, 1>::from_floats(flat.as_slice(), device)
            .reshape([targets.len(), row_len])
    }
}

/// Offset from an anchor to a ground-truth box in center/size form,
/// normalized by the anchor's size and divided by the anchor's variances:
///
/// `tx = (gcx - acx) / aw / var_cx`
/// `ty = (gcy - acy) / ah / var_cy`
/// `tw = ln(gw / aw) / var_w`
/// `th = ln(gh / ah) / var_h`
///
/// The log-space size components keep learning stable across box sizes
/// (R-CNN appendix C); the variance division is the fixed conditioning
/// convention the loss and decoder both rely on.
pub fn encode_offsets(gt: &BoundingBox, anchor: &Anchor) -> [f32; 4] {
    let g = gt.to_center_form();
    let a = anchor.center();
    let v = anchor.variances;

    [
        (g.cx - a.cx) / a.w / v[0],
        (g.cy - a.cy) / a.h / v[1],
        (g.w / a.w).ln() / v[2],
        (g.h / a.h).ln() / v[3],
    ]
}
