use std::sync::Arc;

use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;

use crate::anchors::{Anchor, AnchorSet};
use crate::boxes::{BoundingBox, CenterBox};
// The crate Result alias stays out of scope here: the Config derive expands
// serde impls that name the two-parameter std Result unqualified.
use crate::error::{self, Error};
use crate::nms;

/// Detection filtering parameters.
#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Minimum per-class score for an anchor to become a candidate.
    #[config(default = 0.5)]
    pub confidence_threshold: f32,
    /// Overlap at or above which a lower-confidence same-class candidate is
    /// suppressed.
    #[config(default = 0.45)]
    pub iou_threshold: f32,
    /// Cap on surviving detections per class.
    #[config(default = 100)]
    pub max_per_class: usize,
    /// Cap on surviving detections overall.
    #[config(default = 200)]
    pub max_total: usize,
}

/// One final detection in normalized image coordinates.
///
/// `anchor_index` records which anchor produced the box; it is the
/// deterministic tie-breaker everywhere confidences compare equal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub anchor_index: usize,
}

/// Turns raw per-anchor network output back into ranked detections.
///
/// Pure and deterministic: identical input always yields the identical
/// detection list, and like the encoder it only reads the shared immutable
/// [`AnchorSet`], so concurrent decoding across images needs no locking.
pub struct Decoder {
    anchors: Arc<AnchorSet>,
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(anchors: Arc<AnchorSet>, config: DecoderConfig) -> error::Result<Self> {
        if !(0.0..=1.0).contains(&config.confidence_threshold) {
            return Err(Error::InvalidParameter {
                name: "confidence_threshold",
                value: config.confidence_threshold,
                valid: "[0, 1]",
            });
        }

        if !(0.0..=1.0).contains(&config.iou_threshold) {
            return Err(Error::InvalidParameter {
                name: "iou_threshold",
                value: config.iou_threshold,
                valid: "[0, 1]",
            });
        }

        if config.max_per_class == 0 {
            return Err(Error::InvalidParameter {
                name: "max_per_class",
                value: 0.0,
                valid: ">= 1",
            });
        }

        if config.max_total == 0 {
            return Err(Error::InvalidParameter {
                name: "max_total",
                value: 0.0,
                valid: ">= 1",
            });
        }

        Ok(Decoder { anchors, config })
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    /// Decodes one image's raw output.
    ///
    /// `scores` is `[P, K+1]` of per-class confidences in `[0, 1]` (softmax
    /// is applied by the caller at the network boundary, column 0 being
    /// background); `regressions` is `[P, 4]` of predicted offsets. Both
    /// must agree with the anchor count `P`, or the call fails with
    /// [`Error::ShapeMismatch`] — that mismatch means the model and anchor
    /// set come from different geometries.
    pub fn decode<B: Backend>(
        &self,
        scores: Tensor<B, 2>,
        regressions: Tensor<B, 2>,
    ) -> error::Result<Vec<Detection>> {
        let [score_rows, num_columns] = scores.dims();
        let [regression_rows, regression_cols] = regressions.dims();

        if score_rows != self.anchors.len() {
            return Err(Error::ShapeMismatch {
                context: "score rows vs anchor count",
                expected: self.anchors.len(),
                got: score_rows,
            });
        }

        if regression_rows != self.anchors.len() {
            return Err(Error::ShapeMismatch {
                context: "regression rows vs anchor count",
                expected: self.anchors.len(),
                got: regression_rows,
            });
        }

        if regression_cols != 4 {
            return Err(Error::ShapeMismatch {
                context: "regression columns",
                expected: 4,
                got: regression_cols,
            });
        }

        if num_columns < 2 {
            return Err(Error::ShapeMismatch {
                context: "score columns (background + at least one class)",
                expected: 2,
                got: num_columns,
            });
        }

        let scores: Vec<f32> = scores.to_data().to_vec().expect("contiguous f32 scores");
        let regressions: Vec<f32> = regressions
            .to_data()
            .to_vec()
            .expect("contiguous f32 regressions");

        // Reconstruct every candidate box once; classes only differ in which
        // scores they read. Boxes that collapse to zero area after clipping
        // cannot enter suppression and are dropped here.
        let boxes: Vec<Option<BoundingBox>> = self
            .anchors
            .iter()
            .enumerate()
            .map(|(i, anchor)| {
                let offsets = [
                    regressions[i * 4],
                    regressions[i * 4 + 1],
                    regressions[i * 4 + 2],
                    regressions[i * 4 + 3],
                ];
                let bbox = decode_offsets(&offsets, anchor).clamp_unit();
                bbox.validate().ok().map(|_| bbox)
            })
            .collect();

        let mut merged = Vec::new();

        for class_id in 1..num_columns {
            let candidates: Vec<Detection> = boxes
                .iter()
                .enumerate()
                .filter_map(|(anchor_index, bbox)| {
                    let confidence = scores[anchor_index * num_columns + class_id];
                    match bbox {
                        Some(bbox) if confidence >= self.config.confidence_threshold => {
                            Some(Detection {
                                class_id,
                                confidence,
                                bbox: *bbox,
                                anchor_index,
                            })
                        }
                        _ => None,
                    }
                })
                .collect();

            merged.extend(nms::suppress(
                candidates,
                self.config.iou_threshold,
                self.config.max_per_class,
            )?);
        }

        // Global cap: highest confidence overall, ties by anchor index.
        merged.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.anchor_index.cmp(&b.anchor_index))
        });
        merged.truncate(self.config.max_total);

        // Final deterministic ranking.
        merged.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.class_id.cmp(&b.class_id))
                .then(a.anchor_index.cmp(&b.anchor_index))
        });

        Ok(merged)
    }
}

/// Inverse of the encoding transform: applies variance-scaled offsets to an
/// anchor and recovers the absolute box in corner form:
///
/// `gcx = acx + tx * var_cx * aw`
/// `gcy = acy + ty * var_cy * ah`
/// `gw  = aw * exp(tw * var_w)`
/// `gh  = ah * exp(th * var_h)`
pub fn decode_offsets(regression: &[f32; 4], anchor: &Anchor) -> BoundingBox {
    let a = anchor.center();
    let v = anchor.variances;
    let [tx, ty, tw, th] = *regression;

    CenterBox {
        cx: a.cx + tx * v[0] * a.w,
        cy: a.cy + ty * v[1] * a.h,
        w: a.w * (tw * v[2]).exp(),
        h: a.h * (th * v[3]).exp(),
    }
    .to_corner_form()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::DEFAULT_VARIANCES;
    use crate::debug::assert_approx_eq;
    use crate::encoder::encode_offsets;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn anchor(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Anchor {
        Anchor::new(BoundingBox::new(xmin, ymin, xmax, ymax), DEFAULT_VARIANCES)
    }

    fn decoder(anchors: Vec<Anchor>, config: DecoderConfig) -> Decoder {
        Decoder::new(AnchorSet::new(anchors).unwrap().into_shared(), config).unwrap()
    }

    fn tensors(
        scores: &[f32],
        regressions: &[f32],
        num_columns: usize,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let device = Default::default();
        let rows = scores.len() / num_columns;

        (
            Tensor::<B, 1>::from_floats(scores, &device).reshape([rows, num_columns]),
            Tensor::<B, 1>::from_floats(regressions, &device)
                .reshape([regressions.len() / 4, 4]),
        )
    }

    #[test]
    fn test_round_trip_through_exact_targets() {
        // Decoding the exact encoded offsets must reproduce the ground
        // truth within float tolerance.
        let a = anchor(0.4080761, 0.42141542, 0.5919239, 0.7891109);
        let gt = BoundingBox::new(0.35725, 0.51429164, 0.61651564, 0.7677916);

        let offsets = encode_offsets(&gt, &a);
        let decoded = decode_offsets(&offsets, &a);

        assert_approx_eq(&decoded.xmin, &gt.xmin, 1e-5);
        assert_approx_eq(&decoded.ymin, &gt.ymin, 1e-5);
        assert_approx_eq(&decoded.xmax, &gt.xmax, 1e-5);
        assert_approx_eq(&decoded.ymax, &gt.ymax, 1e-5);
    }

    #[test]
    fn test_zero_offsets_return_the_anchor() {
        let a = anchor(0.1, 0.2, 0.5, 0.6);
        let decoded = decode_offsets(&[0.0; 4], &a);

        assert_approx_eq(&decoded.xmin, &0.1, 1e-6);
        assert_approx_eq(&decoded.ymax, &0.6, 1e-6);
    }

    #[test]
    fn test_decode_picks_confident_classes() {
        let dec = decoder(
            vec![anchor(0.0, 0.0, 0.5, 0.5), anchor(0.5, 0.5, 1.0, 1.0)],
            DecoderConfig::new(),
        );

        // Anchor 0 confidently class 1, anchor 1 confidently background.
        let (scores, regressions) = tensors(
            &[0.05, 0.90, 0.05, 0.90, 0.05, 0.05],
            &[0.0; 8],
            3,
        );

        let detections = dec.decode(scores, regressions).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
        assert_eq!(detections[0].anchor_index, 0);
        assert_approx_eq(&detections[0].confidence, &0.90, 1e-6);
        assert_eq!(detections[0].bbox, BoundingBox::new(0.0, 0.0, 0.5, 0.5));
    }

    #[test]
    fn test_all_scores_below_threshold_is_empty_not_error() {
        let dec = decoder(
            vec![anchor(0.0, 0.0, 0.5, 0.5)],
            DecoderConfig::new().with_confidence_threshold(0.9),
        );

        let (scores, regressions) = tensors(&[0.4, 0.3, 0.3], &[0.0; 4], 3);

        assert!(dec.decode(scores, regressions).unwrap().is_empty());
    }

    #[test]
    fn test_per_class_suppression() {
        // Two nearly identical anchors firing on the same class collapse to
        // the more confident one; a third disjoint anchor survives.
        let dec = decoder(
            vec![
                anchor(0.10, 0.10, 0.40, 0.40),
                anchor(0.11, 0.11, 0.41, 0.41),
                anchor(0.60, 0.60, 0.90, 0.90),
            ],
            DecoderConfig::new(),
        );

        let (scores, regressions) = tensors(
            &[0.2, 0.8, 0.3, 0.7, 0.25, 0.75],
            &[0.0; 12],
            2,
        );

        let detections = dec.decode(scores, regressions).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].anchor_index, 0);
        assert_eq!(detections[1].anchor_index, 2);
    }

    #[test]
    fn test_max_total_keeps_highest_confidence() {
        let dec = decoder(
            vec![
                anchor(0.05, 0.05, 0.25, 0.25),
                anchor(0.35, 0.35, 0.55, 0.55),
                anchor(0.65, 0.65, 0.85, 0.85),
            ],
            DecoderConfig::new().with_max_total(2),
        );

        let (scores, regressions) = tensors(
            &[0.2, 0.6, 0.1, 0.9, 0.2, 0.7],
            &[0.0; 12],
            2,
        );

        let detections = dec.decode(scores, regressions).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].anchor_index, 1);
        assert_eq!(detections[1].anchor_index, 2);
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let dec = decoder(
            vec![anchor(0.0, 0.0, 0.5, 0.5), anchor(0.5, 0.5, 1.0, 1.0)],
            DecoderConfig::new(),
        );

        // Only one score row for two anchors.
        let (scores, regressions) = tensors(&[0.1, 0.9], &[0.0; 8], 2);

        assert!(matches!(
            dec.decode(scores, regressions),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_threshold_rejected_at_construction() {
        let result = Decoder::new(
            AnchorSet::new(vec![anchor(0.0, 0.0, 0.5, 0.5)])
                .unwrap()
                .into_shared(),
            DecoderConfig::new().with_confidence_threshold(1.5),
        );

        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let dec = decoder(
            vec![
                anchor(0.10, 0.10, 0.40, 0.40),
                anchor(0.12, 0.12, 0.42, 0.42),
                anchor(0.60, 0.60, 0.90, 0.90),
            ],
            DecoderConfig::new(),
        );

        let scores = [0.2, 0.8, 0.1, 0.7, 0.1, 0.2, 0.3, 0.75];
        let regressions = [0.1, -0.2, 0.05, 0.05, 0.0, 0.0, 0.0, 0.0, -0.1, 0.2, 0.0, 0.0];

        let (s1, r1) = tensors(&scores[0..6], &regressions, 2);
        let (s2, r2) = tensors(&scores[0..6], &regressions, 2);

        assert_eq!(dec.decode(s1, r1).unwrap(), dec.decode(s2, r2).unwrap());
    }
}
