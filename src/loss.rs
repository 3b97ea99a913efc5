use burn::nn::loss::HuberLossConfig;
use burn::prelude::*;
use burn::tensor::cast::ToElement;
use burn::tensor::s;

use crate::error::{Error, Result};

/// Cross-entropy over raw logits without one-hot targets: log-softmax along
/// the class dimension, then the negative log-likelihood of each anchor's
/// target class picked out by index.
fn cross_entropy_loss<B: Backend>(
    logits: Tensor<B, 2>,       // [P, K+1]
    targets: Tensor<B, 1, Int>, // [P]
) -> Tensor<B, 1> {
    let [box_count] = targets.dims();

    let log_probabilities = burn::tensor::activation::log_softmax(logits, 1);
    let targets = targets.reshape([box_count, 1]);

    let nll = log_probabilities.gather(1, targets) * -1;

    nll.reshape([box_count])
}

/// Combined localization + classification loss for one image.
///
/// `targets` is the `[P, 4 + (K+1) + 1]` tensor produced by
/// [`Encoder::targets_to_tensor`](crate::encoder::Encoder::targets_to_tensor):
/// regression offsets, class one-hot (slot 0 = background), match flag.
/// `class_logits` are the network's raw `[P, K+1]` scores and
/// `box_regressions` its raw `[P, 4]` offsets.
///
/// Follows the SSD training objective: Smooth-L1 (Huber) over the matched
/// anchors' offsets, cross-entropy over all selected anchors' classes, with
/// hard negative mining keeping the background anchors with the highest
/// confidence loss at a ratio of `neg_pos_ratio:1` against the positives.
/// The total is `(L_conf + L_loc) / N` with `N` the number of matched
/// anchors, and zero when `N = 0`.
pub fn detection_loss<B: Backend>(
    class_logits: Tensor<B, 2>,
    box_regressions: Tensor<B, 2>,
    targets: Tensor<B, 2>,
    neg_pos_ratio: usize,
) -> Result<Tensor<B, 1>> {
    let device = &class_logits.device();

    let [anchor_count, num_columns] = class_logits.dims();
    let [regression_rows, regression_cols] = box_regressions.dims();
    let [target_rows, target_cols] = targets.dims();

    if regression_rows != anchor_count || target_rows != anchor_count {
        return Err(Error::ShapeMismatch {
            context: "loss input rows vs anchor count",
            expected: anchor_count,
            got: regression_rows.min(target_rows),
        });
    }

    if regression_cols != 4 {
        return Err(Error::ShapeMismatch {
            context: "regression columns",
            expected: 4,
            got: regression_cols,
        });
    }

    if target_cols != 4 + num_columns + 1 {
        return Err(Error::ShapeMismatch {
            context: "target columns (4 + K+1 + 1)",
            expected: 4 + num_columns + 1,
            got: target_cols,
        });
    }

    // Split the target layout back apart: offsets, one-hot, match flag.
    let regression_targets = targets.clone().slice(s![.., 0..4]);
    let class_onehot = targets.clone().slice(s![.., 4..4 + num_columns]);
    let match_flag = targets.slice(s![.., 4 + num_columns..target_cols]);

    let class_targets: Tensor<B, 1, Int> = class_onehot.argmax(1).reshape([anchor_count]);
    let matched = match_flag.greater_elem(0.5).reshape([anchor_count]);

    let positive_count = matched.clone().int().sum().into_scalar().to_usize();

    // No matched anchors: the objective is defined as zero (N = 0 case).
    if positive_count == 0 {
        return Ok(Tensor::zeros([1], device));
    }

    let positive_index = Tensor::cat(matched.nonzero(), 0);

    // Localization: Smooth L1 between predicted and encoded offsets, matched
    // anchors only.
    let localization_loss = HuberLossConfig::new(0.5)
        .init()
        .forward_no_reduction(
            box_regressions.select(0, positive_index.clone()),
            regression_targets.select(0, positive_index.clone()),
        )
        .sum();

    let confidence_loss = cross_entropy_loss(class_logits, class_targets);

    // Hard negative mining: almost every anchor is background, so rank the
    // background anchors by confidence loss and keep only the hardest ones,
    // at most neg_pos_ratio negatives per positive. Positives are pushed to
    // the bottom of the sort with -inf so they can't be picked twice.
    let negative_count = (neg_pos_ratio * positive_count).min(anchor_count - positive_count);

    let hard_negative_loss = if negative_count > 0 {
        let masked_loss = confidence_loss.clone().select_assign(
            0,
            positive_index.clone(),
            Tensor::full([positive_count], f32::NEG_INFINITY, device),
        );

        let (sorted_loss, _) = masked_loss.sort_descending_with_indices(0);
        sorted_loss.slice(0..negative_count).sum()
    } else {
        Tensor::zeros([1], device)
    };

    let positive_loss = confidence_loss.select(0, positive_index).sum();
    let confidence_total = positive_loss + hard_negative_loss;

    Ok((confidence_total + localization_loss).div_scalar(positive_count as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::{Anchor, AnchorSet, DEFAULT_VARIANCES};
    use crate::boxes::BoundingBox;
    use crate::data::GroundTruth;
    use crate::encoder::{Encoder, EncoderConfig};
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn anchor(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Anchor {
        Anchor::new(BoundingBox::new(xmin, ymin, xmax, ymax), DEFAULT_VARIANCES)
    }

    fn quadrant_encoder(num_classes: usize) -> Encoder {
        Encoder::new(
            AnchorSet::new(vec![
                anchor(0.0, 0.0, 0.5, 0.5),
                anchor(0.5, 0.0, 1.0, 0.5),
                anchor(0.0, 0.5, 0.5, 1.0),
                anchor(0.5, 0.5, 1.0, 1.0),
            ])
            .unwrap()
            .into_shared(),
            num_classes,
            EncoderConfig::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_near_perfect_prediction_has_near_zero_loss() {
        let device = Default::default();
        let enc = quadrant_encoder(2);

        // Ground truth exactly on anchor 0 with class 1.
        let gt = vec![GroundTruth::new(BoundingBox::new(0.0, 0.0, 0.5, 0.5), 1)];
        let targets = enc.encode(&gt).unwrap();
        let target_tensor = enc.targets_to_tensor::<B>(&targets, &device);

        // Logits confidently right everywhere, offsets exactly the targets
        // (all zero here since the match is perfect).
        let class_logits = Tensor::<B, 2>::from_data(
            [
                [-20.0, 20.0, -20.0],
                [20.0, -20.0, -20.0],
                [20.0, -20.0, -20.0],
                [20.0, -20.0, -20.0],
            ],
            &device,
        );
        let box_regressions = Tensor::<B, 2>::zeros([4, 4], &device);

        let loss = detection_loss(class_logits, box_regressions, target_tensor, 3).unwrap();

        assert!(loss.into_scalar().to_f32() < 1e-3);
    }

    #[test]
    fn test_wrong_prediction_costs_more_than_right_one() {
        let device = Default::default();
        let enc = quadrant_encoder(2);

        let gt = vec![GroundTruth::new(BoundingBox::new(0.0, 0.0, 0.5, 0.5), 1)];
        let targets = enc.encode(&gt).unwrap();
        let target_tensor = enc.targets_to_tensor::<B>(&targets, &device);

        let right = Tensor::<B, 2>::from_data(
            [
                [-5.0, 5.0, -5.0],
                [5.0, -5.0, -5.0],
                [5.0, -5.0, -5.0],
                [5.0, -5.0, -5.0],
            ],
            &device,
        );
        // Same confidence, wrong class on the matched anchor.
        let wrong = Tensor::<B, 2>::from_data(
            [
                [-5.0, -5.0, 5.0],
                [5.0, -5.0, -5.0],
                [5.0, -5.0, -5.0],
                [5.0, -5.0, -5.0],
            ],
            &device,
        );
        let box_regressions = Tensor::<B, 2>::zeros([4, 4], &device);

        let loss_right = detection_loss(
            right,
            box_regressions.clone(),
            target_tensor.clone(),
            3,
        )
        .unwrap()
        .into_scalar()
        .to_f32();

        let loss_wrong = detection_loss(wrong, box_regressions, target_tensor, 3)
            .unwrap()
            .into_scalar()
            .to_f32();

        assert!(loss_wrong > loss_right);
    }

    #[test]
    fn test_no_matches_yields_zero_loss() {
        let device = Default::default();
        let enc = quadrant_encoder(2);

        let targets = enc.encode(&[]).unwrap();
        let target_tensor = enc.targets_to_tensor::<B>(&targets, &device);

        let class_logits = Tensor::<B, 2>::ones([4, 3], &device);
        let box_regressions = Tensor::<B, 2>::ones([4, 4], &device);

        let loss = detection_loss(class_logits, box_regressions, target_tensor, 3).unwrap();

        assert_eq!(loss.into_scalar().to_f32(), 0.0);
    }

    #[test]
    fn test_localization_error_raises_loss() {
        let device = Default::default();
        let enc = quadrant_encoder(2);

        // Offset ground truth so the regression target is non-zero.
        let gt = vec![GroundTruth::new(BoundingBox::new(0.05, 0.05, 0.45, 0.45), 1)];
        let targets = enc.encode(&gt).unwrap();
        let target_tensor = enc.targets_to_tensor::<B>(&targets, &device);

        let class_logits = Tensor::<B, 2>::from_data(
            [
                [-5.0, 5.0, -5.0],
                [5.0, -5.0, -5.0],
                [5.0, -5.0, -5.0],
                [5.0, -5.0, -5.0],
            ],
            &device,
        );

        let exact = target_tensor.clone().slice(s![.., 0..4]);
        let sloppy = Tensor::<B, 2>::zeros([4, 4], &device);

        let loss_exact = detection_loss(
            class_logits.clone(),
            exact,
            target_tensor.clone(),
            3,
        )
        .unwrap()
        .into_scalar()
        .to_f32();

        let loss_sloppy = detection_loss(class_logits, sloppy, target_tensor, 3)
            .unwrap()
            .into_scalar()
            .to_f32();

        assert!(loss_sloppy > loss_exact);
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let device = Default::default();

        let class_logits = Tensor::<B, 2>::ones([4, 3], &device);
        let box_regressions = Tensor::<B, 2>::ones([3, 4], &device);
        let targets = Tensor::<B, 2>::ones([4, 8], &device);

        assert!(matches!(
            detection_loss(class_logits, box_regressions, targets, 3),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
