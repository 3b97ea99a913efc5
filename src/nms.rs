//! Greedy non-maximum suppression.
//!
//! Works on the scalar candidate records of a single class: keep the most
//! confident candidate, drop everything that overlaps it too much, repeat.
//! Expressed as an explicit iterative loop over a shrinking candidate list
//! (worst case `O(n log n + n^2)` per class), never recursion.

use crate::boxes::iou;
use crate::decoder::Detection;
use crate::error::Result;

/// Suppresses overlapping same-class candidates in place of the classic
/// per-class NMS step.
///
/// Candidates are ranked by descending confidence, ties broken by ascending
/// anchor index so the result is deterministic for identical input. A
/// candidate is discarded when its IoU with an already-kept detection is
/// `>= iou_threshold`. At most `max_keep` detections survive.
pub fn suppress(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_keep: usize,
) -> Result<Vec<Detection>> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.anchor_index.cmp(&b.anchor_index))
    });

    let mut kept = Vec::new();

    while !candidates.is_empty() && kept.len() < max_keep {
        let top = candidates.remove(0);

        let mut survivors = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if iou(&top.bbox, &candidate.bbox)? < iou_threshold {
                survivors.push(candidate);
            }
        }

        candidates = survivors;
        kept.push(top);
    }

    Ok(kept)
}
