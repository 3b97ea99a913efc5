//! Anchor-box matching, encoding and decoding for SSD-style detectors.
//!
//! The pieces every single-shot detector re-implements carefully: assigning
//! ground-truth boxes to a fixed set of default (prior) boxes by Jaccard
//! overlap, encoding matches into variance-scaled regression targets, and
//! decoding raw network output back into final detections via per-class
//! confidence filtering and non-maximum suppression. The matching strategy
//! and training objective follow "SSD: Single Shot MultiBox Detector"
//! (Liu et al., <https://arxiv.org/abs/1512.02325>).
//!
//! Everything here is pure and deterministic over its inputs and a shared,
//! immutable [`anchors::AnchorSet`]; encoding and decoding are safe to run
//! concurrently across images without locking.

pub mod anchors;
pub mod boxes;
pub mod data;
pub mod debug;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod loss;
pub mod nms;
pub mod tiling;

pub use anchors::{Anchor, AnchorSet};
pub use boxes::{iou, BoundingBox, CenterBox};
pub use data::{GroundTruth, GroundTruthStore};
pub use decoder::{Decoder, DecoderConfig, Detection};
pub use encoder::{EncodedTarget, Encoder, EncoderConfig};
pub use error::{Error, Result};
