use std::io::Read;
use std::sync::Arc;

use crate::boxes::{BoundingBox, CenterBox};
use crate::error::{Error, Result};

/// Variance scales applied to regression offsets, in the order
/// `(var_cx, var_cy, var_w, var_h)`.
///
/// These are the fixed numerical-conditioning constants SSD-style detectors
/// divide their targets by; they are the reciprocal view of the
/// `(10, 10, 5, 5)` regression weights used elsewhere in the literature.
pub const DEFAULT_VARIANCES: [f32; 4] = [0.1, 0.1, 0.2, 0.2];

/// Number of floats in one serialized anchor record:
/// `[xmin, ymin, xmax, ymax, var_cx, var_cy, var_w, var_h]`.
pub const ANCHOR_RECORD_LEN: usize = 8;

/// A single default (prior) box: a fixed reference box at a predetermined
/// image location and scale, used as the regression baseline, together with
/// its variance scales.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub bbox: BoundingBox,
    pub variances: [f32; 4],
}

impl Anchor {
    pub fn new(bbox: BoundingBox, variances: [f32; 4]) -> Self {
        Anchor { bbox, variances }
    }

    /// Anchor geometry in center form, the form every offset is computed in.
    pub fn center(&self) -> CenterBox {
        self.bbox.to_center_form()
    }
}

/// The immutable, ordered set of all `P` anchors for one network geometry.
///
/// Anchor order must exactly match the order in which the network emits its
/// per-anchor output, since the encoder and decoder index anchors
/// positionally. The set is constructed once and shared read-only (wrap it
/// in [`Arc`] via [`AnchorSet::into_shared`]); nothing in this crate mutates
/// it after construction, so concurrent use across worker threads needs no
/// locking.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
    anchors: Vec<Anchor>,
}

impl AnchorSet {
    /// Builds an anchor set, validating every record: at least one anchor,
    /// each box with strictly positive area, every variance positive.
    pub fn new(anchors: Vec<Anchor>) -> Result<Self> {
        if anchors.is_empty() {
            return Err(Error::InvalidParameter {
                name: "anchor count",
                value: 0.0,
                valid: ">= 1",
            });
        }

        for anchor in &anchors {
            anchor.bbox.validate()?;

            for &variance in &anchor.variances {
                if variance <= 0.0 {
                    return Err(Error::InvalidParameter {
                        name: "variance",
                        value: variance,
                        valid: "> 0",
                    });
                }
            }
        }

        Ok(AnchorSet { anchors })
    }

    /// Parses a flat sequence of `P * 8` floats, 8 per anchor:
    /// `[xmin, ymin, xmax, ymax, var_cx, var_cy, var_w, var_h]`.
    pub fn from_slice(values: &[f32]) -> Result<Self> {
        if values.len() % ANCHOR_RECORD_LEN != 0 {
            return Err(Error::ShapeMismatch {
                context: "anchor records (multiple of 8 floats)",
                expected: values.len() / ANCHOR_RECORD_LEN * ANCHOR_RECORD_LEN,
                got: values.len(),
            });
        }

        let anchors = values
            .chunks_exact(ANCHOR_RECORD_LEN)
            .map(|r| {
                Anchor::new(
                    BoundingBox::new(r[0], r[1], r[2], r[3]),
                    [r[4], r[5], r[6], r[7]],
                )
            })
            .collect();

        Self::new(anchors)
    }

    /// Loads an anchor file: the same flat record layout as
    /// [`AnchorSet::from_slice`], serialized as little-endian `f32`.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;

        if raw.len() % 4 != 0 {
            return Err(Error::ShapeMismatch {
                context: "anchor file bytes (multiple of 4)",
                expected: raw.len() / 4 * 4,
                got: raw.len(),
            });
        }

        let values: Vec<f32> = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Self::from_slice(&values)
    }

    /// Number of anchors `P`.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Anchor> {
        self.anchors.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
        self.anchors.iter()
    }

    pub fn as_slice(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Wraps the set for shared read-only use by encoder and decoder.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
