use crate::error::{Error, Result};

/// An axis-aligned box in corner form `(x1, y1, x2, y2)`, where `(x1, y1)` is
/// the top-left corner and `(x2, y2)` the bottom-right corner. All
/// coordinates are normalized to `[0, 1]` relative to the input image.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// The same box in center form `(cx, cy, w, h)`.
///
/// Regression offsets are always expressed in this form: the center
/// components translate, the size components scale. Conversions between the
/// two forms are exact inverses of each other.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CenterBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        BoundingBox {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Rejects degenerate boxes. Every anchor and ground-truth box must have
    /// strictly positive area; anything else is corrupt data upstream.
    pub fn validate(&self) -> Result<()> {
        if self.width() <= 0.0 || self.height() <= 0.0 {
            return Err(Error::InvalidBox {
                width: self.width(),
                height: self.height(),
            });
        }
        Ok(())
    }

    /// Converts to center form `(cx, cy, w, h)`.
    pub fn to_center_form(&self) -> CenterBox {
        let w = self.width();
        let h = self.height();

        CenterBox {
            cx: self.xmin + w * 0.5,
            cy: self.ymin + h * 0.5,
            w,
            h,
        }
    }

    /// Clips the box into the unit square, keeping decoded predictions
    /// within image bounds.
    pub fn clamp_unit(&self) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin.clamp(0.0, 1.0),
            ymin: self.ymin.clamp(0.0, 1.0),
            xmax: self.xmax.clamp(0.0, 1.0),
            ymax: self.ymax.clamp(0.0, 1.0),
        }
    }
}

impl CenterBox {
    /// Converts back to corner form `(x1, y1, x2, y2)`.
    pub fn to_corner_form(&self) -> BoundingBox {
        BoundingBox {
            xmin: self.cx - self.w * 0.5,
            ymin: self.cy - self.h * 0.5,
            xmax: self.cx + self.w * 0.5,
            ymax: self.cy + self.h * 0.5,
        }
    }
}

/// Intersection over union (Jaccard overlap) of two corner-form boxes.
///
/// `IoU = intersection_area / union_area`
///
/// Returns `0.0` when the boxes do not overlap. The union is always positive
/// because both boxes are required to have strictly positive area, so the
/// division is well defined; a zero-area box fails with
/// [`Error::InvalidBox`].
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> Result<f32> {
    a.validate()?;
    b.validate()?;

    // Intersection corners: max of the top-left pair, min of the
    // bottom-right pair. Negative extents mean no overlap, clamp at 0.
    let ix = (a.xmax.min(b.xmax) - a.xmin.max(b.xmin)).max(0.0);
    let iy = (a.ymax.min(b.ymax) - a.ymin.max(b.ymin)).max(0.0);

    let intersection = ix * iy;
    let union = a.area() + b.area() - intersection;

    Ok(intersection / union)
}
