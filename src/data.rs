use std::collections::HashMap;

use crate::boxes::BoundingBox;
use crate::error::{Error, Result};

/// One labeled object in an image: a corner-form box in normalized
/// coordinates and a class id in `1..=K`. Class 0 is reserved for background
/// and never appears in ground truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruth {
    pub bbox: BoundingBox,
    pub class_id: usize,
}

impl GroundTruth {
    pub fn new(bbox: BoundingBox, class_id: usize) -> Self {
        GroundTruth { bbox, class_id }
    }

    /// Validates the record against the class count `K`: strictly positive
    /// area, class id in `1..=K`.
    pub fn validate(&self, num_classes: usize) -> Result<()> {
        self.bbox.validate()?;

        if self.class_id == 0 || self.class_id > num_classes {
            return Err(Error::InvalidParameter {
                name: "class_id",
                value: self.class_id as f32,
                valid: "1..=num_classes (0 is background)",
            });
        }

        Ok(())
    }
}

/// Mapping from image identifier to that image's ordered ground truth, as
/// produced by the external annotation-parsing collaborator.
///
/// The collaborator hands over flat per-object records
/// `[xmin, ymin, xmax, ymax, one_hot_bits...]` with `K + 1` one-hot slots
/// (slot 0 = background, which must never be set in ground truth);
/// [`GroundTruthStore::insert_records`] converts those into [`GroundTruth`]
/// entries. Once filled, the store is an immutable input to encoding.
#[derive(Debug, Default, Clone)]
pub struct GroundTruthStore {
    num_classes: usize,
    images: HashMap<String, Vec<GroundTruth>>,
}

impl GroundTruthStore {
    pub fn new(num_classes: usize) -> Self {
        GroundTruthStore {
            num_classes,
            images: HashMap::new(),
        }
    }

    /// Number of real (non-background) classes `K`.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Inserts one image's annotation rows, each
    /// `[xmin, ymin, xmax, ymax, one_hot_bits...]` with `K + 1` bits. The
    /// class id is the index of the set bit; a row with no set bit, more than
    /// one set bit, or a set background bit is rejected.
    pub fn insert_records(&mut self, image_id: &str, records: &[Vec<f32>]) -> Result<()> {
        let row_len = 4 + self.num_classes + 1;
        let mut boxes = Vec::with_capacity(records.len());

        for record in records {
            if record.len() != row_len {
                return Err(Error::ShapeMismatch {
                    context: "ground-truth record (4 coords + K+1 one-hot bits)",
                    expected: row_len,
                    got: record.len(),
                });
            }

            let bbox = BoundingBox::new(record[0], record[1], record[2], record[3]);

            let mut set_bits = record[4..]
                .iter()
                .enumerate()
                .filter(|(_, &bit)| bit > 0.5)
                .map(|(index, _)| index);

            let class_id = match (set_bits.next(), set_bits.next()) {
                (Some(index), None) => index,
                (first, _) => {
                    return Err(Error::InvalidParameter {
                        name: "class one-hot",
                        value: first.map_or(0.0, |_| 2.0),
                        valid: "exactly one set bit among classes 1..=K",
                    })
                }
            };

            let gt = GroundTruth::new(bbox, class_id);
            gt.validate(self.num_classes)?;

            boxes.push(gt);
        }

        self.images.insert(image_id.to_string(), boxes);
        Ok(())
    }

    pub fn insert(&mut self, image_id: &str, boxes: Vec<GroundTruth>) -> Result<()> {
        for gt in &boxes {
            gt.validate(self.num_classes)?;
        }

        self.images.insert(image_id.to_string(), boxes);
        Ok(())
    }

    /// Ground truth for one image; `None` when the id is unknown. An image
    /// with no objects is a valid entry with an empty slice.
    pub fn get(&self, image_id: &str) -> Option<&[GroundTruth]> {
        self.images.get(image_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image_ids(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }
}
