//! Road damage detection results

use crate::error::{MediaError, MediaResult};
use crate::frame::VideoResolution;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Damage classes, indexed by detector class id
pub const LABELS: [&str; 6] = [
    "Alligator Crack",
    "Vertical Crack",
    "Potholes",
    "Raveling",
    "Shoving",
    "Horizontal Crack",
];

/// Axis-aligned box in pixel coordinates, `x1 <= x2` and `y1 <= y2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    /// Build a box from two corners in any order
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Truncate float corners the way detectors report them
    pub fn from_xyxy(xyxy: [f32; 4]) -> MediaResult<Self> {
        if xyxy.iter().any(|v| !v.is_finite()) {
            return Err(MediaError::InvalidBox {
                reason: format!("non-finite coordinates {:?}", xyxy),
            });
        }
        let [x1, y1, x2, y2] = xyxy.map(|v| v as i32);
        Ok(Self::new(x1, y1, x2, y2))
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Map from `from` pixel space into `to` pixel space
    pub fn scaled(&self, from: VideoResolution, to: VideoResolution) -> Self {
        let sx = to.width as f64 / from.width as f64;
        let sy = to.height as f64 / from.height as f64;
        Self::new(
            (self.x1 as f64 * sx).round() as i32,
            (self.y1 as f64 * sy).round() as i32,
            (self.x2 as f64 * sx).round() as i32,
            (self.y2 as f64 * sy).round() as i32,
        )
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Detector output before validation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    /// Class index reported by the model
    pub class_id: usize,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Corners as `[x1, y1, x2, y2]`
    pub xyxy: [f32; 4],
}

/// One located damage instance
///
/// The label is always derived from `class_id`; boxes are in the coordinate
/// space of the image the detector saw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    class_id: usize,
    score: f32,
    bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: usize, score: f32, bbox: BoundingBox) -> MediaResult<Self> {
        if class_id >= LABELS.len() {
            return Err(MediaError::UnknownClass { class_id });
        }
        if !(0.0..=1.0).contains(&score) {
            return Err(MediaError::InvalidScore { value: score });
        }
        Ok(Self {
            class_id,
            score,
            bbox,
        })
    }

    pub fn from_raw(raw: &RawDetection) -> MediaResult<Self> {
        Self::new(raw.class_id, raw.confidence, BoundingBox::from_xyxy(raw.xyxy)?)
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn label(&self) -> &'static str {
        LABELS[self.class_id]
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Same detection with its box mapped into another frame's pixel space
    pub fn scaled_to(&self, from: VideoResolution, to: VideoResolution) -> Self {
        Self {
            bbox: self.bbox.scaled(from, to),
            ..self.clone()
        }
    }
}

/// Detections for one frame, in detector order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionList {
    /// Sequence number of the frame within its session
    pub sequence: u64,
    /// Frame timestamp in milliseconds
    pub timestamp: u64,
    pub detections: Vec<Detection>,
}

impl DetectionList {
    pub fn new(sequence: u64, timestamp: u64, detections: Vec<Detection>) -> Self {
        Self {
            sequence,
            timestamp,
            detections,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }
}

impl<'a> IntoIterator for &'a DetectionList {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_derived_from_class() {
        for (class_id, label) in LABELS.iter().enumerate() {
            let det = Detection::new(class_id, 0.9, BoundingBox::new(0, 0, 1, 1)).unwrap();
            assert_eq!(det.label(), *label);
        }
        assert!(matches!(
            Detection::new(6, 0.9, BoundingBox::new(0, 0, 1, 1)),
            Err(MediaError::UnknownClass { class_id: 6 })
        ));
    }

    #[test]
    fn test_box_corners_are_ordered() {
        let bbox = BoundingBox::new(50, 40, 10, 20);
        assert_eq!((bbox.x1(), bbox.y1(), bbox.x2(), bbox.y2()), (10, 20, 50, 40));
        assert_eq!(bbox.to_string(), "[10, 20, 50, 40]");

        let bbox = BoundingBox::from_xyxy([12.9, 3.2, 100.7, 64.0]).unwrap();
        assert_eq!(bbox, BoundingBox::new(12, 3, 100, 64));
        assert!(BoundingBox::from_xyxy([f32::NAN, 0.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn test_box_scaling_to_original_frame() {
        let det = Detection::new(2, 0.7, BoundingBox::new(320, 320, 640, 640)).unwrap();
        let scaled = det.scaled_to(VideoResolution::square(640), VideoResolution::HD);
        assert_eq!(scaled.bbox(), BoundingBox::new(640, 360, 1280, 720));
        assert_eq!(scaled.label(), "Potholes");
    }
}
