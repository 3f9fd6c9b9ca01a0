use serde::Serialize;
use uuid::Uuid;

/// Model-native output: two opposite box corners, a score and a class index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Builds a top-left/size box from two corners, truncated to whole pixels.
    ///
    /// Corners given in the wrong order are swapped per axis, so width and
    /// height are never negative.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let (left, right) = if x2 < x1 { (x2, x1) } else { (x1, x2) };
        let (top, bottom) = if y2 < y1 { (y2, y1) } else { (y1, y2) };
        let left = left as i32;
        let top = top as i32;

        Self {
            x: left,
            y: top,
            width: (right as i32).saturating_sub(left).max(0),
            height: (bottom as i32).saturating_sub(top).max(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: String,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn from_raw(raw: &RawDetection, kind: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            kind: kind.into(),
            confidence: raw.confidence,
            bounding_box: BoundingBox::from_corners(raw.x1, raw.y1, raw.x2, raw.y2),
        }
    }
}

/// Detections of a single frame, in model output order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x1: f32, y1: f32, x2: f32, y2: f32) -> RawDetection {
        RawDetection {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn test_corners_to_box() {
        let bbox = BoundingBox::from_corners(10.0, 10.0, 50.0, 60.0);

        assert_eq!(
            bbox,
            BoundingBox {
                x: 10,
                y: 10,
                width: 40,
                height: 50
            }
        );
    }

    #[test]
    fn test_ordered_corners_keep_origin() {
        let corners = [
            (0.0, 0.0, 0.0, 0.0),
            (3.7, 8.2, 3.9, 100.0),
            (120.5, 33.3, 640.0, 480.0),
            (-4.0, -2.0, 12.0, 7.5),
        ];

        for (x1, y1, x2, y2) in corners {
            let bbox = BoundingBox::from_corners(x1, y1, x2, y2);
            assert_eq!(bbox.x, x1 as i32);
            assert_eq!(bbox.y, y1 as i32);
            assert!(bbox.width >= 0);
            assert!(bbox.height >= 0);
        }
    }

    #[test]
    fn test_inverted_corners_are_swapped() {
        let bbox = BoundingBox::from_corners(50.0, 60.0, 10.0, 10.0);

        assert_eq!(
            bbox,
            BoundingBox {
                x: 10,
                y: 10,
                width: 40,
                height: 50
            }
        );
    }

    #[test]
    fn test_detection_carries_confidence_and_type() {
        let detection = Detection::from_raw(&raw(1.0, 2.0, 3.0, 4.0), "shorts", 42);

        assert_eq!(detection.kind, "shorts");
        assert_eq!(detection.confidence, 0.9);
        assert_eq!(detection.timestamp, 42);
        assert!(!detection.id.is_empty());
    }

    #[test]
    fn test_detection_ids_are_distinct() {
        let a = Detection::from_raw(&raw(1.0, 2.0, 3.0, 4.0), "shorts", 0);
        let b = Detection::from_raw(&raw(1.0, 2.0, 3.0, 4.0), "shorts", 0);

        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_detection_json_schema() {
        let detection = Detection::from_raw(&raw(10.0, 10.0, 50.0, 60.0), "shorts", 1234);
        let value = serde_json::to_value(&detection).unwrap();

        assert_eq!(value["type"], "shorts");
        assert_eq!(value["timestamp"], 1234);
        assert!(value["id"].is_string());
        assert_eq!(
            value["boundingBox"],
            serde_json::json!({"x": 10, "y": 10, "width": 40, "height": 50})
        );
        assert!((value["confidence"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }
}
