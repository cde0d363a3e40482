//! Detection geometry shared by the face locator and the object detector.

/// Minimum usable side for a face box, in pixels. Smaller boxes are too
/// unreliable to match against and are discarded before prediction.
pub const MIN_FACE_SIDE: f32 = 20.0;

/// A detected region with its confidence and, for object detection, the
/// predicted class index.
#[derive(Debug, Clone)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub class_id: Option<usize>,
}

impl Detection {
    /// Clamp the box to the frame bounds, keeping at least one pixel of
    /// width and height inside the frame.
    pub fn clamp_to(&self, frame_w: u32, frame_h: u32) -> Detection {
        let fw = frame_w as f32;
        let fh = frame_h as f32;
        let x = self.x.clamp(0.0, fw - 1.0);
        let y = self.y.clamp(0.0, fh - 1.0);
        let width = self.width.clamp(1.0, fw - x);
        let height = self.height.clamp(1.0, fh - y);
        Detection { x, y, width, height, ..self.clone() }
    }

    /// A box is usable for matching only when both sides exceed `min_side`.
    pub fn is_usable(&self, min_side: f32) -> bool {
        self.width > min_side && self.height > min_side
    }
}

/// Compute Intersection-over-Union between two detections.
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = a.width * a.height;
    let area_b = b.width * b.height;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

/// Non-Maximum Suppression: drop detections overlapping a higher-confidence
/// detection of the same class beyond `iou_threshold`.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[i].class_id != detections[j].class_id {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection { x, y, width: w, height: h, confidence: conf, class_id: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = det(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = det(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = det(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        let expected = 50.0 / 150.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            det(0.0, 0.0, 100.0, 100.0, 0.9),
            det(5.0, 5.0, 100.0, 100.0, 0.8),
            det(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_distinct_classes() {
        let mut a = det(0.0, 0.0, 100.0, 100.0, 0.9);
        let mut b = det(5.0, 5.0, 100.0, 100.0, 0.8);
        a.class_id = Some(0);
        b.class_id = Some(1);
        let result = nms(vec![a, b], 0.4);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_clamp_inside_is_identity() {
        let a = det(10.0, 10.0, 20.0, 20.0, 1.0);
        let c = a.clamp_to(100, 100);
        assert_eq!((c.x, c.y, c.width, c.height), (10.0, 10.0, 20.0, 20.0));
    }

    #[test]
    fn test_clamp_overhanging_box() {
        let a = det(-5.0, 90.0, 50.0, 50.0, 1.0);
        let c = a.clamp_to(100, 100);
        assert_eq!(c.x, 0.0);
        assert_eq!(c.y, 90.0);
        assert!(c.x + c.width <= 100.0);
        assert!(c.y + c.height <= 100.0);
    }

    #[test]
    fn test_min_face_side_gate() {
        assert!(!det(0.0, 0.0, 20.0, 20.0, 1.0).is_usable(MIN_FACE_SIDE));
        assert!(det(0.0, 0.0, 21.0, 21.0, 1.0).is_usable(MIN_FACE_SIDE));
        assert!(!det(0.0, 0.0, 100.0, 15.0, 1.0).is_usable(MIN_FACE_SIDE));
    }
}
