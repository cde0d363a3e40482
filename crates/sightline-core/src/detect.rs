//! Object detection over camera frames.
//!
//! The model itself is a black box behind [`ObjectDetector`]; the bundled
//! implementation decodes a YOLO-family single-tensor export
//! (`[1, 4 + classes, anchors]`) trained on the COCO label set.

use crate::tensor::letterbox_tensor;
use crate::types::{nms, Detection};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_INPUT_SIZE: usize = 640;
const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DETECTOR_NMS_THRESHOLD: f32 = 0.45;

/// COCO class names, indexed by the model's class id.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Name for a class id, or "object" when the id is outside the label set.
pub fn class_name(class_id: usize) -> &'static str {
    COCO_CLASSES.get(class_id).copied().unwrap_or("object")
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Black-box detector interface consumed by the object scan worker.
pub trait ObjectDetector: Send {
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, DetectError>;
}

/// YOLO-family ONNX object detector.
pub struct OnnxObjectDetector {
    session: Session,
}

impl OnnxObjectDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectError> {
        if !Path::new(model_path).exists() {
            return Err(DetectError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded object detection model");
        Ok(Self { session })
    }
}

impl ObjectDetector for OnnxObjectDetector {
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, DetectError> {
        let (input, letterbox) = letterbox_tensor(
            rgb,
            width as usize,
            height as usize,
            DETECTOR_INPUT_SIZE,
            0.0,
            255.0,
            114.0,
        );

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::InferenceFailed(format!("prediction tensor: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 3 || dims[1] < 5 {
            return Err(DetectError::InferenceFailed(format!(
                "unexpected prediction shape {dims:?} (need [1, 4+classes, anchors])"
            )));
        }
        let channels = dims[1];
        let anchors = dims[2];
        let num_classes = channels - 4;

        let mut detections = decode_predictions(
            data,
            channels,
            anchors,
            num_classes,
            DETECTOR_CONFIDENCE_THRESHOLD,
            &letterbox,
        );
        detections = nms(detections, DETECTOR_NMS_THRESHOLD);
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(detections)
    }
}

/// Decode a channel-major prediction tensor: rows are [cx, cy, w, h,
/// class scores...], columns are anchors.
fn decode_predictions(
    data: &[f32],
    channels: usize,
    anchors: usize,
    num_classes: usize,
    threshold: f32,
    letterbox: &crate::tensor::Letterbox,
) -> Vec<Detection> {
    let at = |c: usize, a: usize| data[c * anchors + a];

    let mut detections = Vec::new();
    for a in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = 0.0f32;
        for c in 0..num_classes {
            let score = at(4 + c, a);
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score <= threshold {
            continue;
        }

        let cx = at(0, a);
        let cy = at(1, a);
        let w = at(2, a);
        let h = at(3, a);

        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

        detections.push(Detection {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: best_score,
            class_id: Some(best_class),
        });
    }
    detections
}
