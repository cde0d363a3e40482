//! Face localization ahead of matching.
//!
//! The matcher never sees a full frame; a general-purpose detector produces
//! candidate boxes first. The ONNX implementation decodes an SCRFD-style
//! anchor-free export (score + bbox heads at three strides); landmarks are
//! not needed because the matcher works on the axis-aligned crop.

use crate::tensor::{letterbox_tensor, Letterbox};
use crate::types::{nms, Detection};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LOCATOR_INPUT_SIZE: usize = 640;
const LOCATOR_MEAN: f32 = 127.5;
const LOCATOR_STD: f32 = 128.0;
const LOCATOR_CONFIDENCE_THRESHOLD: f32 = 0.5;
const LOCATOR_NMS_THRESHOLD: f32 = 0.4;
const LOCATOR_STRIDES: [usize; 3] = [8, 16, 32];
const LOCATOR_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces candidate face boxes for a frame. The recognition pipeline
/// treats the detector as a black box behind this seam.
pub trait FaceLocator: Send {
    fn locate(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, LocateError>;
}

/// ONNX anchor-free face locator.
pub struct OnnxFaceLocator {
    session: Session,
}

impl OnnxFaceLocator {
    /// Load the detection model from the given path. The export must carry
    /// score and bbox heads for strides 8/16/32, positionally ordered
    /// `[scores 8/16/32, bboxes 8/16/32, ...]`; extra heads (landmarks)
    /// are ignored.
    pub fn load(model_path: &str) -> Result<Self, LocateError> {
        if !Path::new(model_path).exists() {
            return Err(LocateError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(path = model_path, outputs = num_outputs, "loaded face locator model");

        if num_outputs < 6 {
            return Err(LocateError::InferenceFailed(format!(
                "locator model requires 6 outputs (3 strides x score/bbox), got {num_outputs}"
            )));
        }

        Ok(Self { session })
    }
}

impl FaceLocator for OnnxFaceLocator {
    /// Detect faces in an RGB frame, returning boxes sorted by confidence.
    fn locate(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, LocateError> {
        let (input, letterbox) = letterbox_tensor(
            rgb,
            width as usize,
            height as usize,
            LOCATOR_INPUT_SIZE,
            LOCATOR_MEAN,
            LOCATOR_STD,
            LOCATOR_MEAN,
        );

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (stride_pos, &stride) in LOCATOR_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[stride_pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| LocateError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[stride_pos + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| LocateError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all.extend(decode_stride(scores, bboxes, stride, &letterbox));
        }

        let mut result = nms(all, LOCATOR_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

/// Decode score/bbox tensors for one stride level back into frame space.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<Detection> {
    let grid = LOCATOR_INPUT_SIZE / stride;
    let num_anchors = grid * grid * LOCATOR_ANCHORS_PER_CELL;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= LOCATOR_CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / LOCATOR_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        // bbox head encodes [left, top, right, bottom] distances in strides
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let (x1, y1) = letterbox.unmap(
            anchor_cx - bboxes[off] * stride as f32,
            anchor_cy - bboxes[off + 1] * stride as f32,
        );
        let (x2, y2) = letterbox.unmap(
            anchor_cx + bboxes[off + 2] * stride as f32,
            anchor_cy + bboxes[off + 3] * stride as f32,
        );

        detections.push(Detection {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            class_id: None,
        });
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stride_thresholds_low_scores() {
        let grid = LOCATOR_INPUT_SIZE / 32;
        let n = grid * grid * LOCATOR_ANCHORS_PER_CELL;
        let scores = vec![0.1f32; n];
        let bboxes = vec![1.0f32; n * 4];
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(decode_stride(&scores, &bboxes, 32, &lb).is_empty());
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let grid = LOCATOR_INPUT_SIZE / 32;
        let n = grid * grid * LOCATOR_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; n];
        let mut bboxes = vec![0.0f32; n * 4];

        // anchor at cell (2, 1): cx = 64, cy = 32, box extends 1 stride each way
        let cell = grid + 2;
        let idx = cell * LOCATOR_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&scores, &bboxes, 32, &lb);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y), (32.0, 0.0));
        assert_eq!((d.width, d.height), (64.0, 64.0));
        assert!((d.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_unmaps_letterbox() {
        let grid = LOCATOR_INPUT_SIZE / 32;
        let n = grid * grid * LOCATOR_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; n];
        let bboxes = vec![0.5f32; n * 4];
        scores[0] = 0.8;

        let lb = Letterbox { scale: 2.0, pad_x: 10.0, pad_y: 20.0 };
        let dets = decode_stride(&scores, &bboxes, 32, &lb);
        assert_eq!(dets.len(), 1);
        // anchor (0,0), half-stride offsets: model-space box (-16,-16)..(16,16)
        assert!((dets[0].x - (-16.0 - 10.0) / 2.0).abs() < 1e-4);
        assert!((dets[0].y - (-16.0 - 20.0) / 2.0).abs() < 1e-4);
        assert!((dets[0].width - 16.0).abs() < 1e-4);
    }
}
