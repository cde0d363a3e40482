//! Text-recognition backend.
//!
//! The extractor treats recognition as a black box producing scored text
//! fragments; the bundled implementation runs a CRNN-style ONNX model
//! with greedy CTC decoding against a character dictionary.

use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const OCR_INPUT_HEIGHT: u32 = 48;
const OCR_MAX_INPUT_WIDTH: u32 = 640;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("character dictionary unreadable: {0}")]
    DictUnreadable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One recognized piece of text with its confidence in 0..1.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrFragment {
    pub text: String,
    pub confidence: f32,
}

/// Black-box recognition backend consumed by the text extractor.
pub trait OcrBackend: Send {
    fn read_fragments(&mut self, gray: &GrayImage) -> Result<Vec<OcrFragment>, OcrError>;
}

/// CRNN-style ONNX recognizer with greedy CTC decoding.
pub struct CtcOcr {
    session: Session,
    charset: Vec<String>,
}

impl CtcOcr {
    /// Load the recognition model and its character dictionary (one
    /// character per line; class 0 is the CTC blank).
    pub fn load(model_path: &str, dict_path: &str) -> Result<Self, OcrError> {
        if !Path::new(model_path).exists() {
            return Err(OcrError::ModelNotFound(model_path.to_string()));
        }
        let dict = std::fs::read_to_string(dict_path)
            .map_err(|e| OcrError::DictUnreadable(format!("{dict_path}: {e}")))?;
        let charset: Vec<String> = dict.lines().map(str::to_string).collect();
        if charset.is_empty() {
            return Err(OcrError::DictUnreadable(format!("{dict_path}: empty dictionary")));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, charset = charset.len(), "loaded OCR model");
        Ok(Self { session, charset })
    }

    /// Scale to the model height and build a normalized NCHW tensor, the
    /// grayscale value replicated across the three channels.
    fn preprocess(gray: &GrayImage) -> Array4<f32> {
        let scale = OCR_INPUT_HEIGHT as f32 / gray.height().max(1) as f32;
        let width = ((gray.width() as f32 * scale) as u32).clamp(16, OCR_MAX_INPUT_WIDTH);
        let resized = image::imageops::resize(gray, width, OCR_INPUT_HEIGHT, FilterType::Triangle);

        let h = OCR_INPUT_HEIGHT as usize;
        let w = width as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
        for y in 0..h {
            for x in 0..w {
                let normalized = (resized.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0 - 0.5) / 0.5;
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }
        tensor
    }
}

impl OcrBackend for CtcOcr {
    fn read_fragments(&mut self, gray: &GrayImage) -> Result<Vec<OcrFragment>, OcrError> {
        let input = Self::preprocess(gray);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OcrError::InferenceFailed(format!("sequence tensor: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 3 {
            return Err(OcrError::InferenceFailed(format!(
                "unexpected sequence shape {dims:?} (need [1, steps, classes])"
            )));
        }

        Ok(ctc_greedy_decode(data, dims[1], dims[2], &self.charset)
            .into_iter()
            .collect())
    }
}

/// Greedy CTC decode: argmax per step, collapse repeats, drop blanks
/// (class 0). The fragment confidence is the mean probability of the
/// emitted characters. No characters means no fragment.
fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    charset: &[String],
) -> Option<OcrFragment> {
    let mut text = String::new();
    let mut conf_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut prev_class = 0usize;

    for t in 0..steps {
        let row = &probs[t * classes..(t + 1) * classes];
        let (best, &prob) = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        if best != 0 && best != prev_class {
            if let Some(ch) = charset.get(best - 1) {
                text.push_str(ch);
                conf_sum += prob;
                emitted += 1;
            }
        }
        prev_class = best;
    }

    if emitted == 0 {
        return None;
    }
    Some(OcrFragment {
        text,
        confidence: conf_sum / emitted as f32,
    })
}
