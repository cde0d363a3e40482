//! Frame-level face matching: locate, gate, crop, predict, vote.
//!
//! This is the detection step the scan worker runs on every pulled frame,
//! shared by face login (vote window > 1) and in-app identification
//! (window of 1).

use crate::eigen::{EigenFaceModel, FACE_SIZE};
use crate::locate::FaceLocator;
use crate::session::VoteSession;
use crate::types::{Detection, MIN_FACE_SIDE};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};

/// A finalized match for the foreground.
#[derive(Debug, Clone)]
pub struct MatchedIdentity {
    pub identity: String,
    pub label_index: usize,
}

pub struct FaceMatcher {
    locator: Box<dyn FaceLocator>,
    model: EigenFaceModel,
    session: VoteSession,
}

impl FaceMatcher {
    pub fn new(locator: Box<dyn FaceLocator>, model: EigenFaceModel, session: VoteSession) -> Self {
        Self { locator, model, session }
    }

    /// Run one frame through the pipeline. Returns the finalized identity
    /// once the voting session accepts; `None` covers every recoverable
    /// condition this tick (no face, unusable box, low confidence,
    /// window not yet full, locator failure).
    pub fn observe_frame(&mut self, rgb: &[u8], width: u32, height: u32) -> Option<MatchedIdentity> {
        let detections = match self.locator.locate(rgb, width, height) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(error = %e, "face locator failed, skipping frame");
                return None;
            }
        };

        for detection in &detections {
            let boxed = detection.clamp_to(width, height);
            if !boxed.is_usable(MIN_FACE_SIDE) {
                continue;
            }

            let Some(face) = canonical_crop(rgb, width, height, &boxed) else {
                continue;
            };
            let (label, distance) = match self.model.predict(face.as_raw()) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(error = %e, "prediction failed");
                    continue;
                }
            };

            tracing::trace!(label, distance, "face prediction");
            if let Some(winner) = self.session.observe(label, distance) {
                return Some(MatchedIdentity {
                    identity: self.model.identity_of(winner).to_string(),
                    label_index: winner,
                });
            }
        }
        None
    }

    /// Discard voting state when a scan stops or is cancelled.
    pub fn reset(&mut self) {
        self.session.reset();
    }
}

/// Crop a clamped face box out of an RGB frame and normalize it to the
/// canonical grayscale size the model expects.
fn canonical_crop(rgb: &[u8], width: u32, height: u32, boxed: &Detection) -> Option<GrayImage> {
    let frame = RgbImage::from_raw(width, height, rgb.to_vec())?;
    let cropped = image::imageops::crop_imm(
        &frame,
        boxed.x as u32,
        boxed.y as u32,
        boxed.width as u32,
        boxed.height as u32,
    )
    .to_image();
    let gray = image::imageops::grayscale(&cropped);
    Some(image::imageops::resize(
        &gray,
        FACE_SIZE as u32,
        FACE_SIZE as u32,
        FilterType::Triangle,
    ))
}
