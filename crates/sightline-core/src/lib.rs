//! sightline-core — Recognition pipeline for the assistive camera app.
//!
//! Face matching (eigen-subspace model with multi-frame voting), object
//! detection, and camera-based text recognition, all running over ONNX
//! Runtime for CPU inference where a model is involved.

pub mod detect;
pub mod eigen;
pub mod enroll;
pub mod locate;
pub mod matcher;
pub mod ocr;
pub mod session;
pub mod tensor;
pub mod text;
pub mod types;

pub use detect::{class_name, ObjectDetector, OnnxObjectDetector};
pub use eigen::{EigenFaceModel, FACE_SIZE};
pub use enroll::{canonicalize, EnrollmentStore};
pub use locate::{FaceLocator, OnnxFaceLocator};
pub use matcher::{FaceMatcher, MatchedIdentity};
pub use ocr::{CtcOcr, OcrBackend, OcrFragment};
pub use session::VoteSession;
pub use text::{DetectedTextResult, TextExtractor, SCAN_TIMEOUT_MESSAGE};
pub use types::{Detection, MIN_FACE_SIDE};
